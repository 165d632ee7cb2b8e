//! Lazy string templates
//!
//! A template is a `{name}` placeholder string tokenized once at compile
//! time and rendered on every read against the scope it was bound to during
//! propagation. Rendering is never cached: a scope mutation is picked up by
//! the next render automatically.
//!
//! A missing name is deliberately non-fatal. The template may be evaluated
//! again later after more context is merged in, so rendering reports the
//! closest known names and returns the source text unchanged.

use tracing::{debug, warn};

use crate::suggest;
use crate::value::{ScopeRef, Value};

/// Parsed template fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Literal(String),
    /// `{name}` placeholder, looked up in the bound scope
    Name(String),
}

/// A string template bound lazily to a parameter scope
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    tokens: Vec<Token>,
    scope: Option<ScopeRef>,
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Tokenize `{name}` placeholders; `{{` and `}}` escape literal braces.
/// An unterminated `{` is kept as literal text.
fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed && !name.is_empty() {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Name(name));
                } else {
                    literal.push('{');
                    literal.push_str(&name);
                    if closed {
                        literal.push('}');
                    }
                }
            }
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

impl Template {
    pub fn parse(source: &str) -> Self {
        Self {
            source: source.to_string(),
            tokens: tokenize(source),
            scope: None,
        }
    }

    /// Wrap `source` as a template iff it actually contains a placeholder;
    /// plain strings stay plain.
    pub fn recognize(source: &str) -> Option<Self> {
        let t = Self::parse(source);
        if t.tokens.iter().any(|tok| matches!(tok, Token::Name(_))) {
            Some(t)
        } else {
            None
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Attach the scope this template reads from. Rebinding is allowed;
    /// the propagator rebinds after a runtime scope mutation.
    pub fn bind(&mut self, scope: &ScopeRef) {
        self.scope = Some(scope.clone());
    }

    /// Render against the current scope snapshot. On a missing name the
    /// source text is returned unchanged and a suggestion is logged.
    pub fn render(&self) -> String {
        let Some(scope) = &self.scope else {
            return self.source.clone();
        };

        let names: Vec<Value> = {
            let scope = scope.borrow();
            let mut resolved = Vec::new();
            for token in &self.tokens {
                if let Token::Name(name) = token {
                    match scope.get(name) {
                        Some(v) => resolved.push(v.clone()),
                        None => {
                            let known = scope.keys().map(String::as_str);
                            match suggest::closest(name, known) {
                                Some(hint) => warn!(
                                    "template '{}': unknown name '{}' (closest known: '{}')",
                                    self.source, name, hint
                                ),
                                None => warn!(
                                    "template '{}': unknown name '{}'",
                                    self.source, name
                                ),
                            }
                            return self.source.clone();
                        }
                    }
                }
            }
            resolved
        };

        let mut out = String::with_capacity(self.source.len() * 2);
        let mut next = names.into_iter();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                // Same order as the collection pass above
                Token::Name(_) => match next.next() {
                    Some(v) => out.push_str(&v.display_string()),
                    None => return self.source.clone(),
                },
            }
        }

        if out != self.source {
            debug!("template '{}' -> '{}'", self.source, out);
        }
        out
    }
}
