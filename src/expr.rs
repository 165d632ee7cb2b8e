//! Restricted expression evaluation
//!
//! `!set` values and `!eval` parameters are small expressions over names
//! already present in the parameter scope: literals, arithmetic, comparison,
//! membership (`in`) and boolean combinators. There is deliberately no
//! access to the process environment, the file system, or any control flow.
//!
//! Expressions are parsed once at compile time (precedence climbing) and
//! evaluated on demand against the bound scope. Unlike string templates, a
//! missing name here is fatal to the owning action: an expression result
//! cannot be presented as an error string.

use std::cmp::Ordering;

use crate::error::RigorError;
use crate::suggest;
use crate::value::{ScopeRef, Value};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Name(String),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
}

/// A compiled expression bound lazily to a parameter scope
#[derive(Debug, Clone)]
pub struct Expr {
    source: String,
    root: Node,
    scope: Option<ScopeRef>,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

fn lex(source: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut num = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_float {
                    toks.push(Tok::Float(num.parse().map_err(|_| format!("bad number '{num}'"))?));
                } else {
                    toks.push(Tok::Int(num.parse().map_err(|_| format!("bad number '{num}'"))?));
                }
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    s.push(c);
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(match word.as_str() {
                    "and" => Tok::And,
                    "or" => Tok::Or,
                    "not" => Tok::Not,
                    "in" => Tok::In,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    _ => Tok::Ident(word),
                });
            }
            '+' => {
                chars.next();
                toks.push(Tok::Plus);
            }
            '-' => {
                chars.next();
                toks.push(Tok::Minus);
            }
            '*' => {
                chars.next();
                toks.push(Tok::Star);
            }
            '/' => {
                chars.next();
                toks.push(Tok::Slash);
            }
            '%' => {
                chars.next();
                toks.push(Tok::Percent);
            }
            '(' => {
                chars.next();
                toks.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                toks.push(Tok::RParen);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Eq);
                } else {
                    return Err("'=' is not an operator (use '==')".to_string());
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Ne);
                } else {
                    return Err("'!' is not an operator (use 'not')".to_string());
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Le);
                } else {
                    toks.push(Tok::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Ge);
                } else {
                    toks.push(Tok::Gt);
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Node, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Tok::Or) {
            let rhs = self.parse_and()?;
            lhs = Node::Bin(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, String> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Tok::And) {
            let rhs = self.parse_not()?;
            lhs = Node::Bin(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Node, String> {
        if self.eat(&Tok::Not) {
            Ok(Node::Not(Box::new(self.parse_not()?)))
        } else {
            self.parse_cmp()
        }
    }

    fn parse_cmp(&mut self) -> Result<Node, String> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Tok::Eq) => BinOp::Eq,
            Some(Tok::Ne) => BinOp::Ne,
            Some(Tok::Lt) => BinOp::Lt,
            Some(Tok::Le) => BinOp::Le,
            Some(Tok::Gt) => BinOp::Gt,
            Some(Tok::Ge) => BinOp::Ge,
            Some(Tok::In) => BinOp::In,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_add()?;
        Ok(Node::Bin(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Node, String> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_mul()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Node, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, String> {
        if self.eat(&Tok::Minus) {
            Ok(Node::Neg(Box::new(self.parse_unary()?)))
        } else {
            self.parse_atom()
        }
    }

    fn parse_atom(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Tok::Int(n)) => Ok(Node::Int(n)),
            Some(Tok::Float(f)) => Ok(Node::Float(f)),
            Some(Tok::Str(s)) => Ok(Node::Str(s)),
            Some(Tok::True) => Ok(Node::Bool(true)),
            Some(Tok::False) => Ok(Node::Bool(false)),
            Some(Tok::Null) => Ok(Node::Null),
            Some(Tok::Ident(name)) => Ok(Node::Name(name)),
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                if self.eat(&Tok::RParen) {
                    Ok(inner)
                } else {
                    Err("missing ')'".to_string())
                }
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, RigorError> {
        let err = |detail: String| RigorError::ExprParse {
            source_text: source.to_string(),
            detail,
        };

        let toks = lex(source).map_err(err)?;
        let mut parser = Parser { toks, pos: 0 };
        let root = parser.parse_or().map_err(err)?;
        if parser.pos != parser.toks.len() {
            return Err(err(format!(
                "trailing input after expression: {:?}",
                parser.toks[parser.pos]
            )));
        }

        Ok(Self {
            source: source.to_string(),
            root,
            scope: None,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bind(&mut self, scope: &ScopeRef) {
        self.scope = Some(scope.clone());
    }

    /// Evaluate against the current scope snapshot
    pub fn eval(&self) -> Result<Value, RigorError> {
        self.eval_node(&self.root)
    }

    fn fail(&self, detail: impl Into<String>) -> RigorError {
        RigorError::Eval {
            source_text: self.source.clone(),
            detail: detail.into(),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, RigorError> {
        let Some(scope) = &self.scope else {
            return Err(self.fail(format!("name '{name}' read before binding")));
        };
        let value = scope.borrow().get(name).cloned();
        match value {
            Some(Value::Template(t)) => Ok(Value::Str(t.render())),
            Some(Value::Expr(e)) => e.eval(),
            Some(v) => Ok(v),
            None => {
                let scope = scope.borrow();
                let detail = match suggest::closest(name, scope.keys().map(String::as_str)) {
                    Some(hint) => format!("unknown name '{name}' (closest known: '{hint}')"),
                    None => format!("unknown name '{name}'"),
                };
                Err(self.fail(detail))
            }
        }
    }

    fn eval_node(&self, node: &Node) -> Result<Value, RigorError> {
        match node {
            Node::Int(n) => Ok(Value::Int(*n)),
            Node::Float(f) => Ok(Value::Float(*f)),
            Node::Str(s) => Ok(Value::Str(s.clone())),
            Node::Bool(b) => Ok(Value::Bool(*b)),
            Node::Null => Ok(Value::Null),
            Node::Name(name) => self.lookup(name),
            Node::Neg(inner) => match self.eval_node(inner)? {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(self.fail(format!("cannot negate {other:?}"))),
            },
            Node::Not(inner) => Ok(Value::Bool(!self.eval_node(inner)?.truthy())),
            Node::Bin(BinOp::And, lhs, rhs) => {
                let l = self.eval_node(lhs)?;
                if !l.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_node(rhs)?.truthy()))
            }
            Node::Bin(BinOp::Or, lhs, rhs) => {
                let l = self.eval_node(lhs)?;
                if l.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_node(rhs)?.truthy()))
            }
            Node::Bin(op, lhs, rhs) => {
                let l = self.eval_node(lhs)?;
                let r = self.eval_node(rhs)?;
                self.eval_bin(*op, l, r)
            }
        }
    }

    fn eval_bin(&self, op: BinOp, l: Value, r: Value) -> Result<Value, RigorError> {
        match op {
            BinOp::Add => match (l, r) {
                (Value::Str(a), b) => Ok(Value::Str(format!("{a}{}", b.display_string()))),
                (a, Value::Str(b)) => Ok(Value::Str(format!("{}{b}", a.display_string()))),
                (a, b) => self.arith(BinOp::Add, a, b),
            },
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => self.arith(op, l, r),
            BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ord = compare(&l, &r)
                    .ok_or_else(|| self.fail(format!("cannot compare {l:?} and {r:?}")))?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ord == Ordering::Less,
                    BinOp::Le => ord != Ordering::Greater,
                    BinOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinOp::In => match &r {
                Value::Str(haystack) => {
                    Ok(Value::Bool(haystack.contains(&l.display_string())))
                }
                Value::Seq(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, &l)))),
                Value::Map(m) => Ok(Value::Bool(m.contains_key(&l.display_string()))),
                other => Err(self.fail(format!("'in' needs a string, sequence or map, got {other:?}"))),
            },
            BinOp::And | BinOp::Or => unreachable!("short-circuited above"),
        }
    }

    fn arith(&self, op: BinOp, l: Value, r: Value) -> Result<Value, RigorError> {
        match (num(&l), num(&r)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => {
                if b == 0 && matches!(op, BinOp::Div | BinOp::Mod) {
                    return Err(self.fail("division by zero"));
                }
                Ok(Value::Int(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    _ => unreachable!(),
                }))
            }
            (Some(a), Some(b)) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                if b == 0.0 && matches!(op, BinOp::Div | BinOp::Mod) {
                    return Err(self.fail("division by zero"));
                }
                Ok(Value::Float(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    _ => unreachable!(),
                }))
            }
            _ => Err(self.fail(format!("arithmetic needs numbers, got {l:?} and {r:?}"))),
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(n) => *n as f64,
            Num::Float(f) => *f,
        }
    }
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Float(f) => Some(Num::Float(*f)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        _ => None,
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (num(l), num(r)) {
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (num(l), num(r)) {
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{new_scope, ParamMap};

    fn eval_with(src: &str, pairs: &[(&str, Value)]) -> Result<Value, RigorError> {
        let mut e = Expr::parse(src).unwrap();
        let scope = new_scope(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<ParamMap>(),
        );
        e.bind(&scope);
        e.eval()
    }

    fn eval(src: &str) -> Value {
        eval_with(src, &[]).unwrap()
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval("10 / 4"), Value::Int(2));
        assert_eq!(eval("10.0 / 4"), Value::Float(2.5));
        assert_eq!(eval("7 % 3"), Value::Int(1));
        assert_eq!(eval("-3 + 1"), Value::Int(-2));
    }

    #[test]
    fn comparison() {
        assert_eq!(eval("2 < 3"), Value::Bool(true));
        assert_eq!(eval("2 >= 3"), Value::Bool(false));
        assert_eq!(eval("1 == 1.0"), Value::Bool(true));
        assert_eq!(eval("'a' < 'b'"), Value::Bool(true));
        assert_eq!(eval("'a' != 'b'"), Value::Bool(true));
    }

    #[test]
    fn boolean_combinators() {
        assert_eq!(eval("true and false"), Value::Bool(false));
        assert_eq!(eval("true or false"), Value::Bool(true));
        assert_eq!(eval("not 0"), Value::Bool(true));
        assert_eq!(eval("1 < 2 and 2 < 3"), Value::Bool(true));
    }

    #[test]
    fn membership() {
        assert_eq!(eval("'ell' in 'hello'"), Value::Bool(true));
        let seq = Value::Seq(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            eval_with("2 in xs", &[("xs", seq)]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn string_concat() {
        assert_eq!(eval("'a' + 'b'"), Value::Str("ab".into()));
        assert_eq!(eval("'port' + 22"), Value::Str("port22".into()));
    }

    #[test]
    fn name_lookup() {
        assert_eq!(
            eval_with("mem_size / 2", &[("mem_size", Value::Int(1992))]).unwrap(),
            Value::Int(996)
        );
    }

    #[test]
    fn missing_name_is_fatal_with_suggestion() {
        let err = eval_with("mem_siez + 1", &[("mem_size", Value::Int(1))]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mem_siez"));
        assert!(msg.contains("mem_size"));
    }

    #[test]
    fn division_by_zero_is_fatal() {
        assert!(eval_with("1 / 0", &[]).is_err());
    }

    #[test]
    fn parse_errors() {
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("(1").is_err());
        assert!(Expr::parse("a = b").is_err());
        assert!(Expr::parse("1 2").is_err());
    }

    #[test]
    fn templated_scope_value_renders_before_use() {
        let scope = new_scope(ParamMap::new());
        scope
            .borrow_mut()
            .insert("base".to_string(), Value::Str("10".into()));
        let mut t = crate::template::Template::parse("{base}0");
        t.bind(&scope);
        scope
            .borrow_mut()
            .insert("derived".to_string(), Value::Template(t));

        let mut e = Expr::parse("derived + ''").unwrap();
        e.bind(&scope);
        assert_eq!(e.eval().unwrap(), Value::Str("100".into()));
    }
}
