//! Parameter values and scopes
//!
//! A [`ParamMap`] is the resolved set of named values visible to a tree node.
//! Scopes are shared behind `Rc<RefCell<_>>`: execution is single-threaded
//! (see the runner), so interior mutability is the only coordination needed.
//! The one writer at run time is the `!set` action; every read goes through
//! a fresh borrow, so a write is visible to any later read.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::expr::Expr;
use crate::template::Template;

pub type ParamMap = BTreeMap<String, Value>;
pub type ScopeRef = Rc<RefCell<ParamMap>>;

/// Closed value type for parameter scopes. Templates and expressions are
/// lazy: they carry a scope handle and are evaluated on every read.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Template(Template),
    Expr(Expr),
    Seq(Vec<Value>),
    Map(ParamMap),
    /// Explicit-removal sentinel (`!remove`): deletes the key when merged
    Removed,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null | Value::Removed => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Template(t) => !t.render().is_empty(),
            Value::Expr(e) => e.eval().map(|v| v.truthy()).unwrap_or(false),
            Value::Seq(s) => !s.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Integral reading, tolerating templated and stringly-typed sources
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Template(t) => t.render().trim().parse().ok(),
            Value::Expr(e) => e.eval().ok().and_then(|v| v.as_int()),
            _ => None,
        }
    }

    /// Flat string form used when a value is substituted into a template
    pub fn display_string(&self) -> String {
        match self {
            Value::Null | Value::Removed => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Template(t) => t.render(),
            Value::Expr(e) => match e.eval() {
                Ok(v) => v.display_string(),
                Err(_) => e.source().to_string(),
            },
            Value::Seq(items) => items
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Map(m) => m
                .iter()
                .map(|(k, v)| format!("{k}={}", v.display_string()))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Attach every lazy binding reachable from this value to `scope`.
    /// The traversal set is fixed by the value shape: map values, sequence
    /// elements, and the lazy leaves themselves.
    pub fn bind(&mut self, scope: &ScopeRef) {
        match self {
            Value::Template(t) => t.bind(scope),
            Value::Expr(e) => e.bind(scope),
            Value::Seq(items) => {
                for item in items {
                    item.bind(scope);
                }
            }
            Value::Map(m) => {
                for v in m.values_mut() {
                    v.bind(scope);
                }
            }
            _ => {}
        }
    }
}

pub fn new_scope(map: ParamMap) -> ScopeRef {
    Rc::new(RefCell::new(map))
}

/// Merge precedence, lowest to highest: `defaults` < `parent` < `own`.
/// A `Removed` value deletes the key instead of being retained.
pub fn merge_scope(defaults: &ParamMap, parent: &ParamMap, own: &ParamMap) -> ParamMap {
    let mut out = ParamMap::new();
    for (k, v) in defaults.iter().chain(parent.iter()).chain(own.iter()) {
        if matches!(v, Value::Removed) {
            out.remove(k);
        } else {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}
