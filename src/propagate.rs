//! Scope assignment and binding resolution
//!
//! After compilation the tree is walked top-down, pre-order. Every node
//! receives a fresh scope merged from its defaults, the parent's resolved
//! scope and its own parameters; every lazy binding in the node's declared
//! slots is then attached to that scope by handle. The traversal set is
//! fixed per node kind.
//!
//! The same walk doubles as the runtime-mutation path: after a `!set`
//! writes into a container's scope, the runner re-propagates that
//! container's children so every reachable binding sees the new value on
//! its next render. Rendering is never cached, so nothing else is needed.

use crate::node::{Action, Group, Test};
use crate::value::{merge_scope, new_scope, ParamMap, ScopeRef, Value};

/// Scope keys with engine-level meaning, given defaults during propagation
const ITERATIONS: &str = "iterations";
const CONTINUE_ON_FAIL: &str = "continue_on_fail";

/// Resolve the whole tree from a base parameter set
pub fn propagate_root(root: &mut Action, base: &ParamMap) {
    propagate(root, &new_scope(base.clone()));
}

/// Assign `node` a fresh scope built from `parent` and bind its subtree.
/// Safe to re-run; the runner calls it again after scope mutations.
pub fn propagate(node: &mut Action, parent: &ScopeRef) {
    match node {
        Action::Test(t) => propagate_test(t, parent),
        Action::Group(g) => propagate_group(g, parent),
        Action::HostCmd(c) | Action::DutCmd(c) => {
            c.command.bind(&child_scope(parent));
        }
        Action::Transfer(t) => {
            let scope = child_scope(parent);
            for src in &mut t.sources {
                src.bind(&scope);
            }
            t.dest.bind(&scope);
        }
        Action::Extern(e) => {
            let scope = child_scope(parent);
            e.module.bind(&scope);
            e.test.bind(&scope);
            for v in e.args.values_mut() {
                v.bind(&scope);
            }
        }
        Action::SetVar(s) => {
            // Evaluates against, and writes into, the owning container's
            // actual scope rather than a copy.
            s.value.bind(parent);
            s.target = Some(parent.clone());
        }
    }
}

/// A child never shares its parent's scope object; it gets a copy to merge
/// its own contributions into.
fn child_scope(parent: &ScopeRef) -> ScopeRef {
    new_scope(parent.borrow().clone())
}

fn propagate_test(t: &mut Test, parent: &ScopeRef) {
    let mut merged = merge_scope(&t.defaults, &parent.borrow(), &t.parameters);
    merged
        .entry(ITERATIONS.to_string())
        .or_insert(Value::Int(1));
    merged
        .entry(CONTINUE_ON_FAIL.to_string())
        .or_insert(Value::Bool(false));

    t.scope = new_scope(merged);
    // Parameter values may themselves be templates over this scope
    for v in t.scope.borrow_mut().values_mut() {
        v.bind(&t.scope);
    }
    propagate_children(t);
}

/// Re-resolve every child of `t` against its current scope
pub fn propagate_children(t: &mut Test) {
    let scope = t.scope.clone();
    for child in t
        .setup
        .iter_mut()
        .chain(t.sequence.iter_mut())
        .chain(t.teardown.iter_mut())
    {
        propagate(child, &scope);
    }
}

fn propagate_group(g: &mut Group, parent: &ScopeRef) {
    g.scope = child_scope(parent);
    propagate_group_children(g);
}

/// Re-resolve every child of `g` against its current scope
pub fn propagate_group_children(g: &mut Group) {
    let scope = g.scope.clone();
    for child in &mut g.children {
        propagate(child, &scope);
    }
}
