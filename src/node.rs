//! The action tree
//!
//! Documents compile into a closed node hierarchy: containers (`Test`,
//! `Group`) and leaf actions. `!include` is resolved eagerly at compile
//! time, so it has no runtime variant. Nodes are created once by the
//! compiler, have scopes assigned once by the propagator, and are mutated
//! transiently during a run (scope writes by `!set`); a tree is not reused
//! across runs because its scopes capture run-specific mutations.

use crate::expr::Expr;
use crate::value::{new_scope, ParamMap, ScopeRef, Value};

#[derive(Debug)]
pub enum Action {
    Test(Test),
    Group(Group),
    HostCmd(Cmd),
    DutCmd(Cmd),
    Transfer(Transfer),
    Extern(ExternalTest),
    SetVar(SetVar),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Test(_) => "test",
            Action::Group(_) => "group",
            Action::HostCmd(_) => "host",
            Action::DutCmd(_) => "dut",
            Action::Transfer(t) if t.deploy => "deploy",
            Action::Transfer(_) => "fetch",
            Action::Extern(_) => "extern",
            Action::SetVar(_) => "set",
        }
    }

    /// Total node count, for compile summaries
    pub fn size(&self) -> usize {
        match self {
            Action::Test(t) => {
                1 + t
                    .setup
                    .iter()
                    .chain(t.sequence.iter())
                    .chain(t.teardown.iter())
                    .map(Action::size)
                    .sum::<usize>()
            }
            Action::Group(g) => 1 + g.children.iter().map(Action::size).sum::<usize>(),
            _ => 1,
        }
    }
}

/// A test procedure: `setup` once, `sequence` repeated `iterations` times,
/// `teardown` once. `iterations` and `continue_on_fail` live in the resolved
/// scope so they inherit and can be overridden like any other parameter.
#[derive(Debug)]
pub struct Test {
    pub name: Option<String>,
    pub defaults: ParamMap,
    pub parameters: ParamMap,
    pub setup: Vec<Action>,
    pub sequence: Vec<Action>,
    pub teardown: Vec<Action>,
    /// Resolved scope, assigned during propagation
    pub scope: ScopeRef,
}

impl Test {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            defaults: ParamMap::new(),
            parameters: ParamMap::new(),
            setup: Vec::new(),
            sequence: Vec::new(),
            teardown: Vec::new(),
            scope: new_scope(ParamMap::new()),
        }
    }
}

/// Flat ordered run of named sub-procedures. No parameter contribution of
/// its own beyond the inherited scope, no setup/teardown distinction.
#[derive(Debug)]
pub struct Group {
    pub name: Option<String>,
    pub children: Vec<Action>,
    pub scope: ScopeRef,
}

/// A shell command template, run on the host or the DUT
#[derive(Debug)]
pub struct Cmd {
    pub command: Value,
}

/// File transfer between host and DUT: many source templates, one
/// destination template. `deploy` pushes to the DUT, otherwise fetches.
#[derive(Debug)]
pub struct Transfer {
    pub deploy: bool,
    pub sources: Vec<Value>,
    pub dest: Value,
}

/// Invocation of an external test routine by module/test identifier
#[derive(Debug)]
pub struct ExternalTest {
    pub module: Value,
    pub test: Value,
    pub args: ParamMap,
}

/// Writes an evaluated expression into the owning container's scope.
/// `target` is the one surviving use of the source model's parent
/// back-reference; it is assigned during propagation.
#[derive(Debug)]
pub struct SetVar {
    pub var: String,
    pub value: Expr,
    pub target: Option<ScopeRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_all_positions() {
        let mut t = Test::new(Some("t".into()));
        t.setup.push(Action::SetVar(SetVar {
            var: "v".into(),
            value: Expr::parse("1").unwrap(),
            target: None,
        }));
        t.sequence.push(Action::DutCmd(Cmd {
            command: Value::Str("uname".into()),
        }));
        t.teardown.push(Action::HostCmd(Cmd {
            command: Value::Str("true".into()),
        }));
        assert_eq!(Action::Test(t).size(), 4);
    }

    #[test]
    fn kind_names() {
        let deploy = Action::Transfer(Transfer {
            deploy: true,
            sources: vec![],
            dest: Value::Null,
        });
        let fetch = Action::Transfer(Transfer {
            deploy: false,
            sources: vec![],
            dest: Value::Null,
        });
        assert_eq!(deploy.kind(), "deploy");
        assert_eq!(fetch.kind(), "fetch");
    }
}
