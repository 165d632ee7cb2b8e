//! Tree execution
//!
//! Strictly sequential, single-threaded: each leaf action runs to
//! completion before the next is considered. All runtime failures flow
//! through the [`Status`] channel and are governed by each container's
//! `continue_on_fail` flag; there is no separate exception path for
//! action failures.
//!
//! Container semantics: setup runs once; a setup failure aborts without
//! teardown (nothing was set up). The sequence runs `iterations` times;
//! a sequence failure aborts but still runs every teardown step, whose
//! individual results are ignored.

use std::fmt;

use tracing::{debug, info, warn};

use crate::effects::Effects;
use crate::node::{Action, Group, SetVar, Test};
use crate::propagate;
use crate::value::{ScopeRef, Value};

/// Result of one action. Only `Failed` blocks; `NotApplicable` marks an
/// outcome nobody verified and `Ignored` marks administrative actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Failed,
    NotApplicable,
    Ignored,
}

impl Status {
    pub fn blocking(self) -> bool {
        self == Status::Failed
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pass => "Pass",
            Status::Failed => "Failed",
            Status::NotApplicable => "N/A",
            Status::Ignored => "Ignore",
        })
    }
}

/// Runs a compiled, propagated tree against a set of leaf executors
pub struct Runner<'e> {
    effects: &'e mut dyn Effects,
}

impl<'e> Runner<'e> {
    pub fn new(effects: &'e mut dyn Effects) -> Self {
        Self { effects }
    }

    pub fn run(&mut self, action: &mut Action) -> Status {
        match action {
            Action::Test(t) => self.run_test(t),
            Action::Group(g) => self.run_group(g),
            Action::HostCmd(c) => {
                let cmd = c.command.display_string();
                self.effects.host_cmd(&cmd)
            }
            Action::DutCmd(c) => {
                let cmd = c.command.display_string();
                self.effects.dut_cmd(&cmd)
            }
            Action::Transfer(t) => {
                let sources: Vec<String> =
                    t.sources.iter().map(Value::display_string).collect();
                let dest = t.dest.display_string();
                self.effects.transfer(t.deploy, &sources, &dest)
            }
            Action::Extern(e) => {
                let module = e.module.display_string();
                let test = e.test.display_string();
                self.effects.external_test(&module, &test, &e.args)
            }
            Action::SetVar(s) => self.run_set(s),
        }
    }

    fn run_test(&mut self, t: &mut Test) -> Status {
        let name = t.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
        let iterations = scope_int(&t.scope, "iterations", 1).max(1);
        let continue_on_fail = scope_flag(&t.scope, "continue_on_fail");
        debug!(
            "test '{name}': iterations={iterations} continue_on_fail={continue_on_fail}"
        );

        // Setup failure: abort before anything was set up, skip teardown.
        for i in 0..t.setup.len() {
            let status = self.run_child(t, Slot::Setup, i);
            if status.blocking() && !continue_on_fail {
                warn!("test '{name}': setup failed, aborting");
                return Status::Failed;
            }
        }

        for iteration in 0..iterations {
            for i in 0..t.sequence.len() {
                let status = self.run_child(t, Slot::Sequence, i);
                if status.blocking() && !continue_on_fail {
                    warn!(
                        "test '{name}': failed in iteration {}, running teardown",
                        iteration + 1
                    );
                    self.run_teardown(t);
                    return Status::Failed;
                }
            }
        }

        self.run_teardown(t);
        info!("test '{name}': Pass");
        Status::Pass
    }

    /// Teardown steps always all run; their statuses are ignored.
    fn run_teardown(&mut self, t: &mut Test) {
        for i in 0..t.teardown.len() {
            self.run_child(t, Slot::Teardown, i);
        }
    }

    /// Run one child by position; after a `!set` child, re-propagate the
    /// container so every sibling binding sees the mutated scope.
    fn run_child(&mut self, t: &mut Test, slot: Slot, index: usize) -> Status {
        let child = match slot {
            Slot::Setup => &mut t.setup[index],
            Slot::Sequence => &mut t.sequence[index],
            Slot::Teardown => &mut t.teardown[index],
        };
        let mutates_scope = matches!(child, Action::SetVar(_));
        let status = self.run(child);
        if mutates_scope {
            propagate::propagate_children(t);
        }
        status
    }

    fn run_group(&mut self, g: &mut Group) -> Status {
        let name = g.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
        let continue_on_fail = scope_flag(&g.scope, "continue_on_fail");

        let mut failed = false;
        for i in 0..g.children.len() {
            let mutates_scope = matches!(g.children[i], Action::SetVar(_));
            let status = self.run(&mut g.children[i]);
            if mutates_scope {
                propagate::propagate_group_children(g);
            }
            if status.blocking() {
                if !continue_on_fail {
                    warn!("group '{name}': child failed, aborting");
                    return Status::Failed;
                }
                failed = true;
            }
        }

        if failed {
            Status::Failed
        } else {
            Status::Pass
        }
    }

    fn run_set(&mut self, s: &mut SetVar) -> Status {
        let value = match s.value.eval() {
            Ok(v) => v,
            Err(e) => {
                warn!("set '{}': {e}", s.var);
                return Status::Failed;
            }
        };
        let Some(target) = &s.target else {
            warn!("set '{}': no scope assigned, was the tree propagated?", s.var);
            return Status::Failed;
        };
        info!("SET {} = {}", s.var, value.display_string());
        target.borrow_mut().insert(s.var.clone(), value);
        Status::Ignored
    }
}

enum Slot {
    Setup,
    Sequence,
    Teardown,
}

fn scope_int(scope: &ScopeRef, key: &str, default: i64) -> i64 {
    scope
        .borrow()
        .get(key)
        .and_then(Value::as_int)
        .unwrap_or(default)
}

fn scope_flag(scope: &ScopeRef, key: &str) -> bool {
    scope.borrow().get(key).map(Value::truthy).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::MockEffects;
    use crate::node::Cmd;
    use crate::propagate::propagate_root;
    use crate::template::Template;
    use crate::value::ParamMap;

    fn dut(cmd: &str) -> Action {
        Action::DutCmd(Cmd {
            command: match Template::recognize(cmd) {
                Some(t) => Value::Template(t),
                None => Value::Str(cmd.to_string()),
            },
        })
    }

    fn map(pairs: &[(&str, Value)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn run_tree(root: &mut Action, fail_cmds: &[&str]) -> (Status, Vec<String>) {
        propagate_root(root, &ParamMap::new());
        let mut fx = MockEffects {
            fail_cmds: fail_cmds.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let status = Runner::new(&mut fx).run(root);
        (status, fx.calls)
    }

    #[test]
    fn iterations_run_sequence_in_order() {
        let mut t = Test::new(None);
        t.parameters = map(&[("iterations", Value::Int(3))]);
        t.sequence.push(dut("step"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &[]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:step"; 3]);
    }

    #[test]
    fn fail_fast_skips_rest_and_runs_teardown() {
        let mut t = Test::new(None);
        t.sequence.push(dut("one"));
        t.sequence.push(dut("two"));
        t.sequence.push(dut("three"));
        t.teardown.push(dut("cleanup"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &["two"]);
        assert_eq!(status, Status::Failed);
        assert_eq!(calls, vec!["dut:one", "dut:two", "dut:cleanup"]);
    }

    #[test]
    fn setup_failure_skips_teardown() {
        let mut t = Test::new(None);
        t.setup.push(dut("prepare"));
        t.sequence.push(dut("step"));
        t.teardown.push(dut("cleanup"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &["prepare"]);
        assert_eq!(status, Status::Failed);
        assert_eq!(calls, vec!["dut:prepare"]);
    }

    #[test]
    fn continue_on_fail_tolerates_failures() {
        let mut t = Test::new(None);
        t.parameters = map(&[("continue_on_fail", Value::Bool(true))]);
        t.sequence.push(dut("one"));
        t.sequence.push(dut("two"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &["one"]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:one", "dut:two"]);
    }

    #[test]
    fn teardown_failures_are_ignored() {
        let mut t = Test::new(None);
        t.sequence.push(dut("step"));
        t.teardown.push(dut("td1"));
        t.teardown.push(dut("td2"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &["td1"]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:step", "dut:td1", "dut:td2"]);
    }

    #[test]
    fn set_before_command_renders_new_value() {
        let mut t = Test::new(None);
        t.sequence.push(Action::SetVar(SetVar {
            var: "v".into(),
            value: crate::expr::Expr::parse("1").unwrap(),
            target: None,
        }));
        t.sequence.push(dut("echo {v}"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &[]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:echo 1"]);
    }

    #[test]
    fn set_in_one_iteration_affects_the_next() {
        let mut t = Test::new(None);
        t.parameters = map(&[
            ("iterations", Value::Int(2)),
            ("v", Value::Int(0)),
        ]);
        t.sequence.push(Action::SetVar(SetVar {
            var: "v".into(),
            value: crate::expr::Expr::parse("v + 1").unwrap(),
            target: None,
        }));
        t.sequence.push(dut("round {v}"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &[]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:round 1", "dut:round 2"]);
    }

    #[test]
    fn set_with_bad_expression_fails_only_that_action() {
        let mut t = Test::new(None);
        t.parameters = map(&[("continue_on_fail", Value::Bool(true))]);
        t.sequence.push(Action::SetVar(SetVar {
            var: "v".into(),
            value: crate::expr::Expr::parse("missing + 1").unwrap(),
            target: None,
        }));
        t.sequence.push(dut("after"));
        let mut root = Action::Test(t);

        let (status, calls) = run_tree(&mut root, &[]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:after"]);
    }

    #[test]
    fn set_propagates_into_nested_test() {
        let mut inner = Test::new(Some("inner".into()));
        inner.sequence.push(dut("inner {v}"));
        let mut outer = Test::new(Some("outer".into()));
        outer.setup.push(Action::SetVar(SetVar {
            var: "v".into(),
            value: crate::expr::Expr::parse("41 + 1").unwrap(),
            target: None,
        }));
        outer.sequence.push(Action::Test(inner));
        let mut root = Action::Test(outer);

        let (status, calls) = run_tree(&mut root, &[]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:inner 42"]);
    }

    #[test]
    fn group_runs_children_flat() {
        let mut a = Test::new(Some("a".into()));
        a.sequence.push(dut("a-step"));
        let mut b = Test::new(Some("b".into()));
        b.sequence.push(dut("b-step"));
        let mut root = Action::Group(Group {
            name: Some("suite".into()),
            children: vec![Action::Test(a), Action::Test(b)],
            scope: crate::value::new_scope(ParamMap::new()),
        });

        let (status, calls) = run_tree(&mut root, &[]);
        assert_eq!(status, Status::Pass);
        assert_eq!(calls, vec!["dut:a-step", "dut:b-step"]);
    }

    #[test]
    fn group_fail_fast_aborts_later_children() {
        let mut a = Test::new(Some("a".into()));
        a.sequence.push(dut("a-step"));
        let mut b = Test::new(Some("b".into()));
        b.sequence.push(dut("b-step"));
        let mut root = Action::Group(Group {
            name: None,
            children: vec![Action::Test(a), Action::Test(b)],
            scope: crate::value::new_scope(ParamMap::new()),
        });

        let (status, calls) = run_tree(&mut root, &["a-step"]);
        assert_eq!(status, Status::Failed);
        assert_eq!(calls, vec!["dut:a-step"]);
    }
}
