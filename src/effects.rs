//! Leaf-action executors
//!
//! The engine only needs a leaf action's declared inputs and a resulting
//! [`Status`]; the side-effecting bodies live behind this trait so tests
//! can swap in a recorder, the same seam the DUT integration will use.

use std::process::Command;

use tracing::{debug, info, warn};

use crate::runner::Status;
use crate::value::ParamMap;

pub trait Effects {
    /// Run a shell command on the host
    fn host_cmd(&mut self, cmd: &str) -> Status;
    /// Run a shell command on the device under test
    fn dut_cmd(&mut self, cmd: &str) -> Status;
    /// Transfer files: deploy pushes host→DUT, otherwise fetch DUT→host
    fn transfer(&mut self, deploy: bool, sources: &[String], dest: &str) -> Status;
    /// Invoke an external test routine
    fn external_test(&mut self, module: &str, test: &str, args: &ParamMap) -> Status;
}

/// Real implementation. Host commands run through `sh -c`; a nonzero exit
/// is a semantic failure, a zero exit carries no pass/fail meaning. The
/// DUT channel, transfers and external tests are logged placeholders until
/// a device transport is wired in.
#[derive(Debug, Default)]
pub struct ShellEffects;

impl Effects for ShellEffects {
    fn host_cmd(&mut self, cmd: &str) -> Status {
        info!("HOST cmd: {cmd}");
        match Command::new("sh").arg("-c").arg(cmd).status() {
            Ok(status) if status.success() => Status::NotApplicable,
            Ok(status) => {
                warn!("host command '{cmd}' exited with {status}");
                Status::Failed
            }
            Err(e) => {
                warn!("host command '{cmd}' could not run: {e}");
                Status::Failed
            }
        }
    }

    fn dut_cmd(&mut self, cmd: &str) -> Status {
        info!("DUT cmd: {cmd}");
        Status::NotApplicable
    }

    fn transfer(&mut self, deploy: bool, sources: &[String], dest: &str) -> Status {
        let verb = if deploy { "deploy" } else { "fetch" };
        info!("{verb}: {sources:?} -> {dest}");
        Status::NotApplicable
    }

    fn external_test(&mut self, module: &str, test: &str, args: &ParamMap) -> Status {
        let rendered: Vec<String> = args
            .iter()
            .map(|(k, v)| format!("{k}={}", v.display_string()))
            .collect();
        info!("external test: {module}:{test}({})", rendered.join(", "));
        Status::NotApplicable
    }
}

/// Recording implementation for tests: every invocation is appended to
/// `calls` in a flat textual form, and commands listed in `fail_cmds`
/// report `Failed`.
#[derive(Debug, Default)]
pub struct MockEffects {
    pub calls: Vec<String>,
    pub fail_cmds: Vec<String>,
}

impl MockEffects {
    fn record(&mut self, call: String) -> Status {
        debug!("mock effect: {call}");
        self.calls.push(call);
        Status::NotApplicable
    }

    fn status_for(&self, cmd: &str) -> Option<Status> {
        self.fail_cmds.iter().any(|c| c == cmd).then_some(Status::Failed)
    }
}

impl Effects for MockEffects {
    fn host_cmd(&mut self, cmd: &str) -> Status {
        let failed = self.status_for(cmd);
        self.record(format!("host:{cmd}"));
        failed.unwrap_or(Status::NotApplicable)
    }

    fn dut_cmd(&mut self, cmd: &str) -> Status {
        let failed = self.status_for(cmd);
        self.record(format!("dut:{cmd}"));
        failed.unwrap_or(Status::NotApplicable)
    }

    fn transfer(&mut self, deploy: bool, sources: &[String], dest: &str) -> Status {
        let verb = if deploy { "deploy" } else { "fetch" };
        self.record(format!("{verb}:{} -> {dest}", sources.join(",")))
    }

    fn external_test(&mut self, module: &str, test: &str, _args: &ParamMap) -> Status {
        self.record(format!("extern:{module}:{test}"))
    }
}
