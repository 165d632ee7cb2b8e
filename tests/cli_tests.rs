//! Integration tests for the rigor CLI binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn rigor_cmd() -> Command {
    Command::cargo_bin("rigor").unwrap()
}

#[test]
fn help_flag() {
    rigor_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "declarative test orchestration for devices under test",
        ));
}

#[test]
fn check_valid_document() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("smoke.yaml");
    fs::write(
        &doc,
        "!test\nname: smoke\nsequence:\n  - !dut \"uname -a\"\n",
    )
    .unwrap();

    rigor_cmd()
        .args(["check", doc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("compiled: 2 actions"));
}

#[test]
fn check_missing_document_fails() {
    rigor_cmd()
        .args(["check", "no_such_doc.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("document not found"));
}

#[test]
fn run_passing_document_exits_zero() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("ok.yaml");
    fs::write(&doc, "!test\nname: ok\nsequence:\n  - !host \"true\"\n").unwrap();

    rigor_cmd()
        .args(["run", doc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pass"));
}

#[test]
fn run_failing_host_command_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("bad.yaml");
    fs::write(&doc, "!test\nname: bad\nsequence:\n  - !host \"false\"\n").unwrap();

    rigor_cmd()
        .args(["run", doc.to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Failed"));
}

#[test]
fn run_with_param_override() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("param.yaml");
    // Renders {flag} from the CLI-provided base parameter
    fs::write(
        &doc,
        "!test\nname: p\nsequence:\n  - !host \"test 1 -eq {flag}\"\n",
    )
    .unwrap();

    rigor_cmd()
        .args(["run", doc.to_str().unwrap(), "--param", "flag=1"])
        .assert()
        .success();

    rigor_cmd()
        .args(["run", doc.to_str().unwrap(), "--param", "flag=2"])
        .assert()
        .code(1);
}
