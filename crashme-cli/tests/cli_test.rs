//! Integration tests driving the crashme binary

use std::process::{Command, Output};

fn crashme(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crashme"))
        .args(args)
        .env_remove("CRASHME_ROUNDS")
        .env_remove("CRASHME_FOREIGN_USE")
        .env_remove("CRASHME_FOREIGN_DESTROY")
        .env_remove("CRASHME_MAX_INSTANCES")
        .env("RUST_LOG", "error")
        .env("NO_COLOR", "1")
        .output()
        .expect("crashme should execute")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("stdout should be utf8")
}

#[test]
fn test_help_exits_zero() {
    let output = crashme(&["--help"]);
    assert!(output.status.success());

    let stdout = stdout_of(&output);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("list"));
}

#[test]
fn test_list_shows_canonical_scenarios() {
    let output = crashme(&["list"]);
    assert!(output.status.success());

    let stdout = stdout_of(&output);
    for name in ["same-thread", "foreign-use", "worker-lifecycle", "foreign-destroy"] {
        assert!(stdout.contains(name), "missing {} in:\n{}", name, stdout);
    }
}

#[test]
fn test_same_thread_scenario_succeeds() {
    let output = crashme(&["run", "--scenario", "same-thread"]);
    assert!(output.status.success());

    let stdout = stdout_of(&output);
    assert!(stdout.contains("0 olleH"), "{}", stdout);
    assert!(stdout.contains("as expected"), "{}", stdout);
}

#[test]
fn test_first_three_scenarios_complete_in_process() {
    let output = crashme(&[
        "run",
        "--scenario",
        "same-thread",
        "--scenario",
        "foreign-use",
        "--scenario",
        "worker-lifecycle",
    ]);
    assert!(output.status.success());

    let stdout = stdout_of(&output);
    assert!(stdout.contains("worker-lifecycle finished"), "{}", stdout);
    assert!(!stdout.contains("UNEXPECTED"), "{}", stdout);
}

#[test]
fn test_in_process_foreign_destroy_aborts() {
    let output = crashme(&["run", "--scenario", "foreign-destroy"]);
    assert!(!output.status.success());

    // The narration stops mid-scenario: no outcome line is ever printed.
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Running foreign-destroy"), "{}", stdout);
    assert!(!stdout.contains("foreign-destroy finished"), "{}", stdout);
}

#[test]
fn test_isolated_battery_records_crash() {
    let output = crashme(&["run", "--isolate", "--rounds", "2"]);
    assert!(output.status.success());

    let stdout = stdout_of(&output);
    assert!(stdout.contains("foreign-destroy finished: crash"), "{}", stdout);
    assert!(stdout.contains("1 scenario(s) crashed"), "{}", stdout);
    assert!(!stdout.contains("UNEXPECTED"), "{}", stdout);
}

#[test]
fn test_rejecting_runtime_halts_run() {
    let output = crashme(&[
        "run",
        "--foreign-destroy",
        "reject",
        "--scenario",
        "foreign-destroy",
        "--scenario",
        "same-thread",
    ]);
    assert!(!output.status.success());

    let stdout = stdout_of(&output);
    assert!(stdout.contains("failure: destruction_error"), "{}", stdout);
    assert!(!stdout.contains("Running same-thread"), "{}", stdout);
}

#[test]
fn test_unknown_scenario_fails() {
    let output = crashme(&["run", "--scenario", "no-such-scenario"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_policy_fails() {
    let output = crashme(&["run", "--foreign-destroy", "explode"]);
    assert!(!output.status.success());
}
