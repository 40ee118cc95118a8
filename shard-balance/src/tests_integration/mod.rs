// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests that parse command lines and capture stdout.

mod fixtures;

use fixtures::*;
use indoc::indoc;
use pretty_assertions::assert_eq;
use shard_balance_metadata::BalanceExitCode;
use test_case::test_case;

const EMPTY_HISTORY: &str = r#"{"tests": {}}"#;

#[test]
fn update_then_show() {
    let repo = TempRepo::new();
    repo.write_standard_log(LOG1);
    repo.write_standard_log(LOG2);
    repo.write(BALANCE_FILE, EMPTY_HISTORY);

    let (code, stdout) = repo.run(&["update"]).expect("update succeeds");
    assert_eq!(code, BalanceExitCode::OK);
    assert_eq!(
        stdout,
        indoc! {"
            4 tests
            slow 4
              bucket 1: 2 tests (600 ms)
              bucket 2: 2 tests (600 ms)
            fast 2
              bucket 1: 1 test (100 ms)
              bucket 2: 1 test (100 ms)
        "}
    );

    let written: serde_json::Value =
        serde_json::from_str(&repo.read(BALANCE_FILE)).expect("balance file is JSON");
    assert_eq!(
        written["tests"],
        serde_json::json!({
            "A": {"msecs": 100.0, "n": 1},
            "B": {"msecs": 500.0, "n": 1},
        })
    );

    let (code, stdout) = repo.run(&["show"]).expect("show succeeds");
    assert_eq!(code, BalanceExitCode::OK);
    assert_eq!(
        stdout,
        indoc! {"
            2 tests in history
            slow
              bucket 1: 2 tests (~600 ms)
              bucket 2: 2 tests (~600 ms)
            fast
              bucket 1: 1 test (~100 ms)
              bucket 2: 1 test (~100 ms)
        "}
    );
}

#[test]
fn second_run_averages() {
    let repo = TempRepo::new();
    repo.write_standard_log(LOG1);
    repo.write_standard_log(LOG2);
    repo.write(
        BALANCE_FILE,
        r#"{"tests": {"A": {"msecs": 300.0, "n": 1}, "Old": {"msecs": 5.0, "n": 2}}}"#,
    );

    repo.run(&["update"]).expect("update succeeds");

    let written: serde_json::Value =
        serde_json::from_str(&repo.read(BALANCE_FILE)).expect("balance file is JSON");
    assert_eq!(written["tests"]["A"], serde_json::json!({"msecs": 200.0, "n": 2}));
    assert_eq!(written["tests"]["Old"], serde_json::json!({"msecs": 5.0, "n": 2}));
}

enum Setup {
    LogMissing,
    HistoryMissing,
    NoTests,
    TestFailed,
}

#[test_case(Setup::LogMissing, "not found: logs/behave-zotero-2-master.json\n", BalanceExitCode::INPUTS_MISSING ; "log missing")]
#[test_case(Setup::HistoryMissing, "logs incomplete\n", BalanceExitCode::INPUTS_MISSING ; "history missing")]
#[test_case(Setup::NoTests, "missing tests\n", BalanceExitCode::NO_TESTS_FOUND ; "no tests")]
#[test_case(Setup::TestFailed, "some tests failed\n", BalanceExitCode::TESTS_FAILED ; "test failed")]
fn early_exits(setup: Setup, expected_stdout: &str, strict_code: i32) {
    let repo = TempRepo::new();
    repo.write_standard_log(LOG1);
    repo.write(BALANCE_FILE, EMPTY_HISTORY);
    match setup {
        Setup::LogMissing => {}
        Setup::HistoryMissing => {
            repo.write_standard_log(LOG2);
            std::fs::remove_file(repo.path(BALANCE_FILE)).expect("removed balance file");
        }
        Setup::NoTests => repo.write(LOG2, "[]"),
        Setup::TestFailed => repo.write_log(LOG2, &[("Broken", 0.2, "failed", false)]),
    }

    let (code, stdout) = repo.run(&["update"]).expect("update does not error");
    assert_eq!(code, BalanceExitCode::OK, "early exits succeed by default");
    assert_eq!(stdout, expected_stdout);

    let (code, stdout) = repo.run(&["update", "--strict"]).expect("update does not error");
    assert_eq!(code, strict_code);
    assert_eq!(stdout, expected_stdout);

    if !matches!(setup, Setup::HistoryMissing) {
        assert_eq!(repo.read(BALANCE_FILE), EMPTY_HISTORY, "balance file untouched");
    }
}

#[test]
fn overrides_and_dry_run() {
    let repo = TempRepo::new();
    repo.write_standard_log("ci/only.json");

    let (code, stdout) = repo
        .run(&[
            "update",
            "--log",
            "ci/only.json",
            "--balance-file",
            "ci/balance.json",
            "--init",
            "--dry-run",
        ])
        .expect("update succeeds");
    assert_eq!(code, BalanceExitCode::OK);
    assert!(stdout.starts_with("2 tests\n"), "unexpected stdout: {stdout}");
    assert!(
        !repo.path("ci/balance.json").exists(),
        "dry run does not write"
    );

    repo.run(&[
        "update",
        "--log",
        "ci/only.json",
        "--balance-file",
        "ci/balance.json",
        "--init",
    ])
    .expect("update succeeds");
    assert!(repo.path("ci/balance.json").exists(), "init creates the file");
}

#[test]
fn error_exit_codes() {
    let repo = TempRepo::new();
    repo.write(LOG1, "{not json");
    repo.write_standard_log(LOG2);
    repo.write(BALANCE_FILE, EMPTY_HISTORY);
    let err = repo.run(&["update"]).expect_err("malformed log fails");
    assert_eq!(err.process_exit_code(), BalanceExitCode::LOG_PARSE_FAILED);

    repo.write_standard_log(LOG1);
    repo.write(BALANCE_FILE, r#"{"tests": []}"#);
    let err = repo.run(&["update"]).expect_err("malformed balance file fails");
    assert_eq!(err.process_exit_code(), BalanceExitCode::BALANCE_FILE_ERROR);

    repo.write(".config/shard-balance.toml", "logs = []");
    let err = repo.run(&["update"]).expect_err("invalid config fails");
    assert_eq!(err.process_exit_code(), BalanceExitCode::SETUP_ERROR);

    let err = repo
        .run(&["show", "--balance-file", "missing.json"])
        .expect_err("missing balance file fails");
    assert_eq!(err.process_exit_code(), BalanceExitCode::BALANCE_FILE_ERROR);
}
