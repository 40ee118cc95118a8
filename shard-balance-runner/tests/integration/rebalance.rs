// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, bail, ensure};
use pretty_assertions::assert_eq;
use shard_balance_runner::{
    balance_state::{BalanceState, HistoryEntry},
    rebalance::{AbortReason, RebalanceOutcome, RebalanceSummary, Rebalancer, SkipReason},
};

fn expect_updated(outcome: RebalanceOutcome) -> Result<(BalanceState, RebalanceSummary)> {
    match outcome {
        RebalanceOutcome::Updated { state, summary } => Ok((*state, summary)),
        other => bail!("expected an update, found {other:?}"),
    }
}

fn write_standard_logs(repo: &TempRepo) -> Result<()> {
    for log in [LOG1, LOG2] {
        repo.write_log(log, &[Scenario::fast("A", 0.1), Scenario::slow("B", 0.5)])?;
    }
    Ok(())
}

#[test]
fn two_logs_with_empty_history() -> Result<()> {
    let repo = TempRepo::new()?;
    write_standard_logs(&repo)?;
    repo.write(BALANCE_FILE, r#"{"tests": {}}"#)?;

    let config = repo.config()?;
    let outcome = Rebalancer::new(repo.root(), &config).run()?;
    let (state, summary) = expect_updated(outcome)?;

    assert_eq!(
        state.tests.into_iter().collect::<Vec<_>>(),
        vec![
            ("A".to_owned(), HistoryEntry { msecs: 100.0, n: 1 }),
            ("B".to_owned(), HistoryEntry { msecs: 500.0, n: 1 }),
        ]
    );
    assert_eq!(summary.record_count, 4);
    assert_eq!(summary.slow.record_count, 4, "slow pass covers all 4 records");
    assert_eq!(summary.slow.bucket_msecs, [600, 600]);
    assert_eq!(summary.fast.record_count, 2);
    assert_eq!(summary.fast.bucket_msecs, [100, 100]);
    assert!(summary.written);

    let written = BalanceState::from_json(&repo.path(BALANCE_FILE), &repo.read(BALANCE_FILE)?)?;
    assert_eq!(written.tests["B"], HistoryEntry { msecs: 500.0, n: 1 });
    assert_eq!(written.fast.bucket1, ["A"]);
    assert_eq!(written.fast.bucket2, ["A"]);

    Ok(())
}

#[test]
fn history_is_averaged_and_carried_forward() -> Result<()> {
    let repo = TempRepo::new()?;
    write_standard_logs(&repo)?;
    repo.write(
        BALANCE_FILE,
        r#"{"tests": {"A": {"msecs": 10, "n": 3}, "Retired": {"msecs": 42.0, "n": 7}}}"#,
    )?;

    let mut config = repo.config()?;
    config.set_logs([LOG1]);
    repo.write_log(LOG1, &[Scenario::fast("A", 0.02)])?;

    let (state, _) = expect_updated(Rebalancer::new(repo.root(), &config).run()?)?;
    assert_eq!(state.tests["A"], HistoryEntry { msecs: 12.5, n: 4 });
    assert_eq!(state.tests["Retired"], HistoryEntry { msecs: 42.0, n: 7 });
    ensure!(!state.tests.contains_key("B"), "B was not in the loaded log");

    Ok(())
}

#[test]
fn missing_logs_skip() -> Result<()> {
    let repo = TempRepo::new()?;
    repo.write_log(LOG1, &[Scenario::fast("A", 0.1)])?;
    repo.write(BALANCE_FILE, r#"{"tests": {}}"#)?;

    let config = repo.config()?;
    let outcome = Rebalancer::new(repo.root(), &config).run()?;
    assert_eq!(
        outcome,
        RebalanceOutcome::Skipped(SkipReason::LogsMissing {
            missing: vec![repo.path(LOG2)],
        })
    );
    assert_eq!(repo.read(BALANCE_FILE)?, r#"{"tests": {}}"#);

    Ok(())
}

#[test]
fn missing_history_skips_unless_init() -> Result<()> {
    let repo = TempRepo::new()?;
    write_standard_logs(&repo)?;

    let config = repo.config()?;
    let mut rebalancer = Rebalancer::new(repo.root(), &config);
    assert_eq!(
        rebalancer.run()?,
        RebalanceOutcome::Skipped(SkipReason::HistoryMissing {
            path: repo.path(BALANCE_FILE),
        })
    );
    ensure!(
        !repo.path(BALANCE_FILE).exists(),
        "balance file must not be created without init"
    );

    rebalancer.set_init(true);
    let (state, summary) = expect_updated(rebalancer.run()?)?;
    assert!(summary.written);
    assert_eq!(state.tests.len(), 2);
    ensure!(repo.path(BALANCE_FILE).exists(), "balance file was created");

    Ok(())
}

#[test]
fn failed_tests_abort_without_writing() -> Result<()> {
    let repo = TempRepo::new()?;
    repo.write_log(LOG1, &[Scenario::fast("A", 0.1)])?;
    repo.write_log(
        LOG2,
        &[
            Scenario::failed("Broken -- @1.1 ", 0.3),
            Scenario::slow("B", 0.5),
        ],
    )?;
    repo.write(BALANCE_FILE, r#"{"tests": {}}"#)?;

    let config = repo.config()?;
    let outcome = Rebalancer::new(repo.root(), &config).run()?;
    assert_eq!(
        outcome,
        RebalanceOutcome::Aborted(AbortReason::TestsFailed {
            log: repo.path(LOG2),
            failed: vec!["Broken".to_owned()],
        })
    );
    assert_eq!(repo.read(BALANCE_FILE)?, r#"{"tests": {}}"#);

    Ok(())
}

#[test]
fn log_without_tests_aborts() -> Result<()> {
    let repo = TempRepo::new()?;
    repo.write_log(LOG1, &[Scenario::fast("A", 0.1)])?;
    repo.write(LOG2, "[]")?;
    repo.write(BALANCE_FILE, r#"{"tests": {}}"#)?;

    let config = repo.config()?;
    let outcome = Rebalancer::new(repo.root(), &config).run()?;
    assert_eq!(
        outcome,
        RebalanceOutcome::Aborted(AbortReason::NoTests {
            log: repo.path(LOG2),
        })
    );

    Ok(())
}

#[test]
fn dry_run_does_not_write() -> Result<()> {
    let repo = TempRepo::new()?;
    write_standard_logs(&repo)?;

    let config = repo.config()?;
    let mut rebalancer = Rebalancer::new(repo.root(), &config);
    rebalancer.set_init(true).set_dry_run(true);
    let (state, summary) = expect_updated(rebalancer.run()?)?;

    assert!(!summary.written);
    assert_eq!(state.tests.len(), 2);
    ensure!(
        !repo.path(BALANCE_FILE).exists(),
        "dry run must not create the balance file"
    );
    ensure!(
        !repo.path("test").exists(),
        "dry run must not create the balance file's directory or lock"
    );

    Ok(())
}

#[test]
fn dry_run_reads_existing_history() -> Result<()> {
    let repo = TempRepo::new()?;
    write_standard_logs(&repo)?;
    repo.write(BALANCE_FILE, r#"{"tests": {"A": {"msecs": 300.0, "n": 1}}}"#)?;

    let config = repo.config()?;
    let mut rebalancer = Rebalancer::new(repo.root(), &config);
    rebalancer.set_dry_run(true);
    let (state, summary) = expect_updated(rebalancer.run()?)?;

    assert!(!summary.written);
    assert_eq!(state.tests["A"], HistoryEntry { msecs: 200.0, n: 2 });
    ensure!(
        !repo.path(&format!("{BALANCE_FILE}.lock")).exists(),
        "dry run must not take the balance file lock"
    );

    Ok(())
}

#[test]
fn repo_config_is_honored() -> Result<()> {
    let repo = TempRepo::new()?;
    repo.write(
        ".config/shard-balance.toml",
        indoc::indoc! {r#"
            logs = ["ci/run.json"]
            balance-file = "ci/balance.json"

            [partition]
            slow-scope = "slow-only"
        "#},
    )?;
    repo.write_log(
        "ci/run.json",
        &[
            Scenario::fast("A", 0.1),
            Scenario::slow("B", 0.5),
            Scenario::slow("C", 0.5),
        ],
    )?;

    let config = repo.config()?;
    assert_eq!(config.balance_file().as_str(), "ci/balance.json");
    let mut rebalancer = Rebalancer::new(repo.root(), &config);
    rebalancer.set_init(true);
    let (state, summary) = expect_updated(rebalancer.run()?)?;

    assert_eq!(summary.slow.record_count, 2);
    assert_eq!(summary.slow.bucket_msecs, [500, 500]);
    assert_eq!(state.fast.bucket1.len() + state.fast.bucket2.len(), 1);
    ensure!(repo.path("ci/balance.json").exists(), "configured path was written");

    Ok(())
}
