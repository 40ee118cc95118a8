// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and command routing.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter, StdoutStyles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Subcommand};
use itertools::Itertools;
use owo_colors::OwoColorize;
use shard_balance_metadata::BalanceExitCode;
use shard_balance_runner::{
    balance_state::{BalanceFile, BalanceState, Category},
    config::BalanceConfig,
    rebalance::{AbortReason, RebalanceOutcome, RebalanceSummary, Rebalancer, SkipReason},
};
use std::io::Write;
use tracing::info;

/// Keeps two CI test buckets balanced using behave timing logs.
///
/// After a green CI run, `shard-balance update` folds the durations recorded in the behave JSON
/// logs into the running averages kept in the balance file, and splits the tests into two buckets
/// of near-equal total duration.
#[derive(Debug, clap::Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct ShardBalanceApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    command: Command,
}

impl ShardBalanceApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::Update(opts) => opts.exec(&self.common, output, output_writer),
            Command::Show(opts) => opts.exec(&self.common, output, output_writer),
        }
    }
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Repository root; relative paths in the config are resolved against it
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    root: Utf8PathBuf,

    /// Config file [default: <root>/.config/shard-balance.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,
}

impl CommonOpts {
    fn load_config(&self) -> Result<BalanceConfig> {
        Ok(BalanceConfig::from_sources(
            &self.root,
            self.config_file.as_deref(),
        )?)
    }

    /// Strips the root from a path for display, if the root is a prefix.
    fn display_path<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge the latest behave logs into the balance file and recompute the buckets
    Update(UpdateOpts),

    /// Print the buckets in the balance file and their estimated durations
    Show(ShowOpts),
}

#[derive(Debug, Args)]
struct UpdateOpts {
    /// Behave JSON log to load; may be repeated, replaces the configured logs
    #[arg(long = "log", value_name = "PATH")]
    logs: Vec<Utf8PathBuf>,

    /// Balance file to update [default: from config]
    #[arg(long, value_name = "PATH")]
    balance_file: Option<Utf8PathBuf>,

    /// Start from empty history if the balance file does not exist
    #[arg(long)]
    init: bool,

    /// Compute the new balance but do not write it
    #[arg(long)]
    dry_run: bool,

    /// Exit with a non-zero code if the update is skipped or aborted
    #[arg(long)]
    strict: bool,
}

impl UpdateOpts {
    fn exec(
        self,
        common: &CommonOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let mut config = common.load_config()?;
        if !self.logs.is_empty() {
            config.set_logs(self.logs);
        }
        if let Some(balance_file) = self.balance_file {
            config.set_balance_file(balance_file);
        }

        let mut rebalancer = Rebalancer::new(common.root.clone(), &config);
        rebalancer.set_init(self.init).set_dry_run(self.dry_run);
        let outcome = rebalancer.run()?;

        let styles = output.stdout_styles();
        let mut writer = output_writer.stdout_writer();
        let exit_code = match outcome {
            RebalanceOutcome::Updated { summary, .. } => {
                write_summary(&summary, &styles, &mut writer)
                    .map_err(ExpectedError::write_output_error)?;
                BalanceExitCode::OK
            }
            RebalanceOutcome::Skipped(reason) => {
                let (message, exit_code) = match reason {
                    SkipReason::LogsMissing { missing } => (
                        format!(
                            "not found: {}",
                            missing.iter().map(|path| common.display_path(path)).join(", ")
                        ),
                        BalanceExitCode::INPUTS_MISSING,
                    ),
                    SkipReason::HistoryMissing { path } => {
                        info!(
                            "balance file `{}` does not exist (pass --init to create it)",
                            common.display_path(&path)
                        );
                        ("logs incomplete".to_owned(), BalanceExitCode::INPUTS_MISSING)
                    }
                };
                writeln!(writer, "{}", message.style(styles.skipped))
                    .map_err(ExpectedError::write_output_error)?;
                exit_code
            }
            RebalanceOutcome::Aborted(reason) => {
                let (message, exit_code) = match reason {
                    AbortReason::NoTests { log } => {
                        info!("no tests found in `{}`", common.display_path(&log));
                        ("missing tests", BalanceExitCode::NO_TESTS_FOUND)
                    }
                    AbortReason::TestsFailed { log, failed } => {
                        info!(
                            "failed in `{}`: {}",
                            common.display_path(&log),
                            failed.iter().join(", ")
                        );
                        ("some tests failed", BalanceExitCode::TESTS_FAILED)
                    }
                };
                writeln!(writer, "{}", message.style(styles.skipped))
                    .map_err(ExpectedError::write_output_error)?;
                exit_code
            }
        };
        writer.flush().map_err(ExpectedError::write_output_error)?;

        if self.strict {
            Ok(exit_code)
        } else {
            Ok(BalanceExitCode::OK)
        }
    }
}

fn write_summary(
    summary: &RebalanceSummary,
    styles: &StdoutStyles,
    writer: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{} tests",
        summary.record_count.style(styles.count)
    )?;
    for category in Category::ALL {
        let split = summary.category(category);
        writeln!(
            writer,
            "{} {}",
            category.style(styles.category),
            split.record_count.style(styles.count)
        )?;
        for (index, (count, msecs)) in split
            .bucket_counts
            .iter()
            .zip(split.bucket_msecs)
            .enumerate()
        {
            writeln!(
                writer,
                "  bucket {}: {} ({msecs} ms)",
                index + 1,
                plural_tests(*count)
            )?;
        }
    }
    Ok(())
}

#[derive(Debug, Args)]
struct ShowOpts {
    /// Balance file to show [default: from config]
    #[arg(long, value_name = "PATH")]
    balance_file: Option<Utf8PathBuf>,
}

impl ShowOpts {
    fn exec(
        self,
        common: &CommonOpts,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let balance_file = match self.balance_file {
            Some(balance_file) => balance_file,
            None => common.load_config()?.balance_file().to_owned(),
        };
        let balance_file = BalanceFile::new(common.root.join(balance_file));
        let Some(state) = balance_file.read()? else {
            return Err(ExpectedError::BalanceFileNotFound {
                path: common.display_path(balance_file.path()).to_owned(),
            });
        };

        let styles = output.stdout_styles();
        let mut writer = output_writer.stdout_writer();
        write_state(&state, &styles, &mut writer)
            .and_then(|()| writer.flush())
            .map_err(ExpectedError::write_output_error)?;

        Ok(BalanceExitCode::OK)
    }
}

fn write_state(
    state: &BalanceState,
    styles: &StdoutStyles,
    writer: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{} in history",
        plural_tests(state.tests.len()).style(styles.count)
    )?;
    for category in Category::ALL {
        let buckets = state.buckets(category);
        let estimated = buckets.estimated_msecs(&state.tests);
        writeln!(writer, "{}", category.style(styles.category))?;
        for (index, (bucket, msecs)) in [&buckets.bucket1, &buckets.bucket2]
            .into_iter()
            .zip(estimated)
            .enumerate()
        {
            writeln!(
                writer,
                "  bucket {}: {} (~{msecs:.0} ms)",
                index + 1,
                plural_tests(bucket.len())
            )?;
        }
    }
    Ok(())
}

fn plural_tests(count: usize) -> String {
    if count == 1 {
        "1 test".to_owned()
    } else {
        format!("{count} tests")
    }
}
