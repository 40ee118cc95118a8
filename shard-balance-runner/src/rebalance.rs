// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The balance update pipeline: load logs, merge timings into history, partition, persist.
//!
//! An update either produces a new [`BalanceState`], or ends early without touching the balance
//! file. Early endings are reported as [`RebalanceOutcome::Skipped`] (inputs are not there yet)
//! or [`RebalanceOutcome::Aborted`] (inputs are there but must not be used). A red CI run never
//! feeds the balance, since its timings may be incomplete.

use crate::{
    balance_state::{BalanceFile, BalanceState, Buckets, Category, HistoryEntry},
    behave_log::{BehaveLog, TestRecord, read_report},
    config::{BalanceConfig, PartitionConfig},
    errors::{LoadError, RebalanceError},
    partition::BucketSplit,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::{debug, info};

/// The result of a balance update that did not fail.
#[derive(Clone, Debug, PartialEq)]
pub enum RebalanceOutcome {
    /// A new balance state was computed, and written unless this was a dry run.
    Updated {
        /// The new state.
        state: Box<BalanceState>,

        /// A summary of the update.
        summary: RebalanceSummary,
    },

    /// The update was skipped because inputs were missing.
    Skipped(SkipReason),

    /// The update was aborted because the inputs must not be used.
    Aborted(AbortReason),
}

/// Why an update was skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// One or more behave logs do not exist.
    LogsMissing {
        /// The logs that were not found.
        missing: Vec<Utf8PathBuf>,
    },

    /// The balance file does not exist, and `init` was not requested.
    HistoryMissing {
        /// The path to the balance file.
        path: Utf8PathBuf,
    },
}

/// Why an update was aborted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortReason {
    /// A behave log contained no tests.
    NoTests {
        /// The log with no tests.
        log: Utf8PathBuf,
    },

    /// A behave log contained failed tests.
    TestsFailed {
        /// The log with the failures.
        log: Utf8PathBuf,

        /// The normalized names of the failed tests.
        failed: Vec<String>,
    },
}

/// A summary of a successful update.
#[derive(Clone, Debug, PartialEq)]
pub struct RebalanceSummary {
    /// The number of records loaded across all logs.
    pub record_count: usize,

    /// The slow category split.
    pub slow: CategorySummary,

    /// The fast category split.
    pub fast: CategorySummary,

    /// Whether the balance file was written.
    pub written: bool,
}

impl RebalanceSummary {
    /// Returns the summary for a category.
    pub fn category(&self, category: Category) -> &CategorySummary {
        match category {
            Category::Slow => &self.slow,
            Category::Fast => &self.fast,
        }
    }
}

/// Per-category details of a split.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CategorySummary {
    /// The number of records partitioned.
    pub record_count: usize,

    /// The number of records in each bucket.
    pub bucket_counts: [usize; 2],

    /// The total duration of each bucket, in whole milliseconds.
    pub bucket_msecs: [u64; 2],
}

impl From<&BucketSplit> for CategorySummary {
    fn from(split: &BucketSplit) -> Self {
        Self {
            record_count: split.len(),
            bucket_counts: [split.bucket1.len(), split.bucket2.len()],
            bucket_msecs: [split.bucket1_msecs, split.bucket2_msecs],
        }
    }
}

/// Runs balance updates against a repository.
#[derive(Clone, Debug)]
pub struct Rebalancer<'cfg> {
    root: Utf8PathBuf,
    config: &'cfg BalanceConfig,
    init: bool,
    dry_run: bool,
}

impl<'cfg> Rebalancer<'cfg> {
    /// Creates a new rebalancer. Relative paths in `config` are resolved against `root`.
    pub fn new(root: impl Into<Utf8PathBuf>, config: &'cfg BalanceConfig) -> Self {
        Self {
            root: root.into(),
            config,
            init: false,
            dry_run: false,
        }
    }

    /// If true, a missing balance file is treated as empty history instead of skipping.
    pub fn set_init(&mut self, init: bool) -> &mut Self {
        self.init = init;
        self
    }

    /// If true, everything is computed but the balance file is not written.
    pub fn set_dry_run(&mut self, dry_run: bool) -> &mut Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the balance file, with its path resolved against the root.
    pub fn balance_file(&self) -> BalanceFile {
        BalanceFile::new(self.resolve(self.config.balance_file()))
    }

    /// Runs the update.
    pub fn run(&self) -> Result<RebalanceOutcome, RebalanceError> {
        let logs: Vec<_> = self
            .config
            .logs()
            .iter()
            .map(|log| self.resolve(log))
            .collect();

        let missing: Vec<_> = logs.iter().filter(|log| !log.exists()).cloned().collect();
        if !missing.is_empty() {
            return Ok(RebalanceOutcome::Skipped(SkipReason::LogsMissing { missing }));
        }

        let mut log = BehaveLog::new(self.config.slow_tags());
        for path in &logs {
            let features = read_report(path)?;
            match log.load(features) {
                Ok(added) => debug!(%path, added, "loaded behave log"),
                Err(LoadError::NoTests) => {
                    return Ok(RebalanceOutcome::Aborted(AbortReason::NoTests {
                        log: path.clone(),
                    }));
                }
                Err(LoadError::Failed { failed }) => {
                    return Ok(RebalanceOutcome::Aborted(AbortReason::TestsFailed {
                        log: path.clone(),
                        failed,
                    }));
                }
            }
        }
        debug!("loaded {} test records from {} logs", log.len(), logs.len());

        let balance_file = self.balance_file();
        if !self.init && !balance_file.path().exists() {
            return Ok(RebalanceOutcome::Skipped(SkipReason::HistoryMissing {
                path: balance_file.path().to_owned(),
            }));
        }

        // A dry run never writes, so it reads without locking.
        let locked = if self.dry_run {
            None
        } else {
            Some(balance_file.lock_exclusive()?)
        };
        let history = match balance_file.read()? {
            Some(history) => history,
            None if self.init => {
                info!("starting new balance file at `{}`", balance_file.path());
                BalanceState::default()
            }
            None => {
                return Ok(RebalanceOutcome::Skipped(SkipReason::HistoryMissing {
                    path: balance_file.path().to_owned(),
                }));
            }
        };

        let (state, mut summary) = compute_state(&history, log.records(), self.config.partition());

        match locked {
            Some(locked) => {
                locked.write(&state)?;
                summary.written = true;
            }
            None => info!("dry run: not writing `{}`", balance_file.path()),
        }

        Ok(RebalanceOutcome::Updated {
            state: Box::new(state),
            summary,
        })
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.root.join(path)
    }
}

/// Computes a new balance state from the prior history and this run's records.
///
/// History entries for tests absent from `records` are carried forward unchanged. A test that
/// appears in several records is merged into history once, using its last record.
pub fn compute_state(
    history: &BalanceState,
    records: &[TestRecord],
    partition: &PartitionConfig,
) -> (BalanceState, RebalanceSummary) {
    let mut observed: IndexMap<&str, f64> = IndexMap::new();
    for record in records {
        observed.insert(&record.name, record.duration_msecs);
    }

    let mut state = BalanceState {
        tests: history.tests.clone(),
        ..BalanceState::default()
    };
    for (name, msecs) in observed {
        let entry = match history.tests.get(name) {
            Some(prior) => prior.observe(msecs),
            None => HistoryEntry::first(msecs),
        };
        state.tests.insert(name.to_owned(), entry);
    }

    let mut summaries = [CategorySummary::default(); 2];
    for (category, summary) in Category::ALL.into_iter().zip(&mut summaries) {
        let split = partition.builder(category).split(
            records
                .iter()
                .filter(|record| partition.includes(category, record.status))
                .map(|record| (record.name.as_str(), record.duration_msecs)),
        );
        *summary = CategorySummary::from(&split);
        debug!(
            "{category}: {} tests, bucket 1 = {} tests ({} ms), bucket 2 = {} tests ({} ms)",
            summary.record_count,
            summary.bucket_counts[0],
            summary.bucket_msecs[0],
            summary.bucket_counts[1],
            summary.bucket_msecs[1]
        );

        *state.buckets_mut(category) = Buckets {
            bucket1: split.bucket1,
            bucket2: split.bucket2,
        };
    }

    let [slow, fast] = summaries;
    let summary = RebalanceSummary {
        record_count: records.len(),
        slow,
        fast,
        written: false,
    };
    (state, summary)
}
