// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by shard-balance.

use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::time::Duration;
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse shard-balance config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The config deserialized, but a value was out of range.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The key with the invalid value.
        key: &'static str,

        /// Why the value was rejected.
        reason: String,
    },
}

/// An error that occurred while reading a behave JSON log from disk.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LogReadError {
    /// The log could not be read.
    #[error("failed to read behave log `{path}`")]
    Read {
        /// The path to the log.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The log was not valid JSON.
    #[error("behave log `{path}` is not valid JSON")]
    Syntax {
        /// The path to the log.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The top-level JSON value was neither an array nor an object.
    #[error("behave log `{path}` must contain an array or object of features, found {found}")]
    InvalidRoot {
        /// The path to the log.
        path: Utf8PathBuf,

        /// A description of the JSON value that was found instead.
        found: &'static str,
    },

    /// A feature in the log did not have the expected shape.
    #[error("behave log `{path}` has an invalid feature")]
    Feature {
        /// The path to the log.
        path: Utf8PathBuf,

        /// The underlying error, including the JSON path of the offending value.
        #[source]
        error: serde_path_to_error::Error<serde_json::Error>,
    },
}

/// An error returned by [`BehaveLog::load`](crate::behave_log::BehaveLog::load).
///
/// Both variants mean that the log must not be used to recompute the balance.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum LoadError {
    /// The log did not contain any tests.
    #[error("no tests found in behave log")]
    NoTests,

    /// At least one test in the log failed.
    #[error("{} failed: {}", plural_tests(.failed.len()), .failed.iter().join(", "))]
    Failed {
        /// The normalized names of the failed tests, in log order.
        failed: Vec<String>,
    },
}

fn plural_tests(count: usize) -> String {
    if count == 1 {
        "1 test".to_owned()
    } else {
        format!("{count} tests")
    }
}

/// An error that occurred while reading, writing or locking the balance file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BalanceStateError {
    /// The directory holding the balance file could not be created.
    #[error("failed to create directory `{dir}`")]
    DirCreate {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The balance file could not be read.
    #[error("failed to read balance file `{path}`")]
    Read {
        /// The path to the balance file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The balance file did not have the expected shape.
    #[error("failed to parse balance file `{path}`")]
    Parse {
        /// The path to the balance file.
        path: Utf8PathBuf,

        /// The underlying error, including the JSON path of the offending value.
        #[source]
        error: serde_path_to_error::Error<serde_json::Error>,
    },

    /// The balance state could not be serialized.
    #[error("failed to serialize balance state")]
    Serialize {
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The balance file could not be written.
    #[error("failed to write balance file `{path}`")]
    Write {
        /// The path to the balance file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },

    /// The lock file could not be opened or locked.
    #[error("failed to lock `{path}`")]
    FileLock {
        /// The path to the lock file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Another process held the lock for too long.
    #[error(
        "timed out after {timeout:?} waiting to lock `{path}` \
         (is another shard-balance process running?)"
    )]
    FileLockTimeout {
        /// The path to the lock file.
        path: Utf8PathBuf,

        /// How long the lock was waited for.
        timeout: Duration,
    },
}

/// An error that aborted a balance update.
///
/// Skipped and aborted updates are not errors: they are reported through
/// [`RebalanceOutcome`](crate::rebalance::RebalanceOutcome).
#[derive(Debug, Error)]
pub enum RebalanceError {
    /// A behave log could not be read.
    #[error(transparent)]
    LogRead(#[from] LogReadError),

    /// The balance file could not be read or written.
    #[error(transparent)]
    BalanceState(#[from] BalanceStateError),
}
