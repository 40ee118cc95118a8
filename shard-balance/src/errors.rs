// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use shard_balance_metadata::BalanceExitCode;
use shard_balance_runner::errors::{
    BalanceStateError, ConfigParseError, LogReadError, RebalanceError,
};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected failure: bad input or environment, as opposed to a bug in shard-balance.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("log read error")]
    LogReadError {
        #[from]
        err: LogReadError,
    },
    #[error("balance file error")]
    BalanceStateError {
        #[from]
        err: BalanceStateError,
    },
    #[error("balance file not found")]
    BalanceFileNotFound { path: Utf8PathBuf },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl From<RebalanceError> for ExpectedError {
    fn from(err: RebalanceError) -> Self {
        match err {
            RebalanceError::LogRead(err) => Self::LogReadError { err },
            RebalanceError::BalanceState(err) => Self::BalanceStateError { err },
        }
    }
}

impl ExpectedError {
    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. } => BalanceExitCode::SETUP_ERROR,
            Self::LogReadError { .. } => BalanceExitCode::LOG_PARSE_FAILED,
            Self::BalanceStateError { .. } | Self::BalanceFileNotFound { .. } => {
                BalanceExitCode::BALANCE_FILE_ERROR
            }
            Self::WriteOutputError { .. } => BalanceExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::LogReadError { err } => {
                // The log path is part of the message, so skip straight to the cause.
                error!("{err}");
                err.source()
            }
            Self::BalanceStateError { err } => {
                error!("{err}");
                err.source()
            }
            Self::BalanceFileNotFound { path } => {
                error!(
                    "balance file `{}` does not exist (run `shard-balance update --init` to create it)",
                    path.style(styles.bold)
                );
                None
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
