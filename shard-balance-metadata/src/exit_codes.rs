// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `shard-balance` failures.
///
/// `shard-balance` runs may end early for a variety of reasons. This structure documents the exit
/// codes that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum BalanceExitCode {}

impl BalanceExitCode {
    /// No errors occurred and the balance file was updated (or, with `--dry-run`, computed).
    pub const OK: i32 = 0;

    /// One or more input files (behave logs or the balance file) were missing.
    ///
    /// Only produced with `--strict`; otherwise a skipped update exits with [`Self::OK`].
    pub const INPUTS_MISSING: i32 = 4;

    /// The behave logs were read but contained no tests.
    ///
    /// Only produced with `--strict`; otherwise exits with [`Self::OK`].
    pub const NO_TESTS_FOUND: i32 = 5;

    /// At least one test in the behave logs failed, so timings were not used.
    ///
    /// Only produced with `--strict`; otherwise exits with [`Self::OK`].
    pub const TESTS_FAILED: i32 = 100;

    /// A user issue happened while setting up a `shard-balance` invocation, for example an
    /// invalid configuration file.
    pub const SETUP_ERROR: i32 = 96;

    /// A behave log could not be read or parsed.
    pub const LOG_PARSE_FAILED: i32 = 104;

    /// The balance file could not be read, parsed, locked or written.
    pub const BALANCE_FILE_ERROR: i32 = 105;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// Returns true if `code` is one of the exit codes that signal an update which was skipped or
    /// aborted rather than one that failed.
    pub fn is_early_exit(code: i32) -> bool {
        matches!(
            code,
            Self::INPUTS_MISSING | Self::NO_TESTS_FOUND | Self::TESTS_FAILED
        )
    }
}
