// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable contract for the `shard-balance` command.
//!
//! CI scripts that invoke `shard-balance update --strict` can match on these exit codes to tell
//! an updated balance file apart from a skipped or aborted update.

mod exit_codes;

pub use exit_codes::*;
