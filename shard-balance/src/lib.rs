// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keeps two CI test buckets balanced using the timings in behave JSON logs.
//!
//! After a green CI run, `shard-balance update` folds each test's duration into a running
//! average stored in `test/balance.json`, then splits the tests into two buckets of near-equal
//! total duration so the next run's shards finish at about the same time.
//!
//! The library API lives in `shard-balance-runner`; this crate is the command-line front end.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
#[cfg(test)]
mod tests_integration;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
