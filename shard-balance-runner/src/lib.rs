// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for shard-balance.
//!
//! shard-balance keeps two CI test buckets balanced: it reads the behave JSON reports of the
//! last run, folds each test's duration into a running average, and splits the tests into two
//! buckets with near-equal total duration. See [`rebalance::Rebalancer`] for the entry point.

pub mod balance_state;
pub mod behave_log;
pub mod config;
pub mod errors;
pub mod partition;
pub mod rebalance;
pub mod running_average;
