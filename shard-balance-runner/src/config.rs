// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for shard-balance.
//!
//! Configuration is layered: the embedded default config comes first, followed by the
//! repository's `.config/shard-balance.toml` (if present) or an explicitly specified file.

use crate::{
    balance_state::Category,
    behave_log::TestStatus,
    errors::{ConfigParseError, ConfigParseErrorKind},
    partition::{PartitionerBuilder, SolverKind},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, File, FileFormat};
use itertools::Itertools;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Overall configuration for shard-balance.
#[derive(Clone, Debug)]
pub struct BalanceConfig {
    logs: Vec<Utf8PathBuf>,
    balance_file: Utf8PathBuf,
    slow_tags: Vec<String>,
    partition: PartitionConfig,
}

impl BalanceConfig {
    /// The default location of the config within the repository: `.config/shard-balance.toml`.
    pub const CONFIG_PATH: &'static str = ".config/shard-balance.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the given file, or `.config/shard-balance.toml` under `root` if
    /// `file` is `None`.
    ///
    /// A missing default config file is not an error; a missing explicit file is.
    pub fn from_sources(root: &Utf8Path, file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let config = Self::make_default_config()
            .add_source(source)
            .build()
            .map_err(|error| {
                ConfigParseError::new(
                    &config_file,
                    ConfigParseErrorKind::BuildError(Box::new(error)),
                )
            })?;

        let (deserialized, unknown) = Self::deserialize_config(config)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warn!(
                "ignoring unknown config keys in `{}`: {}",
                config_file,
                unknown.iter().join(", ")
            );
        }

        Self::from_deserialized(deserialized).map_err(|kind| ConfigParseError::new(&config_file, kind))
    }

    /// Returns the embedded default config.
    pub fn default_config() -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        let (deserialized, unknown) =
            Self::deserialize_config(config).expect("default config is always valid");
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {}",
            unknown.iter().join(", ")
        );
        Self::from_deserialized(deserialized).expect("default config is always valid")
    }

    /// Returns the behave logs to load, in order.
    pub fn logs(&self) -> &[Utf8PathBuf] {
        &self.logs
    }

    /// Replaces the list of behave logs to load.
    pub fn set_logs(&mut self, logs: impl IntoIterator<Item = impl Into<Utf8PathBuf>>) {
        self.logs = logs.into_iter().map(Into::into).collect();
    }

    /// Returns the path to the balance file.
    pub fn balance_file(&self) -> &Utf8Path {
        &self.balance_file
    }

    /// Replaces the path to the balance file.
    pub fn set_balance_file(&mut self, balance_file: impl Into<Utf8PathBuf>) {
        self.balance_file = balance_file.into();
    }

    /// Returns the tags that classify a test as slow.
    pub fn slow_tags(&self) -> &[String] {
        &self.slow_tags
    }

    /// Returns the partitioning config.
    pub fn partition(&self) -> &PartitionConfig {
        &self.partition
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> config::ConfigBuilder<config::builder::DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn deserialize_config(
        config: Config,
    ) -> Result<(BalanceConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: BalanceConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already tracks the key, so drop it from the config error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }

    fn from_deserialized(
        deserialized: BalanceConfigDeserialize,
    ) -> Result<Self, ConfigParseErrorKind> {
        if deserialized.logs.is_empty() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "logs",
                reason: "at least one behave log is required".to_owned(),
            });
        }
        if deserialized.partition.max_search_nodes == 0 {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "partition.max-search-nodes",
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(Self {
            logs: deserialized.logs,
            balance_file: deserialized.balance_file,
            slow_tags: deserialized.slow_tags,
            partition: deserialized.partition,
        })
    }
}

/// Which records the slow pass partitions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SlowScope {
    /// Every record, regardless of status. Existing balance files were produced this way.
    All,

    /// Only records classified as slow.
    SlowOnly,
}

/// Partitioning configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionConfig {
    /// Which records the slow pass partitions.
    pub slow_scope: SlowScope,

    /// The solver for the slow category.
    pub slow_solver: SolverKind,

    /// The solver for the fast category.
    pub fast_solver: SolverKind,

    /// The node budget for branch-and-bound searches.
    pub max_search_nodes: u64,
}

impl PartitionConfig {
    /// Returns true if a record with `status` takes part in partitioning `category`.
    pub fn includes(&self, category: Category, status: TestStatus) -> bool {
        match (category, self.slow_scope) {
            (Category::Slow, SlowScope::All) => true,
            (Category::Slow, SlowScope::SlowOnly) => status == TestStatus::Slow,
            (Category::Fast, _) => status == TestStatus::Fast,
        }
    }

    /// Returns a partitioner builder for `category`.
    pub fn builder(&self, category: Category) -> PartitionerBuilder {
        let solver = match category {
            Category::Slow => self.slow_solver,
            Category::Fast => self.fast_solver,
        };
        let mut builder = PartitionerBuilder::new(solver);
        builder.set_max_search_nodes(self.max_search_nodes);
        builder
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BalanceConfigDeserialize {
    logs: Vec<Utf8PathBuf>,
    balance_file: Utf8PathBuf,
    slow_tags: Vec<String>,
    partition: PartitionConfig,
}
