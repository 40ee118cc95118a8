// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, WrapErr};
use serde_json::{Value, json};
use shard_balance_runner::config::BalanceConfig;

pub(crate) const LOG1: &str = "logs/behave-zotero-1-master.json";
pub(crate) const LOG2: &str = "logs/behave-zotero-2-master.json";
pub(crate) const BALANCE_FILE: &str = "test/balance.json";

/// A scenario as it appears in a behave report.
pub(crate) struct Scenario {
    pub(crate) name: &'static str,
    pub(crate) secs: f64,
    pub(crate) slow: bool,
    pub(crate) failed: bool,
}

impl Scenario {
    pub(crate) fn fast(name: &'static str, secs: f64) -> Self {
        Self {
            name,
            secs,
            slow: false,
            failed: false,
        }
    }

    pub(crate) fn slow(name: &'static str, secs: f64) -> Self {
        Self {
            slow: true,
            ..Self::fast(name, secs)
        }
    }

    pub(crate) fn failed(name: &'static str, secs: f64) -> Self {
        Self {
            failed: true,
            ..Self::fast(name, secs)
        }
    }

    fn to_json(&self) -> Value {
        let status = if self.failed { "failed" } else { "passed" };
        let tags: &[&str] = if self.slow {
            &["use.with_slow=true"]
        } else {
            &[]
        };
        json!({
            "type": "scenario",
            "name": self.name,
            "status": status,
            "tags": tags,
            "steps": [{"result": {"status": status, "duration": self.secs}}],
        })
    }
}

/// A repository checkout with behave logs and an optional balance file.
pub(crate) struct TempRepo {
    dir: Utf8TempDir,
}

impl TempRepo {
    pub(crate) fn new() -> Result<Self> {
        let dir = Utf8TempDir::new().wrap_err("failed to create temp dir")?;
        Ok(Self { dir })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn path(&self, rel: &str) -> Utf8PathBuf {
        self.dir.path().join(rel)
    }

    pub(crate) fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| format!("failed to create {parent}"))?;
        }
        std::fs::write(&path, contents).wrap_err_with(|| format!("failed to write {path}"))
    }

    pub(crate) fn write_log(&self, rel: &str, scenarios: &[Scenario]) -> Result<()> {
        let report = json!([{
            "keyword": "Feature",
            "name": "Export",
            "elements": scenarios.iter().map(Scenario::to_json).collect::<Vec<_>>(),
        }]);
        self.write(rel, &report.to_string())
    }

    pub(crate) fn read(&self, rel: &str) -> Result<String> {
        let path = self.path(rel);
        std::fs::read_to_string(&path).wrap_err_with(|| format!("failed to read {path}"))
    }

    pub(crate) fn config(&self) -> Result<BalanceConfig> {
        BalanceConfig::from_sources(self.root(), None).wrap_err("failed to load config")
    }
}
