// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{ExpectedError, OutputWriter, dispatch::ShardBalanceApp};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use clap::Parser;
use serde_json::json;

pub(super) const LOG1: &str = "logs/behave-zotero-1-master.json";
pub(super) const LOG2: &str = "logs/behave-zotero-2-master.json";
pub(super) const BALANCE_FILE: &str = "test/balance.json";

/// A checkout with behave logs and a balance file in a temporary directory.
pub(super) struct TempRepo {
    dir: Utf8TempDir,
}

impl TempRepo {
    pub(super) fn new() -> Self {
        Self {
            dir: Utf8TempDir::new().expect("created temp dir"),
        }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(super) fn path(&self, rel: &str) -> Utf8PathBuf {
        self.root().join(rel)
    }

    pub(super) fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("created parent dir");
        }
        std::fs::write(&path, contents).expect("wrote file");
    }

    pub(super) fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("read file")
    }

    /// Writes a log with a passing fast test `A` (100 ms) and a passing slow test `B` (500 ms).
    pub(super) fn write_standard_log(&self, rel: &str) {
        self.write_log(
            rel,
            &[
                ("A", 0.1, "passed", false),
                ("B", 0.5, "passed", true),
            ],
        );
    }

    /// Writes a log of `(name, seconds, status, slow)` scenarios.
    pub(super) fn write_log(&self, rel: &str, scenarios: &[(&str, f64, &str, bool)]) {
        let elements: Vec<_> = scenarios
            .iter()
            .map(|&(name, secs, status, slow)| {
                let tags: &[&str] = if slow { &["use.with_slow=true"] } else { &[] };
                json!({
                    "type": "scenario",
                    "name": name,
                    "status": status,
                    "tags": tags,
                    "steps": [{"result": {"status": status, "duration": secs}}],
                })
            })
            .collect();
        let report = json!([{"name": "Export", "elements": elements}]);
        self.write(rel, &report.to_string());
    }

    /// Runs shard-balance against this repo, returning the exit code and captured stdout.
    pub(super) fn run(&self, args: &[&str]) -> Result<(i32, String), ExpectedError> {
        let app = ShardBalanceApp::parse_from(
            ["shard-balance", "--root", self.root().as_str(), "--color", "never"]
                .into_iter()
                .chain(args.iter().copied()),
        );
        let output = app.init_output();
        let mut writer = OutputWriter::new_test();
        let code = app.exec(output, &mut writer)?;
        let stdout = writer.stdout().expect("stdout is UTF-8").to_owned();
        Ok((code, stdout))
    }
}
