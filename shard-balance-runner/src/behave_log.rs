// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loading per-test timings from behave JSON reports.
//!
//! A behave report is a list of features, each of which optionally holds a list of elements
//! (scenarios and backgrounds). Each scenario carries its tags, its overall status and a list of
//! steps whose results record how long the step took, in seconds.
//!
//! Retried scenarios show up as separate elements whose names carry a ` -- @<attempt> ` suffix.
//! The suffix is stripped so that every attempt maps onto the same logical test, and the last
//! attempt in the report wins.

use crate::errors::{LoadError, LogReadError};
use camino::Utf8Path;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::{borrow::Cow, collections::BTreeMap, fmt, sync::LazyLock};
use tracing::debug;

static RETRY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" -- @[0-9]+\.[0-9]+ ").expect("retry suffix regex is valid")
});

/// The element type behave uses for `Background:` sections.
const BACKGROUND_TYPE: &str = "background";

/// The status behave records for a failed scenario.
const FAILED_STATUS: &str = "failed";

/// A feature in a behave JSON report.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Feature {
    /// The scenarios and backgrounds in this feature, if any.
    #[serde(default)]
    pub elements: Option<Vec<Element>>,
}

/// A scenario or background in a behave JSON report.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Element {
    /// The element type: `scenario`, `scenario_outline` or `background`.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// The raw scenario name, possibly including a retry suffix.
    #[serde(default)]
    pub name: String,

    /// The overall status of the scenario.
    #[serde(default)]
    pub status: Option<String>,

    /// The tags on the scenario, without the leading `@`.
    #[serde(default)]
    pub tags: Vec<String>,

    /// The steps in the scenario.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A step in a behave scenario.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Step {
    /// The result of the step. Steps that were never executed have no result.
    #[serde(default)]
    pub result: Option<StepResult>,
}

/// The result of executing a step.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StepResult {
    /// How long the step took, in seconds.
    #[serde(default)]
    pub duration: Option<f64>,

    /// The status of the step.
    #[serde(default)]
    pub status: Option<String>,
}

impl Element {
    fn is_background(&self) -> bool {
        self.kind == BACKGROUND_TYPE
    }

    /// Returns the sum of all recorded step durations, in milliseconds.
    pub fn duration_msecs(&self) -> f64 {
        self.steps
            .iter()
            .filter_map(|step| step.result.as_ref()?.duration)
            .map(|secs| secs * 1000.0)
            .sum()
    }
}

/// The status category of a test, as used for bucketing.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TestStatus {
    /// The test passed and is not tagged as slow.
    Fast,

    /// The test passed and is tagged as slow.
    Slow,

    /// The test failed.
    Failed,
}

impl TestStatus {
    /// Returns the name of this status as it appears in the balance file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single test observation: one logical test from one behave log.
#[derive(Clone, Debug, PartialEq)]
pub struct TestRecord {
    /// The normalized test name, with any retry suffix stripped.
    pub name: String,

    /// The summed step durations, in milliseconds.
    pub duration_msecs: f64,

    /// The status category.
    pub status: TestStatus,
}

/// Strips retry-iteration suffixes (` -- @1.2 `) from a raw behave scenario name.
pub fn normalize_test_name(name: &str) -> Cow<'_, str> {
    RETRY_SUFFIX.replace_all(name, "")
}

/// Reads and parses a behave JSON report from disk.
///
/// The report may be either a JSON array of features (what behave writes) or a JSON object whose
/// values are features.
pub fn read_report(path: &Utf8Path) -> Result<Vec<Feature>, LogReadError> {
    let contents = std::fs::read_to_string(path).map_err(|error| LogReadError::Read {
        path: path.to_owned(),
        error,
    })?;
    parse_report(path, &contents)
}

/// Parses the contents of a behave JSON report. `path` is only used for error messages.
pub fn parse_report(path: &Utf8Path, contents: &str) -> Result<Vec<Feature>, LogReadError> {
    let root: serde_json::Value =
        serde_json::from_str(contents).map_err(|error| LogReadError::Syntax {
            path: path.to_owned(),
            error,
        })?;

    let feature_error = |error| LogReadError::Feature {
        path: path.to_owned(),
        error,
    };

    match root {
        serde_json::Value::Array(_) => {
            serde_path_to_error::deserialize::<_, Vec<Feature>>(root).map_err(feature_error)
        }
        serde_json::Value::Object(_) => {
            serde_path_to_error::deserialize::<_, BTreeMap<String, Feature>>(root)
                .map(|features| features.into_values().collect())
                .map_err(feature_error)
        }
        other => Err(LogReadError::InvalidRoot {
            path: path.to_owned(),
            found: json_type_name(&other),
        }),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Accumulates test records across one or more behave logs.
#[derive(Clone, Debug)]
pub struct BehaveLog {
    slow_tags: Vec<String>,
    records: Vec<TestRecord>,
}

impl BehaveLog {
    /// Creates a new, empty log. Tests carrying any of `slow_tags` are classified as slow.
    pub fn new(slow_tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            slow_tags: slow_tags.into_iter().map(Into::into).collect(),
            records: Vec::new(),
        }
    }

    /// Loads the tests in a single report.
    ///
    /// Within one report, later elements with the same normalized name replace earlier ones, so a
    /// passing retry replaces the failed attempt before it. Records from separate calls are all
    /// kept, even if they share a name.
    ///
    /// Nothing is added to the log if this returns an error. Returns the number of records added.
    pub fn load(
        &mut self,
        features: impl IntoIterator<Item = Feature>,
    ) -> Result<usize, LoadError> {
        let mut tests: IndexMap<String, (f64, TestStatus)> = IndexMap::new();

        for element in features
            .into_iter()
            .filter_map(|feature| feature.elements)
            .flatten()
        {
            if element.is_background() {
                continue;
            }

            let status = self.classify(&element);
            let name = normalize_test_name(&element.name).into_owned();
            tests.insert(name, (element.duration_msecs(), status));
        }

        if tests.is_empty() {
            return Err(LoadError::NoTests);
        }

        let failed: Vec<_> = tests
            .iter()
            .filter(|(_, (_, status))| *status == TestStatus::Failed)
            .map(|(name, _)| name.clone())
            .collect();
        if !failed.is_empty() {
            return Err(LoadError::Failed { failed });
        }

        let added = tests.len();
        debug!(added, total = self.records.len() + added, "loaded behave report");
        self.records.extend(
            tests
                .into_iter()
                .map(|(name, (duration_msecs, status))| TestRecord {
                    name,
                    duration_msecs,
                    status,
                }),
        );

        Ok(added)
    }

    fn classify(&self, element: &Element) -> TestStatus {
        if element.status.as_deref() == Some(FAILED_STATUS) {
            TestStatus::Failed
        } else if element
            .tags
            .iter()
            .any(|tag| self.slow_tags.iter().any(|slow| slow == tag))
        {
            TestStatus::Slow
        } else {
            TestStatus::Fast
        }
    }

    /// Returns all records loaded so far, in load order.
    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    /// Returns the number of records loaded so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records have been loaded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
