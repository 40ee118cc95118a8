// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persisted balance file.
//!
//! The balance file holds the running average duration of every test seen so far, plus the
//! bucket assignments for the slow and fast categories. It is read by the CI sharding logic of
//! the next test run. The file is:
//!
//! - written atomically, so an interrupted write never leaves a truncated file behind;
//! - guarded by an advisory lock (`<balance-file>.lock`) while an update is in progress;
//! - pretty-printed with two-space indentation and sorted object keys.

use crate::{errors::BalanceStateError, running_average::RunningAverage};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, PrettyFormatter};
use std::{
    collections::BTreeMap,
    fmt,
    fs::{File, TryLockError},
    io::{self, Write},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// The historical average duration of a single test.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// The running average duration, in milliseconds.
    pub msecs: f64,

    /// The number of runs in which the test was observed.
    pub n: u64,
}

impl HistoryEntry {
    /// Creates the entry for a test's first observation.
    pub fn first(msecs: f64) -> Self {
        Self { msecs, n: 1 }
    }

    /// Returns this entry with one more observation folded into the average.
    pub fn observe(self, msecs: f64) -> Self {
        let mut average = RunningAverage::resume(self.msecs, self.n);
        let msecs = average.observe(msecs);
        Self {
            msecs,
            n: average.count(),
        }
    }
}

/// A status category that has its own pair of buckets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Category {
    /// Tests tagged as slow.
    Slow,

    /// Untagged tests.
    Fast,
}

impl Category {
    /// All categories, in the order they are partitioned.
    pub const ALL: [Self; 2] = [Self::Slow, Self::Fast];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slow => f.write_str("slow"),
            Self::Fast => f.write_str("fast"),
        }
    }
}

/// The two buckets of a category.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Buckets {
    /// Tests assigned to bucket 1.
    #[serde(rename = "1", default)]
    pub bucket1: Vec<String>,

    /// Tests assigned to bucket 2.
    #[serde(rename = "2", default)]
    pub bucket2: Vec<String>,
}

impl Buckets {
    /// Estimates the total duration of each bucket from the given history, in milliseconds.
    ///
    /// Tests without history count as zero.
    pub fn estimated_msecs(&self, tests: &BTreeMap<String, HistoryEntry>) -> [f64; 2] {
        let sum = |bucket: &[String]| -> f64 {
            bucket
                .iter()
                .filter_map(|name| tests.get(name))
                .map(|entry| entry.msecs)
                .sum()
        };
        [sum(&self.bucket1), sum(&self.bucket2)]
    }
}

/// The root object of the balance file.
///
/// Fields are declared in lexicographic order so that serialized keys come out sorted.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BalanceState {
    /// Bucket assignments for fast tests.
    #[serde(default)]
    pub fast: Buckets,

    /// Bucket assignments for slow tests.
    #[serde(default)]
    pub slow: Buckets,

    /// Historical averages, by test name.
    #[serde(default)]
    pub tests: BTreeMap<String, HistoryEntry>,
}

impl BalanceState {
    /// Returns the buckets for a category.
    pub fn buckets(&self, category: Category) -> &Buckets {
        match category {
            Category::Slow => &self.slow,
            Category::Fast => &self.fast,
        }
    }

    /// Returns the buckets for a category, mutably.
    pub fn buckets_mut(&mut self, category: Category) -> &mut Buckets {
        match category {
            Category::Slow => &mut self.slow,
            Category::Fast => &mut self.fast,
        }
    }

    /// Parses a balance state from JSON. `path` is only used for error messages.
    pub fn from_json(path: &Utf8Path, json: &str) -> Result<Self, BalanceStateError> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            BalanceStateError::Parse {
                path: path.to_owned(),
                error,
            }
        })
    }

    /// Serializes this state as pretty-printed JSON with sorted keys and no trailing newline.
    ///
    /// Characters outside printable ASCII are written as `\uXXXX` escapes.
    pub fn to_json(&self) -> Result<String, BalanceStateError> {
        let mut out = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(
            &mut out,
            AsciiFormatter(PrettyFormatter::with_indent(b"  ")),
        );
        self.serialize(&mut serializer)
            .map_err(|error| BalanceStateError::Serialize { error })?;
        // The formatter only emits ASCII.
        Ok(String::from_utf8(out).expect("escaped JSON is ASCII"))
    }
}

/// A pretty formatter that escapes every character outside printable ASCII.
struct AsciiFormatter(PrettyFormatter<'static>);

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (pos, c) in fragment.char_indices() {
            if (' '..='~').contains(&c) {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..pos])?;
            let mut units = [0; 2];
            for unit in c.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = pos + c.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }

    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_array(writer)
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.0.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object(writer)
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.0.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object_value(writer)
    }
}

/// The location of a balance file on disk.
#[derive(Clone, Debug)]
pub struct BalanceFile {
    path: Utf8PathBuf,
    lock_timeout: Duration,
}

impl BalanceFile {
    /// How long [`Self::lock_exclusive`] waits for another process to release the lock.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new `BalanceFile` for the given path. Nothing is read until asked for.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long to wait for the lock before giving up.
    pub fn set_lock_timeout(&mut self, lock_timeout: Duration) -> &mut Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Returns the path to the balance file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the path to the lock file guarding updates.
    pub fn lock_path(&self) -> Utf8PathBuf {
        let mut lock_path = self.path.clone().into_string();
        lock_path.push_str(".lock");
        lock_path.into()
    }

    /// Reads the balance file without locking it. Returns `None` if the file does not exist.
    pub fn read(&self) -> Result<Option<BalanceState>, BalanceStateError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(BalanceStateError::Read {
                    path: self.path.clone(),
                    error,
                });
            }
        };
        BalanceState::from_json(&self.path, &json).map(Some)
    }

    /// Acquires an exclusive lock on the balance file, creating its directory if necessary.
    ///
    /// Uses non-blocking lock attempts with retries to handle both brief contention and
    /// filesystems where locking may not work (e.g. NFS).
    pub fn lock_exclusive(&self) -> Result<LockedBalanceFile<'_>, BalanceStateError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|error| BalanceStateError::DirCreate {
                dir: dir.to_owned(),
                error,
            })?;
        }

        let lock_path = self.lock_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|error| BalanceStateError::FileLock {
                path: lock_path.clone(),
                error,
            })?;

        acquire_lock_with_retry(&file, &lock_path, self.lock_timeout)?;
        debug!(path = %lock_path, "acquired balance file lock");

        Ok(LockedBalanceFile {
            file: self,
            locked_file: DebugIgnore(file),
        })
    }
}

/// A balance file which has been locked for exclusive access.
///
/// The lifetime parameter ensures this isn't held for longer than the corresponding
/// [`BalanceFile`].
#[derive(Debug)]
pub struct LockedBalanceFile<'a> {
    file: &'a BalanceFile,
    locked_file: DebugIgnore<File>,
}

impl LockedBalanceFile<'_> {
    /// Returns the path to the balance file.
    pub fn path(&self) -> &Utf8Path {
        self.file.path()
    }

    /// Atomically replaces the balance file with `state`.
    ///
    /// Consumes self, releasing the lock.
    pub fn write(self, state: &BalanceState) -> Result<(), BalanceStateError> {
        let json = state.to_json()?;
        let path = self.file.path();

        atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
            .write(|f| f.write_all(json.as_bytes()))
            .map_err(|error| BalanceStateError::Write {
                path: path.to_owned(),
                error,
            })?;
        debug!(%path, "wrote balance file");

        // Errors here aren't important because the file will be closed right after.
        _ = self.locked_file.unlock();
        Ok(())
    }
}

/// Acquires a file lock with retries, timing out after `timeout`.
fn acquire_lock_with_retry(
    file: &File,
    lock_path: &Utf8Path,
    timeout: Duration,
) -> Result<(), BalanceStateError> {
    const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

    let start = Instant::now();
    loop {
        match file.try_lock() {
            Ok(()) => return Ok(()),
            Err(TryLockError::WouldBlock) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Err(BalanceStateError::FileLockTimeout {
                        path: lock_path.to_owned(),
                        timeout,
                    });
                }
                thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - elapsed));
            }
            Err(TryLockError::Error(error)) => {
                return Err(BalanceStateError::FileLock {
                    path: lock_path.to_owned(),
                    error,
                });
            }
        }
    }
}
