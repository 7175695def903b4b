//! Event-log model and logdir readers
//!
//! A training process writes tagged summary events to a log directory; the
//! uploader consumes them through the [`LogdirReader`] seam. The event file
//! encoding proper lives with the producer — this crate ships a JSONL bridge
//! reader for tooling and tests, plus an in-memory reader.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Which batched sender consumes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataClass {
    /// Producer did not classify the value; dropped silently.
    Unknown,
    /// One scalar per point.
    Scalar,
    /// One tensor per point.
    Tensor,
    /// A sequence of blobs per point.
    BlobSequence,
}

/// Plugin metadata carried by the first occurrence of a `(run, tag)` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMetadata {
    /// Producer-supplied plugin identifier (e.g. `scalars`, `graphs`).
    pub plugin_name: String,
    /// Opaque plugin payload, forwarded to the created time series.
    #[serde(default)]
    pub plugin_data: Vec<u8>,
    /// Routing class for the value.
    pub data_class: DataClass,
}

/// One tagged summary value inside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogValue {
    /// Summary tag, unique per run.
    pub tag: String,
    /// Metadata; only the first occurrence per `(run, tag)` is honored.
    #[serde(default)]
    pub metadata: Option<ValueMetadata>,
    /// Serialized tensor payload.
    #[serde(default)]
    pub tensor: Vec<u8>,
}

/// One event from the log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Training step.
    pub step: i64,
    /// Seconds since the epoch at write time.
    pub wall_time: f64,
    /// Tagged values recorded at this step.
    #[serde(default)]
    pub values: Vec<LogValue>,
}

/// Source of run-grouped events for the uploader.
///
/// Implementations own all progress state; the uploader only alternates
/// `synchronize_runs` and `run_events` each polling cycle.
pub trait LogdirReader: Send {
    /// Re-scan the log directory for new runs and new events.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be scanned at all;
    /// per-file problems are logged and skipped.
    fn synchronize_runs(&mut self) -> Result<()>;

    /// Drain the events discovered since the last call, grouped by run name.
    fn run_events(&mut self) -> BTreeMap<String, Vec<LogEvent>>;
}

/// In-memory reader for tests and programmatic feeding.
#[derive(Debug, Default)]
pub struct MemoryLogdirReader {
    pending: BTreeMap<String, Vec<LogEvent>>,
}

impl MemoryLogdirReader {
    /// Create an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event under `run`.
    pub fn push(&mut self, run: impl Into<String>, event: LogEvent) {
        self.pending.entry(run.into()).or_default().push(event);
    }
}

impl LogdirReader for MemoryLogdirReader {
    fn synchronize_runs(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_events(&mut self) -> BTreeMap<String, Vec<LogEvent>> {
        std::mem::take(&mut self.pending)
    }
}

/// JSONL logdir reader.
///
/// Each immediate subdirectory of the root is one run; each `*.jsonl` file in
/// it holds one serialized [`LogEvent`] per line. The reader remembers its
/// byte offset per file, so repeated polls only surface appended events.
/// Files whose last write is older than the inactivity threshold are left
/// untouched.
#[derive(Debug)]
pub struct JsonlLogdirReader {
    root: PathBuf,
    offsets: BTreeMap<PathBuf, u64>,
    pending: BTreeMap<String, Vec<LogEvent>>,
    inactive_after: Option<Duration>,
}

impl JsonlLogdirReader {
    /// Create a reader over `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            offsets: BTreeMap::new(),
            pending: BTreeMap::new(),
            inactive_after: None,
        }
    }

    /// Skip files whose last write is older than `threshold`.
    #[must_use]
    pub fn with_inactive_threshold(mut self, threshold: Duration) -> Self {
        self.inactive_after = Some(threshold);
        self
    }

    /// The log directory this reader scans.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_is_inactive(&self, path: &Path) -> bool {
        let Some(threshold) = self.inactive_after else {
            return false;
        };
        let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > threshold)
    }

    fn read_file(&mut self, run: &str, path: &Path) -> Result<()> {
        let offset = self.offsets.get(path).copied().unwrap_or(0);
        let mut reader = BufReader::new(fs::File::open(path)?);
        reader.seek(SeekFrom::Start(offset))?;

        let mut consumed = offset;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            // A partially flushed trailing line stays unconsumed until the
            // writer completes it.
            if !line.ends_with('\n') {
                break;
            }
            consumed += n as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEvent>(trimmed) {
                Ok(event) => self.pending.entry(run.to_string()).or_default().push(event),
                Err(err) => {
                    warn!(file = %path.display(), %err, "skipping malformed event line");
                }
            }
        }
        self.offsets.insert(path.to_path_buf(), consumed);
        Ok(())
    }
}

impl LogdirReader for JsonlLogdirReader {
    fn synchronize_runs(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run = entry.file_name().to_string_lossy().into_owned();
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let path = file.path();
                if path.extension().is_some_and(|e| e == "jsonl") {
                    files.push((run.clone(), path));
                }
            }
        }
        files.sort();
        for (run, path) in files {
            if self.file_is_inactive(&path) {
                continue;
            }
            if let Err(err) = self.read_file(&run, &path) {
                warn!(file = %path.display(), %err, "skipping unreadable event file");
            }
        }
        Ok(())
    }

    fn run_events(&mut self) -> BTreeMap<String, Vec<LogEvent>> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_event(step: i64) -> LogEvent {
        LogEvent {
            step,
            wall_time: 100.0 + step as f64,
            values: vec![LogValue {
                tag: "loss".to_string(),
                metadata: Some(ValueMetadata {
                    plugin_name: "scalars".to_string(),
                    plugin_data: Vec::new(),
                    data_class: DataClass::Scalar,
                }),
                tensor: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_memory_reader_drains() {
        let mut reader = MemoryLogdirReader::new();
        reader.push("a", scalar_event(0));
        reader.push("a", scalar_event(1));
        reader.push("b", scalar_event(0));

        reader.synchronize_runs().unwrap();
        let events = reader.run_events();
        assert_eq!(events["a"].len(), 2);
        assert_eq!(events["b"].len(), 1);
        assert!(reader.run_events().is_empty());
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = scalar_event(7);
        let json = serde_json::to_string(&event).unwrap();
        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_jsonl_reader_missing_root() {
        let mut reader = JsonlLogdirReader::new("/nonexistent/logdir");
        reader.synchronize_runs().unwrap();
        assert!(reader.run_events().is_empty());
    }
}
