//! Observation Log.
//!
//! Persists every captured frame together with its analysis, keyed by a
//! wall-clock timestamp, and appends one index line per observation to a
//! master log. Nothing is ever rewritten or deleted here; rotation belongs
//! to whoever manages the directory.
//!
//! # Storage layout
//!
//! | file | content |
//! |------|---------|
//! | `image_<key>.png` | raw image bytes |
//! | `analysis_<key>.json` | [`AnalysisDocument`] |
//! | `master_log.jsonl` | one [`MasterLogEntry`] per line |
//!
//! Keys look like `20261017_143005_123456` (UTC, microseconds) and sort
//! lexicographically in creation order, DST changes included. Within one
//! log they are strictly increasing: a stamp that would repeat or go
//! backwards is bumped one microsecond past the previous key. Data files are created with
//! `create_new`, so a key reused by another process fails loudly instead of
//! overwriting.
//!
//! # Example
//!
//! ```rust
//! use armgate_memory::observation::{Analysis, ObservationLog};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let log = ObservationLog::open(dir.path(), "gpt-4o").unwrap();
//!
//! let analysis = Analysis::new("success", "Carrot on the plate, board empty.");
//! let key = log.record(b"\x89PNG...", &analysis, None).unwrap();
//! log.append_master_entry(&key, &analysis, Some("run_pick_and_place")).unwrap();
//!
//! assert!(dir.path().join(format!("image_{key}.png")).exists());
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use armgate_types::GateError;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Name of the append-only index file.
pub const MASTER_LOG_FILE: &str = "master_log.jsonl";

const PREVIEW_CHARS: usize = 100;
const KEY_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

/// Unique, lexicographically sortable observation key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampKey(String);

impl TimestampKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn image_file(&self) -> String {
        format!("image_{}.png", self.0)
    }

    pub fn analysis_file(&self) -> String {
        format!("analysis_{}.json", self.0)
    }
}

impl fmt::Display for TimestampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out strictly increasing microsecond stamps.
#[derive(Default)]
struct KeyClock {
    last_micros: Mutex<i64>,
}

impl KeyClock {
    fn next(&self) -> (TimestampKey, DateTime<Local>) {
        self.advance(Utc::now().timestamp_micros())
    }

    /// Key for `now_micros`, bumped past the previous key if needed. The key
    /// is formatted in UTC; only the returned datetime is local.
    fn advance(&self, now_micros: i64) -> (TimestampKey, DateTime<Local>) {
        let mut last = self.last_micros.lock().unwrap_or_else(PoisonError::into_inner);
        let micros = now_micros.max(*last + 1);
        *last = micros;

        let at = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_else(Utc::now);
        (
            TimestampKey(at.format(KEY_FORMAT).to_string()),
            at.with_timezone(&Local),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Result of analysing one frame (produced by an external vision model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub status: String,
    pub description: String,
}

impl Analysis {
    pub fn new(status: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            description: description.into(),
        }
    }

    /// First 100 characters of the description followed by `...`.
    pub fn preview(&self) -> String {
        let head: String = self.description.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}

/// Sidecar document written as `analysis_<key>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub timestamp: TimestampKey,
    /// ISO-8601 creation time.
    pub datetime: String,
    pub image_file: String,
    pub analysis: String,
    pub status: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_executed: Option<String>,
}

/// One line of `master_log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterLogEntry {
    pub timestamp: TimestampKey,
    pub datetime: String,
    pub image_file: String,
    pub analysis_file: String,
    pub description_preview: String,
    pub policy_executed: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ObservationLog
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only, directory-backed observation store.
///
/// All methods block on filesystem I/O. Safe to share across threads;
/// master-log appends are serialised internally.
pub struct ObservationLog {
    dir: PathBuf,
    model: String,
    clock: KeyClock,
    master: Mutex<()>,
}

impl ObservationLog {
    /// Open (or create) the log directory. `model` is the analysis model
    /// identifier stamped into every sidecar document.
    pub fn open(dir: impl AsRef<Path>, model: impl Into<String>) -> Result<Self, GateError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| persistence(&dir, e))?;
        Ok(Self {
            dir,
            model: model.into(),
            clock: KeyClock::default(),
            master: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn master_log_path(&self) -> PathBuf {
        self.dir.join(MASTER_LOG_FILE)
    }

    /// Persist `image` and its analysis under a fresh key.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::PersistenceFailed`] when either file cannot be
    /// written (disk full, read-only directory, key collision).
    #[instrument(skip(self, image, analysis), fields(bytes = image.len()))]
    pub fn record(
        &self,
        image: &[u8],
        analysis: &Analysis,
        operation: Option<&str>,
    ) -> Result<TimestampKey, GateError> {
        let (key, at) = self.clock.next();

        let image_path = self.dir.join(key.image_file());
        write_new(&image_path, image)?;

        let document = AnalysisDocument {
            timestamp: key.clone(),
            datetime: at.to_rfc3339(),
            image_file: key.image_file(),
            analysis: analysis.description.clone(),
            status: analysis.status.clone(),
            model: self.model.clone(),
            policy_executed: operation.map(str::to_string),
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| GateError::PersistenceFailed(format!("analysis encoding: {e}")))?;
        let analysis_path = self.dir.join(key.analysis_file());
        if let Err(e) = write_new(&analysis_path, &json) {
            warn!(%key, error = %e, "image stored without analysis sidecar");
            return Err(e);
        }

        debug!(%key, "observation recorded");
        Ok(key)
    }

    /// Append one index line for `key`. Prior lines are never touched.
    pub fn append_master_entry(
        &self,
        key: &TimestampKey,
        analysis: &Analysis,
        operation: Option<&str>,
    ) -> Result<(), GateError> {
        let entry = MasterLogEntry {
            timestamp: key.clone(),
            datetime: Local::now().to_rfc3339(),
            image_file: key.image_file(),
            analysis_file: key.analysis_file(),
            description_preview: analysis.preview(),
            policy_executed: operation.map(str::to_string),
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| GateError::PersistenceFailed(format!("master entry encoding: {e}")))?;
        line.push('\n');

        let path = self.master_log_path();
        let _guard = self.lock_master();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| persistence(&path, e))?;
        // One write per line keeps the file tail-safe.
        file.write_all(line.as_bytes())
            .map_err(|e| persistence(&path, e))?;
        Ok(())
    }

    /// [`record`][Self::record] followed by
    /// [`append_master_entry`][Self::append_master_entry].
    pub fn observe(
        &self,
        image: &[u8],
        analysis: &Analysis,
        operation: Option<&str>,
    ) -> Result<TimestampKey, GateError> {
        let key = self.record(image, analysis, operation)?;
        self.append_master_entry(&key, analysis, operation)?;
        Ok(key)
    }

    fn lock_master(&self) -> MutexGuard<'_, ()> {
        self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<(), GateError> {
    let mut file = File::options()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| persistence(path, e))?;
    file.write_all(bytes).map_err(|e| persistence(path, e))
}

fn persistence(path: &Path, e: std::io::Error) -> GateError {
    GateError::PersistenceFailed(format!("{}: {e}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
