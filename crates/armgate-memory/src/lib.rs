//! `armgate-memory` – The Observation Log.
//!
//! Durable, append-only record of what the arm's cameras saw and what the
//! vision model said about it.
//!
//! # Modules
//!
//! - [`observation`] – [`ObservationLog`][observation::ObservationLog]: stores
//!   each frame as `image_<key>.png` with an `analysis_<key>.json` sidecar and
//!   indexes it in `master_log.jsonl`.

pub mod observation;

pub use observation::{Analysis, AnalysisDocument, MasterLogEntry, ObservationLog, TimestampKey};
