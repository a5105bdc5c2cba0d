//! Error taxonomy for the tracker.
//!
//! Fallible functions return `anyhow::Result`; the variants below are the
//! classes a caller may want to tell apart (downcast with
//! `err.downcast_ref::<TraceError>()`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    /// Bad directory, missing member, mismatched snapshot/catalogue counts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Zero shards matched the catalogue naming pattern.
    #[error("no catalogue files match {pattern}")]
    NotFound { pattern: String },

    /// The catalogue contradicts itself (cycles, duplicates, bad offsets).
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// A checkpoint exists but cannot be used for this run.
    #[error("checkpoint {path}: {reason}")]
    Checkpoint { path: String, reason: String },

    /// The run stopped on request; resuming starts at `next_snapshot`.
    #[error("cancelled; resume will start at snapshot {next_snapshot}")]
    Cancelled { next_snapshot: String },
}

impl TraceError {
    pub fn config(msg: impl Into<String>) -> Self {
        TraceError::Config(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        TraceError::Integrity(msg.into())
    }
}
