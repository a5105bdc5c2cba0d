//! Last-halo provenance for simulation particles.
//!
//! Given particle IDs selected at the present day and a chronological list
//! of sharded halo catalogues, finds for each particle the latest snapshot
//! at which it belonged to a halo, along with that halo's ID and the mass of
//! its root parent.

pub mod catalogue;
pub mod config;
pub mod error;
pub mod matching;
pub mod runtime;
pub mod species;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::TraceError;
pub use species::Species;
pub use tracker::{RunOutcome, Tracker, TrackerOutput};
