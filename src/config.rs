//! Run configuration: positional arguments from the front-end, refined by
//! `HALOTRACE_*` environment variables.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::catalogue::{DEFAULT_HALO_ID_PATH, DEFAULT_MASS_PATH, OpenOptions};
use crate::error::TraceError;
use crate::runtime::MemoryBudget;
use crate::species::Species;
use crate::tracker::{CatalogueSource, HaloSource, TrackerOptions};

pub const DEFAULT_STEM_TEMPLATE: &str = "haloes_{}";

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub catalogue_directory: PathBuf,
    /// `{}` is replaced by the snapshot label.
    pub stem_template: String,
    /// Chronological, earliest first.
    pub snapshots: Vec<String>,
    pub species: Option<Species>,
    pub halo_id_path: String,
    pub mass_path: String,
    pub checkpoint_path: PathBuf,
    pub shard_indexes: Option<Vec<u32>>,
    pub show_progress: bool,
    pub memory_budget: MemoryBudget,
}

impl TrackerConfig {
    pub fn new(
        catalogue_directory: impl Into<PathBuf>,
        snapshots: Vec<String>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        TrackerConfig {
            catalogue_directory: catalogue_directory.into(),
            stem_template: DEFAULT_STEM_TEMPLATE.to_string(),
            snapshots,
            species: None,
            halo_id_path: DEFAULT_HALO_ID_PATH.to_string(),
            mass_path: DEFAULT_MASS_PATH.to_string(),
            checkpoint_path: checkpoint_path.into(),
            shard_indexes: None,
            show_progress: true,
            memory_budget: MemoryBudget::UNLIMITED,
        }
    }

    /// Applies overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        let mut cfg = self.with_vars(|key| std::env::var(key).ok())?;
        cfg.memory_budget = MemoryBudget::from_env();
        Ok(cfg)
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HALOTRACE_STEM") {
            self.stem_template = v;
        }
        if let Some(v) = get("HALOTRACE_CHECKPOINT") {
            self.checkpoint_path = PathBuf::from(v);
        }
        if let Some(v) = get("HALOTRACE_SPECIES") {
            self.species = parse_species(&v)?;
        }
        if let Some(v) = get("HALOTRACE_HALO_ID_FIELD") {
            self.halo_id_path = v;
        }
        if let Some(v) = get("HALOTRACE_MASS_FIELD") {
            self.mass_path = v;
        }
        if let Some(v) = get("HALOTRACE_SHARDS") {
            self.shard_indexes = Some(parse_shard_list(&v)?);
        }
        if let Some(v) = get("HALOTRACE_PROGRESS") {
            self.show_progress = !matches!(v.trim(), "0" | "false" | "off" | "no");
        }
        Ok(self)
    }

    pub fn source(&self) -> CatalogueSource {
        CatalogueSource::new(&self.catalogue_directory, &self.stem_template)
            .with_species(self.species)
            .with_fields(&self.halo_id_path, &self.mass_path)
            .with_open_options(OpenOptions {
                shard_indexes: self.shard_indexes.clone(),
            })
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            checkpoint_path: self.checkpoint_path.clone(),
            show_progress: self.show_progress,
            memory_budget: self.memory_budget,
            source_settings: self.source().settings(),
        }
    }
}

/// `all`/`any` means no species restriction.
pub fn parse_species(raw: &str) -> Result<Option<Species>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "all" | "any" => Ok(None),
        other => Ok(Some(other.parse::<Species>()?)),
    }
}

pub fn parse_shard_list(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|_| {
                anyhow::Error::from(TraceError::config(format!(
                    "shard index {s:?} is not an integer"
                )))
            })
        })
        .collect()
}

/// Snapshot labels, earliest first: either a comma list or `@file` with one
/// label per line (blank lines and `#` comments skipped).
pub fn parse_snapshot_list(raw: &str) -> Result<Vec<String>> {
    let labels: Vec<String> = if let Some(path) = raw.strip_prefix('@') {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot list {path}"))?;
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    } else {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };
    if labels.is_empty() {
        bail!(TraceError::config(format!("no snapshot labels in {raw:?}")));
    }
    Ok(labels)
}

/// `<dir>/<stem>_checkpoint.npz` next to the output file.
pub fn default_checkpoint_path(output: &Path) -> PathBuf {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("halotrace");
    parent.join(format!("{stem}_checkpoint.npz"))
}
