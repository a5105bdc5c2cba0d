//! Final per-particle answers and how they are written out.

use anyhow::{Context, Result};
use ndarray::Array1;
use ndarray_npy::NpzWriter;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::state::{NOT_FOUND_INDEX, TrackerState};
use crate::catalogue::io::{open_npz, read_i64};

pub const NOT_FOUND_LABEL: &str = "-1";

/// Reads the present-day sample: an npz holding a `particle_ids` array.
pub fn load_particle_sample(path: &Path) -> Result<Vec<i64>> {
    let mut npz = open_npz(path)?;
    read_i64(&mut npz, "particle_ids").with_context(|| format!("sample {}", path.display()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOutput {
    pub particle_ids: Vec<i64>,
    pub snapshot_index: Vec<i16>,
    pub snapshot_label: Vec<String>,
    pub halo_id: Vec<i64>,
    pub root_mass: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub n_particles: usize,
    pub n_found: usize,
    pub n_not_found: usize,
    pub percent_not_found: f64,
    pub n_snapshots: usize,
    pub snapshots_searched: usize,
}

impl TrackerOutput {
    pub fn from_state(state: &TrackerState, labels: &[String]) -> Self {
        let snapshot_label = state
            .found_snapshot_index
            .iter()
            .map(|&i| {
                usize::try_from(i)
                    .ok()
                    .and_then(|i| labels.get(i))
                    .cloned()
                    .unwrap_or_else(|| NOT_FOUND_LABEL.to_string())
            })
            .collect();
        TrackerOutput {
            particle_ids: state.particle_ids.clone(),
            snapshot_index: state.found_snapshot_index.clone(),
            snapshot_label,
            halo_id: state.found_halo_id.clone(),
            root_mass: state.found_root_mass.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.particle_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particle_ids.is_empty()
    }

    pub fn n_not_found(&self) -> usize {
        self.snapshot_index
            .iter()
            .filter(|&&i| i == NOT_FOUND_INDEX)
            .count()
    }

    /// `snapshots_searched` counts snapshots actually loaded across the run,
    /// including before any resume.
    pub fn summary(&self, n_snapshots: usize, snapshots_searched: usize) -> RunSummary {
        let n = self.len();
        let missing = self.n_not_found();
        RunSummary {
            n_particles: n,
            n_found: n - missing,
            n_not_found: missing,
            percent_not_found: if n == 0 {
                0.0
            } else {
                100.0 * missing as f64 / n as f64
            },
            n_snapshots,
            snapshots_searched,
        }
    }

    /// Writes `<path>` (npz arrays) and `<path>.labels.txt` (one label per
    /// particle, sample order).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
        }
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut npz = NpzWriter::new(f);
        npz.add_array("particle_ids.npy", &Array1::from_vec(self.particle_ids.clone()))?;
        npz.add_array(
            "last_halo_snapshot_index.npy",
            &Array1::from_vec(self.snapshot_index.clone()),
        )?;
        npz.add_array("last_halo_id.npy", &Array1::from_vec(self.halo_id.clone()))?;
        npz.add_array(
            "last_halo_root_mass.npy",
            &Array1::from_vec(self.root_mass.clone()),
        )?;
        npz.finish()
            .with_context(|| format!("finish {}", path.display()))?;

        let labels_path = sidecar(path, "labels.txt");
        let mut w = BufWriter::new(
            File::create(&labels_path)
                .with_context(|| format!("create {}", labels_path.display()))?,
        );
        for label in &self.snapshot_label {
            writeln!(w, "{label}")?;
        }
        w.flush()?;
        Ok(())
    }
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "[summary] {} of {} particles never found in a halo ({:.2}%), {} of {} snapshots searched",
            self.n_not_found,
            self.n_particles,
            self.percent_not_found,
            self.snapshots_searched,
            self.n_snapshots
        );
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("write {}", path.display()))?;
        w.flush()?;
        Ok(())
    }
}

/// `<path>.<suffix>`, keeping the full original file name.
pub fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::io::{read_f64, read_i16};

    fn labels() -> Vec<String> {
        ["0010", "0020", "0030"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn labels_follow_found_index() {
        let mut state = TrackerState::new(vec![1, 2, 3]);
        state.record(2, &[0], &[true], &[7], &[9.0]).unwrap();
        state.record(0, &[2], &[true], &[8], &[4.0]).unwrap();
        let out = TrackerOutput::from_state(&state, &labels());
        assert_eq!(out.snapshot_label, vec!["0030", "-1", "0010"]);
        assert_eq!(out.n_not_found(), 1);
        let s = out.summary(3, 3);
        assert_eq!(s.n_found, 2);
        assert!((s.percent_not_found - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_output_summary_is_zero_percent() {
        let out = TrackerOutput::from_state(&TrackerState::new(vec![]), &labels());
        assert_eq!(out.summary(3, 0).percent_not_found, 0.0);
    }

    #[test]
    fn save_writes_arrays_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.npz");
        let mut state = TrackerState::new(vec![1, 2]);
        state.record(1, &[1], &[true], &[5], &[2.5]).unwrap();
        let out = TrackerOutput::from_state(&state, &labels());
        out.save(&path).unwrap();

        let mut npz = open_npz(&path).unwrap();
        assert_eq!(read_i16(&mut npz, "last_halo_snapshot_index").unwrap(), vec![-1, 1]);
        assert_eq!(read_i64(&mut npz, "last_halo_id").unwrap(), vec![-1, 5]);
        assert_eq!(read_f64(&mut npz, "last_halo_root_mass").unwrap(), vec![-1.0, 2.5]);
        let text = std::fs::read_to_string(sidecar(&path, "labels.txt")).unwrap();
        assert_eq!(text, "-1\n0020\n");

        let summary_path = sidecar(&path, "summary.json");
        out.summary(3, 2).save(&summary_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(json["n_not_found"], 1);
    }
}
