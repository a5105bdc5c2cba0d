//! Durable tracker state, written after every completed snapshot.
//!
//! The file is an npz written to `<path>.tmp`, flushed to disk and then
//! renamed over `<path>`, so an interrupted write never leaves a truncated
//! checkpoint behind. Besides the per-particle arrays it records which run
//! produced it (`meta_run`, JSON bytes), so a restart with other snapshots
//! or other source settings is refused instead of mixing answers.

use anyhow::{Context, Result};
use ndarray::Array1;
use ndarray_npy::NpzWriter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::state::TrackerState;
use crate::catalogue::io::{open_npz, read_bytes, read_count, read_f64, read_i16, read_i64};
use crate::error::TraceError;

/// Everything a checkpoint's answers depend on besides the particle sample.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Chronological, earliest first.
    pub snapshots: Vec<String>,
    /// Settings of the halo source, e.g. species and mass field.
    pub source: BTreeMap<String, String>,
}

impl RunIdentity {
    pub fn new(snapshots: Vec<String>, source: BTreeMap<String, String>) -> Self {
        RunIdentity { snapshots, source }
    }

    /// Why a run described by `requested` cannot continue this one. Empty
    /// when it can.
    pub fn differences(&self, requested: &RunIdentity) -> Vec<String> {
        let mut out = Vec::new();
        let (old, new) = (&self.snapshots, &requested.snapshots);
        if old.len() != new.len() {
            out.push(format!(
                "written for {} snapshots, run has {}",
                old.len(),
                new.len()
            ));
        } else if let Some(i) = (0..old.len()).find(|&i| old[i] != new[i]) {
            out.push(format!(
                "snapshot {i} was {:?}, run has {:?}",
                old[i], new[i]
            ));
        }
        let keys: std::collections::BTreeSet<&String> =
            self.source.keys().chain(requested.source.keys()).collect();
        for key in keys {
            let (a, b) = (self.source.get(key), requested.source.get(key));
            if a != b {
                let show = |v: Option<&String>| v.map_or("<unset>".to_string(), |s| format!("{s:?}"));
                out.push(format!("{key} was {}, run has {}", show(a), show(b)));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Index (into the chronological snapshot list) of the snapshot just completed.
    pub last_completed: usize,
    pub run: RunIdentity,
    pub state: TrackerState,
}

pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Makes a completed rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("sync dir {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

pub fn save_checkpoint(path: &Path, cp: &Checkpoint) -> Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let tmp = temp_path(path);
    let f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    let mut npz = NpzWriter::new(f);

    npz.add_array(
        "meta_last_completed.npy",
        &Array1::from_vec(vec![cp.last_completed as i64]),
    )?;
    let run = serde_json::to_vec(&cp.run).context("encode run identity")?;
    npz.add_array("meta_run.npy", &Array1::from_vec(run))?;
    let s = &cp.state;
    npz.add_array("particle_ids.npy", &Array1::from_vec(s.particle_ids.clone()))?;
    npz.add_array(
        "found_snapshot_index.npy",
        &Array1::from_vec(s.found_snapshot_index.clone()),
    )?;
    npz.add_array(
        "found_halo_id.npy",
        &Array1::from_vec(s.found_halo_id.clone()),
    )?;
    npz.add_array(
        "found_root_mass.npy",
        &Array1::from_vec(s.found_root_mass.clone()),
    )?;

    let f = npz
        .finish()
        .with_context(|| format!("finish {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("sync {}", tmp.display()))?;
    drop(f);
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    sync_dir(dir)?;
    debug!(
        "[checkpoint] {} after snapshot index {} ({} unresolved)",
        path.display(),
        cp.last_completed,
        cp.state.n_unresolved()
    );
    Ok(())
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let mut npz = open_npz(path)?;
    let last_completed = read_count(&mut npz, "meta_last_completed")? as usize;
    let run: RunIdentity = serde_json::from_slice(&read_bytes(&mut npz, "meta_run")?)
        .context("decode run identity")?;
    let state = TrackerState::from_parts(
        read_i64(&mut npz, "particle_ids")?,
        read_i16(&mut npz, "found_snapshot_index")?,
        read_i64(&mut npz, "found_halo_id")?,
        read_f64(&mut npz, "found_root_mass")?,
    )?;
    Ok(Checkpoint {
        last_completed,
        run,
        state,
    })
}

/// `Ok(None)` when no checkpoint exists. A file that exists but cannot be
/// parsed is a fatal checkpoint error, never silently ignored.
pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    read_checkpoint(path).map(Some).map_err(|e| {
        TraceError::Checkpoint {
            path: path.display().to_string(),
            reason: format!("{e:#}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_identity() -> RunIdentity {
        RunIdentity::new(
            ["0001", "0002", "0003", "0004"].map(String::from).to_vec(),
            BTreeMap::from([("species".to_string(), "gas".to_string())]),
        )
    }

    fn sample() -> Checkpoint {
        let mut state = TrackerState::new(vec![11, 12, 13]);
        state.record(2, &[1], &[true], &[40], &[1.5e12]).unwrap();
        Checkpoint {
            last_completed: 2,
            run: run_identity(),
            state,
        }
    }

    #[test]
    fn save_then_load_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.checkpoint.npz");
        let cp = sample();
        save_checkpoint(&path, &cp).unwrap();
        assert!(!temp_path(&path).exists());
        assert_eq!(load_checkpoint(&path).unwrap(), Some(cp));
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("a").join("cp.npz");
        save_checkpoint(&path, &sample()).unwrap();
        assert!(path.exists());
        assert!(!temp_path(&path).exists());
        assert_eq!(parent_dir(Path::new("cp.npz")), Path::new("."));
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_checkpoint(&dir.path().join("nope.npz")).unwrap(), None);
    }

    #[test]
    fn garbage_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.npz");
        std::fs::write(&path, b"not an npz").unwrap();
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::Checkpoint { .. })
        ));
    }

    #[test]
    fn overwrite_replaces_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.npz");
        let mut cp = sample();
        save_checkpoint(&path, &cp).unwrap();
        cp.last_completed = 1;
        cp.state.record(1, &[0], &[true], &[41], &[2.0]).unwrap();
        save_checkpoint(&path, &cp).unwrap();
        let back = load_checkpoint(&path).unwrap().unwrap();
        assert_eq!(back.last_completed, 1);
        assert_eq!(back.state.found_halo_id, vec![41, 40, -1]);
    }

    #[test]
    fn run_differences_name_what_changed() {
        let old = run_identity();
        assert!(old.differences(&old.clone()).is_empty());

        let mut relabelled = old.clone();
        relabelled.snapshots[1] = "9999".to_string();
        assert_eq!(
            old.differences(&relabelled),
            vec!["snapshot 1 was \"0002\", run has \"9999\"".to_string()]
        );

        let mut shorter = old.clone();
        shorter.snapshots.pop();
        assert_eq!(old.differences(&shorter).len(), 1);

        let mut other_source = old.clone();
        other_source.source.clear();
        other_source
            .source
            .insert("mass_path".to_string(), "m".to_string());
        let diffs = old.differences(&other_source);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.contains(&"species was \"gas\", run has <unset>".to_string()));
    }
}
