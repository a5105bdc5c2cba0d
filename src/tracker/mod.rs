//! Reverse-time sweep: for every present-day particle, the most recent
//! snapshot at which it sat in a halo, that halo's ID and its root-parent
//! mass.
//!
//! Snapshots are visited from latest to earliest. Only particles still
//! unresolved are looked up, so the work per snapshot shrinks as the sweep
//! goes on; once nothing is left the sweep stops early. State is written to a
//! checkpoint after every snapshot and a restarted run continues from it.

pub mod checkpoint;
pub mod output;
pub mod source;
pub mod state;

pub use checkpoint::{Checkpoint, RunIdentity, load_checkpoint, save_checkpoint};
pub use output::{RunSummary, TrackerOutput, load_particle_sample};
pub use source::{CatalogueSource, HaloSource, SnapshotHalos};
pub use state::TrackerState;

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::TraceError;
use crate::matching::{Column, Fill, Scalar, reconcile};
use crate::runtime::MemoryBudget;

/// Where the sweep stands. `cursor` is the next snapshot to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running { cursor: usize },
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done(TrackerOutput),
    /// Stopped between snapshots; the checkpoint is current and a resumed
    /// run starts at `next_snapshot`.
    Cancelled { next_snapshot: usize },
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub checkpoint_path: PathBuf,
    pub show_progress: bool,
    pub memory_budget: MemoryBudget,
    /// [`HaloSource::settings`] of the source the sweep will read; stored in
    /// and checked against the checkpoint.
    pub source_settings: BTreeMap<String, String>,
}

impl TrackerOptions {
    pub fn new(checkpoint_path: impl Into<PathBuf>) -> Self {
        TrackerOptions {
            checkpoint_path: checkpoint_path.into(),
            show_progress: false,
            memory_budget: MemoryBudget::UNLIMITED,
            source_settings: BTreeMap::new(),
        }
    }

    pub fn with_source_settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.source_settings = settings;
        self
    }
}

#[derive(Debug)]
pub struct Tracker {
    snapshots: Vec<String>,
    state: TrackerState,
    phase: Phase,
    searched: usize,
    opts: TrackerOptions,
}

fn validate_snapshots(snapshots: &[String]) -> Result<()> {
    if snapshots.is_empty() {
        bail!(TraceError::config("no snapshots to search"));
    }
    if snapshots.len() > i16::MAX as usize {
        bail!(TraceError::config(format!(
            "{} snapshots exceed the {} a snapshot index can address",
            snapshots.len(),
            i16::MAX
        )));
    }
    Ok(())
}

fn checkpoint_error(path: &Path, reason: String) -> anyhow::Error {
    TraceError::Checkpoint {
        path: path.display().to_string(),
        reason,
    }
    .into()
}

impl Tracker {
    /// Fresh sweep over `snapshots` (chronological order), ignoring any
    /// checkpoint already on disk.
    pub fn new(snapshots: Vec<String>, particle_ids: Vec<i64>, opts: TrackerOptions) -> Result<Self> {
        validate_snapshots(&snapshots)?;
        let cursor = snapshots.len() - 1;
        Ok(Tracker {
            snapshots,
            state: TrackerState::new(particle_ids),
            phase: Phase::Running { cursor },
            searched: 0,
            opts,
        })
    }

    /// Continues from the checkpoint at `opts.checkpoint_path` when there is
    /// one, otherwise starts fresh.
    pub fn open(snapshots: Vec<String>, particle_ids: Vec<i64>, opts: TrackerOptions) -> Result<Self> {
        match load_checkpoint(&opts.checkpoint_path)? {
            Some(cp) => Self::from_checkpoint(cp, snapshots, &particle_ids, opts),
            None => Self::new(snapshots, particle_ids, opts),
        }
    }

    fn from_checkpoint(
        cp: Checkpoint,
        snapshots: Vec<String>,
        particle_ids: &[i64],
        opts: TrackerOptions,
    ) -> Result<Self> {
        validate_snapshots(&snapshots)?;
        let path = opts.checkpoint_path.as_path();
        let n = snapshots.len();
        let requested = RunIdentity::new(snapshots, opts.source_settings.clone());
        let differences = cp.run.differences(&requested);
        if !differences.is_empty() {
            return Err(checkpoint_error(
                path,
                format!("written by a different run: {}", differences.join("; ")),
            ));
        }
        let snapshots = requested.snapshots;
        if cp.last_completed >= n {
            return Err(checkpoint_error(
                path,
                format!("last completed snapshot {} is out of range", cp.last_completed),
            ));
        }
        if cp.state.particle_ids != particle_ids {
            return Err(checkpoint_error(
                path,
                "particle sample differs from the one being tracked".to_string(),
            ));
        }
        let last = cp.last_completed as i16;
        if let Some(&bad) = cp
            .state
            .found_snapshot_index
            .iter()
            .find(|&&i| i != state::NOT_FOUND_INDEX && (i < last || i as usize >= n))
        {
            return Err(checkpoint_error(
                path,
                format!("found snapshot index {bad} lies outside the searched range"),
            ));
        }

        let phase = if cp.state.is_done() || cp.last_completed == 0 {
            Phase::Done
        } else {
            Phase::Running {
                cursor: cp.last_completed - 1,
            }
        };
        info!(
            "[resume] checkpoint {} at snapshot {} ({} of {} particles unresolved)",
            path.display(),
            snapshots[cp.last_completed],
            cp.state.n_unresolved(),
            cp.state.len()
        );
        Ok(Tracker {
            searched: n - cp.last_completed,
            snapshots,
            state: cp.state,
            phase,
            opts,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn snapshots(&self) -> &[String] {
        &self.snapshots
    }

    /// Snapshots loaded so far, counting those done before a resume.
    pub fn snapshots_searched(&self) -> usize {
        self.searched
    }

    /// Processes the snapshot at the cursor, records matches, writes the
    /// checkpoint and moves the cursor one snapshot back.
    pub fn step<S: HaloSource + ?Sized>(&mut self, source: &mut S) -> Result<Phase> {
        let Phase::Running { cursor } = self.phase else {
            return Ok(Phase::Done);
        };
        if self.state.is_done() {
            self.phase = Phase::Done;
            return Ok(self.phase);
        }

        let t0 = Instant::now();
        let label = self.snapshots[cursor].clone();
        let halos = source
            .load(cursor, &label)
            .with_context(|| format!("snapshot {label}"))?;
        let n_halos = halos.n_halos;
        let n_in_halos = halos.len();

        let t_load = t0.elapsed().as_secs_f64();
        let rows = self.state.unresolved_rows();
        let target = self.state.ids_at(&rows);
        let columns = [Column::from(halos.halo_ids), Column::from(halos.root_masses)];
        let rec = reconcile(
            &target,
            &halos.particle_ids,
            &columns,
            &Fill::Value(Scalar::I64(-1)),
        )?;
        let (Some(halo_ids), Some(root_masses)) =
            (rec.columns[0].data.as_i64(), rec.columns[1].data.as_f64())
        else {
            bail!("reconciled columns changed type");
        };
        let t_reconcile = t0.elapsed().as_secs_f64() - t_load;
        let newly = self
            .state
            .record(cursor as i16, &rows, &rec.matched, halo_ids, root_masses)?;
        debug!(
            "[snapshot {label}] load {t_load:.3}s reconcile {t_reconcile:.3}s insert {:.3}s",
            t0.elapsed().as_secs_f64() - t_load - t_reconcile
        );

        save_checkpoint(
            &self.opts.checkpoint_path,
            &Checkpoint {
                last_completed: cursor,
                run: self.run_identity(),
                state: self.state.clone(),
            },
        )?;
        self.searched += 1;
        self.phase = if cursor == 0 || self.state.is_done() {
            Phase::Done
        } else {
            Phase::Running { cursor: cursor - 1 }
        };

        info!(
            "[snapshot {}] {} halos, {} particles in haloes, {} newly identified, {} unresolved ({:.2}s)",
            label,
            n_halos,
            n_in_halos,
            newly,
            self.state.n_unresolved(),
            t0.elapsed().as_secs_f64()
        );
        self.opts.memory_budget.check(&label)?;
        Ok(self.phase)
    }

    /// Steps until done or until `cancel` is raised. Cancellation is only
    /// observed between snapshots, after the checkpoint write.
    pub fn run<S: HaloSource + ?Sized>(
        &mut self,
        source: &mut S,
        cancel: &AtomicBool,
    ) -> Result<RunOutcome> {
        let pb = if self.opts.show_progress {
            ProgressBar::new(self.snapshots.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} snapshots {msg}")?
                .progress_chars("=>-"),
        );
        pb.set_position(self.searched as u64);

        let t0 = Instant::now();
        while let Phase::Running { cursor } = self.phase {
            if cancel.load(Ordering::Relaxed) {
                pb.abandon();
                warn!(
                    "[cancel] stopping before snapshot {}; checkpoint {} is current",
                    self.snapshots[cursor],
                    self.opts.checkpoint_path.display()
                );
                return Ok(RunOutcome::Cancelled {
                    next_snapshot: cursor,
                });
            }
            pb.set_message(format!(
                "snapshot={} unresolved={}",
                self.snapshots[cursor],
                self.state.n_unresolved()
            ));
            self.step(source)?;
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "[done] {} snapshots searched in {:.1}s",
            self.searched,
            t0.elapsed().as_secs_f64()
        );
        let output = self.output();
        output.summary(self.snapshots.len(), self.searched).log();
        Ok(RunOutcome::Done(output))
    }

    fn run_identity(&self) -> RunIdentity {
        RunIdentity::new(self.snapshots.clone(), self.opts.source_settings.clone())
    }

    pub fn output(&self) -> TrackerOutput {
        TrackerOutput::from_state(&self.state, &self.snapshots)
    }

    pub fn summary(&self) -> RunSummary {
        self.output().summary(self.snapshots.len(), self.searched)
    }
}
