use anyhow::{Result, bail};

use crate::error::TraceError;

pub const NOT_FOUND_INDEX: i16 = -1;
pub const NOT_FOUND_HALO: i64 = -1;
pub const NOT_FOUND_MASS: f64 = -1.0;

/// Per-particle answers for the present-day sample.
///
/// `still_unresolved[i]` is always `found_snapshot_index[i] == -1`, and a
/// found entry is never overwritten: walking backward in time, the first
/// match is the most recent halo.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerState {
    pub particle_ids: Vec<i64>,
    pub found_snapshot_index: Vec<i16>,
    pub found_halo_id: Vec<i64>,
    pub found_root_mass: Vec<f64>,
    pub still_unresolved: Vec<bool>,
}

impl TrackerState {
    pub fn new(particle_ids: Vec<i64>) -> Self {
        let n = particle_ids.len();
        TrackerState {
            particle_ids,
            found_snapshot_index: vec![NOT_FOUND_INDEX; n],
            found_halo_id: vec![NOT_FOUND_HALO; n],
            found_root_mass: vec![NOT_FOUND_MASS; n],
            still_unresolved: vec![true; n],
        }
    }

    /// Rebuilds a state from persisted arrays; the unresolved mask is derived.
    pub fn from_parts(
        particle_ids: Vec<i64>,
        found_snapshot_index: Vec<i16>,
        found_halo_id: Vec<i64>,
        found_root_mass: Vec<f64>,
    ) -> Result<Self> {
        let n = particle_ids.len();
        if found_snapshot_index.len() != n || found_halo_id.len() != n || found_root_mass.len() != n
        {
            bail!(TraceError::integrity(format!(
                "state arrays disagree in length: ids={n}, snapshot={}, halo={}, mass={}",
                found_snapshot_index.len(),
                found_halo_id.len(),
                found_root_mass.len()
            )));
        }
        if let Some(bad) = found_snapshot_index.iter().find(|&&i| i < NOT_FOUND_INDEX) {
            bail!(TraceError::integrity(format!(
                "found snapshot index {bad} is below the not-found sentinel"
            )));
        }
        let still_unresolved = found_snapshot_index
            .iter()
            .map(|&i| i == NOT_FOUND_INDEX)
            .collect();
        Ok(TrackerState {
            particle_ids,
            found_snapshot_index,
            found_halo_id,
            found_root_mass,
            still_unresolved,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.particle_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.particle_ids.is_empty()
    }

    pub fn n_unresolved(&self) -> usize {
        self.still_unresolved.iter().filter(|&&u| u).count()
    }

    pub fn is_done(&self) -> bool {
        !self.still_unresolved.iter().any(|&u| u)
    }

    pub fn unresolved_rows(&self) -> Vec<usize> {
        self.still_unresolved
            .iter()
            .enumerate()
            .filter_map(|(i, &u)| u.then_some(i))
            .collect()
    }

    pub fn ids_at(&self, rows: &[usize]) -> Vec<i64> {
        rows.iter().map(|&r| self.particle_ids[r]).collect()
    }

    /// Writes the matched rows of one snapshot's reconciliation back into the
    /// sample. `rows[k]` is the sample row of reconciled row `k`. Returns how
    /// many particles were newly resolved.
    pub fn record(
        &mut self,
        snapshot_index: i16,
        rows: &[usize],
        matched: &[bool],
        halo_ids: &[i64],
        root_masses: &[f64],
    ) -> Result<usize> {
        if matched.len() != rows.len() || halo_ids.len() != rows.len() || root_masses.len() != rows.len()
        {
            bail!(TraceError::integrity(format!(
                "reconciled arrays disagree in length with the {} targeted rows",
                rows.len()
            )));
        }
        let mut newly = 0usize;
        for (k, &row) in rows.iter().enumerate() {
            if !matched[k] {
                continue;
            }
            if !self.still_unresolved[row] {
                bail!(TraceError::integrity(format!(
                    "particle {} already resolved at snapshot index {}",
                    self.particle_ids[row], self.found_snapshot_index[row]
                )));
            }
            self.found_snapshot_index[row] = snapshot_index;
            self.found_halo_id[row] = halo_ids[k];
            self.found_root_mass[row] = root_masses[k];
            self.still_unresolved[row] = false;
            newly += 1;
        }
        Ok(newly)
    }
}
