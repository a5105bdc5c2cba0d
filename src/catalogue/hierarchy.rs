//! Subhalo hierarchy: every halo's top-level ancestor and that ancestor's mass.
//!
//! Halos are a flat arena; `parent_id` is a foreign key resolved through an
//! id -> row map. Resolution writes into a separate output array and never
//! touches the halo records.

use ahash::AHashMap;
use anyhow::{Result, bail};
use rayon::prelude::*;

use crate::error::TraceError;

pub const NO_PARENT: i64 = -1;

pub fn index_by_id(halo_ids: &[i64]) -> Result<AHashMap<i64, usize>> {
    let mut map = AHashMap::with_capacity(halo_ids.len());
    for (row, &id) in halo_ids.iter().enumerate() {
        if let Some(prev) = map.insert(id, row) {
            bail!(TraceError::integrity(format!(
                "halo id {id} appears twice (rows {prev} and {row})"
            )));
        }
    }
    Ok(map)
}

enum Hop {
    Root,
    Next(i64),
}

/// `root_parent_id[h]` for every halo: its own id for roots, otherwise the id
/// reached by following `parent_id` until a halo with no parent.
///
/// One pointer hop per pass over the unresolved halos. An acyclic chain needs
/// at most `n` passes, so anything still unresolved after that is a cycle.
pub fn resolve_root_parents(halo_ids: &[i64], parent_ids: &[i64]) -> Result<Vec<i64>> {
    if halo_ids.len() != parent_ids.len() {
        bail!(TraceError::config(format!(
            "{} halo ids but {} parent ids",
            halo_ids.len(),
            parent_ids.len()
        )));
    }
    let index = index_by_id(halo_ids)?;

    let mut tracked: Vec<i64> = halo_ids
        .iter()
        .zip(parent_ids)
        .map(|(&id, &p)| if p == NO_PARENT { id } else { p })
        .collect();
    let mut pending: Vec<usize> = (0..halo_ids.len())
        .filter(|&h| parent_ids[h] != NO_PARENT)
        .collect();

    let mut passes = 0usize;
    while !pending.is_empty() {
        if passes >= halo_ids.len() {
            let h = pending[0];
            bail!(TraceError::integrity(format!(
                "parent chain of halo {} does not terminate after {passes} hops ({} halos affected); the hierarchy contains a cycle",
                halo_ids[h],
                pending.len()
            )));
        }
        passes += 1;

        let hops: Vec<Result<Hop>> = pending
            .par_iter()
            .map(|&h| {
                let ancestor = tracked[h];
                let Some(&row) = index.get(&ancestor) else {
                    bail!(TraceError::integrity(format!(
                        "halo {} references parent {ancestor} which is not in the catalogue",
                        halo_ids[h]
                    )));
                };
                Ok(match parent_ids[row] {
                    NO_PARENT => Hop::Root,
                    next => Hop::Next(next),
                })
            })
            .collect();

        let mut still = Vec::with_capacity(pending.len());
        for (&h, hop) in pending.iter().zip(hops) {
            match hop? {
                Hop::Root => {}
                Hop::Next(next) => {
                    tracked[h] = next;
                    still.push(h);
                }
            }
        }
        pending = still;
    }
    Ok(tracked)
}

/// Mass lookup keyed by halo id, holding root halos only: only a root's mass
/// is the structure total.
#[derive(Debug, Clone, Default)]
pub struct RootMasses {
    by_id: AHashMap<i64, f64>,
}

impl RootMasses {
    pub fn from_roots(halo_ids: &[i64], parent_ids: &[i64], masses: &[f64]) -> Result<Self> {
        if masses.len() != halo_ids.len() {
            bail!(TraceError::config(format!(
                "{} halo ids but {} masses",
                halo_ids.len(),
                masses.len()
            )));
        }
        let by_id = halo_ids
            .iter()
            .zip(parent_ids)
            .zip(masses)
            .filter(|((_, p), _)| **p == NO_PARENT)
            .map(|((&id, _), &m)| (id, m))
            .collect();
        Ok(RootMasses { by_id })
    }

    pub fn get(&self, root_id: i64) -> Option<f64> {
        self.by_id.get(&root_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Resolved hierarchy of one snapshot, row-aligned with the halo arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    pub root_parent_ids: Vec<i64>,
    pub root_masses: Vec<f64>,
}

impl Hierarchy {
    pub fn resolve(halo_ids: &[i64], parent_ids: &[i64], masses: &[f64]) -> Result<Self> {
        let root_parent_ids = resolve_root_parents(halo_ids, parent_ids)?;
        let lookup = RootMasses::from_roots(halo_ids, parent_ids, masses)?;
        let root_masses = root_parent_ids
            .iter()
            .map(|&root| {
                lookup.get(root).ok_or_else(|| {
                    TraceError::integrity(format!("root halo {root} has no mass entry")).into()
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Hierarchy {
            root_parent_ids,
            root_masses,
        })
    }

    pub fn n_roots(&self, halo_ids: &[i64]) -> usize {
        halo_ids
            .iter()
            .zip(&self.root_parent_ids)
            .filter(|(id, root)| id == root)
            .count()
    }
}
