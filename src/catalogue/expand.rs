//! Halo -> particle expansion.
//!
//! The on-disk format stores only per-halo offsets into the bound and
//! unbound particle lists, so a halo's block length is the difference to the
//! next halo's offset (the last halo runs to the end of the list). Each halo
//! becomes `group_size` consecutive rows: its bound particles, then its
//! unbound ones.

use anyhow::{Result, anyhow, bail};
use itertools::izip;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

use super::shards::CatalogueId;
use crate::error::TraceError;
use crate::matching::Column;

/// Borrowed per-halo and per-particle arrays of one snapshot. Offsets must
/// already be stitched.
#[derive(Debug, Clone, Copy)]
pub struct HaloParticleSource<'a> {
    pub halo_ids: &'a [i64],
    pub group_size: &'a [i64],
    pub offsets_bound: &'a [i64],
    pub offsets_unbound: &'a [i64],
    pub bound_ids: &'a [i64],
    pub unbound_ids: &'a [i64],
    pub bound_types: &'a [i16],
    pub unbound_types: &'a [i16],
}

/// Block length of every halo from its offsets and the list length.
pub fn block_lengths(offsets: &[i64], total: usize) -> Result<Vec<i64>> {
    let total = total as i64;
    let mut lens = Vec::with_capacity(offsets.len());
    for (h, &start) in offsets.iter().enumerate() {
        let end = offsets.get(h + 1).copied().unwrap_or(total);
        if start < 0 || end < start || end > total {
            bail!(TraceError::integrity(format!(
                "halo row {h}: particle block {start}..{end} is outside a list of {total}"
            )));
        }
        lens.push(end - start);
    }
    Ok(lens)
}

/// Particle-granularity view of one snapshot's halos.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub particle_ids: Vec<i64>,
    pub particle_types: Vec<i16>,
    pub halo_ids: Vec<i64>,
    /// Row of the owning halo in the halo arrays.
    pub halo_rows: Vec<usize>,
    pub n_halos: usize,
    pub fields: BTreeMap<String, Column>,
}

impl Membership {
    #[inline]
    pub fn len(&self) -> usize {
        self.particle_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.particle_ids.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Column> {
        self.fields.get(name)
    }

    /// Copies a halo-level column onto every particle row of its halo.
    pub fn broadcast(&mut self, name: &str, halo_column: &Column) -> Result<()> {
        if halo_column.len() != self.n_halos {
            bail!(TraceError::config(format!(
                "field {name} has {} entries but the catalogue has {} halos",
                halo_column.len(),
                self.n_halos
            )));
        }
        let col = halo_column.map_data(|d| d.take(&self.halo_rows));
        self.fields.insert(name.to_string(), col);
        Ok(())
    }

    /// Rows whose particle type equals `code`, across every array at once.
    pub fn restrict_to_type(&self, code: i16) -> Membership {
        let mask: Vec<bool> = self.particle_types.par_iter().map(|&t| t == code).collect();
        let keep = |v: &[i64]| -> Vec<i64> {
            v.iter()
                .zip(&mask)
                .filter_map(|(x, &m)| m.then_some(*x))
                .collect()
        };
        Membership {
            particle_ids: keep(&self.particle_ids),
            particle_types: self
                .particle_types
                .iter()
                .filter(|&&t| t == code)
                .copied()
                .collect(),
            halo_ids: keep(&self.halo_ids),
            halo_rows: self
                .halo_rows
                .iter()
                .zip(&mask)
                .filter_map(|(x, &m)| m.then_some(*x))
                .collect(),
            n_halos: self.n_halos,
            fields: self
                .fields
                .iter()
                .map(|(k, c)| (k.clone(), c.map_data(|d| d.filter(&mask))))
                .collect(),
        }
    }

    /// A copy holding only the named fields.
    pub fn select(&self, names: &[&str]) -> Membership {
        Membership {
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, c)| (k.clone(), c.clone()))
                .collect(),
            ..self.clone_without_fields()
        }
    }

    fn clone_without_fields(&self) -> Membership {
        Membership {
            particle_ids: self.particle_ids.clone(),
            particle_types: self.particle_types.clone(),
            halo_ids: self.halo_ids.clone(),
            halo_rows: self.halo_rows.clone(),
            n_halos: self.n_halos,
            fields: BTreeMap::new(),
        }
    }
}

/// Flattens every halo into its particle rows and broadcasts `fields`.
pub fn expand(src: &HaloParticleSource<'_>, fields: &[(&str, &Column)]) -> Result<Membership> {
    let t0 = Instant::now();
    let n_halos = src.halo_ids.len();
    for (name, len) in [
        ("group_size", src.group_size.len()),
        ("offsets_bound", src.offsets_bound.len()),
        ("offsets_unbound", src.offsets_unbound.len()),
    ] {
        if len != n_halos {
            bail!(TraceError::config(format!(
                "{name} has {len} entries for {n_halos} halos"
            )));
        }
    }
    if src.bound_ids.len() != src.bound_types.len() || src.unbound_ids.len() != src.unbound_types.len()
    {
        bail!(TraceError::integrity(
            "particle id and particle type lists differ in length"
        ));
    }

    let len_bound = block_lengths(src.offsets_bound, src.bound_ids.len())?;
    let len_unbound = block_lengths(src.offsets_unbound, src.unbound_ids.len())?;

    let total: i64 = src.group_size.iter().sum();
    let total = usize::try_from(total)
        .map_err(|_| TraceError::integrity(format!("negative total group size {total}")))?;
    let mut particle_ids = Vec::with_capacity(total);
    let mut particle_types = Vec::with_capacity(total);
    let mut halo_ids = Vec::with_capacity(total);
    let mut halo_rows = Vec::with_capacity(total);

    for (h, &id, &size, &ob, &lb, &ou, &lu) in izip!(
        0..n_halos,
        src.halo_ids,
        src.group_size,
        src.offsets_bound,
        &len_bound,
        src.offsets_unbound,
        &len_unbound
    ) {
        if lb + lu != size {
            bail!(TraceError::integrity(format!(
                "halo {id}: group size {size} but {lb} bound + {lu} unbound particles"
            )));
        }
        let (ob, lb, ou, lu) = (ob as usize, lb as usize, ou as usize, lu as usize);
        particle_ids.extend_from_slice(&src.bound_ids[ob..ob + lb]);
        particle_ids.extend_from_slice(&src.unbound_ids[ou..ou + lu]);
        particle_types.extend_from_slice(&src.bound_types[ob..ob + lb]);
        particle_types.extend_from_slice(&src.unbound_types[ou..ou + lu]);
        halo_ids.extend(std::iter::repeat_n(id, lb + lu));
        halo_rows.extend(std::iter::repeat_n(h, lb + lu));
    }

    let mut out = Membership {
        particle_ids,
        particle_types,
        halo_ids,
        halo_rows,
        n_halos,
        fields: BTreeMap::new(),
    };
    for (name, col) in fields {
        out.broadcast(name, col)?;
    }
    debug!(
        "[expand] {} halos -> {} particle rows in {:.3}s",
        n_halos,
        out.len(),
        t0.elapsed().as_secs_f64()
    );
    Ok(out)
}

/// Cache key: an expansion is only reusable for the same catalogue and the
/// same species restriction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub catalogue: CatalogueId,
    pub species: Option<i16>,
}

/// Owned, single-entry cache of an expansion. Requesting a different key
/// drops the held entry; requesting new fields for the same key extends it.
/// A field is rebroadcast whenever its halo-level column differs from the
/// one it was last broadcast from.
#[derive(Debug, Default)]
pub struct ExpansionCache {
    entry: Option<CacheEntry>,
    hits: usize,
    misses: usize,
}

#[derive(Debug)]
struct CacheEntry {
    key: CacheKey,
    membership: Membership,
    /// Halo-level source of every broadcast field.
    halo_columns: BTreeMap<String, Column>,
}

impl ExpansionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.entry.as_ref().map(|e| &e.key)
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    pub fn has_field(&self, key: &CacheKey, name: &str) -> bool {
        matches!(&self.entry, Some(e) if e.key == *key && e.membership.field(name).is_some())
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Returns the cached expansion for `key`, building it with `build`
    /// (unfiltered, no fields) on a miss, and broadcasting every field in
    /// `fields` that is missing or was broadcast from different values.
    pub fn get_or_expand(
        &mut self,
        key: CacheKey,
        fields: &[(&str, &Column)],
        build: impl FnOnce() -> Result<Membership>,
    ) -> Result<&Membership> {
        let reusable = matches!(&self.entry, Some(e) if e.key == key);
        if reusable {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.entry = None;
            let base = build()?;
            let membership = match key.species {
                Some(code) => base.restrict_to_type(code),
                None => base,
            };
            self.entry = Some(CacheEntry {
                key,
                membership,
                halo_columns: BTreeMap::new(),
            });
        }
        let Some(entry) = self.entry.as_mut() else {
            bail!("expansion cache entry missing after fill");
        };
        for (name, col) in fields {
            if entry.halo_columns.get(*name) != Some(*col) {
                entry.membership.broadcast(name, col)?;
                entry.halo_columns.insert(name.to_string(), (*col).clone());
            }
        }
        Ok(&entry.membership)
    }

    /// [`get_or_expand`](Self::get_or_expand), handing the expansion over and
    /// leaving the cache empty.
    pub fn take_or_expand(
        &mut self,
        key: CacheKey,
        fields: &[(&str, &Column)],
        build: impl FnOnce() -> Result<Membership>,
    ) -> Result<Membership> {
        self.get_or_expand(key, fields, build)?;
        self.entry
            .take()
            .map(|e| e.membership)
            .ok_or_else(|| anyhow!("expansion cache entry missing after fill"))
    }
}
