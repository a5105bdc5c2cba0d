//! Shard-local particle offsets to offsets into the concatenated particle arrays.
//!
//! Every shard's particle list starts at zero, so shard `s`'s offsets are
//! shifted by the particle count of all shards before it.

use anyhow::{Result, bail};

use crate::error::TraceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchedOffsets {
    pub bound: Vec<i64>,
    pub unbound: Vec<i64>,
}

/// Shifts each shard's block of `offsets` by the cumulative `particles_per_shard`
/// of the preceding shards. Shards are processed in ascending order.
pub fn stitch_offsets(
    halos_per_shard: &[i64],
    particles_per_shard: &[i64],
    offsets: &[i64],
) -> Result<Vec<i64>> {
    if halos_per_shard.len() != particles_per_shard.len() {
        bail!(TraceError::config(format!(
            "{} shard halo counts but {} shard particle counts",
            halos_per_shard.len(),
            particles_per_shard.len()
        )));
    }
    let n_halos: i64 = halos_per_shard.iter().sum();
    if halos_per_shard.iter().any(|&n| n < 0) || n_halos as usize != offsets.len() {
        bail!(TraceError::config(format!(
            "shard halo counts sum to {n_halos} but {} offsets were read",
            offsets.len()
        )));
    }

    let mut out = offsets.to_vec();
    let mut start = 0usize;
    let mut boost = 0i64;
    for (&n, &p) in halos_per_shard.iter().zip(particles_per_shard) {
        let end = start + n as usize;
        for o in &mut out[start..end] {
            *o += boost;
        }
        start = end;
        boost += p;
    }
    Ok(out)
}

pub fn stitch(
    halos_per_shard: &[i64],
    bound_per_shard: &[i64],
    unbound_per_shard: &[i64],
    offsets_bound: &[i64],
    offsets_unbound: &[i64],
) -> Result<StitchedOffsets> {
    Ok(StitchedOffsets {
        bound: stitch_offsets(halos_per_shard, bound_per_shard, offsets_bound)?,
        unbound: stitch_offsets(halos_per_shard, unbound_per_shard, offsets_unbound)?,
    })
}
