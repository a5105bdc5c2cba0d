//! Raw group/particle tables of one snapshot, read through the shard reader
//! and stitched into catalogue-wide form.

use anyhow::{Result, bail};
use std::time::Instant;
use tracing::debug;

use super::expand::HaloParticleSource;
use super::io::{Npz, read_count, read_i16, read_i64};
use super::shards::{Decoder, Member, ShardedCatalogue};
use super::stitch::{StitchedOffsets, stitch};
use crate::error::TraceError;

fn decode_n_groups(npz: &mut Npz) -> Result<Vec<i64>> {
    Ok(vec![read_count(npz, "Num_of_groups")?])
}
fn decode_parent_halo_ids(npz: &mut Npz) -> Result<Vec<i64>> {
    read_i64(npz, "Parent_halo_ID")
}
fn decode_offsets(npz: &mut Npz) -> Result<Vec<i64>> {
    read_i64(npz, "Offset")
}
fn decode_offsets_unbound(npz: &mut Npz) -> Result<Vec<i64>> {
    read_i64(npz, "Offset_unbound")
}
fn decode_group_size(npz: &mut Npz) -> Result<Vec<i64>> {
    read_i64(npz, "Group_Size")
}
fn decode_particle_ids(npz: &mut Npz) -> Result<Vec<i64>> {
    read_i64(npz, "Particle_IDs")
}
fn decode_n_particles(npz: &mut Npz) -> Result<Vec<i64>> {
    Ok(vec![read_count(npz, "Num_of_particles_in_groups")?])
}
fn decode_particle_types(npz: &mut Npz) -> Result<Vec<i16>> {
    read_i16(npz, "Particle_types")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleList {
    pub ids: Vec<i64>,
    pub types: Vec<i16>,
    pub per_shard: Vec<i64>,
}

impl ParticleList {
    fn read(cat: &ShardedCatalogue, ids_member: Member, types_member: Member) -> Result<Self> {
        let decoders: [Decoder<'_, i64>; 2] = [&decode_particle_ids, &decode_n_particles];
        let [ids, per_shard]: [Vec<i64>; 2] = cat
            .read_raw(ids_member, &decoders)?
            .try_into()
            .map_err(|_| anyhow::anyhow!("decoder count mismatch"))?;
        let decode_types: Decoder<'_, i16> = &decode_particle_types;
        let types = cat.read_raw_one(types_member, decode_types)?;

        let declared: i64 = per_shard.iter().sum();
        if declared as usize != ids.len() {
            bail!(TraceError::integrity(format!(
                "{} declares {declared} particles but lists {}",
                ids_member.suffix(),
                ids.len()
            )));
        }
        if types.len() != ids.len() {
            bail!(TraceError::integrity(format!(
                "{} has {} entries but {} has {}",
                types_member.suffix(),
                types.len(),
                ids_member.suffix(),
                ids.len()
            )));
        }
        Ok(ParticleList {
            ids,
            types,
            per_shard,
        })
    }
}

/// Everything the expansion and the hierarchy need for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloTables {
    pub halo_ids: Vec<i64>,
    pub parent_ids: Vec<i64>,
    pub group_size: Vec<i64>,
    pub halos_per_shard: Vec<i64>,
    pub offsets: StitchedOffsets,
    pub bound: ParticleList,
    pub unbound: ParticleList,
}

impl HaloTables {
    pub fn load(cat: &ShardedCatalogue, halo_id_path: &str) -> Result<Self> {
        let t0 = Instant::now();
        let halo_ids = cat
            .attribute(halo_id_path)?
            .data
            .as_i64()
            .map(<[i64]>::to_vec)
            .ok_or_else(|| {
                TraceError::config(format!("halo id attribute {halo_id_path} is not integer"))
            })?;

        let decoders: [Decoder<'_, i64>; 5] = [
            &decode_n_groups,
            &decode_parent_halo_ids,
            &decode_offsets,
            &decode_offsets_unbound,
            &decode_group_size,
        ];
        let [halos_per_shard, parent_ids, offsets_bound, offsets_unbound, group_size]: [Vec<i64>; 5] =
            cat.read_raw(Member::Groups, &decoders)?
                .try_into()
                .map_err(|_| anyhow::anyhow!("decoder count mismatch"))?;

        let n_halos = halo_ids.len();
        for (name, len) in [
            ("Parent_halo_ID", parent_ids.len()),
            ("Group_Size", group_size.len()),
            ("Offset", offsets_bound.len()),
            ("Offset_unbound", offsets_unbound.len()),
        ] {
            if len != n_halos {
                bail!(TraceError::config(format!(
                    "{} has {len} {name} entries but {n_halos} halos in its properties",
                    cat.id()
                )));
            }
        }

        let bound = ParticleList::read(cat, Member::ParticlesBound, Member::ParttypesBound)?;
        let unbound = ParticleList::read(cat, Member::ParticlesUnbound, Member::ParttypesUnbound)?;
        let offsets = stitch(
            &halos_per_shard,
            &bound.per_shard,
            &unbound.per_shard,
            &offsets_bound,
            &offsets_unbound,
        )?;

        debug!(
            "[catalogue] read {} halos, {} bound + {} unbound particles in {:.3}s",
            n_halos,
            bound.ids.len(),
            unbound.ids.len(),
            t0.elapsed().as_secs_f64()
        );
        Ok(HaloTables {
            halo_ids,
            parent_ids,
            group_size,
            halos_per_shard,
            offsets,
            bound,
            unbound,
        })
    }

    pub fn n_halos(&self) -> usize {
        self.halo_ids.len()
    }

    pub fn source(&self) -> HaloParticleSource<'_> {
        HaloParticleSource {
            halo_ids: &self.halo_ids,
            group_size: &self.group_size,
            offsets_bound: &self.offsets.bound,
            offsets_unbound: &self.offsets.unbound,
            bound_ids: &self.bound.ids,
            unbound_ids: &self.unbound.ids,
            bound_types: &self.bound.types,
            unbound_types: &self.unbound.types,
        }
    }
}
