//! Sharded halo catalogue: reading, stitching, hierarchy and particle expansion.

pub mod attributes;
pub mod expand;
pub mod hierarchy;
pub mod io;
pub mod shards;
pub mod stitch;
pub mod tables;

pub use attributes::AttributeIndex;
pub use expand::{CacheKey, ExpansionCache, HaloParticleSource, Membership, expand};
pub use hierarchy::{Hierarchy, RootMasses, resolve_root_parents};
pub use shards::{CatalogueId, Decoder, Member, OpenOptions, ShardSource, ShardedCatalogue};
pub use stitch::{StitchedOffsets, stitch, stitch_offsets};
pub use tables::HaloTables;

use anyhow::Result;

use crate::matching::Column;
use crate::species::Species;

pub const DEFAULT_HALO_ID_PATH: &str = "ids.id";
pub const DEFAULT_MASS_PATH: &str = "masses.mass_200crit";

/// A halo-level field to broadcast onto particles.
#[derive(Debug, Clone, Copy)]
pub enum HaloField<'a> {
    /// Read from the properties shards by dotted path.
    Attribute(&'a str),
    /// Supplied by the caller, one value per halo in catalogue order.
    Provided(&'a str, &'a Column),
}

impl HaloField<'_> {
    pub fn name(&self) -> &str {
        match self {
            HaloField::Attribute(path) => path,
            HaloField::Provided(name, _) => name,
        }
    }
}

impl ShardedCatalogue {
    /// Halo membership at particle granularity with the requested halo fields
    /// broadcast, optionally restricted to one species. Expansions are kept in
    /// `cache` so further fields for the same catalogue and species are cheap.
    pub fn halo_properties_by_particle(
        &self,
        cache: &mut ExpansionCache,
        halo_id_path: &str,
        fields: &[HaloField<'_>],
        species: Option<Species>,
    ) -> Result<Membership> {
        let key = CacheKey {
            catalogue: self.id().clone(),
            species: species.map(Species::code),
        };

        let mut loaded: Vec<(String, Column)> = Vec::new();
        for f in fields {
            if let HaloField::Attribute(path) = f {
                if !cache.has_field(&key, path) {
                    loaded.push((path.to_string(), self.attribute(path)?));
                }
            }
        }
        let mut columns: Vec<(&str, &Column)> =
            loaded.iter().map(|(n, c)| (n.as_str(), c)).collect();
        for f in fields {
            if let HaloField::Provided(name, col) = f {
                columns.push((*name, *col));
            }
        }

        let membership = cache.get_or_expand(key, &columns, || {
            let tables = HaloTables::load(self, halo_id_path)?;
            expand(&tables.source(), &[])
        })?;
        let names: Vec<&str> = fields.iter().map(HaloField::name).collect();
        Ok(membership.select(&names))
    }
}
