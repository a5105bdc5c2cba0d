//! Where the tracker gets each snapshot's particle-to-halo table from.

use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

use crate::catalogue::{
    CacheKey, ExpansionCache, HaloTables, Hierarchy, OpenOptions, ShardedCatalogue, expand,
};
use crate::error::TraceError;
use crate::matching::{Column, ColumnData};
use crate::species::Species;

pub const ROOT_MASS_FIELD: &str = "root_parent_mass";

/// Particles inside haloes at one snapshot, each with the ID of its owning
/// halo and the mass of that halo's root parent. Particle IDs are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotHalos {
    pub particle_ids: Vec<i64>,
    pub halo_ids: Vec<i64>,
    pub root_masses: Vec<f64>,
    pub n_halos: usize,
}

impl SnapshotHalos {
    pub fn len(&self) -> usize {
        self.particle_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particle_ids.is_empty()
    }
}

pub trait HaloSource {
    /// Loads the snapshot at chronological position `index` named `label`.
    fn load(&mut self, index: usize, label: &str) -> Result<SnapshotHalos>;

    /// Settings that change what `load` returns. A checkpoint written under
    /// one set of settings is not resumed under another.
    fn settings(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

impl<S: HaloSource + ?Sized> HaloSource for &mut S {
    fn load(&mut self, index: usize, label: &str) -> Result<SnapshotHalos> {
        (**self).load(index, label)
    }

    fn settings(&self) -> BTreeMap<String, String> {
        (**self).settings()
    }
}

/// Replaces the single `{}` in `template` with the snapshot label.
pub fn stem_for(template: &str, label: &str) -> Result<String> {
    if template.matches("{}").count() != 1 {
        bail!(TraceError::config(format!(
            "catalogue stem template {template:?} must contain exactly one {{}}"
        )));
    }
    Ok(template.replacen("{}", label, 1))
}

/// Reads snapshots from sharded catalogues on disk.
#[derive(Debug)]
pub struct CatalogueSource {
    pub directory: PathBuf,
    pub stem_template: String,
    pub species: Option<Species>,
    pub halo_id_path: String,
    pub mass_path: String,
    pub open: OpenOptions,
    cache: ExpansionCache,
}

impl CatalogueSource {
    pub fn new(directory: impl Into<PathBuf>, stem_template: impl Into<String>) -> Self {
        CatalogueSource {
            directory: directory.into(),
            stem_template: stem_template.into(),
            species: None,
            halo_id_path: crate::catalogue::DEFAULT_HALO_ID_PATH.to_string(),
            mass_path: crate::catalogue::DEFAULT_MASS_PATH.to_string(),
            open: OpenOptions::default(),
            cache: ExpansionCache::new(),
        }
    }

    pub fn with_species(mut self, species: Option<Species>) -> Self {
        self.species = species;
        self
    }

    pub fn with_fields(mut self, halo_id_path: &str, mass_path: &str) -> Self {
        self.halo_id_path = halo_id_path.to_string();
        self.mass_path = mass_path.to_string();
        self
    }

    pub fn with_open_options(mut self, open: OpenOptions) -> Self {
        self.open = open;
        self
    }

    pub fn cache_stats(&self) -> (usize, usize) {
        self.cache.stats()
    }

    /// Whether an expansion is still held after `load` returned.
    pub fn holds_expansion(&self) -> bool {
        self.cache.key().is_some()
    }
}

fn mass_values(column: &Column, path: &str) -> Result<Vec<f64>> {
    match &column.data {
        ColumnData::F64(v) => Ok(v.clone()),
        ColumnData::I64(v) => Ok(v.iter().map(|&m| m as f64).collect()),
        ColumnData::I16(_) => bail!(TraceError::config(format!(
            "mass attribute {path} has unexpected type i16"
        ))),
    }
}

impl HaloSource for CatalogueSource {
    fn load(&mut self, _index: usize, label: &str) -> Result<SnapshotHalos> {
        let stem = stem_for(&self.stem_template, label)?;
        let t0 = Instant::now();
        let cat = ShardedCatalogue::open(&self.directory, &stem, &self.open)?;
        let tables = HaloTables::load(&cat, &self.halo_id_path)?;
        let mass_column = cat.attribute(&self.mass_path)?;
        let masses = mass_values(&mass_column, &self.mass_path)?;
        let t_read = t0.elapsed().as_secs_f64();
        let hierarchy = Hierarchy::resolve(&tables.halo_ids, &tables.parent_ids, &masses)?;
        let t_resolve = t0.elapsed().as_secs_f64() - t_read;
        let n_roots = hierarchy.n_roots(&tables.halo_ids);

        let key = CacheKey {
            catalogue: cat.id().clone(),
            species: self.species.map(Species::code),
        };
        let root_mass = Column {
            data: ColumnData::F64(hierarchy.root_masses),
            unit: mass_column.unit,
        };
        // leaves the cache empty between snapshots
        let mut membership = self.cache.take_or_expand(
            key,
            &[(ROOT_MASS_FIELD, &root_mass)],
            || expand(&tables.source(), &[]),
        )?;
        let Some(ColumnData::F64(root_masses)) =
            membership.fields.remove(ROOT_MASS_FIELD).map(|c| c.data)
        else {
            bail!("{ROOT_MASS_FIELD} missing from expansion");
        };
        let n_halos = tables.n_halos();
        debug!(
            "[snapshot {label}] {n_halos} halos ({n_roots} roots); read {t_read:.3}s resolve {t_resolve:.3}s expand {:.3}s",
            t0.elapsed().as_secs_f64() - t_read - t_resolve
        );
        Ok(SnapshotHalos {
            particle_ids: membership.particle_ids,
            halo_ids: membership.halo_ids,
            root_masses,
            n_halos,
        })
    }

    fn settings(&self) -> BTreeMap<String, String> {
        let shards = match &self.open.shard_indexes {
            Some(list) => list.iter().map(u32::to_string).collect::<Vec<_>>().join(","),
            None => "all".to_string(),
        };
        BTreeMap::from([
            ("stem_template".to_string(), self.stem_template.clone()),
            (
                "species".to_string(),
                self.species.map_or("all", Species::name).to_string(),
            ),
            ("halo_id_path".to_string(), self.halo_id_path.clone()),
            ("mass_path".to_string(), self.mass_path.clone()),
            ("shards".to_string(), shards),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_template_substitutes_label() {
        assert_eq!(stem_for("haloes_{}", "0042").unwrap(), "haloes_0042");
        assert!(stem_for("haloes", "0042").is_err());
        assert!(stem_for("{}_{}", "0042").is_err());
    }

    #[test]
    fn settings_cover_everything_that_shapes_a_load() {
        let src = CatalogueSource::new("/data", "haloes_{}")
            .with_species(Some(Species::Gas))
            .with_open_options(OpenOptions {
                shard_indexes: Some(vec![0, 2]),
            });
        let settings = src.settings();
        assert_eq!(settings["species"], "gas");
        assert_eq!(settings["stem_template"], "haloes_{}");
        assert_eq!(settings["shards"], "0,2");
        assert_eq!(settings["mass_path"], crate::catalogue::DEFAULT_MASS_PATH);

        let everything = CatalogueSource::new("/elsewhere", "haloes_{}");
        assert_eq!(everything.settings()["species"], "all");
        assert_ne!(everything.settings(), settings);
    }

    #[test]
    fn integer_masses_are_widened() {
        let col = Column::new(ColumnData::I64(vec![3, 4]));
        assert_eq!(mass_values(&col, "m").unwrap(), vec![3.0, 4.0]);
        let bad = Column::new(ColumnData::I16(vec![1]));
        assert!(mass_values(&bad, "m").is_err());
    }
}
