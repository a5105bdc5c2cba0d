//! One logical halo catalogue stitched together from its per-shard files.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::attributes::AttributeIndex;
use super::io::{Npz, member_names, open_npz, read_column};
use crate::error::TraceError;
use crate::matching::Column;

/// The per-shard file families of a catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    Groups,
    ParticlesBound,
    ParticlesUnbound,
    ParttypesBound,
    ParttypesUnbound,
    Properties,
}

impl Member {
    pub fn suffix(self) -> &'static str {
        match self {
            Member::Groups => "catalog_groups",
            Member::ParticlesBound => "catalog_particles",
            Member::ParticlesUnbound => "catalog_particles.unbound",
            Member::ParttypesBound => "catalog_parttypes",
            Member::ParttypesUnbound => "catalog_parttypes.unbound",
            Member::Properties => "properties",
        }
    }
}

/// Where `read_raw` takes its shard files from.
#[derive(Debug, Clone)]
pub enum ShardSource<'a> {
    Member(Member),
    Paths(&'a [PathBuf]),
}

impl From<Member> for ShardSource<'_> {
    fn from(m: Member) -> Self {
        ShardSource::Member(m)
    }
}

impl<'a> From<&'a [PathBuf]> for ShardSource<'a> {
    fn from(p: &'a [PathBuf]) -> Self {
        ShardSource::Paths(p)
    }
}

/// Reads one array (or a length-1 counter) out of an open shard.
pub type Decoder<'a, T> = &'a dyn Fn(&mut Npz) -> Result<Vec<T>>;

/// Identity of an opened catalogue, used to key caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogueId {
    pub directory: PathBuf,
    pub stem: String,
    pub shard_indexes: Vec<u32>,
}

impl fmt::Display for CatalogueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} shards)",
            self.directory.join(&self.stem).display(),
            self.shard_indexes.len()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Restrict to these shard indexes instead of everything on disk.
    pub shard_indexes: Option<Vec<u32>>,
}

#[derive(Debug)]
pub struct ShardedCatalogue {
    id: CatalogueId,
    properties_paths: Vec<PathBuf>,
    attributes: AttributeIndex,
    units: BTreeMap<String, String>,
}

fn discover_shards(directory: &Path, stem: &str, member: Member) -> Result<Vec<(u32, PathBuf)>> {
    let prefix = format!("{stem}.{}.", member.suffix());
    let mut found = Vec::new();
    let entries =
        std::fs::read_dir(directory).with_context(|| format!("list {}", directory.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("list {}", directory.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(idx) = name.strip_prefix(&prefix).and_then(|s| s.parse::<u32>().ok()) {
            found.push((idx, entry.path()));
        }
    }
    found.sort_unstable_by_key(|(idx, _)| *idx);
    Ok(found)
}

fn load_units(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| {
        TraceError::config(format!("units file {} is not valid: {e}", path.display())).into()
    })
}

impl ShardedCatalogue {
    /// Discovers `<stem>.properties.<i>` under `directory` and opens every shard.
    pub fn open(directory: impl AsRef<Path>, stem: &str, opts: &OpenOptions) -> Result<Self> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            bail!(TraceError::config(format!(
                "catalogue directory {} does not exist",
                directory.display()
            )));
        }

        let mut shards = discover_shards(directory, stem, Member::Properties)?;
        if let Some(wanted) = &opts.shard_indexes {
            for w in wanted {
                if !shards.iter().any(|(idx, _)| idx == w) {
                    bail!(TraceError::config(format!(
                        "shard {w} of {stem} requested but not present in {}",
                        directory.display()
                    )));
                }
            }
            shards.retain(|(idx, _)| wanted.contains(idx));
        }
        if shards.is_empty() {
            bail!(TraceError::NotFound {
                pattern: directory
                    .join(format!("{stem}.{}.*", Member::Properties.suffix()))
                    .display()
                    .to_string(),
            });
        }

        // every shard must expose the same attributes
        let mut first_names: Option<Vec<String>> = None;
        for (idx, path) in &shards {
            let mut npz = open_npz(path)?;
            let mut names = member_names(&mut npz)?;
            names.sort();
            match &first_names {
                None => first_names = Some(names),
                Some(expected) if *expected != names => bail!(TraceError::config(format!(
                    "properties shard {idx} of {stem} has a different attribute set"
                ))),
                Some(_) => {}
            }
        }
        let attributes = AttributeIndex::from_names(first_names.unwrap_or_default())?;
        let units = load_units(&directory.join(format!("{stem}.units")))?;

        let (shard_indexes, properties_paths): (Vec<u32>, Vec<PathBuf>) = shards.into_iter().unzip();
        debug!(
            "[catalogue] opened {} with {} shards, {} attributes",
            stem,
            shard_indexes.len(),
            attributes.paths().len()
        );
        Ok(ShardedCatalogue {
            id: CatalogueId {
                directory: directory.to_path_buf(),
                stem: stem.to_string(),
                shard_indexes,
            },
            properties_paths,
            attributes,
            units,
        })
    }

    pub fn id(&self) -> &CatalogueId {
        &self.id
    }

    pub fn n_shards(&self) -> usize {
        self.id.shard_indexes.len()
    }

    pub fn shard_indexes(&self) -> &[u32] {
        &self.id.shard_indexes
    }

    pub fn attributes(&self) -> &AttributeIndex {
        &self.attributes
    }

    /// File of `member` for every open shard, in shard order.
    pub fn member_paths(&self, member: Member) -> Vec<PathBuf> {
        if member == Member::Properties {
            return self.properties_paths.clone();
        }
        self.id
            .shard_indexes
            .iter()
            .map(|i| {
                self.id
                    .directory
                    .join(format!("{}.{}.{}", self.id.stem, member.suffix(), i))
            })
            .collect()
    }

    pub fn unit_of(&self, path: &str) -> Option<&str> {
        self.units.get(path).map(String::as_str)
    }

    /// One attribute concatenated over all shards, with its unit when known.
    pub fn attribute(&self, path: &str) -> Result<Column> {
        let name = self.attributes.resolve(path)?;
        let mut data = None;
        for shard in &self.properties_paths {
            let mut npz = open_npz(shard)?;
            let part = read_column(&mut npz, &name)
                .with_context(|| format!("read {name} from {}", shard.display()))?;
            match &mut data {
                None => data = Some(part),
                Some(acc) => acc.extend_from(&part)?,
            }
        }
        let data = data.context("catalogue has no shards")?;
        Ok(Column {
            data,
            unit: self.unit_of(&name).map(str::to_string),
        })
    }

    /// Builder-style access: `cat.query("masses").get("mass_200crit").value()`.
    pub fn query(&self, name: &str) -> AttributeQuery<'_> {
        AttributeQuery {
            catalogue: self,
            path: vec![name.to_string()],
        }
    }

    /// Opens every shard file of `source` in turn, applies every decoder and
    /// concatenates each decoder's output across shards. Any failure aborts
    /// the whole read.
    pub fn read_raw<'s, T>(
        &self,
        source: impl Into<ShardSource<'s>>,
        decoders: &[Decoder<'_, T>],
    ) -> Result<Vec<Vec<T>>> {
        let paths = match source.into() {
            ShardSource::Member(m) => self.member_paths(m),
            ShardSource::Paths(p) => p.to_vec(),
        };
        let mut out: Vec<Vec<T>> = (0..decoders.len()).map(|_| Vec::new()).collect();
        for path in &paths {
            let mut npz = open_npz(path)?;
            for (i, decode) in decoders.iter().enumerate() {
                let part = decode(&mut npz)
                    .with_context(|| format!("decoder #{i} on {}", path.display()))?;
                out[i].extend(part);
            }
        }
        Ok(out)
    }

    /// Single-decoder form of [`read_raw`](Self::read_raw).
    pub fn read_raw_one<'s, T>(
        &self,
        source: impl Into<ShardSource<'s>>,
        decoder: Decoder<'_, T>,
    ) -> Result<Vec<T>> {
        let mut out = self.read_raw(source, &[decoder])?;
        Ok(out.pop().unwrap_or_default())
    }
}

/// A dotted path being built up segment by segment.
#[derive(Debug, Clone)]
pub struct AttributeQuery<'a> {
    catalogue: &'a ShardedCatalogue,
    path: Vec<String>,
}

impl<'a> AttributeQuery<'a> {
    pub fn get(mut self, name: &str) -> Self {
        self.path.push(name.to_string());
        self
    }

    pub fn path(&self) -> String {
        self.path.join(".")
    }

    pub fn value(&self) -> Result<Column> {
        self.catalogue.attribute(&self.path())
    }
}
