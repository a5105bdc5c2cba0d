#![allow(dead_code)]

use ndarray::Array1;
use ndarray_npy::NpzWriter;
use std::fs::File;
use std::path::Path;

/// One halo of a fixture shard. Particles are `(id, species code)`.
#[derive(Debug, Clone)]
pub struct Halo {
    pub id: i64,
    pub parent: i64,
    pub mass: f64,
    pub bound: Vec<(i64, i16)>,
    pub unbound: Vec<(i64, i16)>,
}

pub fn root(id: i64, mass: f64, bound: &[(i64, i16)]) -> Halo {
    Halo {
        id,
        parent: -1,
        mass,
        bound: bound.to_vec(),
        unbound: vec![],
    }
}

pub fn sub(id: i64, parent: i64, mass: f64, bound: &[(i64, i16)]) -> Halo {
    Halo {
        parent,
        ..root(id, mass, bound)
    }
}

fn npz(path: &Path, arrays: Vec<(&str, Col)>) {
    let mut w = NpzWriter::new(File::create(path).unwrap());
    for (name, col) in arrays {
        let key = format!("{name}.npy");
        match col {
            Col::I64(v) => w.add_array(key, &Array1::from_vec(v)).unwrap(),
            Col::I16(v) => w.add_array(key, &Array1::from_vec(v)).unwrap(),
            Col::F64(v) => w.add_array(key, &Array1::from_vec(v)).unwrap(),
        }
    }
    w.finish().unwrap();
}

enum Col {
    I64(Vec<i64>),
    I16(Vec<i16>),
    F64(Vec<f64>),
}

fn particle_files(dir: &Path, stem: &str, i: usize, kind: &str, halos: &[Halo], pick: fn(&Halo) -> &[(i64, i16)]) {
    let all: Vec<(i64, i16)> = halos.iter().flat_map(|h| pick(h).iter().copied()).collect();
    npz(
        &dir.join(format!("{stem}.catalog_particles{kind}.{i}")),
        vec![
            ("Particle_IDs", Col::I64(all.iter().map(|p| p.0).collect())),
            ("Num_of_particles_in_groups", Col::I64(vec![all.len() as i64])),
        ],
    );
    npz(
        &dir.join(format!("{stem}.catalog_parttypes{kind}.{i}")),
        vec![("Particle_types", Col::I16(all.iter().map(|p| p.1).collect()))],
    );
}

fn local_offsets(halos: &[Halo], pick: fn(&Halo) -> &[(i64, i16)]) -> Vec<i64> {
    let mut acc = 0i64;
    halos
        .iter()
        .map(|h| {
            let o = acc;
            acc += pick(h).len() as i64;
            o
        })
        .collect()
}

/// Writes `{stem}.<member>.<i>` for every shard, with shard-local offsets.
pub fn write_catalogue(dir: &Path, stem: &str, shards: &[Vec<Halo>]) {
    let bound: fn(&Halo) -> &[(i64, i16)] = |h| h.bound.as_slice();
    let unbound: fn(&Halo) -> &[(i64, i16)] = |h| h.unbound.as_slice();
    for (i, halos) in shards.iter().enumerate() {
        npz(
            &dir.join(format!("{stem}.properties.{i}")),
            vec![
                ("ids.id", Col::I64(halos.iter().map(|h| h.id).collect())),
                (
                    "masses.mass_200crit",
                    Col::F64(halos.iter().map(|h| h.mass).collect()),
                ),
            ],
        );
        npz(
            &dir.join(format!("{stem}.catalog_groups.{i}")),
            vec![
                ("Num_of_groups", Col::I64(vec![halos.len() as i64])),
                (
                    "Group_Size",
                    Col::I64(
                        halos
                            .iter()
                            .map(|h| (h.bound.len() + h.unbound.len()) as i64)
                            .collect(),
                    ),
                ),
                ("Parent_halo_ID", Col::I64(halos.iter().map(|h| h.parent).collect())),
                ("Offset", Col::I64(local_offsets(halos, bound))),
                ("Offset_unbound", Col::I64(local_offsets(halos, unbound))),
            ],
        );
        particle_files(dir, stem, i, "", halos, bound);
        particle_files(dir, stem, i, ".unbound", halos, unbound);
    }
}

pub const LABELS: [&str; 3] = ["0001", "0002", "0003"];

pub fn labels() -> Vec<String> {
    LABELS.iter().map(|s| s.to_string()).collect()
}

/// Three snapshots, earliest first:
///
/// - `0003`: shard 0 holds root 1 (mass 100) with subhalo 2, shard 1 holds
///   root 3 (mass 50). Particle 12 is unbound in halo 1.
/// - `0002`: roots 7 (mass 70) and 8 (mass 80), one per shard.
/// - `0001`: root 9 (mass 90) with subhalo 11.
pub fn write_three_snapshots(dir: &Path) {
    let mut h1 = root(1, 100.0, &[(10, 0), (11, 1)]);
    h1.unbound = vec![(12, 0)];
    write_catalogue(
        dir,
        "haloes_0003",
        &[
            vec![h1, sub(2, 1, 5.0, &[(13, 0)])],
            vec![root(3, 50.0, &[(14, 4)])],
        ],
    );
    write_catalogue(
        dir,
        "haloes_0002",
        &[
            vec![root(7, 70.0, &[(15, 0), (16, 0)])],
            vec![root(8, 80.0, &[(10, 0)])],
        ],
    );
    write_catalogue(
        dir,
        "haloes_0001",
        &[vec![root(9, 90.0, &[(17, 1)]), sub(11, 9, 1.0, &[(18, 0)])]],
    );
}

/// Present-day sample, deliberately unsorted; 99 is never in a halo.
pub const SAMPLE: [i64; 10] = [18, 10, 13, 15, 17, 16, 14, 99, 12, 11];
