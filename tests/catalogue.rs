mod common;

use common::{root, sub, write_catalogue, write_three_snapshots};
use halotrace::catalogue::{
    ExpansionCache, HaloField, HaloTables, Member, OpenOptions, ShardedCatalogue,
    DEFAULT_HALO_ID_PATH,
};
use halotrace::error::TraceError;
use halotrace::matching::{Column, ColumnData};
use halotrace::species::Species;

fn open(dir: &std::path::Path, stem: &str) -> ShardedCatalogue {
    ShardedCatalogue::open(dir, stem, &OpenOptions::default()).unwrap()
}

#[test]
fn shards_are_discovered_in_index_order() {
    let dir = tempfile::tempdir().unwrap();
    write_three_snapshots(dir.path());
    let cat = open(dir.path(), "haloes_0003");
    assert_eq!(cat.n_shards(), 2);
    assert_eq!(cat.shard_indexes(), &[0, 1]);
    let unbound = cat.member_paths(Member::ParticlesUnbound);
    assert_eq!(
        unbound[1].file_name().unwrap().to_str().unwrap(),
        "haloes_0003.catalog_particles.unbound.1"
    );
    assert!(cat.attributes().contains("masses.mass_200crit"));
}

#[test]
fn stitched_tables_point_into_concatenated_particles() {
    let dir = tempfile::tempdir().unwrap();
    // shard 0: halos of sizes 3 and 2, shard 1: one halo of size 4
    write_catalogue(
        dir.path(),
        "cat",
        &[
            vec![
                root(100, 1.0, &[(10, 0), (11, 1), (12, 0)]),
                root(101, 1.0, &[(20, 0), (21, 4)]),
            ],
            vec![root(200, 1.0, &[(30, 0), (31, 0), (32, 1), (33, 0)])],
        ],
    );
    let cat = open(dir.path(), "cat");
    let tables = HaloTables::load(&cat, DEFAULT_HALO_ID_PATH).unwrap();
    assert_eq!(tables.offsets.bound, vec![0, 3, 5]);
    assert_eq!(tables.halos_per_shard, vec![2, 1]);

    let mut cache = ExpansionCache::new();
    let m = cat
        .halo_properties_by_particle(&mut cache, DEFAULT_HALO_ID_PATH, &[], None)
        .unwrap();
    assert_eq!(m.particle_ids, vec![10, 11, 12, 20, 21, 30, 31, 32, 33]);
    assert_eq!(m.halo_ids, vec![100, 100, 100, 101, 101, 200, 200, 200, 200]);
}

#[test]
fn attributes_carry_units_and_broadcast_per_particle() {
    let dir = tempfile::tempdir().unwrap();
    write_three_snapshots(dir.path());
    std::fs::write(
        dir.path().join("haloes_0003.units"),
        r#"{"masses.mass_200crit": "Msun"}"#,
    )
    .unwrap();
    let cat = open(dir.path(), "haloes_0003");

    let mass = cat.query("masses").get("mass_200crit").value().unwrap();
    assert_eq!(mass.unit.as_deref(), Some("Msun"));
    assert_eq!(mass.data, ColumnData::F64(vec![100.0, 5.0, 50.0]));

    let flag = Column::from(vec![1i64, 0, 1]);
    let mut cache = ExpansionCache::new();
    let m = cat
        .halo_properties_by_particle(
            &mut cache,
            DEFAULT_HALO_ID_PATH,
            &[
                HaloField::Attribute("masses.mass_200crit"),
                HaloField::Provided("is_root", &flag),
            ],
            None,
        )
        .unwrap();
    assert_eq!(m.particle_ids, vec![10, 11, 12, 13, 14]);
    let per_particle = m.field("masses.mass_200crit").unwrap();
    assert_eq!(per_particle.data, ColumnData::F64(vec![100.0, 100.0, 100.0, 5.0, 50.0]));
    assert_eq!(per_particle.unit.as_deref(), Some("Msun"));
    assert_eq!(
        m.field("is_root").unwrap().data,
        ColumnData::I64(vec![1, 1, 1, 0, 1])
    );

    // same catalogue and species: served from the cache
    let gas = cat
        .halo_properties_by_particle(
            &mut cache,
            DEFAULT_HALO_ID_PATH,
            &[HaloField::Attribute("masses.mass_200crit")],
            Some(Species::Gas),
        )
        .unwrap();
    assert_eq!(gas.particle_ids, vec![10, 12, 13]);
    let again = cat
        .halo_properties_by_particle(&mut cache, DEFAULT_HALO_ID_PATH, &[], Some(Species::Gas))
        .unwrap();
    assert_eq!(again.particle_ids, gas.particle_ids);
    assert_eq!(cache.stats(), (1, 2));
}

#[test]
fn provided_fields_follow_the_latest_values() {
    let dir = tempfile::tempdir().unwrap();
    write_three_snapshots(dir.path());
    let cat = open(dir.path(), "haloes_0002");
    let mut cache = ExpansionCache::new();

    let weights = Column::from(vec![1.0f64, 2.0]);
    let m = cat
        .halo_properties_by_particle(
            &mut cache,
            DEFAULT_HALO_ID_PATH,
            &[HaloField::Provided("w", &weights)],
            None,
        )
        .unwrap();
    assert_eq!(m.field("w").unwrap().data, ColumnData::F64(vec![1.0, 1.0, 2.0]));

    let weights = Column::from(vec![7.0f64, 8.0]);
    let m = cat
        .halo_properties_by_particle(
            &mut cache,
            DEFAULT_HALO_ID_PATH,
            &[HaloField::Provided("w", &weights)],
            None,
        )
        .unwrap();
    assert_eq!(m.field("w").unwrap().data, ColumnData::F64(vec![7.0, 7.0, 8.0]));
    assert_eq!(cache.stats(), (1, 1));
}

#[test]
fn shard_subset_restricts_the_catalogue() {
    let dir = tempfile::tempdir().unwrap();
    write_three_snapshots(dir.path());
    let opts = OpenOptions {
        shard_indexes: Some(vec![1]),
    };
    let cat = ShardedCatalogue::open(dir.path(), "haloes_0003", &opts).unwrap();
    assert_eq!(cat.shard_indexes(), &[1]);
    let tables = HaloTables::load(&cat, DEFAULT_HALO_ID_PATH).unwrap();
    assert_eq!(tables.halo_ids, vec![3]);

    let missing = OpenOptions {
        shard_indexes: Some(vec![5]),
    };
    let err = ShardedCatalogue::open(dir.path(), "haloes_0003", &missing).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TraceError>(),
        Some(TraceError::Config(_))
    ));
}

#[test]
fn parent_cycles_are_integrity_errors() {
    let dir = tempfile::tempdir().unwrap();
    write_catalogue(
        dir.path(),
        "loop",
        &[vec![
            sub(1, 2, 1.0, &[(10, 0)]),
            sub(2, 1, 1.0, &[(11, 0)]),
        ]],
    );
    let mut src = halotrace::tracker::CatalogueSource::new(dir.path(), "{}");
    let err = halotrace::tracker::HaloSource::load(&mut src, 0, "loop").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TraceError>(),
        Some(TraceError::Integrity(_))
    ));
}

#[test]
fn empty_directory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = ShardedCatalogue::open(dir.path(), "haloes_0001", &OpenOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TraceError>(),
        Some(TraceError::NotFound { .. })
    ));
    let err = ShardedCatalogue::open(dir.path().join("nope"), "x", &OpenOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TraceError>(),
        Some(TraceError::Config(_))
    ));
}

#[test]
fn raw_reads_accept_explicit_shard_paths() {
    use halotrace::catalogue::Decoder;
    use halotrace::catalogue::io::{Npz, read_i64};

    let dir = tempfile::tempdir().unwrap();
    write_three_snapshots(dir.path());
    let cat = open(dir.path(), "haloes_0003");

    let ids = |npz: &mut Npz| read_i64(npz, "Particle_IDs");
    let decode: Decoder<'_, i64> = &ids;
    let by_member = cat.read_raw_one(Member::ParticlesBound, decode).unwrap();
    assert_eq!(by_member, vec![10, 11, 13, 14]);

    // shard 1 first: concatenation follows the given path order
    let mut paths = cat.member_paths(Member::ParticlesBound);
    paths.reverse();
    let by_path = cat.read_raw_one(paths.as_slice(), decode).unwrap();
    assert_eq!(by_path, vec![14, 10, 11, 13]);

    let missing = |npz: &mut Npz| read_i64(npz, "No_such_member");
    let failing: Decoder<'_, i64> = &missing;
    assert!(cat.read_raw(Member::Groups, &[decode, failing]).is_err());
}
