use anyhow::{Context, Result, bail};
use ndarray::{Array1, Ix1, OwnedRepr};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::path::Path;

use crate::error::TraceError;
use crate::matching::ColumnData;

pub type Npz = NpzReader<File>;

pub fn open_npz(path: &Path) -> Result<Npz> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    NpzReader::new(f).with_context(|| format!("read npz {}", path.display()))
}

#[inline]
pub fn member_name(name: &str) -> String {
    if name.ends_with(".npy") {
        name.to_string()
    } else {
        format!("{name}.npy")
    }
}

/// Array member names without the `.npy` suffix.
pub fn member_names(npz: &mut Npz) -> Result<Vec<String>> {
    let names = npz.names().context("list npz members")?;
    Ok(names
        .into_iter()
        .map(|n| n.strip_suffix(".npy").map(str::to_string).unwrap_or(n))
        .collect())
}

pub fn read_i64(npz: &mut Npz, name: &str) -> Result<Vec<i64>> {
    let key = member_name(name);
    if let Ok(arr) = npz.by_name::<OwnedRepr<i64>, Ix1>(&key) {
        return Ok(arr.to_vec());
    }
    let arr: Array1<i32> = npz
        .by_name(&key)
        .with_context(|| format!("missing {}", name))?;
    Ok(arr.iter().map(|&v| v as i64).collect())
}

pub fn read_i16(npz: &mut Npz, name: &str) -> Result<Vec<i16>> {
    let arr: Array1<i16> = npz
        .by_name(&member_name(name))
        .with_context(|| format!("missing {}", name))?;
    Ok(arr.to_vec())
}

pub fn read_f64(npz: &mut Npz, name: &str) -> Result<Vec<f64>> {
    let arr: Array1<f64> = npz
        .by_name(&member_name(name))
        .with_context(|| format!("missing {}", name))?;
    Ok(arr.to_vec())
}

pub fn read_bytes(npz: &mut Npz, name: &str) -> Result<Vec<u8>> {
    let arr: Array1<u8> = npz
        .by_name(&member_name(name))
        .with_context(|| format!("missing {}", name))?;
    Ok(arr.to_vec())
}

/// First element of a length-1 counter array such as `Num_of_groups`.
pub fn read_count(npz: &mut Npz, name: &str) -> Result<i64> {
    let v = read_i64(npz, name)?;
    match v.first() {
        Some(&n) if n >= 0 => Ok(n),
        Some(&n) => bail!(TraceError::integrity(format!("{name} is negative ({n})"))),
        None => bail!(TraceError::integrity(format!("{name} is empty"))),
    }
}

/// Reads a 1-D member of any supported element type. `i32`/`f32` widen to
/// `i64`/`f64`.
pub fn read_column(npz: &mut Npz, name: &str) -> Result<ColumnData> {
    let key = member_name(name);
    if let Ok(a) = npz.by_name::<OwnedRepr<f64>, Ix1>(&key) {
        return Ok(ColumnData::F64(a.to_vec()));
    }
    if let Ok(a) = npz.by_name::<OwnedRepr<i64>, Ix1>(&key) {
        return Ok(ColumnData::I64(a.to_vec()));
    }
    if let Ok(a) = npz.by_name::<OwnedRepr<i32>, Ix1>(&key) {
        return Ok(ColumnData::I64(a.iter().map(|&v| v as i64).collect()));
    }
    if let Ok(a) = npz.by_name::<OwnedRepr<f32>, Ix1>(&key) {
        return Ok(ColumnData::F64(a.iter().map(|&v| v as f64).collect()));
    }
    let a: Array1<i16> = npz
        .by_name(&key)
        .with_context(|| format!("missing or unsupported dtype: {}", name))?;
    Ok(ColumnData::I16(a.to_vec()))
}
