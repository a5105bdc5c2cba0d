use anyhow::{Result, bail};

use crate::error::TraceError;

/// One value of a typed column, used for fills and lookups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I16(i16),
    I64(i64),
    F64(f64),
}

impl Scalar {
    #[inline]
    pub fn as_i16(self) -> i16 {
        match self {
            Scalar::I16(v) => v,
            Scalar::I64(v) => v as i16,
            Scalar::F64(v) => v as i16,
        }
    }
    #[inline]
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::I16(v) => v as i64,
            Scalar::I64(v) => v,
            Scalar::F64(v) => v as i64,
        }
    }
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::I16(v) => v as f64,
            Scalar::I64(v) => v as f64,
            Scalar::F64(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    I16(Vec<i16>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

// src[rows[i]] where present, fill(i) otherwise
fn pick<T: Copy>(src: &[T], rows: &[Option<usize>], mut fill: impl FnMut(usize) -> T) -> Vec<T> {
    rows.iter()
        .enumerate()
        .map(|(i, r)| match r {
            Some(j) => src[*j],
            None => fill(i),
        })
        .collect()
}

impl ColumnData {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            ColumnData::I16(v) => v.len(),
            ColumnData::I64(v) => v.len(),
            ColumnData::F64(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            ColumnData::I16(_) => "i16",
            ColumnData::I64(_) => "i64",
            ColumnData::F64(_) => "f64",
        }
    }

    pub fn empty_like(&self) -> ColumnData {
        match self {
            ColumnData::I16(_) => ColumnData::I16(Vec::new()),
            ColumnData::I64(_) => ColumnData::I64(Vec::new()),
            ColumnData::F64(_) => ColumnData::F64(Vec::new()),
        }
    }

    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            ColumnData::I16(v) => v.get(i).copied().map(Scalar::I16),
            ColumnData::I64(v) => v.get(i).copied().map(Scalar::I64),
            ColumnData::F64(v) => v.get(i).copied().map(Scalar::F64),
        }
    }

    /// Appends `other` (same element type) at the end, i.e. concatenation on axis 0.
    pub fn extend_from(&mut self, other: &ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::I16(a), ColumnData::I16(b)) => a.extend_from_slice(b),
            (ColumnData::I64(a), ColumnData::I64(b)) => a.extend_from_slice(b),
            (ColumnData::F64(a), ColumnData::F64(b)) => a.extend_from_slice(b),
            (a, b) => bail!(TraceError::integrity(format!(
                "cannot concatenate {} column with {} column",
                a.dtype(),
                b.dtype()
            ))),
        }
        Ok(())
    }

    /// `out[i] = self[idx[i]]`; used to broadcast halo values to particles.
    pub fn take(&self, idx: &[usize]) -> ColumnData {
        match self {
            ColumnData::I16(v) => ColumnData::I16(idx.iter().map(|&i| v[i]).collect()),
            ColumnData::I64(v) => ColumnData::I64(idx.iter().map(|&i| v[i]).collect()),
            ColumnData::F64(v) => ColumnData::F64(idx.iter().map(|&i| v[i]).collect()),
        }
    }

    pub fn filter(&self, mask: &[bool]) -> ColumnData {
        fn keep<T: Copy>(v: &[T], mask: &[bool]) -> Vec<T> {
            v.iter()
                .zip(mask)
                .filter_map(|(x, &m)| m.then_some(*x))
                .collect()
        }
        match self {
            ColumnData::I16(v) => ColumnData::I16(keep(v, mask)),
            ColumnData::I64(v) => ColumnData::I64(keep(v, mask)),
            ColumnData::F64(v) => ColumnData::F64(keep(v, mask)),
        }
    }

    /// Gathers `self[rows[i]]`, calling `fill(i)` for rows that are `None`.
    /// The fill value is cast to this column's element type.
    pub fn gather_or_fill(
        &self,
        rows: &[Option<usize>],
        mut fill: impl FnMut(usize) -> Scalar,
    ) -> ColumnData {
        match self {
            ColumnData::I16(v) => ColumnData::I16(pick(v, rows, |i| fill(i).as_i16())),
            ColumnData::I64(v) => ColumnData::I64(pick(v, rows, |i| fill(i).as_i64())),
            ColumnData::F64(v) => ColumnData::F64(pick(v, rows, |i| fill(i).as_f64())),
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            ColumnData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ColumnData::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<&[i16]> {
        match self {
            ColumnData::I16(v) => Some(v),
            _ => None,
        }
    }
}

/// A named-type column together with its physical unit, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub data: ColumnData,
    pub unit: Option<String>,
}

impl Column {
    pub fn new(data: ColumnData) -> Self {
        Column { data, unit: None }
    }

    pub fn with_unit(data: ColumnData, unit: impl Into<String>) -> Self {
        Column {
            data,
            unit: Some(unit.into()),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Applies `f` to the data and keeps the unit.
    pub fn map_data(&self, f: impl FnOnce(&ColumnData) -> ColumnData) -> Column {
        Column {
            data: f(&self.data),
            unit: self.unit.clone(),
        }
    }
}

impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Self {
        Column::new(ColumnData::I64(v))
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::new(ColumnData::F64(v))
    }
}

impl From<Vec<i16>> for Column {
    fn from(v: Vec<i16>) -> Self {
        Column::new(ColumnData::I16(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_cast_to_column_type() {
        let col = ColumnData::I64(vec![7, 8]);
        let out = col.gather_or_fill(&[Some(1), None, Some(0)], |_| Scalar::F64(-1.0));
        assert_eq!(out, ColumnData::I64(vec![8, -1, 7]));
    }

    #[test]
    fn extend_rejects_mixed_types() {
        let mut a = ColumnData::I64(vec![1]);
        assert!(a.extend_from(&ColumnData::F64(vec![1.0])).is_err());
        a.extend_from(&ColumnData::I64(vec![2, 3])).unwrap();
        assert_eq!(a, ColumnData::I64(vec![1, 2, 3]));
    }

    #[test]
    fn map_data_keeps_unit() {
        let c = Column::with_unit(ColumnData::F64(vec![1.0, 2.0, 3.0]), "Msun");
        let f = c.map_data(|d| d.filter(&[true, false, true]));
        assert_eq!(f.unit.as_deref(), Some("Msun"));
        assert_eq!(f.data, ColumnData::F64(vec![1.0, 3.0]));
    }
}
