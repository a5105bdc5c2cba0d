//! ID reconciliation: align an arbitrary-order, ID-keyed dataset to a target ID ordering.
//!
//! Conceptually the source is first augmented with a filled row for every
//! target ID it lacks, then stripped of every row whose ID the target does
//! not contain, then permuted into target order. All three steps are done in
//! one merge over the ID-sorted target and source (stable sorts, so the
//! result only depends on the ID values, never on hashing).

use anyhow::{Result, bail};
use rayon::prelude::*;

use super::column::{Column, Scalar};
use crate::error::TraceError;

/// What to write into target rows the source does not cover.
pub enum Fill<'a> {
    /// Same value for every column and row (cast to each column's type).
    Value(Scalar),
    /// `f(column_index, target_row, target_id)`.
    With(Box<dyn Fn(usize, usize, i64) -> Scalar + 'a>),
}

impl<'a> Fill<'a> {
    pub fn with(f: impl Fn(usize, usize, i64) -> Scalar + 'a) -> Self {
        Fill::With(Box::new(f))
    }

    #[inline]
    pub fn value_for(&self, column: usize, row: usize, id: i64) -> Scalar {
        match self {
            Fill::Value(v) => *v,
            Fill::With(f) => f(column, row, id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// `true` where the row came from the source rather than from the fill.
    pub matched: Vec<bool>,
    /// Always equal to the target ids.
    pub ids: Vec<i64>,
    pub columns: Vec<Column>,
}

impl Reconciled {
    pub fn n_matched(&self) -> usize {
        self.matched.iter().filter(|&&m| m).count()
    }
}

/// For each target row, the source row carrying the same ID (if any).
///
/// Duplicate target ids are each resolved on their own. A source id that
/// occurs more than once and is requested by the target is an integrity
/// error: the answer would depend on array order.
pub fn match_rows(target_ids: &[i64], source_ids: &[i64]) -> Result<Vec<Option<usize>>> {
    let mut src_order: Vec<usize> = (0..source_ids.len()).collect();
    src_order.par_sort_by_key(|&i| source_ids[i]);
    let mut tgt_order: Vec<usize> = (0..target_ids.len()).collect();
    tgt_order.par_sort_by_key(|&i| target_ids[i]);

    let mut rows: Vec<Option<usize>> = vec![None; target_ids.len()];
    let mut s = 0usize;
    for &t in &tgt_order {
        let id = target_ids[t];
        while s < src_order.len() && source_ids[src_order[s]] < id {
            s += 1;
        }
        if s < src_order.len() && source_ids[src_order[s]] == id {
            if s + 1 < src_order.len() && source_ids[src_order[s + 1]] == id {
                bail!(TraceError::integrity(format!(
                    "particle id {id} appears more than once in the source (rows {} and {})",
                    src_order[s],
                    src_order[s + 1]
                )));
            }
            rows[t] = Some(src_order[s]);
        }
    }
    Ok(rows)
}

/// Reindexes `source_columns` (parallel to `source_ids`) into the order of `target_ids`.
pub fn reconcile(
    target_ids: &[i64],
    source_ids: &[i64],
    source_columns: &[Column],
    fill: &Fill<'_>,
) -> Result<Reconciled> {
    for (c, col) in source_columns.iter().enumerate() {
        if col.len() != source_ids.len() {
            bail!(TraceError::integrity(format!(
                "source column {c} has {} rows but there are {} source ids",
                col.len(),
                source_ids.len()
            )));
        }
    }

    let rows = match_rows(target_ids, source_ids)?;
    let matched: Vec<bool> = rows.iter().map(Option::is_some).collect();

    let columns = source_columns
        .iter()
        .enumerate()
        .map(|(c, col)| {
            col.map_data(|data| {
                data.gather_or_fill(&rows, |row| fill.value_for(c, row, target_ids[row]))
            })
        })
        .collect();

    Ok(Reconciled {
        matched,
        ids: target_ids.to_vec(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::column::ColumnData;
    use proptest::prelude::*;

    #[test]
    fn fills_missing_and_drops_extras() {
        let target = [5, 1, 9];
        let source = [1, 2, 5];
        let cols = vec![
            Column::from(vec![10i64, 20, 50]),
            Column::with_unit(ColumnData::F64(vec![1.5, 2.5, 5.5]), "Msun"),
        ];
        let out = reconcile(&target, &source, &cols, &Fill::Value(Scalar::F64(-1.0))).unwrap();
        assert_eq!(out.matched, vec![true, true, false]);
        assert_eq!(out.ids, vec![5, 1, 9]);
        assert_eq!(out.columns[0].data, ColumnData::I64(vec![50, 10, -1]));
        assert_eq!(out.columns[1].data, ColumnData::F64(vec![5.5, 1.5, -1.0]));
        assert_eq!(out.columns[1].unit.as_deref(), Some("Msun"));
    }

    #[test]
    fn id_only_reconciliation() {
        let out = reconcile(&[3, 4], &[4], &[], &Fill::Value(Scalar::I64(-1))).unwrap();
        assert_eq!(out.matched, vec![false, true]);
        assert!(out.columns.is_empty());
    }

    #[test]
    fn duplicate_targets_resolve_independently() {
        let out = reconcile(
            &[7, 3, 7],
            &[3, 7],
            &[Column::from(vec![30i64, 70])],
            &Fill::Value(Scalar::I64(-1)),
        )
        .unwrap();
        assert_eq!(out.matched, vec![true, true, true]);
        assert_eq!(out.columns[0].data, ColumnData::I64(vec![70, 30, 70]));
    }

    #[test]
    fn fill_function_sees_column_row_and_id() {
        let fill = Fill::with(|c, row, id| Scalar::I64(c as i64 * 1000 + row as i64 * 100 + id));
        let cols = vec![Column::from(vec![0i64]), Column::from(vec![0i64])];
        let out = reconcile(&[1, 8], &[1], &cols, &fill).unwrap();
        assert_eq!(out.columns[0].data, ColumnData::I64(vec![0, 108]));
        assert_eq!(out.columns[1].data, ColumnData::I64(vec![0, 1108]));
    }

    #[test]
    fn duplicated_requested_source_id_is_an_integrity_error() {
        let err = reconcile(&[4], &[4, 4], &[], &Fill::Value(Scalar::I64(-1))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::Integrity(_))
        ));
        // duplicates nobody asks for are dropped with the other extras
        assert!(reconcile(&[1], &[1, 4, 4], &[], &Fill::Value(Scalar::I64(-1))).is_ok());
    }

    #[test]
    fn column_length_mismatch_is_rejected() {
        let cols = vec![Column::from(vec![1i64])];
        assert!(reconcile(&[1], &[1, 2], &cols, &Fill::Value(Scalar::I64(-1))).is_err());
    }

    proptest! {
        #[test]
        fn permutation_round_trip(ids in proptest::collection::hash_set(any::<i64>(), 0..200), seed in any::<u64>()) {
            let source: Vec<i64> = ids.into_iter().collect();
            let mut target = source.clone();
            // cheap deterministic shuffle
            let n = target.len();
            let mut state = seed | 1;
            for i in (1..n).rev() {
                state ^= state << 13; state ^= state >> 7; state ^= state << 17;
                target.swap(i, (state % (i as u64 + 1)) as usize);
            }
            let payload: Vec<i64> = source.iter().map(|v| v.wrapping_mul(3)).collect();
            let out = reconcile(&target, &source, &[Column::from(payload)], &Fill::Value(Scalar::I64(-1))).unwrap();
            prop_assert!(out.matched.iter().all(|&m| m));
            prop_assert_eq!(&out.ids, &target);
            let expected: Vec<i64> = target.iter().map(|v| v.wrapping_mul(3)).collect();
            prop_assert_eq!(out.columns[0].data.as_i64().unwrap(), &expected[..]);
        }

        #[test]
        fn fill_law(source in proptest::collection::hash_set(0i64..500, 0..100), target in proptest::collection::vec(0i64..500, 0..100)) {
            let source: Vec<i64> = source.into_iter().collect();
            let col = Column::from(source.iter().map(|&v| v as f64).collect::<Vec<f64>>());
            let fill = Fill::with(|_, row, id| Scalar::F64(-(row as f64) - id as f64 * 1e-3 - 1.0));
            let out = reconcile(&target, &source, &[col], &fill).unwrap();
            let data = out.columns[0].data.as_f64().unwrap();
            for (row, &id) in target.iter().enumerate() {
                if source.contains(&id) {
                    prop_assert!(out.matched[row]);
                    prop_assert_eq!(data[row], id as f64);
                } else {
                    prop_assert!(!out.matched[row]);
                    prop_assert_eq!(data[row], -(row as f64) - id as f64 * 1e-3 - 1.0);
                }
            }
        }
    }
}
