//! Row and array extraction with optional predicate and slice.

use arrow::array::{RecordBatch, UInt64Array};
use arrow::compute::take_record_batch;
use log::debug;
use snafu::prelude::*;

use crate::error::{ArrowSnafu, HdfError, HdfResult, InvalidPredicateSnafu, InvalidSliceSnafu};
use crate::storage::{LeafKind, LeafRef, RawBuffer, RowRange, StorageError};

/// A step-aware row slice with optional bounds.
///
/// Bounds follow the usual half-open slice rules: `start` is inclusive and
/// defaults to 0, `stop` is exclusive and defaults to the length, negative
/// bounds count from the end, and out-of-range bounds are clamped. `step`
/// defaults to 1 and must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowSlice {
    /// First row (inclusive).
    pub start: Option<i64>,
    /// End row (exclusive).
    pub stop: Option<i64>,
    /// Distance between selected rows.
    pub step: Option<i64>,
}

impl RowSlice {
    /// A slice with every bound given.
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        RowSlice {
            start: Some(start),
            stop: Some(stop),
            step: Some(step),
        }
    }

    /// Every `step`-th row.
    pub fn every(step: i64) -> Self {
        RowSlice {
            step: Some(step),
            ..RowSlice::default()
        }
    }

    /// Resolve against a sequence of `len` rows.
    pub fn resolve(&self, len: usize) -> HdfResult<RowRange> {
        let step = self.step.unwrap_or(1);
        ensure!(step > 0, InvalidSliceSnafu { step });

        let bound = |value: Option<i64>, default: usize| match value {
            None => default,
            Some(v) if v < 0 => len.saturating_sub(v.unsigned_abs() as usize),
            Some(v) => (v as u64).min(len as u64) as usize,
        };
        Ok(RowRange {
            start: bound(self.start, 0),
            stop: bound(self.stop, len),
            step: step as usize,
        })
    }
}

fn predicate_error(leaf: &LeafRef<'_>, predicate: &str, source: StorageError) -> HdfError {
    match source {
        StorageError::InvalidCondition { reason, .. } => InvalidPredicateSnafu {
            predicate,
            leaf: leaf.path(),
            reason,
        }
        .build(),
        other => other.into(),
    }
}

/// Narrow a predicate-filtered batch to the sliced positions.
fn slice_batch(batch: RecordBatch, range: RowRange) -> HdfResult<RecordBatch> {
    let len = range.len();
    if range.step <= 1 {
        return Ok(batch.slice(range.start.min(batch.num_rows()), len));
    }
    let indices = UInt64Array::from_iter_values(range.indices().map(|i| i as u64));
    take_record_batch(&batch, &indices).context(ArrowSnafu)
}

/// Read the rows of `leaf` selected by `predicate` and then `slice`.
///
/// The slice addresses positions within the predicate-filtered result, not
/// positions in the unfiltered leaf. Predicates are only valid on table
/// leaves.
pub fn extract(
    leaf: &LeafRef<'_>,
    predicate: Option<&str>,
    slice: Option<&RowSlice>,
) -> HdfResult<RawBuffer> {
    let Some(predicate) = predicate else {
        let range = match slice {
            Some(slice) => slice.resolve(leaf.nrows())?,
            None => RowRange::all(leaf.nrows()),
        };
        debug!("Reading {} rows {range:?}", leaf.path());
        return Ok(leaf.read(range)?);
    };

    ensure!(
        leaf.kind() == LeafKind::Table,
        InvalidPredicateSnafu {
            predicate,
            leaf: leaf.path(),
            reason: "predicates apply to table leaves only",
        }
    );

    let filtered = leaf
        .read_where(predicate)
        .map_err(|e| predicate_error(leaf, predicate, e))?;
    debug!(
        "Predicate {predicate:?} kept {} of {} rows of {}",
        filtered.num_rows(),
        leaf.nrows(),
        leaf.path()
    );
    let batch = match slice {
        Some(slice) => {
            let range = slice.resolve(filtered.num_rows())?;
            slice_batch(filtered, range)?
        }
        None => filtered,
    };
    Ok(RawBuffer::Table(batch))
}
