//! Lookups from a cell type (by id or by name) to the module owning it.
//!
//! Every loaded module owns the half-open range that starts at its entry in
//! `intervals` and ends at the next module's start, or at the cursor for the
//! most recently loaded module. The functions here rely on `intervals` being
//! strictly increasing, which the catalog guarantees on commit.

use std::hash::BuildHasher;
use std::ops::Range;

use bimap::BiHashMap;

use crate::error::{CompositionError, Result};
use crate::schema::CellType;

/// Index of the module whose interval covers `id`.
pub fn by_type_id(intervals: &[CellType], cursor: CellType, id: CellType) -> Result<usize> {
    if id >= cursor {
        return Err(CompositionError::TypeNotFound(format!(
            "cell type id {} is out of the valid range [0, {})",
            id, cursor
        )));
    }
    // number of intervals starting at or before id
    match intervals.partition_point(|&start| start <= id) {
        0 => Err(CompositionError::TypeNotFound(format!(
            "cell type id {} precedes every loaded module",
            id
        ))),
        n => Ok(n - 1),
    }
}

/// Index of the module that registered the cell type called `name`.
pub fn by_type_name<LH, RH>(
    names: &BiHashMap<String, CellType, LH, RH>,
    intervals: &[CellType],
    cursor: CellType,
    name: &str,
) -> Result<usize>
where
    LH: BuildHasher,
    RH: BuildHasher,
{
    let id = names.get_by_left(name).ok_or_else(|| {
        CompositionError::TypeNotFound(format!("unrecognized cell type name '{}'", name))
    })?;
    by_type_id(intervals, cursor, *id)
}

/// The ids owned by the module at `index`.
pub fn interval_range(intervals: &[CellType], cursor: CellType, index: usize) -> Option<Range<CellType>> {
    let start = *intervals.get(index)?;
    let end = intervals.get(index + 1).copied().unwrap_or(cursor);
    Some(start..end)
}
