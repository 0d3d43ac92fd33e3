//! Row-level change descriptions between two versions of one table.
//!
//! Change-sets are computed by a keyed snapshot diff: rows carry stable keys
//! ([`RowKey`](crate::RowKey)), so the description of what happened between
//! two versions is a pure function of the two snapshots. Deletion indices
//! refer to the *from* snapshot; insertion and modification indices refer to
//! the *to* snapshot.

use std::collections::BTreeSet;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::group::{Group, TableData};
use crate::value::Value;

/// Per-row set of modified column indices.
pub(crate) type ColumnSet = SmallVec<[usize; 4]>;

/// Compact description of row-level differences for one table.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Indices (in the new snapshot) of rows that were inserted.
    pub insertions: BTreeSet<usize>,
    /// Indices (in the old snapshot) of rows that were deleted.
    pub deletions: BTreeSet<usize>,
    /// Indices (in the new snapshot) of rows whose values changed.
    pub modifications: BTreeSet<usize>,
    /// For each modified row, the indices of the columns that changed.
    pub columns_modified: FxHashMap<usize, SmallVec<[usize; 4]>>,
}

impl ChangeSet {
    /// Whether no rows of the table changed between the two versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }
}

/// The change description for one table inside a [`ChangeTracker`].
#[derive(Debug, Default)]
pub struct TableChange {
    changes: ChangeSet,
}

impl TableChange {
    /// Whether this table did not change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Consumes the entry, yielding its change-set.
    #[must_use]
    pub fn finalize(self) -> ChangeSet {
        self.changes
    }
}

/// Per-table change accumulator populated by
/// [`Database::advance_read`](crate::Database::advance_read).
///
/// After an advance the tracker holds exactly one entry per table of the
/// target group, in the group's table order.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    tables: Vec<TableChange>,
}

impl ChangeTracker {
    /// Creates a tracker that records changes for every table.
    #[must_use]
    pub fn track_all() -> Self {
        Self::default()
    }

    /// The accumulated entries, one per table of the target group.
    #[must_use]
    pub fn tables(&self) -> &[TableChange] {
        &self.tables
    }

    /// Consumes the tracker, yielding its entries.
    #[must_use]
    pub fn into_tables(self) -> Vec<TableChange> {
        self.tables
    }

    pub(crate) fn populate(&mut self, old: &Group, new: &Group) {
        self.tables = diff_groups(old, new)
            .into_iter()
            .map(|changes| TableChange { changes })
            .collect();
    }
}

/// Diffs two snapshots, producing one [`ChangeSet`] per table of `new`.
///
/// A table absent from `old` reports all of its rows as insertions.
pub(crate) fn diff_groups(old: &Group, new: &Group) -> Vec<ChangeSet> {
    new.tables()
        .iter()
        .map(|table| diff_table(old.table_by_name(table.name()), table))
        .collect()
}

fn diff_table(old: Option<&TableData>, new: &TableData) -> ChangeSet {
    let mut changes = ChangeSet::default();

    let Some(old) = old else {
        changes.insertions = (0..new.len()).collect();
        return changes;
    };

    let old_index: FxHashMap<u64, usize> = (0..old.len())
        .filter_map(|i| old.row_key(i).map(|k| (k, i)))
        .collect();

    let mut seen = BTreeSet::new();
    for new_idx in 0..new.len() {
        let Some(key) = new.row_key(new_idx) else {
            continue;
        };
        match old_index.get(&key) {
            None => {
                changes.insertions.insert(new_idx);
            }
            Some(&old_idx) => {
                seen.insert(old_idx);
                let cols = changed_columns(old, old_idx, new, new_idx);
                if !cols.is_empty() {
                    changes.modifications.insert(new_idx);
                    changes.columns_modified.insert(new_idx, cols);
                }
            }
        }
    }

    for old_idx in 0..old.len() {
        if !seen.contains(&old_idx) {
            changes.deletions.insert(old_idx);
        }
    }

    changes
}

/// Columns of `new[new_idx]` that differ from `old[old_idx]`.
///
/// Columns added since `old` count as modified only when their value differs
/// from the column-type default (additive schema changes alone do not dirty
/// every row).
fn changed_columns(
    old: &TableData,
    old_idx: usize,
    new: &TableData,
    new_idx: usize,
) -> ColumnSet {
    let mut cols = ColumnSet::new();
    for (col, def) in new.columns().iter().enumerate() {
        let new_value = new.get(new_idx, col);
        let differs = match old.column_index(&def.name) {
            Some(old_col) => old.get(old_idx, old_col) != new_value,
            None => new_value != Some(&Value::default_for(&def.ty)),
        };
        if differs {
            cols.push(col);
        }
    }
    cols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::value::ColumnType;

    fn group_with_rows(values: &[i64]) -> Group {
        let mut group = Group::default();
        group
            .ensure_table("T", &[ColumnDef::new("v", ColumnType::Int)])
            .unwrap();
        let table = group.table_mut("T").unwrap();
        for v in values {
            let row = table.insert_row();
            table.set(row, 0, Value::Int(*v)).unwrap();
        }
        group
    }

    // --- Diff tests ---

    #[test]
    fn test_diff_identical_groups_is_empty() {
        let group = group_with_rows(&[1, 2, 3]);
        let diffs = diff_groups(&group, &group.clone());
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].is_empty());
    }

    #[test]
    fn test_diff_insertion() {
        let old = group_with_rows(&[1, 2]);
        let mut new = old.clone();
        let table = new.table_mut("T").unwrap();
        let row = table.insert_row();
        table.set(row, 0, Value::Int(3)).unwrap();

        let diffs = diff_groups(&old, &new);
        assert_eq!(diffs[0].insertions, BTreeSet::from([2]));
        assert!(diffs[0].deletions.is_empty());
        assert!(diffs[0].modifications.is_empty());
    }

    #[test]
    fn test_diff_deletion_uses_old_indices() {
        let old = group_with_rows(&[1, 2, 3]);
        let mut new = old.clone();
        new.table_mut("T").unwrap().remove_row(1).unwrap();

        let diffs = diff_groups(&old, &new);
        assert_eq!(diffs[0].deletions, BTreeSet::from([1]));
        assert!(diffs[0].insertions.is_empty());
        assert!(diffs[0].modifications.is_empty());
    }

    #[test]
    fn test_diff_modification_tracks_columns() {
        let old = group_with_rows(&[1, 2]);
        let mut new = old.clone();
        new.table_mut("T")
            .unwrap()
            .set(1, 0, Value::Int(20))
            .unwrap();

        let diffs = diff_groups(&old, &new);
        assert_eq!(diffs[0].modifications, BTreeSet::from([1]));
        assert_eq!(diffs[0].columns_modified[&1].as_slice(), &[0]);
    }

    #[test]
    fn test_diff_delete_then_modify_shifted_row() {
        let old = group_with_rows(&[1, 2, 3]);
        let mut new = old.clone();
        let table = new.table_mut("T").unwrap();
        table.remove_row(0).unwrap();
        table.set(1, 0, Value::Int(30)).unwrap(); // key 2, now at index 1

        let diffs = diff_groups(&old, &new);
        assert_eq!(diffs[0].deletions, BTreeSet::from([0]));
        assert_eq!(diffs[0].modifications, BTreeSet::from([1]));
    }

    #[test]
    fn test_diff_new_table_is_all_insertions() {
        let old = Group::default();
        let new = group_with_rows(&[1, 2]);
        let diffs = diff_groups(&old, &new);
        assert_eq!(diffs[0].insertions, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_diff_added_column_with_default_is_clean() {
        let old = group_with_rows(&[1]);
        let mut new = old.clone();
        new.table_mut("T")
            .unwrap()
            .add_column(ColumnDef::new("label", ColumnType::String))
            .unwrap();

        let diffs = diff_groups(&old, &new);
        assert!(diffs[0].is_empty());
    }

    #[test]
    fn test_diff_added_column_with_value_is_modification() {
        let old = group_with_rows(&[1]);
        let mut new = old.clone();
        let table = new.table_mut("T").unwrap();
        table
            .add_column(ColumnDef::new("label", ColumnType::String))
            .unwrap();
        table.set(0, 1, Value::String("x".into())).unwrap();

        let diffs = diff_groups(&old, &new);
        assert_eq!(diffs[0].modifications, BTreeSet::from([0]));
        assert_eq!(diffs[0].columns_modified[&0].as_slice(), &[1]);
    }

    // --- Tracker tests ---

    #[test]
    fn test_tracker_one_entry_per_table() {
        let old = group_with_rows(&[1]);
        let mut new = old.clone();
        new.ensure_table("U", &[]).unwrap();

        let mut tracker = ChangeTracker::track_all();
        tracker.populate(&old, &new);
        assert_eq!(tracker.tables().len(), 2);
        assert!(tracker.tables()[0].is_empty());
        assert!(tracker.tables()[1].is_empty());
    }

    #[test]
    fn test_tracker_finalize_consumes_entry() {
        let old = group_with_rows(&[1]);
        let mut new = old.clone();
        let table = new.table_mut("T").unwrap();
        let row = table.insert_row();
        table.set(row, 0, Value::Int(2)).unwrap();

        let mut tracker = ChangeTracker::track_all();
        tracker.populate(&old, &new);
        let entries = tracker.into_tables();
        let changes: Vec<ChangeSet> = entries.into_iter().map(TableChange::finalize).collect();
        assert_eq!(changes[0].insertions, BTreeSet::from([1]));
    }
}
