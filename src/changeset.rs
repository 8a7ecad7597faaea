//! Changeset: versioned change log of a table.
//!
//! Every mutation of a [`Table`](crate::table::Table) bumps the table version
//! and appends a [`TableChange`] stamped with it. Derived structures such as
//! materialized indexes remember the version they last synced to and replay
//! only the changes after it. The log is bounded; when a consumer falls
//! behind the retained window it must rebuild from scratch.

use crate::error::Result;
use crate::field::FieldId;
use crate::table::{RowId, Table};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    RowCreated { row_id: RowId },
    RowUpdated { row_id: RowId, field_ids: Vec<FieldId> },
    /// The manual order key of a row changed.
    RowMoved { row_id: RowId },
    RowDeleted { row_id: RowId },
    /// A field was added, removed or changed type.
    SchemaChanged { field_id: FieldId },
}

impl TableChange {
    pub fn row_id(&self) -> Option<RowId> {
        match self {
            TableChange::RowCreated { row_id }
            | TableChange::RowUpdated { row_id, .. }
            | TableChange::RowMoved { row_id }
            | TableChange::RowDeleted { row_id } => Some(*row_id),
            TableChange::SchemaChanged { .. } => None,
        }
    }

    /// Whether the change can alter an ordering over `field_ids`.
    pub fn affects_order_of(&self, field_ids: &[FieldId]) -> bool {
        match self {
            TableChange::RowUpdated { field_ids: changed, .. } => {
                changed.iter().any(|id| field_ids.contains(id))
            }
            TableChange::SchemaChanged { field_id } => field_ids.contains(field_id),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Changeset {
    entries: VecDeque<(u64, TableChange)>,
    capacity: usize,
    version: u64,
}

impl Changeset {
    pub fn new(capacity: usize) -> Self {
        Changeset {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            version: 0,
        }
    }

    /// Records a change and returns the new version.
    pub fn push(&mut self, change: TableChange) -> u64 {
        self.version += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((self.version, change));
        self.version
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes made after `version`, or `None` when some of them have
    /// already been evicted.
    pub fn since(&self, version: u64) -> Option<Vec<TableChange>> {
        if version >= self.version {
            return Some(Vec::new());
        }
        let oldest = self.entries.front().map(|(v, _)| *v)?;
        if oldest > version + 1 {
            return None;
        }
        Some(
            self.entries
                .iter()
                .filter(|(v, _)| *v > version)
                .map(|(_, change)| change.clone())
                .collect(),
        )
    }
}

/// A structure derived from a table that can follow its changes.
pub trait IncrementalView {
    /// Applies changes; returns true when the structure was modified.
    fn apply_changes(&mut self, table: &Table, changes: &[TableChange]) -> Result<bool>;

    fn last_synced_version(&self) -> u64;

    fn rebuild(&mut self, table: &Table) -> Result<()>;

    /// Replays whatever happened since the last sync, rebuilding when the
    /// log no longer reaches back far enough.
    fn catch_up(&mut self, table: &Table) -> Result<()> {
        match table.changeset().since(self.last_synced_version()) {
            Some(changes) if changes.is_empty() => Ok(()),
            Some(changes) => self.apply_changes(table, &changes).map(|_| ()),
            None => self.rebuild(table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_and_since() {
        let mut cs = Changeset::new(10);
        assert_eq!(cs.version(), 0);
        assert_eq!(cs.since(0), Some(vec![]));

        cs.push(TableChange::RowCreated { row_id: 1 });
        let v = cs.push(TableChange::RowUpdated {
            row_id: 1,
            field_ids: vec![3],
        });
        assert_eq!(v, 2);
        assert_eq!(cs.since(1).unwrap().len(), 1);
        assert_eq!(cs.since(0).unwrap().len(), 2);
    }

    #[test]
    fn test_eviction_reports_gap() {
        let mut cs = Changeset::new(2);
        for row_id in 1..=4 {
            cs.push(TableChange::RowCreated { row_id });
        }
        assert_eq!(cs.len(), 2);
        assert!(cs.since(1).is_none());
        assert_eq!(cs.since(2).unwrap().len(), 2);
    }

    #[test]
    fn test_affects_order() {
        let update = TableChange::RowUpdated {
            row_id: 1,
            field_ids: vec![5, 6],
        };
        assert!(update.affects_order_of(&[6]));
        assert!(!update.affects_order_of(&[7]));
        assert!(TableChange::RowDeleted { row_id: 1 }.affects_order_of(&[7]));
        assert!(TableChange::SchemaChanged { field_id: 6 }.affects_order_of(&[6]));
    }
}
