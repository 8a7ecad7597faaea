//! Sort Engine.
//!
//! Compiles a view's sorts into an [`OrderSpec`]: a list of [`SortKey`]s
//! applied as successive tie-breaks, followed by the rows' manual
//! `(order, id)` key so the ordering is always total.
//!
//! Empty cells follow the database convention: last when ascending, first
//! when descending. The direction of a key reverses the value comparison
//! only; the final tie-break is never reversed.

use crate::error::{Result, ViewError};
use crate::field::{compare_values, FieldId, FieldType, FieldValue};
use crate::table::{Row, RowModel, RowSet};
use crate::view::{SortOrder, View};
use std::cmp::Ordering;

/// One sort key over a field of the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field_id: FieldId,
    pub field_type: FieldType,
    pub order: SortOrder,
    /// Whether empty cells come before every value.
    pub nulls_first: bool,
}

impl SortKey {
    pub fn new(field_id: FieldId, field_type: FieldType, order: SortOrder) -> Self {
        SortKey {
            field_id,
            field_type,
            order,
            nulls_first: order == SortOrder::Descending,
        }
    }

    fn compare(&self, a: &Row, b: &Row, collation: Option<&str>) -> Ordering {
        let left = a.value(self.field_id);
        let right = b.value(self.field_id);
        match (left, right) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Null, _) => {
                if self.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (_, FieldValue::Null) => {
                if self.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (left, right) => {
                let ordering = compare_values(&self.field_type, left, right, collation);
                match self.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            }
        }
    }
}

/// A compiled, total row ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    keys: Vec<SortKey>,
    collation: Option<String>,
}

impl OrderSpec {
    pub fn new(keys: Vec<SortKey>, collation: Option<String>) -> Self {
        OrderSpec { keys, collation }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn collation(&self) -> Option<&str> {
        self.collation.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn field_ids(&self) -> Vec<FieldId> {
        self.keys.iter().map(|key| key.field_id).collect()
    }

    /// Compares two rows on the sort keys only.
    pub fn compare_keys(&self, a: &Row, b: &Row) -> Ordering {
        let collation = self.collation();
        self.keys
            .iter()
            .map(|key| key.compare(a, b, collation))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// Full ordering: the sort keys, then `(order, id)`.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        self.compare_keys(a, b).then_with(|| a.cmp_order(b))
    }

    pub fn apply(&self, rows: RowSet) -> RowSet {
        let mut sorted = rows.rows().to_vec();
        sorted.sort_by(|a, b| self.compare(a, b));
        rows.with_rows(sorted)
    }
}

/// Compiles the sorts of `view` against `model`.
pub fn compile(view: &View, model: &RowModel, collation: Option<&str>) -> Result<OrderSpec> {
    let mut keys = Vec::with_capacity(view.sorts.len());
    for sort in &view.sorts {
        let field = model.require(sort.field_id)?;
        if !field.kind().can_order() {
            return Err(ViewError::ViewSortFieldNotSupported(field.id));
        }
        keys.push(SortKey::new(field.id, field.field_type.clone(), sort.order));
    }
    Ok(OrderSpec::new(keys, collation.map(str::to_string)))
}
