//! Table: the schema and row store the view engine reads from.
//!
//! A table is an ordered list of fields, one typed [`Column`] per field and
//! a physical row order that follows row creation (and therefore row id).
//! Each row also carries a fractional `order` key used for manual ordering;
//! queries return rows by `(order, id)` unless a view sorts them.
//!
//! Reads that stand for a database round trip ([`Table::query`],
//! [`Table::query_rows`]) are counted, so callers can assert how many
//! queries an operation costs.
//!
//! # Example
//!
//! ```
//! use tableview::{Field, FieldType, FieldValue, Table};
//!
//! let mut table = Table::new(1, 1, "Customers");
//! table.add_field(Field { id: 10, table_id: 1, name: "Name".into(), field_type: FieldType::Text, primary: true }).unwrap();
//! let row_id = table.create_row(vec![(10, FieldValue::text("Ada"))]).unwrap();
//!
//! let rows = table.query(&table.full_model());
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows.rows()[0].id, row_id);
//! assert_eq!(table.query_count(), 1);
//! ```

use crate::changeset::{Changeset, TableChange};
use crate::column::Column;
use crate::error::{Result, ViewError};
use crate::field::{compare_values, validate_value, Field, FieldId, FieldType, FieldValue};
use crate::sequence::TieredSequence;
use crate::view::AggregationType;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

pub type TableId = u64;
pub type RowId = u64;
pub type WorkspaceId = u64;

pub type SharedTable = Arc<RwLock<Table>>;

static NULL_VALUE: FieldValue = FieldValue::Null;

/// A row as returned by a query: only the fields of the query's model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub id: RowId,
    pub order: Decimal,
    pub values: BTreeMap<FieldId, FieldValue>,
}

impl Row {
    /// Value of a field, `Null` when the field is not part of the row.
    pub fn value(&self, field_id: FieldId) -> &FieldValue {
        self.values.get(&field_id).unwrap_or(&NULL_VALUE)
    }

    /// Default ordering of rows: `(order, id)`.
    pub fn cmp_order(&self, other: &Row) -> Ordering {
        self.order.cmp(&other.order).then_with(|| self.id.cmp(&other.id))
    }
}

/// Projection of a table onto a subset of its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RowModel {
    table_id: TableId,
    fields: Vec<Field>,
}

impl RowModel {
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, field_id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == field_id)
    }

    pub fn contains(&self, field_id: FieldId) -> bool {
        self.field(field_id).is_some()
    }

    /// Field of the model, or a configuration error naming it.
    pub fn require(&self, field_id: FieldId) -> Result<&Field> {
        self.field(field_id)
            .ok_or(ViewError::FieldNotInProjection(field_id))
    }

    pub fn field_ids(&self) -> Vec<FieldId> {
        self.fields.iter().map(|field| field.id).collect()
    }
}

/// Rows produced by a query, together with the model they were read
/// through and the table version they reflect.
#[derive(Debug, Clone)]
pub struct RowSet {
    model: RowModel,
    version: u64,
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new(model: RowModel, version: u64, rows: Vec<Row>) -> Self {
        RowSet {
            model,
            version,
            rows,
        }
    }

    pub fn model(&self) -> &RowModel {
        &self.model
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|row| row.id).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Same model and version, different rows.
    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        RowSet { rows, ..self }
    }

    pub fn retain<F: FnMut(&Row) -> bool>(mut self, keep: F) -> Self {
        self.rows.retain(keep);
        self
    }

    /// Computes a footer aggregation over one field of the rows.
    pub fn aggregate(
        &self,
        field_id: FieldId,
        aggregation: AggregationType,
        collation: Option<&str>,
    ) -> Result<FieldValue> {
        let field = self.model.require(field_id)?;
        if !aggregation.is_compatible_with(field.kind()) {
            return Err(ViewError::AggregationTypeNotSupported {
                aggregation: aggregation.name().to_string(),
                field_id,
            });
        }
        let values = self.rows.iter().map(|row| row.value(field_id));
        let result = match aggregation {
            AggregationType::EmptyCount => {
                FieldValue::number(values.filter(|v| v.is_empty()).count() as i64)
            }
            AggregationType::NotEmptyCount => {
                FieldValue::number(values.filter(|v| !v.is_empty()).count() as i64)
            }
            AggregationType::UniqueCount => {
                let unique: HashSet<String> = values
                    .filter(|v| !v.is_empty())
                    .map(|v| v.text_repr(&field.field_type))
                    .collect();
                FieldValue::number(unique.len() as i64)
            }
            AggregationType::Sum => FieldValue::Number(
                values.filter_map(FieldValue::as_number).sum::<Decimal>(),
            ),
            AggregationType::Average => {
                let numbers: Vec<Decimal> = values.filter_map(FieldValue::as_number).collect();
                if numbers.is_empty() {
                    FieldValue::Null
                } else {
                    let total: Decimal = numbers.iter().sum();
                    FieldValue::Number(total / Decimal::from(numbers.len() as u64))
                }
            }
            AggregationType::Min | AggregationType::Max => {
                let mut best: Option<&FieldValue> = None;
                for value in values.filter(|v| !v.is_null()) {
                    let replace = match best {
                        None => true,
                        Some(current) => {
                            let ordering = compare_values(
                                &field.field_type,
                                value,
                                current,
                                collation,
                            );
                            if aggregation == AggregationType::Min {
                                ordering == Ordering::Less
                            } else {
                                ordering == Ordering::Greater
                            }
                        }
                    };
                    if replace {
                        best = Some(value);
                    }
                }
                best.cloned().unwrap_or(FieldValue::Null)
            }
        };
        Ok(result)
    }
}

pub struct Table {
    id: TableId,
    workspace_id: WorkspaceId,
    name: String,
    fields: Vec<Field>,
    columns: HashMap<FieldId, Column>,
    /// Physical row order; ascending because rows are only appended.
    row_ids: TieredSequence<RowId>,
    orders: TieredSequence<Decimal>,
    next_row_id: RowId,
    changeset: Changeset,
    queries: AtomicU64,
}

impl Table {
    pub fn new(id: TableId, workspace_id: WorkspaceId, name: &str) -> Self {
        Self::with_changeset_capacity(id, workspace_id, name, 10_000)
    }

    pub fn with_changeset_capacity(
        id: TableId,
        workspace_id: WorkspaceId,
        name: &str,
        capacity: usize,
    ) -> Self {
        Table {
            id,
            workspace_id,
            name: name.to_string(),
            fields: Vec::new(),
            columns: HashMap::new(),
            row_ids: TieredSequence::new(),
            orders: TieredSequence::new(),
            next_row_id: 1,
            changeset: Changeset::new(capacity),
            queries: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    pub fn changeset(&self) -> &Changeset {
        &self.changeset
    }

    pub fn version(&self) -> u64 {
        self.changeset.version()
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(AtomicOrdering::Relaxed)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, AtomicOrdering::Relaxed);
    }

    fn count_query(&self) {
        self.queries.fetch_add(1, AtomicOrdering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, field_id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == field_id)
    }

    pub fn require_field(&self, field_id: FieldId) -> Result<&Field> {
        self.field(field_id).ok_or(ViewError::FieldNotInTable {
            field_id,
            table_id: self.id,
        })
    }

    pub fn add_field(&mut self, field: Field) -> Result<()> {
        if field.table_id != self.id {
            return Err(ViewError::FieldNotInTable {
                field_id: field.id,
                table_id: self.id,
            });
        }
        if self.field(field.id).is_some() {
            return Err(ViewError::InvalidValue(format!(
                "field {} already exists in table {}",
                field.id, self.id
            )));
        }
        let column = Column::with_len(field.id, field.field_type.clone(), self.len())?;
        self.columns.insert(field.id, column);
        self.changeset
            .push(TableChange::SchemaChanged { field_id: field.id });
        self.fields.push(field);
        Ok(())
    }

    /// Changes a field's type, converting its stored values. Returns the
    /// field as it was before.
    pub fn change_field_type(&mut self, field_id: FieldId, field_type: FieldType) -> Result<Field> {
        let position = self
            .fields
            .iter()
            .position(|field| field.id == field_id)
            .ok_or(ViewError::FieldDoesNotExist(field_id))?;
        let previous = self.fields[position].clone();
        if let Some(column) = self.columns.get_mut(&field_id) {
            column.convert_to(field_type.clone());
        }
        self.fields[position].field_type = field_type;
        self.changeset.push(TableChange::SchemaChanged { field_id });
        Ok(previous)
    }

    pub fn remove_field(&mut self, field_id: FieldId) -> Result<Field> {
        let position = self
            .fields
            .iter()
            .position(|field| field.id == field_id)
            .ok_or(ViewError::FieldDoesNotExist(field_id))?;
        self.columns.remove(&field_id);
        self.changeset.push(TableChange::SchemaChanged { field_id });
        Ok(self.fields.remove(position))
    }

    /// Projection onto `field_ids`, in table field order.
    pub fn model(&self, field_ids: &[FieldId]) -> Result<RowModel> {
        for field_id in field_ids {
            self.require_field(*field_id)?;
        }
        Ok(RowModel {
            table_id: self.id,
            fields: self
                .fields
                .iter()
                .filter(|field| field_ids.contains(&field.id))
                .cloned()
                .collect(),
        })
    }

    pub fn full_model(&self) -> RowModel {
        RowModel {
            table_id: self.id,
            fields: self.fields.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    fn position_of(&self, row_id: RowId) -> Result<usize> {
        let position = self.row_ids.partition_point(|id| *id < row_id);
        match self.row_ids.get(position) {
            Some(id) if *id == row_id => Ok(position),
            _ => Err(ViewError::InvalidValue(format!(
                "row {} does not exist in table {}",
                row_id, self.id
            ))),
        }
    }

    pub fn contains_row(&self, row_id: RowId) -> bool {
        self.position_of(row_id).is_ok()
    }

    fn next_order(&self) -> Decimal {
        self.orders
            .iter()
            .max()
            .map(|max| max.floor() + Decimal::ONE)
            .unwrap_or(Decimal::ONE)
    }

    /// Creates a row after every existing one in manual order.
    pub fn create_row(&mut self, values: Vec<(FieldId, FieldValue)>) -> Result<RowId> {
        let order = self.next_order();
        self.create_row_with_order(values, order)
    }

    pub fn create_row_with_order(
        &mut self,
        values: Vec<(FieldId, FieldValue)>,
        order: Decimal,
    ) -> Result<RowId> {
        let mut provided: HashMap<FieldId, FieldValue> = HashMap::new();
        for (field_id, value) in values {
            let field = self.require_field(field_id)?;
            let value = validate_value(&field.field_type, value)?;
            provided.insert(field_id, value);
        }
        for field in &self.fields {
            if let Some(column) = self.columns.get_mut(&field.id) {
                let value = provided.remove(&field.id).unwrap_or(FieldValue::Null);
                column.push(value)?;
            }
        }
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.row_ids.push(row_id);
        self.orders.push(order);
        self.changeset.push(TableChange::RowCreated { row_id });
        Ok(row_id)
    }

    pub fn update_row(&mut self, row_id: RowId, values: Vec<(FieldId, FieldValue)>) -> Result<()> {
        let position = self.position_of(row_id)?;
        let mut validated = Vec::with_capacity(values.len());
        for (field_id, value) in values {
            let field = self.require_field(field_id)?;
            validated.push((field_id, validate_value(&field.field_type, value)?));
        }
        let mut updated = Vec::with_capacity(validated.len());
        for (field_id, value) in validated {
            if let Some(column) = self.columns.get_mut(&field_id) {
                column.set(position, value)?;
                updated.push(field_id);
            }
        }
        self.changeset.push(TableChange::RowUpdated {
            row_id,
            field_ids: updated,
        });
        Ok(())
    }

    pub fn set_row_order(&mut self, row_id: RowId, order: Decimal) -> Result<()> {
        let position = self.position_of(row_id)?;
        self.orders.set(position, order)?;
        self.changeset.push(TableChange::RowMoved { row_id });
        Ok(())
    }

    pub fn delete_row(&mut self, row_id: RowId) -> Result<()> {
        let position = self.position_of(row_id)?;
        for column in self.columns.values_mut() {
            column.remove(position)?;
        }
        self.row_ids.remove(position)?;
        self.orders.remove(position)?;
        self.changeset.push(TableChange::RowDeleted { row_id });
        Ok(())
    }

    fn read_row(&self, position: usize, model: &RowModel) -> Option<Row> {
        let id = *self.row_ids.get(position)?;
        let order = *self.orders.get(position)?;
        let values = model
            .fields
            .iter()
            .filter_map(|field| {
                let column = self.columns.get(&field.id)?;
                Some((field.id, column.get(position)?.clone()))
            })
            .collect();
        Some(Row { id, order, values })
    }

    /// Reads one row without counting a query. Used by index maintenance,
    /// which works on the table it already holds.
    pub fn row(&self, row_id: RowId, model: &RowModel) -> Result<Row> {
        let position = self.position_of(row_id)?;
        self.read_row(position, model)
            .ok_or(ViewError::IndexOutOfRange {
                index: position,
                len: self.len(),
            })
    }

    /// All rows through `model`, ordered by `(order, id)`.
    pub fn query(&self, model: &RowModel) -> RowSet {
        self.count_query();
        let mut rows: Vec<Row> = (0..self.len())
            .filter_map(|position| self.read_row(position, model))
            .collect();
        rows.sort_by(Row::cmp_order);
        RowSet::new(model.clone(), self.version(), rows)
    }

    /// The given rows through `model`, ordered by `(order, id)`. Ids that do
    /// not exist are skipped.
    pub fn query_rows(&self, model: &RowModel, row_ids: &[RowId]) -> RowSet {
        self.count_query();
        let mut rows: Vec<Row> = row_ids
            .iter()
            .filter_map(|row_id| self.position_of(*row_id).ok())
            .filter_map(|position| self.read_row(position, model))
            .collect();
        rows.sort_by(Row::cmp_order);
        rows.dedup_by_key(|row| row.id);
        RowSet::new(model.clone(), self.version(), rows)
    }

    /// Copy of this table under new ids. Row ids and order keys are kept;
    /// `field_ids` maps every source field id to its new id.
    pub fn duplicate(
        &self,
        id: TableId,
        name: &str,
        field_ids: &HashMap<FieldId, FieldId>,
    ) -> Result<Table> {
        let mut copy = Table::new(id, self.workspace_id, name);
        for field in &self.fields {
            let new_id = *field_ids
                .get(&field.id)
                .ok_or(ViewError::FieldDoesNotExist(field.id))?;
            let mut new_field = field.clone();
            new_field.id = new_id;
            new_field.table_id = id;
            if let Some(column) = self.columns.get(&field.id) {
                let mut new_column = Column::new(new_id, field.field_type.clone());
                for value in column.iter() {
                    new_column.push(value.clone())?;
                }
                copy.columns.insert(new_id, new_column);
            }
            copy.fields.push(new_field);
        }
        copy.row_ids = self.row_ids.clone();
        copy.orders = self.orders.clone();
        copy.next_row_id = self.next_row_id;
        Ok(copy)
    }

    pub fn into_shared(self) -> SharedTable {
        Arc::new(RwLock::new(self))
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("rows", &self.len())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn text_field(id: FieldId, table_id: TableId) -> Field {
        Field {
            id,
            table_id,
            name: format!("Field {}", id),
            field_type: FieldType::Text,
            primary: false,
        }
    }

    fn sample_table() -> Table {
        let mut table = Table::new(1, 1, "Sample");
        table.add_field(text_field(1, 1)).unwrap();
        table
            .add_field(Field {
                id: 2,
                table_id: 1,
                name: "Amount".into(),
                field_type: FieldType::number(),
                primary: false,
            })
            .unwrap();
        table
    }

    #[test]
    fn test_create_and_query_rows() {
        let mut table = sample_table();
        let first = table
            .create_row(vec![(1, FieldValue::text("a")), (2, FieldValue::number(3))])
            .unwrap();
        let second = table.create_row(vec![(1, FieldValue::text("b"))]).unwrap();
        assert_eq!(table.len(), 2);

        let rows = table.query(&table.full_model());
        assert_eq!(rows.ids(), vec![first, second]);
        assert_eq!(rows.rows()[1].value(2), &FieldValue::Null);
        assert_eq!(rows.rows()[0].order, Decimal::ONE);
        assert_eq!(rows.rows()[1].order, Decimal::from(2));
    }

    #[test]
    fn test_query_follows_order_key() {
        let mut table = sample_table();
        let first = table.create_row(vec![]).unwrap();
        let second = table.create_row(vec![]).unwrap();
        table.set_row_order(second, Decimal::new(5, 1)).unwrap();
        assert_eq!(table.query(&table.full_model()).ids(), vec![second, first]);
    }

    #[test]
    fn test_update_and_delete() {
        let mut table = sample_table();
        let a = table.create_row(vec![(1, FieldValue::text("a"))]).unwrap();
        let b = table.create_row(vec![(1, FieldValue::text("b"))]).unwrap();
        table.update_row(a, vec![(1, FieldValue::text("z"))]).unwrap();
        table.delete_row(b).unwrap();
        let rows = table.query(&table.full_model());
        assert_eq!(rows.ids(), vec![a]);
        assert_eq!(rows.rows()[0].value(1), &FieldValue::text("z"));
        assert!(table.delete_row(b).is_err());
        assert!(table.update_row(a, vec![(99, FieldValue::Null)]).is_err());
    }

    #[test]
    fn test_model_projection() {
        let table = sample_table();
        let model = table.model(&[2]).unwrap();
        assert!(model.contains(2));
        assert!(!model.contains(1));
        assert!(matches!(
            model.require(1),
            Err(ViewError::FieldNotInProjection(1))
        ));
        assert!(matches!(
            table.model(&[5]),
            Err(ViewError::FieldNotInTable { field_id: 5, .. })
        ));
    }

    #[test]
    fn test_add_field_to_existing_rows_and_change_type() {
        let mut table = sample_table();
        let row = table.create_row(vec![(1, FieldValue::text("12"))]).unwrap();
        table
            .add_field(Field {
                id: 3,
                table_id: 1,
                name: "Done".into(),
                field_type: FieldType::Boolean,
                primary: false,
            })
            .unwrap();
        let model = table.full_model();
        assert_eq!(table.row(row, &model).unwrap().value(3), &FieldValue::Boolean(false));

        let version = table.version();
        table.change_field_type(1, FieldType::number()).unwrap();
        assert_eq!(table.version(), version + 1);
        let model = table.full_model();
        assert_eq!(table.row(row, &model).unwrap().value(1), &FieldValue::number(12));

        assert!(table.add_field(text_field(4, 2)).is_err());
        assert!(table.add_field(text_field(1, 1)).is_err());
    }

    #[test]
    fn test_query_count_and_query_rows() {
        let mut table = sample_table();
        let ids: Vec<RowId> = (0..5).map(|_| table.create_row(vec![]).unwrap()).collect();
        table.reset_query_count();
        let subset = table.query_rows(&table.full_model(), &[ids[3], ids[1], 999]);
        assert_eq!(subset.ids(), vec![ids[1], ids[3]]);
        assert_eq!(table.query_count(), 1);
        table.row(ids[0], &table.full_model()).unwrap();
        assert_eq!(table.query_count(), 1);
    }

    #[test]
    fn test_duplicate() {
        let mut table = sample_table();
        table.create_row(vec![(1, FieldValue::text("x"))]).unwrap();
        let mapping: HashMap<FieldId, FieldId> = [(1, 11), (2, 12)].into_iter().collect();
        let copy = table.duplicate(2, "Copy", &mapping).unwrap();
        assert_eq!(copy.id(), 2);
        assert_eq!(copy.field(11).unwrap().table_id, 2);
        let rows = copy.query(&copy.full_model());
        assert_eq!(rows.rows()[0].value(11), &FieldValue::text("x"));
    }

    #[test]
    fn test_aggregations() {
        let mut table = sample_table();
        for (text, amount) in [("a", Some(4)), ("a", Some(6)), ("", None)] {
            let mut values = vec![(1, FieldValue::text(text))];
            if let Some(amount) = amount {
                values.push((2, FieldValue::number(amount)));
            }
            table.create_row(values).unwrap();
        }
        let rows = table.query(&table.full_model());
        assert_eq!(
            rows.aggregate(2, AggregationType::Sum, None).unwrap(),
            FieldValue::number(10)
        );
        assert_eq!(
            rows.aggregate(2, AggregationType::Average, None).unwrap(),
            FieldValue::number(5)
        );
        assert_eq!(
            rows.aggregate(2, AggregationType::Max, None).unwrap(),
            FieldValue::number(6)
        );
        assert_eq!(
            rows.aggregate(1, AggregationType::EmptyCount, None).unwrap(),
            FieldValue::number(1)
        );
        assert_eq!(
            rows.aggregate(1, AggregationType::UniqueCount, None).unwrap(),
            FieldValue::number(1)
        );
        assert!(rows.aggregate(1, AggregationType::Sum, None).is_err());
    }
}
