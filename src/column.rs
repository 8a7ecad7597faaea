//! Typed column storage.
//!
//! A Column holds the values of one field for every row of a table, in the
//! table's physical row order. Every write goes through the field type's
//! validation, so a column never contains a value its type can not hold.

use crate::error::Result;
use crate::field::{convert_value, validate_value, FieldId, FieldType, FieldValue};
use crate::sequence::TieredSequence;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Column {
    field_id: FieldId,
    field_type: FieldType,
    values: TieredSequence<FieldValue>,
}

impl Column {
    pub fn new(field_id: FieldId, field_type: FieldType) -> Self {
        Column {
            field_id,
            field_type,
            values: TieredSequence::new(),
        }
    }

    /// Column of `len` empty values, used when a field is added to a table
    /// that already has rows.
    pub fn with_len(field_id: FieldId, field_type: FieldType, len: usize) -> Result<Self> {
        let empty = validate_value(&field_type, FieldValue::Null)?;
        Ok(Column {
            field_id,
            field_type,
            values: TieredSequence::from_vec(vec![empty; len]),
        })
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn validate_value(&self, value: FieldValue) -> Result<FieldValue> {
        validate_value(&self.field_type, value)
    }

    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    /// Numeric access for aggregations; `None` for empty or non-numeric cells.
    #[inline]
    pub fn get_number(&self, index: usize) -> Option<Decimal> {
        self.values.get(index).and_then(FieldValue::as_number)
    }

    /// Replaces the value at `index`, returning the previous one.
    pub fn set(&mut self, index: usize, value: FieldValue) -> Result<FieldValue> {
        let value = self.validate_value(value)?;
        let previous = self
            .values
            .get(index)
            .cloned()
            .unwrap_or(FieldValue::Null);
        self.values.set(index, value)?;
        Ok(previous)
    }

    pub fn push(&mut self, value: FieldValue) -> Result<()> {
        let value = self.validate_value(value)?;
        self.values.push(value);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<FieldValue> {
        self.values.remove(index)
    }

    /// Changes the column's type, converting every stored value.
    pub fn convert_to(&mut self, field_type: FieldType) {
        let converted: TieredSequence<FieldValue> = self
            .values
            .iter()
            .map(|value| convert_value(&self.field_type, &field_type, value.clone()))
            .collect();
        self.values = converted;
        self.field_type = field_type;
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldValue> + '_ {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_push_and_get() {
        let mut col = Column::new(1, FieldType::Text);
        col.push(FieldValue::text("a")).unwrap();
        col.push(FieldValue::Null).unwrap();
        assert_eq!(col.len(), 2);
        assert_eq!(col.get(0), Some(&FieldValue::text("a")));
        assert_eq!(col.get(1), Some(&FieldValue::Null));
        assert!(col.push(FieldValue::Boolean(true)).is_err());
    }

    #[test]
    fn test_column_set_returns_previous() {
        let mut col = Column::new(2, FieldType::number());
        col.push(FieldValue::number(1)).unwrap();
        let previous = col.set(0, FieldValue::text("7")).unwrap();
        assert_eq!(previous, FieldValue::number(1));
        assert_eq!(col.get_number(0), Some(Decimal::from(7)));
        assert!(col.set(3, FieldValue::number(1)).is_err());
    }

    #[test]
    fn test_with_len_fills_type_defaults() {
        let col = Column::with_len(3, FieldType::Boolean, 3).unwrap();
        assert!(col.iter().all(|value| *value == FieldValue::Boolean(false)));
    }

    #[test]
    fn test_convert_to() {
        let mut col = Column::new(4, FieldType::Text);
        col.push(FieldValue::text("12")).unwrap();
        col.push(FieldValue::text("twelve")).unwrap();
        col.convert_to(FieldType::number());
        assert_eq!(col.get(0), Some(&FieldValue::number(12)));
        assert_eq!(col.get(1), Some(&FieldValue::Null));
        assert_eq!(col.field_type(), &FieldType::number());
    }
}
