//! Field Type Registry
//!
//! Every field of a table has a [`FieldType`] drawn from a closed set. The
//! registry answers the per-type questions the rest of the engine asks:
//!
//! - which filter operators are valid ([`filter_operators`]),
//! - whether the type can be sorted on ([`FieldKind::can_order`]),
//! - how raw user input turns into a typed [`FieldValue`] ([`coerce`]),
//! - how two values of the type compare ([`compare_values`]).
//!
//! The per-type facts live in the static [`FIELD_TYPES`] table, indexed by
//! the `FieldKind` discriminant. [`validate_registry`] checks that layout once
//! at engine start.
//!
//! ```
//! use tableview::field::{coerce, FieldType, FieldValue};
//! use rust_decimal::Decimal;
//!
//! let number = FieldType::Number { decimal_places: 1, negative: false };
//! assert_eq!(coerce(&number, "2.46").unwrap(), FieldValue::Number(Decimal::new(25, 1)));
//! assert!(coerce(&number, "-1").is_err());
//! assert!(coerce(&number, "abc").is_err());
//! ```

use crate::error::{Result, ViewError};
use crate::filters::FilterOperator;
use crate::table::{RowId, TableId};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub type FieldId = u64;
pub type SelectOptionId = u64;

/// Type tag without the type-specific settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    LongText,
    Url,
    Email,
    Number,
    Boolean,
    Date,
    LinkRow,
    SingleSelect,
    MultipleSelect,
    File,
    CreatedOn,
}

#[derive(Debug)]
pub struct FieldTypeInfo {
    pub kind: FieldKind,
    pub name: &'static str,
    pub can_order: bool,
    pub read_only: bool,
}

pub const FIELD_TYPES: [FieldTypeInfo; 12] = [
    FieldTypeInfo { kind: FieldKind::Text, name: "text", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::LongText, name: "long_text", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::Url, name: "url", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::Email, name: "email", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::Number, name: "number", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::Boolean, name: "boolean", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::Date, name: "date", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::LinkRow, name: "link_row", can_order: false, read_only: false },
    FieldTypeInfo { kind: FieldKind::SingleSelect, name: "single_select", can_order: true, read_only: false },
    FieldTypeInfo { kind: FieldKind::MultipleSelect, name: "multiple_select", can_order: false, read_only: false },
    FieldTypeInfo { kind: FieldKind::File, name: "file", can_order: false, read_only: false },
    FieldTypeInfo { kind: FieldKind::CreatedOn, name: "created_on", can_order: true, read_only: true },
];

impl FieldKind {
    pub const ALL: [FieldKind; 12] = [
        FieldKind::Text,
        FieldKind::LongText,
        FieldKind::Url,
        FieldKind::Email,
        FieldKind::Number,
        FieldKind::Boolean,
        FieldKind::Date,
        FieldKind::LinkRow,
        FieldKind::SingleSelect,
        FieldKind::MultipleSelect,
        FieldKind::File,
        FieldKind::CreatedOn,
    ];

    pub fn info(self) -> &'static FieldTypeInfo {
        &FIELD_TYPES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Sort capability of the type.
    pub fn can_order(self) -> bool {
        self.info().can_order
    }

    pub fn is_read_only(self) -> bool {
        self.info().read_only
    }

    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            FieldKind::Text | FieldKind::LongText | FieldKind::Url | FieldKind::Email
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKind {
    type Err = ViewError;

    fn from_str(name: &str) -> Result<Self> {
        FIELD_TYPES
            .iter()
            .find(|info| info.name == name)
            .map(|info| info.kind)
            .ok_or_else(|| ViewError::FieldTypeDoesNotExist(name.to_string()))
    }
}

/// Checks that the static registries line up with their enums.
pub fn validate_registry() -> Result<()> {
    if FIELD_TYPES.len() != FieldKind::ALL.len() {
        return Err(ViewError::Config(
            "field type registry does not cover every field kind".to_string(),
        ));
    }
    for (position, info) in FIELD_TYPES.iter().enumerate() {
        if info.kind as usize != position || FieldKind::ALL[position] != info.kind {
            return Err(ViewError::Config(format!(
                "field type '{}' is registered at the wrong position",
                info.name
            )));
        }
    }
    FilterOperator::validate_registry()
}

/// Filter operators that accept fields of the given kind.
pub fn filter_operators(kind: FieldKind) -> Vec<FilterOperator> {
    FilterOperator::ALL
        .iter()
        .copied()
        .filter(|operator| operator.is_compatible_with(kind))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: SelectOptionId,
    pub value: String,
    pub color: String,
}

impl SelectOption {
    pub fn new(id: SelectOptionId, value: &str) -> Self {
        SelectOption {
            id,
            value: value.to_string(),
            color: "blue".to_string(),
        }
    }
}

/// Field type with its type-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Text,
    LongText,
    Url,
    Email,
    Number { decimal_places: u32, negative: bool },
    Boolean,
    Date { include_time: bool },
    LinkRow { link_row_table_id: TableId },
    SingleSelect { options: Vec<SelectOption> },
    MultipleSelect { options: Vec<SelectOption> },
    File,
    CreatedOn,
}

impl FieldType {
    pub fn number() -> Self {
        FieldType::Number {
            decimal_places: 0,
            negative: true,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldType::Text => FieldKind::Text,
            FieldType::LongText => FieldKind::LongText,
            FieldType::Url => FieldKind::Url,
            FieldType::Email => FieldKind::Email,
            FieldType::Number { .. } => FieldKind::Number,
            FieldType::Boolean => FieldKind::Boolean,
            FieldType::Date { .. } => FieldKind::Date,
            FieldType::LinkRow { .. } => FieldKind::LinkRow,
            FieldType::SingleSelect { .. } => FieldKind::SingleSelect,
            FieldType::MultipleSelect { .. } => FieldKind::MultipleSelect,
            FieldType::File => FieldKind::File,
            FieldType::CreatedOn => FieldKind::CreatedOn,
        }
    }

    pub fn select_options(&self) -> &[SelectOption] {
        match self {
            FieldType::SingleSelect { options } | FieldType::MultipleSelect { options } => options,
            _ => &[],
        }
    }

    fn option(&self, id: SelectOptionId) -> Option<&SelectOption> {
        self.select_options().iter().find(|option| option.id == id)
    }

    fn option_by_value(&self, value: &str) -> Option<&SelectOption> {
        let value = value.trim();
        self.select_options()
            .iter()
            .find(|option| option.value.eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub table_id: TableId,
    pub name: String,
    pub field_type: FieldType,
    pub primary: bool,
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        self.field_type.kind()
    }

    /// Name under which the field is addressed in public query parameters.
    pub fn db_column(&self) -> String {
        format!("field_{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedRow {
    pub id: RowId,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValue {
    pub name: String,
    pub visible_name: String,
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    SingleSelect(SelectOptionId),
    MultipleSelect(Vec<SelectOptionId>),
    Links(Vec<LinkedRow>),
    Files(Vec<FileValue>),
}

impl FieldValue {
    pub fn text(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }

    pub fn number(value: i64) -> Self {
        FieldValue::Number(Decimal::from(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// True for values an `empty` filter matches.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Boolean(b) => !b,
            FieldValue::MultipleSelect(ids) => ids.is_empty(),
            FieldValue::Links(links) => links.is_empty(),
            FieldValue::Files(files) => files.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            FieldValue::DateTime(dt) => Some(dt.date_naive()),
            _ => None,
        }
    }

    /// Text form used by search, `contains` style filters and type
    /// conversion.
    pub fn text_repr(&self, field_type: &FieldType) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(d) => d.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::DateTime(dt) => dt.to_rfc3339(),
            FieldValue::SingleSelect(id) => field_type
                .option(*id)
                .map(|option| option.value.clone())
                .unwrap_or_default(),
            FieldValue::MultipleSelect(ids) => ids
                .iter()
                .filter_map(|id| field_type.option(*id).map(|option| option.value.as_str()))
                .collect::<Vec<_>>()
                .join(", "),
            FieldValue::Links(links) => links
                .iter()
                .map(|link| link.value.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            FieldValue::Files(files) => files
                .iter()
                .map(|file| file.visible_name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Boolean(_) => 1,
            FieldValue::Number(_) => 2,
            FieldValue::Date(_) | FieldValue::DateTime(_) => 3,
            FieldValue::Text(_) => 4,
            FieldValue::SingleSelect(_) => 5,
            FieldValue::MultipleSelect(_) => 6,
            FieldValue::Links(_) => 7,
            FieldValue::Files(_) => 8,
        }
    }
}

const TRUTHY: [&str; 7] = ["1", "true", "yes", "on", "checked", "t", "y"];
const FALSY: [&str; 8] = ["", "0", "false", "no", "off", "unchecked", "f", "n"];

/// Parses the boolean spellings accepted in filter values and form input.
pub fn parse_bool(raw: &str) -> Option<bool> {
    let lowered = raw.trim().to_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

fn parse_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| ViewError::InvalidValue(format!("'{}' is not a valid id", part)))
        })
        .collect()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ViewError::InvalidValue(format!("'{}' is not a valid date", raw)))
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let date = parse_date(raw)?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| ViewError::InvalidValue(format!("'{}' is not a valid datetime", raw)))
}

fn check_number(field_type: &FieldType, value: Decimal) -> Result<Decimal> {
    match field_type {
        FieldType::Number {
            decimal_places,
            negative,
        } => {
            if !negative && value.is_sign_negative() && !value.is_zero() {
                return Err(ViewError::InvalidValue(format!(
                    "{} is negative but the field does not allow negative numbers",
                    value
                )));
            }
            Ok(value.round_dp_with_strategy(*decimal_places, RoundingStrategy::MidpointAwayFromZero))
        }
        _ => Ok(value),
    }
}

/// Turns raw text into a value of the field's type.
///
/// Empty input yields `Null`, except for text types, which keep the empty
/// string, and booleans, which read it as `false`.
pub fn coerce(field_type: &FieldType, raw: &str) -> Result<FieldValue> {
    let kind = field_type.kind();
    if kind.is_text_like() {
        return Ok(FieldValue::Text(raw.to_string()));
    }
    if kind == FieldKind::Boolean {
        return parse_bool(raw)
            .map(FieldValue::Boolean)
            .ok_or_else(|| ViewError::InvalidValue(format!("'{}' is not a boolean", raw)));
    }
    if raw.trim().is_empty() {
        return Ok(FieldValue::Null);
    }
    match field_type {
        FieldType::Number { .. } => {
            let parsed = Decimal::from_str(raw.trim())
                .map_err(|_| ViewError::InvalidValue(format!("'{}' is not a number", raw)))?;
            Ok(FieldValue::Number(check_number(field_type, parsed)?))
        }
        FieldType::Date {
            include_time: false,
        } => Ok(FieldValue::Date(parse_date(raw)?)),
        FieldType::Date { include_time: true } | FieldType::CreatedOn => {
            Ok(FieldValue::DateTime(parse_datetime(raw)?))
        }
        FieldType::SingleSelect { .. } => {
            let ids = parse_ids(raw)?;
            match ids.as_slice() {
                [id] if field_type.option(*id).is_some() => Ok(FieldValue::SingleSelect(*id)),
                _ => Err(ViewError::InvalidValue(format!(
                    "'{}' is not an option of the field",
                    raw
                ))),
            }
        }
        FieldType::MultipleSelect { .. } => {
            let ids = parse_ids(raw)?;
            if let Some(id) = ids.iter().find(|id| field_type.option(**id).is_none()) {
                return Err(ViewError::InvalidValue(format!(
                    "{} is not an option of the field",
                    id
                )));
            }
            Ok(FieldValue::MultipleSelect(ids))
        }
        FieldType::LinkRow { .. } => Ok(FieldValue::Links(
            parse_ids(raw)?
                .into_iter()
                .map(|id| LinkedRow {
                    id,
                    value: String::new(),
                })
                .collect(),
        )),
        FieldType::File => Err(ViewError::InvalidValue(
            "file values can not be parsed from text".to_string(),
        )),
        _ => Err(ViewError::InvalidValue(format!(
            "'{}' is not a valid {} value",
            raw, kind
        ))),
    }
}

/// Checks a value written to a column of the given type, normalising it
/// where the type requires (rounding, date truncation, option checks).
pub fn validate_value(field_type: &FieldType, value: FieldValue) -> Result<FieldValue> {
    let kind = field_type.kind();
    match (field_type, value) {
        (FieldType::Boolean, FieldValue::Null) => Ok(FieldValue::Boolean(false)),
        (_, FieldValue::Null) => Ok(FieldValue::Null),
        (_, FieldValue::Text(s)) if kind.is_text_like() => Ok(FieldValue::Text(s)),
        (FieldType::Number { .. }, FieldValue::Number(d)) => {
            Ok(FieldValue::Number(check_number(field_type, d)?))
        }
        (FieldType::Boolean, FieldValue::Boolean(b)) => Ok(FieldValue::Boolean(b)),
        (FieldType::Date { include_time: false }, FieldValue::Date(d)) => Ok(FieldValue::Date(d)),
        (FieldType::Date { include_time: false }, FieldValue::DateTime(dt)) => {
            Ok(FieldValue::Date(dt.date_naive()))
        }
        (FieldType::Date { include_time: true } | FieldType::CreatedOn, FieldValue::DateTime(dt)) => {
            Ok(FieldValue::DateTime(dt))
        }
        (FieldType::Date { include_time: true } | FieldType::CreatedOn, FieldValue::Date(d)) => {
            let text = d.format("%Y-%m-%d").to_string();
            Ok(FieldValue::DateTime(parse_datetime(&text)?))
        }
        (FieldType::LinkRow { .. }, FieldValue::Links(links)) => Ok(FieldValue::Links(links)),
        (FieldType::File, FieldValue::Files(files)) => Ok(FieldValue::Files(files)),
        (FieldType::SingleSelect { .. }, FieldValue::SingleSelect(id)) => {
            if field_type.option(id).is_some() {
                Ok(FieldValue::SingleSelect(id))
            } else {
                Err(ViewError::InvalidValue(format!(
                    "{} is not an option of the field",
                    id
                )))
            }
        }
        (FieldType::MultipleSelect { .. }, FieldValue::MultipleSelect(ids)) => {
            let mut unique = Vec::with_capacity(ids.len());
            for id in ids {
                if field_type.option(id).is_none() {
                    return Err(ViewError::InvalidValue(format!(
                        "{} is not an option of the field",
                        id
                    )));
                }
                if !unique.contains(&id) {
                    unique.push(id);
                }
            }
            Ok(FieldValue::MultipleSelect(unique))
        }
        (_, FieldValue::Text(s)) => coerce(field_type, &s),
        (_, other) => Err(ViewError::InvalidValue(format!(
            "{:?} is not a valid {} value",
            other, kind
        ))),
    }
}

/// Converts a stored value after a field type change. Values that have no
/// representation in the new type become empty.
pub fn convert_value(from: &FieldType, to: &FieldType, value: FieldValue) -> FieldValue {
    let empty = || validate_value(to, FieldValue::Null).unwrap_or(FieldValue::Null);
    if value.is_null() {
        return empty();
    }
    if from.kind() == to.kind() {
        return validate_value(to, value).unwrap_or_else(|_| empty());
    }
    let text = value.text_repr(from);
    match to.kind() {
        FieldKind::LinkRow | FieldKind::File => empty(),
        FieldKind::SingleSelect => to
            .option_by_value(&text)
            .map(|option| FieldValue::SingleSelect(option.id))
            .unwrap_or_else(empty),
        FieldKind::MultipleSelect => {
            let ids: Vec<SelectOptionId> = text
                .split(',')
                .filter_map(|part| to.option_by_value(part).map(|option| option.id))
                .collect();
            FieldValue::MultipleSelect(ids)
        }
        _ => coerce(to, &text).unwrap_or_else(|_| empty()),
    }
}

/// Compares two strings under a collation. `None` and `"C"` are byte order,
/// everything else compares case-insensitively first.
pub fn collate(collation: Option<&str>, a: &str, b: &str) -> Ordering {
    match collation {
        None | Some("C") | Some("POSIX") => a.cmp(b),
        Some(_) => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)),
    }
}

/// Orders two non-null values of one field.
pub fn compare_values(
    field_type: &FieldType,
    a: &FieldValue,
    b: &FieldValue,
    collation: Option<&str>,
) -> Ordering {
    match (a, b) {
        (FieldValue::Text(x), FieldValue::Text(y)) => collate(collation, x, y),
        (FieldValue::Number(x), FieldValue::Number(y)) => x.cmp(y),
        (FieldValue::Boolean(x), FieldValue::Boolean(y)) => x.cmp(y),
        (FieldValue::Date(x), FieldValue::Date(y)) => x.cmp(y),
        (FieldValue::DateTime(x), FieldValue::DateTime(y)) => x.cmp(y),
        (FieldValue::Date(x), FieldValue::DateTime(y)) => x.cmp(&y.date_naive()),
        (FieldValue::DateTime(x), FieldValue::Date(y)) => x.date_naive().cmp(y),
        (FieldValue::SingleSelect(x), FieldValue::SingleSelect(y)) => {
            let left = a.text_repr(field_type);
            let right = b.text_repr(field_type);
            collate(collation, &left, &right).then_with(|| x.cmp(y))
        }
        (FieldValue::MultipleSelect(_), FieldValue::MultipleSelect(_))
        | (FieldValue::Links(_), FieldValue::Links(_))
        | (FieldValue::Files(_), FieldValue::Files(_)) => collate(
            collation,
            &a.text_repr(field_type),
            &b.text_repr(field_type),
        ),
        _ => a.rank().cmp(&b.rank()),
    }
}
