//! Filter Predicate Engine.
//!
//! A view's filters compile into a [`CompiledFilter`]: a combinator tree of
//! leaf [`Predicate`]s plus the set of derived [`Annotation`]s the leaves
//! read. Annotations are merged by key across all filters, so a derived
//! value is computed once per row no matter how many filters use it.
//!
//! Operators live in the static [`FILTER_OPERATORS`] table. Each entry names
//! the field kinds it accepts and the handler that turns a raw filter value
//! into an [`AnnotatedPredicate`].
//!
//! ```
//! use tableview::filters::{FilterBuilder, FilterOperator};
//! use tableview::view::FilterType;
//! use tableview::{Field, FieldType, FieldValue, Table};
//!
//! let mut table = Table::new(1, 1, "People");
//! let name = Field { id: 1, table_id: 1, name: "Name".into(), field_type: FieldType::Text, primary: true };
//! table.add_field(name.clone()).unwrap();
//! table.create_row(vec![(1, FieldValue::text("Ada"))]).unwrap();
//! table.create_row(vec![(1, FieldValue::text("Grace"))]).unwrap();
//!
//! let mut builder = FilterBuilder::new(FilterType::Or);
//! builder.filter(FilterOperator::Equal.predicate(&name, "Ada").unwrap());
//! builder.filter(FilterOperator::Contains.predicate(&name, "RAC").unwrap());
//! let filter = builder.build();
//!
//! let rows = filter.apply(table.query(&table.full_model()));
//! assert_eq!(rows.len(), 2);
//! ```

use crate::error::{Result, ViewError};
use crate::field::{parse_bool, parse_date, Field, FieldId, FieldKind, FieldType, FieldValue};
use crate::table::{Row, RowModel, RowSet};
use crate::view::{FilterType, View, ViewFilter};
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    Contains,
    ContainsNot,
    ContainsWord,
    DoesntContainWord,
    LengthIsLowerThan,
    FilenameContains,
    HigherThan,
    LowerThan,
    IsEvenAndWhole,
    DateEqual,
    DateNotEqual,
    DateBefore,
    DateAfter,
    SingleSelectEqual,
    SingleSelectNotEqual,
    MultipleSelectHas,
    MultipleSelectHasNot,
    LinkRowHas,
    LinkRowHasNot,
    LinkRowContains,
    Boolean,
    Empty,
    NotEmpty,
}

pub type FilterHandler = fn(&FilterContext<'_>) -> Result<AnnotatedPredicate>;

pub struct FilterOperatorInfo {
    pub operator: FilterOperator,
    pub name: &'static str,
    pub compatible: &'static [FieldKind],
    pub handler: FilterHandler,
}

const TEXT: &[FieldKind] = &[FieldKind::Text, FieldKind::LongText, FieldKind::Url, FieldKind::Email];
const EQUALITY: &[FieldKind] = &[
    FieldKind::Text,
    FieldKind::LongText,
    FieldKind::Url,
    FieldKind::Email,
    FieldKind::Number,
    FieldKind::Boolean,
];
const CONTAINS: &[FieldKind] = &[
    FieldKind::Text,
    FieldKind::LongText,
    FieldKind::Url,
    FieldKind::Email,
    FieldKind::Number,
    FieldKind::Date,
    FieldKind::SingleSelect,
    FieldKind::MultipleSelect,
    FieldKind::CreatedOn,
];
const WORDS: &[FieldKind] = &[
    FieldKind::Text,
    FieldKind::LongText,
    FieldKind::Url,
    FieldKind::Email,
    FieldKind::SingleSelect,
    FieldKind::MultipleSelect,
];
const NUMBER: &[FieldKind] = &[FieldKind::Number];
const DATES: &[FieldKind] = &[FieldKind::Date, FieldKind::CreatedOn];
const FILE: &[FieldKind] = &[FieldKind::File];
const SINGLE_SELECT: &[FieldKind] = &[FieldKind::SingleSelect];
const MULTIPLE_SELECT: &[FieldKind] = &[FieldKind::MultipleSelect];
const LINK_ROW: &[FieldKind] = &[FieldKind::LinkRow];
const BOOLEAN: &[FieldKind] = &[FieldKind::Boolean];
const ANY: &[FieldKind] = &FieldKind::ALL;

macro_rules! operator {
    ($operator:ident, $name:literal, $compatible:expr, $handler:expr) => {
        FilterOperatorInfo {
            operator: FilterOperator::$operator,
            name: $name,
            compatible: $compatible,
            handler: $handler,
        }
    };
}

/// Indexed by the `FilterOperator` discriminant.
pub static FILTER_OPERATORS: [FilterOperatorInfo; 25] = [
    operator!(Equal, "equal", EQUALITY, equal_filter),
    operator!(NotEqual, "not_equal", EQUALITY, |ctx| equal_filter(ctx).map(AnnotatedPredicate::not)),
    operator!(Contains, "contains", CONTAINS, contains_filter),
    operator!(ContainsNot, "contains_not", CONTAINS, |ctx| contains_filter(ctx).map(AnnotatedPredicate::not)),
    operator!(ContainsWord, "contains_word", WORDS, contains_word_filter),
    operator!(DoesntContainWord, "doesnt_contain_word", WORDS, |ctx| {
        contains_word_filter(ctx).map(AnnotatedPredicate::not)
    }),
    operator!(LengthIsLowerThan, "length_is_lower_than", TEXT, length_is_lower_than_filter),
    operator!(FilenameContains, "filename_contains", FILE, filename_contains_filter),
    operator!(HigherThan, "higher_than", NUMBER, |ctx| number_filter(ctx, Test::GreaterThan)),
    operator!(LowerThan, "lower_than", NUMBER, |ctx| number_filter(ctx, Test::LessThan)),
    operator!(IsEvenAndWhole, "is_even_and_whole", NUMBER, is_even_and_whole_filter),
    operator!(DateEqual, "date_equal", DATES, |ctx| date_filter(ctx, Test::DateEquals)),
    operator!(DateNotEqual, "date_not_equal", DATES, |ctx| {
        date_filter(ctx, Test::DateEquals).map(AnnotatedPredicate::not)
    }),
    operator!(DateBefore, "date_before", DATES, |ctx| date_filter(ctx, Test::DateBefore)),
    operator!(DateAfter, "date_after", DATES, |ctx| date_filter(ctx, Test::DateAfter)),
    operator!(SingleSelectEqual, "single_select_equal", SINGLE_SELECT, |ctx| {
        id_filter(ctx, Test::HasOption)
    }),
    operator!(SingleSelectNotEqual, "single_select_not_equal", SINGLE_SELECT, |ctx| {
        id_filter(ctx, Test::HasOption).map(AnnotatedPredicate::not)
    }),
    operator!(MultipleSelectHas, "multiple_select_has", MULTIPLE_SELECT, |ctx| {
        id_filter(ctx, Test::HasOption)
    }),
    operator!(MultipleSelectHasNot, "multiple_select_has_not", MULTIPLE_SELECT, |ctx| {
        id_filter(ctx, Test::HasOption).map(AnnotatedPredicate::not)
    }),
    operator!(LinkRowHas, "link_row_has", LINK_ROW, |ctx| id_filter(ctx, Test::HasLink)),
    operator!(LinkRowHasNot, "link_row_has_not", LINK_ROW, |ctx| {
        id_filter(ctx, Test::HasLink).map(AnnotatedPredicate::not)
    }),
    operator!(LinkRowContains, "link_row_contains", LINK_ROW, link_row_contains_filter),
    operator!(Boolean, "boolean", BOOLEAN, boolean_filter),
    operator!(Empty, "empty", ANY, |ctx| Ok(ctx.leaf(Test::IsEmpty))),
    operator!(NotEmpty, "not_empty", ANY, |ctx| {
        Ok(ctx.leaf(Test::IsEmpty).not())
    }),
];

impl FilterOperator {
    pub const ALL: [FilterOperator; 25] = [
        FilterOperator::Equal,
        FilterOperator::NotEqual,
        FilterOperator::Contains,
        FilterOperator::ContainsNot,
        FilterOperator::ContainsWord,
        FilterOperator::DoesntContainWord,
        FilterOperator::LengthIsLowerThan,
        FilterOperator::FilenameContains,
        FilterOperator::HigherThan,
        FilterOperator::LowerThan,
        FilterOperator::IsEvenAndWhole,
        FilterOperator::DateEqual,
        FilterOperator::DateNotEqual,
        FilterOperator::DateBefore,
        FilterOperator::DateAfter,
        FilterOperator::SingleSelectEqual,
        FilterOperator::SingleSelectNotEqual,
        FilterOperator::MultipleSelectHas,
        FilterOperator::MultipleSelectHasNot,
        FilterOperator::LinkRowHas,
        FilterOperator::LinkRowHasNot,
        FilterOperator::LinkRowContains,
        FilterOperator::Boolean,
        FilterOperator::Empty,
        FilterOperator::NotEmpty,
    ];

    pub fn info(self) -> &'static FilterOperatorInfo {
        &FILTER_OPERATORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_compatible_with(self, kind: FieldKind) -> bool {
        self.info().compatible.contains(&kind)
    }

    /// Checks that the operator table lines up with the enum.
    pub fn validate_registry() -> Result<()> {
        for (position, info) in FILTER_OPERATORS.iter().enumerate() {
            if info.operator as usize != position || Self::ALL[position] != info.operator {
                return Err(ViewError::Config(format!(
                    "filter operator '{}' is registered at the wrong position",
                    info.name
                )));
            }
            if info.compatible.is_empty() {
                return Err(ViewError::Config(format!(
                    "filter operator '{}' accepts no field type",
                    info.name
                )));
            }
        }
        Ok(())
    }

    /// Builds the predicate for `value` against `field`, without checking
    /// type compatibility.
    pub fn predicate(self, field: &Field, value: &str) -> Result<AnnotatedPredicate> {
        (self.info().handler)(&FilterContext { field, value })
    }

    /// Write-time check of a filter: the operator must accept the field's
    /// type and the value must parse for it.
    pub fn validate(self, field: &Field, value: &str) -> Result<()> {
        if !self.is_compatible_with(field.kind()) {
            return Err(ViewError::ViewFilterTypeNotAllowedForField {
                filter_type: self.name().to_string(),
                field_type: field.kind().name().to_string(),
            });
        }
        self.predicate(field, value).map(|_| ())
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterOperator {
    type Err = ViewError;

    fn from_str(name: &str) -> Result<Self> {
        FILTER_OPERATORS
            .iter()
            .find(|info| info.name == name)
            .map(|info| info.operator)
            .ok_or_else(|| ViewError::ViewFilterTypeDoesNotExist(name.to_string()))
    }
}

/// What a handler gets to build its predicate from.
pub struct FilterContext<'a> {
    pub field: &'a Field,
    pub value: &'a str,
}

impl FilterContext<'_> {
    fn trimmed(&self) -> &str {
        self.value.trim()
    }

    fn leaf(&self, test: Test) -> AnnotatedPredicate {
        AnnotatedPredicate::new(Predicate::Leaf {
            operand: Operand::Field(self.field.id),
            field_type: self.field.field_type.clone(),
            test,
        })
    }

    fn invalid(&self, expected: &str) -> ViewError {
        ViewError::InvalidValue(format!(
            "'{}' is not a valid {} for field {}",
            self.value, expected, self.field.id
        ))
    }
}

fn equal_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let expected = match ctx.field.kind() {
        FieldKind::Number => {
            FieldValue::Number(Decimal::from_str(value).map_err(|_| ctx.invalid("number"))?)
        }
        FieldKind::Boolean => {
            FieldValue::Boolean(parse_bool(value).ok_or_else(|| ctx.invalid("boolean"))?)
        }
        _ => FieldValue::Text(value.to_string()),
    };
    Ok(ctx.leaf(Test::Equals(expected)))
}

fn contains_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    Ok(ctx.leaf(Test::ContainsText(value.to_lowercase())))
}

fn contains_word_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let pattern = format!(r"(?i)\b{}\b", regex::escape(value));
    let regex = Regex::new(&pattern).map_err(|_| ctx.invalid("word"))?;
    Ok(ctx.leaf(Test::MatchesWord(regex)))
}

fn length_is_lower_than_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let length = value.parse::<usize>().map_err(|_| ctx.invalid("length"))?;
    Ok(ctx.leaf(Test::LengthLowerThan(length)))
}

fn filename_contains_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let key = format!("{}_matches_visible_names", ctx.field.db_column());
    Ok(AnnotatedPredicate::annotated(
        key,
        Annotation::FilenameMatches {
            field_id: ctx.field.id,
            needle: value.to_lowercase(),
        },
        Test::Equals(FieldValue::Boolean(true)),
    ))
}

fn is_even_and_whole_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let key = format!("{}_is_even_and_whole", ctx.field.db_column());
    Ok(AnnotatedPredicate::annotated(
        key,
        Annotation::RemainderOfTwo(ctx.field.id),
        Test::Equals(FieldValue::Number(Decimal::ZERO)),
    ))
}

fn number_filter(ctx: &FilterContext<'_>, test: fn(Decimal) -> Test) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let number = Decimal::from_str(value).map_err(|_| ctx.invalid("number"))?;
    Ok(ctx.leaf(test(number)))
}

fn date_filter(ctx: &FilterContext<'_>, test: fn(NaiveDate) -> Test) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let date = parse_date(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| ctx.invalid("date"))?;
    Ok(ctx.leaf(test(date)))
}

fn id_filter(ctx: &FilterContext<'_>, test: fn(u64) -> Test) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    let id = value.parse::<u64>().map_err(|_| ctx.invalid("id"))?;
    Ok(ctx.leaf(test(id)))
}

fn link_row_contains_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = ctx.trimmed();
    if value.is_empty() {
        return Ok(AnnotatedPredicate::everything());
    }
    Ok(ctx.leaf(Test::LinkContains(value.to_lowercase())))
}

fn boolean_filter(ctx: &FilterContext<'_>) -> Result<AnnotatedPredicate> {
    let value = parse_bool(ctx.value).ok_or_else(|| ctx.invalid("boolean"))?;
    Ok(ctx.leaf(Test::Equals(FieldValue::Boolean(value))))
}

/// A derived per-row value that leaf predicates can read by key.
#[derive(Debug, Clone)]
pub enum Annotation {
    /// `value mod 2` of a number field, `Null` for empty cells.
    RemainderOfTwo(FieldId),
    /// Whether any file's visible name contains `needle`, ignoring case.
    FilenameMatches { field_id: FieldId, needle: String },
}

impl Annotation {
    pub fn compute(&self, row: &Row) -> FieldValue {
        match self {
            Annotation::RemainderOfTwo(field_id) => match row.value(*field_id).as_number() {
                Some(number) => FieldValue::Number(number % Decimal::TWO),
                None => FieldValue::Null,
            },
            Annotation::FilenameMatches { field_id, needle } => {
                let matched = match row.value(*field_id) {
                    FieldValue::Files(files) => files
                        .iter()
                        .any(|file| file.visible_name.to_lowercase().contains(needle.as_str())),
                    _ => false,
                };
                FieldValue::Boolean(matched)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Operand {
    Field(FieldId),
    Annotation(String),
}

#[derive(Debug, Clone)]
pub enum Test {
    Equals(FieldValue),
    /// Case-insensitive substring of the value's text form.
    ContainsText(String),
    MatchesWord(Regex),
    /// Shorter than the given number of characters; empty cells match.
    LengthLowerThan(usize),
    GreaterThan(Decimal),
    LessThan(Decimal),
    DateEquals(NaiveDate),
    DateBefore(NaiveDate),
    DateAfter(NaiveDate),
    HasOption(u64),
    HasLink(u64),
    LinkContains(String),
    IsEmpty,
    MatchNothing,
}

impl Test {
    fn evaluate(&self, field_type: &FieldType, value: &FieldValue) -> bool {
        match self {
            Test::Equals(expected) => value == expected,
            Test::ContainsText(needle) => {
                !value.is_null() && value.text_repr(field_type).to_lowercase().contains(needle.as_str())
            }
            Test::MatchesWord(regex) => !value.is_null() && regex.is_match(&value.text_repr(field_type)),
            Test::LengthLowerThan(length) => match value {
                FieldValue::Null => true,
                FieldValue::Text(text) => text.chars().count() < *length,
                _ => false,
            },
            Test::GreaterThan(bound) => value.as_number().map_or(false, |n| n > *bound),
            Test::LessThan(bound) => value.as_number().map_or(false, |n| n < *bound),
            Test::DateEquals(date) => value.as_date().map_or(false, |d| d == *date),
            Test::DateBefore(date) => value.as_date().map_or(false, |d| d < *date),
            Test::DateAfter(date) => value.as_date().map_or(false, |d| d > *date),
            Test::HasOption(id) => match value {
                FieldValue::SingleSelect(selected) => selected == id,
                FieldValue::MultipleSelect(selected) => selected.contains(id),
                _ => false,
            },
            Test::HasLink(id) => match value {
                FieldValue::Links(links) => links.iter().any(|link| link.id == *id),
                _ => false,
            },
            Test::LinkContains(needle) => match value {
                FieldValue::Links(links) => links
                    .iter()
                    .any(|link| link.value.to_lowercase().contains(needle.as_str())),
                _ => false,
            },
            Test::IsEmpty => value.is_empty(),
            Test::MatchNothing => false,
        }
    }
}

/// Combinator tree over leaf tests. `Empty` is the identity: it matches
/// every row and disappears when combined with anything else.
#[derive(Debug, Clone)]
pub enum Predicate {
    Empty,
    Leaf {
        operand: Operand,
        field_type: FieldType,
        test: Test,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        matches!(self, Predicate::Empty)
    }

    pub fn combine(self, other: Predicate, filter_type: FilterType) -> Predicate {
        match (self, other) {
            (Predicate::Empty, other) => other,
            (current, Predicate::Empty) => current,
            (Predicate::And(mut children), other) if filter_type == FilterType::And => {
                children.push(other);
                Predicate::And(children)
            }
            (Predicate::Or(mut children), other) if filter_type == FilterType::Or => {
                children.push(other);
                Predicate::Or(children)
            }
            (current, other) => match filter_type {
                FilterType::And => Predicate::And(vec![current, other]),
                FilterType::Or => Predicate::Or(vec![current, other]),
            },
        }
    }

    pub fn negate(self) -> Predicate {
        match self {
            Predicate::Empty => Predicate::Empty,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    fn evaluate(&self, row: &Row, annotations: &BTreeMap<&str, FieldValue>) -> bool {
        match self {
            Predicate::Empty => true,
            Predicate::Leaf {
                operand,
                field_type,
                test,
            } => {
                let value = match operand {
                    Operand::Field(field_id) => row.value(*field_id),
                    Operand::Annotation(key) => {
                        annotations.get(key.as_str()).unwrap_or(&FieldValue::Null)
                    }
                };
                test.evaluate(field_type, value)
            }
            Predicate::And(children) => children.iter().all(|child| child.evaluate(row, annotations)),
            Predicate::Or(children) => children.iter().any(|child| child.evaluate(row, annotations)),
            Predicate::Not(inner) => !inner.evaluate(row, annotations),
        }
    }
}

/// A predicate together with the annotations it reads.
#[derive(Debug, Clone)]
pub struct AnnotatedPredicate {
    pub annotations: BTreeMap<String, Annotation>,
    pub predicate: Predicate,
}

impl AnnotatedPredicate {
    pub fn new(predicate: Predicate) -> Self {
        AnnotatedPredicate {
            annotations: BTreeMap::new(),
            predicate,
        }
    }

    /// Matches every row.
    pub fn everything() -> Self {
        Self::new(Predicate::Empty)
    }

    pub fn annotated(key: String, annotation: Annotation, test: Test) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.clone(), annotation);
        AnnotatedPredicate {
            annotations,
            predicate: Predicate::Leaf {
                operand: Operand::Annotation(key),
                field_type: FieldType::Boolean,
                test,
            },
        }
    }

    pub fn not(self) -> Self {
        AnnotatedPredicate {
            annotations: self.annotations,
            predicate: self.predicate.negate(),
        }
    }
}

/// Accumulates filters under one combinator, merging their annotations.
#[derive(Debug)]
pub struct FilterBuilder {
    filter_type: FilterType,
    annotations: BTreeMap<String, Annotation>,
    predicate: Predicate,
    field_ids: BTreeSet<FieldId>,
}

impl FilterBuilder {
    pub fn new(filter_type: FilterType) -> Self {
        FilterBuilder {
            filter_type,
            annotations: BTreeMap::new(),
            predicate: Predicate::Empty,
            field_ids: BTreeSet::new(),
        }
    }

    pub fn filter(&mut self, filter: AnnotatedPredicate) -> &mut Self {
        self.annotations.extend(filter.annotations);
        let current = std::mem::replace(&mut self.predicate, Predicate::Empty);
        self.predicate = current.combine(filter.predicate, self.filter_type);
        self
    }

    /// Records a field the filter depends on.
    pub fn depends_on(&mut self, field_id: FieldId) -> &mut Self {
        self.field_ids.insert(field_id);
        self
    }

    /// Adds a nested builder as a single child.
    pub fn group(&mut self, group: FilterBuilder) -> &mut Self {
        self.field_ids.extend(group.field_ids.iter().copied());
        self.filter(AnnotatedPredicate {
            annotations: group.annotations,
            predicate: group.predicate,
        })
    }

    pub fn build(self) -> CompiledFilter {
        CompiledFilter {
            annotations: self.annotations,
            predicate: self.predicate,
            field_ids: self.field_ids,
            disabled: false,
        }
    }
}

/// An executable view filter.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub annotations: BTreeMap<String, Annotation>,
    pub predicate: Predicate,
    /// Every field a filter of the view references.
    pub field_ids: BTreeSet<FieldId>,
    /// Set from the view's `filters_disabled`; only `apply` honours it.
    pub disabled: bool,
}

impl CompiledFilter {
    /// True when the filter matches every row.
    pub fn is_trivial(&self) -> bool {
        self.predicate.is_empty()
    }

    pub fn references_any(&self, field_ids: &BTreeSet<FieldId>) -> bool {
        !self.field_ids.is_disjoint(field_ids)
    }

    pub fn matches(&self, row: &Row) -> bool {
        if self.is_trivial() {
            return true;
        }
        let annotations: BTreeMap<&str, FieldValue> = self
            .annotations
            .iter()
            .map(|(key, annotation)| (key.as_str(), annotation.compute(row)))
            .collect();
        self.predicate.evaluate(row, &annotations)
    }

    /// Filters the rows, unless the view has its filters disabled.
    pub fn apply(&self, rows: RowSet) -> RowSet {
        if self.disabled {
            return rows;
        }
        self.filter_rows(rows)
    }

    /// Filters the rows regardless of the disabled flag.
    pub fn filter_rows(&self, rows: RowSet) -> RowSet {
        if self.is_trivial() {
            return rows;
        }
        rows.retain(|row| self.matches(row))
    }
}

fn filter_predicate(filter: &ViewFilter, field: &Field) -> Result<AnnotatedPredicate> {
    if !filter.operator.is_compatible_with(field.kind()) {
        return Err(ViewError::ViewFilterTypeNotAllowedForField {
            filter_type: filter.operator.name().to_string(),
            field_type: field.kind().name().to_string(),
        });
    }
    match filter.operator.predicate(field, &filter.value) {
        Ok(predicate) => Ok(predicate),
        Err(err) => {
            log::debug!(
                "filter {} on field {} no longer parses ({}); it matches nothing",
                filter.id,
                field.id,
                err
            );
            Ok(AnnotatedPredicate::new(Predicate::Leaf {
                operand: Operand::Field(field.id),
                field_type: field.field_type.clone(),
                test: Test::MatchNothing,
            }))
        }
    }
}

/// Compiles the filters of `view` against the fields of `model`.
///
/// Filters without a group are combined with the view's filter type; each
/// filter group is combined with its own type and added as one child.
pub fn compile(view: &View, model: &RowModel) -> Result<CompiledFilter> {
    let mut builder = FilterBuilder::new(view.filter_type);
    let known_groups: BTreeSet<_> = view.filter_groups.iter().map(|group| group.id).collect();

    for filter in &view.filters {
        if filter.group_id.map_or(false, |id| known_groups.contains(&id)) {
            continue;
        }
        let field = model.require(filter.field_id)?;
        builder.depends_on(field.id).filter(filter_predicate(filter, field)?);
    }

    for group in &view.filter_groups {
        let mut group_builder = FilterBuilder::new(group.filter_type);
        for filter in view.filters.iter().filter(|f| f.group_id == Some(group.id)) {
            let field = model.require(filter.field_id)?;
            group_builder
                .depends_on(field.id)
                .filter(filter_predicate(filter, field)?);
        }
        builder.group(group_builder);
    }

    let mut compiled = builder.build();
    compiled.disabled = view.filters_disabled;
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FileValue, LinkedRow, SelectOption};
    use crate::table::Table;
    use crate::view::{OwnershipType, ViewFilterGroup, ViewKind};

    fn field(id: FieldId, field_type: FieldType) -> Field {
        Field {
            id,
            table_id: 1,
            name: format!("field {}", id),
            field_type,
            primary: false,
        }
    }

    fn row(values: Vec<(FieldId, FieldValue)>) -> Row {
        Row {
            id: 1,
            order: Decimal::ONE,
            values: values.into_iter().collect(),
        }
    }

    fn matches(operator: FilterOperator, field: &Field, value: &str, cell: FieldValue) -> bool {
        let mut builder = FilterBuilder::new(FilterType::And);
        builder.filter(operator.predicate(field, value).unwrap());
        builder.build().matches(&row(vec![(field.id, cell)]))
    }

    fn empty_view() -> View {
        View {
            id: 1,
            table_id: 1,
            name: "Grid".into(),
            order: 1,
            kind: ViewKind::Grid,
            ownership: OwnershipType::Collaborative,
            owner_id: 1,
            filter_type: FilterType::And,
            filters_disabled: false,
            public: false,
            slug: String::new(),
            password_hash: None,
            db_index_name: None,
            trashed: false,
            filters: Vec::new(),
            filter_groups: Vec::new(),
            sorts: Vec::new(),
            field_options: BTreeMap::new(),
            decorations: Vec::new(),
        }
    }

    #[test]
    fn test_registry() {
        FilterOperator::validate_registry().unwrap();
        for operator in FilterOperator::ALL {
            assert_eq!(operator.name().parse::<FilterOperator>().unwrap(), operator);
        }
        assert!(matches!(
            "between".parse::<FilterOperator>(),
            Err(ViewError::ViewFilterTypeDoesNotExist(_))
        ));
        assert!(FilterOperator::Empty.is_compatible_with(FieldKind::File));
        assert!(!FilterOperator::HigherThan.is_compatible_with(FieldKind::Text));
    }

    #[test]
    fn test_text_operators() {
        let text = field(1, FieldType::Text);
        assert!(matches(FilterOperator::Equal, &text, "Value 1", FieldValue::text("Value 1")));
        assert!(!matches(FilterOperator::Equal, &text, "value 1", FieldValue::text("Value 1")));
        assert!(matches(FilterOperator::Contains, &text, "ALU", FieldValue::text("Value 1")));
        assert!(!matches(FilterOperator::Contains, &text, "x", FieldValue::Null));
        assert!(matches(FilterOperator::ContainsNot, &text, "x", FieldValue::Null));
        assert!(matches(FilterOperator::ContainsWord, &text, "lazy", FieldValue::text("The Lazy dog")));
        assert!(!matches(FilterOperator::ContainsWord, &text, "laz", FieldValue::text("The Lazy dog")));
        assert!(matches(FilterOperator::DoesntContainWord, &text, "cat", FieldValue::text("The Lazy dog")));
        assert!(matches(FilterOperator::LengthIsLowerThan, &text, "4", FieldValue::text("abc")));
        assert!(!matches(FilterOperator::LengthIsLowerThan, &text, "3", FieldValue::text("abc")));
        assert!(matches(FilterOperator::LengthIsLowerThan, &text, "3", FieldValue::Null));
    }

    #[test]
    fn test_empty_value_is_a_no_op() {
        let text = field(1, FieldType::Text);
        for operator in [
            FilterOperator::Equal,
            FilterOperator::NotEqual,
            FilterOperator::Contains,
            FilterOperator::ContainsWord,
            FilterOperator::LengthIsLowerThan,
        ] {
            assert!(operator.predicate(&text, "  ").unwrap().predicate.is_empty());
        }
        assert!(!FilterOperator::Empty.predicate(&text, "").unwrap().predicate.is_empty());
        let boolean = field(2, FieldType::Boolean);
        assert!(matches(FilterOperator::Boolean, &boolean, "", FieldValue::Boolean(false)));
        assert!(!matches(FilterOperator::Boolean, &boolean, "", FieldValue::Boolean(true)));
    }

    #[test]
    fn test_number_operators_and_annotations() {
        let number = field(3, FieldType::number());
        assert!(matches(FilterOperator::HigherThan, &number, "10", FieldValue::number(11)));
        assert!(!matches(FilterOperator::HigherThan, &number, "10", FieldValue::Null));
        assert!(matches(FilterOperator::LowerThan, &number, "10.5", FieldValue::number(10)));
        assert!(matches(FilterOperator::IsEvenAndWhole, &number, "", FieldValue::number(4)));
        assert!(!matches(FilterOperator::IsEvenAndWhole, &number, "", FieldValue::Number(Decimal::new(45, 1))));
        assert!(!matches(FilterOperator::IsEvenAndWhole, &number, "", FieldValue::Null));
        assert!(FilterOperator::HigherThan.validate(&number, "ten").is_err());

        let predicate = FilterOperator::IsEvenAndWhole.predicate(&number, "").unwrap();
        assert!(predicate.annotations.contains_key("field_3_is_even_and_whole"));
    }

    #[test]
    fn test_annotations_are_merged_by_key() {
        let number = field(3, FieldType::number());
        let mut builder = FilterBuilder::new(FilterType::Or);
        builder.filter(FilterOperator::IsEvenAndWhole.predicate(&number, "").unwrap());
        builder.filter(FilterOperator::IsEvenAndWhole.predicate(&number, "").unwrap());
        let compiled = builder.build();
        assert_eq!(compiled.annotations.len(), 1);
        assert!(compiled.matches(&row(vec![(3, FieldValue::number(2))])));
    }

    #[test]
    fn test_file_select_link_and_date_operators() {
        let files = field(4, FieldType::File);
        let cell = FieldValue::Files(vec![FileValue {
            name: "a1b2.png".into(),
            visible_name: "Holiday.PNG".into(),
        }]);
        assert!(matches(FilterOperator::FilenameContains, &files, "holiday", cell.clone()));
        assert!(!matches(FilterOperator::FilenameContains, &files, "work", cell));

        let select = field(
            5,
            FieldType::MultipleSelect {
                options: vec![SelectOption::new(1, "a"), SelectOption::new(2, "b")],
            },
        );
        assert!(matches(FilterOperator::MultipleSelectHas, &select, "2", FieldValue::MultipleSelect(vec![1, 2])));
        assert!(matches(FilterOperator::MultipleSelectHasNot, &select, "2", FieldValue::MultipleSelect(vec![1])));

        let link = field(6, FieldType::LinkRow { link_row_table_id: 9 });
        let links = FieldValue::Links(vec![LinkedRow {
            id: 7,
            value: "Berlin".into(),
        }]);
        assert!(matches(FilterOperator::LinkRowHas, &link, "7", links.clone()));
        assert!(matches(FilterOperator::LinkRowContains, &link, "ERL", links.clone()));
        assert!(matches(FilterOperator::LinkRowHasNot, &link, "8", links));

        let date = field(7, FieldType::Date { include_time: false });
        let day = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(matches(FilterOperator::DateEqual, &date, "2024-05-01", day.clone()));
        assert!(matches(FilterOperator::DateBefore, &date, "2024-06-01", day.clone()));
        assert!(matches(FilterOperator::DateAfter, &date, "2024-04-30T10:00:00Z", day.clone()));
        assert!(matches(FilterOperator::Contains, &date, "2024-05", day));
    }

    #[test]
    fn test_validate_rejects_incompatible_types() {
        let boolean = field(2, FieldType::Boolean);
        assert!(matches!(
            FilterOperator::Contains.validate(&boolean, "x"),
            Err(ViewError::ViewFilterTypeNotAllowedForField { .. })
        ));
        assert!(FilterOperator::Boolean.validate(&boolean, "maybe").is_err());
        assert!(FilterOperator::Boolean.validate(&boolean, "yes").is_ok());
    }

    #[test]
    fn test_compile_groups_and_disabled() {
        let mut table = Table::new(1, 1, "t");
        table.add_field(field(1, FieldType::Text)).unwrap();
        table.add_field(field(2, FieldType::number())).unwrap();
        table
            .create_row(vec![(1, FieldValue::text("a")), (2, FieldValue::number(1))])
            .unwrap();
        table
            .create_row(vec![(1, FieldValue::text("b")), (2, FieldValue::number(2))])
            .unwrap();
        table
            .create_row(vec![(1, FieldValue::text("c")), (2, FieldValue::number(3))])
            .unwrap();
        let model = table.full_model();

        // c OR (a AND 1)
        let mut view = empty_view();
        view.filter_type = FilterType::Or;
        view.filter_groups.push(ViewFilterGroup {
            id: 1,
            view_id: 1,
            filter_type: FilterType::And,
        });
        let filter = |id, field_id, operator, value: &str, group_id| ViewFilter {
            id,
            view_id: 1,
            field_id,
            operator,
            value: value.to_string(),
            group_id,
        };
        view.filters = vec![
            filter(1, 1, FilterOperator::Equal, "c", None),
            filter(2, 1, FilterOperator::Equal, "a", Some(1)),
            filter(3, 2, FilterOperator::Equal, "1", Some(1)),
        ];
        let compiled = compile(&view, &model).unwrap();
        assert_eq!(compiled.field_ids.len(), 2);
        let rows = compiled.apply(table.query(&model));
        assert_eq!(rows.ids(), vec![1, 3]);

        view.filters_disabled = true;
        let compiled = compile(&view, &model).unwrap();
        assert_eq!(compiled.apply(table.query(&model)).len(), 3);
        assert_eq!(compiled.filter_rows(table.query(&model)).len(), 2);

        let narrow = table.model(&[2]).unwrap();
        assert!(matches!(
            compile(&view, &narrow),
            Err(ViewError::FieldNotInProjection(1))
        ));
    }

    #[test]
    fn test_unparseable_stored_value_matches_nothing() {
        let mut table = Table::new(1, 1, "t");
        table.add_field(field(2, FieldType::number())).unwrap();
        table.create_row(vec![(2, FieldValue::number(1))]).unwrap();
        let mut view = empty_view();
        view.filters.push(ViewFilter {
            id: 1,
            view_id: 1,
            field_id: 2,
            operator: FilterOperator::HigherThan,
            value: "abc".into(),
            group_id: None,
        });
        let model = table.full_model();
        let compiled = compile(&view, &model).unwrap();
        assert!(compiled.apply(table.query(&model)).is_empty());
    }
}
