//! View configuration model.
//!
//! A [`View`] is a saved configuration over one table: its filters (flat or
//! grouped), sorts, per-field display options, decorations and public
//! sharing settings. Views are plain data; the handler owns them and hands
//! out snapshots, so everything here is `Clone`.
//!
//! View kinds differ only in what they support. Rather than subclassing,
//! each [`ViewKind`] maps to a static [`ViewCapabilities`] record that the
//! store consults before every write.

use crate::error::{Result, ViewError};
use crate::field::{Field, FieldId, FieldKind};
use crate::filters::FilterOperator;
use crate::permissions::UserId;
use crate::table::TableId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type ViewId = u64;
pub type FilterId = u64;
pub type FilterGroupId = u64;
pub type SortId = u64;
pub type DecorationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewCapabilities {
    pub can_filter: bool,
    pub can_sort: bool,
    pub can_share: bool,
    pub has_field_options: bool,
    pub can_decorate: bool,
    /// Publicly shared views of this kind receive realtime row events.
    pub wants_realtime_public_events: bool,
    pub fields_hidden_by_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Grid,
    Gallery,
    Form,
}

impl ViewKind {
    pub fn name(self) -> &'static str {
        match self {
            ViewKind::Grid => "grid",
            ViewKind::Gallery => "gallery",
            ViewKind::Form => "form",
        }
    }

    pub fn capabilities(self) -> ViewCapabilities {
        match self {
            ViewKind::Grid => ViewCapabilities {
                can_filter: true,
                can_sort: true,
                can_share: true,
                has_field_options: true,
                can_decorate: true,
                wants_realtime_public_events: true,
                fields_hidden_by_default: false,
            },
            ViewKind::Gallery => ViewCapabilities {
                can_filter: true,
                can_sort: true,
                can_share: true,
                has_field_options: true,
                can_decorate: true,
                wants_realtime_public_events: true,
                fields_hidden_by_default: true,
            },
            ViewKind::Form => ViewCapabilities {
                can_filter: false,
                can_sort: false,
                can_share: true,
                has_field_options: true,
                can_decorate: false,
                wants_realtime_public_events: false,
                fields_hidden_by_default: true,
            },
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ViewKind {
    type Err = ViewError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "grid" => Ok(ViewKind::Grid),
            "gallery" => Ok(ViewKind::Gallery),
            "form" => Ok(ViewKind::Form),
            other => Err(ViewError::ViewTypeDoesNotExist(other.to_string())),
        }
    }
}

/// Who can see a view: every workspace member, or only its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipType {
    Collaborative,
    Personal,
}

/// How the filters of a view (or group) combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    #[default]
    And,
    Or,
}

impl FromStr for FilterType {
    type Err = ViewError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AND" => Ok(FilterType::And),
            "OR" => Ok(FilterType::Or),
            _ => Err(ViewError::InvalidValue(format!(
                "'{}' is not a filter type, expected AND or OR",
                name
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = ViewError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortOrder::Ascending),
            "DESC" => Ok(SortOrder::Descending),
            _ => Err(ViewError::SortOrderDoesNotExist(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub id: FilterId,
    pub view_id: ViewId,
    pub field_id: FieldId,
    pub operator: FilterOperator,
    pub value: String,
    pub group_id: Option<FilterGroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilterGroup {
    pub id: FilterGroupId,
    pub view_id: ViewId,
    pub filter_type: FilterType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSort {
    pub id: SortId,
    pub view_id: ViewId,
    pub field_id: FieldId,
    pub order: SortOrder,
}

/// Footer aggregation shown under a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    EmptyCount,
    NotEmptyCount,
    UniqueCount,
    Min,
    Max,
    Sum,
    Average,
}

impl AggregationType {
    pub fn name(self) -> &'static str {
        match self {
            AggregationType::EmptyCount => "empty_count",
            AggregationType::NotEmptyCount => "not_empty_count",
            AggregationType::UniqueCount => "unique_count",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::Sum => "sum",
            AggregationType::Average => "average",
        }
    }

    pub fn is_compatible_with(self, kind: FieldKind) -> bool {
        match self {
            AggregationType::EmptyCount | AggregationType::NotEmptyCount => true,
            AggregationType::UniqueCount => kind.is_text_like()
                || matches!(kind, FieldKind::Number | FieldKind::SingleSelect),
            AggregationType::Min | AggregationType::Max => {
                matches!(kind, FieldKind::Number | FieldKind::Date | FieldKind::CreatedOn)
            }
            AggregationType::Sum | AggregationType::Average => kind == FieldKind::Number,
        }
    }
}

impl FromStr for AggregationType {
    type Err = ViewError;

    fn from_str(name: &str) -> Result<Self> {
        [
            AggregationType::EmptyCount,
            AggregationType::NotEmptyCount,
            AggregationType::UniqueCount,
            AggregationType::Min,
            AggregationType::Max,
            AggregationType::Sum,
            AggregationType::Average,
        ]
        .into_iter()
        .find(|aggregation| aggregation.name() == name)
        .ok_or_else(|| ViewError::InvalidValue(format!("unknown aggregation '{}'", name)))
    }
}

/// Per (view, field) display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFieldOption {
    pub field_id: FieldId,
    pub width: u32,
    pub hidden: bool,
    pub order: i64,
    pub aggregation: Option<AggregationType>,
    /// Form views: whether the field is part of the form.
    pub enabled: bool,
    pub required: bool,
}

impl ViewFieldOption {
    pub const DEFAULT_WIDTH: u32 = 200;
    pub const DEFAULT_ORDER: i64 = 32767;

    /// Options a field has in a view before anything was saved for it.
    pub fn default_for(kind: ViewKind, field: &Field) -> Self {
        ViewFieldOption {
            field_id: field.id,
            width: Self::DEFAULT_WIDTH,
            hidden: kind.capabilities().fields_hidden_by_default && !field.primary,
            order: Self::DEFAULT_ORDER,
            aggregation: None,
            enabled: false,
            required: true,
        }
    }
}

/// Partial update of a field option; `None` leaves a property untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldOptionsUpdate {
    pub width: Option<u32>,
    pub hidden: Option<bool>,
    pub order: Option<i64>,
    pub aggregation: Option<Option<AggregationType>>,
    pub enabled: Option<bool>,
    pub required: Option<bool>,
}

impl FieldOptionsUpdate {
    pub fn hidden(hidden: bool) -> Self {
        FieldOptionsUpdate {
            hidden: Some(hidden),
            ..Default::default()
        }
    }

    pub(crate) fn apply_to(&self, option: &mut ViewFieldOption) {
        if let Some(width) = self.width {
            option.width = width;
        }
        if let Some(hidden) = self.hidden {
            option.hidden = hidden;
        }
        if let Some(order) = self.order {
            option.order = order;
        }
        if let Some(aggregation) = self.aggregation {
            option.aggregation = aggregation;
        }
        if let Some(enabled) = self.enabled {
            option.enabled = enabled;
        }
        if let Some(required) = self.required {
            option.required = required;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDecoration {
    pub id: DecorationId,
    pub view_id: ViewId,
    pub decorator_type: String,
    pub value_provider_type: String,
    pub value_provider_conf: serde_json::Value,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub table_id: TableId,
    pub name: String,
    pub order: i64,
    pub kind: ViewKind,
    pub ownership: OwnershipType,
    pub owner_id: UserId,
    pub filter_type: FilterType,
    pub filters_disabled: bool,
    pub public: bool,
    pub slug: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Name of the materialized index the view currently points at.
    pub db_index_name: Option<String>,
    pub trashed: bool,
    pub filters: Vec<ViewFilter>,
    pub filter_groups: Vec<ViewFilterGroup>,
    pub sorts: Vec<ViewSort>,
    pub field_options: BTreeMap<FieldId, ViewFieldOption>,
    pub decorations: Vec<ViewDecoration>,
}

impl View {
    pub fn capabilities(&self) -> ViewCapabilities {
        self.kind.capabilities()
    }

    /// Fields referenced by any filter of the view.
    pub fn filtered_field_ids(&self) -> BTreeSet<FieldId> {
        self.filters.iter().map(|filter| filter.field_id).collect()
    }

    pub fn sorted_field_ids(&self) -> Vec<FieldId> {
        self.sorts.iter().map(|sort| sort.field_id).collect()
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn check_password(&self, password: &str) -> bool {
        self.password_hash
            .as_deref()
            .map_or(false, |hash| verify_password(password, hash))
    }

    /// Field options for `field`, falling back to the kind's defaults.
    pub fn field_option(&self, field: &Field) -> ViewFieldOption {
        self.field_options
            .get(&field.id)
            .cloned()
            .unwrap_or_else(|| ViewFieldOption::default_for(self.kind, field))
    }

    pub fn is_accessible_by(&self, user_id: UserId) -> bool {
        self.ownership == OwnershipType::Collaborative || self.owner_id == user_id
    }
}

/// A 43 character URL-safe slug from 32 random bytes.
pub fn generate_slug() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Salted SHA-256 password hash in the form `sha256$<salt>$<digest>`.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::thread_rng().gen();
    let salt = hex::encode(salt);
    format!("sha256${}${}", salt, digest_password(&salt, password))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let mut parts = hash.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(digest)) => digest_password(salt, password) == digest,
        _ => false,
    }
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    #[test]
    fn test_capabilities() {
        assert!(ViewKind::Grid.capabilities().can_filter);
        assert!(!ViewKind::Form.capabilities().can_sort);
        assert!(ViewKind::Form.capabilities().can_share);
        assert!(!ViewKind::Form.capabilities().wants_realtime_public_events);
        assert_eq!("gallery".parse::<ViewKind>().unwrap(), ViewKind::Gallery);
        assert!(matches!(
            "kanban".parse::<ViewKind>(),
            Err(ViewError::ViewTypeDoesNotExist(_))
        ));
    }

    #[test]
    fn test_parse_orders_and_filter_types() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert!("up".parse::<SortOrder>().is_err());
        assert_eq!("or".parse::<FilterType>().unwrap(), FilterType::Or);
    }

    #[test]
    fn test_slug_shape() {
        let slug = generate_slug();
        assert_eq!(slug.len(), 43);
        assert!(slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(slug, generate_slug());
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("secret");
        assert!(hash.starts_with("sha256$"));
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("Secret", &hash));
        assert!(!verify_password("secret", "plain"));
        assert_ne!(hash, hash_password("secret"));
    }

    #[test]
    fn test_default_field_options() {
        let field = Field {
            id: 1,
            table_id: 1,
            name: "Notes".into(),
            field_type: FieldType::Text,
            primary: false,
        };
        assert!(!ViewFieldOption::default_for(ViewKind::Grid, &field).hidden);
        assert!(ViewFieldOption::default_for(ViewKind::Gallery, &field).hidden);

        let mut option = ViewFieldOption::default_for(ViewKind::Grid, &field);
        FieldOptionsUpdate {
            width: Some(120),
            aggregation: Some(Some(AggregationType::EmptyCount)),
            ..Default::default()
        }
        .apply_to(&mut option);
        assert_eq!(option.width, 120);
        assert_eq!(option.aggregation, Some(AggregationType::EmptyCount));
        assert!(!option.hidden);
    }

    #[test]
    fn test_aggregation_compatibility() {
        assert!(AggregationType::Sum.is_compatible_with(FieldKind::Number));
        assert!(!AggregationType::Sum.is_compatible_with(FieldKind::Text));
        assert!(AggregationType::EmptyCount.is_compatible_with(FieldKind::File));
        assert_eq!("max".parse::<AggregationType>().unwrap(), AggregationType::Max);
    }
}
