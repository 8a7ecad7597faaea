//! Error types for the view engine.
//!
//! Every fallible operation in the crate returns [`ViewError`]. Callers that
//! only need the broad category, for example to pick an HTTP status, can
//! match on [`ViewError::kind`] instead of the individual variants.

use crate::field::FieldId;
use crate::permissions::UserId;
use crate::table::{TableId, WorkspaceId};
use crate::view::{DecorationId, FilterGroupId, FilterId, SortId, ViewId};
use std::sync::PoisonError;
use thiserror::Error;

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    PermissionDenied,
    UnsupportedCapability,
    Configuration,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewError {
    #[error("table {0} does not exist")]
    TableDoesNotExist(TableId),

    #[error("field {0} does not exist")]
    FieldDoesNotExist(FieldId),

    #[error("view {0} does not exist")]
    ViewDoesNotExist(ViewId),

    #[error("no public view exists with slug '{0}'")]
    PublicViewDoesNotExist(String),

    #[error("view filter {0} does not exist")]
    ViewFilterDoesNotExist(FilterId),

    #[error("view filter group {0} does not exist")]
    ViewFilterGroupDoesNotExist(FilterGroupId),

    #[error("view sort {0} does not exist")]
    ViewSortDoesNotExist(SortId),

    #[error("view decoration {0} does not exist")]
    ViewDecorationDoesNotExist(DecorationId),

    #[error("filter type '{filter_type}' is not compatible with field type '{field_type}'")]
    ViewFilterTypeNotAllowedForField {
        filter_type: String,
        field_type: String,
    },

    #[error("field {0} does not support sorting")]
    ViewSortFieldNotSupported(FieldId),

    #[error("view {view_id} already has a sort on field {field_id}")]
    ViewSortFieldAlreadyExist { view_id: ViewId, field_id: FieldId },

    #[error("aggregation '{aggregation}' is not supported for field {field_id}")]
    AggregationTypeNotSupported { aggregation: String, field_id: FieldId },

    #[error("field {0} can not be used in a form view")]
    FormViewFieldTypeIsNotSupported(FieldId),

    #[error("unknown field type '{0}'")]
    FieldTypeDoesNotExist(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("user {0} does not belong to workspace {1}")]
    UserNotInWorkspace(UserId, WorkspaceId),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("view type '{0}' does not support filtering")]
    ViewFilterNotSupported(String),

    #[error("view type '{0}' does not support sorting")]
    ViewSortNotSupported(String),

    #[error("view type '{0}' can not be shared publicly")]
    CannotShareViewType(String),

    #[error("view type '{0}' does not support field options")]
    ViewDoesNotSupportFieldOptions(String),

    #[error("view type '{0}' does not support decorations")]
    ViewDecorationNotSupported(String),

    #[error("unknown filter type '{0}'")]
    ViewFilterTypeDoesNotExist(String),

    #[error("unknown view type '{0}'")]
    ViewTypeDoesNotExist(String),

    #[error("unknown sort order '{0}'")]
    SortOrderDoesNotExist(String),

    #[error("field {field_id} does not belong to table {table_id}")]
    FieldNotInTable { field_id: FieldId, table_id: TableId },

    #[error("field {0} is not part of the queried row projection")]
    FieldNotInProjection(FieldId),

    #[error("view {0} does not belong to the table or ownership scope being ordered")]
    ViewNotInTable(ViewId),

    #[error("field {0} is not related to the view's table")]
    UnrelatedField(FieldId),

    #[error("rows of table {found} can not be used with a view of table {expected}")]
    TableMismatch { expected: TableId, found: TableId },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("index build failed: {0}")]
    IndexBuild(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ViewError {
    pub fn kind(&self) -> ErrorKind {
        use ViewError::*;
        match self {
            TableDoesNotExist(_)
            | FieldDoesNotExist(_)
            | ViewDoesNotExist(_)
            | PublicViewDoesNotExist(_)
            | ViewFilterDoesNotExist(_)
            | ViewFilterGroupDoesNotExist(_)
            | ViewSortDoesNotExist(_)
            | ViewDecorationDoesNotExist(_) => ErrorKind::NotFound,

            ViewFilterTypeNotAllowedForField { .. }
            | ViewSortFieldNotSupported(_)
            | ViewSortFieldAlreadyExist { .. }
            | AggregationTypeNotSupported { .. }
            | FormViewFieldTypeIsNotSupported(_)
            | FieldTypeDoesNotExist(_)
            | InvalidValue(_) => ErrorKind::Validation,

            UserNotInWorkspace(..) | PermissionDenied(_) => ErrorKind::PermissionDenied,

            ViewFilterNotSupported(_)
            | ViewSortNotSupported(_)
            | CannotShareViewType(_)
            | ViewDoesNotSupportFieldOptions(_)
            | ViewDecorationNotSupported(_) => ErrorKind::UnsupportedCapability,

            ViewFilterTypeDoesNotExist(_)
            | ViewTypeDoesNotExist(_)
            | SortOrderDoesNotExist(_)
            | FieldNotInTable { .. }
            | FieldNotInProjection(_)
            | ViewNotInTable(_)
            | UnrelatedField(_)
            | TableMismatch { .. }
            | Config(_) => ErrorKind::Configuration,

            IndexOutOfRange { .. } | IndexBuild(_) | LockPoisoned(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<toml::de::Error> for ViewError {
    fn from(err: toml::de::Error) -> Self {
        ViewError::Config(err.to_string())
    }
}

impl<T> From<PoisonError<T>> for ViewError {
    fn from(err: PoisonError<T>) -> Self {
        ViewError::LockPoisoned(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ViewError>;
