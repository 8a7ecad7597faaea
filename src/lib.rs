/// TableView - View Engine for Typed Tables
///
/// Filtered, sorted and publicly shareable views over in-memory tables,
/// with materialized ordering indexes kept in sync with row changes and a
/// visibility checker for realtime notifications on public views.

pub mod error;
pub mod config;
pub mod field;
pub mod column;
pub mod sequence;
pub mod changeset;
pub mod table;
pub mod view;
pub mod filters;
pub mod sorting;
pub mod indexing;
pub mod row_checker;
pub mod permissions;
pub mod events;
pub mod handler;
pub mod store;
pub mod public;

pub use error::{ErrorKind, Result, ViewError};
pub use config::EngineConfig;
pub use field::{Field, FieldId, FieldKind, FieldType, FieldValue, SelectOption};
pub use column::Column;
pub use sequence::TieredSequence;
pub use changeset::{Changeset, IncrementalView, TableChange};
pub use table::{Row, RowId, RowModel, RowSet, SharedTable, Table, TableId, WorkspaceId};
pub use view::{
    AggregationType, FieldOptionsUpdate, FilterType, OwnershipType, SortOrder, View, ViewCapabilities,
    ViewDecoration, ViewFieldOption, ViewFilter, ViewFilterGroup, ViewId, ViewKind, ViewSort,
};
pub use filters::{CompiledFilter, FilterBuilder, FilterOperator};
pub use sorting::{OrderSpec, SortKey};
pub use indexing::{
    ImmediateIndexQueue, IndexDescriptor, IndexManager, IndexQueue, IndexSignature, IndexState, TokioIndexQueue,
};
pub use row_checker::{AllowedRows, PublicViewRowChecker, PublicViewRows};
pub use permissions::{AllowAll, Operation, PermissionChecker, UserId, WorkspaceMembers};
pub use events::{EngineEvent, EventBus, EventLog, EventSubscriber};
pub use handler::{EngineState, ViewHandler};
pub use store::{DecorationUpdate, FilterUpdate, NewView, SortUpdate, ViewUpdate};
pub use public::{PublicRows, PublicRowsQuery};

/// Installs `env_logger` honouring `RUST_LOG`, `info` otherwise. Calling it
/// again is a no-op.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
