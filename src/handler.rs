//! The `ViewHandler` facade.
//!
//! [`EngineState`] holds every table, every view and the index storage
//! behind `Arc`/`RwLock`s so one state can be shared by request handlers
//! and the background index worker. [`ViewHandler`] wraps the state with a
//! permission checker and an index queue and exposes the engine's
//! operations. View configuration CRUD lives in [`crate::store`], the public
//! query surface in [`crate::public`] and the row checker in
//! [`crate::row_checker`]; they are all `impl ViewHandler` blocks.
//!
//! Lock order, whenever more than one is held: index storage mutex, views,
//! the table map, then a single table.

use crate::config::EngineConfig;
use crate::error::{Result, ViewError};
use crate::events::{EngineEvent, EventBus};
use crate::field::{validate_registry, Field, FieldId, FieldType, FieldValue};
use crate::filters;
use crate::indexing::{
    self, ImmediateIndexQueue, IndexDescriptor, IndexManager, IndexQueue, IndexSignature, IndexState,
};
use crate::permissions::{Operation, PermissionChecker, UserId};
use crate::sorting;
use crate::table::{RowId, RowSet, SharedTable, Table, TableId, WorkspaceId};
use crate::view::{AggregationType, View, ViewId};
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Monotonic id source for one entity type.
#[derive(Debug, Default)]
pub(crate) struct Sequence(AtomicU64);

impl Sequence {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Default)]
pub(crate) struct Ids {
    pub(crate) table: Sequence,
    pub(crate) field: Sequence,
    pub(crate) view: Sequence,
    pub(crate) filter: Sequence,
    pub(crate) filter_group: Sequence,
    pub(crate) sort: Sequence,
    pub(crate) decoration: Sequence,
}

/// Everything the engine knows, shareable across threads.
#[derive(Debug)]
pub struct EngineState {
    config: RwLock<EngineConfig>,
    pub(crate) tables: RwLock<HashMap<TableId, SharedTable>>,
    pub(crate) trashed_tables: RwLock<HashSet<TableId>>,
    pub(crate) views: RwLock<BTreeMap<ViewId, View>>,
    pub(crate) indexes: IndexManager,
    pub(crate) events: EventBus,
    pub(crate) ids: Ids,
}

impl EngineState {
    /// Validates the static registries and creates an empty state.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        validate_registry()?;
        Ok(Arc::new(EngineState {
            config: RwLock::new(config),
            tables: RwLock::new(HashMap::new()),
            trashed_tables: RwLock::new(HashSet::new()),
            views: RwLock::new(BTreeMap::new()),
            indexes: IndexManager::new(),
            events: EventBus::new(),
            ids: Ids::default(),
        }))
    }

    pub fn config(&self) -> Result<EngineConfig> {
        Ok(self.config.read()?.clone())
    }

    pub fn collation(&self) -> Result<Option<String>> {
        Ok(self.config.read()?.collation.clone())
    }

    pub(crate) fn set_collation(&self, collation: Option<String>) -> Result<()> {
        self.config.write()?.collation = collation;
        Ok(())
    }

    pub(crate) fn set_auto_index(&self, enabled: bool) -> Result<()> {
        self.config.write()?.auto_index_view_enabled = enabled;
        Ok(())
    }

    pub fn is_table_trashed(&self, table_id: TableId) -> Result<bool> {
        Ok(self.trashed_tables.read()?.contains(&table_id))
    }

    /// A live (not trashed) table.
    pub fn table(&self, table_id: TableId) -> Result<SharedTable> {
        if self.is_table_trashed(table_id)? {
            return Err(ViewError::TableDoesNotExist(table_id));
        }
        self.tables
            .read()?
            .get(&table_id)
            .cloned()
            .ok_or(ViewError::TableDoesNotExist(table_id))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }
}

#[derive(Clone)]
pub struct ViewHandler {
    pub(crate) state: Arc<EngineState>,
    pub(crate) permissions: Arc<dyn PermissionChecker>,
    pub(crate) indexing: Arc<dyn IndexQueue>,
}

impl std::fmt::Debug for ViewHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandler").field("state", &self.state).finish()
    }
}

impl ViewHandler {
    pub fn new(
        state: Arc<EngineState>,
        permissions: Arc<dyn PermissionChecker>,
        indexing: Arc<dyn IndexQueue>,
    ) -> Self {
        ViewHandler {
            state,
            permissions,
            indexing,
        }
    }

    /// Handler whose index builds run inline, on the thread that triggers
    /// them.
    pub fn with_immediate_indexing(
        config: EngineConfig,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Result<Self> {
        let state = EngineState::new(config)?;
        let queue = Arc::new(ImmediateIndexQueue::new(Arc::clone(&state)));
        Ok(Self::new(state, permissions, queue))
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.state.events
    }

    pub fn config(&self) -> Result<EngineConfig> {
        self.state.config()
    }

    pub fn set_auto_index_view_enabled(&self, enabled: bool) -> Result<()> {
        self.state.set_auto_index(enabled)
    }

    // ------------------------------------------------------------------
    // Lookups shared by the other handler modules
    // ------------------------------------------------------------------

    pub(crate) fn authorize_table(
        &self,
        user_id: UserId,
        operation: Operation,
        table_id: TableId,
    ) -> Result<SharedTable> {
        let table = self.state.table(table_id)?;
        let workspace_id = table.read()?.workspace_id();
        self.permissions.check(user_id, operation, workspace_id)?;
        Ok(table)
    }

    /// A live view, regardless of who asks.
    pub(crate) fn view_snapshot(&self, view_id: ViewId) -> Result<View> {
        let view = self
            .state
            .views
            .read()?
            .get(&view_id)
            .cloned()
            .ok_or(ViewError::ViewDoesNotExist(view_id))?;
        if view.trashed || self.state.is_table_trashed(view.table_id)? {
            return Err(ViewError::ViewDoesNotExist(view_id));
        }
        Ok(view)
    }

    /// A live view the user may perform `operation` on. Personal views are
    /// off limits to everyone but their owner.
    pub(crate) fn authorize_view(
        &self,
        user_id: UserId,
        operation: Operation,
        view_id: ViewId,
    ) -> Result<View> {
        let view = self.view_snapshot(view_id)?;
        self.authorize_table(user_id, operation, view.table_id)?;
        if !view.is_accessible_by(user_id) {
            return Err(ViewError::PermissionDenied(format!(
                "view {} is personal to another user",
                view_id
            )));
        }
        Ok(view)
    }

    /// Runs `change` on the stored view under the views write lock.
    pub(crate) fn mutate_view<R>(
        &self,
        view_id: ViewId,
        change: impl FnOnce(&mut View) -> Result<R>,
    ) -> Result<R> {
        let mut views = self.state.views.write()?;
        let view = views
            .get_mut(&view_id)
            .ok_or(ViewError::ViewDoesNotExist(view_id))?;
        change(view)
    }

    pub(crate) fn table_fields(&self, table_id: TableId) -> Result<Vec<Field>> {
        let table = self.state.table(table_id)?;
        let fields = table.read()?.fields().to_vec();
        Ok(fields)
    }

    // ------------------------------------------------------------------
    // Tables, fields and rows
    // ------------------------------------------------------------------

    pub fn create_table(&self, user_id: UserId, workspace_id: WorkspaceId, name: &str) -> Result<TableId> {
        self.permissions
            .check(user_id, Operation::CreateTable, workspace_id)?;
        let capacity = self.state.config()?.changeset_capacity;
        let table_id = self.state.ids.table.next();
        let table = Table::with_changeset_capacity(table_id, workspace_id, name, capacity);
        self.state.tables.write()?.insert(table_id, table.into_shared());
        info!("created table {} '{}' in workspace {}", table_id, name, workspace_id);
        Ok(table_id)
    }

    pub fn get_table(&self, table_id: TableId) -> Result<SharedTable> {
        self.state.table(table_id)
    }

    /// Adds a field. The first field of a table becomes its primary field.
    pub fn create_field(&self, table_id: TableId, name: &str, field_type: FieldType) -> Result<Field> {
        let shared = self.state.table(table_id)?;
        let field = {
            let mut table = shared.write()?;
            let field = Field {
                id: self.state.ids.field.next(),
                table_id,
                name: name.to_string(),
                field_type,
                primary: table.fields().is_empty(),
            };
            table.add_field(field.clone())?;
            field
        };
        debug!("created field {} ({}) in table {}", field.id, field.kind(), table_id);
        self.state.indexes.sync_table(&shared)?;
        Ok(field)
    }

    /// Replays a schema change into the table's indexes so ready indexes
    /// stay at the table's current version.
    fn sync_indexes(&self, table_id: TableId) -> Result<()> {
        let table = self.state.table(table_id)?;
        self.state.indexes.sync_table(&table)
    }

    pub(crate) fn next_field_id(&self) -> FieldId {
        self.state.ids.field.next()
    }

    /// Changes a field's type and cascades to the filters, sorts, field
    /// options and indexes that depend on it.
    pub fn change_field_type(&self, table_id: TableId, field_id: FieldId, field_type: FieldType) -> Result<Field> {
        let table = self.state.table(table_id)?;
        let field = {
            let mut table = table.write()?;
            table.change_field_type(field_id, field_type)?;
            table.require_field(field_id)?.clone()
        };
        let event = EngineEvent::FieldTypeChanged { table_id, field_id };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(field)
    }

    pub fn delete_field(&self, table_id: TableId, field_id: FieldId) -> Result<Field> {
        let table = self.state.table(table_id)?;
        let field = table.write()?.remove_field(field_id)?;
        let event = EngineEvent::FieldDeleted { table_id, field_id };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(field)
    }

    pub fn create_row(&self, table_id: TableId, values: Vec<(FieldId, FieldValue)>) -> Result<RowId> {
        let table = self.state.table(table_id)?;
        let row_id = table.write()?.create_row(values)?;
        self.rows_changed(table_id, vec![row_id])?;
        Ok(row_id)
    }

    pub fn update_row(&self, table_id: TableId, row_id: RowId, values: Vec<(FieldId, FieldValue)>) -> Result<()> {
        let table = self.state.table(table_id)?;
        table.write()?.update_row(row_id, values)?;
        self.rows_changed(table_id, vec![row_id])
    }

    pub fn move_row(&self, table_id: TableId, row_id: RowId, order: Decimal) -> Result<()> {
        let table = self.state.table(table_id)?;
        table.write()?.set_row_order(row_id, order)?;
        self.rows_changed(table_id, vec![row_id])
    }

    pub fn delete_row(&self, table_id: TableId, row_id: RowId) -> Result<()> {
        let table = self.state.table(table_id)?;
        table.write()?.delete_row(row_id)?;
        self.rows_changed(table_id, vec![row_id])
    }

    fn rows_changed(&self, table_id: TableId, row_ids: Vec<RowId>) -> Result<()> {
        let event = EngineEvent::RowsChanged { table_id, row_ids };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(())
    }

    pub fn trash_table(&self, user_id: UserId, table_id: TableId) -> Result<()> {
        self.authorize_table(user_id, Operation::UpdateTable, table_id)?;
        let event = EngineEvent::TableTrashed { table_id };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(())
    }

    pub fn restore_table(&self, user_id: UserId, table_id: TableId) -> Result<()> {
        let table = self
            .state
            .tables
            .read()?
            .get(&table_id)
            .cloned()
            .ok_or(ViewError::TableDoesNotExist(table_id))?;
        let workspace_id = table.read()?.workspace_id();
        self.permissions
            .check(user_id, Operation::UpdateTable, workspace_id)?;
        let event = EngineEvent::TableRestored { table_id };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event reactions
    // ------------------------------------------------------------------

    /// Reacts to an inbound engine event. Outbound notifications are ignored.
    pub fn handle_event(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::FieldTypeChanged { table_id, field_id } => {
                self.after_field_type_changed(*table_id, *field_id)
            }
            EngineEvent::FieldDeleted { table_id, field_id } => {
                self.after_field_deleted(*table_id, *field_id)
            }
            EngineEvent::ViewPermanentlyDeleted {
                db_index_name: Some(name),
                ..
            } => indexing::drop_index(&self.state, name),
            EngineEvent::CollationChanged { .. } => {
                let indexed: Vec<ViewId> = self
                    .state
                    .views
                    .read()?
                    .values()
                    .filter(|view| view.db_index_name.is_some() && !view.trashed)
                    .map(|view| view.id)
                    .collect();
                for view_id in indexed {
                    self.schedule_index_update(view_id)?;
                }
                Ok(())
            }
            EngineEvent::ViewLoaded { view_id } => {
                self.schedule_index_creation_if_needed(*view_id).map(|_| ())
            }
            EngineEvent::RowsChanged { table_id, .. } => {
                let table = self.state.table(*table_id)?;
                self.state.indexes.sync_table(&table)
            }
            EngineEvent::TableTrashed { table_id } => {
                self.state.trashed_tables.write()?.insert(*table_id);
                info!("table {} trashed", table_id);
                Ok(())
            }
            EngineEvent::TableRestored { table_id } => {
                self.state.trashed_tables.write()?.remove(table_id);
                info!("table {} restored", table_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn after_field_type_changed(&self, table_id: TableId, field_id: FieldId) -> Result<()> {
        let field = {
            let table = self.state.table(table_id)?;
            let table = table.read()?;
            table.require_field(field_id)?.clone()
        };
        let kind = field.kind();
        let mut detach = Vec::new();
        let mut reschedule = Vec::new();
        {
            let mut views = self.state.views.write()?;
            for view in views.values_mut().filter(|view| view.table_id == table_id) {
                let before = view.filters.len();
                view.filters
                    .retain(|filter| filter.field_id != field_id || filter.operator.is_compatible_with(kind));
                if view.filters.len() != before {
                    info!(
                        "deleted {} filter(s) of view {} no longer compatible with field {}",
                        before - view.filters.len(),
                        view.id,
                        field_id
                    );
                }

                let sorted_on_field = view.sorts.iter().any(|sort| sort.field_id == field_id);
                if sorted_on_field && !kind.can_order() {
                    view.sorts.retain(|sort| sort.field_id != field_id);
                    info!("deleted sort on field {} of view {}", field_id, view.id);
                }

                if let Some(option) = view.field_options.get_mut(&field_id) {
                    if matches!(option.aggregation, Some(a) if !a.is_compatible_with(kind)) {
                        option.aggregation = None;
                    }
                }

                if sorted_on_field {
                    detach.push(view.id);
                    if !view.sorts.is_empty() {
                        reschedule.push(view.id);
                    }
                }
            }
        }
        indexing::detach_indexes(&self.state, &detach)?;
        self.sync_indexes(table_id)?;
        for view_id in reschedule {
            self.schedule_index_update(view_id)?;
        }
        Ok(())
    }

    fn after_field_deleted(&self, table_id: TableId, field_id: FieldId) -> Result<()> {
        let mut detach = Vec::new();
        let mut reschedule = Vec::new();
        {
            let mut views = self.state.views.write()?;
            for view in views.values_mut().filter(|view| view.table_id == table_id) {
                view.filters.retain(|filter| filter.field_id != field_id);
                view.field_options.remove(&field_id);
                if view.sorts.iter().any(|sort| sort.field_id == field_id) {
                    view.sorts.retain(|sort| sort.field_id != field_id);
                    detach.push(view.id);
                    if !view.sorts.is_empty() {
                        reschedule.push(view.id);
                    }
                }
            }
        }
        indexing::detach_indexes(&self.state, &detach)?;
        self.sync_indexes(table_id)?;
        for view_id in reschedule {
            self.schedule_index_update(view_id)?;
        }
        Ok(())
    }

    /// Changes the active collation; indexed views get rebuilt under it.
    pub fn set_collation(&self, collation: Option<String>) -> Result<()> {
        self.state.set_collation(collation.clone())?;
        let event = EngineEvent::CollationChanged { collation };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query path
    // ------------------------------------------------------------------

    /// Filters rows with the view's filters. Rows are returned unchanged
    /// when the view has its filters disabled.
    pub fn apply_filters(&self, view_id: ViewId, rows: RowSet) -> Result<RowSet> {
        let view = self.view_snapshot(view_id)?;
        if !view.capabilities().can_filter {
            return Err(ViewError::ViewFilterNotSupported(view.kind.to_string()));
        }
        check_rows_table(&view, &rows)?;
        let compiled = filters::compile(&view, rows.model())?;
        Ok(compiled.apply(rows))
    }

    /// Orders rows by the view's sorts, through its index when that is
    /// ready for exactly these rows.
    pub fn apply_sorting(&self, view_id: ViewId, rows: RowSet) -> Result<RowSet> {
        let view = self.view_snapshot(view_id)?;
        if !view.capabilities().can_sort {
            return Err(ViewError::ViewSortNotSupported(view.kind.to_string()));
        }
        check_rows_table(&view, &rows)?;
        let collation = self.state.collation()?;
        let spec = sorting::compile(&view, rows.model(), collation.as_deref())?;
        if let Some(signature) = IndexSignature::for_view(&view, rows.model().fields(), collation.as_deref()) {
            if let Some(ordered) = self.state.indexes.order_rows(&view, &signature, &rows)? {
                debug!("view {} sorted through index", view_id);
                return Ok(ordered);
            }
        }
        Ok(spec.apply(rows))
    }

    /// Footer aggregations configured in the view's field options, computed
    /// over the view's filtered rows.
    pub fn get_field_aggregations(&self, user_id: UserId, view_id: ViewId) -> Result<BTreeMap<FieldId, FieldValue>> {
        let view = self.authorize_view(user_id, Operation::ReadAggregations, view_id)?;
        let requested: Vec<(FieldId, AggregationType)> = view
            .field_options
            .values()
            .filter_map(|option| option.aggregation.map(|a| (option.field_id, a)))
            .collect();
        self.aggregate(&view, &requested)
    }

    pub fn get_field_aggregation(
        &self,
        user_id: UserId,
        view_id: ViewId,
        field_id: FieldId,
        aggregation: AggregationType,
    ) -> Result<FieldValue> {
        let view = self.authorize_view(user_id, Operation::ReadAggregations, view_id)?;
        let mut values = self.aggregate(&view, &[(field_id, aggregation)])?;
        values
            .remove(&field_id)
            .ok_or(ViewError::FieldDoesNotExist(field_id))
    }

    fn aggregate(&self, view: &View, requested: &[(FieldId, AggregationType)]) -> Result<BTreeMap<FieldId, FieldValue>> {
        let table = self.state.table(view.table_id)?;
        let rows = {
            let table = table.read()?;
            for (field_id, _) in requested {
                table.require_field(*field_id)?;
            }
            table.query(&table.full_model())
        };
        let rows = if view.capabilities().can_filter {
            filters::compile(view, rows.model())?.apply(rows)
        } else {
            rows
        };
        let collation = self.state.collation()?;
        requested
            .iter()
            .map(|(field_id, aggregation)| {
                rows.aggregate(*field_id, *aggregation, collation.as_deref())
                    .map(|value| (*field_id, value))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// The index the view's sorts call for. Never creates storage.
    pub fn get_index(&self, view_id: ViewId) -> Result<Option<IndexDescriptor>> {
        let view = self.view_snapshot(view_id)?;
        let table = self.state.table(view.table_id)?;
        let model = table.read()?.full_model();
        let collation = self.state.collation()?;
        Ok(self.state.indexes.descriptor(&view, &model, collation.as_deref()))
    }

    pub fn does_index_exist(&self, name: &str) -> bool {
        self.state.indexes.does_index_exist(name)
    }

    pub fn index_state(&self, view_id: ViewId) -> Result<IndexState> {
        Ok(match self.get_index(view_id)? {
            None => IndexState::NoIndex,
            Some(descriptor) if descriptor.ready => IndexState::Ready(descriptor.name),
            Some(_) => IndexState::Pending,
        })
    }

    pub fn update_index(&self, view_id: ViewId) -> Result<IndexState> {
        indexing::update_index(&self.state, view_id)
    }

    /// Enqueues an index build for a loaded view if its index is missing or
    /// outdated. Reads only in-memory view and schema state.
    pub fn schedule_index_creation_if_needed(&self, view_id: ViewId) -> Result<bool> {
        let view = self.view_snapshot(view_id)?;
        let table = self.state.table(view.table_id)?;
        let model = table.read()?.full_model();
        let config = self.state.config()?;
        Ok(indexing::schedule_index_creation_if_needed(
            &view,
            &model,
            config.collation.as_deref(),
            config.auto_index_view_enabled,
            self.indexing.as_ref(),
        ))
    }

    /// After a sort change: drop the index right away when the view no
    /// longer needs one, otherwise enqueue a rebuild.
    pub(crate) fn schedule_index_update(&self, view_id: ViewId) -> Result<()> {
        let view = self.view_snapshot(view_id)?;
        let fields = self.table_fields(view.table_id)?;
        let config = self.state.config()?;
        match IndexSignature::for_view(&view, &fields, config.collation.as_deref()) {
            None => indexing::detach_indexes(&self.state, &[view_id]),
            Some(_) => {
                if config.auto_index_view_enabled {
                    self.indexing.enqueue(view_id);
                }
                Ok(())
            }
        }
    }
}

fn check_rows_table(view: &View, rows: &RowSet) -> Result<()> {
    if rows.model().table_id() != view.table_id {
        return Err(ViewError::TableMismatch {
            expected: view.table_id,
            found: rows.model().table_id(),
        });
    }
    Ok(())
}
