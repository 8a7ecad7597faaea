//! View Materialization Index Manager.
//!
//! A view with sorts can be backed by a materialized ordering index: the
//! table's row ids kept in the view's sort order. An index is identified by
//! its [`IndexSignature`] (table, view, ordered sort keys with field types,
//! and the collation), and its storage name is derived from a hash of that
//! signature. Every view owns its storage; two views with identical sorts
//! still get two indexes.
//!
//! Lifecycle per view: `NoIndex → Pending → Ready → (invalidated) → Pending | NoIndex`.
//!
//! - [`IndexManager::descriptor`] computes the desired signature without
//!   touching storage.
//! - [`schedule_index_creation_if_needed`] compares that signature with the
//!   view's stored `db_index_name` and enqueues a build when they differ.
//! - [`update_index`] builds or replaces storage. The build itself only
//!   holds the table's read lock; the manager mutex and the views lock are
//!   taken afterwards to swap the finished storage in, so a reader sees
//!   either the old or the new index, never a half-built one.
//!
//! Storage is dropped as soon as its view stops pointing at it.

use crate::changeset::{IncrementalView, TableChange};
use crate::error::{Result, ViewError};
use crate::field::{Field, FieldId, FieldKind};
use crate::handler::EngineState;
use crate::sequence::TieredSequence;
use crate::sorting::{OrderSpec, SortKey};
use crate::table::{Row, RowId, RowModel, RowSet, SharedTable, Table, TableId};
use crate::view::{SortOrder, View, ViewId};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What a view's index is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSignature {
    pub table_id: TableId,
    pub view_id: ViewId,
    pub keys: Vec<(FieldId, FieldKind, SortOrder)>,
    pub collation: Option<String>,
}

impl IndexSignature {
    /// The signature `view` currently needs, or `None` when it has no sorts
    /// or sorts on a field that can not be ordered.
    pub fn for_view(view: &View, fields: &[Field], collation: Option<&str>) -> Option<Self> {
        if view.sorts.is_empty() {
            return None;
        }
        let mut keys = Vec::with_capacity(view.sorts.len());
        for sort in &view.sorts {
            let field = fields.iter().find(|field| field.id == sort.field_id)?;
            if !field.kind().can_order() {
                return None;
            }
            keys.push((field.id, field.kind(), sort.order));
        }
        Some(IndexSignature {
            table_id: view.table_id,
            view_id: view.id,
            keys,
            collation: collation.map(str::to_string),
        })
    }

    /// Storage name: `tbl<table id>_view_idx_<12 hex chars>`.
    pub fn name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.table_id.to_be_bytes());
        hasher.update(self.view_id.to_be_bytes());
        for (field_id, kind, order) in &self.keys {
            hasher.update(format!("|{}:{}:{}", field_id, kind.name(), order.as_str()).as_bytes());
        }
        hasher.update(b"|collation:");
        hasher.update(self.collation.as_deref().unwrap_or("").as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("tbl{}_view_idx_{}", self.table_id, &digest[..12])
    }

    pub fn field_ids(&self) -> Vec<FieldId> {
        self.keys.iter().map(|(field_id, _, _)| *field_id).collect()
    }

    fn order_spec(&self, model: &RowModel) -> Result<OrderSpec> {
        let mut keys = Vec::with_capacity(self.keys.len());
        for (field_id, kind, order) in &self.keys {
            let field = model.require(*field_id)?;
            if field.kind() != *kind {
                return Err(ViewError::IndexBuild(format!(
                    "field {} changed type from {} to {}",
                    field_id,
                    kind,
                    field.kind()
                )));
            }
            keys.push(SortKey::new(*field_id, field.field_type.clone(), *order));
        }
        Ok(OrderSpec::new(keys, self.collation.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub signature: IndexSignature,
    /// The view points at this index and its storage exists.
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    NoIndex,
    Pending,
    Ready(String),
}

/// Materialized ordering of one table's rows.
#[derive(Debug)]
pub struct IndexStorage {
    signature: IndexSignature,
    spec: OrderSpec,
    model: RowModel,
    entries: TieredSequence<RowId>,
    /// Sort key values of every indexed row, used to find entries again.
    keys: HashMap<RowId, Row>,
    synced_version: u64,
}

impl IndexStorage {
    pub fn build(signature: IndexSignature, table: &Table) -> Result<Self> {
        let model = table.model(&signature.field_ids())?;
        let spec = signature.order_spec(&model)?;
        let rows = table.query(&model);
        let version = rows.version();
        let mut sorted = rows.into_rows();
        sorted.sort_by(|a, b| spec.compare(a, b));
        let entries = sorted.iter().map(|row| row.id).collect();
        let keys = sorted.into_iter().map(|row| (row.id, row)).collect();
        Ok(IndexStorage {
            signature,
            spec,
            model,
            entries,
            keys,
            synced_version: version,
        })
    }

    pub fn signature(&self) -> &IndexSignature {
        &self.signature
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.entries.to_vec()
    }

    fn remove_entry(&mut self, row_id: RowId) -> Result<()> {
        let Some(previous) = self.keys.remove(&row_id) else {
            return Ok(());
        };
        let spec = &self.spec;
        let keys = &self.keys;
        let position = self.entries.partition_point(|id| match keys.get(id) {
            Some(row) => spec.compare(row, &previous).is_lt(),
            None => false,
        });
        match self.entries.get(position) {
            Some(id) if *id == row_id => {
                self.entries.remove(position)?;
            }
            _ => {
                self.entries.remove_where(|id| *id == row_id);
            }
        }
        Ok(())
    }

    fn insert_entry(&mut self, row: Row) -> Result<()> {
        let spec = &self.spec;
        let keys = &self.keys;
        self.entries.insert_sorted_by(row.id, |existing, _| match keys.get(existing) {
            Some(existing) => spec.compare(existing, &row),
            None => Ordering::Less,
        })?;
        self.keys.insert(row.id, row);
        Ok(())
    }

    fn refresh_row(&mut self, table: &Table, row_id: RowId) -> Result<()> {
        self.remove_entry(row_id)?;
        if table.contains_row(row_id) {
            let row = table.row(row_id, &self.model)?;
            self.insert_entry(row)?;
        }
        Ok(())
    }

    /// Orders `rows` by index position, or `None` when the index does not
    /// describe exactly the state `rows` were read at.
    pub fn order(&self, rows: RowSet) -> Option<RowSet> {
        if self.synced_version != rows.version() {
            return None;
        }
        let expected = rows.len();
        let mut by_id: HashMap<RowId, Row> = rows
            .rows()
            .iter()
            .map(|row| (row.id, row.clone()))
            .collect();
        let ordered: Vec<Row> = self
            .entries
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        if ordered.len() != expected {
            return None;
        }
        Some(rows.with_rows(ordered))
    }
}

impl IncrementalView for IndexStorage {
    fn apply_changes(&mut self, table: &Table, changes: &[TableChange]) -> Result<bool> {
        let key_fields = self.signature.field_ids();
        let mut modified = false;
        for change in changes {
            match change {
                TableChange::SchemaChanged { field_id } if key_fields.contains(field_id) => {
                    self.rebuild(table)?;
                    return Ok(true);
                }
                TableChange::SchemaChanged { .. } => {}
                TableChange::RowDeleted { row_id } => {
                    self.remove_entry(*row_id)?;
                    modified = true;
                }
                change if change.affects_order_of(&key_fields) => {
                    if let Some(row_id) = change.row_id() {
                        self.refresh_row(table, row_id)?;
                        modified = true;
                    }
                }
                _ => {}
            }
        }
        self.synced_version = table.version();
        Ok(modified)
    }

    fn last_synced_version(&self) -> u64 {
        self.synced_version
    }

    fn rebuild(&mut self, table: &Table) -> Result<()> {
        debug!("rebuilding index {}", self.signature.name());
        *self = IndexStorage::build(self.signature.clone(), table)?;
        Ok(())
    }
}

/// Named index storage, guarded by one mutex. Whoever holds it together
/// with other locks takes it first, then the views lock, then table locks.
#[derive(Debug, Default)]
pub struct IndexManager {
    storages: Mutex<HashMap<String, IndexStorage>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, IndexStorage>>> {
        Ok(self.storages.lock()?)
    }

    pub fn does_index_exist(&self, name: &str) -> bool {
        self.storages
            .lock()
            .map(|storages| storages.contains_key(name))
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .storages
            .lock()
            .map(|storages| storages.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Desired index of `view`. Does not create anything.
    pub fn descriptor(
        &self,
        view: &View,
        model: &RowModel,
        collation: Option<&str>,
    ) -> Option<IndexDescriptor> {
        let signature = IndexSignature::for_view(view, model.fields(), collation)?;
        let name = signature.name();
        let ready = view.db_index_name.as_deref() == Some(name.as_str()) && self.does_index_exist(&name);
        Some(IndexDescriptor {
            name,
            signature,
            ready,
        })
    }

    /// Orders rows through the index of `view` when it is ready and in sync.
    pub fn order_rows(
        &self,
        view: &View,
        signature: &IndexSignature,
        rows: &RowSet,
    ) -> Result<Option<RowSet>> {
        let Some(name) = view.db_index_name.as_deref() else {
            return Ok(None);
        };
        let storages = self.lock()?;
        match storages.get(name) {
            Some(storage) if storage.signature() == signature => Ok(storage.order(rows.clone())),
            _ => Ok(None),
        }
    }

    /// Replays the changes of `table` into every index built on it. An
    /// index that can not catch up is dropped; views fall back to scanning
    /// until it is rebuilt.
    pub fn sync_table(&self, table: &SharedTable) -> Result<()> {
        let mut storages = self.lock()?;
        let table = table.read()?;
        let mut broken = Vec::new();
        for (name, storage) in storages.iter_mut() {
            if storage.signature().table_id != table.id() {
                continue;
            }
            if let Err(err) = storage.catch_up(&table) {
                warn!("index {} could not catch up: {}", name, err);
                broken.push(name.clone());
            }
        }
        for name in broken {
            storages.remove(&name);
        }
        Ok(())
    }
}

fn drop_storage(storages: &mut HashMap<String, IndexStorage>, name: &str) {
    if storages.remove(name).is_some() {
        info!("dropped index {}", name);
    }
}

/// Builds or replaces the index of a view so it matches the view's current
/// sorts and the active collation. Idempotent.
///
/// New storage is built from a snapshot of the view while only the table's
/// read lock is held. It is swapped in afterwards, provided the view still
/// wants the same signature; otherwise the build is discarded and `Pending`
/// returned, since the change that moved the signature schedules its own
/// build. On error nothing is changed.
pub fn update_index(state: &EngineState, view_id: ViewId) -> Result<IndexState> {
    let view = state
        .views
        .read()?
        .get(&view_id)
        .cloned()
        .ok_or(ViewError::ViewDoesNotExist(view_id))?;
    let shared = state.table(view.table_id)?;
    let desired = {
        let collation = state.collation()?;
        let table = shared.read()?;
        IndexSignature::for_view(&view, table.fields(), collation.as_deref())
    };

    let built = match &desired {
        Some(signature) if !state.indexes.does_index_exist(&signature.name()) => {
            let table = shared.read()?;
            let storage = IndexStorage::build(signature.clone(), &table)?;
            debug!("built index {} ({} rows) for view {}", signature.name(), storage.len(), view_id);
            Some(storage)
        }
        _ => None,
    };

    let collation = state.collation()?;
    let mut storages = state.indexes.lock()?;
    let mut views = state.views.write()?;
    let view = views.get_mut(&view_id).ok_or(ViewError::ViewDoesNotExist(view_id))?;
    let table = shared.read()?;
    if IndexSignature::for_view(view, table.fields(), collation.as_deref()) != desired {
        debug!("view {} changed while its index was built, discarding", view_id);
        return Ok(IndexState::Pending);
    }

    let (next, index_state) = match desired {
        None => (None, IndexState::NoIndex),
        Some(signature) => {
            let name = signature.name();
            match (built, storages.get_mut(&name)) {
                (_, Some(storage)) => storage.catch_up(&table)?,
                (Some(mut storage), None) => {
                    storage.catch_up(&table)?;
                    info!("created index {} ({} rows) for view {}", name, storage.len(), view_id);
                    storages.insert(name.clone(), storage);
                }
                (None, None) => {
                    let storage = IndexStorage::build(signature, &table)?;
                    info!("created index {} ({} rows) for view {}", name, storage.len(), view_id);
                    storages.insert(name.clone(), storage);
                }
            }
            (Some(name.clone()), IndexState::Ready(name))
        }
    };
    drop(table);

    let previous = std::mem::replace(&mut view.db_index_name, next.clone());
    if let Some(previous) = previous {
        if next.as_deref() != Some(previous.as_str()) {
            drop_storage(&mut storages, &previous);
        }
    }
    Ok(index_state)
}

/// Detaches the given views from their indexes and drops that storage.
pub(crate) fn detach_indexes(state: &EngineState, view_ids: &[ViewId]) -> Result<()> {
    let mut storages = state.indexes.lock()?;
    let mut views = state.views.write()?;
    for view_id in view_ids {
        if let Some(name) = views.get_mut(view_id).and_then(|view| view.db_index_name.take()) {
            drop_storage(&mut storages, &name);
        }
    }
    Ok(())
}

/// Drops the storage of a view that no longer exists.
pub(crate) fn drop_index(state: &EngineState, name: &str) -> Result<()> {
    let mut storages = state.indexes.lock()?;
    drop_storage(&mut storages, name);
    Ok(())
}

/// Enqueues an index build when the view's stored index name differs from
/// the one its sorts need. Works only from the view and model it is given.
/// Returns whether a build was enqueued.
pub fn schedule_index_creation_if_needed(
    view: &View,
    model: &RowModel,
    collation: Option<&str>,
    auto_index_enabled: bool,
    queue: &dyn IndexQueue,
) -> bool {
    if !auto_index_enabled || view.trashed {
        return false;
    }
    let desired = IndexSignature::for_view(view, model.fields(), collation).map(|s| s.name());
    if desired == view.db_index_name {
        return false;
    }
    debug!(
        "view {} needs index {:?}, has {:?}",
        view.id, desired, view.db_index_name
    );
    queue.enqueue(view.id);
    true
}

/// Background task runner for index builds, keyed by view id.
pub trait IndexQueue: Send + Sync {
    fn enqueue(&self, view_id: ViewId);
}

/// Runs every build inline on the calling thread.
pub struct ImmediateIndexQueue {
    state: Arc<EngineState>,
}

impl ImmediateIndexQueue {
    pub fn new(state: Arc<EngineState>) -> Self {
        ImmediateIndexQueue { state }
    }
}

impl IndexQueue for ImmediateIndexQueue {
    fn enqueue(&self, view_id: ViewId) {
        match update_index(&self.state, view_id) {
            Ok(index_state) => debug!("view {} index state {:?}", view_id, index_state),
            Err(err) => warn!("index update for view {} failed: {}", view_id, err),
        }
    }
}

/// Tokio worker fed by an unbounded channel. A view id already waiting in
/// the queue is not enqueued twice.
pub struct TokioIndexQueue {
    sender: mpsc::UnboundedSender<ViewId>,
    pending: Arc<Mutex<HashSet<ViewId>>>,
}

impl TokioIndexQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(state: Arc<EngineState>) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ViewError::Config(format!("index worker needs a tokio runtime: {}", e)))?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<ViewId>();
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let worker_pending = Arc::clone(&pending);

        let handle = runtime.spawn(async move {
            info!("index worker started");
            while let Some(view_id) = receiver.recv().await {
                if let Ok(mut pending) = worker_pending.lock() {
                    pending.remove(&view_id);
                }
                run_with_retries(Arc::clone(&state), view_id).await;
            }
            info!("index worker stopped");
        });

        Ok((Arc::new(TokioIndexQueue { sender, pending }), handle))
    }

    /// Number of view ids waiting for the worker.
    pub fn pending(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }
}

impl IndexQueue for TokioIndexQueue {
    fn enqueue(&self, view_id: ViewId) {
        let newly_pending = match self.pending.lock() {
            Ok(mut pending) => pending.insert(view_id),
            Err(_) => true,
        };
        if !newly_pending {
            debug!("index build for view {} already queued", view_id);
            return;
        }
        if self.sender.send(view_id).is_err() {
            warn!("index worker is gone, dropping build for view {}", view_id);
        }
    }
}

async fn run_with_retries(state: Arc<EngineState>, view_id: ViewId) {
    let (max_retries, delay) = match state.config() {
        Ok(config) => (config.index_build_max_retries, config.retry_delay()),
        Err(err) => {
            warn!("index build for view {} skipped: {}", view_id, err);
            return;
        }
    };
    retry_build(view_id, max_retries, delay, move || update_index(&state, view_id)).await;
}

/// Runs `job` on the blocking pool until it succeeds, the view is gone, or
/// it has failed `max_retries + 1` times. Returns the number of attempts.
async fn retry_build<F>(view_id: ViewId, max_retries: u32, delay: Duration, job: F) -> u32
where
    F: Fn() -> Result<IndexState> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let run = Arc::clone(&job);
        match tokio::task::spawn_blocking(move || run()).await {
            Ok(Ok(index_state)) => {
                debug!("view {} index state {:?}", view_id, index_state);
                return attempt;
            }
            Ok(Err(err)) if err.is_not_found() => {
                debug!("index build for view {} dropped: {}", view_id, err);
                return attempt;
            }
            Ok(Err(err)) => warn!("index build for view {} failed: {}", view_id, err),
            Err(err) => warn!("index build task for view {} panicked: {}", view_id, err),
        }
        if attempt > max_retries {
            warn!("giving up on index for view {} after {} attempts", view_id, attempt);
            return attempt;
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldType, FieldValue};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use crate::view::{FilterType, OwnershipType, ViewKind, ViewSort};

    fn table() -> Table {
        let mut table = Table::with_changeset_capacity(1, 1, "t", 4);
        for (id, field_type) in [(1, FieldType::Text), (2, FieldType::number()), (3, FieldType::File)] {
            table
                .add_field(Field {
                    id,
                    table_id: 1,
                    name: format!("f{}", id),
                    field_type,
                    primary: id == 1,
                })
                .unwrap();
        }
        for (text, number) in [("c", 1), ("a", 3), ("b", 2)] {
            table
                .create_row(vec![(1, FieldValue::text(text)), (2, FieldValue::number(number))])
                .unwrap();
        }
        table
    }

    fn view(sorts: &[(FieldId, SortOrder)]) -> View {
        View {
            id: 1,
            table_id: 1,
            name: "v".into(),
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
            sorts: sorts
                .iter()
                .enumerate()
                .map(|(i, (field_id, order))| ViewSort {
                    id: i as u64 + 1,
                    view_id: 1,
                    field_id: *field_id,
                    order: *order,
                })
                .collect(),
            field_options: BTreeMap::new(),
            decorations: Vec::new(),
        }
    }

    #[test]
    fn test_signature_names() {
        let table = table();
        let asc = view(&[(1, SortOrder::Ascending)]);
        let desc = view(&[(1, SortOrder::Descending)]);
        let a = IndexSignature::for_view(&asc, table.fields(), Some("en-x-icu")).unwrap();
        let b = IndexSignature::for_view(&asc, table.fields(), Some("en-x-icu")).unwrap();
        assert_eq!(a.name(), b.name());
        assert!(a.name().starts_with("tbl1_view_idx_"));
        assert_eq!(a.name().len(), "tbl1_view_idx_".len() + 12);

        let c = IndexSignature::for_view(&desc, table.fields(), Some("en-x-icu")).unwrap();
        let d = IndexSignature::for_view(&asc, table.fields(), None).unwrap();
        assert_ne!(a.name(), c.name());
        assert_ne!(a.name(), d.name());

        let mut copy = view(&[(1, SortOrder::Ascending)]);
        copy.id = 2;
        let e = IndexSignature::for_view(&copy, table.fields(), Some("en-x-icu")).unwrap();
        assert_ne!(a.name(), e.name());

        assert!(IndexSignature::for_view(&view(&[]), table.fields(), None).is_none());
        assert!(IndexSignature::for_view(&view(&[(3, SortOrder::Ascending)]), table.fields(), None).is_none());
    }

    #[test]
    fn test_storage_follows_changes() {
        let mut table = table();
        let v = view(&[(1, SortOrder::Ascending)]);
        let signature = IndexSignature::for_view(&v, table.fields(), None).unwrap();
        let mut storage = IndexStorage::build(signature, &table).unwrap();
        assert_eq!(storage.row_ids(), vec![2, 3, 1]);

        table.update_row(1, vec![(1, FieldValue::text("0"))]).unwrap();
        let created = table.create_row(vec![(1, FieldValue::text("bb"))]).unwrap();
        storage.catch_up(&table).unwrap();
        assert_eq!(storage.row_ids(), vec![1, 2, 3, created]);

        table.delete_row(2).unwrap();
        table.update_row(3, vec![(2, FieldValue::number(9))]).unwrap();
        storage.catch_up(&table).unwrap();
        assert_eq!(storage.row_ids(), vec![1, 3, created]);
        assert_eq!(storage.last_synced_version(), table.version());
    }

    #[test]
    fn test_log_gap_rebuilds() {
        let mut table = table();
        let v = view(&[(2, SortOrder::Descending)]);
        let signature = IndexSignature::for_view(&v, table.fields(), None).unwrap();
        let mut storage = IndexStorage::build(signature, &table).unwrap();
        for i in 0..6 {
            table.create_row(vec![(2, FieldValue::number(10 + i))]).unwrap();
        }
        assert!(table.changeset().since(storage.last_synced_version()).is_none());
        storage.catch_up(&table).unwrap();
        assert_eq!(storage.len(), 9);
        assert_eq!(storage.row_ids()[0], 9);
    }

    #[test]
    fn test_order_matches_scan() {
        let table = table();
        let v = view(&[(2, SortOrder::Ascending)]);
        let signature = IndexSignature::for_view(&v, table.fields(), None).unwrap();
        let storage = IndexStorage::build(signature.clone(), &table).unwrap();
        let model = table.full_model();
        let rows = table.query(&model);
        let scanned = signature.order_spec(&model).unwrap().apply(rows.clone());
        let indexed = storage.order(rows).unwrap();
        assert_eq!(indexed.ids(), scanned.ids());
        assert_eq!(indexed.ids(), vec![1, 3, 2]);
    }

    struct Recorder(Mutex<Vec<ViewId>>);

    impl IndexQueue for Recorder {
        fn enqueue(&self, view_id: ViewId) {
            self.0.lock().unwrap().push(view_id);
        }
    }

    #[test]
    fn test_schedule_only_when_name_differs() {
        let table = table();
        let model = table.full_model();
        let queue = Recorder(Mutex::new(Vec::new()));
        let mut v = view(&[(1, SortOrder::Ascending)]);
        table.reset_query_count();

        assert!(!schedule_index_creation_if_needed(&v, &model, None, false, &queue));
        assert!(schedule_index_creation_if_needed(&v, &model, None, true, &queue));

        v.db_index_name = IndexSignature::for_view(&v, model.fields(), None).map(|s| s.name());
        assert!(!schedule_index_creation_if_needed(&v, &model, None, true, &queue));
        assert!(schedule_index_creation_if_needed(&v, &model, Some("C"), true, &queue));
        assert_eq!(*queue.0.lock().unwrap(), vec![1, 1]);
        assert_eq!(table.query_count(), 0);
    }

    fn counting_job(
        attempts: &Arc<AtomicU32>,
        outcome: impl Fn(u32) -> Result<IndexState> + Send + Sync + 'static,
    ) -> impl Fn() -> Result<IndexState> + Send + Sync + 'static {
        let attempts = Arc::clone(attempts);
        move || outcome(attempts.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }

    #[tokio::test]
    async fn test_failed_builds_are_retried_then_abandoned() {
        let attempts = Arc::new(AtomicU32::new(0));
        let job = counting_job(&attempts, |_| Err(ViewError::IndexBuild("disk full".into())));
        assert_eq!(retry_build(1, 2, Duration::from_millis(1), job).await, 3);
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_success_or_missing_view() {
        let attempts = Arc::new(AtomicU32::new(0));
        let job = counting_job(&attempts, |attempt| {
            if attempt == 1 {
                Err(ViewError::IndexBuild("busy".into()))
            } else {
                Ok(IndexState::NoIndex)
            }
        });
        assert_eq!(retry_build(1, 5, Duration::from_millis(1), job).await, 2);

        let attempts = Arc::new(AtomicU32::new(0));
        let job = counting_job(&attempts, |_| Err(ViewError::ViewDoesNotExist(1)));
        assert_eq!(retry_build(1, 5, Duration::from_millis(1), job).await, 1);
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 1);
    }
}
