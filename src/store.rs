//! View Configuration Store.
//!
//! CRUD for views and everything hanging off them. Every write checks the
//! acting user's workspace permission, the view kind's capabilities and
//! that referenced fields belong to the view's table. Outbound events are
//! published after the views lock is released.

use crate::error::{Result, ViewError};
use crate::events::EngineEvent;
use crate::field::{Field, FieldId};
use crate::filters::FilterOperator;
use crate::handler::ViewHandler;
use crate::permissions::{Operation, UserId};
use crate::table::TableId;
use crate::view::{
    generate_slug, hash_password, DecorationId, FieldOptionsUpdate, FilterGroupId, FilterId,
    FilterType, OwnershipType, SortId, SortOrder, View, ViewDecoration, ViewFieldOption,
    ViewFilter, ViewFilterGroup, ViewId, ViewKind, ViewSort,
};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

/// Parameters of a new view.
#[derive(Debug, Clone)]
pub struct NewView {
    pub kind: ViewKind,
    pub name: String,
    pub ownership: OwnershipType,
    pub filter_type: FilterType,
    pub filters_disabled: bool,
    pub public: bool,
    pub password: Option<String>,
}

impl NewView {
    pub fn new(kind: ViewKind, name: &str) -> Self {
        NewView {
            kind,
            name: name.to_string(),
            ownership: OwnershipType::Collaborative,
            filter_type: FilterType::And,
            filters_disabled: false,
            public: false,
            password: None,
        }
    }

    pub fn personal(mut self) -> Self {
        self.ownership = OwnershipType::Personal;
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn filter_type(mut self, filter_type: FilterType) -> Self {
        self.filter_type = filter_type;
        self
    }

    pub fn filters_disabled(mut self, disabled: bool) -> Self {
        self.filters_disabled = disabled;
        self
    }
}

/// Partial view update. The ownership type can not be changed.
#[derive(Debug, Clone, Default)]
pub struct ViewUpdate {
    pub name: Option<String>,
    pub filter_type: Option<FilterType>,
    pub filters_disabled: Option<bool>,
    pub public: Option<bool>,
    /// `Some(None)` removes the password.
    pub password: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
    pub field_id: Option<FieldId>,
    pub operator: Option<FilterOperator>,
    pub value: Option<String>,
    pub group_id: Option<Option<FilterGroupId>>,
}

#[derive(Debug, Clone, Default)]
pub struct SortUpdate {
    pub field_id: Option<FieldId>,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, Default)]
pub struct DecorationUpdate {
    pub decorator_type: Option<String>,
    pub value_provider_type: Option<String>,
    pub value_provider_conf: Option<serde_json::Value>,
    pub order: Option<i64>,
}

fn next_view_order(views: &BTreeMap<ViewId, View>, table_id: TableId, ownership: OwnershipType) -> i64 {
    views
        .values()
        .filter(|view| view.table_id == table_id && view.ownership == ownership)
        .map(|view| view.order)
        .max()
        .unwrap_or(0)
        + 1
}

/// The first of `name 2`, `name 3`, ... no view of the table uses.
fn find_unused_name(views: &BTreeMap<ViewId, View>, table_id: TableId, name: &str) -> String {
    let taken = |candidate: &str| {
        views
            .values()
            .any(|view| view.table_id == table_id && view.name == candidate)
    };
    (2..)
        .map(|n| format!("{} {}", name, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

impl ViewHandler {
    fn require_table_field(&self, table_id: TableId, field_id: FieldId) -> Result<Field> {
        let table = self.state.table(table_id)?;
        let table = table.read()?;
        table.require_field(field_id).cloned()
    }

    /// The live view holding the child entity `matches` finds.
    fn view_containing(&self, matches: impl Fn(&View) -> bool) -> Result<Option<View>> {
        let view = self.state.views.read()?.values().find(|view| matches(view)).cloned();
        match view {
            Some(view) if !view.trashed && !self.state.is_table_trashed(view.table_id)? => Ok(Some(view)),
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn create_view(&self, user_id: UserId, table_id: TableId, params: NewView) -> Result<View> {
        self.authorize_table(user_id, Operation::CreateView, table_id)?;
        if params.public && !params.kind.capabilities().can_share {
            return Err(ViewError::CannotShareViewType(params.kind.to_string()));
        }
        let view = {
            let mut views = self.state.views.write()?;
            let view = View {
                id: self.state.ids.view.next(),
                table_id,
                name: params.name,
                order: next_view_order(&views, table_id, params.ownership),
                kind: params.kind,
                ownership: params.ownership,
                owner_id: user_id,
                filter_type: params.filter_type,
                filters_disabled: params.filters_disabled,
                public: params.public,
                slug: generate_slug(),
                password_hash: params.password.as_deref().map(hash_password),
                db_index_name: None,
                trashed: false,
                filters: Vec::new(),
                filter_groups: Vec::new(),
                sorts: Vec::new(),
                field_options: BTreeMap::new(),
                decorations: Vec::new(),
            };
            views.insert(view.id, view.clone());
            view
        };
        info!("created {} view {} '{}' on table {}", view.kind, view.id, view.name, table_id);
        self.state.events.publish(EngineEvent::ViewCreated {
            table_id,
            view_id: view.id,
        });
        Ok(view)
    }

    /// The view as the given user may see it.
    pub fn get_view(&self, user_id: UserId, view_id: ViewId) -> Result<View> {
        self.authorize_view(user_id, Operation::ReadView, view_id)
    }

    /// Loads a view for use, scheduling an index build when its index is
    /// missing or outdated.
    pub fn load_view(&self, user_id: UserId, view_id: ViewId) -> Result<View> {
        let view = self.authorize_view(user_id, Operation::ReadView, view_id)?;
        self.handle_event(&EngineEvent::ViewLoaded { view_id })?;
        Ok(view)
    }

    /// Live views of a table the user can see, by `(order, id)`.
    pub fn list_views(&self, user_id: UserId, table_id: TableId, kind: Option<ViewKind>) -> Result<Vec<View>> {
        self.authorize_table(user_id, Operation::ListViews, table_id)?;
        let mut views: Vec<View> = self
            .state
            .views
            .read()?
            .values()
            .filter(|view| view.table_id == table_id && !view.trashed)
            .filter(|view| view.is_accessible_by(user_id))
            .filter(|view| kind.map_or(true, |kind| view.kind == kind))
            .cloned()
            .collect();
        views.sort_by_key(|view| (view.order, view.id));
        Ok(views)
    }

    pub fn update_view(&self, user_id: UserId, view_id: ViewId, update: ViewUpdate) -> Result<View> {
        let view = self.authorize_view(user_id, Operation::UpdateView, view_id)?;
        if update.public == Some(true) && !view.capabilities().can_share {
            return Err(ViewError::CannotShareViewType(view.kind.to_string()));
        }
        let view = self.mutate_view(view_id, |view| {
            if let Some(name) = update.name {
                view.name = name;
            }
            if let Some(filter_type) = update.filter_type {
                view.filter_type = filter_type;
            }
            if let Some(disabled) = update.filters_disabled {
                view.filters_disabled = disabled;
            }
            if let Some(public) = update.public {
                view.public = public;
            }
            if let Some(password) = update.password {
                view.password_hash = password.as_deref().map(hash_password);
            }
            Ok(view.clone())
        })?;
        self.state.events.publish(EngineEvent::ViewUpdated { view_id });
        Ok(view)
    }

    /// Moves a view to the trash. Its filters, sorts and index lookups
    /// report not found until it is restored.
    pub fn delete_view(&self, user_id: UserId, view_id: ViewId) -> Result<()> {
        let view = self.authorize_view(user_id, Operation::DeleteView, view_id)?;
        self.mutate_view(view_id, |view| {
            view.trashed = true;
            Ok(())
        })?;
        info!("trashed view {}", view_id);
        self.state.events.publish(EngineEvent::ViewDeleted {
            table_id: view.table_id,
            view_id,
        });
        Ok(())
    }

    pub fn restore_view(&self, user_id: UserId, view_id: ViewId) -> Result<View> {
        let view = self
            .state
            .views
            .read()?
            .get(&view_id)
            .cloned()
            .ok_or(ViewError::ViewDoesNotExist(view_id))?;
        self.authorize_table(user_id, Operation::RestoreView, view.table_id)?;
        if !view.is_accessible_by(user_id) {
            return Err(ViewError::PermissionDenied(format!(
                "view {} is personal to another user",
                view_id
            )));
        }
        let view = self.mutate_view(view_id, |view| {
            view.trashed = false;
            Ok(view.clone())
        })?;
        info!("restored view {}", view_id);
        self.state.events.publish(EngineEvent::ViewRestored { view_id });
        Ok(view)
    }

    /// Removes a view for good, trashed or not, and drops its index if no
    /// other view needs it.
    pub fn permanently_delete_view(&self, user_id: UserId, view_id: ViewId) -> Result<()> {
        let view = self
            .state
            .views
            .read()?
            .get(&view_id)
            .cloned()
            .ok_or(ViewError::ViewDoesNotExist(view_id))?;
        let table = self
            .state
            .tables
            .read()?
            .get(&view.table_id)
            .cloned()
            .ok_or(ViewError::TableDoesNotExist(view.table_id))?;
        let workspace_id = table.read()?.workspace_id();
        self.permissions
            .check(user_id, Operation::DeleteView, workspace_id)?;
        if !view.is_accessible_by(user_id) {
            return Err(ViewError::PermissionDenied(format!(
                "view {} is personal to another user",
                view_id
            )));
        }

        self.state.views.write()?.remove(&view_id);
        info!("permanently deleted view {}", view_id);
        let event = EngineEvent::ViewPermanentlyDeleted {
            table_id: view.table_id,
            view_id,
            db_index_name: view.db_index_name,
        };
        self.handle_event(&event)?;
        self.state.events.publish(event);
        Ok(())
    }

    /// Deep copy of a view placed right after it. The copy is private, gets
    /// a free `<name> <n>` name and builds its own index.
    pub fn duplicate_view(&self, user_id: UserId, view_id: ViewId) -> Result<View> {
        let source = self.authorize_view(user_id, Operation::DuplicateView, view_id)?;
        let ids = &self.state.ids;
        let (copy, order) = {
            let mut views = self.state.views.write()?;
            for view in views.values_mut() {
                if view.table_id == source.table_id
                    && view.ownership == source.ownership
                    && view.order > source.order
                {
                    view.order += 1;
                }
            }

            let new_id = ids.view.next();
            let group_ids: HashMap<FilterGroupId, FilterGroupId> = source
                .filter_groups
                .iter()
                .map(|group| (group.id, ids.filter_group.next()))
                .collect();
            let copy = View {
                id: new_id,
                name: find_unused_name(&views, source.table_id, &source.name),
                order: source.order + 1,
                owner_id: if source.ownership == OwnershipType::Personal {
                    source.owner_id
                } else {
                    user_id
                },
                public: false,
                slug: generate_slug(),
                password_hash: None,
                db_index_name: None,
                trashed: false,
                filters: source
                    .filters
                    .iter()
                    .map(|filter| ViewFilter {
                        id: ids.filter.next(),
                        view_id: new_id,
                        group_id: filter.group_id.and_then(|id| group_ids.get(&id).copied()),
                        ..filter.clone()
                    })
                    .collect(),
                filter_groups: source
                    .filter_groups
                    .iter()
                    .filter_map(|group| {
                        Some(ViewFilterGroup {
                            id: *group_ids.get(&group.id)?,
                            view_id: new_id,
                            filter_type: group.filter_type,
                        })
                    })
                    .collect(),
                sorts: source
                    .sorts
                    .iter()
                    .map(|sort| ViewSort {
                        id: ids.sort.next(),
                        view_id: new_id,
                        ..sort.clone()
                    })
                    .collect(),
                decorations: source
                    .decorations
                    .iter()
                    .map(|decoration| ViewDecoration {
                        id: ids.decoration.next(),
                        view_id: new_id,
                        ..decoration.clone()
                    })
                    .collect(),
                ..source.clone()
            };
            views.insert(new_id, copy.clone());

            let mut scope: Vec<&View> = views
                .values()
                .filter(|view| {
                    view.table_id == source.table_id
                        && view.ownership == source.ownership
                        && !view.trashed
                })
                .collect();
            scope.sort_by_key(|view| (view.order, view.id));
            let order: Vec<ViewId> = scope.iter().map(|view| view.id).collect();
            (copy, order)
        };

        info!("duplicated view {} into {} '{}'", view_id, copy.id, copy.name);
        self.state.events.publish(EngineEvent::ViewCreated {
            table_id: copy.table_id,
            view_id: copy.id,
        });
        self.state.events.publish(EngineEvent::ViewsReordered {
            table_id: copy.table_id,
            order,
        });
        self.schedule_index_creation_if_needed(copy.id)?;
        Ok(copy)
    }

    /// Sets the order of the listed views of one ownership scope; the first
    /// gets order 1. Views that are not listed keep their order.
    pub fn order_views(
        &self,
        user_id: UserId,
        table_id: TableId,
        ownership: OwnershipType,
        order: &[ViewId],
    ) -> Result<()> {
        self.authorize_table(user_id, Operation::OrderViews, table_id)?;
        {
            let mut views = self.state.views.write()?;
            for view_id in order {
                let in_scope = views.get(view_id).map_or(false, |view| {
                    view.table_id == table_id
                        && !view.trashed
                        && view.ownership == ownership
                        && view.is_accessible_by(user_id)
                });
                if !in_scope {
                    return Err(ViewError::ViewNotInTable(*view_id));
                }
            }
            for (position, view_id) in order.iter().enumerate() {
                if let Some(view) = views.get_mut(view_id) {
                    view.order = position as i64 + 1;
                }
            }
        }
        self.state.events.publish(EngineEvent::ViewsReordered {
            table_id,
            order: order.to_vec(),
        });
        Ok(())
    }

    /// Gives a shareable view a new random slug, invalidating the old link.
    pub fn rotate_view_slug(&self, user_id: UserId, view_id: ViewId) -> Result<View> {
        let view = self.authorize_view(user_id, Operation::RotateViewSlug, view_id)?;
        if !view.capabilities().can_share {
            return Err(ViewError::CannotShareViewType(view.kind.to_string()));
        }
        let view = self.mutate_view(view_id, |view| {
            view.slug = generate_slug();
            Ok(view.clone())
        })?;
        self.state.events.publish(EngineEvent::ViewUpdated { view_id });
        Ok(view)
    }

    /// A view by its slug. Views that are not public are only returned to
    /// users of the table's workspace.
    pub fn get_public_view_by_slug(&self, user_id: Option<UserId>, slug: &str) -> Result<View> {
        let not_found = || ViewError::PublicViewDoesNotExist(slug.to_string());
        let view = self
            .state
            .views
            .read()?
            .values()
            .find(|view| view.slug == slug)
            .cloned()
            .ok_or_else(not_found)?;
        if view.trashed || self.state.is_table_trashed(view.table_id)? {
            return Err(not_found());
        }
        if view.public {
            return Ok(view);
        }
        match user_id {
            Some(user_id) if view.is_accessible_by(user_id) => self
                .authorize_table(user_id, Operation::ReadView, view.table_id)
                .map(|_| view)
                .map_err(|_| not_found()),
            _ => Err(not_found()),
        }
    }

    /// Whether `password` opens a public view. Views without a password
    /// accept anything.
    pub fn check_public_view_password(&self, view_id: ViewId, password: &str) -> Result<bool> {
        let view = self.view_snapshot(view_id)?;
        if !view.public {
            return Err(ViewError::ViewDoesNotExist(view_id));
        }
        Ok(!view.is_password_protected() || view.check_password(password))
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    pub fn create_filter(
        &self,
        user_id: UserId,
        view_id: ViewId,
        field_id: FieldId,
        operator: FilterOperator,
        value: &str,
        group_id: Option<FilterGroupId>,
    ) -> Result<ViewFilter> {
        let view = self.authorize_view(user_id, Operation::CreateViewFilter, view_id)?;
        if !view.capabilities().can_filter {
            return Err(ViewError::ViewFilterNotSupported(view.kind.to_string()));
        }
        let field = self.require_table_field(view.table_id, field_id)?;
        operator.validate(&field, value)?;

        let filter = self.mutate_view(view_id, |view| {
            if let Some(group_id) = group_id {
                if !view.filter_groups.iter().any(|group| group.id == group_id) {
                    return Err(ViewError::ViewFilterGroupDoesNotExist(group_id));
                }
            }
            let filter = ViewFilter {
                id: self.state.ids.filter.next(),
                view_id,
                field_id,
                operator,
                value: value.to_string(),
                group_id,
            };
            view.filters.push(filter.clone());
            Ok(filter)
        })?;
        self.state.events.publish(EngineEvent::ViewFilterCreated {
            view_id,
            filter_id: filter.id,
            operator,
        });
        Ok(filter)
    }

    fn authorize_filter(&self, user_id: UserId, operation: Operation, filter_id: FilterId) -> Result<(View, ViewFilter)> {
        let view = self
            .view_containing(|view| view.filters.iter().any(|f| f.id == filter_id))?
            .ok_or(ViewError::ViewFilterDoesNotExist(filter_id))?;
        let view = self.authorize_view(user_id, operation, view.id)?;
        let filter = view
            .filters
            .iter()
            .find(|f| f.id == filter_id)
            .cloned()
            .ok_or(ViewError::ViewFilterDoesNotExist(filter_id))?;
        Ok((view, filter))
    }

    pub fn get_filter(&self, user_id: UserId, filter_id: FilterId) -> Result<ViewFilter> {
        self.authorize_filter(user_id, Operation::ReadViewFilter, filter_id)
            .map(|(_, filter)| filter)
    }

    pub fn list_filters(&self, user_id: UserId, view_id: ViewId) -> Result<Vec<ViewFilter>> {
        Ok(self
            .authorize_view(user_id, Operation::ReadViewFilter, view_id)?
            .filters)
    }

    pub fn update_filter(&self, user_id: UserId, filter_id: FilterId, update: FilterUpdate) -> Result<ViewFilter> {
        let (view, current) = self.authorize_filter(user_id, Operation::UpdateViewFilter, filter_id)?;
        let field_id = update.field_id.unwrap_or(current.field_id);
        let operator = update.operator.unwrap_or(current.operator);
        let value = update.value.unwrap_or(current.value);
        let field = self.require_table_field(view.table_id, field_id)?;
        operator.validate(&field, &value)?;

        let filter = self.mutate_view(view.id, |view| {
            if let Some(Some(group_id)) = update.group_id {
                if !view.filter_groups.iter().any(|group| group.id == group_id) {
                    return Err(ViewError::ViewFilterGroupDoesNotExist(group_id));
                }
            }
            let filter = view
                .filters
                .iter_mut()
                .find(|f| f.id == filter_id)
                .ok_or(ViewError::ViewFilterDoesNotExist(filter_id))?;
            filter.field_id = field_id;
            filter.operator = operator;
            filter.value = value;
            if let Some(group_id) = update.group_id {
                filter.group_id = group_id;
            }
            Ok(filter.clone())
        })?;
        self.state.events.publish(EngineEvent::ViewFilterUpdated {
            view_id: view.id,
            filter_id,
        });
        Ok(filter)
    }

    pub fn delete_filter(&self, user_id: UserId, filter_id: FilterId) -> Result<()> {
        let (view, _) = self.authorize_filter(user_id, Operation::DeleteViewFilter, filter_id)?;
        self.mutate_view(view.id, |view| {
            view.filters.retain(|f| f.id != filter_id);
            Ok(())
        })?;
        self.state.events.publish(EngineEvent::ViewFilterDeleted {
            view_id: view.id,
            filter_id,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Filter groups
    // ------------------------------------------------------------------

    pub fn create_filter_group(&self, user_id: UserId, view_id: ViewId, filter_type: FilterType) -> Result<ViewFilterGroup> {
        let view = self.authorize_view(user_id, Operation::CreateViewFilterGroup, view_id)?;
        if !view.capabilities().can_filter {
            return Err(ViewError::ViewFilterNotSupported(view.kind.to_string()));
        }
        let group = self.mutate_view(view_id, |view| {
            let group = ViewFilterGroup {
                id: self.state.ids.filter_group.next(),
                view_id,
                filter_type,
            };
            view.filter_groups.push(group.clone());
            Ok(group)
        })?;
        self.state.events.publish(EngineEvent::ViewFilterGroupChanged {
            view_id,
            filter_group_id: group.id,
        });
        Ok(group)
    }

    fn authorize_filter_group(
        &self,
        user_id: UserId,
        operation: Operation,
        group_id: FilterGroupId,
    ) -> Result<(View, ViewFilterGroup)> {
        let view = self
            .view_containing(|view| view.filter_groups.iter().any(|g| g.id == group_id))?
            .ok_or(ViewError::ViewFilterGroupDoesNotExist(group_id))?;
        let view = self.authorize_view(user_id, operation, view.id)?;
        let group = view
            .filter_groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or(ViewError::ViewFilterGroupDoesNotExist(group_id))?;
        Ok((view, group))
    }

    pub fn get_filter_group(&self, user_id: UserId, group_id: FilterGroupId) -> Result<ViewFilterGroup> {
        self.authorize_filter_group(user_id, Operation::ReadViewFilterGroup, group_id)
            .map(|(_, group)| group)
    }

    pub fn update_filter_group(
        &self,
        user_id: UserId,
        group_id: FilterGroupId,
        filter_type: FilterType,
    ) -> Result<ViewFilterGroup> {
        let (view, _) = self.authorize_filter_group(user_id, Operation::UpdateViewFilterGroup, group_id)?;
        let group = self.mutate_view(view.id, |view| {
            let group = view
                .filter_groups
                .iter_mut()
                .find(|g| g.id == group_id)
                .ok_or(ViewError::ViewFilterGroupDoesNotExist(group_id))?;
            group.filter_type = filter_type;
            Ok(group.clone())
        })?;
        self.state.events.publish(EngineEvent::ViewFilterGroupChanged {
            view_id: view.id,
            filter_group_id: group_id,
        });
        Ok(group)
    }

    /// Deletes a filter group together with the filters inside it.
    pub fn delete_filter_group(&self, user_id: UserId, group_id: FilterGroupId) -> Result<()> {
        let (view, _) = self.authorize_filter_group(user_id, Operation::DeleteViewFilterGroup, group_id)?;
        self.mutate_view(view.id, |view| {
            view.filter_groups.retain(|g| g.id != group_id);
            view.filters.retain(|f| f.group_id != Some(group_id));
            Ok(())
        })?;
        self.state.events.publish(EngineEvent::ViewFilterGroupChanged {
            view_id: view.id,
            filter_group_id: group_id,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sorts
    // ------------------------------------------------------------------

    fn check_sort_field(&self, view: &View, field_id: FieldId, ignore: Option<SortId>) -> Result<()> {
        let field = self.require_table_field(view.table_id, field_id)?;
        if !field.kind().can_order() {
            return Err(ViewError::ViewSortFieldNotSupported(field_id));
        }
        if view
            .sorts
            .iter()
            .any(|sort| sort.field_id == field_id && Some(sort.id) != ignore)
        {
            return Err(ViewError::ViewSortFieldAlreadyExist {
                view_id: view.id,
                field_id,
            });
        }
        Ok(())
    }

    pub fn create_sort(&self, user_id: UserId, view_id: ViewId, field_id: FieldId, order: SortOrder) -> Result<ViewSort> {
        let view = self.authorize_view(user_id, Operation::CreateViewSort, view_id)?;
        if !view.capabilities().can_sort {
            return Err(ViewError::ViewSortNotSupported(view.kind.to_string()));
        }
        self.check_sort_field(&view, field_id, None)?;
        let sort = self.mutate_view(view_id, |view| {
            if view.sorts.iter().any(|sort| sort.field_id == field_id) {
                return Err(ViewError::ViewSortFieldAlreadyExist { view_id, field_id });
            }
            let sort = ViewSort {
                id: self.state.ids.sort.next(),
                view_id,
                field_id,
                order,
            };
            view.sorts.push(sort.clone());
            Ok(sort)
        })?;
        debug!("view {} sorts on field {} {}", view_id, field_id, order.as_str());
        self.state.events.publish(EngineEvent::ViewSortCreated {
            view_id,
            sort_id: sort.id,
        });
        self.schedule_index_update(view_id)?;
        Ok(sort)
    }

    fn authorize_sort(&self, user_id: UserId, operation: Operation, sort_id: SortId) -> Result<(View, ViewSort)> {
        let view = self
            .view_containing(|view| view.sorts.iter().any(|s| s.id == sort_id))?
            .ok_or(ViewError::ViewSortDoesNotExist(sort_id))?;
        let view = self.authorize_view(user_id, operation, view.id)?;
        let sort = view
            .sorts
            .iter()
            .find(|s| s.id == sort_id)
            .cloned()
            .ok_or(ViewError::ViewSortDoesNotExist(sort_id))?;
        Ok((view, sort))
    }

    pub fn get_sort(&self, user_id: UserId, sort_id: SortId) -> Result<ViewSort> {
        self.authorize_sort(user_id, Operation::ReadViewSort, sort_id)
            .map(|(_, sort)| sort)
    }

    pub fn list_sorts(&self, user_id: UserId, view_id: ViewId) -> Result<Vec<ViewSort>> {
        Ok(self
            .authorize_view(user_id, Operation::ReadViewSort, view_id)?
            .sorts)
    }

    pub fn update_sort(&self, user_id: UserId, sort_id: SortId, update: SortUpdate) -> Result<ViewSort> {
        let (view, current) = self.authorize_sort(user_id, Operation::UpdateViewSort, sort_id)?;
        let field_id = update.field_id.unwrap_or(current.field_id);
        if field_id != current.field_id {
            self.check_sort_field(&view, field_id, Some(sort_id))?;
        }
        let sort = self.mutate_view(view.id, |view| {
            let sort = view
                .sorts
                .iter_mut()
                .find(|s| s.id == sort_id)
                .ok_or(ViewError::ViewSortDoesNotExist(sort_id))?;
            sort.field_id = field_id;
            if let Some(order) = update.order {
                sort.order = order;
            }
            Ok(sort.clone())
        })?;
        self.state.events.publish(EngineEvent::ViewSortUpdated {
            view_id: view.id,
            sort_id,
        });
        self.schedule_index_update(view.id)?;
        Ok(sort)
    }

    pub fn delete_sort(&self, user_id: UserId, sort_id: SortId) -> Result<()> {
        let (view, _) = self.authorize_sort(user_id, Operation::DeleteViewSort, sort_id)?;
        self.mutate_view(view.id, |view| {
            view.sorts.retain(|s| s.id != sort_id);
            Ok(())
        })?;
        self.state.events.publish(EngineEvent::ViewSortDeleted {
            view_id: view.id,
            sort_id,
        });
        self.schedule_index_update(view.id)
    }

    // ------------------------------------------------------------------
    // Decorations
    // ------------------------------------------------------------------

    pub fn create_decoration(
        &self,
        user_id: UserId,
        view_id: ViewId,
        decorator_type: &str,
        value_provider_type: &str,
        value_provider_conf: serde_json::Value,
    ) -> Result<ViewDecoration> {
        let view = self.authorize_view(user_id, Operation::CreateViewDecoration, view_id)?;
        if !view.capabilities().can_decorate {
            return Err(ViewError::ViewDecorationNotSupported(view.kind.to_string()));
        }
        let decoration = self.mutate_view(view_id, |view| {
            let order = view.decorations.iter().map(|d| d.order).max().unwrap_or(0) + 1;
            let decoration = ViewDecoration {
                id: self.state.ids.decoration.next(),
                view_id,
                decorator_type: decorator_type.to_string(),
                value_provider_type: value_provider_type.to_string(),
                value_provider_conf,
                order,
            };
            view.decorations.push(decoration.clone());
            Ok(decoration)
        })?;
        self.state.events.publish(EngineEvent::ViewDecorationChanged {
            view_id,
            decoration_id: decoration.id,
        });
        Ok(decoration)
    }

    fn authorize_decoration(
        &self,
        user_id: UserId,
        operation: Operation,
        decoration_id: DecorationId,
    ) -> Result<(View, ViewDecoration)> {
        let view = self
            .view_containing(|view| view.decorations.iter().any(|d| d.id == decoration_id))?
            .ok_or(ViewError::ViewDecorationDoesNotExist(decoration_id))?;
        let view = self.authorize_view(user_id, operation, view.id)?;
        let decoration = view
            .decorations
            .iter()
            .find(|d| d.id == decoration_id)
            .cloned()
            .ok_or(ViewError::ViewDecorationDoesNotExist(decoration_id))?;
        Ok((view, decoration))
    }

    pub fn get_decoration(&self, user_id: UserId, decoration_id: DecorationId) -> Result<ViewDecoration> {
        self.authorize_decoration(user_id, Operation::ReadViewDecoration, decoration_id)
            .map(|(_, decoration)| decoration)
    }

    /// Decorations of a view by `(order, id)`.
    pub fn list_decorations(&self, user_id: UserId, view_id: ViewId) -> Result<Vec<ViewDecoration>> {
        let mut decorations = self
            .authorize_view(user_id, Operation::ReadViewDecoration, view_id)?
            .decorations;
        decorations.sort_by_key(|d| (d.order, d.id));
        Ok(decorations)
    }

    pub fn update_decoration(
        &self,
        user_id: UserId,
        decoration_id: DecorationId,
        update: DecorationUpdate,
    ) -> Result<ViewDecoration> {
        let (view, _) = self.authorize_decoration(user_id, Operation::UpdateViewDecoration, decoration_id)?;
        let decoration = self.mutate_view(view.id, |view| {
            let decoration = view
                .decorations
                .iter_mut()
                .find(|d| d.id == decoration_id)
                .ok_or(ViewError::ViewDecorationDoesNotExist(decoration_id))?;
            if let Some(decorator_type) = update.decorator_type {
                decoration.decorator_type = decorator_type;
            }
            if let Some(value_provider_type) = update.value_provider_type {
                decoration.value_provider_type = value_provider_type;
            }
            if let Some(conf) = update.value_provider_conf {
                decoration.value_provider_conf = conf;
            }
            if let Some(order) = update.order {
                decoration.order = order;
            }
            Ok(decoration.clone())
        })?;
        self.state.events.publish(EngineEvent::ViewDecorationChanged {
            view_id: view.id,
            decoration_id,
        });
        Ok(decoration)
    }

    pub fn delete_decoration(&self, user_id: UserId, decoration_id: DecorationId) -> Result<()> {
        let (view, _) = self.authorize_decoration(user_id, Operation::DeleteViewDecoration, decoration_id)?;
        self.mutate_view(view.id, |view| {
            view.decorations.retain(|d| d.id != decoration_id);
            Ok(())
        })?;
        self.state.events.publish(EngineEvent::ViewDecorationChanged {
            view_id: view.id,
            decoration_id,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Field options
    // ------------------------------------------------------------------

    /// Options of every field of the view's table, in field order, with
    /// defaults for fields nothing was saved for.
    pub fn get_field_options(&self, user_id: UserId, view_id: ViewId) -> Result<Vec<ViewFieldOption>> {
        let view = self.authorize_view(user_id, Operation::ReadFieldOptions, view_id)?;
        if !view.capabilities().has_field_options {
            return Err(ViewError::ViewDoesNotSupportFieldOptions(view.kind.to_string()));
        }
        let fields = self.table_fields(view.table_id)?;
        Ok(fields.iter().map(|field| view.field_option(field)).collect())
    }

    pub fn update_field_options(
        &self,
        user_id: UserId,
        view_id: ViewId,
        updates: BTreeMap<FieldId, FieldOptionsUpdate>,
    ) -> Result<Vec<ViewFieldOption>> {
        let view = self.authorize_view(user_id, Operation::UpdateFieldOptions, view_id)?;
        if !view.capabilities().has_field_options {
            return Err(ViewError::ViewDoesNotSupportFieldOptions(view.kind.to_string()));
        }
        let fields = self.table_fields(view.table_id)?;
        let mut updated = Vec::with_capacity(updates.len());
        for (field_id, update) in &updates {
            let field = fields
                .iter()
                .find(|field| field.id == *field_id)
                .ok_or(ViewError::UnrelatedField(*field_id))?;
            if let Some(Some(aggregation)) = update.aggregation {
                if !aggregation.is_compatible_with(field.kind()) {
                    return Err(ViewError::AggregationTypeNotSupported {
                        aggregation: aggregation.name().to_string(),
                        field_id: *field_id,
                    });
                }
            }
            if view.kind == ViewKind::Form && update.enabled == Some(true) && field.kind().is_read_only() {
                return Err(ViewError::FormViewFieldTypeIsNotSupported(*field_id));
            }
            let mut option = view.field_option(field);
            update.apply_to(&mut option);
            updated.push(option);
        }

        self.mutate_view(view_id, |view| {
            for option in &updated {
                view.field_options.insert(option.field_id, option.clone());
            }
            Ok(())
        })?;
        self.state.events.publish(EngineEvent::FieldOptionsUpdated { view_id });
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Copies a table with its rows and live views. The copied views get
    /// new ids and no index storage; they build their own.
    pub fn duplicate_table(&self, user_id: UserId, table_id: TableId, name: &str) -> Result<TableId> {
        let source = self.authorize_table(user_id, Operation::DuplicateTable, table_id)?;
        let ids = &self.state.ids;
        let new_table_id = ids.table.next();

        let (table, field_ids) = {
            let source = source.read()?;
            let field_ids: HashMap<FieldId, FieldId> = source
                .fields()
                .iter()
                .map(|field| (field.id, self.next_field_id()))
                .collect();
            (source.duplicate(new_table_id, name, &field_ids)?, field_ids)
        };
        self.state.tables.write()?.insert(new_table_id, table.into_shared());

        let remap = |field_id: FieldId| field_ids.get(&field_id).copied().unwrap_or(field_id);
        let new_view_ids = {
            let mut views = self.state.views.write()?;
            let sources: Vec<View> = views
                .values()
                .filter(|view| view.table_id == table_id && !view.trashed)
                .cloned()
                .collect();
            let mut new_view_ids = Vec::with_capacity(sources.len());
            for source in sources {
                let new_id = ids.view.next();
                let group_ids: HashMap<FilterGroupId, FilterGroupId> = source
                    .filter_groups
                    .iter()
                    .map(|group| (group.id, ids.filter_group.next()))
                    .collect();
                let copy = View {
                    id: new_id,
                    table_id: new_table_id,
                    slug: generate_slug(),
                    db_index_name: None,
                    filters: source
                        .filters
                        .iter()
                        .map(|filter| ViewFilter {
                            id: ids.filter.next(),
                            view_id: new_id,
                            field_id: remap(filter.field_id),
                            group_id: filter.group_id.and_then(|id| group_ids.get(&id).copied()),
                            ..filter.clone()
                        })
                        .collect(),
                    filter_groups: source
                        .filter_groups
                        .iter()
                        .filter_map(|group| {
                            Some(ViewFilterGroup {
                                id: *group_ids.get(&group.id)?,
                                view_id: new_id,
                                filter_type: group.filter_type,
                            })
                        })
                        .collect(),
                    sorts: source
                        .sorts
                        .iter()
                        .map(|sort| ViewSort {
                            id: ids.sort.next(),
                            view_id: new_id,
                            field_id: remap(sort.field_id),
                            order: sort.order,
                        })
                        .collect(),
                    field_options: source
                        .field_options
                        .values()
                        .map(|option| {
                            let field_id = remap(option.field_id);
                            (field_id, ViewFieldOption { field_id, ..option.clone() })
                        })
                        .collect(),
                    decorations: source
                        .decorations
                        .iter()
                        .map(|decoration| ViewDecoration {
                            id: ids.decoration.next(),
                            view_id: new_id,
                            ..decoration.clone()
                        })
                        .collect(),
                    ..source.clone()
                };
                views.insert(new_id, copy);
                new_view_ids.push(new_id);
            }
            new_view_ids
        };

        info!(
            "duplicated table {} into {} with {} view(s)",
            table_id,
            new_table_id,
            new_view_ids.len()
        );
        for view_id in new_view_ids {
            self.state.events.publish(EngineEvent::ViewCreated {
                table_id: new_table_id,
                view_id,
            });
            self.schedule_index_creation_if_needed(view_id)?;
        }
        Ok(new_table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::EventLog;
    use crate::field::{FieldType, FieldValue};
    use crate::permissions::WorkspaceMembers;
    use crate::view::AggregationType;
    use std::sync::Arc;

    const USER: UserId = 1;
    const OTHER_MEMBER: UserId = 2;
    const OUTSIDER: UserId = 3;

    struct Fixture {
        handler: ViewHandler,
        table_id: TableId,
        text: Field,
        number: Field,
        links: Field,
        log: Arc<EventLog>,
    }

    fn fixture() -> Fixture {
        let members = Arc::new(WorkspaceMembers::new());
        members.add_member(1, USER).unwrap();
        members.add_member(1, OTHER_MEMBER).unwrap();
        let handler = ViewHandler::with_immediate_indexing(EngineConfig::default(), members).unwrap();
        let table_id = handler.create_table(USER, 1, "Projects").unwrap();
        let text = handler.create_field(table_id, "Name", FieldType::Text).unwrap();
        let number = handler.create_field(table_id, "Budget", FieldType::number()).unwrap();
        let links = handler
            .create_field(table_id, "Related", FieldType::LinkRow { link_row_table_id: table_id })
            .unwrap();
        handler
            .create_row(table_id, vec![(text.id, FieldValue::text("Apollo")), (number.id, FieldValue::number(5))])
            .unwrap();
        let log = EventLog::new();
        handler.events().subscribe(log.clone());
        Fixture {
            handler,
            table_id,
            text,
            number,
            links,
            log,
        }
    }

    fn other_table_field(fx: &Fixture) -> Field {
        let other = fx.handler.create_table(USER, 1, "Other").unwrap();
        fx.handler.create_field(other, "Elsewhere", FieldType::Text).unwrap()
    }

    #[test]
    fn test_create_view_orders_per_table() {
        let fx = fixture();
        let first = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let second = fx
            .handler
            .create_view(
                USER,
                fx.table_id,
                NewView::new(ViewKind::Grid, "Else").filter_type(FilterType::Or).filters_disabled(true),
            )
            .unwrap();
        assert_eq!((first.order, second.order), (1, 2));
        assert_eq!(second.filter_type, FilterType::Or);
        assert!(second.filters_disabled);
        assert_eq!(first.slug.len(), 43);

        let other = fx.handler.create_table(USER, 1, "Other").unwrap();
        let third = fx.handler.create_view(USER, other, NewView::new(ViewKind::Grid, "Name")).unwrap();
        assert_eq!(third.order, 1);

        assert!(matches!(
            fx.handler.create_view(OUTSIDER, fx.table_id, NewView::new(ViewKind::Grid, "")),
            Err(ViewError::UserNotInWorkspace(OUTSIDER, 1))
        ));
        assert!(matches!(
            fx.log.events().first(),
            Some(EngineEvent::ViewCreated { view_id, .. }) if *view_id == first.id
        ));
    }

    #[test]
    fn test_update_and_trash_view() {
        let fx = fixture();
        let view = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let updated = fx
            .handler
            .update_view(
                USER,
                view.id,
                ViewUpdate {
                    name: Some("Renamed".into()),
                    filter_type: Some(FilterType::Or),
                    password: Some(Some("secret".into())),
                    public: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(fx.handler.check_public_view_password(view.id, "secret").unwrap());
        assert!(!fx.handler.check_public_view_password(view.id, "guess").unwrap());

        fx.handler.delete_view(USER, view.id).unwrap();
        assert!(matches!(
            fx.handler.get_view(USER, view.id),
            Err(ViewError::ViewDoesNotExist(_))
        ));
        fx.handler.restore_view(USER, view.id).unwrap();
        assert_eq!(fx.handler.get_view(USER, view.id).unwrap().name, "Renamed");
    }

    #[test]
    fn test_form_views_can_not_filter_or_sort() {
        let fx = fixture();
        let form = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Form, "Form")).unwrap();
        assert!(matches!(
            fx.handler.create_filter(USER, form.id, fx.text.id, FilterOperator::Equal, "x", None),
            Err(ViewError::ViewFilterNotSupported(_))
        ));
        assert!(matches!(
            fx.handler.create_sort(USER, form.id, fx.text.id, SortOrder::Ascending),
            Err(ViewError::ViewSortNotSupported(_))
        ));
        assert!(matches!(
            fx.handler.create_decoration(USER, form.id, "left_border_color", "single_select_color", serde_json::json!({})),
            Err(ViewError::ViewDecorationNotSupported(_))
        ));
    }

    #[test]
    fn test_filter_crud() {
        let fx = fixture();
        let view = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let elsewhere = other_table_field(&fx);

        assert!(matches!(
            fx.handler.create_filter(USER, view.id, elsewhere.id, FilterOperator::Equal, "x", None),
            Err(ViewError::FieldNotInTable { .. })
        ));
        assert!(matches!(
            fx.handler.create_filter(USER, view.id, fx.text.id, FilterOperator::HigherThan, "1", None),
            Err(ViewError::ViewFilterTypeNotAllowedForField { .. })
        ));
        assert!(matches!(
            fx.handler.create_filter(OUTSIDER, view.id, fx.text.id, FilterOperator::Equal, "x", None),
            Err(ViewError::UserNotInWorkspace(..))
        ));

        let filter = fx
            .handler
            .create_filter(USER, view.id, fx.text.id, FilterOperator::Equal, "test", None)
            .unwrap();
        assert_eq!(fx.handler.get_filter(USER, filter.id).unwrap(), filter);

        let updated = fx
            .handler
            .update_filter(
                USER,
                filter.id,
                FilterUpdate {
                    value: Some("test3".into()),
                    operator: Some(FilterOperator::NotEqual),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.value, "test3");
        assert_eq!(updated.operator, FilterOperator::NotEqual);
        assert_eq!(updated.field_id, fx.text.id);

        fx.handler.delete_filter(USER, filter.id).unwrap();
        assert!(matches!(
            fx.handler.get_filter(USER, filter.id),
            Err(ViewError::ViewFilterDoesNotExist(_))
        ));
    }

    #[test]
    fn test_filters_of_trashed_views_are_not_found() {
        let fx = fixture();
        let view = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let filter = fx
            .handler
            .create_filter(USER, view.id, fx.text.id, FilterOperator::Contains, "a", None)
            .unwrap();
        let sort = fx.handler.create_sort(USER, view.id, fx.text.id, SortOrder::Ascending).unwrap();
        fx.handler.delete_view(USER, view.id).unwrap();

        assert!(matches!(
            fx.handler.get_filter(USER, filter.id),
            Err(ViewError::ViewFilterDoesNotExist(_))
        ));
        assert!(matches!(
            fx.handler.get_sort(USER, sort.id),
            Err(ViewError::ViewSortDoesNotExist(_))
        ));
        assert!(matches!(
            fx.handler.update_sort(USER, sort.id, SortUpdate::default()),
            Err(ViewError::ViewSortDoesNotExist(_))
        ));
    }

    #[test]
    fn test_filter_groups() {
        let fx = fixture();
        let view = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let group = fx.handler.create_filter_group(USER, view.id, FilterType::Or).unwrap();
        fx.handler
            .create_filter(USER, view.id, fx.text.id, FilterOperator::Equal, "a", Some(group.id))
            .unwrap();
        assert!(matches!(
            fx.handler.create_filter(USER, view.id, fx.text.id, FilterOperator::Equal, "a", Some(999)),
            Err(ViewError::ViewFilterGroupDoesNotExist(999))
        ));
        let group = fx.handler.update_filter_group(USER, group.id, FilterType::And).unwrap();
        assert_eq!(group.filter_type, FilterType::And);

        fx.handler.delete_filter_group(USER, group.id).unwrap();
        assert!(fx.handler.list_filters(USER, view.id).unwrap().is_empty());
    }

    #[test]
    fn test_sort_crud() {
        let fx = fixture();
        let view = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let elsewhere = other_table_field(&fx);

        assert!(matches!(
            fx.handler.create_sort(USER, view.id, fx.links.id, SortOrder::Ascending),
            Err(ViewError::ViewSortFieldNotSupported(_))
        ));
        assert!(matches!(
            fx.handler.create_sort(USER, view.id, elsewhere.id, SortOrder::Ascending),
            Err(ViewError::FieldNotInTable { .. })
        ));
        let sort = fx.handler.create_sort(USER, view.id, fx.text.id, SortOrder::Ascending).unwrap();
        assert!(matches!(
            fx.handler.create_sort(USER, view.id, fx.text.id, SortOrder::Ascending),
            Err(ViewError::ViewSortFieldAlreadyExist { .. })
        ));
        let second = fx.handler.create_sort(USER, view.id, fx.number.id, SortOrder::Descending).unwrap();

        let updated = fx
            .handler
            .update_sort(USER, sort.id, SortUpdate { order: Some(SortOrder::Descending), ..Default::default() })
            .unwrap();
        assert_eq!(updated.order, SortOrder::Descending);
        assert!(matches!(
            fx.handler.update_sort(USER, second.id, SortUpdate { field_id: Some(fx.text.id), ..Default::default() }),
            Err(ViewError::ViewSortFieldAlreadyExist { .. })
        ));

        fx.handler.delete_sort(USER, sort.id).unwrap();
        assert_eq!(fx.handler.list_sorts(USER, view.id).unwrap(), vec![second]);
    }

    #[test]
    fn test_duplicate_view_names_and_position() {
        let fx = fixture();
        let grid = fx
            .handler
            .create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid").public())
            .unwrap();
        let form = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Form, "Form")).unwrap();
        fx.handler
            .create_filter(USER, grid.id, fx.text.id, FilterOperator::Equal, "test", None)
            .unwrap();
        fx.handler.create_sort(USER, grid.id, fx.text.id, SortOrder::Ascending).unwrap();
        fx.handler
            .create_decoration(USER, grid.id, "left_border_color", "conditional_color", serde_json::json!({"config": 12}))
            .unwrap();
        fx.log.clear();

        assert!(matches!(
            fx.handler.duplicate_view(OUTSIDER, grid.id),
            Err(ViewError::UserNotInWorkspace(..))
        ));
        let copy = fx.handler.duplicate_view(USER, grid.id).unwrap();
        assert_eq!(copy.name, "Grid 2");
        assert_eq!(copy.order, grid.order + 1);
        assert!(!copy.public);
        assert_eq!(copy.filters[0].value, "test");
        assert_eq!(copy.sorts[0].order, SortOrder::Ascending);
        assert_eq!(copy.decorations[0].value_provider_conf, serde_json::json!({"config": 12}));
        assert!(fx.log.events().contains(&EngineEvent::ViewsReordered {
            table_id: fx.table_id,
            order: vec![grid.id, copy.id, form.id],
        }));

        assert_eq!(fx.handler.duplicate_view(USER, copy.id).unwrap().name, "Grid 2 2");
        assert_eq!(fx.handler.duplicate_view(USER, grid.id).unwrap().name, "Grid 3");
    }

    #[test]
    fn test_order_views_per_ownership_scope() {
        let fx = fixture();
        let new = |name: &str| {
            fx.handler
                .create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, name))
                .unwrap()
                .id
        };
        let (grid_1, grid_2, grid_3) = (new("1"), new("2"), new("3"));
        let personal = fx
            .handler
            .create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "mine").personal())
            .unwrap()
            .id;
        let collaborative = OwnershipType::Collaborative;

        assert!(matches!(
            fx.handler.order_views(OUTSIDER, fx.table_id, collaborative, &[]),
            Err(ViewError::UserNotInWorkspace(..))
        ));
        assert!(matches!(
            fx.handler.order_views(USER, fx.table_id, collaborative, &[0]),
            Err(ViewError::ViewNotInTable(0))
        ));
        assert!(matches!(
            fx.handler.order_views(USER, fx.table_id, collaborative, &[personal, grid_3, grid_2, grid_1]),
            Err(ViewError::ViewNotInTable(_))
        ));

        fx.handler.order_views(USER, fx.table_id, collaborative, &[grid_3, grid_2, grid_1]).unwrap();
        let orders = |ids: [ViewId; 3]| ids.map(|id| fx.handler.get_view(USER, id).unwrap().order);
        assert_eq!(orders([grid_1, grid_2, grid_3]), [3, 2, 1]);

        fx.handler.order_views(USER, fx.table_id, collaborative, &[grid_1, grid_3, grid_2]).unwrap();
        fx.handler.order_views(USER, fx.table_id, collaborative, &[grid_1]).unwrap();
        assert_eq!(orders([grid_1, grid_2, grid_3]), [1, 3, 2]);

        fx.handler
            .order_views(USER, fx.table_id, OwnershipType::Personal, &[personal])
            .unwrap();
    }

    #[test]
    fn test_personal_views_belong_to_their_owner() {
        let fx = fixture();
        let personal = fx
            .handler
            .create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "mine").personal())
            .unwrap();
        fx.handler
            .create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "shared"))
            .unwrap();

        assert!(fx.handler.get_view(USER, personal.id).is_ok());
        assert!(matches!(
            fx.handler.get_view(OTHER_MEMBER, personal.id),
            Err(ViewError::PermissionDenied(_))
        ));
        assert!(matches!(
            fx.handler.duplicate_view(OTHER_MEMBER, personal.id),
            Err(ViewError::PermissionDenied(_))
        ));
        assert!(matches!(
            fx.handler.delete_view(OTHER_MEMBER, personal.id),
            Err(ViewError::PermissionDenied(_))
        ));
        assert_eq!(fx.handler.list_views(OTHER_MEMBER, fx.table_id, None).unwrap().len(), 1);
        assert_eq!(fx.handler.list_views(USER, fx.table_id, Some(ViewKind::Grid)).unwrap().len(), 2);
    }

    #[test]
    fn test_rotate_slug_and_public_lookup() {
        let fx = fixture();
        let form = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Form, "Form")).unwrap();
        assert!(matches!(
            fx.handler.rotate_view_slug(OUTSIDER, form.id),
            Err(ViewError::UserNotInWorkspace(..))
        ));
        let rotated = fx.handler.rotate_view_slug(USER, form.id).unwrap();
        assert_ne!(rotated.slug, form.slug);
        assert_eq!(rotated.slug.len(), 43);

        assert!(matches!(
            fx.handler.get_public_view_by_slug(Some(OUTSIDER), "not_existing"),
            Err(ViewError::PublicViewDoesNotExist(_))
        ));
        assert!(matches!(
            fx.handler.get_public_view_by_slug(Some(OUTSIDER), &rotated.slug),
            Err(ViewError::PublicViewDoesNotExist(_))
        ));
        assert_eq!(fx.handler.get_public_view_by_slug(Some(USER), &rotated.slug).unwrap().id, form.id);

        fx.handler
            .update_view(USER, form.id, ViewUpdate { public: Some(true), ..Default::default() })
            .unwrap();
        assert_eq!(fx.handler.get_public_view_by_slug(None, &rotated.slug).unwrap().id, form.id);
    }

    #[test]
    fn test_field_options() {
        let fx = fixture();
        let grid = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        let elsewhere = other_table_field(&fx);

        assert!(matches!(
            fx.handler.update_field_options(
                USER,
                grid.id,
                BTreeMap::from([(elsewhere.id, FieldOptionsUpdate { width: Some(150), ..Default::default() })])
            ),
            Err(ViewError::UnrelatedField(_))
        ));
        assert!(matches!(
            fx.handler.update_field_options(
                USER,
                grid.id,
                BTreeMap::from([(
                    fx.text.id,
                    FieldOptionsUpdate { aggregation: Some(Some(AggregationType::Sum)), ..Default::default() }
                )])
            ),
            Err(ViewError::AggregationTypeNotSupported { .. })
        ));

        fx.handler
            .update_field_options(
                USER,
                grid.id,
                BTreeMap::from([
                    (fx.text.id, FieldOptionsUpdate { width: Some(150), ..Default::default() }),
                    (fx.number.id, FieldOptionsUpdate { width: Some(250), ..Default::default() }),
                ]),
            )
            .unwrap();
        let options = fx.handler.get_field_options(USER, grid.id).unwrap();
        assert_eq!(options.len(), 3);
        assert_eq!((options[0].field_id, options[0].width), (fx.text.id, 150));
        assert_eq!((options[1].field_id, options[1].width), (fx.number.id, 250));
        assert_eq!(options[2].width, ViewFieldOption::DEFAULT_WIDTH);
    }

    #[test]
    fn test_form_rejects_read_only_fields() {
        let fx = fixture();
        let created_on = fx.handler.create_field(fx.table_id, "Created", FieldType::CreatedOn).unwrap();
        let form = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Form, "Form")).unwrap();
        let enable = |enabled| {
            BTreeMap::from([(created_on.id, FieldOptionsUpdate { enabled: Some(enabled), ..Default::default() })])
        };
        assert!(matches!(
            fx.handler.update_field_options(USER, form.id, enable(true)),
            Err(ViewError::FormViewFieldTypeIsNotSupported(_))
        ));
        assert!(fx.handler.update_field_options(USER, form.id, enable(false)).is_ok());
    }

    #[test]
    fn test_field_type_change_cascades() {
        let fx = fixture();
        let grid = fx.handler.create_view(USER, fx.table_id, NewView::new(ViewKind::Grid, "Grid")).unwrap();
        fx.handler
            .create_filter(USER, grid.id, fx.text.id, FilterOperator::ContainsWord, "apollo", None)
            .unwrap();
        fx.handler
            .create_filter(USER, grid.id, fx.text.id, FilterOperator::NotEmpty, "", None)
            .unwrap();
        fx.handler.create_sort(USER, grid.id, fx.text.id, SortOrder::Ascending).unwrap();

        fx.handler
            .change_field_type(fx.table_id, fx.text.id, FieldType::File)
            .unwrap();
        let view = fx.handler.get_view(USER, grid.id).unwrap();
        assert_eq!(view.filters.len(), 1);
        assert_eq!(view.filters[0].operator, FilterOperator::NotEmpty);
        assert!(view.sorts.is_empty());

        fx.handler.delete_field(fx.table_id, fx.text.id).unwrap();
        assert!(fx.handler.get_view(USER, grid.id).unwrap().filters.is_empty());
    }
}
