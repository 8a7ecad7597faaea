//! Authorization seam.
//!
//! The engine does not manage users. Every store operation names the
//! [`Operation`] it performs and asks a [`PermissionChecker`] whether the
//! acting user may perform it in the table's workspace.

use crate::error::{Result, ViewError};
use crate::table::WorkspaceId;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

pub type UserId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateView,
    ReadView,
    ListViews,
    UpdateView,
    DeleteView,
    RestoreView,
    DuplicateView,
    OrderViews,
    RotateViewSlug,
    CreateViewFilter,
    ReadViewFilter,
    UpdateViewFilter,
    DeleteViewFilter,
    CreateViewFilterGroup,
    ReadViewFilterGroup,
    UpdateViewFilterGroup,
    DeleteViewFilterGroup,
    CreateViewSort,
    ReadViewSort,
    UpdateViewSort,
    DeleteViewSort,
    CreateViewDecoration,
    ReadViewDecoration,
    UpdateViewDecoration,
    DeleteViewDecoration,
    ReadFieldOptions,
    UpdateFieldOptions,
    ReadAggregations,
    CreateTable,
    DuplicateTable,
    UpdateTable,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CreateView => "database.table.create_view",
            Operation::ReadView => "database.table.view.read",
            Operation::ListViews => "database.table.list_views",
            Operation::UpdateView => "database.table.view.update",
            Operation::DeleteView => "database.table.view.delete",
            Operation::RestoreView => "database.table.view.restore",
            Operation::DuplicateView => "database.table.view.duplicate",
            Operation::OrderViews => "database.table.order_views",
            Operation::RotateViewSlug => "database.table.view.update_slug",
            Operation::CreateViewFilter => "database.table.view.create_filter",
            Operation::ReadViewFilter => "database.table.view.filter.read",
            Operation::UpdateViewFilter => "database.table.view.filter.update",
            Operation::DeleteViewFilter => "database.table.view.filter.delete",
            Operation::CreateViewFilterGroup => "database.table.view.create_filter_group",
            Operation::ReadViewFilterGroup => "database.table.view.filter_group.read",
            Operation::UpdateViewFilterGroup => "database.table.view.filter_group.update",
            Operation::DeleteViewFilterGroup => "database.table.view.filter_group.delete",
            Operation::CreateViewSort => "database.table.view.create_sort",
            Operation::ReadViewSort => "database.table.view.sort.read",
            Operation::UpdateViewSort => "database.table.view.sort.update",
            Operation::DeleteViewSort => "database.table.view.sort.delete",
            Operation::CreateViewDecoration => "database.table.view.create_decoration",
            Operation::ReadViewDecoration => "database.table.view.decoration.read",
            Operation::UpdateViewDecoration => "database.table.view.decoration.update",
            Operation::DeleteViewDecoration => "database.table.view.decoration.delete",
            Operation::ReadFieldOptions => "database.table.view.read_field_options",
            Operation::UpdateFieldOptions => "database.table.view.update_field_options",
            Operation::ReadAggregations => "database.table.view.read_aggregations",
            Operation::CreateTable => "database.create_table",
            Operation::DuplicateTable => "database.table.duplicate",
            Operation::UpdateTable => "database.table.update",
        }
    }
}

/// Decides whether a user may perform an operation in a workspace.
pub trait PermissionChecker: Send + Sync {
    fn check(&self, user_id: UserId, operation: Operation, workspace_id: WorkspaceId) -> Result<()>;
}

/// Allows every operation to every member of a workspace.
#[derive(Debug, Default)]
pub struct WorkspaceMembers {
    members: RwLock<HashMap<WorkspaceId, HashSet<UserId>>>,
}

impl WorkspaceMembers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<()> {
        self.members
            .write()?
            .entry(workspace_id)
            .or_default()
            .insert(user_id);
        Ok(())
    }

    pub fn remove_member(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<()> {
        if let Some(users) = self.members.write()?.get_mut(&workspace_id) {
            users.remove(&user_id);
        }
        Ok(())
    }
}

impl PermissionChecker for WorkspaceMembers {
    fn check(&self, user_id: UserId, operation: Operation, workspace_id: WorkspaceId) -> Result<()> {
        let members = self.members.read()?;
        if members
            .get(&workspace_id)
            .map_or(false, |users| users.contains(&user_id))
        {
            Ok(())
        } else {
            log::debug!(
                "user {} denied {} in workspace {}",
                user_id,
                operation.as_str(),
                workspace_id
            );
            Err(ViewError::UserNotInWorkspace(user_id, workspace_id))
        }
    }
}

/// Allows everything. Useful for internal callers and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check(&self, _user_id: UserId, _operation: Operation, _workspace_id: WorkspaceId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_members() {
        let members = WorkspaceMembers::new();
        members.add_member(1, 10).unwrap();
        assert!(members.check(10, Operation::ReadView, 1).is_ok());
        assert!(matches!(
            members.check(11, Operation::ReadView, 1),
            Err(ViewError::UserNotInWorkspace(11, 1))
        ));
        assert!(members.check(10, Operation::ReadView, 2).is_err());
        members.remove_member(1, 10).unwrap();
        assert!(members.check(10, Operation::ReadView, 1).is_err());
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::CreateViewSort.as_str(), "database.table.view.create_sort");
        assert!(AllowAll.check(1, Operation::OrderViews, 99).is_ok());
    }
}
