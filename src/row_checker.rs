//! Public Visibility Row Checker.
//!
//! Answers "which publicly shared views of this table show this row?" for
//! realtime notifications. Construction compiles every public view's filter
//! once and costs no table queries. Each check then runs one query per view
//! that actually has filters; views without filters are answered for free.
//!
//! A view's answer for a row can be cached for the checker's lifetime when
//! none of the fields its filters read are among the fields the caller says
//! are about to change. The checker never revalidates on its own.

use crate::error::Result;
use crate::field::FieldId;
use crate::filters::{self, CompiledFilter};
use crate::handler::ViewHandler;
use crate::table::{RowId, RowModel, SharedTable, TableId};
use crate::view::View;
use log::debug;
use std::collections::{BTreeSet, HashMap};

/// Rows of a batch a view shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedRows {
    /// Every row of the batch; the view has no filters.
    All,
    Only(BTreeSet<RowId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublicViewRows {
    pub view: View,
    pub allowed: AllowedRows,
}

#[derive(Debug)]
struct CheckedView {
    view: View,
    /// `None` for views whose filters match every row.
    filter: Option<CompiledFilter>,
    cacheable: bool,
}

/// Request-scoped visibility checker for one table.
#[derive(Debug)]
pub struct PublicViewRowChecker {
    table: SharedTable,
    model: RowModel,
    views: Vec<CheckedView>,
    cache: HashMap<(usize, RowId), bool>,
}

impl PublicViewRowChecker {
    /// Public views this checker considers, by `(order, id)`.
    pub fn views(&self) -> Vec<&View> {
        self.views.iter().map(|checked| &checked.view).collect()
    }

    /// Whether the view at `position` shows each of `row_ids`, reading the
    /// table once for the ids that are not cached.
    fn visible_among(&mut self, position: usize, row_ids: &[RowId]) -> Result<BTreeSet<RowId>> {
        let checked = &self.views[position];
        let Some(filter) = &checked.filter else {
            return Ok(row_ids.iter().copied().collect());
        };

        let mut visible = BTreeSet::new();
        let mut unknown = Vec::new();
        for row_id in row_ids {
            match self.cache.get(&(position, *row_id)) {
                Some(true) => {
                    visible.insert(*row_id);
                }
                Some(false) => {}
                None => unknown.push(*row_id),
            }
        }
        if unknown.is_empty() {
            return Ok(visible);
        }

        let rows = self.table.read()?.query_rows(&self.model, &unknown);
        let matching: BTreeSet<RowId> = filter.filter_rows(rows).ids().into_iter().collect();
        if checked.cacheable {
            for row_id in &unknown {
                self.cache
                    .insert((position, *row_id), matching.contains(row_id));
            }
        }
        visible.extend(matching);
        Ok(visible)
    }

    /// Public views showing the row, by `(order, id)`.
    pub fn get_public_views_where_row_is_visible(&mut self, row_id: RowId) -> Result<Vec<View>> {
        let mut views = Vec::new();
        for position in 0..self.views.len() {
            if self.visible_among(position, &[row_id])?.contains(&row_id) {
                views.push(self.views[position].view.clone());
            }
        }
        Ok(views)
    }

    /// Batch form: every public view that shows at least one of the rows,
    /// with the rows it shows. Views without filters report
    /// [`AllowedRows::All`].
    pub fn get_public_views_where_rows_are_visible(&mut self, row_ids: &[RowId]) -> Result<Vec<PublicViewRows>> {
        let mut result = Vec::new();
        for position in 0..self.views.len() {
            let allowed = if self.views[position].filter.is_none() {
                AllowedRows::All
            } else {
                let visible = self.visible_among(position, row_ids)?;
                if visible.is_empty() {
                    continue;
                }
                AllowedRows::Only(visible)
            };
            result.push(PublicViewRows {
                view: self.views[position].view.clone(),
                allowed,
            });
        }
        Ok(result)
    }
}

impl ViewHandler {
    /// Builds a checker over the public views of a table.
    ///
    /// Views that can not filter rows, such as forms, are never included.
    /// With `only_realtime` set, only kinds that want realtime public events
    /// are. `updated_field_ids` names the fields about to change; `None`
    /// means anything may change and disables caching.
    pub fn get_public_views_row_checker(
        &self,
        table_id: TableId,
        model: &RowModel,
        only_realtime: bool,
        updated_field_ids: Option<BTreeSet<FieldId>>,
    ) -> Result<PublicViewRowChecker> {
        let table = self.state.table(table_id)?;
        let mut public_views: Vec<View> = self
            .state
            .views
            .read()?
            .values()
            .filter(|view| view.table_id == table_id && view.public && !view.trashed)
            .filter(|view| {
                let capabilities = view.capabilities();
                capabilities.can_filter && (!only_realtime || capabilities.wants_realtime_public_events)
            })
            .cloned()
            .collect();
        public_views.sort_by_key(|view| (view.order, view.id));

        let mut views = Vec::with_capacity(public_views.len());
        for view in public_views {
            let compiled = filters::compile(&view, model)?;
            let cacheable = updated_field_ids
                .as_ref()
                .map_or(false, |updated| !compiled.references_any(updated));
            debug!(
                "public view {}: {} filter(s), cacheable {}",
                view.id,
                compiled.field_ids.len(),
                cacheable
            );
            views.push(CheckedView {
                view,
                filter: if compiled.is_trivial() { None } else { Some(compiled) },
                cacheable,
            });
        }

        Ok(PublicViewRowChecker {
            table,
            model: model.clone(),
            views,
            cache: HashMap::new(),
        })
    }
}
