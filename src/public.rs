//! Public, read-only query surface of a shared view.
//!
//! Rows are read once, then narrowed by the view's stored filters, the
//! ad-hoc filters and search of the request, and finally ordered by either
//! the request's `order_by` or the view's own sorts. Only fields visible in
//! the view may be filtered, searched, ordered or returned.

use crate::error::{Result, ViewError};
use crate::field::{Field, FieldId};
use crate::filters::{self, FilterBuilder, FilterOperator};
use crate::handler::ViewHandler;
use crate::sorting::{OrderSpec, SortKey};
use crate::table::RowSet;
use crate::view::{FilterType, SortOrder, ViewFieldOption, ViewId};
use std::collections::BTreeMap;

/// Optional overrides a public request layers on top of the view.
#[derive(Debug, Clone, Default)]
pub struct PublicRowsQuery {
    /// Case-insensitive substring searched in every visible field.
    pub search: Option<String>,
    /// Comma separated `field_<id>` or `-field_<id>` keys.
    pub order_by: Option<String>,
    /// `filter__field_<id>__<operator>` keys with raw values. Other keys
    /// are ignored.
    pub filters: BTreeMap<String, String>,
    pub filter_type: Option<FilterType>,
    /// Comma separated `field_<id>` names.
    pub include_fields: Option<String>,
    pub exclude_fields: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublicRows {
    pub rows: RowSet,
    /// Fields returned to the public, in display order.
    pub field_ids: Vec<FieldId>,
    /// Options of every publicly visible field, in display order.
    pub field_options: Vec<ViewFieldOption>,
}

fn parse_field_name(name: &str) -> Option<FieldId> {
    name.trim().strip_prefix("field_")?.parse().ok()
}

fn parse_field_list(list: &str) -> Vec<FieldId> {
    list.split(',').filter_map(parse_field_name).collect()
}

/// `filter__field_<id>__<operator>` into its parts.
fn parse_filter_key(key: &str) -> Option<(FieldId, &str)> {
    let rest = key.strip_prefix("filter__")?;
    let (field, operator) = rest.split_once("__")?;
    Some((parse_field_name(field)?, operator))
}

fn visible_field<'a>(visible: &'a [(Field, ViewFieldOption)], field_id: FieldId) -> Result<&'a Field> {
    visible
        .iter()
        .map(|(field, _)| field)
        .find(|field| field.id == field_id)
        .ok_or(ViewError::FieldDoesNotExist(field_id))
}

impl ViewHandler {
    /// Rows of a public view together with the fields the public may see.
    /// Views that are not public do not exist here.
    pub fn get_public_rows_queryset_and_field_ids(
        &self,
        view_id: ViewId,
        query: &PublicRowsQuery,
    ) -> Result<PublicRows> {
        let view = self.view_snapshot(view_id)?;
        if !view.public {
            return Err(ViewError::ViewDoesNotExist(view_id));
        }
        let table = self.state.table(view.table_id)?;
        let (model, rows) = {
            let table = table.read()?;
            let model = table.full_model();
            let rows = table.query(&model);
            (model, rows)
        };

        let mut visible: Vec<(Field, ViewFieldOption)> = model
            .fields()
            .iter()
            .map(|field| (field.clone(), view.field_option(field)))
            .filter(|(_, option)| !option.hidden)
            .collect();
        visible.sort_by_key(|(field, option)| (option.order, field.id));

        let capabilities = view.capabilities();
        let mut rows = if capabilities.can_filter {
            filters::compile(&view, &model)?.apply(rows)
        } else {
            rows
        };

        let mut builder = FilterBuilder::new(query.filter_type.unwrap_or_default());
        let mut has_overrides = false;
        for (key, value) in &query.filters {
            let Some((field_id, operator)) = parse_filter_key(key) else {
                continue;
            };
            let operator: FilterOperator = operator.parse()?;
            let field = visible_field(&visible, field_id)?;
            operator.validate(field, value)?;
            builder.depends_on(field_id).filter(operator.predicate(field, value)?);
            has_overrides = true;
        }
        if has_overrides {
            rows = builder.build().filter_rows(rows);
        }

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            rows = rows.retain(|row| {
                visible.iter().any(|(field, _)| {
                    row.value(field.id)
                        .text_repr(&field.field_type)
                        .to_lowercase()
                        .contains(&needle)
                })
            });
        }

        let collation = self.state.collation()?;
        rows = match query.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
            Some(order_by) => {
                let mut keys = Vec::new();
                for part in order_by.split(',') {
                    let part = part.trim();
                    let (name, order) = match part.strip_prefix('-') {
                        Some(name) => (name, SortOrder::Descending),
                        None => (part, SortOrder::Ascending),
                    };
                    let field_id = parse_field_name(name)
                        .ok_or_else(|| ViewError::InvalidValue(format!("can not order by '{}'", part)))?;
                    let field = visible_field(&visible, field_id)?;
                    if !field.kind().can_order() {
                        return Err(ViewError::ViewSortFieldNotSupported(field_id));
                    }
                    keys.push(SortKey::new(field_id, field.field_type.clone(), order));
                }
                OrderSpec::new(keys, collation).apply(rows)
            }
            None if capabilities.can_sort => self.apply_sorting(view_id, rows)?,
            None => rows,
        };

        let mut field_ids: Vec<FieldId> = visible.iter().map(|(field, _)| field.id).collect();
        if let Some(include) = query.include_fields.as_deref() {
            let include = parse_field_list(include);
            field_ids.retain(|id| include.contains(id));
        }
        if let Some(exclude) = query.exclude_fields.as_deref() {
            let exclude = parse_field_list(exclude);
            field_ids.retain(|id| !exclude.contains(id));
        }

        Ok(PublicRows {
            rows,
            field_ids,
            field_options: visible.into_iter().map(|(_, option)| option).collect(),
        })
    }
}
