/// Public Views Example
///
/// This example demonstrates:
/// - Creating a table and a publicly shared grid view
/// - Filtering and sorting the view, with the index built in the background
/// - Querying the public surface with search and ad-hoc filters
/// - Asking which public views show freshly changed rows

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tableview::{
    AllowAll, EngineConfig, EngineState, FieldType, FieldValue, FilterOperator, IndexState, NewView,
    PublicRowsQuery, SortOrder, TokioIndexQueue, ViewHandler, ViewKind,
};

#[tokio::main]
async fn main() -> tableview::Result<()> {
    tableview::init_logging();
    println!("=== TableView Public Views Example ===\n");

    let config = EngineConfig::from_env()?;
    let config = EngineConfig {
        auto_index_view_enabled: true,
        ..config
    };
    let state = EngineState::new(config)?;
    let (queue, worker) = TokioIndexQueue::start(Arc::clone(&state))?;
    let handler = ViewHandler::new(state, Arc::new(AllowAll), queue);

    // 1. A small product table
    println!("1. Creating products table...");
    let table_id = handler.create_table(1, 1, "Products")?;
    let name = handler.create_field(table_id, "Name", FieldType::Text)?;
    let price = handler.create_field(table_id, "Price", FieldType::number())?;
    let in_stock = handler.create_field(table_id, "In stock", FieldType::Boolean)?;

    let items = vec![
        ("Laptop", 999, true),
        ("Mouse", 29, true),
        ("Desk", 299, false),
        ("Chair", 199, true),
        ("Monitor", 399, true),
    ];
    let mut row_ids = Vec::new();
    for (product, amount, stocked) in items {
        row_ids.push(handler.create_row(
            table_id,
            vec![
                (name.id, FieldValue::text(product)),
                (price.id, FieldValue::number(amount)),
                (in_stock.id, FieldValue::Boolean(stocked)),
            ],
        )?);
    }
    println!("   Added {} products\n", row_ids.len());

    // 2. A public view of what is in stock, most expensive first
    println!("2. Sharing an 'In stock' grid view...");
    let view = handler.create_view(1, table_id, NewView::new(ViewKind::Grid, "In stock").public())?;
    handler.create_filter(1, view.id, in_stock.id, FilterOperator::Boolean, "true", None)?;
    handler.create_sort(1, view.id, price.id, SortOrder::Descending)?;
    let view = handler.get_view(1, view.id)?;
    println!("   slug: {}", view.slug);

    for _ in 0..100 {
        if matches!(handler.index_state(view.id)?, IndexState::Ready(_)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("   index: {:?}\n", handler.index_state(view.id)?);

    // 3. What an anonymous visitor sees
    println!("3. Public rows...");
    let public = handler.get_public_view_by_slug(None, &view.slug)?;
    let result = handler.get_public_rows_queryset_and_field_ids(public.id, &PublicRowsQuery::default())?;
    for row in result.rows.rows() {
        println!(
            "   {:<10} {}",
            row.value(name.id).text_repr(&name.field_type),
            row.value(price.id).text_repr(&price.field_type)
        );
    }

    let query = PublicRowsQuery {
        search: Some("mo".to_string()),
        filters: BTreeMap::from([(format!("filter__field_{}__lower_than", price.id), "500".to_string())]),
        ..Default::default()
    };
    let result = handler.get_public_rows_queryset_and_field_ids(public.id, &query)?;
    println!("   search 'mo' under 500: {} row(s)\n", result.rows.len());

    // 4. Realtime: which public views show the rows we are about to touch
    println!("4. Checking visibility of changed rows...");
    let model = handler.get_table(table_id)?.read()?.full_model();
    let mut checker =
        handler.get_public_views_row_checker(table_id, &model, true, Some(BTreeSet::from([price.id])))?;
    for visible in checker.get_public_views_where_rows_are_visible(&row_ids)? {
        println!("   view '{}' shows {:?}", visible.view.name, visible.allowed);
    }

    worker.abort();
    println!("\n=== Example Complete ===");
    Ok(())
}
