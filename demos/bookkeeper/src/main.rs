//! LedgerSync bookkeeper demo.
//!
//! Simulates two bookkeeping views (sales and expenses) kept live against
//! an in-process change source, while a "second device" writes rows. Shows
//! the three binding styles: a synced query per view, and a change stream
//! over payment reminders.
//!
//! # Running
//!
//! ```bash
//! cargo run -p ledgersync-bookkeeper-demo
//! RUST_LOG=debug cargo run -p ledgersync-bookkeeper-demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledgersync::prelude::*;
use ledgersync::testing::MockEventSource;
use ledgersync::FetchFn;

/// One table of the simulated backend.
type Table = Arc<Mutex<Vec<Value>>>;

/// Fetch fn that copies a backend table into a rendered view.
fn view_fetch(name: &'static str, backend: Table, rendered: Table) -> FetchFn {
    Arc::new(move || {
        let backend = Arc::clone(&backend);
        let rendered = Arc::clone(&rendered);
        Box::pin(async move {
            let rows = backend.lock().clone();
            info!(view = name, rows = rows.len(), "refetched");
            *rendered.lock() = rows;
            Ok(())
        })
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let source = Arc::new(MockEventSource::new());
    let client = SyncClient::new(Arc::clone(&source) as Arc<dyn ChangeEventSource>);

    // Simulated backend tables.
    let sales_backend: Table = Arc::new(Mutex::new(vec![
        json!({"id": 1, "item": "notebooks", "amount": 240.0}),
    ]));
    let expenses_backend: Table = Arc::new(Mutex::new(Vec::new()));

    // Rendered copies owned by the views.
    let sales_view: Table = Arc::new(Mutex::new(Vec::new()));
    let expenses_view: Table = Arc::new(Mutex::new(Vec::new()));

    let sales = client
        .synced_query(
            TableId::from("sales"),
            view_fetch("sales", Arc::clone(&sales_backend), Arc::clone(&sales_view)),
        )
        .await?;
    let expenses = client
        .synced_query(
            TableId::from("expenses"),
            view_fetch(
                "expenses",
                Arc::clone(&expenses_backend),
                Arc::clone(&expenses_view),
            ),
        )
        .await?;

    let mut reminders = client
        .change_stream(vec![TableId::from("payment_reminders")])
        .await?;
    tokio::spawn(async move {
        while let Some((table, event)) = reminders.next().await {
            info!(%table, operation = %event.operation, row = %event.row, "reminder changed");
        }
    });

    let sales_state = if sales.connected() { "Live" } else { "Offline" };
    let expenses_state = if expenses.connected() { "Live" } else { "Offline" };
    info!(sales = sales_state, expenses = expenses_state, "views mounted");

    // A second device writes rows: mutate the backend, then notify.
    let writer_source = Arc::clone(&source);
    let writer_sales = Arc::clone(&sales_backend);
    let writer_expenses = Arc::clone(&expenses_backend);
    let writer = tokio::spawn(async move {
        let sales_table = TableId::from("sales");
        let expenses_table = TableId::from("expenses");
        let reminders_table = TableId::from("payment_reminders");

        for i in 2..=4 {
            let row = json!({"id": i, "item": "ledger paper", "amount": 80.0 * f64::from(i)});
            writer_sales.lock().push(row.clone());
            writer_source.emit(&sales_table, Operation::Insert, row);
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        let expense = json!({"id": 1, "category": "rent", "amount": 1200.0});
        writer_expenses.lock().push(expense.clone());
        writer_source.emit(&expenses_table, Operation::Insert, expense);

        writer_source.emit(
            &reminders_table,
            Operation::Insert,
            json!({"id": 1, "customer": "Asha Traders", "due": "2026-09-01"}),
        );
    });
    writer.await?;

    // Let the fire-and-forget refetches land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!(
        sales_rows = sales_view.lock().len(),
        expense_rows = expenses_view.lock().len(),
        absorbed = sales.refetch_metrics().absorbed,
        refetches = sales.refetch_metrics().launched,
        "final view state"
    );

    // Unmount: closing the bindings stops all delivery.
    sales.close();
    expenses.close();
    Ok(())
}
