//! Change event routing.
//!
//! The router is the demultiplexing step between a channel's per-table,
//! per-operation listeners and the consumer's single handler: it normalizes
//! each [`RawNotification`] into a [`ChangeEvent`] and forwards it to
//! exactly one handler, tagged with the originating table. A descriptor
//! covering N tables still has one handler; consumers that refetch
//! unconditionally can ignore the tag.
//!
//! Malformed notifications (unknown operation, table outside the
//! descriptor) are dropped with a warning rather than failing the channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::event::{ChangeEvent, Operation, RawNotification, TableId};

/// Consumer handler invoked once per routed event, tagged with the
/// originating table.
pub type EventHandler = Arc<dyn Fn(&TableId, ChangeEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// EventRouter
// ---------------------------------------------------------------------------

/// Per-channel router: one table set, one handler.
pub struct EventRouter {
    /// Tables this channel's descriptor covers.
    tables: HashSet<TableId>,
    /// The descriptor's single handler.
    handler: EventHandler,
    /// Events forwarded to the handler.
    routed: AtomicU64,
    /// Notifications dropped during normalization.
    dropped: AtomicU64,
}

impl EventRouter {
    /// Creates a router for the given tables and handler.
    pub fn new(tables: impl IntoIterator<Item = TableId>, handler: EventHandler) -> Self {
        Self {
            tables: tables.into_iter().collect(),
            handler,
            routed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Normalizes a raw notification and forwards it to the handler.
    ///
    /// Unknown operations and tables outside the descriptor are dropped
    /// with a `warn!` and counted, never surfaced as errors.
    pub fn route(&self, raw: RawNotification) {
        let Some(operation) = Operation::parse(&raw.operation) else {
            warn!(
                operation = %raw.operation,
                table = %raw.table,
                "dropping notification with unknown operation"
            );
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let table = TableId::from(raw.table.as_str());
        if !self.tables.contains(&table) {
            warn!(%table, "dropping notification for table outside this channel");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = ChangeEvent {
            table: table.clone(),
            operation,
            row: Arc::new(raw.record),
            old_row: raw.old_record.map(Arc::new),
            commit_timestamp: raw.commit_timestamp,
        };

        (self.handler)(&table, event);
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the tables this router covers.
    #[must_use]
    pub fn tables(&self) -> &HashSet<TableId> {
        &self.tables
    }

    /// Returns the number of events forwarded to the handler.
    #[must_use]
    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Returns the number of notifications dropped during normalization.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("tables", &self.tables)
            .field("routed", &self.routed())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
