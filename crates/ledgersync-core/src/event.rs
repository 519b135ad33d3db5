//! Change event types for the realtime sync layer.
//!
//! Two tiers of types, matching the flow through the stack:
//!
//! - [`RawNotification`] — the wire payload as delivered by the change event
//!   source, one per matching row change.
//! - [`ChangeEvent`] — the normalized event handed to consumer handlers,
//!   with rows shared via `Arc<Value>` for zero-copy fan-out to multiple
//!   channels.
//!
//! Events are transient: they are consumed exactly once by the routing step
//! and never persisted locally. Ordering across distinct tables within one
//! channel is not guaranteed; ordering within one table follows the source's
//! delivery order.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// TableId
// ---------------------------------------------------------------------------

/// Identifier of a backend table (`sales`, `expenses`, `customers`, ...).
///
/// Cheap to clone (`Arc<str>` internally) since every routed event carries
/// its originating table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(Arc<str>);

impl TableId {
    /// Creates a table identifier from a name.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the table name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// Operation — wire discriminant
// ---------------------------------------------------------------------------

/// Discriminant for row change kinds.
///
/// Stored as `#[repr(u8)]` for compact embedding in filters and protocol
/// frames. Wire names follow the source's convention (`INSERT` / `UPDATE` /
/// `DELETE`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A new row was inserted.
    Insert = 0,
    /// An existing row was updated.
    Update = 1,
    /// A row was deleted.
    Delete = 2,
}

impl Operation {
    /// All operations, in wire order. A channel listens on every one of
    /// these per subscribed table.
    pub const ALL: [Operation; 3] = [Self::Insert, Self::Update, Self::Delete];

    /// Returns the wire name for this operation.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a wire name into an operation.
    ///
    /// Returns `None` for names outside the known set; the router drops
    /// such notifications rather than failing the channel.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RawNotification — wire payload
// ---------------------------------------------------------------------------

/// A raw row-change notification as delivered by the change event source.
///
/// This is the shape the source pushes per matching row change, before
/// normalization. `operation` is kept as the wire string so that unknown
/// operations can be observed (and dropped) by the router instead of
/// failing deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNotification {
    /// Schema the changed table belongs to.
    pub schema: String,
    /// Name of the changed table.
    pub table: String,
    /// Wire name of the operation (`INSERT` / `UPDATE` / `DELETE`).
    pub operation: String,
    /// Commit timestamp of the change (milliseconds since epoch).
    pub commit_timestamp: i64,
    /// The changed row. For deletes, the row as it was before deletion.
    pub record: Value,
    /// The previous row image for updates, when the source provides one.
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl RawNotification {
    /// Creates a raw notification.
    #[must_use]
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        operation: impl Into<String>,
        commit_timestamp: i64,
        record: Value,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            operation: operation.into(),
            commit_timestamp,
            record,
            old_record: None,
        }
    }

    /// Attaches the previous row image (update notifications).
    #[must_use]
    pub fn with_old_record(mut self, old_record: Value) -> Self {
        self.old_record = Some(old_record);
        self
    }
}

// ---------------------------------------------------------------------------
// ChangeEvent — normalized delivery
// ---------------------------------------------------------------------------

/// A normalized row-change event delivered to consumer handlers.
///
/// Rows are shared via `Arc<Value>` so that cloning an event for fan-out
/// never copies the row payload.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The table the change occurred on.
    pub table: TableId,
    /// The kind of change.
    pub operation: Operation,
    /// The changed row.
    pub row: Arc<Value>,
    /// The previous row image, when the source provided one.
    pub old_row: Option<Arc<Value>>,
    /// Commit timestamp of the change (milliseconds since epoch).
    pub commit_timestamp: i64,
}

impl ChangeEvent {
    /// Creates an insert event.
    #[must_use]
    pub fn insert(table: TableId, row: Arc<Value>, commit_timestamp: i64) -> Self {
        Self {
            table,
            operation: Operation::Insert,
            row,
            old_row: None,
            commit_timestamp,
        }
    }

    /// Creates an update event with the previous row image.
    #[must_use]
    pub fn update(
        table: TableId,
        row: Arc<Value>,
        old_row: Option<Arc<Value>>,
        commit_timestamp: i64,
    ) -> Self {
        Self {
            table,
            operation: Operation::Update,
            row,
            old_row,
            commit_timestamp,
        }
    }

    /// Creates a delete event.
    #[must_use]
    pub fn delete(table: TableId, row: Arc<Value>, commit_timestamp: i64) -> Self {
        Self {
            table,
            operation: Operation::Delete,
            row,
            old_row: None,
            commit_timestamp,
        }
    }

    /// Normalizes a raw notification into a change event.
    ///
    /// Returns `None` if the wire operation name is unknown; the caller is
    /// expected to log and drop such notifications.
    #[must_use]
    pub fn from_notification(raw: RawNotification) -> Option<Self> {
        let operation = Operation::parse(&raw.operation)?;
        Some(Self {
            table: TableId::from(raw.table),
            operation,
            row: Arc::new(raw.record),
            old_row: raw.old_record.map(Arc::new),
            commit_timestamp: raw.commit_timestamp,
        })
    }

    /// Returns `true` if this is an insert event.
    #[must_use]
    pub fn is_insert(&self) -> bool {
        self.operation == Operation::Insert
    }

    /// Returns `true` if this is an update event.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.operation == Operation::Update
    }

    /// Returns `true` if this is a delete event.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // --- Operation tests ---

    #[test]
    fn operation_wire_names() {
        assert_eq!(Operation::Insert.as_str(), "INSERT");
        assert_eq!(Operation::Update.as_str(), "UPDATE");
        assert_eq!(Operation::Delete.as_str(), "DELETE");
    }

    #[test]
    fn operation_parse_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
    }

    #[test]
    fn operation_parse_unknown() {
        assert_eq!(Operation::parse("TRUNCATE"), None);
        assert_eq!(Operation::parse("insert"), None);
        assert_eq!(Operation::parse(""), None);
    }

    #[test]
    fn operation_repr_u8() {
        assert_eq!(Operation::Insert as u8, 0);
        assert_eq!(Operation::Update as u8, 1);
        assert_eq!(Operation::Delete as u8, 2);
    }

    // --- TableId tests ---

    #[test]
    fn table_id_display_and_eq() {
        let a = TableId::from("sales");
        let b = TableId::new("sales");
        assert_eq!(a, b);
        assert_eq!(format!("{a}"), "sales");
        assert_eq!(a.as_str(), "sales");
    }

    // --- RawNotification tests ---

    #[test]
    fn raw_notification_deserialize() {
        let raw: RawNotification = serde_json::from_value(json!({
            "schema": "public",
            "table": "expenses",
            "operation": "UPDATE",
            "commit_timestamp": 1_700_000_000_123_i64,
            "record": {"id": 7, "amount": 120.5},
            "old_record": {"id": 7, "amount": 99.0},
        }))
        .unwrap();

        assert_eq!(raw.schema, "public");
        assert_eq!(raw.table, "expenses");
        assert_eq!(raw.operation, "UPDATE");
        assert_eq!(raw.commit_timestamp, 1_700_000_000_123);
        assert_eq!(raw.record["amount"], json!(120.5));
        assert_eq!(raw.old_record.unwrap()["amount"], json!(99.0));
    }

    #[test]
    fn raw_notification_old_record_defaults_to_none() {
        let raw: RawNotification = serde_json::from_value(json!({
            "schema": "public",
            "table": "sales",
            "operation": "INSERT",
            "commit_timestamp": 1,
            "record": {"id": 1},
        }))
        .unwrap();

        assert!(raw.old_record.is_none());
    }

    // --- ChangeEvent tests ---

    #[test]
    fn change_event_from_notification() {
        let raw = RawNotification::new(
            "public",
            "customers",
            "INSERT",
            42,
            json!({"id": 3, "name": "Asha Traders"}),
        );
        let event = ChangeEvent::from_notification(raw).unwrap();

        assert_eq!(event.table, TableId::from("customers"));
        assert!(event.is_insert());
        assert_eq!(event.commit_timestamp, 42);
        assert_eq!(event.row["name"], json!("Asha Traders"));
        assert!(event.old_row.is_none());
    }

    #[test]
    fn change_event_from_notification_unknown_operation() {
        let raw = RawNotification::new("public", "sales", "TRUNCATE", 1, json!({}));
        assert!(ChangeEvent::from_notification(raw).is_none());
    }

    #[test]
    fn change_event_update_carries_old_row() {
        let raw = RawNotification::new(
            "public",
            "suppliers",
            "UPDATE",
            7,
            json!({"id": 1, "balance": 50}),
        )
        .with_old_record(json!({"id": 1, "balance": 80}));

        let event = ChangeEvent::from_notification(raw).unwrap();
        assert!(event.is_update());
        assert_eq!(event.old_row.unwrap()["balance"], json!(80));
    }

    #[test]
    fn change_event_clone_shares_row() {
        let event = ChangeEvent::insert(
            TableId::from("sales"),
            Arc::new(json!({"id": 9})),
            1000,
        );
        let cloned = event.clone();
        // Both point at the same row allocation.
        assert!(Arc::ptr_eq(&event.row, &cloned.row));
    }

    #[test]
    fn change_event_constructors() {
        let row = Arc::new(json!({"id": 1}));
        let old = Arc::new(json!({"id": 1, "paid": false}));

        let ins = ChangeEvent::insert(TableId::from("sales"), Arc::clone(&row), 1);
        assert!(ins.is_insert() && !ins.is_update() && !ins.is_delete());

        let upd = ChangeEvent::update(
            TableId::from("sales"),
            Arc::clone(&row),
            Some(old),
            2,
        );
        assert!(upd.is_update());
        assert!(upd.old_row.is_some());

        let del = ChangeEvent::delete(TableId::from("sales"), row, 3);
        assert!(del.is_delete());
    }
}
