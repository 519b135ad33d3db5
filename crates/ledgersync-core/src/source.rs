//! The change event source boundary.
//!
//! The hosted backend is an external collaborator: it provides CRUD over
//! request/response plus a push channel that emits one [`RawNotification`]
//! per row change matching a subscription filter. This module defines the
//! contract consumed by the channel manager; nothing here implements the
//! backend itself.
//!
//! Delivery semantics assumed from the source: at-least-once per subscribed
//! table (duplicates possible, not deduplicated by this layer), in-order
//! within one table, no ordering across tables.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::event::{Operation, RawNotification, TableId};

// ---------------------------------------------------------------------------
// EventFilter
// ---------------------------------------------------------------------------

/// A single push-channel listener registration.
///
/// A channel covering N tables registers `N × 3` filters, one per
/// `(table, operation)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFilter {
    /// Schema the table belongs to.
    pub schema: String,
    /// Table to listen on.
    pub table: TableId,
    /// Operation to listen for.
    pub operation: Operation,
}

impl EventFilter {
    /// Creates a filter for one `(table, operation)` pair.
    #[must_use]
    pub fn new(schema: impl Into<String>, table: TableId, operation: Operation) -> Self {
        Self {
            schema: schema.into(),
            table,
            operation,
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.schema, self.table, self.operation)
    }
}

// ---------------------------------------------------------------------------
// ChannelStatus
// ---------------------------------------------------------------------------

/// Lifecycle status reported by the source for a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The source acknowledged the subscription; events will now flow.
    Subscribed,
    /// The channel was closed (unsubscribe or orderly source shutdown).
    Closed,
    /// The channel faulted mid-session. Events during the outage are lost;
    /// there is no replay or gap detection.
    Errored(String),
}

impl ChannelStatus {
    /// Returns `true` if events are flowing on this channel.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribed => write!(f, "subscribed"),
            Self::Closed => write!(f, "closed"),
            Self::Errored(msg) => write!(f, "errored: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receiver side of a push channel.
///
/// The source invokes [`on_notification`](Self::on_notification) once per
/// row change matching any of the channel's filters, and
/// [`on_status`](Self::on_status) on lifecycle transitions.
pub trait EventSink: Send + Sync {
    /// Called for each matching row change.
    fn on_notification(&self, raw: RawNotification);

    /// Called on channel lifecycle transitions.
    ///
    /// Default implementation ignores the status.
    fn on_status(&self, status: ChannelStatus) {
        let _ = status;
    }
}

// ---------------------------------------------------------------------------
// SourceError
// ---------------------------------------------------------------------------

/// Errors from change event source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source could not be reached.
    #[error("source unreachable: {0}")]
    Unreachable(String),
    /// The source rejected the subscription (bad filter, authorization).
    #[error("subscription rejected: {0}")]
    Rejected(String),
    /// The named channel is not registered with the source.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

// ---------------------------------------------------------------------------
// ChangeEventSource
// ---------------------------------------------------------------------------

/// The push-notification service contract.
///
/// Implementations multiplex any number of named channels onto whatever
/// transport they own. Channels are logically independent: closing one must
/// not affect delivery on another.
#[async_trait]
pub trait ChangeEventSource: Send + Sync {
    /// Subscribes a named channel with the given filters.
    ///
    /// On success the sink starts receiving notifications for matching row
    /// changes; the `Ok` return is the subscription acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source is unreachable or rejects
    /// the subscription. No events are ever delivered for a failed
    /// subscribe.
    async fn subscribe(
        &self,
        channel: &str,
        filters: &[EventFilter],
        sink: Arc<dyn EventSink>,
    ) -> Result<(), SourceError>;

    /// Tears down a named channel. Further events for it are discarded at
    /// the source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnknownChannel`] if the channel is not
    /// registered.
    async fn unsubscribe(&self, channel: &str) -> Result<(), SourceError>;
}

// ===========================================================================
// Tests
// ===========================================================================
