//! Subscription channel lifecycle management.
//!
//! A channel is one logical push subscription owned by one consumer: a
//! unique name, one listener per `(table, operation)` pair, one handler,
//! and one connection-state flag. The manager opens channels against the
//! [`ChangeEventSource`], tracks them in a registry, and tears them down.
//!
//! # Close semantics
//!
//! [`ChannelManager::close`] is synchronous with respect to delivery: once
//! it returns, no further handler invocation occurs on that channel, even
//! for notifications already in flight (they are dropped, not queued).
//! Delivery and close serialize on a per-channel gate mutex, so a close
//! racing an in-flight delivery waits for that delivery to finish. This is
//! what makes it safe to tear down a consumer's state immediately after
//! closing its channel.
//!
//! # Failure semantics
//!
//! A failed subscribe leaves the channel `Disconnected` and is logged, not
//! propagated: the consumer silently never receives live updates until it
//! opens a new channel. There is no automatic reconnect or backoff.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::connection::{ConnectionState, ConnectionTracker};
use crate::event::{Operation, RawNotification, TableId};
use crate::router::{EventHandler, EventRouter};
use crate::source::{ChangeEventSource, ChannelStatus, EventFilter, EventSink};

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

/// Errors from channel lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A channel must cover at least one table.
    #[error("channel requires at least one table")]
    NoTables,
}

// ---------------------------------------------------------------------------
// ChannelName
// ---------------------------------------------------------------------------

/// Unique channel identifier.
///
/// Assigned from a per-manager monotonic counter, so names never collide
/// under rapid concurrent opens (wall-clock naming would).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(Arc<str>);

impl ChannelName {
    fn new(id: u64) -> Self {
        Self(format!("sync-{id}").into())
    }

    /// Returns the channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// DeliveryGate
// ---------------------------------------------------------------------------

/// Per-channel gate serializing delivery against close.
///
/// Delivery holds the gate lock for the duration of the handler call;
/// `close` takes the same lock to flip the flag. After `close` returns,
/// no delivery can begin, and none is in progress.
struct DeliveryGate {
    closed: Mutex<bool>,
}

impl DeliveryGate {
    fn new() -> Self {
        Self {
            closed: Mutex::new(false),
        }
    }

    /// Runs `deliver` unless the gate is closed. Returns `false` if the
    /// notification was dropped.
    fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let closed = self.closed.lock();
        if *closed {
            return false;
        }
        deliver();
        true
    }

    /// Closes the gate. Returns `false` if it was already closed. Blocks
    /// until any in-flight delivery completes.
    fn close(&self) -> bool {
        let mut closed = self.closed.lock();
        if *closed {
            return false;
        }
        *closed = true;
        true
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

// ---------------------------------------------------------------------------
// ChannelHandle
// ---------------------------------------------------------------------------

/// Handle to an open channel, returned by [`ChannelManager::open`] and
/// required by [`ChannelManager::close`].
pub struct ChannelHandle {
    name: ChannelName,
    tables: Vec<TableId>,
    gate: Arc<DeliveryGate>,
    tracker: Arc<ConnectionTracker>,
}

impl ChannelHandle {
    /// Returns the unique channel name.
    #[must_use]
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Returns the tables this channel covers.
    #[must_use]
    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    /// Returns `true` if live updates are flowing on this channel.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.tracker.get().is_connected()
    }

    /// Returns a receiver observing this channel's connection state.
    #[must_use]
    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.tracker.watch()
    }

    /// Returns `true` if the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("tables", &self.tables)
            .field("connected", &self.connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChannelMetrics
// ---------------------------------------------------------------------------

/// Point-in-time metrics snapshot for an open channel.
#[derive(Debug, Clone)]
pub struct ChannelMetrics {
    /// Channel name.
    pub name: ChannelName,
    /// Tables the channel covers.
    pub tables: Vec<TableId>,
    /// Notifications delivered through the gate.
    pub delivered: u64,
    /// Time since the channel was opened.
    pub age: Duration,
}

// ---------------------------------------------------------------------------
// ManagedSink (internal)
// ---------------------------------------------------------------------------

/// The sink handed to the source for one channel: routes notifications
/// through the delivery gate and maps status callbacks onto connection
/// state.
struct ManagedSink {
    name: ChannelName,
    router: EventRouter,
    gate: Arc<DeliveryGate>,
    tracker: Arc<ConnectionTracker>,
    delivered: Arc<AtomicU64>,
}

impl EventSink for ManagedSink {
    fn on_notification(&self, raw: RawNotification) {
        let delivered = self.gate.deliver(|| self.router.route(raw));
        if delivered {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(channel = %self.name, "dropping in-flight notification after close");
        }
    }

    fn on_status(&self, status: ChannelStatus) {
        match status {
            ChannelStatus::Subscribed => {
                self.tracker.set(ConnectionState::Connected);
            }
            ChannelStatus::Closed => {
                self.tracker.set(ConnectionState::Disconnected);
            }
            ChannelStatus::Errored(msg) => {
                warn!(channel = %self.name, error = %msg, "channel faulted; events during the outage are lost");
                self.tracker.set(ConnectionState::Disconnected);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelManager
// ---------------------------------------------------------------------------

struct ChannelEntry {
    tables: Vec<TableId>,
    opened_at: Instant,
    delivered: Arc<AtomicU64>,
}

/// Owner of all open channels against one change event source.
///
/// Each consumer gets its own logically independent channel; the source
/// may multiplex them onto a shared transport. No consumer can read or
/// mutate another's state, and closing one channel never affects another.
pub struct ChannelManager {
    source: Arc<dyn ChangeEventSource>,
    schema: String,
    channels: RwLock<HashMap<ChannelName, ChannelEntry>>,
    next_id: AtomicU64,
}

impl ChannelManager {
    /// Creates a manager over the given source, subscribing in the
    /// `public` schema.
    #[must_use]
    pub fn new(source: Arc<dyn ChangeEventSource>) -> Self {
        Self::with_schema(source, "public")
    }

    /// Creates a manager subscribing in a specific schema.
    #[must_use]
    pub fn with_schema(source: Arc<dyn ChangeEventSource>, schema: impl Into<String>) -> Self {
        Self {
            source,
            schema: schema.into(),
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a channel covering `tables`, delivering every matching change
    /// to `handler` tagged with its originating table.
    ///
    /// Registers one listener per `(table, operation)` pair, then issues
    /// the subscribe. On acknowledgment the channel's connection state
    /// becomes `Connected`; on failure it stays `Disconnected` and the
    /// handle is still returned. The failure is logged, never propagated,
    /// and the consumer simply receives no live updates.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NoTables`] if `tables` is empty.
    pub async fn open(
        &self,
        tables: Vec<TableId>,
        handler: EventHandler,
    ) -> Result<ChannelHandle, ChannelError> {
        if tables.is_empty() {
            return Err(ChannelError::NoTables);
        }

        let name = ChannelName::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let gate = Arc::new(DeliveryGate::new());
        let tracker = Arc::new(ConnectionTracker::new());
        let delivered = Arc::new(AtomicU64::new(0));

        let filters: Vec<EventFilter> = tables
            .iter()
            .flat_map(|table| {
                Operation::ALL
                    .iter()
                    .map(|op| EventFilter::new(self.schema.clone(), table.clone(), *op))
            })
            .collect();

        let sink = Arc::new(ManagedSink {
            name: name.clone(),
            router: EventRouter::new(tables.iter().cloned(), handler),
            gate: Arc::clone(&gate),
            tracker: Arc::clone(&tracker),
            delivered: Arc::clone(&delivered),
        });

        self.channels.write().insert(
            name.clone(),
            ChannelEntry {
                tables: tables.clone(),
                opened_at: Instant::now(),
                delivered: Arc::clone(&delivered),
            },
        );

        match self
            .source
            .subscribe(name.as_str(), &filters, sink)
            .await
        {
            Ok(()) => {
                tracker.set(ConnectionState::Connected);
                debug!(channel = %name, tables = ?tables, "channel subscribed");
            }
            Err(err) => {
                warn!(channel = %name, error = %err, "subscribe failed; channel stays offline");
            }
        }

        Ok(ChannelHandle {
            name,
            tables,
            gate,
            tracker,
        })
    }

    /// Closes a channel.
    ///
    /// Synchronously closes the delivery gate, so that after this returns
    /// no further handler invocation occurs, even for notifications already
    /// in flight. Then detaches from the source in the background.
    /// Idempotent.
    pub fn close(&self, handle: &ChannelHandle) {
        if !handle.gate.close() {
            return;
        }

        handle.tracker.set(ConnectionState::Disconnected);
        self.channels.write().remove(&handle.name);
        debug!(channel = %handle.name, "channel closed");

        // Delivery is already gated off; the source-side teardown needs no
        // ordering guarantee and runs in the background. Outside a runtime
        // (unit tests dropping handles) the source keeps a dangling
        // registration that delivers into the closed gate, which is safe.
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let source = Arc::clone(&self.source);
            let name = handle.name.clone();
            rt.spawn(async move {
                if let Err(err) = source.unsubscribe(name.as_str()).await {
                    debug!(channel = %name, error = %err, "unsubscribe after close failed");
                }
            });
        }
    }

    /// Returns the number of open channels.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns `true` if the named channel is open.
    #[must_use]
    pub fn is_open(&self, name: &ChannelName) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Returns a metrics snapshot for an open channel.
    #[must_use]
    pub fn metrics(&self, name: &ChannelName) -> Option<ChannelMetrics> {
        let channels = self.channels.read();
        channels.get(name).map(|entry| ChannelMetrics {
            name: name.clone(),
            tables: entry.tables.clone(),
            delivered: entry.delivered.load(Ordering::Relaxed),
            age: entry.opened_at.elapsed(),
        })
    }

    /// Returns the schema channels subscribe in.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("schema", &self.schema)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
