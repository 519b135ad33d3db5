//! View-binding handles.
//!
//! A handle ties one data-owning view (a page or feature) to one push
//! channel. Dropping a handle closes its channel, which is the unmount
//! semantics: after the drop (or an explicit
//! [`close`](ChangeSync::close)), no further change callback or refetch
//! can occur for that binding, even for events already in flight.

use std::fmt;
use std::sync::Arc;

use ledgersync_core::{
    ChannelHandle, ChannelManager, ChannelName, ConnectionState, GuardState, RefetchMetrics,
    RefetchOrchestrator, TableId,
};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// ChangeSync
// ---------------------------------------------------------------------------

/// A raw change subscription: the consumer's callback is invoked once per
/// routed event, tagged with the originating table.
///
/// Created by [`SyncClient::change_sync`](crate::SyncClient::change_sync).
pub struct ChangeSync {
    handle: ChannelHandle,
    manager: Arc<ChannelManager>,
}

impl ChangeSync {
    pub(crate) fn new(handle: ChannelHandle, manager: Arc<ChannelManager>) -> Self {
        Self { handle, manager }
    }

    /// Returns the unique channel name backing this binding.
    #[must_use]
    pub fn channel_name(&self) -> &ChannelName {
        self.handle.name()
    }

    /// Returns the tables this binding covers.
    #[must_use]
    pub fn tables(&self) -> &[TableId] {
        self.handle.tables()
    }

    /// Returns `true` if live updates are flowing ("Live" indicator).
    ///
    /// Observational only: a `false` here means changes may be being
    /// missed, not that delivered data is wrong.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.handle.connected()
    }

    /// Returns a receiver observing connection state transitions.
    #[must_use]
    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.handle.connection_changes()
    }

    /// Closes the binding's channel. After this returns, the callback is
    /// never invoked again. Idempotent; also runs on drop.
    pub fn close(&self) {
        self.manager.close(&self.handle);
    }
}

impl Drop for ChangeSync {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChangeSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSync")
            .field("channel", self.channel_name())
            .field("tables", &self.tables())
            .field("connected", &self.connected())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SyncedQuery
// ---------------------------------------------------------------------------

/// A query kept in sync with the backend: the fetch function runs once at
/// creation (the mount-time load) and again for every qualifying change
/// event after the first (which the guard absorbs).
///
/// Created by [`SyncClient::synced_query`](crate::SyncClient::synced_query)
/// and [`synced_query_multi`](crate::SyncClient::synced_query_multi).
pub struct SyncedQuery {
    sync: ChangeSync,
    orchestrator: RefetchOrchestrator,
}

impl SyncedQuery {
    pub(crate) fn new(sync: ChangeSync, orchestrator: RefetchOrchestrator) -> Self {
        Self { sync, orchestrator }
    }

    /// Returns the unique channel name backing this binding.
    #[must_use]
    pub fn channel_name(&self) -> &ChannelName {
        self.sync.channel_name()
    }

    /// Returns the tables this binding covers.
    #[must_use]
    pub fn tables(&self) -> &[TableId] {
        self.sync.tables()
    }

    /// Returns `true` if live updates are flowing ("Live" indicator).
    #[must_use]
    pub fn connected(&self) -> bool {
        self.sync.connected()
    }

    /// Returns a receiver observing connection state transitions.
    #[must_use]
    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.sync.connection_changes()
    }

    /// Returns the first-event guard state.
    #[must_use]
    pub fn guard_state(&self) -> GuardState {
        self.orchestrator.guard_state()
    }

    /// Returns refetch counters for this binding.
    #[must_use]
    pub fn refetch_metrics(&self) -> RefetchMetrics {
        self.orchestrator.metrics()
    }

    /// Closes the binding's channel. After this returns, no further refetch
    /// is triggered by the sync layer. Idempotent; also runs on drop.
    pub fn close(&self) {
        self.sync.close();
    }
}

impl fmt::Debug for SyncedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedQuery")
            .field("channel", self.channel_name())
            .field("tables", &self.tables())
            .field("connected", &self.connected())
            .field("guard", &self.guard_state())
            .finish()
    }
}
