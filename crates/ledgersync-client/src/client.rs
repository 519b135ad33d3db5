//! The sync client facade.
//!
//! [`SyncClient`] is the single entry point for view bindings. Each binding
//! method opens one logically independent channel against the change event
//! source:
//!
//! - [`change_sync`](SyncClient::change_sync) — raw per-event callback.
//! - [`synced_query`](SyncClient::synced_query) /
//!   [`synced_query_multi`](SyncClient::synced_query_multi) — mount-time
//!   fetch plus guard-filtered refetch on every subsequent change.
//! - [`change_stream`](SyncClient::change_stream) — async `Stream` of
//!   `(table, event)` pairs.

use std::sync::Arc;

use ledgersync_core::{
    ChangeEvent, ChangeEventSource, ChannelManager, ErrorHook, FetchFn, RefetchOrchestrator,
    TableId,
};
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::handle::{ChangeSync, SyncedQuery};
use crate::stream::ChangeStream;

// ---------------------------------------------------------------------------
// SyncClient
// ---------------------------------------------------------------------------

/// Entry point for realtime view bindings against one change event source.
///
/// Cloning is cheap; clones share the channel manager.
#[derive(Clone, Debug)]
pub struct SyncClient {
    manager: Arc<ChannelManager>,
    config: SyncConfig,
}

impl SyncClient {
    /// Creates a client with the default configuration.
    #[must_use]
    pub fn new(source: Arc<dyn ChangeEventSource>) -> Self {
        Self::with_config(source, SyncConfig::default())
    }

    /// Creates a client with an explicit configuration.
    #[must_use]
    pub fn with_config(source: Arc<dyn ChangeEventSource>, config: SyncConfig) -> Self {
        let manager = Arc::new(ChannelManager::with_schema(source, config.schema.clone()));
        Self { manager, config }
    }

    /// Opens a raw change subscription over `tables`.
    ///
    /// `on_change` is invoked once per routed event, tagged with the
    /// originating table; a binding covering several tables still has
    /// exactly this one callback. No guard applies: every event is
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] if `tables` is empty. A subscribe
    /// failure against the source is *not* an error: the binding is
    /// returned `Disconnected` and simply receives no live updates.
    pub async fn change_sync<F>(
        &self,
        tables: Vec<TableId>,
        on_change: F,
    ) -> Result<ChangeSync, SyncError>
    where
        F: Fn(&TableId, ChangeEvent) + Send + Sync + 'static,
    {
        let handle = self.manager.open(tables, Arc::new(on_change)).await?;
        Ok(ChangeSync::new(handle, Arc::clone(&self.manager)))
    }

    /// Opens a synced query over one table.
    ///
    /// Runs `fetch` once immediately (the mount-time load), then again for
    /// every qualifying change event after the first. The initial load
    /// already reflects backend state as of mount, so the first
    /// notification is absorbed by the guard.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] on channel lifecycle errors.
    pub async fn synced_query(
        &self,
        table: TableId,
        fetch: FetchFn,
    ) -> Result<SyncedQuery, SyncError> {
        self.synced_query_multi(vec![table], fetch).await
    }

    /// Opens a synced query over several tables sharing one fetch
    /// function. A change on any covered table triggers the same refetch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] if `tables` is empty.
    pub async fn synced_query_multi(
        &self,
        tables: Vec<TableId>,
        fetch: FetchFn,
    ) -> Result<SyncedQuery, SyncError> {
        let on_error: ErrorHook = Arc::new(|err| warn!(error = %err, "refetch failed"));
        self.synced_query_inner(tables, fetch, on_error).await
    }

    /// Like [`synced_query_multi`](Self::synced_query_multi), with an
    /// explicit error hook. Fetch failures, including the mount-time
    /// load's, are forwarded to `on_error` unchanged; the sync layer never
    /// retries them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] if `tables` is empty.
    pub async fn synced_query_with_hooks(
        &self,
        tables: Vec<TableId>,
        fetch: FetchFn,
        on_error: ErrorHook,
    ) -> Result<SyncedQuery, SyncError> {
        self.synced_query_inner(tables, fetch, on_error).await
    }

    async fn synced_query_inner(
        &self,
        tables: Vec<TableId>,
        fetch: FetchFn,
        on_error: ErrorHook,
    ) -> Result<SyncedQuery, SyncError> {
        // Mount-time load: independent of the subscription, so it runs (and
        // its failure is reported) even when the subscribe fails.
        let initial = Arc::clone(&fetch);
        let initial_on_error = Arc::clone(&on_error);
        tokio::spawn(async move {
            if let Err(err) = initial().await {
                initial_on_error(err);
            }
        });

        let orchestrator =
            RefetchOrchestrator::with_hooks(fetch, self.config.refetch_policy, on_error);
        let handle = self
            .manager
            .open(tables, orchestrator.as_handler())
            .await?;

        Ok(SyncedQuery::new(
            ChangeSync::new(handle, Arc::clone(&self.manager)),
            orchestrator,
        ))
    }

    /// Opens an async stream of `(table, event)` pairs over `tables`.
    /// Dropping the stream closes the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] if `tables` is empty.
    pub async fn change_stream(&self, tables: Vec<TableId>) -> Result<ChangeStream, SyncError> {
        let (tx, rx) = broadcast::channel(self.config.stream_buffer);
        let sync = self
            .change_sync(tables, move |table, event| {
                // A send error just means no receiver is currently polling.
                let _ = tx.send((table.clone(), event));
            })
            .await?;
        Ok(ChangeStream::new(sync, rx))
    }

    /// Returns the number of currently open channels.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.manager.active_count()
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
