//! In-process change event source for tests and demos.
//!
//! [`MockEventSource`] implements the [`ChangeEventSource`] contract
//! without any transport: registered channels live in a map, and
//! [`emit`](MockEventSource::emit) pushes a notification to every channel
//! whose filters match. Failure injection covers the two fault paths the
//! sync layer has to handle: subscribe failure at mount time and
//! mid-session disconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::event::{Operation, RawNotification, TableId};
use crate::source::{ChangeEventSource, ChannelStatus, EventFilter, EventSink, SourceError};

struct Registration {
    filters: Vec<EventFilter>,
    sink: Arc<dyn EventSink>,
}

/// An in-memory [`ChangeEventSource`].
///
/// Notifications are delivered synchronously on the emitting thread, which
/// keeps tests deterministic: when `emit` returns, every matching sink has
/// run.
#[derive(Default)]
pub struct MockEventSource {
    channels: RwLock<HashMap<String, Registration>>,
    fail_subscribes: AtomicBool,
    commit_clock: AtomicI64,
}

impl MockEventSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent subscribe fail with
    /// [`SourceError::Unreachable`] (simulated network failure at mount
    /// time).
    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    /// Emits a row change to every channel filtered onto
    /// `(table, operation)`. Returns the number of channels notified.
    ///
    /// Commit timestamps are assigned from an internal monotonic clock, so
    /// successive emits are ordered.
    pub fn emit(&self, table: &TableId, operation: Operation, record: Value) -> usize {
        let commit_timestamp = self.commit_clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_raw(RawNotification::new(
            "public",
            table.as_str(),
            operation.as_str(),
            commit_timestamp,
            record,
        ))
    }

    /// Emits an update carrying the previous row image.
    pub fn emit_update(&self, table: &TableId, record: Value, old_record: Value) -> usize {
        let commit_timestamp = self.commit_clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_raw(
            RawNotification::new(
                "public",
                table.as_str(),
                Operation::Update.as_str(),
                commit_timestamp,
                record,
            )
            .with_old_record(old_record),
        )
    }

    /// Delivers a raw notification as-is to every channel listening on its
    /// table (any operation). Unlike [`emit`](Self::emit), this does not
    /// require the operation name to be well-formed, so it can exercise
    /// the router's drop path. Returns the number of channels notified.
    pub fn emit_raw(&self, raw: RawNotification) -> usize {
        let table = TableId::from(raw.table.as_str());
        let operation = Operation::parse(&raw.operation);

        // Collect matching sinks under the read lock, deliver outside it.
        let sinks: Vec<Arc<dyn EventSink>> = {
            let channels = self.channels.read();
            channels
                .values()
                .filter(|reg| {
                    reg.filters.iter().any(|f| {
                        f.table == table
                            && operation.is_none_or(|op| f.operation == op)
                    })
                })
                .map(|reg| Arc::clone(&reg.sink))
                .collect()
        };

        for sink in &sinks {
            sink.on_notification(raw.clone());
        }
        sinks.len()
    }

    /// Faults every registered channel (simulated transport loss). Channels
    /// stay registered; whether anything ever flows again is up to the
    /// test.
    pub fn sever_all(&self) {
        let sinks: Vec<Arc<dyn EventSink>> = {
            let channels = self.channels.read();
            channels.values().map(|reg| Arc::clone(&reg.sink)).collect()
        };
        for sink in sinks {
            sink.on_status(ChannelStatus::Errored("connection lost".into()));
        }
    }

    /// Faults one channel. Returns `false` if it is not registered.
    pub fn sever(&self, channel: &str) -> bool {
        let sink = {
            let channels = self.channels.read();
            channels.get(channel).map(|reg| Arc::clone(&reg.sink))
        };
        match sink {
            Some(sink) => {
                sink.on_status(ChannelStatus::Errored("connection lost".into()));
                true
            }
            None => false,
        }
    }

    /// Returns the number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns the filters a channel registered with, if it exists.
    #[must_use]
    pub fn filters_for(&self, channel: &str) -> Option<Vec<EventFilter>> {
        self.channels
            .read()
            .get(channel)
            .map(|reg| reg.filters.clone())
    }
}

#[async_trait]
impl ChangeEventSource for MockEventSource {
    async fn subscribe(
        &self,
        channel: &str,
        filters: &[EventFilter],
        sink: Arc<dyn EventSink>,
    ) -> Result<(), SourceError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable(
                "simulated network failure".into(),
            ));
        }

        self.channels.write().insert(
            channel.to_string(),
            Registration {
                filters: filters.to_vec(),
                sink: Arc::clone(&sink),
            },
        );
        sink.on_status(ChannelStatus::Subscribed);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), SourceError> {
        match self.channels.write().remove(channel) {
            Some(reg) => {
                reg.sink.on_status(ChannelStatus::Closed);
                Ok(())
            }
            None => Err(SourceError::UnknownChannel(channel.to_string())),
        }
    }
}

impl std::fmt::Debug for MockEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEventSource")
            .field("channels", &self.channel_count())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
