//! # LedgerSync Core
//!
//! The realtime synchronization core for a bookkeeping application backed
//! by a hosted database with push-based change notifications. It keeps any
//! number of independent sessions, each holding its own copy of query
//! results, consistent with the shared backend as rows change, by managing
//! push-channel subscriptions, routing change events, and coordinating
//! refetches.
//!
//! ## Architecture
//!
//! Change propagation flows one direction; lifecycle control flows the
//! other:
//!
//! ```text
//! Change Event Source ──► Channel Manager ──► Event Router ──► Refetch
//!   (external push)         (lifecycle,         (normalize,     Orchestrator
//!                            gate, state)        tag, demux)    (guard, launch)
//!                                                                    │
//!                                                         consumer fetch fn
//! ```
//!
//! - [`source`] — the external push-notification contract
//!   ([`ChangeEventSource`](source::ChangeEventSource)); nothing in this
//!   crate implements the backend itself.
//! - [`channel`] — one logical channel per consumer: unique naming, one
//!   listener per `(table, operation)` pair, the close gate, connection
//!   state.
//! - [`router`] — raw payload normalization and single-handler demux.
//! - [`refetch`] — the first-event guard and refetch launch policies.
//! - [`connection`] — the observational `Live` / `Offline` flag.
//! - [`testing`] — an in-process source for tests and demos.
//!
//! This layer deliberately offers **no replay, no gap detection, and no
//! reconciliation on reconnect**: a refetch always asks the backend for
//! authoritative current state, which also makes duplicate delivery
//! harmless.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod connection;
pub mod event;
pub mod refetch;
pub mod router;
pub mod source;
pub mod testing;

pub use channel::{ChannelError, ChannelHandle, ChannelManager, ChannelMetrics, ChannelName};
pub use connection::{ConnectionState, ConnectionTracker};
pub use event::{ChangeEvent, Operation, RawNotification, TableId};
pub use refetch::{
    ErrorHook, FetchError, FetchFn, GuardState, RefetchMetrics, RefetchOrchestrator,
    RefetchPolicy,
};
pub use router::{EventHandler, EventRouter};
pub use source::{ChangeEventSource, ChannelStatus, EventFilter, EventSink, SourceError};
