//! # LedgerSync Client
//!
//! Consumer-facing facade for the LedgerSync realtime sync layer. A view
//! binding (a page or feature owning query results) declares the tables it
//! cares about and supplies a refetch function; the client keeps it
//! consistent with the shared backend as rows change, and exposes a
//! `Live` / `Offline` connection indicator.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgersync_client::SyncClient;
//!
//! let client = SyncClient::new(source);
//!
//! // Fetches once at mount, then on every later change to `sales`.
//! let sales = client
//!     .synced_query("sales".into(), fetch_sales)
//!     .await?;
//!
//! assert!(sales.connected());
//! // Dropping `sales` closes the channel: unmount semantics.
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod config;
mod error;
mod handle;
mod stream;

pub use client::SyncClient;
pub use config::SyncConfig;
pub use error::SyncError;
pub use handle::{ChangeSync, SyncedQuery};
pub use stream::ChangeStream;

// Core types consumers interact with directly.
pub use ledgersync_core::{
    ChangeEvent, ChangeEventSource, ConnectionState, FetchError, FetchFn, GuardState, Operation,
    RawNotification, RefetchMetrics, RefetchPolicy, TableId,
};
