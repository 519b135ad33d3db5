//! # LedgerSync
//!
//! Realtime synchronization and refetch coordination for bookkeeping
//! views. LedgerSync keeps any number of independent sessions consistent
//! with a shared backend as rows change: each view binding declares the
//! tables it cares about and supplies a refetch function; the sync layer
//! manages the push subscription, absorbs the one predictable redundant
//! refetch at mount time, and surfaces a `Live` / `Offline` indicator.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ledgersync::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SyncClient::new(source);
//!
//!     // Fetch once at mount, then on every later change to `sales`.
//!     let sales = client
//!         .synced_query("sales".into(), fetch_sales)
//!         .await?;
//!
//!     println!("{}", if sales.connected() { "Live" } else { "Offline" });
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export the client facade
pub use ledgersync_client::*;

// Re-export core building blocks for custom sources and lower-level use
pub use ledgersync_core::{
    ChannelManager, ChannelStatus, EventFilter, EventSink, RefetchOrchestrator, SourceError,
};

// Re-export the in-process source for tests and demos
pub use ledgersync_core::testing;

/// Commonly used types and traits.
///
/// ```rust,ignore
/// use ledgersync::prelude::*;
/// ```
pub mod prelude {
    // Client facade
    pub use ledgersync_client::{
        ChangeStream, ChangeSync, SyncClient, SyncConfig, SyncError, SyncedQuery,
    };

    // Events and bindings
    pub use ledgersync_core::{
        ChangeEvent, ChangeEventSource, ConnectionState, FetchFn, Operation, RefetchPolicy,
        TableId,
    };

    // Standard library re-exports for convenience
    pub use std::sync::Arc;
    pub use std::time::Duration;
}
