//! Error types for the LedgerSync client facade.

use ledgersync_core::ChannelError;

/// Errors from sync client operations.
///
/// Subscription failures against the backend are deliberately absent here:
/// a failed subscribe leaves the binding `Disconnected` and is logged, never
/// propagated (the consumer's own mount-time fetch is unaffected).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Channel lifecycle error (e.g. an empty table set).
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}
