//! Configuration for a [`SyncClient`](crate::SyncClient).

use ledgersync_core::RefetchPolicy;

/// Configuration for a sync client.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Schema channels subscribe in.
    pub schema: String,
    /// Launch policy for refetches.
    pub refetch_policy: RefetchPolicy,
    /// Buffer capacity for [`change_stream`](crate::SyncClient::change_stream)
    /// fan-out; slow stream consumers past this skip events (with a log)
    /// rather than applying backpressure to delivery.
    pub stream_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: "public".into(),
            refetch_policy: RefetchPolicy::default(),
            stream_buffer: 256,
        }
    }
}
