//! Async `Stream` adapter over a change subscription.
//!
//! Wraps a [`ChangeSync`] in a `tokio_stream`-compatible `Stream`, enabling
//! idiomatic consumption with combinators (`.filter()`, `.map()`,
//! `.take()`). Slow consumers that fall behind the stream buffer skip the
//! lagged events with a `debug!`; the authoritative state is always one
//! refetch away, so a skipped event is never a correctness problem.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_stream::StreamExt;
//!
//! let mut stream = client.change_stream(vec!["sales".into()]).await?;
//! while let Some((table, event)) = stream.next().await {
//!     println!("{table}: {}", event.operation);
//! }
//! ```
//!
//! Uses [`BroadcastStream`] internally for correct async wakeup semantics;
//! dropping the stream closes the underlying channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use ledgersync_core::{ChangeEvent, ChannelName, TableId};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

use crate::handle::ChangeSync;

// ---------------------------------------------------------------------------
// ChangeStream
// ---------------------------------------------------------------------------

/// A stream of `(table, event)` pairs from one change subscription.
///
/// Created by [`SyncClient::change_stream`](crate::SyncClient::change_stream).
/// All fields are `Unpin`, so the stream works directly with
/// `tokio::select!` without explicit pinning.
pub struct ChangeStream {
    /// Keeps the channel open for the stream's lifetime; dropping the
    /// stream drops this and closes the channel.
    sync: ChangeSync,
    inner: BroadcastStream<(TableId, ChangeEvent)>,
}

impl ChangeStream {
    pub(crate) fn new(
        sync: ChangeSync,
        receiver: broadcast::Receiver<(TableId, ChangeEvent)>,
    ) -> Self {
        Self {
            sync,
            inner: BroadcastStream::new(receiver),
        }
    }

    /// Returns the unique channel name backing this stream.
    #[must_use]
    pub fn channel_name(&self) -> &ChannelName {
        self.sync.channel_name()
    }

    /// Returns `true` if live updates are flowing.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.sync.connected()
    }
}

impl Stream for ChangeStream {
    type Item = (TableId, ChangeEvent);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(item))) => return Poll::Ready(Some(item)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(
                        channel = %self.sync.channel_name(),
                        skipped,
                        "change stream lagged; skipping"
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("channel", self.channel_name())
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}
