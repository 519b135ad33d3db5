//! Refetch orchestration with the first-event guard.
//!
//! Each consumer owns one orchestrator. Its job is small but load-bearing:
//! decide, per routed change event, whether to re-run the consumer's fetch
//! function.
//!
//! # The first-event guard
//!
//! The consumer's initial data load already reflects the backend state as
//! of mount time, and the first notification delivered right after
//! subscription commonly reflects a write that happened concurrently with
//! that load. Refetching for it would be a duplicate call with no new
//! information, wasteful but not incorrect. The guard is a two-state
//! machine that absorbs exactly that one event:
//!
//! ```text
//! Priming --(first event, absorbed)--> Active --(every event)--> refetch
//! ```
//!
//! The state is owned per orchestrator instance, never shared across
//! consumers.
//!
//! # Launch semantics
//!
//! Refetches are fire-and-forget tasks; the orchestrator does not await
//! them, so refetches from rapid successive events may overlap. Under the
//! default [`RefetchPolicy::EveryEvent`], a burst of N events launches N
//! refetches. [`RefetchPolicy::CoalesceInFlight`] instead keeps a
//! single-slot pending flag while a refetch is in flight, re-running once
//! on completion. Fetch errors go to the error hook and are never retried
//! here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::event::{ChangeEvent, TableId};
use crate::router::EventHandler;

/// Boxed error returned by a consumer's fetch function.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer-supplied fetch function: re-queries the consumer's working set
/// from the authoritative backend (never applies event payloads directly,
/// which is what makes duplicate delivery harmless).
pub type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;

/// Hook invoked when a fetch attempt fails.
pub type ErrorHook = Arc<dyn Fn(FetchError) + Send + Sync>;

// ---------------------------------------------------------------------------
// GuardState
// ---------------------------------------------------------------------------

/// First-event guard state, owned per consumer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// No event routed yet: the next event is absorbed without a refetch.
    Priming,
    /// Every routed event triggers a refetch. Terminal for the consumer's
    /// lifetime.
    Active,
}

// ---------------------------------------------------------------------------
// RefetchPolicy
// ---------------------------------------------------------------------------

/// Launch policy for refetches triggered in the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchPolicy {
    /// One refetch per routed event; bursts launch overlapping refetches.
    #[default]
    EveryEvent,
    /// Single-slot coalescing: an event arriving while a refetch is in
    /// flight marks it pending instead of launching another; the in-flight
    /// task re-runs once on completion. Opting in trades per-event fetches
    /// for bounded concurrency.
    CoalesceInFlight,
}

// ---------------------------------------------------------------------------
// RefetchMetrics
// ---------------------------------------------------------------------------

/// Point-in-time counters for one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchMetrics {
    /// Events absorbed by the guard (0 or 1).
    pub absorbed: u64,
    /// Fetch executions launched.
    pub launched: u64,
    /// Events folded into an in-flight fetch (coalescing policy only).
    pub coalesced: u64,
    /// Fetch executions that returned an error.
    pub failed: u64,
}

// ---------------------------------------------------------------------------
// RefetchOrchestrator
// ---------------------------------------------------------------------------

struct Inner {
    fetch: FetchFn,
    on_error: ErrorHook,
    policy: RefetchPolicy,
    guard: Mutex<GuardState>,
    in_flight: AtomicBool,
    pending: AtomicBool,
    absorbed: AtomicU64,
    launched: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

/// Per-consumer refetch coordinator.
///
/// Cheap to clone; clones share the same guard state and counters.
#[derive(Clone)]
pub struct RefetchOrchestrator {
    inner: Arc<Inner>,
}

impl RefetchOrchestrator {
    /// Creates an orchestrator with the default policy and error hook
    /// (failures are logged with `warn!`).
    #[must_use]
    pub fn new(fetch: FetchFn) -> Self {
        Self::with_policy(fetch, RefetchPolicy::default())
    }

    /// Creates an orchestrator with an explicit launch policy.
    #[must_use]
    pub fn with_policy(fetch: FetchFn, policy: RefetchPolicy) -> Self {
        Self::with_hooks(
            fetch,
            policy,
            Arc::new(|err| warn!(error = %err, "refetch failed")),
        )
    }

    /// Creates an orchestrator with an explicit policy and error hook.
    /// Fetch errors are forwarded to the hook unchanged; the orchestrator
    /// never retries or suppresses them.
    #[must_use]
    pub fn with_hooks(fetch: FetchFn, policy: RefetchPolicy, on_error: ErrorHook) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetch,
                on_error,
                policy,
                guard: Mutex::new(GuardState::Priming),
                in_flight: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                absorbed: AtomicU64::new(0),
                launched: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Handles one routed change event.
    ///
    /// The very first event transitions the guard `Priming → Active` and is
    /// absorbed; every later event requests a refetch per the policy.
    pub fn on_event(&self, table: &TableId, event: &ChangeEvent) {
        {
            let mut guard = self.inner.guard.lock();
            if *guard == GuardState::Priming {
                *guard = GuardState::Active;
                self.inner.absorbed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    %table,
                    operation = %event.operation,
                    "absorbing first event after subscribe"
                );
                return;
            }
        }

        self.request_refetch();
    }

    /// Returns an event handler feeding this orchestrator, for
    /// [`ChannelManager::open`](crate::channel::ChannelManager::open).
    #[must_use]
    pub fn as_handler(&self) -> EventHandler {
        let orchestrator = self.clone();
        Arc::new(move |table, event| orchestrator.on_event(table, &event))
    }

    /// Returns the current guard state.
    #[must_use]
    pub fn guard_state(&self) -> GuardState {
        *self.inner.guard.lock()
    }

    /// Returns a counters snapshot.
    #[must_use]
    pub fn metrics(&self) -> RefetchMetrics {
        RefetchMetrics {
            absorbed: self.inner.absorbed.load(Ordering::Relaxed),
            launched: self.inner.launched.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    fn request_refetch(&self) {
        match self.inner.policy {
            RefetchPolicy::EveryEvent => {
                let inner = Arc::clone(&self.inner);
                inner.launched.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    Inner::run_once(&inner).await;
                });
            }
            RefetchPolicy::CoalesceInFlight => {
                if self.inner.in_flight.swap(true, Ordering::AcqRel) {
                    // A fetch is running; fold this request into it.
                    self.inner.pending.store(true, Ordering::Release);
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    loop {
                        inner.launched.fetch_add(1, Ordering::Relaxed);
                        Inner::run_once(&inner).await;

                        if inner.pending.swap(false, Ordering::AcqRel) {
                            continue;
                        }
                        inner.in_flight.store(false, Ordering::Release);

                        // A request may have landed between the pending check
                        // and clearing in_flight; claim it or hand off.
                        if inner.pending.swap(false, Ordering::AcqRel) {
                            if inner.in_flight.swap(true, Ordering::AcqRel) {
                                break;
                            }
                            continue;
                        }
                        break;
                    }
                });
            }
        }
    }
}

impl Inner {
    async fn run_once(inner: &Arc<Inner>) {
        if let Err(err) = (inner.fetch)().await {
            inner.failed.fetch_add(1, Ordering::Relaxed);
            (inner.on_error)(err);
        }
    }
}

impl std::fmt::Debug for RefetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefetchOrchestrator")
            .field("policy", &self.inner.policy)
            .field("guard", &self.guard_state())
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
