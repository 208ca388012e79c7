//! Debounced, cancel-and-relaunch scheduling of processing passes.
//!
//! Snapshot notifications carry only a timestamp. Notifications closer together
//! than the debounce interval are dropped. An accepted notification cancels the
//! pass in flight and installs a new one in a single task slot. The new task
//! waits for its predecessor to wind down before reading the clock and the
//! snapshot, so at most one pass touches the pipeline at a time.

use crate::extractor::AccessibleNode;
use crate::pipeline::{OverlayPipeline, PassOutcome};
use crate::render::{FrameOutput, Theme};
use crate::types::{NodeError, PipelineError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag shared between a pass and its scheduler
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState::default()),
        }
    }

    /// Request cancellation; never blocks
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token has been cancelled
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Millisecond time source for passes
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock driven by hand, for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Minimum-interval gate on notifications
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval_ms: u64,
    last_processed_ms: Option<u64>,
}

impl Debouncer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_processed_ms: None,
        }
    }

    /// Accept or drop a notification at `timestamp_ms`. Accepting it makes it
    /// the new reference point.
    pub fn should_process(&mut self, timestamp_ms: u64) -> bool {
        if let Some(last) = self.last_processed_ms {
            if timestamp_ms.saturating_sub(last) < self.interval_ms {
                return false;
            }
        }
        self.last_processed_ms = Some(timestamp_ms);
        true
    }

    pub fn last_processed_ms(&self) -> Option<u64> {
        self.last_processed_ms
    }
}

/// Pull access to the current UI tree
pub trait SnapshotSource: Send + Sync + 'static {
    type Node: AccessibleNode + Send + Sync + 'static;

    fn current_root(&self) -> Result<Self::Node, NodeError>;
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    notifications: AtomicU64,
    debounced: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub notifications: u64,
    pub debounced: u64,
    pub passes_started: u64,
    pub passes_completed: u64,
    /// Passes superseded before or during their run
    pub passes_cancelled: u64,
    pub passes_failed: u64,
}

struct PassContext<S> {
    pipeline: Arc<OverlayPipeline>,
    source: Arc<S>,
    clock: Arc<dyn Clock>,
    theme: watch::Receiver<Theme>,
    frames: mpsc::Sender<FrameOutput>,
    counters: Arc<SchedulerCounters>,
}

impl<S> Clone for PassContext<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            source: self.source.clone(),
            clock: self.clock.clone(),
            theme: self.theme.clone(),
            frames: self.frames.clone(),
            counters: self.counters.clone(),
        }
    }
}

struct ActivePass {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Single-slot pass scheduler. Must be driven from within a tokio runtime.
pub struct PassScheduler<S: SnapshotSource> {
    context: PassContext<S>,
    debouncer: Debouncer,
    active: Option<ActivePass>,
}

impl<S: SnapshotSource> PassScheduler<S> {
    pub fn new(
        pipeline: Arc<OverlayPipeline>,
        source: Arc<S>,
        clock: Arc<dyn Clock>,
        theme: watch::Receiver<Theme>,
        frames: mpsc::Sender<FrameOutput>,
        debounce_interval_ms: u64,
    ) -> Self {
        Self {
            context: PassContext {
                pipeline,
                source,
                clock,
                theme,
                frames,
                counters: Arc::new(SchedulerCounters::default()),
            },
            debouncer: Debouncer::new(debounce_interval_ms),
            active: None,
        }
    }

    /// Handle a "snapshot available" notification.
    ///
    /// Returns whether a pass was launched.
    pub fn notify(&mut self, timestamp_ms: u64) -> bool {
        let counters = &self.context.counters;
        counters.notifications.fetch_add(1, Ordering::Relaxed);

        if !self.debouncer.should_process(timestamp_ms) {
            counters.debounced.fetch_add(1, Ordering::Relaxed);
            trace!("Debounced notification at {}ms", timestamp_ms);
            return false;
        }

        let previous = self.active.take().map(|active| {
            active.token.cancel();
            active.handle
        });

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_pass(self.context.clone(), token.clone(), previous));
        self.active = Some(ActivePass { token, handle });
        true
    }

    /// Whether a launched pass has not finished yet
    pub fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the pass in flight (if any) to finish
    pub async fn drain(&mut self) {
        if let Some(active) = self.active.take() {
            await_pass(active.handle).await;
        }
    }

    /// Cancel the pass in flight and wait for it to stop
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            await_pass(active.handle).await;
        }
        debug!("Scheduler stopped");
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.context.counters;
        SchedulerStats {
            notifications: c.notifications.load(Ordering::Relaxed),
            debounced: c.debounced.load(Ordering::Relaxed),
            passes_started: c.started.load(Ordering::Relaxed),
            passes_completed: c.completed.load(Ordering::Relaxed),
            passes_cancelled: c.cancelled.load(Ordering::Relaxed),
            passes_failed: c.failed.load(Ordering::Relaxed),
        }
    }

    pub fn pipeline(&self) -> &Arc<OverlayPipeline> {
        &self.context.pipeline
    }
}

async fn await_pass(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!("Pass task did not finish cleanly: {}", e);
    }
}

async fn run_pass<S: SnapshotSource>(
    context: PassContext<S>,
    token: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        await_pass(previous).await;
    }

    let counters = context.counters.clone();
    if token.is_cancelled() {
        counters.cancelled.fetch_add(1, Ordering::Relaxed);
        trace!("Pass superseded before start");
        return;
    }
    counters.started.fetch_add(1, Ordering::Relaxed);

    // The pass body runs in its own task so a panic is contained and logged here
    let frames = context.frames.clone();
    let body = tokio::spawn(pass_body(context, token.clone()));
    let result = match body.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Internal(e.to_string())),
    };

    match result {
        Ok(PassOutcome::Completed(frame)) => {
            // A slow renderer must not let a superseded frame through
            let delivered = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                sent = frames.send(frame) => {
                    if sent.is_err() {
                        debug!("Frame receiver closed, dropping frame");
                    }
                    true
                }
            };
            if delivered {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!("Pass superseded before its frame was handed off");
            }
        }
        Ok(PassOutcome::Cancelled) => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("Pass cancelled");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!("Processing pass failed: {}", e);
        }
    }
}

async fn pass_body<S: SnapshotSource>(
    context: PassContext<S>,
    token: CancellationToken,
) -> Result<PassOutcome, PipelineError> {
    let now_ms = context.clock.now_ms();
    let theme = *context.theme.borrow();
    let root = context.source.current_root()?;
    context
        .pipeline
        .run_pass(&root, now_ms, &theme, &token)
        .await
}
