//! Crawl profiler - hierarchical lifecycle event stream
//!
//! An optional observer channel: when enabled, the interpreter and the
//! authenticators emit one event per lifecycle point (step start/end, page,
//! URL composition, transform, merge, auth/login, stream emission, errors).
//! Events form a tree via `parent_id`; END events reuse their START event's
//! id and carry the measured duration.
//!
//! The channel is bounded and emission uses `try_send`: with no consumer or
//! a full buffer, events are dropped. The profiler never blocks the crawl.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default event buffer size
pub const PROFILER_BUFFER: usize = 1024;

/// Event kinds, hierarchical per step / page / auth flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileEventKind {
    RootStart,
    RootEnd,
    RequestStepStart,
    RequestStepEnd,
    RequestPageStart,
    RequestPageEnd,
    UrlComposition,
    RequestDetails,
    RequestResponse,
    ResponseTransform,
    ContextMerge,
    ForEachStepStart,
    ForEachStepEnd,
    ParallelismSetup,
    ItemSelection,
    ContextSelection,
    AuthStart,
    AuthCached,
    AuthLoginStart,
    AuthLoginEnd,
    AuthTokenExtract,
    AuthTokenInject,
    AuthEnd,
    StreamResult,
    Error,
}

/// A single profiler event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEvent {
    pub id: Uuid,
    /// Enclosing event (step for pages, page for auth, …)
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: ProfileEventKind,
    pub name: String,
    /// Milliseconds since crawl start
    pub timestamp_ms: u64,
    /// Set on END events
    pub duration_ms: Option<u64>,
    /// Iteration index for parallel forEach workers
    pub worker: Option<usize>,
    /// Free-form payload describing the event
    pub data: Value,
}

/// Cloneable emitter handle; disabled profilers are no-ops
#[derive(Debug, Clone)]
pub struct Profiler {
    tx: Option<mpsc::Sender<ProfileEvent>>,
    start: Arc<Instant>,
}

impl Profiler {
    /// A profiler that drops everything
    pub fn disabled() -> Self {
        Self {
            tx: None,
            start: Arc::new(Instant::now()),
        }
    }

    /// An enabled profiler plus the consumer side of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProfileEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx),
                start: Arc::new(Instant::now()),
            },
            rx,
        )
    }

    pub fn enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Emit a point or START event; returns its id for parenting / END reuse
    pub fn emit(
        &self,
        kind: ProfileEventKind,
        name: impl Into<String>,
        parent_id: Option<Uuid>,
        data: Value,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.send(ProfileEvent {
            id,
            parent_id,
            kind,
            name: name.into(),
            timestamp_ms: self.elapsed_ms(),
            duration_ms: None,
            worker: None,
            data,
        });
        id
    }

    /// Emit an event tagged with the iteration index of its worker
    pub fn emit_for_worker(
        &self,
        kind: ProfileEventKind,
        name: impl Into<String>,
        parent_id: Option<Uuid>,
        worker: usize,
        data: Value,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.send(ProfileEvent {
            id,
            parent_id,
            kind,
            name: name.into(),
            timestamp_ms: self.elapsed_ms(),
            duration_ms: None,
            worker: Some(worker),
            data,
        });
        id
    }

    /// Emit an END event reusing the START event's id
    pub fn emit_end(
        &self,
        kind: ProfileEventKind,
        name: impl Into<String>,
        start_id: Uuid,
        parent_id: Option<Uuid>,
        started: Instant,
        data: Value,
    ) {
        self.send(ProfileEvent {
            id: start_id,
            parent_id,
            kind,
            name: name.into(),
            timestamp_ms: self.elapsed_ms(),
            duration_ms: Some(started.elapsed().as_millis() as u64),
            worker: None,
            data,
        });
    }

    fn send(&self, event: ProfileEvent) {
        if let Some(tx) = &self.tx {
            // Dropped when the buffer is full or the consumer went away.
            let _ = tx.try_send(event);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
