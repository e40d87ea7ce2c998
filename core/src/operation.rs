//! The single-request execution unit.
//!
//! # Design
//! A `RequestOperation` owns one [`ResultPayload`], drives one transport
//! task, and hands the payload to its callback exactly once. Where the task
//! comes from is fixed at construction by [`TransportSource`]:
//!
//! - `Private`: the operation builds its own transport handle from a
//!   config, uses the bulk-completion form, and tears the handle down at
//!   finish.
//! - `Supplied`: the operation borrows an existing handle, uses the
//!   incremental event form, and leaves the handle alone at finish.
//!
//! Bulk completion, the incremental error/completion events, and
//! `cancel()` all end in the same `finish` entry point, gated by a one-shot
//! flag. The gate and the cancel flag are only changed under the state lock,
//! so the stored error is `Cancelled` exactly when `is_cancelled()` is true.
//! Task callbacks hold only a `Weak` reference to the operation;
//! events arriving after it has been dropped are discarded.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::error::{OperationError, TransportError};
use crate::http::{HttpRequest, ResponseHead};
use crate::payload::ResultPayload;
use crate::transport::{Connector, TaskEvents, TaskOutcome, Transport, TransportTask};
use crate::ureq_transport::UreqConnector;

/// Terminal consumer of a payload.
pub type Callback = Box<dyn FnOnce(ResultPayload) + Send>;

/// Identifies one operation in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Idle,
    Running,
    Finished,
}

impl OperationStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            STATUS_IDLE => OperationStatus::Idle,
            STATUS_RUNNING => OperationStatus::Running,
            STATUS_FINISHED => OperationStatus::Finished,
            other => unreachable!("invalid operation status {other}"),
        }
    }
}

/// Where the operation's transport handle comes from.
pub enum TransportSource {
    /// Build and own a handle from `config`.
    Private {
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    },
    /// Use a handle the caller already owns.
    Supplied(Arc<dyn Transport>),
}

impl TransportSource {
    /// A private handle built by the default ureq connector.
    pub fn private(config: TransportConfig) -> Self {
        TransportSource::Private {
            config,
            connector: Arc::new(UreqConnector),
        }
    }

    pub fn private_with(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        TransportSource::Private { config, connector }
    }

    pub fn supplied(transport: Arc<dyn Transport>) -> Self {
        TransportSource::Supplied(transport)
    }
}

impl fmt::Debug for TransportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSource::Private { config, .. } => {
                f.debug_struct("Private").field("config", config).finish_non_exhaustive()
            }
            TransportSource::Supplied(_) => f.write_str("Supplied"),
        }
    }
}

/// Construction-time settings for a [`RequestOperation`].
///
/// The empty-body policy can only be overridden here, before the operation
/// exists, so it can never change once execution begins.
#[derive(Debug)]
pub struct OperationBuilder {
    request: HttpRequest,
    allow_empty_body: bool,
}

impl OperationBuilder {
    pub fn new(request: HttpRequest) -> Self {
        let allow_empty_body = request.method.allows_empty_response();
        Self {
            request,
            allow_empty_body,
        }
    }

    /// Override the method-derived empty-body policy.
    pub fn allow_empty_body(mut self, allow: bool) -> Self {
        self.allow_empty_body = allow;
        self
    }

    pub fn build(
        self,
        source: TransportSource,
        callback: impl FnOnce(ResultPayload) + Send + 'static,
    ) -> RequestOperation {
        let id = OperationId::new();
        let (finished_tx, _) = watch::channel(false);
        debug!(
            operation_id = %id,
            method = %self.request.method,
            url = %self.request.url,
            allow_empty_body = self.allow_empty_body,
            "operation created"
        );
        RequestOperation {
            inner: Arc::new(Inner {
                id,
                allow_empty_body: self.allow_empty_body,
                status: AtomicU8::new(STATUS_IDLE),
                cancelled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                finished_tx,
                state: Mutex::new(State {
                    payload: Some(ResultPayload::new(self.request)),
                    callback: Some(Box::new(callback)),
                    source: Some(source),
                    transport: None,
                    owns_transport: false,
                    task: None,
                    incoming: Vec::new(),
                }),
            }),
        }
    }
}

const STATUS_IDLE: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_FINISHED: u8 = 2;

/// One HTTP request executed off the caller's thread with a single
/// terminal callback.
///
/// The scheduler calls [`start`](Self::start) once, may call
/// [`cancel`](Self::cancel) at any time, and observes
/// [`is_finished`](Self::is_finished) or [`wait_finished`](Self::wait_finished)
/// to know when to release the operation.
pub struct RequestOperation {
    inner: Arc<Inner>,
}

struct Inner {
    id: OperationId,
    allow_empty_body: bool,
    status: AtomicU8,
    cancelled: AtomicBool,
    /// One-shot gate for `finish`.
    finished: AtomicBool,
    finished_tx: watch::Sender<bool>,
    state: Mutex<State>,
}

struct State {
    payload: Option<ResultPayload>,
    callback: Option<Callback>,
    /// Consumed by `start`.
    source: Option<TransportSource>,
    transport: Option<Arc<dyn Transport>>,
    owns_transport: bool,
    task: Option<Arc<dyn TransportTask>>,
    /// Body chunks from the incremental path, moved into the payload at completion.
    incoming: Vec<u8>,
}

impl RequestOperation {
    /// Build with the method-derived empty-body policy.
    pub fn new(
        request: HttpRequest,
        source: TransportSource,
        callback: impl FnOnce(ResultPayload) + Send + 'static,
    ) -> Self {
        OperationBuilder::new(request).build(source, callback)
    }

    pub fn builder(request: HttpRequest) -> OperationBuilder {
        OperationBuilder::new(request)
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn allows_empty_body(&self) -> bool {
        self.inner.allow_empty_body
    }

    pub fn status(&self) -> OperationStatus {
        OperationStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub fn is_executing(&self) -> bool {
        self.status() == OperationStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status() == OperationStatus::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A receiver that reads `true` once the callback has been invoked.
    pub fn wait_finished(&self) -> watch::Receiver<bool> {
        self.inner.finished_tx.subscribe()
    }

    /// Transition `idle -> running`. Has no effect on an operation that has
    /// already started or finished.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner
            .status
            .compare_exchange(STATUS_IDLE, STATUS_RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(operation_id = %inner.id, "start ignored, operation not idle");
            return;
        }

        let (source, request) = {
            let mut state = inner.lock();
            let Some(source) = state.source.take() else {
                return;
            };
            let Some(payload) = state.payload.as_mut() else {
                return;
            };
            payload.start();
            (source, payload.request().clone())
        };
        debug!(operation_id = %inner.id, method = %request.method, url = %request.url, "operation started");

        let (transport, task, owned) = match source {
            TransportSource::Private { config, connector } => {
                let transport = match connector.connect(&config) {
                    Ok(transport) => transport,
                    Err(e) => {
                        warn!(operation_id = %inner.id, error = %e, "failed to build transport");
                        if let Some(p) = inner.lock().payload.as_mut() {
                            p.error = Some(OperationError::Transport(e));
                        }
                        Inner::finish(inner);
                        return;
                    }
                };
                let weak = Arc::downgrade(inner);
                let task = transport.bulk_task(
                    request,
                    Box::new(move |outcome| match weak.upgrade() {
                        Some(inner) => inner.handle_outcome(outcome),
                        None => debug!("bulk completion dropped, operation gone"),
                    }),
                );
                (transport, task, true)
            }
            TransportSource::Supplied(transport) => {
                let events = Arc::new(EventRelay {
                    inner: Arc::downgrade(inner),
                });
                let task = transport.streaming_task(request, events);
                (transport, task, false)
            }
        };

        let cancelled_meanwhile = {
            let mut state = inner.lock();
            if inner.is_cancelled() || inner.finished.load(Ordering::Acquire) {
                true
            } else {
                state.transport = Some(Arc::clone(&transport));
                state.owns_transport = owned;
                state.task = Some(Arc::clone(&task));
                false
            }
        };
        if cancelled_meanwhile {
            task.cancel();
            if owned {
                transport.invalidate_and_cancel();
            }
            return;
        }
        task.resume();
    }

    /// Cancel the operation. The callback receives a payload whose error is
    /// `Cancelled`. Has no effect after the operation has finished.
    pub fn cancel(&self) {
        let inner = &self.inner;
        // `finish` closes its gate under the same lock, so a cancel either
        // lands before the gate and wins, or sees it closed and does nothing.
        let task = {
            let mut state = inner.lock();
            if inner.finished.load(Ordering::Acquire) {
                return;
            }
            inner.cancelled.store(true, Ordering::Release);
            if let Some(p) = state.payload.as_mut() {
                p.error = Some(OperationError::Cancelled);
            }
            state.task.clone()
        };
        debug!(operation_id = %inner.id, "cancel requested");
        if let Some(task) = task {
            task.cancel();
        }
        Inner::finish(inner);
    }
}

impl fmt::Debug for RequestOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOperation")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn handle_outcome(self: &Arc<Self>, outcome: TaskOutcome) {
        {
            let mut state = self.lock();
            let Some(payload) = state.payload.as_mut() else {
                return;
            };
            payload.response = outcome.response;
            match outcome.error {
                Some(e) => payload.error = Some(OperationError::Transport(e)),
                None => {
                    let empty = outcome.data.as_ref().map_or(true, |d| d.is_empty());
                    payload.data = outcome.data;
                    if empty && !self.allow_empty_body {
                        payload.error = Some(OperationError::EmptyBody);
                    }
                }
            }
        }
        Self::finish(self);
    }

    fn handle_error(self: &Arc<Self>, error: TransportError) {
        {
            let mut state = self.lock();
            if let Some(payload) = state.payload.as_mut() {
                payload.error = Some(OperationError::Transport(error));
            }
        }
        Self::finish(self);
    }

    fn handle_response(&self, head: ResponseHead) {
        let mut state = self.lock();
        if let Some(payload) = state.payload.as_mut() {
            payload.response = Some(head);
        }
    }

    fn handle_data(&self, chunk: &[u8]) {
        let mut state = self.lock();
        if state.payload.is_some() {
            state.incoming.extend_from_slice(chunk);
        }
    }

    fn handle_complete(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            let incoming = std::mem::take(&mut state.incoming);
            let Some(payload) = state.payload.as_mut() else {
                return;
            };
            if incoming.is_empty() && !self.allow_empty_body {
                payload.error = Some(OperationError::EmptyBody);
            } else {
                payload.data = Some(incoming);
            }
        }
        Self::finish(self);
    }

    /// Runs its effects at most once, whichever trigger gets here first.
    fn finish(self: &Arc<Self>) {
        let (cancelled, payload, callback, transport) = {
            let mut state = self.lock();
            if self
                .finished
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let cancelled = self.is_cancelled();
            state.task = None;
            state.source = None;
            state.incoming = Vec::new();
            let owned = state.owns_transport;
            let transport = state.transport.take().filter(|_| owned);
            (cancelled, state.payload.take(), state.callback.take(), transport)
        };

        if let Some(transport) = transport {
            if cancelled {
                transport.invalidate_and_cancel();
            } else {
                transport.finish_tasks_and_invalidate();
            }
        }

        let payload = payload.map(|mut payload| {
            if cancelled {
                payload.error = Some(OperationError::Cancelled);
            }
            payload.end();
            payload
        });

        self.status.store(STATUS_FINISHED, Ordering::Release);
        self.finished_tx.send_replace(true);

        if let (Some(payload), Some(callback)) = (payload, callback) {
            debug!(
                operation_id = %self.id,
                status = ?payload.status(),
                bytes = payload.data.as_ref().map_or(0, Vec::len),
                error = ?payload.error,
                "operation finished"
            );
            callback(payload);
        }
    }
}

/// Routes incremental task events to the operation, if it still exists.
struct EventRelay {
    inner: Weak<Inner>,
}

impl EventRelay {
    fn target(&self, event: &'static str) -> Option<Arc<Inner>> {
        let inner = self.inner.upgrade();
        if inner.is_none() {
            debug!(event, "task event dropped, operation gone");
        }
        inner
    }
}

impl TaskEvents for EventRelay {
    fn on_error(&self, error: TransportError) {
        if let Some(inner) = self.target("error") {
            inner.handle_error(error);
        }
    }

    fn on_response(&self, head: ResponseHead) {
        if let Some(inner) = self.target("response") {
            inner.handle_response(head);
        }
    }

    fn on_data(&self, chunk: &[u8]) {
        if let Some(inner) = self.target("data") {
            inner.handle_data(chunk);
        }
    }

    fn on_complete(&self) {
        if let Some(inner) = self.target("complete") {
            inner.handle_complete();
        }
    }
}
