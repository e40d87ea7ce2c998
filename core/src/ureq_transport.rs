//! Default transport handle backed by a blocking `ureq::Agent`.
//!
//! # Design
//! The agent owns the connection pool and is shared by every task created
//! from the handle. Each resumed task runs its blocking round-trip on its
//! own thread and delivers events from there, so the caller's thread is
//! never blocked. Cancellation is cooperative: ureq cannot abort a call in
//! progress, so a cancelled task stops at the next event boundary and
//! reports `Cancelled` instead of whatever it would have delivered.
//!
//! Worker threads are named `netop-task-<n>` and detached. A thread whose
//! task was cancelled mid-call stays blocked in ureq until the request
//! returns or the configured global timeout fires. Its late result is then
//! reported as `Cancelled`, which an already finished operation ignores.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use tracing::{debug, warn};
use ureq::http::Response;
use ureq::{Agent, Body, RequestBuilder};

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportErrorKind};
use crate::http::{HttpMethod, HttpRequest, ResponseHead};
use crate::transport::{BulkCompletion, Connector, TaskEvents, TaskOutcome, Transport, TransportTask};

/// Builds a fresh [`UreqTransport`] per private handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct UreqConnector;

impl Connector for UreqConnector {
    fn connect(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(UreqTransport::new(config)?))
    }
}

pub struct UreqTransport {
    agent: Agent,
    max_response_bytes: u64,
    read_chunk_size: usize,
    invalidated: AtomicBool,
    tasks: Mutex<Vec<Weak<TaskControl>>>,
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        if config.read_chunk_size == 0 {
            return Err(TransportError::new(
                TransportErrorKind::InvalidRequest,
                "read_chunk_size must be greater than zero",
            ));
        }

        // Status codes are data here; the operation never interprets them.
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.timeout())
            .timeout_connect(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .max_idle_connections(config.max_idle_connections)
            .build()
            .new_agent();

        Ok(Self {
            agent,
            max_response_bytes: config.max_response_bytes,
            read_chunk_size: config.read_chunk_size,
            invalidated: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    fn create_task(&self, request: HttpRequest, sink: Sink) -> Arc<dyn TransportTask> {
        let control = Arc::new(TaskControl::default());
        let preset_error = self.is_invalidated().then(TransportError::invalidated);
        if preset_error.is_none() {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|t| t.strong_count() > 0);
            tasks.push(Arc::downgrade(&control));
        }

        let job = Job {
            agent: self.agent.clone(),
            request,
            sink,
            preset_error,
            max_response_bytes: self.max_response_bytes,
            read_chunk_size: self.read_chunk_size,
        };
        Arc::new(UreqTask {
            control,
            job: Mutex::new(Some(job)),
        })
    }
}

impl Transport for UreqTransport {
    fn bulk_task(&self, request: HttpRequest, completion: BulkCompletion) -> Arc<dyn TransportTask> {
        self.create_task(request, Sink::Bulk(completion))
    }

    fn streaming_task(
        &self,
        request: HttpRequest,
        events: Arc<dyn TaskEvents>,
    ) -> Arc<dyn TransportTask> {
        self.create_task(request, Sink::Streaming(events))
    }

    fn finish_tasks_and_invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
        debug!("transport invalidated, in-flight tasks continue");
    }

    fn invalidate_and_cancel(&self) {
        self.invalidated.store(true, Ordering::Release);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let mut cancelled = 0;
        for control in tasks.iter().filter_map(Weak::upgrade) {
            control.cancelled.store(true, Ordering::Release);
            cancelled += 1;
        }
        debug!(cancelled, "transport invalidated, in-flight tasks cancelled");
    }
}

#[derive(Default)]
struct TaskControl {
    cancelled: AtomicBool,
}

impl TaskControl {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

enum Sink {
    Bulk(BulkCompletion),
    Streaming(Arc<dyn TaskEvents>),
}

struct Job {
    agent: Agent,
    request: HttpRequest,
    sink: Sink,
    preset_error: Option<TransportError>,
    max_response_bytes: u64,
    read_chunk_size: usize,
}

/// Numbers worker threads so they can be told apart in debuggers and logs.
static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

struct UreqTask {
    control: Arc<TaskControl>,
    job: Mutex<Option<Job>>,
}

impl TransportTask for UreqTask {
    fn resume(&self) {
        let Some(job) = self.job.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let control = Arc::clone(&self.control);
        let slot = Arc::new(Mutex::new(Some(job)));
        let worker_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(format!("netop-task-{}", NEXT_TASK.fetch_add(1, Ordering::Relaxed)))
            .spawn(move || {
                let job = worker_slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(job) = job {
                    job.run(&control);
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn task thread");
            if let Some(job) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                deliver_error(
                    job.sink,
                    TransportError::new(TransportErrorKind::Other, format!("spawn task thread: {e}")),
                );
            }
        }
    }

    fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Release);
        // A task that never ran has nothing to report.
        self.job.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl Job {
    fn run(self, control: &TaskControl) {
        let Job {
            agent,
            request,
            sink,
            preset_error,
            max_response_bytes,
            read_chunk_size,
        } = self;

        if let Some(error) = preset_error {
            deliver_error(sink, error);
            return;
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = match send(&agent, &request) {
            Ok(response) => response,
            Err(e) => {
                let error = if control.is_cancelled() {
                    TransportError::cancelled()
                } else {
                    TransportError::from(e)
                };
                deliver_error(sink, error);
                return;
            }
        };

        match sink {
            Sink::Bulk(completion) => {
                completion(read_bulk(response, control, max_response_bytes));
            }
            Sink::Streaming(events) => {
                read_streaming(response, control, &*events, max_response_bytes, read_chunk_size);
            }
        }
    }
}

fn deliver_error(sink: Sink, error: TransportError) {
    match sink {
        Sink::Bulk(completion) => completion(TaskOutcome::failure(error)),
        Sink::Streaming(events) => events.on_error(error),
    }
}

fn read_bulk(mut response: Response<Body>, control: &TaskControl, limit: u64) -> TaskOutcome {
    let head = response_head(&response);
    let body = response.body_mut().with_config().limit(limit).read_to_vec();
    if control.is_cancelled() {
        return TaskOutcome::failure(TransportError::cancelled());
    }
    match body {
        Ok(data) => {
            debug!(status = head.status, bytes = data.len(), "response complete");
            TaskOutcome::success(head, data)
        }
        Err(e) => TaskOutcome {
            data: None,
            response: Some(head),
            error: Some(TransportError::from(e)),
        },
    }
}

fn read_streaming(
    mut response: Response<Body>,
    control: &TaskControl,
    events: &dyn TaskEvents,
    limit: u64,
    chunk_size: usize,
) {
    if control.is_cancelled() {
        events.on_error(TransportError::cancelled());
        return;
    }
    events.on_response(response_head(&response));

    let mut reader = response.body_mut().with_config().limit(limit).reader();
    let mut buf = vec![0u8; chunk_size];
    loop {
        if control.is_cancelled() {
            events.on_error(TransportError::cancelled());
            return;
        }
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => events.on_data(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                events.on_error(TransportError::from(e));
                return;
            }
        }
    }
    events.on_complete();
}

fn response_head(response: &Response<Body>) -> ResponseHead {
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(v) => Some((name.as_str().to_string(), v.to_string())),
            Err(_) => {
                warn!(header = %name, "dropping non-ASCII response header");
                None
            }
        })
        .collect();
    ResponseHead {
        status: response.status().as_u16(),
        headers,
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send(agent: &Agent, request: &HttpRequest) -> Result<Response<Body>, ureq::Error> {
    let url = request.url.as_str();
    let bodyless = match request.method {
        HttpMethod::Get => agent.get(url),
        HttpMethod::Head => agent.head(url),
        HttpMethod::Delete => agent.delete(url),
        HttpMethod::Options => agent.options(url),
        HttpMethod::Trace => agent.trace(url),
        HttpMethod::Post => return send_with_body(with_headers(agent.post(url), request), request),
        HttpMethod::Put => return send_with_body(with_headers(agent.put(url), request), request),
        HttpMethod::Patch => return send_with_body(with_headers(agent.patch(url), request), request),
    };
    if request.body.is_some() {
        warn!(method = %request.method, url, "request body ignored for bodyless method");
    }
    with_headers(bodyless, request).call()
}

fn send_with_body(
    builder: RequestBuilder<ureq::typestate::WithBody>,
    request: &HttpRequest,
) -> Result<Response<Body>, ureq::Error> {
    match request.body.as_deref() {
        Some(body) => builder.send(body),
        None => builder.send_empty(),
    }
}
