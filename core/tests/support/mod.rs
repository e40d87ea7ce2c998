//! Scripted transport doubles shared by the integration tests.
//!
//! A `ScriptedTransport` either plays a fixed script when a task is
//! resumed, or (in `Manual` mode) hands the task's sink to the test so it
//! can fire events at chosen moments, including from other threads.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netop_core::{
    BulkCompletion, Connector, ResultPayload, ResponseHead, TaskEvents, TaskOutcome, Transport,
    TransportConfig, TransportError, TransportTask,
};

#[derive(Debug, Clone)]
pub enum Event {
    Response(ResponseHead),
    Data(Vec<u8>),
    Complete,
    Error(TransportError),
}

#[derive(Debug, Clone)]
pub enum Script {
    /// Bulk tasks deliver this outcome on resume.
    Outcome(TaskOutcome),
    /// Streaming tasks deliver these events, in order, on resume.
    Events(Vec<Event>),
    /// Nothing is delivered until the test fires it.
    Manual,
}

/// A sink captured in `Manual` mode.
pub enum Sink {
    Bulk(BulkCompletion),
    Streaming(Arc<dyn TaskEvents>),
}

#[derive(Default)]
pub struct Counters {
    pub tasks: AtomicUsize,
    pub resumed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub graceful_shutdowns: AtomicUsize,
    pub abrupt_shutdowns: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    script: Script,
    pub counters: Counters,
    captured: Mutex<Option<Sink>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            counters: Counters::default(),
            captured: Mutex::new(None),
        })
    }

    pub fn manual() -> Arc<Self> {
        Self::new(Script::Manual)
    }

    /// Take the sink captured by a `Manual` task.
    pub fn take_sink(&self) -> Sink {
        self.captured
            .lock()
            .unwrap()
            .take()
            .expect("no task has been resumed")
    }

    pub fn graceful_shutdowns(&self) -> usize {
        Counters::get(&self.counters.graceful_shutdowns)
    }

    pub fn abrupt_shutdowns(&self) -> usize {
        Counters::get(&self.counters.abrupt_shutdowns)
    }

    pub fn cancelled_tasks(&self) -> usize {
        Counters::get(&self.counters.cancelled)
    }
}

struct ScriptedTask {
    transport: Arc<ScriptedTransport>,
    sink: Mutex<Option<Sink>>,
}

impl TransportTask for ScriptedTask {
    fn resume(&self) {
        let Some(sink) = self.sink.lock().unwrap().take() else {
            return;
        };
        self.transport.counters.resumed.fetch_add(1, Ordering::SeqCst);
        match (&self.transport.script, sink) {
            (Script::Manual, sink) => {
                *self.transport.captured.lock().unwrap() = Some(sink);
            }
            (Script::Outcome(outcome), Sink::Bulk(completion)) => completion(outcome.clone()),
            (Script::Events(events), Sink::Streaming(sink)) => play(&*sink, events),
            (script, _) => panic!("script {script:?} does not match the task form"),
        }
    }

    fn cancel(&self) {
        self.transport.counters.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn play(sink: &dyn TaskEvents, events: &[Event]) {
    for event in events {
        match event {
            Event::Response(head) => sink.on_response(head.clone()),
            Event::Data(chunk) => sink.on_data(chunk),
            Event::Complete => sink.on_complete(),
            Event::Error(e) => sink.on_error(e.clone()),
        }
    }
}

/// The `Transport` face of a scripted transport. Tasks point back at its
/// counters and capture slot.
pub struct Handle(pub Arc<ScriptedTransport>);

impl Transport for Handle {
    fn bulk_task(
        &self,
        _request: netop_core::HttpRequest,
        completion: BulkCompletion,
    ) -> Arc<dyn TransportTask> {
        self.0.counters.tasks.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedTask {
            transport: Arc::clone(&self.0),
            sink: Mutex::new(Some(Sink::Bulk(completion))),
        })
    }

    fn streaming_task(
        &self,
        _request: netop_core::HttpRequest,
        events: Arc<dyn TaskEvents>,
    ) -> Arc<dyn TransportTask> {
        self.0.counters.tasks.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedTask {
            transport: Arc::clone(&self.0),
            sink: Mutex::new(Some(Sink::Streaming(events))),
        })
    }

    fn finish_tasks_and_invalidate(&self) {
        self.0
            .counters
            .graceful_shutdowns
            .fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_and_cancel(&self) {
        self.0.counters.abrupt_shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same scripted transport for every private handle.
pub struct ScriptedConnector {
    pub transport: Arc<ScriptedTransport>,
    pub fail_with: Option<TransportError>,
}

impl Connector for ScriptedConnector {
    fn connect(&self, _config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(Arc::new(Handle(Arc::clone(&self.transport)))),
        }
    }
}

pub fn private(transport: &Arc<ScriptedTransport>) -> netop_core::TransportSource {
    netop_core::TransportSource::private_with(
        TransportConfig::default(),
        Arc::new(ScriptedConnector {
            transport: Arc::clone(transport),
            fail_with: None,
        }),
    )
}

pub fn supplied(transport: &Arc<ScriptedTransport>) -> netop_core::TransportSource {
    netop_core::TransportSource::supplied(Arc::new(Handle(Arc::clone(transport))))
}

/// A callback that forwards every payload it receives and counts calls.
pub struct Recorder {
    pub calls: Arc<AtomicUsize>,
    rx: Receiver<ResultPayload>,
}

impl Recorder {
    pub fn new() -> (Self, impl FnOnce(ResultPayload) + Send + 'static) {
        let (tx, rx) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let callback = move |payload: ResultPayload| {
            counted.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(payload);
        };
        (Self { calls, rx }, callback)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payload(&self) -> ResultPayload {
        self.rx
            .recv_timeout(Duration::from_secs(10))
            .expect("callback was not invoked")
    }

    pub fn try_payload(&self) -> Option<ResultPayload> {
        self.rx.try_recv().ok()
    }
}

pub fn head(status: u16) -> ResponseHead {
    ResponseHead::new(status)
}
