//! Seams between an operation and the transport layer that executes it.
//!
//! # Design
//! A [`Transport`] is the reusable handle (connection pooling, TLS) and a
//! [`TransportTask`] is one in-flight request created from it. A task
//! reports its result in one of two forms:
//!
//! - bulk completion: a single [`TaskOutcome`] delivered at most once;
//! - incremental events: [`TaskEvents`] receives the response head, zero or
//!   more body chunks, then exactly one of completion or error.
//!
//! Transports deliver on whatever thread they choose. Events for a single
//! task must be delivered serially and in arrival order.

use std::sync::Arc;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::http::{HttpRequest, ResponseHead};

/// Everything a bulk-completion task reports in its single terminal event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub data: Option<Vec<u8>>,
    pub response: Option<ResponseHead>,
    pub error: Option<TransportError>,
}

impl TaskOutcome {
    pub fn success(response: ResponseHead, data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Callback for the bulk-completion form.
pub type BulkCompletion = Box<dyn FnOnce(TaskOutcome) + Send>;

/// Receiver for the incremental event form.
///
/// `on_complete` follows every `on_data` for a successful task. `on_error`
/// supersedes `on_complete`: a task reports one or the other, never both.
pub trait TaskEvents: Send + Sync {
    fn on_error(&self, error: TransportError);
    fn on_response(&self, head: ResponseHead);
    fn on_data(&self, chunk: &[u8]);
    fn on_complete(&self);
}

/// One in-flight request created from a [`Transport`].
pub trait TransportTask: Send + Sync {
    /// Begin executing. Calling it again has no effect.
    fn resume(&self);

    /// Stop executing. Events not yet delivered may be dropped.
    fn cancel(&self);
}

/// A reusable handle that creates and runs tasks.
pub trait Transport: Send + Sync {
    fn bulk_task(&self, request: HttpRequest, completion: BulkCompletion) -> Arc<dyn TransportTask>;

    fn streaming_task(
        &self,
        request: HttpRequest,
        events: Arc<dyn TaskEvents>,
    ) -> Arc<dyn TransportTask>;

    /// Let in-flight tasks complete, then refuse new ones.
    fn finish_tasks_and_invalidate(&self);

    /// Cancel in-flight tasks and refuse new ones.
    fn invalidate_and_cancel(&self);
}

/// Builds the private transport handle an operation owns.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError>;
}
