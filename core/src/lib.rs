//! Single-request asynchronous HTTP execution unit.
//!
//! # Overview
//! A [`RequestOperation`] wraps one outbound HTTP request, runs it on a
//! transport's thread rather than the caller's, and delivers exactly one
//! [`ResultPayload`] to a callback, whether the request completes, fails,
//! or is cancelled.
//!
//! # Design
//! - The transport handle is either private (built from a
//!   [`TransportConfig`], owned and torn down by the operation) or supplied
//!   by the caller. The choice fixes how results arrive: one bulk
//!   completion, or incremental response/data/completion/error events.
//! - An empty body is an error unless the request method's entry in the
//!   method table, or an explicit builder override, allows it.
//! - Callback delivery is exactly-once across completion, transport error
//!   and cancellation; cancellation always wins.
//! - [`UreqTransport`] is the default transport; anything implementing
//!   [`Transport`] can stand in for it.

pub mod config;
pub mod error;
pub mod http;
pub mod operation;
pub mod payload;
pub mod transport;
pub mod ureq_transport;

pub use config::{ConfigError, TransportConfig};
pub use error::{OperationError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, HttpRequest, ResponseHead, UnknownMethod};
pub use operation::{
    Callback, OperationBuilder, OperationId, OperationStatus, RequestOperation, TransportSource,
};
pub use payload::ResultPayload;
pub use transport::{BulkCompletion, Connector, TaskEvents, TaskOutcome, Transport, TransportTask};
pub use ureq_transport::{UreqConnector, UreqTransport};
