//! The record accumulating one request's outcome.
//!
//! # Design
//! A `ResultPayload` is owned by exactly one operation while the request is
//! in flight and is moved into the terminal callback at finish. Moving it by
//! value is what makes it read-only from the callback's perspective: once
//! delivered, the operation no longer holds it and cannot mutate it.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::OperationError;
use crate::http::{HttpRequest, ResponseHead};

/// Request, response, body, error and timing for one operation.
#[derive(Debug, Clone)]
pub struct ResultPayload {
    request: HttpRequest,
    pub response: Option<ResponseHead>,
    pub data: Option<Vec<u8>>,
    pub error: Option<OperationError>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl ResultPayload {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: None,
            data: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// The original request. Never mutated after construction.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Record the begin timestamp.
    pub(crate) fn start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Record the end timestamp.
    pub(crate) fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Wall time between start and end, if both were recorded.
    ///
    /// An operation cancelled before it started has an end but no start.
    pub fn elapsed(&self) -> Option<TimeDelta> {
        Some(self.ended_at? - self.started_at?)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Lossy UTF-8 view of the body, empty when no body was stored.
    pub fn body_text(&self) -> String {
        self.data
            .as_deref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .unwrap_or_default()
    }
}
