//! Request operations over real HTTP against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then runs operations through
//! the ureq-backed transport on both paths: a private handle built from a
//! config, and a shared handle supplied by the test.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netop_core::{
    HttpMethod, HttpRequest, OperationError, RequestOperation, ResultPayload, Transport,
    TransportConfig, TransportErrorKind, TransportSource, UreqTransport,
};

fn spawn_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

fn config() -> TransportConfig {
    TransportConfig {
        timeout_secs: Some(10),
        read_chunk_size: 4096,
        ..TransportConfig::default()
    }
}

/// Run `request` to completion and return the delivered payload.
fn execute(request: HttpRequest, source: TransportSource) -> ResultPayload {
    let (tx, rx) = mpsc::channel();
    let op = RequestOperation::new(request, source, move |payload| {
        tx.send(payload).unwrap();
    });
    op.start();
    let payload = rx
        .recv_timeout(Duration::from_secs(15))
        .expect("operation did not finish");
    assert!(op.is_finished());
    payload
}

#[test]
fn get_empty_200_is_empty_body_error() {
    let addr = spawn_server();
    let payload = execute(
        HttpRequest::get(format!("http://{addr}/empty")),
        TransportSource::private(config()),
    );

    assert_eq!(payload.status(), Some(200));
    assert_eq!(payload.error, Some(OperationError::EmptyBody));
    assert!(payload.data.unwrap_or_default().is_empty());
}

#[test]
fn head_empty_200_succeeds() {
    let addr = spawn_server();
    let payload = execute(
        HttpRequest::head(format!("http://{addr}/empty")),
        TransportSource::private(config()),
    );

    assert_eq!(payload.status(), Some(200));
    assert_eq!(payload.error, None);
}

#[test]
fn create_then_delete_with_private_handles() {
    let addr = spawn_server();

    // Step 1: create a resource.
    let request = HttpRequest::new(HttpMethod::Post, format!("http://{addr}/resources"))
        .json(&serde_json::json!({"name": "sprocket"}))
        .unwrap();
    let created = execute(request, TransportSource::private(config()));
    assert_eq!(created.status(), Some(201));
    assert!(created.is_success());
    let body: serde_json::Value = serde_json::from_slice(created.data.as_deref().unwrap()).unwrap();
    assert_eq!(body["name"], "sprocket");
    let id = body["id"].as_str().unwrap().to_string();

    // Step 2: delete it; 204 with no body is fine for DELETE.
    let deleted = execute(
        HttpRequest::delete(format!("http://{addr}/resources/{id}")),
        TransportSource::private(config()),
    );
    assert_eq!(deleted.status(), Some(204));
    assert_eq!(deleted.error, None);

    // Step 3: fetch it again; the 404 is data, not an error classification,
    // but its body is empty.
    let missing = execute(
        HttpRequest::get(format!("http://{addr}/resources/{id}")),
        TransportSource::private(config()),
    );
    assert_eq!(missing.status(), Some(404));
    assert_eq!(missing.error, Some(OperationError::EmptyBody));
}

#[test]
fn supplied_handle_streams_large_body_and_stays_usable() {
    let addr = spawn_server();
    let transport = Arc::new(UreqTransport::new(&config()).unwrap());

    let first = execute(
        HttpRequest::get(format!("http://{addr}/blob/100000")),
        TransportSource::supplied(transport.clone()),
    );
    assert!(first.is_success());
    assert_eq!(first.data.as_deref(), Some(&mock_server::blob_bytes(100000)[..]));

    // Not owned by the operation, so not invalidated at finish.
    assert!(!transport.is_invalidated());

    let echoed = execute(
        HttpRequest::new(HttpMethod::Post, format!("http://{addr}/echo"))
            .header("content-type", "text/plain")
            .body("ping"),
        TransportSource::supplied(transport.clone()),
    );
    assert_eq!(echoed.body_text(), "ping");
    assert_eq!(
        echoed.response.as_ref().and_then(|r| r.header("content-type")),
        Some("text/plain")
    );
}

#[test]
fn invalidated_supplied_handle_fails_new_operations() {
    let addr = spawn_server();
    let transport = Arc::new(UreqTransport::new(&config()).unwrap());
    transport.finish_tasks_and_invalidate();

    let payload = execute(
        HttpRequest::get(format!("http://{addr}/blob/10")),
        TransportSource::supplied(transport),
    );
    assert_eq!(
        payload.error.and_then(|e| e.transport_kind()),
        Some(TransportErrorKind::Invalidated)
    );
}

#[test]
fn cancel_5ms_after_start_on_stalled_request() {
    let addr = spawn_server();
    let (tx, rx) = mpsc::channel();
    let op = RequestOperation::new(
        HttpRequest::get(format!("http://{addr}/stall")),
        TransportSource::private(config()),
        move |payload| {
            tx.send(payload).unwrap();
        },
    );

    op.start();
    thread::sleep(Duration::from_millis(5));
    op.cancel();

    let payload = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(payload.error, Some(OperationError::Cancelled));
    assert!(op.is_cancelled());
    // The channel closes when the callback is consumed; nothing else arrives.
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn connection_refused_is_transport_error() {
    // Bind then drop to get a port nobody is listening on.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let payload = execute(
        HttpRequest::get(format!("http://{addr}/anything")),
        TransportSource::private(config()),
    );
    assert!(matches!(payload.error, Some(OperationError::Transport(_))));
    assert!(payload.response.is_none());
}
