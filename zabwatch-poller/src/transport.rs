//! Transport abstraction for non-blocking HTTP requests.
//!
//! The poll state machine never awaits the network. It opens a request
//! through [`Transport`], then checks the resulting [`TransportHandle`]
//! once per tick; every check is an O(1) non-blocking read of the
//! request's current phase. [`HttpTransport`] bridges this to reqwest by
//! running each request in a background task that publishes progress
//! through a watch channel.
//!
//! Dropping a handle aborts the background task, so the machine's scoped
//! ownership of the handle is also what releases the transport's
//! resources - including behind a synthesized timeout.

use std::fmt::Debug;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sub-step of a single HTTP request's lifecycle.
///
/// Phases form a strict forward progression. Pre-connection phases
/// (`Idle`, `NetworkInit`, `LinkUp`) are informational only; in-flight
/// phases are governed by the poller's phase deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    /// No request activity yet.
    Idle,
    /// Network stack still coming up.
    NetworkInit,
    /// Link established, request not yet started.
    LinkUp,
    /// Resolving the host name.
    Dns,
    /// TCP/TLS connect or handshake in progress.
    Connect,
    /// Sending the request.
    Send,
    /// Awaiting the response status line.
    Status,
    /// Awaiting response headers.
    Headers,
    /// Receiving the response body.
    Body,
}

impl TransportPhase {
    /// Whether a stall in this phase should trip the phase deadline.
    pub fn is_deadline_governed(self) -> bool {
        matches!(
            self,
            TransportPhase::Dns
                | TransportPhase::Connect
                | TransportPhase::Send
                | TransportPhase::Status
                | TransportPhase::Headers
                | TransportPhase::Body
        )
    }
}

/// Result of polling an in-flight request.
#[derive(Debug, Clone)]
pub enum TransportStatus {
    /// Still working; the phase says how far the request has progressed.
    Pending(TransportPhase),
    /// Response fully received.
    Complete { status: u16, body: String },
    /// The body outgrew the buffer cap; `body` holds what arrived.
    Truncated { status: u16, body: String },
    /// The transport gave up (resolve failure, connect error, reset, ...).
    Failed { reason: String },
}

/// A request to be opened on a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl TransportRequest {
    /// A GET request for the given URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Attach a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One outstanding request.
///
/// The poll loop owns at most one handle at any time; dropping it releases
/// the underlying transport resources exactly once.
pub trait TransportHandle: Send + Debug {
    /// Non-blocking check of the request's current status.
    fn poll(&mut self) -> TransportStatus;
}

/// Opens requests. Implemented by [`HttpTransport`] in production and by
/// scripted fakes in tests.
pub trait Transport: Send + Debug {
    /// Open a request, returning a pollable handle.
    fn open(&mut self, request: &TransportRequest) -> Box<dyn TransportHandle>;
}

/// reqwest-backed transport.
///
/// reqwest performs name resolution, connect, and request transmission
/// inside a single `send()` future, so the first observable point after
/// opening is the response head: everything before it is reported as
/// [`TransportPhase::Connect`], and the body read as
/// [`TransportPhase::Body`]. The finer-grained phases in the enum remain
/// available to transports that can report them.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl HttpTransport {
    /// Create a transport with the given response buffer cap.
    ///
    /// No overall request timeout is set on the client: stall detection
    /// belongs to the poll state machine's phase deadline.
    pub fn new(max_response_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("zabwatch")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            max_response_bytes,
        }
    }
}

impl Transport for HttpTransport {
    fn open(&mut self, request: &TransportRequest) -> Box<dyn TransportHandle> {
        let (tx, rx) = watch::channel(TransportStatus::Pending(TransportPhase::Idle));
        let client = self.client.clone();
        let request = request.clone();
        let cap = self.max_response_bytes;

        let task = tokio::spawn(async move {
            run_request(client, request, cap, tx).await;
        });

        Box::new(HttpRequestHandle { status: rx, task })
    }
}

/// Handle to a request running in a background task.
#[derive(Debug)]
struct HttpRequestHandle {
    status: watch::Receiver<TransportStatus>,
    task: JoinHandle<()>,
}

impl TransportHandle for HttpRequestHandle {
    fn poll(&mut self) -> TransportStatus {
        self.status.borrow().clone()
    }
}

impl Drop for HttpRequestHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_request(
    client: reqwest::Client,
    request: TransportRequest,
    cap: usize,
    tx: watch::Sender<TransportStatus>,
) {
    let _ = tx.send(TransportStatus::Pending(TransportPhase::Connect));

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(TransportStatus::Failed {
                reason: err.to_string(),
            });
            return;
        }
    };

    let status = response.status().as_u16();
    let _ = tx.send(TransportStatus::Pending(TransportPhase::Body));

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if body.len() + chunk.len() > cap {
                    body.extend_from_slice(&chunk[..cap - body.len()]);
                    let _ = tx.send(TransportStatus::Truncated {
                        status,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                    return;
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(err) => {
                let _ = tx.send(TransportStatus::Failed {
                    reason: err.to_string(),
                });
                return;
            }
        }
    }

    let _ = tx.send(TransportStatus::Complete {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
}
