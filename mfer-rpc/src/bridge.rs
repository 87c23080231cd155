//! Request/response bridge between the page side and the dispatcher.
//!
//! The two sides share no state. The page posts `Request` envelopes and
//! waits for a `Response` envelope carrying the same id; a relay task on
//! the other side hands each request to the dispatcher and posts the
//! answer back. Envelopes from a foreign origin are ignored.

use crate::error::BridgeError;
use crate::rpc::Dispatcher;
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = JsonRpcResponse> + Send + 'a>>;

/// Whatever answers requests on the far side of the bridge.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, req: JsonRpcRequest) -> HandlerFuture<'_>;
}

impl RequestHandler for Dispatcher {
    fn handle(&self, req: JsonRpcRequest) -> HandlerFuture<'_> {
        Box::pin(self.handle_rpc(req))
    }
}

#[derive(Debug, Clone)]
pub enum Envelope {
    Request {
        origin: String,
        request: JsonRpcRequest,
    },
    Response {
        origin: String,
        request_id: u64,
        response: JsonRpcResponse,
    },
}

struct Pending {
    token: u64,
    tx: oneshot::Sender<JsonRpcResponse>,
}

/// Outstanding requests keyed by id. Registering an id that is already
/// waiting replaces the earlier waiter.
#[derive(Default)]
struct PendingRegistry {
    next_token: u64,
    entries: HashMap<u64, Pending>,
}

impl PendingRegistry {
    fn register(&mut self, id: u64) -> (u64, oneshot::Receiver<JsonRpcResponse>) {
        let (tx, rx) = oneshot::channel();
        self.next_token += 1;
        let token = self.next_token;
        if self.entries.insert(id, Pending { token, tx }).is_some() {
            debug!(id, "Replacing outstanding request with the same id");
        }
        (token, rx)
    }

    fn resolve(&mut self, id: u64, response: JsonRpcResponse) {
        match self.entries.remove(&id) {
            Some(pending) => {
                let _ = pending.tx.send(response);
            }
            None => debug!(id, "Response for unknown or expired request"),
        }
    }

    fn evict(&mut self, id: u64, token: u64) {
        if self.entries.get(&id).is_some_and(|p| p.token == token) {
            self.entries.remove(&id);
        }
    }
}

/// Page-side endpoint of the bridge.
pub struct PageBridge {
    origin: String,
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: Arc<Mutex<PendingRegistry>>,
    timeout: Duration,
}

impl PageBridge {
    /// Wire a page endpoint to `handler`, spawning the relay and the
    /// response listener.
    pub fn connect<H: RequestHandler>(handler: Arc<H>, origin: impl Into<String>, timeout: Duration) -> Arc<Self> {
        let origin = origin.into();
        let (to_relay, from_page) = mpsc::unbounded_channel();
        let (to_page, from_relay) = mpsc::unbounded_channel();

        tokio::spawn(relay(handler, origin.clone(), from_page, to_page));
        Self::attach(origin, to_relay, from_relay, timeout)
    }

    /// Page endpoint over caller-supplied channels.
    pub fn attach(
        origin: String,
        outbound: mpsc::UnboundedSender<Envelope>,
        inbound: mpsc::UnboundedReceiver<Envelope>,
        timeout: Duration,
    ) -> Arc<Self> {
        let pending = Arc::new(Mutex::new(PendingRegistry::default()));
        tokio::spawn(listen(origin.clone(), inbound, pending.clone()));
        Arc::new(Self {
            origin,
            outbound,
            pending,
            timeout,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, PendingRegistry> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.registry().entries.len()
    }

    /// Post `request` to the dispatcher side and wait for its response.
    pub async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, BridgeError> {
        let id = request.id;
        let (token, rx) = self.registry().register(id);

        let envelope = Envelope::Request {
            origin: self.origin.clone(),
            request,
        };
        if self.outbound.send(envelope).is_err() {
            self.registry().evict(id, token);
            return Err(BridgeError::Closed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::Superseded(id)),
            Err(_) => {
                self.registry().evict(id, token);
                warn!(id, "Bridge request timed out");
                Err(BridgeError::Timeout {
                    id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Dispatcher-side relay: answer each same-origin request on its own task.
pub async fn relay<H: RequestHandler>(
    handler: Arc<H>,
    origin: String,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    outbound: mpsc::UnboundedSender<Envelope>,
) {
    while let Some(envelope) = inbound.recv().await {
        let Envelope::Request {
            origin: sender,
            request,
        } = envelope
        else {
            continue;
        };
        if sender != origin {
            warn!(origin = %sender, "Dropping request from foreign origin");
            continue;
        }

        let handler = handler.clone();
        let outbound = outbound.clone();
        let origin = origin.clone();
        tokio::spawn(async move {
            let request_id = request.id;
            let response = handler.handle(request).await;
            let _ = outbound.send(Envelope::Response {
                origin,
                request_id,
                response,
            });
        });
    }
    debug!("Bridge relay stopped");
}

async fn listen(
    origin: String,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<Mutex<PendingRegistry>>,
) {
    while let Some(envelope) = inbound.recv().await {
        let Envelope::Response {
            origin: sender,
            request_id,
            response,
        } = envelope
        else {
            continue;
        };
        if sender != origin {
            warn!(origin = %sender, "Dropping response from foreign origin");
            continue;
        }
        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolve(request_id, response);
    }
}

// ── Tests ───────────────────────────────────────────────────────
