//! WebSocket fan-out for live dashboards.
//!
//! The upgrade is handled manually on `/ws`: the handshake is validated
//! here, the 101 goes out with the computed `Sec-WebSocket-Accept`, and the
//! raw upgraded byte stream is driven by a per-client task using the frame
//! codec in [`frame`]. Inbound traffic is limited to control frames
//! (PING/PONG/CLOSE); everything the server pushes is a text frame encoded
//! once per broadcast.

pub mod frame;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use pulse_core::Shutdown;

use crate::state::AppState;

use self::frame::{
    encode_control, encode_text, parse_client_frame, Parsed, OP_CLOSE, OP_PING, OP_PONG,
};

/// RFC 6455 §1.3 magic GUID for the accept token.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Heartbeat period; a client that hasn't produced any frame for a full
/// period is torn down on the next sweep.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

fn accept_token(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

struct ClientHandle {
    tx: UnboundedSender<Vec<u8>>,
    /// Cleared by the heartbeat, set again by any inbound frame.
    alive: Arc<AtomicBool>,
    /// Wakes the client's read loop on teardown.
    closer: Shutdown,
}

/// Registry of connected dashboard clients.
///
/// Mutated from three points — accept, teardown, and the heartbeat timer —
/// so the set lives behind a lock; per-client writes go through an
/// unbounded channel drained by that client's writer task.
#[derive(Default)]
pub struct WsServer {
    clients: Mutex<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
}

impl WsServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("ws clients lock").len()
    }

    /// Encode `text` once and write it to every connected client. A failed
    /// per-client write tears down that client only. Returns the delivered
    /// count.
    pub fn broadcast(&self, text: &str) -> usize {
        let encoded = encode_text(text);
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let clients = self.clients.lock().expect("ws clients lock");
            for (&id, client) in clients.iter() {
                if client.tx.send(encoded.clone()).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(id);
                }
            }
        }
        for id in failed {
            self.graceful_close(id, "broadcast write failed");
        }
        delivered
    }

    /// Remove and wake one client. Idempotent: the second caller finds the
    /// registry slot already gone.
    pub fn graceful_close(&self, id: u64, reason: &str) {
        let removed = self.clients.lock().expect("ws clients lock").remove(&id);
        if let Some(client) = removed {
            client.closer.trigger();
            info!(client = id, reason, "websocket client closed");
        }
    }

    /// Sweep all clients: tear down the ones that stayed silent for a full
    /// interval, PING the rest.
    fn heartbeat_sweep(&self) {
        let ping = encode_control(OP_PING, b"");
        let mut stale = Vec::new();
        {
            let clients = self.clients.lock().expect("ws clients lock");
            for (&id, client) in clients.iter() {
                if !client.alive.swap(false, Ordering::SeqCst) {
                    stale.push(id);
                } else if client.tx.send(ping.clone()).is_err() {
                    stale.push(id);
                }
            }
        }
        for id in stale {
            self.graceful_close(id, "heartbeat timeout");
        }
    }

    pub fn spawn_heartbeat(self: &Arc<Self>, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => server.heartbeat_sweep(),
                }
            }
        })
    }

    /// Drive one upgraded connection. When the byte stream is the plain TCP
    /// socket, tune it first; behind other IO wrappers the loop runs as-is.
    pub async fn run_connection(self: Arc<Self>, upgraded: hyper::upgrade::Upgraded) {
        match upgraded.downcast::<TokioIo<TcpStream>>() {
            Ok(parts) => {
                let stream = parts.io.into_inner();
                tune_socket(&stream);
                self.serve_client(stream, parts.read_buf).await;
            }
            Err(upgraded) => {
                self.serve_client(TokioIo::new(upgraded), Bytes::new()).await;
            }
        }
    }

    /// Per-client loop: a writer task drains the outbound channel while this
    /// task parses frames off the front of the receive buffer.
    ///
    /// Readable EOF does not tear the client down — a half-open client keeps
    /// receiving broadcasts until the heartbeat or a write failure ends it.
    pub(crate) async fn serve_client<S>(self: Arc<Self>, stream: S, initial: Bytes)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let alive = Arc::new(AtomicBool::new(true));
        let closer = Shutdown::new();

        self.clients.lock().expect("ws clients lock").insert(
            id,
            ClientHandle {
                tx: tx.clone(),
                alive: alive.clone(),
                closer: closer.clone(),
            },
        );
        info!(client = id, "websocket client connected");

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let mut buf = BytesMut::from(&initial[..]);
        let mut chunk = [0u8; 4096];
        loop {
            loop {
                match parse_client_frame(&buf) {
                    Ok(Parsed::NeedMore) => break,
                    Ok(Parsed::Frame(frame, consumed)) => {
                        let _ = buf.split_to(consumed);
                        alive.store(true, Ordering::SeqCst);
                        match frame.opcode {
                            OP_PING => {
                                let _ = tx.send(encode_control(OP_PONG, &frame.payload));
                            }
                            OP_PONG => {}
                            OP_CLOSE => {
                                let _ = tx.send(encode_control(OP_CLOSE, &[]));
                                self.graceful_close(id, "close frame");
                                return;
                            }
                            other => {
                                debug!(client = id, opcode = other, "ignoring client frame");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(client = id, error = %e, "frame error");
                        self.graceful_close(id, "frame error");
                        return;
                    }
                }
            }

            tokio::select! {
                _ = closer.cancelled() => return,
                result = read_half.read(&mut chunk) => match result {
                    // Half-open: the peer finished sending but still reads.
                    Ok(0) => {
                        debug!(client = id, "readable end ignored (half-open)");
                        return;
                    }
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(client = id, error = %e, "socket error");
                        self.graceful_close(id, "socket error");
                        return;
                    }
                },
            }
        }
    }
}

/// Post-upgrade TCP tuning: no write coalescing, OS-level keep-alive. The
/// tokio socket carries no HTTP-inherited read timeout to clear.
fn tune_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to disable write coalescing");
    }
    let sock = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(60));
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        debug!(error = %e, "failed to enable TCP keep-alive");
    }
}

/// Manual `/ws` upgrade handler.
pub async fn ws_upgrade(State(state): State<Arc<AppState>>, mut req: Request) -> Response {
    let upgrade_ok = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return (StatusCode::BAD_REQUEST, "expected websocket upgrade").into_response();
    }

    let Some(client_key) = req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return (StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key").into_response();
    };

    let accept = accept_token(&client_key);
    let on_upgrade = hyper::upgrade::on(&mut req);
    let server = state.ws.clone();
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => server.run_connection(upgraded).await,
            Err(e) => warn!(error = %e, "websocket upgrade failed"),
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .body(Body::empty())
        .expect("static 101 response")
}
