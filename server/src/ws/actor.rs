//! One WebSocket endpoint: a reader task and a writer task around a bounded
//! outbound queue, with at most one peer.
//!
//! The reader forwards every inbound frame to the peer's queue and is the
//! single point of pair teardown: when it exits, it cancels both its own
//! actor and the peer. The writer drains the queue to the socket, coalescing
//! whatever is buffered into one newline-separated text frame, and emits
//! periodic pings. A full peer queue is terminal: the slow endpoint is
//! dropped rather than blocking the relay.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;
use crate::ws::pool::WorkerPool;
use crate::ws::{NO_PEER, PEER_DIED};

pub struct Actor {
    addr: SocketAddr,
    route: Option<String>,
    /// Present on clients; consulted for lazy matching on the first frame.
    pool: Option<Arc<WorkerPool>>,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
    /// Weak so that a pair does not keep itself alive. Assigned only by
    /// `WorkerPool::match_with`, under the pool lock.
    peer: Mutex<Option<Weak<Actor>>>,
}

impl Actor {
    pub fn new(
        addr: SocketAddr,
        route: Option<String>,
        pool: Option<Arc<WorkerPool>>,
        queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let actor = Arc::new(Self {
            addr,
            route,
            pool,
            tx,
            closed: CancellationToken::new(),
            peer: Mutex::new(None),
        });
        (actor, rx)
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn peer(&self) -> Option<Arc<Actor>> {
        let peer = self.peer.lock().expect("peer lock poisoned");
        peer.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_peer(&self, peer: &Arc<Actor>) {
        let mut slot = self.peer.lock().expect("peer lock poisoned");
        *slot = Some(Arc::downgrade(peer));
    }

    /// Non-blocking enqueue onto the outbound queue; false means the queue
    /// is full or its writer is gone.
    pub fn enqueue(&self, payload: &str) -> bool {
        self.tx.try_send(payload.to_string()).is_ok()
    }

    /// Signal teardown; the writer answers with a Close frame and both
    /// tasks exit. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Run a UI client session: spawn the writer, read until the connection
/// dies, then tear down the pair.
pub async fn run_client(socket: WebSocket, state: AppState, route: String, addr: SocketAddr) {
    let conf = &state.conf.client_web_socket;
    let (sink, stream) = socket.split();
    let (actor, rx) = Actor::new(
        addr,
        Some(route.clone()),
        Some(Arc::clone(&state.workers)),
        conf.message_queue_size,
    );

    tracing::debug!(addr = %addr, route = %route, "client joined");

    let writer = tokio::spawn(write_loop(
        Arc::clone(&actor),
        sink,
        rx,
        conf.write_timeout(),
        conf.ping_interval(),
    ));
    read_loop(Arc::clone(&actor), stream, conf.pong_timeout()).await;
    let _ = writer.await;

    tracing::debug!(addr = %addr, route = %route, "client left");
}

/// Run a worker session: deposit the worker in the pool, spawn the writer,
/// read until the connection dies. A worker that was never matched is
/// evicted from the pool on the way out.
pub async fn run_worker(socket: WebSocket, state: AppState, route: String, addr: SocketAddr) {
    let conf = &state.conf.bot_web_socket;
    let (sink, stream) = socket.split();
    let (actor, rx) = Actor::new(addr, Some(route.clone()), None, conf.message_queue_size);

    state.workers.put(&route, Arc::clone(&actor));
    tracing::debug!(addr = %addr, route = %route, "worker joined");

    let writer = tokio::spawn(write_loop(
        Arc::clone(&actor),
        sink,
        rx,
        conf.write_timeout(),
        conf.ping_interval(),
    ));
    read_loop(Arc::clone(&actor), stream, conf.pong_timeout()).await;

    if actor.peer().is_none() {
        state.workers.evict(&route, &actor);
    }
    let _ = writer.await;

    tracing::debug!(addr = %addr, route = %route, "worker left");
}

/// Read frames until error, close, or silence outlasting `pong_timeout`.
/// Every inbound frame, pongs included, extends the deadline.
async fn read_loop(actor: Arc<Actor>, mut stream: SplitStream<WebSocket>, pong_timeout: Duration) {
    loop {
        let message = tokio::select! {
            _ = actor.closed.cancelled() => break,
            read = tokio::time::timeout(pong_timeout, stream.next()) => match read {
                Err(_) => {
                    tracing::debug!(addr = %actor.addr, "read deadline lapsed");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    tracing::warn!(addr = %actor.addr, error = %err, "read failed");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            },
        };

        let payload = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            // pongs only refresh the deadline; the transport answers pings
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        let mut peer = actor.peer();
        if peer.is_none() {
            if let Some(pool) = &actor.pool {
                if pool.match_with(&actor) {
                    peer = actor.peer();
                }
            }
        }

        let Some(peer) = peer else {
            if actor.pool.is_some() {
                // nobody is waiting on this route; tell the client in-band
                let _ = actor.enqueue(NO_PEER);
            } else {
                tracing::trace!(addr = %actor.addr, "dropping frame from unmatched worker");
            }
            continue;
        };

        if !peer.enqueue(&payload) {
            tracing::debug!(addr = %actor.addr, peer = %peer.addr, "peer queue overflow");
            peer.close();
            let _ = actor.enqueue(PEER_DIED);
            break;
        }
    }

    // sole teardown point for the pair
    actor.close();
    if let Some(peer) = actor.peer() {
        peer.close();
    }
}

/// Drain the outbound queue to the socket, pinging at `ping_interval` and
/// bounding every write by `write_timeout`.
async fn write_loop(
    actor: Arc<Actor>,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    write_timeout: Duration,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(first) => {
                    let frame = coalesce(first, &mut rx);
                    if send(&mut sink, Message::Text(frame.into()), write_timeout).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = send(&mut sink, Message::Close(None), write_timeout).await;
                    break;
                }
            },
            _ = actor.closed.cancelled() => {
                // flush what is already buffered (a peer-died notice may
                // have just landed), then say goodbye
                if let Ok(first) = rx.try_recv() {
                    let frame = coalesce(first, &mut rx);
                    let _ = send(&mut sink, Message::Text(frame.into()), write_timeout).await;
                }
                let _ = send(&mut sink, Message::Close(None), write_timeout).await;
                break;
            }
            _ = ping.tick() => {
                if send(&mut sink, Message::Ping(Vec::new().into()), write_timeout).await.is_err() {
                    break;
                }
            }
        }
    }

    actor.close(); // wake the reader if the write path died first
    let _ = sink.close().await;
}

/// Append whatever is currently buffered to `first`, newline-separated,
/// producing one text frame. The drain is bounded by the queue length
/// observed once, so a racing producer cannot extend it.
fn coalesce(first: String, rx: &mut mpsc::Receiver<String>) -> String {
    let mut frame = first;
    let buffered = rx.len();
    for _ in 0..buffered {
        match rx.try_recv() {
            Ok(next) => {
                frame.push('\n');
                frame.push_str(&next);
            }
            Err(_) => break,
        }
    }
    frame
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_timeout: Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(write_timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}
