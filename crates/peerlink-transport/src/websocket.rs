//! Supervised websocket connection for a live session.
//!
//! One background task owns the socket. It reconnects after a fixed delay
//! whenever the socket closes or cannot be opened, probes liveness with
//! pings, and hands every inbound text frame to the [`ClientContext`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peerlink_core::{ClientContext, ClientId, StreamLink};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Timing knobs for the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    /// Pause between a close (or failed connect) and the next attempt.
    pub retry_delay: Duration,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// How long to wait for a pong before treating the socket as dead.
    pub ping_timeout: Duration,
    /// Upper bound on [`StreamLink::close`].
    pub stop_timeout: Duration,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Streaming endpoint for `session_id`, derived from the control-plane base.
///
/// `http` becomes `ws` and `https` becomes `wss`.
#[must_use]
pub fn stream_url(base_url: &str, session_id: &str, client: &ClientId) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/sessions/{session_id}/ws?client_uuid={client}")
}

/// Outbound side of the live socket, shared with callers of `send_frame`.
#[derive(Default)]
struct LinkShared {
    open: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl LinkShared {
    fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.outbound.lock() = Some(tx);
        self.open.store(true, Ordering::Release);
    }

    fn detach(&self) {
        self.open.store(false, Ordering::Release);
        self.outbound.lock().take();
    }

    fn send(&self, frame: String) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        self.outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

struct Worker {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns at most one supervised connection at a time.
pub struct ConnectionSupervisor {
    ctx: Arc<ClientContext>,
    base_url: String,
    policy: LinkPolicy,
    shared: Arc<LinkShared>,
    worker: Mutex<Option<Worker>>,
}

impl ConnectionSupervisor {
    #[must_use]
    pub fn new(ctx: Arc<ClientContext>, base_url: &str, policy: LinkPolicy) -> Self {
        Self {
            ctx,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            shared: Arc::new(LinkShared::default()),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &LinkPolicy {
        &self.policy
    }

    /// Session the running worker serves, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.worker
            .lock()
            .as_ref()
            .filter(|worker| !worker.handle.is_finished())
            .map(|worker| worker.session_id.clone())
    }
}

#[async_trait]
impl StreamLink for ConnectionSupervisor {
    fn open(&self, session_id: &str) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            tracing::debug!(session_id, "stream already supervised");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(session_id, "cannot open stream outside a tokio runtime");
            return;
        };

        let url = stream_url(&self.base_url, session_id, self.ctx.identity());
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(supervise(
            Arc::clone(&self.ctx),
            Arc::clone(&self.shared),
            url,
            self.policy,
            cancel.clone(),
        ));

        tracing::info!(session_id, "stream supervision started");
        *worker = Some(Worker {
            session_id: session_id.to_string(),
            cancel,
            handle,
        });
    }

    async fn close(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };

        worker.cancel.cancel();
        let abort = worker.handle.abort_handle();
        if tokio::time::timeout(self.policy.stop_timeout, worker.handle)
            .await
            .is_err()
        {
            tracing::warn!(
                session_id = %worker.session_id,
                "stream worker did not stop in time; aborting"
            );
            abort.abort();
        }

        self.shared.detach();
        tracing::info!(session_id = %worker.session_id, "stream supervision stopped");
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn send_frame(&self, frame: String) -> bool {
        self.shared.send(frame)
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

/// Connect, serve, and retry until cancelled.
async fn supervise(
    ctx: Arc<ClientContext>,
    shared: Arc<LinkShared>,
    url: String,
    policy: LinkPolicy,
    cancel: CancellationToken,
) {
    loop {
        let connect = tokio::select! {
            () = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connect {
            Ok((socket, _)) => {
                tracing::info!(%url, "stream connected");
                run_connection(&ctx, &shared, socket, policy, &cancel).await;
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "stream connect failed");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(policy.retry_delay) => {
                tracing::debug!(%url, "retrying stream connection");
            }
        }
    }
    tracing::debug!(%url, "stream supervisor exiting");
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Serve one open socket until it closes, fails, or is cancelled.
async fn run_connection(
    ctx: &ClientContext,
    shared: &LinkShared,
    socket: Socket,
    policy: LinkPolicy,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Replayed config goes out ahead of anything queued by callers.
    for frame in ctx.replay_frames() {
        let _ = tx.send(frame);
    }
    shared.attach(tx);
    ctx.stream_opened();

    let mut ping = tokio::time::interval_at(
        Instant::now() + policy.ping_interval,
        policy.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(frame) = rx.recv() => {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "stream send failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    tracing::warn!(error = %e, "stream ping failed");
                    break;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + policy.ping_timeout);
                }
            }
            () = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                tracing::warn!(timeout = ?policy.ping_timeout, "no pong received; closing stream");
                break;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    ctx.handle_frame(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        ctx.handle_frame(text);
                    }
                    Err(_) => tracing::debug!("discarding non-utf8 binary frame"),
                },
                Some(Ok(Message::Pong(_))) => pong_deadline = None,
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "stream closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "stream read failed");
                    break;
                }
                None => break,
            },
        }
    }

    shared.detach();
    ctx.stream_closed();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_upgrades_scheme() {
        let client = ClientId::new("c-1");
        assert_eq!(
            stream_url("https://vrtrainer.online/", "s-abc", &client),
            "wss://vrtrainer.online/sessions/s-abc/ws?client_uuid=c-1"
        );
        assert_eq!(
            stream_url("http://127.0.0.1:8080", "s-abc", &client),
            "ws://127.0.0.1:8080/sessions/s-abc/ws?client_uuid=c-1"
        );
        assert_eq!(
            stream_url("ws://host", "x", &client),
            "ws://host/sessions/x/ws?client_uuid=c-1"
        );
    }

    #[test]
    fn test_default_policy() {
        let policy = LinkPolicy::default();
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert_eq!(policy.ping_interval, Duration::from_secs(20));
        assert_eq!(policy.ping_timeout, Duration::from_secs(5));
        assert_eq!(policy.stop_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_shared_send_requires_attached_channel() {
        let shared = LinkShared::default();
        assert!(!shared.send("x".into()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.attach(tx);
        assert!(shared.send("hello".into()));
        assert_eq!(rx.try_recv().unwrap(), "hello");

        shared.detach();
        assert!(!shared.send("late".into()));
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let ctx = Arc::new(ClientContext::new(peerlink_core::Role::Leader, "a"));
        let link = ConnectionSupervisor::new(ctx, "http://127.0.0.1:1", LinkPolicy::default());
        link.close().await;
        assert!(!link.is_open());
        assert_eq!(link.session_id(), None);
    }
}
