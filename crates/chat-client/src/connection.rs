//! Push channel: one long-lived bidirectional link per session.
//!
//! [`ConnectionManager`] owns the link lifecycle and the outbound queue.
//! The wire side lives behind [`PushTransport`] so the runtime can be driven
//! by an in-memory transport in tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chat_core::{
    ChatError, ChatErrorCategory, OutboundSignal, PushEvent, RetryPolicy, UserId,
    decode_push_frame, encode_outbound,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

const OUTBOUND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 512;

/// Everything a transport needs to serve one session.
///
/// Implementations must send `PresenceAnnounce { session_user_id }` as the
/// first frame of every successful connect, flip `connected` while a link is
/// up, and report `Connected`/`Disconnected` through `inbound_tx`.
pub struct PushLink {
    pub session_user_id: UserId,
    pub outbound_rx: mpsc::Receiver<OutboundSignal>,
    pub inbound_tx: mpsc::Sender<PushEvent>,
    pub stop: CancellationToken,
    pub connected: Arc<AtomicBool>,
}

impl PushLink {
    /// Drop outbound frames queued while the link went down.
    pub fn discard_pending_outbound(&mut self) -> usize {
        let mut discarded = 0;
        while self.outbound_rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Serve `link` until `link.stop` is cancelled or the runtime goes away.
    async fn run(&self, link: PushLink);
}

struct ActiveLink {
    outbound_tx: mpsc::Sender<OutboundSignal>,
    stop: CancellationToken,
    connected: Arc<AtomicBool>,
}

pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    active: Option<ActiveLink>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            transport,
            active: None,
        }
    }

    /// Start a link for `user_id`, replacing any previous one. Returns the
    /// stream of typed push events for that link.
    pub fn connect(&mut self, user_id: UserId) -> mpsc::Receiver<PushEvent> {
        self.disconnect();

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let stop = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));

        let link = PushLink {
            session_user_id: user_id,
            outbound_rx,
            inbound_tx,
            stop: stop.child_token(),
            connected: connected.clone(),
        };
        let transport = self.transport.clone();
        tokio::spawn(async move {
            transport.run(link).await;
        });

        info!(user_id, "push link started");
        self.active = Some(ActiveLink {
            outbound_tx,
            stop,
            connected,
        });
        inbound_rx
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|link| link.connected.load(Ordering::SeqCst))
    }

    /// Queue one outbound signal. Fails fast while the link is down.
    pub fn send(&self, signal: OutboundSignal) -> Result<(), ChatError> {
        let Some(link) = self.active.as_ref() else {
            return Err(ChatError::channel_disconnected());
        };
        if !link.connected.load(Ordering::SeqCst) {
            return Err(ChatError::channel_disconnected());
        }
        link.outbound_tx.try_send(signal).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ChatError::new(
                ChatErrorCategory::Network,
                "outbound_queue_full",
                "too many frames waiting to be sent",
            ),
            mpsc::error::TrySendError::Closed(_) => ChatError::channel_disconnected(),
        })
    }

    /// Tear the link down. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.active.take() {
            link.connected.store(false, Ordering::SeqCst);
            link.stop.cancel();
            info!("push link stopped");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// WebSocket transport with exponential reconnect backoff.
pub struct WebSocketTransport {
    url: Url,
    retry: RetryPolicy,
}

enum LinkEnd {
    Stopped,
    Lost(String),
}

impl WebSocketTransport {
    pub fn new(url: Url, retry: RetryPolicy) -> Self {
        Self { url, retry }
    }

    async fn serve<S>(&self, link: &mut PushLink, ws: S) -> LinkEnd
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
    {
        let (mut write, mut read) = ws.split();

        let announce = match encode_outbound(OutboundSignal::PresenceAnnounce {
            user_id: link.session_user_id,
        }) {
            Ok(text) => text,
            Err(err) => return LinkEnd::Lost(err.message),
        };
        if let Err(err) = write.send(WsMessage::Text(announce.into())).await {
            return LinkEnd::Lost(format!("presence announce failed: {err}"));
        }

        link.connected.store(true, Ordering::SeqCst);
        if link.inbound_tx.send(PushEvent::Connected).await.is_err() {
            return LinkEnd::Stopped;
        }

        loop {
            tokio::select! {
                _ = link.stop.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return LinkEnd::Stopped;
                }
                outbound = link.outbound_rx.recv() => {
                    let Some(signal) = outbound else {
                        return LinkEnd::Stopped;
                    };
                    match encode_outbound(signal) {
                        Ok(text) => {
                            if let Err(err) = write.send(WsMessage::Text(text.into())).await {
                                return LinkEnd::Lost(format!("send failed: {err}"));
                            }
                        }
                        Err(err) => warn!(code = %err.code, "dropping unencodable outbound frame"),
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match decode_push_frame(&text) {
                        Ok(event) => {
                            if link.inbound_tx.send(event).await.is_err() {
                                return LinkEnd::Stopped;
                            }
                        }
                        Err(err) => warn!(code = %err.code, error = %err.message, "dropping push frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) => return LinkEnd::Lost("closed by server".to_owned()),
                    Some(Ok(other)) => trace!(?other, "ignoring non-text frame"),
                    Some(Err(err)) => return LinkEnd::Lost(err.to_string()),
                    None => return LinkEnd::Lost("stream ended".to_owned()),
                },
            }
        }
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn run(&self, mut link: PushLink) {
        let mut backoff = self.retry.backoff();

        loop {
            let connect = tokio::select! {
                _ = link.stop.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            let reason = match connect {
                Ok((ws, _response)) => {
                    debug!(url = %self.url, "push channel connected");
                    backoff.reset();
                    match self.serve(&mut link, ws).await {
                        LinkEnd::Stopped => break,
                        LinkEnd::Lost(reason) => reason,
                    }
                }
                Err(err) => format!("connect failed: {err}"),
            };

            link.connected.store(false, Ordering::SeqCst);
            let discarded = link.discard_pending_outbound();
            let delay = backoff.next_delay();
            warn!(
                reason = %reason,
                discarded,
                retry_in_ms = delay.as_millis() as u64,
                "push channel down"
            );

            let disconnected = PushEvent::Disconnected {
                reason,
                retry_in_ms: Some(delay.as_millis() as u64),
            };
            if link.inbound_tx.send(disconnected).await.is_err() {
                break;
            }

            tokio::select! {
                _ = link.stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        link.connected.store(false, Ordering::SeqCst);
        debug!("push transport exited");
    }
}

/// Derive the push endpoint from the REST base URL (`http → ws`,
/// `https → wss`, path `/ws`).
pub fn push_url_for(server_url: &Url) -> Result<Url, ChatError> {
    let scheme = match server_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_server_url",
                format!("unsupported scheme '{other}'"),
            ));
        }
    };
    let mut push_url = server_url.clone();
    push_url.set_path("/ws");
    push_url.set_query(None);
    push_url.set_fragment(None);
    push_url.set_scheme(scheme).map_err(|_| {
        ChatError::new(
            ChatErrorCategory::Config,
            "invalid_server_url",
            format!("cannot derive push url from '{server_url}'"),
        )
    })?;
    Ok(push_url)
}
