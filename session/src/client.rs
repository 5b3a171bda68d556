//! Connecting side: resolve a host, try each candidate address, run one
//! session at a time, and retry on a timer.
//!
//! A [`Client`] owns at most one live [`Session`]. When every resolved
//! candidate fails to connect, a retry fires after `connect_retry_delay`;
//! when an established session ends and `auto_reconnect` is set, a new
//! attempt fires after `reconnect_delay`. [`Client::close`] is terminal:
//! once it returns, no attempt runs again, including retries already
//! scheduled.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tokio::time;
use tracing::{debug, info, warn};

use feedline_wire::{ErrorCode, FrameParser};

use crate::session::{
    lock, DisconnectCallback, FrameCallback, Session, SessionHooks, SessionId, SessionOptions,
};
use crate::transport::{connect_tcp, connect_udp, TcpTransport, Transport, UdpTransport};

/// How a client establishes a transport to a candidate address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport type this connector produces.
    type Transport: Transport + 'static;

    /// Establish a transport to one resolved candidate.
    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Transport>;
}

/// Connector producing TCP stream transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpTransport> {
        connect_tcp(addr).await
    }
}

/// Connector producing connected-UDP datagram transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

#[async_trait]
impl Connector for UdpConnector {
    type Transport = UdpTransport;

    async fn connect(&self, addr: SocketAddr) -> io::Result<UdpTransport> {
        connect_udp(addr).await
    }
}

/// Client over TCP.
pub type TcpClient = Client<TcpConnector>;
/// Client over connected UDP.
pub type UdpClient = Client<UdpConnector>;

/// Retry cadence, login payload, and per-session options for a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Sent as the first outbound payload of every new session; empty
    /// skips the login step.
    pub login_payload: Bytes,
    /// Reconnect after an established session ends.
    pub auto_reconnect: bool,
    /// Delay before retrying when no candidate address accepted.
    pub connect_retry_delay: Duration,
    /// Delay before reconnecting after an established session ends.
    pub reconnect_delay: Duration,
    /// Options applied to every session this client creates.
    pub session: SessionOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            login_payload: Bytes::new(),
            auto_reconnect: false,
            connect_retry_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            // Client sessions default to a bounded queue; accepted-side
            // sessions choose their own bound.
            session: SessionOptions {
                send_queue_capacity: 8192,
                ..SessionOptions::default()
            },
        }
    }
}

/// Endpoint, callbacks, and options; snapshotted at each attempt, so
/// changes apply from the next attempt on.
struct ClientConfig {
    host: String,
    port: u16,
    options: ClientOptions,
    parser: Option<Arc<dyn FrameParser>>,
    on_frame: Option<FrameCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

struct Inner<C: Connector> {
    connector: C,
    cfg: Mutex<ClientConfig>,
    session: Mutex<Option<Arc<Session<C::Transport>>>>,
    // Serializes attempts so two never race for the session slot.
    connect_gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    auto_reconnect: AtomicBool,
    next_session_id: AtomicU64,
    attempts: AtomicU64,
}

/// Auto-reconnecting client owning at most one live session.
pub struct Client<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Client<C> {
    /// Create an idle client; nothing connects until [`Client::connect`].
    pub fn new(connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                cfg: Mutex::new(ClientConfig {
                    host: String::new(),
                    port: 0,
                    options: ClientOptions::default(),
                    parser: None,
                    on_frame: None,
                    on_disconnect: None,
                }),
                session: Mutex::new(None),
                connect_gate: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                auto_reconnect: AtomicBool::new(false),
                next_session_id: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Target endpoint; applies from the next attempt.
    pub fn set_endpoint(&self, host: impl Into<String>, port: u16) {
        let mut cfg = lock(&self.inner.cfg);
        cfg.host = host.into();
        cfg.port = port;
    }

    /// Framing and callbacks; applies from the next attempt.
    pub fn set_callback(
        &self,
        parser: Arc<dyn FrameParser>,
        on_frame: FrameCallback,
        on_disconnect: DisconnectCallback,
    ) {
        let mut cfg = lock(&self.inner.cfg);
        cfg.parser = Some(parser);
        cfg.on_frame = Some(on_frame);
        cfg.on_disconnect = Some(on_disconnect);
    }

    /// Retry cadence and session options; applies from the next attempt,
    /// except `auto_reconnect`, which takes effect immediately.
    pub fn set_options(&self, options: ClientOptions) {
        self.inner
            .auto_reconnect
            .store(options.auto_reconnect, Ordering::Release);
        lock(&self.inner.cfg).options = options;
    }

    /// Run one connect attempt now. On failure a retry is scheduled; the
    /// call itself returns after the first round of candidates.
    pub async fn connect(&self) {
        do_connect(self.inner.clone()).await;
    }

    /// Stop the current session, if any. Scheduled retries and
    /// `auto_reconnect` are unaffected.
    pub fn disconnect(&self) {
        if let Some(session) = lock(&self.inner.session).as_ref() {
            if !session.stopped() {
                session.stop();
            }
        }
    }

    /// Terminal stop: after this returns no attempt runs again, even if
    /// a retry was already scheduled.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.auto_reconnect.store(false, Ordering::Release);
        self.disconnect();
    }

    /// Enqueue one payload on the current session.
    ///
    /// [`ErrorCode::SessionNotExist`] when no session was ever
    /// established; the session's own errors otherwise.
    pub fn async_send(&self, data: &[u8]) -> Result<(), ErrorCode> {
        match lock(&self.inner.session).as_ref() {
            Some(session) => session.async_send(data),
            None => Err(ErrorCode::SessionNotExist),
        }
    }

    /// True while an established session is still open.
    pub fn connected(&self) -> bool {
        lock(&self.inner.session)
            .as_ref()
            .is_some_and(|s| !s.stopped())
    }

    /// Identifier of the current session, if one was established.
    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.inner.session).as_ref().map(|s| s.session_id())
    }

    /// Total candidate connect attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.auto_reconnect.store(false, Ordering::Release);
        if let Some(session) = lock(&self.inner.session).as_ref() {
            if !session.stopped() {
                session.stop();
            }
        }
    }
}

/// One full attempt: snapshot the config, stop any previous session,
/// resolve, try candidates, and install the new session.
async fn do_connect<C: Connector>(inner: Arc<Inner<C>>) {
    let _gate = inner.connect_gate.lock().await;
    if inner.closed.load(Ordering::Acquire) {
        return;
    }

    if let Some(old) = lock(&inner.session).take() {
        if !old.stopped() {
            old.stop();
        }
    }

    let (host, port, options, parser, on_frame, on_disconnect) = {
        let cfg = lock(&inner.cfg);
        let (Some(parser), Some(on_frame), Some(on_disconnect)) = (
            cfg.parser.clone(),
            cfg.on_frame.clone(),
            cfg.on_disconnect.clone(),
        ) else {
            warn!("connect before set_callback; nothing to do");
            return;
        };
        (
            cfg.host.clone(),
            cfg.port,
            cfg.options.clone(),
            parser,
            on_frame,
            on_disconnect,
        )
    };

    match try_candidates(&inner, &host, port).await {
        Ok(transport) => {
            let id = inner.next_session_id.fetch_add(1, Ordering::AcqRel) + 1;
            let hooks = SessionHooks {
                on_frame,
                on_disconnect: wrap_disconnect(&inner, on_disconnect, options.reconnect_delay),
            };
            let session = Arc::new(Session::new(
                id,
                transport,
                parser,
                hooks,
                options.session.clone(),
            ));
            info!(
                "connected to {} as session {}",
                session.remote_endpoint(),
                id
            );

            // Install before starting, so the disconnect hook always finds
            // this session in the slot.
            {
                let mut slot = lock(&inner.session);
                if inner.closed.load(Ordering::Acquire) {
                    // Closed while connecting; the session never starts.
                    session.stop();
                    return;
                }
                *slot = Some(session.clone());
            }

            session.start();
            if !options.login_payload.is_empty() {
                if let Err(code) = session.async_send(&options.login_payload) {
                    warn!("login send rejected: {}", code);
                }
            }
        }
        Err(e) => {
            info!("connect to {}:{} failed: {:#}", host, port, e);
            schedule_retry(&inner, options.connect_retry_delay);
        }
    }
}

/// Resolve the endpoint and try each candidate address in order.
async fn try_candidates<C: Connector>(
    inner: &Inner<C>,
    host: &str,
    port: u16,
) -> anyhow::Result<C::Transport> {
    let target = format!("{}:{}", host, port);
    let candidates: Vec<SocketAddr> = lookup_host(&target)
        .await
        .with_context(|| format!("resolve {}", target))?
        .collect();
    if candidates.is_empty() {
        anyhow::bail!("{} resolved to nothing", target);
    }

    let mut last_err = None;
    for addr in candidates {
        inner.attempts.fetch_add(1, Ordering::AcqRel);
        match inner.connector.connect(addr).await {
            Ok(transport) => return Ok(transport),
            Err(e) => {
                debug!("candidate {} refused: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) => Err(anyhow::Error::new(e).context("every candidate refused")),
        None => anyhow::bail!("every candidate refused"),
    }
}

/// Forward the caller's disconnect callback, then schedule a reconnect
/// when one still applies. A session that was already replaced in the
/// slot was stopped deliberately and never triggers a reconnect.
fn wrap_disconnect<C: Connector>(
    inner: &Arc<Inner<C>>,
    user: DisconnectCallback,
    reconnect_delay: Duration,
) -> DisconnectCallback {
    let weak = Arc::downgrade(inner);
    Arc::new(move |session_id, code, message| {
        user(session_id, code, message);
        if let Some(inner) = weak.upgrade() {
            let current = lock(&inner.session).as_ref().map(|s| s.session_id());
            if current == Some(session_id)
                && inner.auto_reconnect.load(Ordering::Acquire)
                && !inner.closed.load(Ordering::Acquire)
            {
                schedule_retry(&inner, reconnect_delay);
            }
        }
    })
}

/// Sleep, then run a fresh attempt unless the client closed or went
/// away in the meantime.
fn schedule_retry<C: Connector>(inner: &Arc<Inner<C>>, delay: Duration) {
    debug!("retrying connect in {:?}", delay);
    let weak: Weak<Inner<C>> = Arc::downgrade(inner);
    tokio::spawn(async move {
        time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            if !inner.closed.load(Ordering::Acquire) {
                do_connect(inner).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_wire::{Buffer, Parse};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;

    fn any_frame_parser() -> Arc<dyn FrameParser> {
        Arc::new(|buf: &Buffer| {
            if buf.is_empty() {
                Parse::incomplete()
            } else {
                Parse::accepted(buf.len(), 0)
            }
        })
    }

    fn wire_client(client: &TcpClient, options: ClientOptions) {
        client.set_callback(
            any_frame_parser(),
            Arc::new(|_, _, _| {}),
            Arc::new(|_, _, _| {}),
        );
        client.set_options(options);
    }

    async fn dead_port() -> u16 {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_retry_timer_keeps_attempting() {
        let client = Client::new(TcpConnector);
        wire_client(
            &client,
            ClientOptions {
                connect_retry_delay: Duration::from_millis(50),
                ..ClientOptions::default()
            },
        );
        client.set_endpoint("127.0.0.1", dead_port().await);

        client.connect().await;
        assert!(!client.connected());
        let first = client.connect_attempts();
        assert!(first >= 1);

        time::sleep(Duration::from_millis(300)).await;
        assert!(
            client.connect_attempts() > first,
            "retry timer never fired"
        );
        client.close();
    }

    #[tokio::test]
    async fn test_close_cancels_scheduled_retry() {
        let client = Client::new(TcpConnector);
        wire_client(
            &client,
            ClientOptions {
                connect_retry_delay: Duration::from_millis(50),
                ..ClientOptions::default()
            },
        );
        client.set_endpoint("127.0.0.1", dead_port().await);

        client.connect().await;
        client.close();
        let at_close = client.connect_attempts();

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            client.connect_attempts(),
            at_close,
            "a retry ran after close"
        );
    }

    #[test]
    fn test_default_session_queue_is_bounded() {
        let options = ClientOptions::default();
        assert_eq!(options.session.send_queue_capacity, 8192);
        assert_eq!(options.connect_retry_delay, Duration::from_secs(5));
        assert_eq!(options.reconnect_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_send_without_session() {
        let client = Client::new(TcpConnector);
        assert_eq!(client.async_send(b"x"), Err(ErrorCode::SessionNotExist));
        assert!(!client.connected());
        assert_eq!(client.session_id(), None);
    }

    #[tokio::test]
    async fn test_connect_without_callback_is_inert() {
        let client = Client::new(TcpConnector);
        client.set_endpoint("127.0.0.1", 1);
        client.connect().await;
        assert_eq!(client.connect_attempts(), 0);
    }
}
