//! Listening side: accept connections forever and hand each transport to
//! a caller factory.
//!
//! The acceptor owns only the listening handle. The factory constructs,
//! configures, and starts a session for each accepted transport; sessions
//! already running are unaffected by [`Acceptor::stop`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::lookup_host;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::transport::{listen_tcp, TcpTransport};

/// Factory invoked for every accepted transport.
pub type AcceptCallback = Arc<dyn Fn(TcpTransport) + Send + Sync>;

/// TCP accept loop feeding a session factory.
pub struct Acceptor {
    host: String,
    port: u16,
    factory: AcceptCallback,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl Acceptor {
    /// Create an acceptor for `host:port`; nothing is bound until
    /// [`Acceptor::start`].
    pub fn new(host: impl Into<String>, port: u16, factory: AcceptCallback) -> Self {
        Self {
            host: host.into(),
            port,
            factory,
            shutdown: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolve, bind, listen, and spawn the accept loop. Returns the
    /// bound local address (useful with port 0).
    pub async fn start(&self) -> io::Result<SocketAddr> {
        let target = format!("{}:{}", self.host, self.port);
        let addr = lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"))?;

        let listener = listen_tcp(addr).await?;
        let local = listener.local_addr()?;
        info!("listening on {}", local);

        let factory = self.factory.clone();
        let shutdown = self.shutdown.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            loop {
                if closed.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            info!("accepted connection from {}", peer);
                            factory(TcpTransport::new(stream));
                        }
                        Err(e) => {
                            // Accept errors are transient; keep listening.
                            warn!("accept failed: {}", e);
                        }
                    },
                }
            }
            info!("acceptor on {} stopped", local);
        });

        Ok(local)
    }

    /// Close the listening handle; sessions already running are
    /// unaffected. Idempotent, and effective even before `start`.
    pub fn stop(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}
