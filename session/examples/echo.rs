//! Echo server and client on one loopback port.
//!
//! The acceptor wraps every accepted connection in a session that echoes
//! each delimited frame back; the client connects, sends a few frames,
//! and prints what comes back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time;
use tracing::{info, warn};

use feedline_session::{
    Acceptor, Client, ClientOptions, Session, SessionHooks, SessionOptions, TcpConnector,
    TcpSession, TcpTransport,
};
use feedline_wire::DelimitedParser;

fn echo_server_factory() -> Arc<dyn Fn(TcpTransport) + Send + Sync> {
    let next_id = Arc::new(AtomicU64::new(0));
    let sessions: Arc<Mutex<Vec<Arc<TcpSession>>>> = Arc::new(Mutex::new(Vec::new()));

    Arc::new(move |transport| {
        let id = next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let slot: Arc<Mutex<Option<Arc<TcpSession>>>> = Arc::new(Mutex::new(None));

        let echo_slot = slot.clone();
        let hooks = SessionHooks {
            on_frame: Arc::new(move |session, _kind, frame| {
                if let Some(s) = echo_slot.lock().unwrap().as_ref() {
                    if let Err(code) = s.async_send(frame) {
                        warn!("session {} echo rejected: {}", session, code);
                    }
                }
            }),
            on_disconnect: Arc::new(|session, _code, message| {
                info!("server session {} ended: {}", session, message);
            }),
        };

        let session = Arc::new(Session::new(
            id,
            transport,
            Arc::new(DelimitedParser),
            hooks,
            SessionOptions::default(),
        ));
        *slot.lock().unwrap() = Some(session.clone());
        session.start();
        sessions.lock().unwrap().push(session);
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let acceptor = Acceptor::new("127.0.0.1", 0, echo_server_factory());
    let addr = acceptor.start().await?;

    let client = Client::new(TcpConnector);
    client.set_endpoint("127.0.0.1", addr.port());
    client.set_callback(
        Arc::new(DelimitedParser),
        Arc::new(|_session, _kind, frame| {
            info!("echoed back: {:?}", String::from_utf8_lossy(DelimitedParser::body(frame)));
        }),
        Arc::new(|session, _code, message| {
            info!("client session {} ended: {}", session, message);
        }),
    );
    client.set_options(ClientOptions {
        login_payload: DelimitedParser::encode(b"hello")?,
        ..ClientOptions::default()
    });
    client.connect().await;

    for word in ["one", "two", "three"] {
        let frame = DelimitedParser::encode(word.as_bytes())?;
        if let Err(code) = client.async_send(&frame) {
            warn!("send failed: {}", code);
        }
        time::sleep(Duration::from_millis(100)).await;
    }

    time::sleep(Duration::from_millis(300)).await;
    client.close();
    acceptor.stop();
    Ok(())
}
