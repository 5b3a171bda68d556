//! Acceptor, client, and session wired together over loopback sockets.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{self, timeout};

use feedline_session::{
    Acceptor, Client, ClientOptions, Session, SessionHooks, SessionOptions, TcpConnector,
    TcpSession, TcpTransport, UdpConnector,
};
use feedline_wire::DelimitedParser;

async fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) {
    timeout(deadline, async {
        while !done() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Factory building echo sessions: every frame received goes straight
/// back out on the same session.
fn echo_factory(
    server_frames: Arc<Mutex<Vec<Vec<u8>>>>,
    sessions: Arc<Mutex<Vec<Arc<TcpSession>>>>,
) -> Arc<dyn Fn(TcpTransport) + Send + Sync> {
    let next_id = Arc::new(AtomicU64::new(0));
    Arc::new(move |transport| {
        let id = next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let slot: Arc<Mutex<Option<Arc<TcpSession>>>> = Arc::new(Mutex::new(None));

        let echo_slot = slot.clone();
        let frames = server_frames.clone();
        let hooks = SessionHooks {
            on_frame: Arc::new(move |_session, _kind, frame| {
                frames
                    .lock()
                    .unwrap()
                    .push(DelimitedParser::body(frame).to_vec());
                if let Some(s) = echo_slot.lock().unwrap().as_ref() {
                    let _ = s.async_send(frame);
                }
            }),
            on_disconnect: Arc::new(|_, _, _| {}),
        };

        let session = Arc::new(Session::new(
            id,
            transport,
            Arc::new(DelimitedParser),
            hooks,
            SessionOptions {
                heartbeat_interval: Duration::ZERO,
                ..SessionOptions::default()
            },
        ));
        *slot.lock().unwrap() = Some(session.clone());
        session.start();
        sessions.lock().unwrap().push(session);
    })
}

#[tokio::test]
async fn test_tcp_login_then_echo_roundtrip() {
    let server_frames = Arc::new(Mutex::new(Vec::new()));
    let sessions = Arc::new(Mutex::new(Vec::new()));
    let acceptor = Acceptor::new(
        "127.0.0.1",
        0,
        echo_factory(server_frames.clone(), sessions.clone()),
    );
    let addr = acceptor.start().await.unwrap();

    let client_frames = Arc::new(Mutex::new(Vec::new()));
    let client = Client::new(TcpConnector);
    client.set_endpoint("127.0.0.1", addr.port());
    let client_frames_cb = client_frames.clone();
    client.set_callback(
        Arc::new(DelimitedParser),
        Arc::new(move |_session, _kind, frame| {
            client_frames_cb
                .lock()
                .unwrap()
                .push(DelimitedParser::body(frame).to_vec());
        }),
        Arc::new(|_, _, _| {}),
    );
    client.set_options(ClientOptions {
        login_payload: DelimitedParser::encode(b"login").unwrap(),
        ..ClientOptions::default()
    });

    client.connect().await;
    assert!(client.connected());
    assert_eq!(client.session_id(), Some(1));

    // The login payload is the first frame the server sees.
    wait_for(Duration::from_secs(2), || {
        !server_frames.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(server_frames.lock().unwrap()[0], b"login");

    let frame = DelimitedParser::encode(b"marco").unwrap();
    client.async_send(&frame).unwrap();
    wait_for(Duration::from_secs(2), || {
        client_frames.lock().unwrap().len() >= 2
    })
    .await;
    let got = client_frames.lock().unwrap().clone();
    assert_eq!(got[0], b"login", "login echoed first");
    assert_eq!(got[1], b"marco");

    client.close();
    acceptor.stop();
}

#[tokio::test]
async fn test_client_reconnects_after_server_drop() {
    let disconnects = Arc::new(AtomicUsize::new(0));
    let accepted = Arc::new(AtomicUsize::new(0));

    // Factory that drops every transport immediately, so each established
    // session ends as soon as the client notices the close.
    let accepted_cb = accepted.clone();
    let acceptor = Acceptor::new(
        "127.0.0.1",
        0,
        Arc::new(move |transport| {
            accepted_cb.fetch_add(1, Ordering::SeqCst);
            drop(transport);
        }),
    );
    let addr = acceptor.start().await.unwrap();

    let client = Client::new(TcpConnector);
    client.set_endpoint("127.0.0.1", addr.port());
    let disconnects_cb = disconnects.clone();
    client.set_callback(
        Arc::new(DelimitedParser),
        Arc::new(|_, _, _| {}),
        Arc::new(move |_, _, _| {
            disconnects_cb.fetch_add(1, Ordering::SeqCst);
        }),
    );
    client.set_options(ClientOptions {
        auto_reconnect: true,
        reconnect_delay: Duration::from_millis(50),
        ..ClientOptions::default()
    });

    client.connect().await;
    wait_for(Duration::from_secs(3), || {
        disconnects.load(Ordering::SeqCst) >= 2
    })
    .await;
    assert!(accepted.load(Ordering::SeqCst) >= 2, "no reconnect happened");

    client.close();
    let settled = disconnects.load(Ordering::SeqCst);
    time::sleep(Duration::from_millis(300)).await;
    // Closing stops the reconnect cycle; at most the in-flight attempt
    // can still land.
    assert!(disconnects.load(Ordering::SeqCst) <= settled + 1);
    acceptor.stop();
}

#[tokio::test]
async fn test_udp_datagram_session_roundtrip() {
    // Plain socket standing in for a UDP peer that echoes one datagram.
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((n, from)) = server.recv_from(&mut buf).await else {
                break;
            };
            let _ = server.send_to(&buf[..n], from).await;
        }
    });

    let frames = Arc::new(Mutex::new(Vec::new()));
    let client = Client::<UdpConnector>::new(UdpConnector);
    client.set_endpoint("127.0.0.1", server_addr.port());
    let frames_cb = frames.clone();
    client.set_callback(
        Arc::new(DelimitedParser),
        Arc::new(move |_session, _kind, frame| {
            frames_cb
                .lock()
                .unwrap()
                .push(DelimitedParser::body(frame).to_vec());
        }),
        Arc::new(|_, _, _| {}),
    );
    client.set_options(ClientOptions {
        session: SessionOptions {
            heartbeat_interval: Duration::ZERO,
            ..SessionOptions::default()
        },
        ..ClientOptions::default()
    });

    client.connect().await;
    assert!(client.connected());

    let frame = DelimitedParser::encode(b"datagram").unwrap();
    client.async_send(&frame).unwrap();
    wait_for(Duration::from_secs(2), || !frames.lock().unwrap().is_empty()).await;
    assert_eq!(frames.lock().unwrap()[0], b"datagram");

    client.close();
}

#[tokio::test]
async fn test_session_survives_heartbeats_both_ways() {
    let sessions = Arc::new(Mutex::new(Vec::new()));
    let server_frames = Arc::new(Mutex::new(Vec::new()));
    let acceptor = Acceptor::new(
        "127.0.0.1",
        0,
        echo_factory(server_frames, sessions.clone()),
    );
    let addr = acceptor.start().await.unwrap();

    let client_disconnects = Arc::new(AtomicUsize::new(0));
    let client = Client::new(TcpConnector);
    client.set_endpoint("127.0.0.1", addr.port());
    let disconnects_cb = client_disconnects.clone();
    client.set_callback(
        Arc::new(DelimitedParser),
        Arc::new(|_, _, _| {}),
        Arc::new(move |_, _, _| {
            disconnects_cb.fetch_add(1, Ordering::SeqCst);
        }),
    );
    client.set_options(ClientOptions {
        session: SessionOptions {
            recv_timeout: Duration::from_millis(400),
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_payload: DelimitedParser::encode(b"hb").unwrap(),
            ..SessionOptions::default()
        },
        ..ClientOptions::default()
    });

    client.connect().await;
    assert!(client.connected());

    // Heartbeats get echoed back, which keeps the receive watchdog fed.
    time::sleep(Duration::from_millis(900)).await;
    assert!(client.connected(), "heartbeat did not keep the session up");
    assert_eq!(client_disconnects.load(Ordering::SeqCst), 0);

    client.close();
    acceptor.stop();
}
