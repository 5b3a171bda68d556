//! Connection and session engine over TCP and UDP.
//!
//! This crate drives framed traffic over a [`Transport`]: a [`Session`]
//! owns one endpoint and runs the receive chain, the outbound queue, the
//! deadline watchdogs, and the heartbeat; an [`Acceptor`] feeds accepted
//! connections to a session factory; a [`Client`] resolves a host, keeps
//! at most one session alive, and reconnects on a timer. Framing itself
//! lives in `feedline-wire` and is supplied by the caller as a
//! [`FrameParser`](feedline_wire::FrameParser).
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedline_session::{Client, ClientOptions, TcpConnector};
//! use feedline_wire::DelimitedParser;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new(TcpConnector);
//!     client.set_endpoint("feed.example.net", 9000);
//!     client.set_callback(
//!         Arc::new(DelimitedParser),
//!         Arc::new(|session, _kind, frame| {
//!             println!("session {} got {} bytes", session, frame.len());
//!         }),
//!         Arc::new(|session, code, message| {
//!             println!("session {} ended: {} ({})", session, message, code);
//!         }),
//!     );
//!     client.set_options(ClientOptions {
//!         auto_reconnect: true,
//!         ..ClientOptions::default()
//!     });
//!     client.connect().await;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acceptor;
pub mod client;
pub mod session;
pub mod transport;

pub use acceptor::{AcceptCallback, Acceptor};
pub use client::{
    Client, ClientOptions, Connector, TcpClient, TcpConnector, UdpClient, UdpConnector,
};
pub use session::{
    DisconnectCallback, FrameCallback, Session, SessionHooks, SessionId, SessionOptions,
    SessionStats, TcpSession, UdpSession,
};
pub use transport::{
    connect_tcp, connect_udp, listen_tcp, MemoryTransport, TcpTransport, Transport, UdpTransport,
};
