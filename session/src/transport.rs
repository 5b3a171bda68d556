//! Transport capability abstraction over stream and datagram sockets.
//!
//! A [`Transport`] is the minimal endpoint surface a session drives: one
//! read, one write, and the two addresses. The same session logic runs
//! over TCP byte streams, connected UDP sockets, and the in-memory pipe
//! used by tests.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Minimal endpoint capability a session drives.
///
/// `recv` returning `Ok(0)` on a stream transport means the peer closed
/// the connection. `send` may transfer a prefix; the caller continues
/// with the remainder.
#[async_trait]
pub trait Transport: Send {
    /// Read available bytes into `buf`.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes from `buf`, returning how many were transferred.
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Local socket address, when the endpoint has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Remote socket address, when the endpoint has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// TCP byte-stream transport.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an established TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

/// Connected-UDP datagram transport; one datagram per `recv`/`send`.
///
/// A datagram longer than the receive window is truncated by the socket;
/// an empty datagram is indistinguishable from a stream close and ends
/// the session.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Wrap a UDP socket already connected to its peer.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket.peer_addr().ok()
    }
}

/// In-memory pipe transport over [`tokio::io::duplex`], for tests and
/// loopback wiring.
pub struct MemoryTransport {
    pipe: DuplexStream,
}

impl MemoryTransport {
    /// Wrap one end of a duplex pipe.
    pub fn new(pipe: DuplexStream) -> Self {
        Self { pipe }
    }

    /// A connected pair of memory transports with the given pipe capacity.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        (Self::new(a), Self::new(b))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pipe.read(buf).await
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipe.write(buf).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Create a TCP listener bound to the given address.
pub async fn listen_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect a TCP transport to the given address.
pub async fn connect_tcp(addr: SocketAddr) -> io::Result<TcpTransport> {
    Ok(TcpTransport::new(TcpStream::connect(addr).await?))
}

/// Bind an ephemeral UDP socket and connect it to the given peer.
pub async fn connect_udp(addr: SocketAddr) -> io::Result<UdpTransport> {
    let bind_addr: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().map_err(|_| io::ErrorKind::InvalidInput)?
    } else {
        "[::]:0".parse().map_err(|_| io::ErrorKind::InvalidInput)?
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    Ok(UdpTransport::new(socket))
}
