//! The session state machine: one transport endpoint, framed receive
//! dispatch, a bounded outbound queue, deadline watchdogs, and heartbeat.
//!
//! A session moves through constructed → running → stopping → stopped and
//! never restarts; a new attempt means a new session. [`Session::start`]
//! hands the transport to a driver task that owns all I/O: the receive
//! chain reads into the session's [`Buffer`] and feeds the caller's
//! [`FrameParser`], the send chain drains the outbound queue, and the
//! watchdogs force the transport closed when a deadline passes. Whichever
//! chain first observes the closed transport runs the single teardown
//! sequence, so the disconnect callback fires at most once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};

use feedline_wire::{Buffer, ErrorCode, FrameParser, Verdict, MAX_PACK_SIZE};

use crate::transport::Transport;

/// Session identifier, unique within the owning acceptor or client.
pub type SessionId = u64;

/// Per-frame callback: `(session_id, frame_kind, frame_bytes)`.
pub type FrameCallback = Arc<dyn Fn(SessionId, i32, &[u8]) + Send + Sync>;

/// Disconnect callback: `(session_id, reason, message)`; fires at most
/// once per session.
pub type DisconnectCallback = Arc<dyn Fn(SessionId, ErrorCode, &str) + Send + Sync>;

/// The two callbacks a session dispatches into.
#[derive(Clone)]
pub struct SessionHooks {
    /// Invoked synchronously for every accepted frame.
    pub on_frame: FrameCallback,
    /// Invoked at most once when the session ends.
    pub on_disconnect: DisconnectCallback,
}

/// Timeouts, heartbeat, and queue bound for a session.
///
/// A zero duration disables the corresponding watchdog or heartbeat; a
/// queue capacity of zero means unbounded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Force-close when one outbound write makes no progress for this long.
    pub send_timeout: Duration,
    /// Force-close when no bytes arrive for this long.
    pub recv_timeout: Duration,
    /// Interval between heartbeats while the outbound queue is idle.
    pub heartbeat_interval: Duration,
    /// Payload enqueued on each heartbeat; empty disables heartbeats.
    pub heartbeat_payload: Bytes,
    /// Outbound queue bound; enqueues beyond it are rejected.
    pub send_queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            recv_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_payload: Bytes::new(),
            send_queue_capacity: 0,
        }
    }
}

/// Byte and frame counters for one session.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Frames accepted by the parser
    pub frames_in: u64,
    /// Outbound buffers fully drained
    pub frames_out: u64,
}

/// Outbound state shared between `async_send` and the driver task.
struct SendState {
    queue: VecDeque<Bytes>,
    draining: Option<Buffer>,
    stopping: bool,
}

struct Shared {
    id: SessionId,
    options: SessionOptions,
    send: Mutex<SendState>,
    stats: Mutex<SessionStats>,
    queue_ready: Notify,
    shutdown: Notify,
    open: AtomicBool,
    disconnected: AtomicBool,
    local_addr: String,
    remote_addr: String,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Validate and enqueue one outbound payload. Shared by `async_send`
    /// and the heartbeat.
    fn enqueue(&self, data: &[u8]) -> Result<(), ErrorCode> {
        if data.is_empty() || data.len() > MAX_PACK_SIZE {
            return Err(ErrorCode::Normal);
        }
        if !self.open.load(Ordering::Acquire) {
            return Err(ErrorCode::SessionStopped);
        }

        {
            let mut send = lock(&self.send);
            if send.stopping {
                return Err(ErrorCode::SessionStopped);
            }
            let capacity = self.options.send_queue_capacity;
            if capacity != 0 && send.queue.len() >= capacity {
                return Err(ErrorCode::QueueFull);
            }
            send.queue.push_back(Bytes::copy_from_slice(data));
        }
        self.queue_ready.notify_one();
        Ok(())
    }

    fn outbound_idle(&self) -> bool {
        let send = lock(&self.send);
        send.queue.is_empty() && send.draining.is_none()
    }
}

/// Stateful wrapper around one live transport endpoint.
pub struct Session<T: Transport> {
    shared: Arc<Shared>,
    parser: Arc<dyn FrameParser>,
    hooks: SessionHooks,
    transport: Mutex<Option<T>>,
}

/// Session over a TCP transport.
pub type TcpSession = Session<crate::transport::TcpTransport>;
/// Session over a connected-UDP transport.
pub type UdpSession = Session<crate::transport::UdpTransport>;

impl<T: Transport + 'static> Session<T> {
    /// Wrap a live transport. The session does no I/O until
    /// [`Session::start`].
    pub fn new(
        id: SessionId,
        transport: T,
        parser: Arc<dyn FrameParser>,
        hooks: SessionHooks,
        options: SessionOptions,
    ) -> Self {
        let local_addr = transport
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let remote_addr = transport
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();

        Self {
            shared: Arc::new(Shared {
                id,
                options,
                send: Mutex::new(SendState {
                    queue: VecDeque::new(),
                    draining: None,
                    stopping: false,
                }),
                stats: Mutex::new(SessionStats::default()),
                queue_ready: Notify::new(),
                shutdown: Notify::new(),
                open: AtomicBool::new(true),
                disconnected: AtomicBool::new(false),
                local_addr,
                remote_addr,
            }),
            parser,
            hooks,
            transport: Mutex::new(Some(transport)),
        }
    }

    /// This session's identifier.
    pub fn session_id(&self) -> SessionId {
        self.shared.id
    }

    /// Arm the receive chain, send chain, and watchdogs. Idempotent; a
    /// stopped session never restarts.
    pub fn start(&self) {
        let Some(transport) = lock(&self.transport).take() else {
            return;
        };
        debug!("session {} started", self.shared.id);
        tokio::spawn(run_session(
            transport,
            self.shared.clone(),
            self.parser.clone(),
            self.hooks.clone(),
        ));
    }

    /// Close the transport. Idempotent; teardown runs when a chain
    /// observes the closure. No disconnect callback fires for a session
    /// that was never started.
    pub fn stop(&self) {
        lock(&self.shared.send).stopping = true;
        if lock(&self.transport).take().is_some() {
            // Never started; there is no driver to run teardown.
            self.shared.open.store(false, Ordering::Release);
        }
        self.shared.shutdown.notify_one();
    }

    /// True once the transport is no longer open.
    pub fn stopped(&self) -> bool {
        !self.shared.open.load(Ordering::Acquire)
    }

    /// Enqueue one outbound payload without touching the transport.
    ///
    /// Synchronous errors: [`ErrorCode::Normal`] for an empty or oversize
    /// payload, [`ErrorCode::SessionStopped`] after the session ended,
    /// [`ErrorCode::QueueFull`] when the bounded queue is at capacity.
    pub fn async_send(&self, data: &[u8]) -> Result<(), ErrorCode> {
        self.shared.enqueue(data)
    }

    /// Number of queued outbound payloads not yet handed to the transport.
    pub fn pending(&self) -> usize {
        lock(&self.shared.send).queue.len()
    }

    /// Local address string; empty once the session is closed.
    pub fn local_endpoint(&self) -> String {
        if self.stopped() {
            String::new()
        } else {
            self.shared.local_addr.clone()
        }
    }

    /// Remote address string; empty once the session is closed.
    pub fn remote_endpoint(&self) -> String {
        if self.stopped() {
            String::new()
        } else {
            self.shared.remote_addr.clone()
        }
    }

    /// Snapshot of this session's counters.
    pub fn stats(&self) -> SessionStats {
        lock(&self.shared.stats).clone()
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        lock(&self.shared.send).stopping = true;
        if lock(&self.transport).take().is_some() {
            self.shared.open.store(false, Ordering::Release);
        }
        self.shared.shutdown.notify_one();
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("stopped", &self.stopped())
            .finish()
    }
}

/// Driver task: owns the transport and runs both chains plus watchdogs
/// as one select loop, so reads never overlap reads and writes never
/// overlap writes.
async fn run_session<T: Transport>(
    mut transport: T,
    shared: Arc<Shared>,
    parser: Arc<dyn FrameParser>,
    hooks: SessionHooks,
) {
    let options = shared.options.clone();
    let mut recv_buf = Buffer::new();

    let recv_armed = !options.recv_timeout.is_zero();
    let mut recv_deadline = Instant::now() + options.recv_timeout;

    let heartbeat_armed =
        !options.heartbeat_interval.is_zero() && !options.heartbeat_payload.is_empty();
    let mut heartbeat_at = Instant::now() + options.heartbeat_interval;

    let exit: (ErrorCode, String) = loop {
        // Send chain: drain whatever is queued before suspending.
        match drain_outbound(&mut transport, &shared, &options, recv_deadline, recv_armed).await {
            Ok(true) => heartbeat_at = Instant::now() + options.heartbeat_interval,
            Ok(false) => {}
            Err(exit) => break exit,
        }

        tokio::select! {
            biased;

            _ = shared.shutdown.notified() => {
                break (ErrorCode::Normal, "session stopped".to_string());
            }

            _ = shared.queue_ready.notified() => {
                // Loop back into the drain phase.
            }

            read = transport.recv(recv_buf.writable()) => {
                match read {
                    Ok(0) => break (ErrorCode::Normal, "peer closed".to_string()),
                    Ok(n) => {
                        recv_buf.commit(n);
                        lock(&shared.stats).bytes_in += n as u64;
                        recv_deadline = Instant::now() + options.recv_timeout;
                        if let Err(exit) =
                            deliver_frames(&mut recv_buf, &shared, &parser, &hooks)
                        {
                            break exit;
                        }
                    }
                    Err(e) => break (ErrorCode::Normal, e.to_string()),
                }
            }

            _ = time::sleep_until(recv_deadline), if recv_armed => {
                break (ErrorCode::Normal, "receive timeout".to_string());
            }

            _ = time::sleep_until(heartbeat_at), if heartbeat_armed && shared.outbound_idle() => {
                heartbeat_at = Instant::now() + options.heartbeat_interval;
                match shared.enqueue(&options.heartbeat_payload) {
                    Ok(()) => trace!("session {} heartbeat enqueued", shared.id),
                    Err(code) => debug!("session {} heartbeat skipped: {}", shared.id, code),
                }
            }
        }
    };

    drop(transport);
    teardown(&shared, &hooks, exit);
}

/// Drain the outbound queue, continuing any partially-sent buffer first.
/// Returns whether any bytes went out. Each write is bounded by the send
/// timeout, and the receive watchdog and `stop()` stay armed while a
/// write is parked on a backpressured peer.
async fn drain_outbound<T: Transport>(
    transport: &mut T,
    shared: &Shared,
    options: &SessionOptions,
    recv_deadline: Instant,
    recv_armed: bool,
) -> Result<bool, (ErrorCode, String)> {
    let mut progressed = false;

    loop {
        let mut buf = {
            let mut send = lock(&shared.send);
            if send.stopping {
                return Err((ErrorCode::Normal, "session stopped".to_string()));
            }
            if let Some(buf) = send.draining.take() {
                buf
            } else if let Some(payload) = send.queue.pop_front() {
                Buffer::from_slice(&payload)
            } else {
                return Ok(progressed);
            }
        };

        while !buf.is_empty() {
            if lock(&shared.send).stopping {
                return Err((ErrorCode::Normal, "session stopped".to_string()));
            }

            let written = tokio::select! {
                biased;

                _ = shared.shutdown.notified() => {
                    return Err((ErrorCode::Normal, "session stopped".to_string()));
                }

                _ = time::sleep_until(recv_deadline), if recv_armed => {
                    return Err((ErrorCode::Normal, "receive timeout".to_string()));
                }

                result = write_bounded(transport, buf.data(), options) => result?,
            };

            if written == 0 {
                lock(&shared.send).draining = Some(buf);
                return Err((ErrorCode::Normal, "connection closed on write".to_string()));
            }
            buf.consume(written);
            lock(&shared.stats).bytes_out += written as u64;
            progressed = true;
        }

        lock(&shared.stats).frames_out += 1;
    }
}

/// One transport write, bounded by the send timeout when one is set.
/// The deadline is pushed forward for every write operation.
async fn write_bounded<T: Transport>(
    transport: &mut T,
    data: &[u8],
    options: &SessionOptions,
) -> Result<usize, (ErrorCode, String)> {
    if options.send_timeout.is_zero() {
        transport
            .send(data)
            .await
            .map_err(|e| (ErrorCode::Normal, e.to_string()))
    } else {
        match time::timeout(options.send_timeout, transport.send(data)).await {
            Ok(result) => result.map_err(|e| (ErrorCode::Normal, e.to_string())),
            Err(_) => Err((ErrorCode::Normal, "send timeout".to_string())),
        }
    }
}

/// Receive chain tail: classify buffered bytes into frames until the
/// parser wants more data.
fn deliver_frames(
    recv_buf: &mut Buffer,
    shared: &Shared,
    parser: &Arc<dyn FrameParser>,
    hooks: &SessionHooks,
) -> Result<(), (ErrorCode, String)> {
    loop {
        let parse = parser.parse(recv_buf);
        match parse.verdict {
            Verdict::Accepted => {
                if parse.frame_len == 0 || parse.frame_len > recv_buf.len() {
                    return Err((ErrorCode::PacketError, "parser reported bad frame length".to_string()));
                }
                (hooks.on_frame)(shared.id, parse.frame_kind, &recv_buf.data()[..parse.frame_len]);
                recv_buf.consume(parse.frame_len);
                lock(&shared.stats).frames_in += 1;
            }
            Verdict::Incomplete => {
                recv_buf.compact();
                return Ok(());
            }
            Verdict::Malformed | Verdict::Indeterminate => {
                return Err((ErrorCode::PacketError, "frame parse failed".to_string()));
            }
        }
    }
}

/// The single stop sequence: mark the session closed, drop buffered
/// work, and fire the disconnect callback exactly once.
fn teardown(shared: &Shared, hooks: &SessionHooks, exit: (ErrorCode, String)) {
    let (code, message) = exit;
    shared.open.store(false, Ordering::Release);
    {
        let mut send = lock(&shared.send);
        send.stopping = true;
        send.queue.clear();
        send.draining = None;
    }

    if !shared.disconnected.swap(true, Ordering::AcqRel) {
        info!("session {} ended: {}", shared.id, message);
        (hooks.on_disconnect)(shared.id, code, &message);
    }
}
