//! Shared error-code vocabulary.

use thiserror::Error;

/// Flat error enumeration shared by sessions, acceptors, and clients.
///
/// Synchronous entry points such as `async_send` return these directly;
/// most internal failures instead surface through the disconnect callback
/// as an `ErrorCode` plus message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Outbound queue at capacity
    #[error("send queue full")]
    QueueFull,

    /// Outbound queue empty
    #[error("send queue empty")]
    QueueEmpty,

    /// Buffered bytes do not yet form a complete frame
    #[error("incomplete packet")]
    PacketLess,

    /// Buffered bytes cannot form a valid frame
    #[error("corrupt packet")]
    PacketError,

    /// Session table at capacity
    #[error("session full")]
    SessionFull,

    /// Session already stopped
    #[error("session stopped")]
    SessionStopped,

    /// No active session
    #[error("session not exist")]
    SessionNotExist,

    /// General failure (I/O, timeout, invalid argument)
    #[error("general error")]
    Normal,
}
