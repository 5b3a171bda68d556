//! Byte buffers, framing contract, and shared error codes for feedline.
//!
//! This crate holds the pieces of the session engine that know nothing about
//! sockets: a growable [`Buffer`] with a read-offset window, the
//! [`FrameParser`] contract a session calls to classify buffered bytes into
//! frames, and the flat [`ErrorCode`] vocabulary shared across the workspace.
//!
//! The engine itself is framing-agnostic; [`DelimitedParser`] is a reference
//! length-prefixed framing used by demos and tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod error;
pub mod framing;

pub use buffer::{Buffer, INITIAL_SIZE, MAX_PACK_SIZE, PER_ALLOC_SIZE};
pub use error::ErrorCode;
pub use framing::{DelimitedParser, FrameParser, Parse, Verdict, DELIMITED_HEADER_SIZE, FRAME_MAGIC};
