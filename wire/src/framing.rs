//! The framing contract between a session and its protocol.
//!
//! A session never interprets bytes itself; it hands its receive [`Buffer`]
//! to a caller-supplied [`FrameParser`] and acts on the verdict. `Accepted`
//! means `frame_len` bytes at the current read position form exactly one
//! complete frame; repeated calls after the session consumes those bytes
//! must not re-report it. `Incomplete` means wait for more data without
//! consuming anything.
//!
//! [`DelimitedParser`] is a reference implementation: a magic-prefixed
//! length-delimited framing used by the demos and tests.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::buffer::{Buffer, MAX_PACK_SIZE};
use crate::error::ErrorCode;

/// Classification of the bytes at a buffer's read position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Exactly one complete frame starts at the read position.
    Accepted,
    /// More data is needed before a frame can be classified.
    Incomplete,
    /// The bytes cannot form a valid frame; the session must stop.
    Malformed,
    /// The parser cannot decide; treated as fatal, like `Malformed`.
    Indeterminate,
}

/// Result of one [`FrameParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parse {
    /// The verdict for the bytes at the read position.
    pub verdict: Verdict,
    /// Frame length in bytes; meaningful only when accepted.
    pub frame_len: usize,
    /// Protocol-defined frame kind; meaningful only when accepted.
    pub frame_kind: i32,
}

impl Parse {
    /// A complete frame of `frame_len` bytes and kind `frame_kind`.
    pub fn accepted(frame_len: usize, frame_kind: i32) -> Self {
        Self {
            verdict: Verdict::Accepted,
            frame_len,
            frame_kind,
        }
    }

    /// Not enough buffered bytes yet.
    pub fn incomplete() -> Self {
        Self {
            verdict: Verdict::Incomplete,
            frame_len: 0,
            frame_kind: 0,
        }
    }

    /// The buffered bytes are invalid.
    pub fn malformed() -> Self {
        Self {
            verdict: Verdict::Malformed,
            frame_len: 0,
            frame_kind: 0,
        }
    }

    /// The parser cannot classify the bytes.
    pub fn indeterminate() -> Self {
        Self {
            verdict: Verdict::Indeterminate,
            frame_len: 0,
            frame_kind: 0,
        }
    }
}

/// Caller-supplied framing for a session's receive buffer.
pub trait FrameParser: Send + Sync {
    /// Classify the bytes at `buf`'s read position.
    fn parse(&self, buf: &Buffer) -> Parse;
}

impl<F> FrameParser for F
where
    F: Fn(&Buffer) -> Parse + Send + Sync,
{
    fn parse(&self, buf: &Buffer) -> Parse {
        self(buf)
    }
}

/// Magic marker opening every delimited frame.
pub const FRAME_MAGIC: u32 = 0x0267_3602;

/// Header size of the delimited framing: magic plus body length.
pub const DELIMITED_HEADER_SIZE: usize = 8;

/// Reference length-prefixed framing: `u32 magic | u32 body_len | body`.
///
/// Bodies larger than [`MAX_PACK_SIZE`] and frames not opening with
/// [`FRAME_MAGIC`] are malformed; no resynchronization is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedParser;

impl DelimitedParser {
    /// Encode `body` as one delimited frame.
    ///
    /// Fails with [`ErrorCode::Normal`] when the body exceeds
    /// [`MAX_PACK_SIZE`].
    pub fn encode(body: &[u8]) -> Result<Bytes, ErrorCode> {
        if body.len() > MAX_PACK_SIZE {
            return Err(ErrorCode::Normal);
        }
        let mut out = BytesMut::with_capacity(DELIMITED_HEADER_SIZE + body.len());
        out.put_u32(FRAME_MAGIC);
        out.put_u32(body.len() as u32);
        out.put_slice(body);
        Ok(out.freeze())
    }

    /// The body window of a complete delimited frame.
    pub fn body(frame: &[u8]) -> &[u8] {
        &frame[DELIMITED_HEADER_SIZE.min(frame.len())..]
    }
}

impl FrameParser for DelimitedParser {
    fn parse(&self, buf: &Buffer) -> Parse {
        let data = buf.data();
        if data.len() < DELIMITED_HEADER_SIZE {
            return Parse::incomplete();
        }

        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != FRAME_MAGIC {
            trace!("bad frame magic {:#010x}", magic);
            return Parse::malformed();
        }

        let body_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if body_len > MAX_PACK_SIZE {
            trace!("frame body of {} bytes exceeds limit", body_len);
            return Parse::malformed();
        }

        if data.len() < DELIMITED_HEADER_SIZE + body_len {
            return Parse::incomplete();
        }

        Parse::accepted(DELIMITED_HEADER_SIZE + body_len, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buf: &mut Buffer, bytes: &[u8]) {
        let dst = buf.writable();
        dst[..bytes.len()].copy_from_slice(bytes);
        buf.commit(bytes.len());
    }

    #[test]
    fn test_delimited_roundtrip() {
        let frame = DelimitedParser::encode(b"quote").unwrap();
        let mut buf = Buffer::new();
        feed(&mut buf, &frame);

        let parse = DelimitedParser.parse(&buf);
        assert_eq!(parse.verdict, Verdict::Accepted);
        assert_eq!(parse.frame_len, frame.len());
        assert_eq!(DelimitedParser::body(&buf.data()[..parse.frame_len]), b"quote");
    }

    #[test]
    fn test_incomplete_header_and_body() {
        let frame = DelimitedParser::encode(b"abcdef").unwrap();
        let mut buf = Buffer::new();

        feed(&mut buf, &frame[..5]);
        assert_eq!(DelimitedParser.parse(&buf).verdict, Verdict::Incomplete);

        feed(&mut buf, &frame[5..frame.len() - 1]);
        assert_eq!(DelimitedParser.parse(&buf).verdict, Verdict::Incomplete);

        feed(&mut buf, &frame[frame.len() - 1..]);
        assert_eq!(DelimitedParser.parse(&buf).verdict, Verdict::Accepted);
    }

    #[test]
    fn test_bad_magic_is_malformed() {
        let mut buf = Buffer::new();
        feed(&mut buf, &[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]);
        assert_eq!(DelimitedParser.parse(&buf).verdict, Verdict::Malformed);
    }

    #[test]
    fn test_oversize_body_is_malformed() {
        let mut buf = Buffer::new();
        let mut header = Vec::new();
        header.extend_from_slice(&FRAME_MAGIC.to_be_bytes());
        header.extend_from_slice(&((MAX_PACK_SIZE as u32) + 1).to_be_bytes());
        feed(&mut buf, &header);
        assert_eq!(DelimitedParser.parse(&buf).verdict, Verdict::Malformed);
    }

    #[test]
    fn test_no_re_report_after_consume() {
        let first = DelimitedParser::encode(b"one").unwrap();
        let second = DelimitedParser::encode(b"two").unwrap();
        let mut buf = Buffer::new();
        feed(&mut buf, &first);
        feed(&mut buf, &second);

        let parse = DelimitedParser.parse(&buf);
        assert_eq!(parse.verdict, Verdict::Accepted);
        buf.consume(parse.frame_len);

        let parse = DelimitedParser.parse(&buf);
        assert_eq!(parse.verdict, Verdict::Accepted);
        assert_eq!(DelimitedParser::body(&buf.data()[..parse.frame_len]), b"two");
        buf.consume(parse.frame_len);

        assert_eq!(DelimitedParser.parse(&buf).verdict, Verdict::Incomplete);
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let body = vec![0u8; MAX_PACK_SIZE + 1];
        assert_eq!(DelimitedParser::encode(&body), Err(ErrorCode::Normal));
    }

    #[test]
    fn test_closure_parser() {
        let fixed = |buf: &Buffer| {
            if buf.len() >= 10 {
                Parse::accepted(10, 7)
            } else {
                Parse::incomplete()
            }
        };
        let mut buf = Buffer::new();
        feed(&mut buf, &[0u8; 12]);
        let parse = FrameParser::parse(&fixed, &buf);
        assert_eq!(parse.verdict, Verdict::Accepted);
        assert_eq!(parse.frame_len, 10);
        assert_eq!(parse.frame_kind, 7);
    }
}
