//! Errors raised by [`super::JitterBuffer`].

use std::error::Error;
use std::fmt;

use crate::session::SessionError;

/// Failure modes for the jitter buffer's public operations.
///
/// None of these are fatal to the buffer as a whole: every path leaves it in
/// a well-formed state ready for further inserts. The caller decides whether
/// to escalate (e.g. request a key frame upstream).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JitterBufferError {
    /// The packet's (timestamp, seq_num) is at or before the last decoded
    /// position. `should_flush` is set once the consecutive-old streak
    /// crosses `max_consecutive_old_packets`.
    OldPacket { should_flush: bool },
    /// The slot pool is exhausted and `recycle_until_key_frame` could not
    /// free one; the caller should request a fresh key frame.
    BufferFull,
    /// The buffer is not running (never started, or `stop` was called).
    Uninitialized,
    /// Propagated from the underlying session assembler.
    Session(SessionError),
}

impl fmt::Display for JitterBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitterBufferError::OldPacket { should_flush } => {
                write!(f, "packet is older than the last decoded frame (should_flush={should_flush})")
            },
            JitterBufferError::BufferFull => {
                write!(f, "frame pool is full and no key frame could be recycled")
            },
            JitterBufferError::Uninitialized => write!(f, "jitter buffer is not running"),
            JitterBufferError::Session(err) => write!(f, "session error: {err}"),
        }
    }
}

impl Error for JitterBufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JitterBufferError::Session(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for JitterBufferError {
    fn from(err: SessionError) -> Self {
        JitterBufferError::Session(err)
    }
}
