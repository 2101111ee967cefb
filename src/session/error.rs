//! Errors raised by [`super::Session`].

use std::error::Error;
use std::fmt;

/// Failure modes for [`super::Session::insert`] and related operations.
///
/// None of these are fatal: the session remains usable (or, for
/// [`SessionError::State`], becomes usable again after [`super::Session::reset`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionError {
    /// The shift distance needed to place this packet, or the packet's
    /// resulting index, would exceed the session's capacity.
    Size,
    /// Reserved: the caller passed a packet whose RTP timestamp does not
    /// match the session's.
    Timestamp,
    /// The session previously failed and has not been reset.
    State,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Size => {
                write!(f, "packet placement would exceed session capacity")
            },
            SessionError::Timestamp => {
                write!(f, "packet timestamp does not match this session")
            },
            SessionError::State => write!(f, "session is in a failed state and needs a reset"),
        }
    }
}

impl Error for SessionError {}
