//! A receive-side RTP video jitter buffer.
//!
//! Packets already stripped of transport framing by an external
//! depacketizer ([`packet::Packet`]) are inserted into a [`buffer::JitterBuffer`],
//! which reassembles them into frames ([`session::Session`] via
//! [`slot::FrameSlot`]), tracks which sequence numbers are missing
//! ([`buffer::JitterBuffer::get_nack_list`]), estimates network jitter and
//! render delay ([`jitter::JitterEstimator`], [`delay::DelayEstimator`]),
//! and exposes complete, continuity-checked frames for decode in arrival
//! order (subject to wraparound-correct sequence-number/timestamp
//! comparisons, [`seq`]).
//!
//! [`protection`] scores loss-protection strategies (NACK, FEC, intra
//! refresh, ...) from the same network observations, as a side channel a
//! caller may consult but that the buffer itself does not act on.
//!
//! ```
//! use vjitter::buffer::JitterBuffer;
//! use vjitter::config::Config;
//! use vjitter::packet::PacketBuilder;
//! use bytes::Bytes;
//!
//! let buffer = JitterBuffer::new(Config::default());
//! buffer.start();
//!
//! let packet = PacketBuilder::new(1, 3000, Bytes::from_static(b"frame-bytes"))
//!     .marker(true)
//!     .first_packet(true)
//!     .build();
//!
//! let slot = buffer.get_frame(&packet, 0).unwrap();
//! buffer.insert_packet(slot, &packet, 0).unwrap();
//!
//! let ts = buffer.next_complete_timestamp(0, 0).unwrap();
//! let frame = buffer.extract_and_set_decode(ts, 0).unwrap();
//! assert_eq!(&frame.bytes[..], b"frame-bytes");
//! buffer.release_frame(frame.slot());
//! ```

pub mod buffer;
pub mod config;
pub mod decoding_state;
pub mod delay;
pub mod jitter;
pub mod packet;
pub mod protection;
pub mod seq;
pub mod session;
pub mod slot;
pub mod stats;

pub use buffer::{Frame, InsertOutcome, JitterBuffer, JitterBufferError};
pub use config::{Config, NackMode};
pub use packet::{Packet, PacketBuilder};
pub use seq::{RtpTimestamp, SeqNum};
pub use stats::{DropSnapshot, RateSnapshot};
