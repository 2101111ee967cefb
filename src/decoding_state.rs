//! Tracks what has already been handed to the decoder, to answer the two
//! questions every newly-assembled frame must pass: is this old, and is
//! this continuous with what came before.
//!
//! Grounded on the original's `VCMDecodingState` (old-packet and
//! continuity predicates over (timestamp, seq_num, picture id, temporal
//! layer id)).

use crate::packet::FrameType;
use crate::seq::{RtpTimestamp, SeqNum};
use crate::slot::FrameSlot;

/// Remembers the position of the last frame released for decoding.
#[derive(Clone, Copy, Debug)]
pub struct DecodingState {
    last_decoded_timestamp: RtpTimestamp,
    last_decoded_seq_num: SeqNum,
    last_decoded_picture_id: Option<u16>,
    last_decoded_temporal_id: Option<u8>,
    in_initial_state: bool,
}

impl Default for DecodingState {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodingState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_decoded_timestamp: RtpTimestamp::new(0),
            last_decoded_seq_num: SeqNum::new(0),
            last_decoded_picture_id: None,
            last_decoded_temporal_id: None,
            in_initial_state: true,
        }
    }

    #[must_use]
    pub fn in_initial_state(&self) -> bool {
        self.in_initial_state
    }

    #[must_use]
    pub fn last_decoded_timestamp(&self) -> RtpTimestamp {
        self.last_decoded_timestamp
    }

    #[must_use]
    pub fn last_decoded_seq_num(&self) -> SeqNum {
        self.last_decoded_seq_num
    }

    /// Recorded for SVC/picture-id-aware codecs layered on top of this
    /// core; the continuity predicate below does not consult it (see
    /// `DESIGN.md`'s open-question resolution).
    #[must_use]
    pub fn last_decoded_picture_id(&self) -> Option<u16> {
        self.last_decoded_picture_id
    }

    /// Recorded but not consulted by `is_continuous_frame`; an extension
    /// point for temporal-layer-aware gating built on top of this core.
    #[must_use]
    pub fn last_decoded_temporal_id(&self) -> Option<u8> {
        self.last_decoded_temporal_id
    }

    /// True iff `(timestamp, seq_num)` is at or before the last decoded
    /// position: strictly older timestamp, or equal timestamp with
    /// `seq_num <= last_decoded_seq_num`.
    #[must_use]
    pub fn is_old(&self, timestamp: RtpTimestamp, seq_num: SeqNum) -> bool {
        if self.in_initial_state {
            return false;
        }
        if timestamp.is_older_than(self.last_decoded_timestamp) {
            return true;
        }
        timestamp == self.last_decoded_timestamp
            && (seq_num == self.last_decoded_seq_num || seq_num.is_older_than(self.last_decoded_seq_num))
    }

    /// True iff `frame`'s low sequence number immediately follows the last
    /// decoded one, or the tracker is still initial and `frame` is a key
    /// frame.
    #[must_use]
    pub fn is_continuous(&self, frame: &FrameSlot) -> bool {
        if self.in_initial_state {
            return frame.frame_type() == FrameType::Key;
        }
        match frame.low_seq_num() {
            Some(low) => low == self.last_decoded_seq_num.wrapping_add(1),
            None => false,
        }
    }

    /// Advances the tracker past a frame being handed to the decoder.
    pub fn update(&mut self, frame: &FrameSlot, picture_id: Option<u16>, temporal_id: Option<u8>) {
        if let Some(timestamp) = frame.timestamp() {
            self.last_decoded_timestamp = timestamp;
        }
        if let Some(high) = frame.high_seq_num() {
            self.last_decoded_seq_num = high;
        }
        if picture_id.is_some() {
            self.last_decoded_picture_id = picture_id;
        }
        if temporal_id.is_some() {
            self.last_decoded_temporal_id = temporal_id;
        }
        self.in_initial_state = false;
    }

    /// Advances the tracker for a purely-Empty frame: counted as decoded
    /// for continuity purposes, but never fed to the jitter estimator.
    pub fn update_for_empty(&mut self, timestamp: RtpTimestamp, seq_num: SeqNum) {
        self.last_decoded_timestamp = timestamp;
        self.last_decoded_seq_num = seq_num;
        self.in_initial_state = false;
    }

    /// Clears to initial state (flush, key-frame request, transport
    /// replacement).
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
