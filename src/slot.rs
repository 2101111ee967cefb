//! Frame-level lifecycle state wrapped around one [`Session`].
//!
//! Grounded on `session_info.h`'s per-frame bookkeeping plus the frame
//! state machine implied by `jitter_buffer.cc`'s `VCMFrameBuffer` state
//! transitions (Free/Empty/Incomplete/Complete/Decodable/Decoding).

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::trace;

use crate::config::NackMode;
use crate::packet::{Codec, FrameType, Packet};
use crate::seq::{RtpTimestamp, SeqNum};
use crate::session::{DecodabilityPolicy, InsertResult, Session, SessionError};

/// Lifecycle state of one frame slot.
///
/// ```text
/// Free --allocate--> Empty --first packet--> Incomplete --no gaps--> Complete
///                                 |                                     |
///                                 +--decodability policy--> Decodable   |
///                                                              |        |
///                                  any state --release--> Decoding <----+
///                                                              |
///                                                             Free
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SlotState {
    Free,
    Empty,
    Incomplete,
    Complete,
    Decodable,
    Decoding,
}

/// Caller-visible outcome of [`FrameSlot::insert`]. Distinct from
/// [`SlotState`]: the very first packet ever placed into a slot always
/// reports `FirstPacket`, even if that same insert completes the frame (a
/// single-packet frame completes and reports `FirstPacket`, not
/// `CompleteSession` -- callers should read [`FrameSlot::state`] for the
/// actual post-insert state).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SlotInsertOutcome {
    FirstPacket,
    CompleteSession,
    DecodableSession,
    Incomplete,
    Duplicate,
}

/// One frame-sized unit of the jitter buffer's slot pool.
#[derive(Debug)]
pub struct FrameSlot {
    state: SlotState,
    session: Session,
    rtp_timestamp: Option<RtpTimestamp>,
    any_insert_seen: bool,
}

impl FrameSlot {
    #[must_use]
    pub fn new(packet_capacity: usize) -> Self {
        Self {
            state: SlotState::Free,
            session: Session::new(packet_capacity),
            rtp_timestamp: None,
            any_insert_seen: false,
        }
    }

    /// Transitions `Free -> Empty`, anchoring the slot to `rtp_timestamp`.
    pub fn allocate(&mut self, rtp_timestamp: RtpTimestamp) {
        debug_assert_eq!(self.state, SlotState::Free, "allocate called on a non-free slot");
        self.session.reset();
        self.rtp_timestamp = Some(rtp_timestamp);
        self.any_insert_seen = false;
        self.state = SlotState::Empty;
    }

    /// Returns the slot to `Free`, clearing all frame state.
    pub fn reset_to_free(&mut self) {
        self.session.reset();
        self.rtp_timestamp = None;
        self.any_insert_seen = false;
        self.state = SlotState::Free;
        trace!("slot reset to free");
    }

    #[must_use]
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    #[must_use]
    pub fn low_seq_num(&self) -> Option<SeqNum> {
        self.session.low_seq_num()
    }

    #[must_use]
    pub fn high_seq_num(&self) -> Option<SeqNum> {
        self.session.high_seq_num()
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<RtpTimestamp> {
        self.rtp_timestamp
    }

    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.session.frame_type()
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.session.length()
    }

    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.session.bytes()
    }

    #[must_use]
    pub fn have_last_packet(&self) -> bool {
        self.session.have_last_packet()
    }

    pub fn force_have_last_packet(&mut self) {
        self.session.force_have_last_packet();
        if self.session.is_complete() {
            self.state = SlotState::Complete;
        }
    }

    pub fn increment_nack_count(&mut self) {
        self.session.increment_nack_count();
    }

    #[must_use]
    pub fn nack_count(&self) -> u32 {
        self.session.nack_count()
    }

    #[must_use]
    pub fn is_retransmitted(&self) -> bool {
        self.session.is_retransmitted()
    }

    #[must_use]
    pub fn latest_packet_time_ms(&self) -> u64 {
        self.session.latest_packet_time_ms()
    }

    #[must_use]
    pub fn previous_frame_loss(&self) -> bool {
        self.session.previous_frame_loss()
    }

    pub fn set_previous_frame_loss(&mut self) {
        self.session.set_previous_frame_loss();
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.session.is_complete()
    }

    #[must_use]
    pub fn is_decodable(&self) -> bool {
        self.session.is_decodable()
    }

    /// Inserts one packet carrying this slot's RTP timestamp.
    ///
    /// # Errors
    /// Propagates [`SessionError`] from the underlying session.
    pub fn insert(
        &mut self,
        packet: &Packet,
        now_ms: u64,
        decodability: DecodabilityPolicy,
    ) -> Result<SlotInsertOutcome, SessionError> {
        let result = self.session.insert(packet, now_ms, decodability)?;
        if matches!(result, InsertResult::Duplicate) {
            return Ok(SlotInsertOutcome::Duplicate);
        }

        if self.state == SlotState::Empty {
            self.state = SlotState::Incomplete;
        }

        if self.session.is_complete() {
            self.state = SlotState::Complete;
        } else if self.session.is_decodable() {
            self.state = SlotState::Decodable;
        }

        let first = !self.any_insert_seen;
        self.any_insert_seen = true;

        Ok(if first {
            SlotInsertOutcome::FirstPacket
        } else if self.state == SlotState::Complete {
            SlotInsertOutcome::CompleteSession
        } else if self.state == SlotState::Decodable {
            SlotInsertOutcome::DecodableSession
        } else {
            SlotInsertOutcome::Incomplete
        })
    }

    /// Makes the underlying session decodable, updating slot state to
    /// match. Returns the number of bytes discarded.
    pub fn make_session_decodable(&mut self, codec: Codec) -> usize {
        let dropped = self.session.make_decodable(codec);
        self.state = if self.session.is_complete() {
            SlotState::Complete
        } else {
            SlotState::Decodable
        };
        dropped
    }

    pub fn prepare_for_decode(&mut self, codec: Codec) -> usize {
        self.session.prepare_for_decode(codec)
    }

    #[must_use]
    pub fn build_partition_header(&self) -> (Vec<crate::session::PartitionFragment>, usize) {
        self.session.build_partition_header()
    }

    /// Removes entries from `missing` that this frame already covers:
    /// packets that arrived, packets in this frame's Empty-packet range
    /// (never NACKed), and, under the hybrid policy, every entry when the
    /// measured RTT has crossed `high_rtt_threshold_ms` (rely on FEC
    /// instead of asking for a retransmit).
    pub fn zero_out_nack_entries(
        &self,
        missing: &mut BTreeSet<SeqNum>,
        mode: NackMode,
        rtt_ms: u32,
        high_rtt_threshold_ms: u32,
    ) {
        let (Some(low), Some(high)) = (self.low_seq_num(), self.high_seq_num()) else {
            return;
        };
        let rely_on_fec = mode == NackMode::Hybrid && rtt_ms >= high_rtt_threshold_ms;

        let mut seq = low;
        loop {
            let idx = seq.wrapping_distance(low);
            let present = idx >= 0 && self.session.has_packet_at_index(idx as usize);
            let is_empty = self.session.is_empty_seq_num(seq);
            if present || is_empty || rely_on_fec {
                missing.remove(&seq);
            }
            if seq == high {
                break;
            }
            seq = seq.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBuilder;

    fn pkt(seq: u16, marker: bool, first: bool) -> Packet {
        PacketBuilder::new(seq, 1000, Bytes::from_static(b"1234"))
            .marker(marker)
            .first_packet(first)
            .build()
    }

    #[test]
    fn single_packet_reports_first_packet_even_though_complete() {
        let mut slot = FrameSlot::new(64);
        slot.allocate(RtpTimestamp::new(1000));
        let outcome = slot
            .insert(&pkt(1234, true, true), 0, DecodabilityPolicy::disabled())
            .unwrap();
        assert_eq!(outcome, SlotInsertOutcome::FirstPacket);
        assert_eq!(slot.state(), SlotState::Complete);
        assert_eq!(slot.length(), 4);
    }

    #[test]
    fn second_insert_completes_with_complete_session_outcome() {
        let mut slot = FrameSlot::new(64);
        slot.allocate(RtpTimestamp::new(3000));
        slot.insert(&pkt(1236, true, false), 0, DecodabilityPolicy::disabled())
            .unwrap();
        assert_eq!(slot.state(), SlotState::Incomplete);

        let outcome = slot
            .insert(&pkt(1235, false, true), 0, DecodabilityPolicy::disabled())
            .unwrap();
        assert_eq!(outcome, SlotInsertOutcome::CompleteSession);
        assert_eq!(slot.state(), SlotState::Complete);
    }

    #[test]
    fn reset_to_free_clears_everything() {
        let mut slot = FrameSlot::new(64);
        slot.allocate(RtpTimestamp::new(1000));
        slot.insert(&pkt(1, true, true), 0, DecodabilityPolicy::disabled())
            .unwrap();
        slot.reset_to_free();
        assert_eq!(slot.state(), SlotState::Free);
        assert_eq!(slot.timestamp(), None);
        assert_eq!(slot.length(), 0);
    }

    #[test]
    fn zero_out_nack_entries_removes_present_and_empty_seq_nums() {
        let mut slot = FrameSlot::new(64);
        slot.allocate(RtpTimestamp::new(1000));
        slot.insert(&pkt(100, false, true), 0, DecodabilityPolicy::disabled())
            .unwrap();
        slot.insert(&pkt(102, true, false), 0, DecodabilityPolicy::disabled())
            .unwrap();
        let empty = PacketBuilder::new(101, 1000, Bytes::new())
            .frame_type(FrameType::Empty)
            .build();
        slot.insert(&empty, 0, DecodabilityPolicy::disabled())
            .unwrap();

        let mut missing: BTreeSet<SeqNum> = [99, 100, 101, 102, 103].into_iter().map(SeqNum::new).collect();
        slot.zero_out_nack_entries(&mut missing, NackMode::Hybrid, 50, 200);

        assert_eq!(
            missing,
            [99, 103].into_iter().map(SeqNum::new).collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn hybrid_high_rtt_relies_on_fec_and_clears_all() {
        let mut slot = FrameSlot::new(64);
        slot.allocate(RtpTimestamp::new(1000));
        slot.insert(&pkt(10, true, true), 0, DecodabilityPolicy::disabled())
            .unwrap();

        let mut missing: BTreeSet<SeqNum> = [10].into_iter().map(SeqNum::new).collect();
        slot.zero_out_nack_entries(&mut missing, NackMode::Hybrid, 250, 200);
        assert!(missing.is_empty());
    }
}
