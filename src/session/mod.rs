//! Per-frame packet reassembly.
//!
//! A [`Session`] holds every packet belonging to one RTP timestamp: it
//! copies packet bytes into one contiguous, index-ordered buffer as they
//! arrive (in any order), tracks NAL-unit/partition completeness, and
//! exposes the finishing moves (`make_decodable`, `prepare_for_decode`,
//! `build_partition_header`) a [`crate::slot::FrameSlot`] calls once a
//! frame is ready to leave the buffer.
//!
//! Grounded on `session_info.cc`'s `InsertBuffer`/`UpdateCompleteSession`/
//! `FindNaluBorder`/`DeletePackets`/`MakeDecodable`/
//! `BuildVP8FragmentationHeader` algorithms (see `DESIGN.md`).

mod error;

pub use error::SessionError;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::packet::{Codec, CodecSpecific, FrameType, NaluCompleteness, Packet};
use crate::seq::SeqNum;

/// How many bytes a legacy bit-continuation codec fabricates for a missing
/// Empty packet, instead of discarding the enclosing NAL unit. A verbatim
/// codec quirk, not invented here — see `DESIGN.md` / spec §4.2.
const FABRICATED_EMPTY_PACKET_BYTES: usize = 10;

const H264_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Outcome of [`Session::insert`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertResult {
    /// The packet was stored; this many new bytes were added to the layer
    /// buffer (zero for Empty packets, which never carry media bytes).
    NewBytes(usize),
    /// A packet already occupied this (seq_num-derived) slot; this insert
    /// was dropped without side effects.
    Duplicate,
}

impl InsertResult {
    #[must_use]
    pub fn bytes_added(self) -> usize {
        match self {
            InsertResult::NewBytes(n) => n,
            InsertResult::Duplicate => 0,
        }
    }
}

/// Controls whether, and how eagerly, a non-complete session may be marked
/// decodable.
///
/// This is a policy knob rather than a fixed rule: the original source ties
/// it to RTT (a higher RTT makes the buffer more willing to hand a gapped
/// frame to the decoder rather than wait for a retransmission that is less
/// likely to arrive in time). The exact curve is not part of the public
/// contract; only the inputs and monotonic trend are.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodabilityPolicy {
    pub enabled: bool,
    pub rtt_ms: u32,
}

impl DecodabilityPolicy {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rtt_ms: 0,
        }
    }
}

/// Per-index bookkeeping. `None` in the parent `Vec` means "no packet has
/// arrived at this index yet" (the `Unset` sentinel from spec §3); this
/// struct only exists for indices that have actually received a packet.
#[derive(Clone, Debug)]
struct PacketMeta {
    /// Bytes stored in the layer buffer for this packet, including any
    /// prepended start code.
    size_bytes: usize,
    nalu_completeness: NaluCompleteness,
    codec_specific: CodecSpecific,
    continuation_bits: bool,
}

/// One frame under construction.
#[derive(Debug)]
pub struct Session {
    slots: Vec<Option<PacketMeta>>,
    buffer: BytesMut,
    capacity: usize,

    low_seq_num: Option<SeqNum>,
    high_seq_num: Option<SeqNum>,
    empty_seq_low: Option<SeqNum>,
    empty_seq_high: Option<SeqNum>,

    first_packet_seen: bool,
    marker_seen: bool,
    highest_packet_index: usize,

    complete_session: bool,
    decodable_session: bool,
    frame_type: FrameType,
    nack_count: u32,
    retransmitted: bool,
    latest_packet_time_ms: u64,
    previous_frame_loss: bool,

    /// Set once an operation has returned [`SessionError::Size`]; cleared
    /// only by [`Session::reset`].
    failed: bool,
}

impl Session {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            buffer: BytesMut::new(),
            capacity,
            low_seq_num: None,
            high_seq_num: None,
            empty_seq_low: None,
            empty_seq_high: None,
            first_packet_seen: false,
            marker_seen: false,
            highest_packet_index: 0,
            complete_session: false,
            decodable_session: false,
            frame_type: FrameType::Delta,
            nack_count: 0,
            retransmitted: false,
            latest_packet_time_ms: 0,
            previous_frame_loss: false,
            failed: false,
        }
    }

    /// Clears all state, returning the session to its just-constructed form.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.buffer.clear();
        self.low_seq_num = None;
        self.high_seq_num = None;
        self.empty_seq_low = None;
        self.empty_seq_high = None;
        self.first_packet_seen = false;
        self.marker_seen = false;
        self.highest_packet_index = 0;
        self.complete_session = false;
        self.decodable_session = false;
        self.frame_type = FrameType::Delta;
        self.nack_count = 0;
        self.retransmitted = false;
        self.latest_packet_time_ms = 0;
        self.previous_frame_loss = false;
        self.failed = false;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete_session
    }

    #[must_use]
    pub fn is_decodable(&self) -> bool {
        self.decodable_session
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    #[must_use]
    pub fn low_seq_num(&self) -> Option<SeqNum> {
        self.low_seq_num
    }

    /// Highest sequence number seen for this session, preferring the
    /// trailing Empty-packet range over the media range when both are
    /// present (`session_info.cc::GetHighSeqNum`).
    #[must_use]
    pub fn high_seq_num(&self) -> Option<SeqNum> {
        self.empty_seq_high.or(self.high_seq_num)
    }

    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.buffer.clone().freeze()
    }

    #[must_use]
    pub fn have_first_packet(&self) -> bool {
        self.first_packet_seen
    }

    #[must_use]
    pub fn have_last_packet(&self) -> bool {
        self.marker_seen
    }

    pub fn force_have_last_packet(&mut self) {
        self.marker_seen = true;
        self.update_complete_session();
    }

    #[must_use]
    pub fn nack_count(&self) -> u32 {
        self.nack_count
    }

    pub fn increment_nack_count(&mut self) {
        self.nack_count += 1;
        self.retransmitted = true;
    }

    #[must_use]
    pub fn is_retransmitted(&self) -> bool {
        self.retransmitted
    }

    #[must_use]
    pub fn latest_packet_time_ms(&self) -> u64 {
        self.latest_packet_time_ms
    }

    #[must_use]
    pub fn previous_frame_loss(&self) -> bool {
        self.previous_frame_loss
    }

    pub fn set_previous_frame_loss(&mut self) {
        self.previous_frame_loss = true;
    }

    /// Number of packets discarded by [`Session::make_decodable`] because
    /// the decoder could not make use of them. Recomputed lazily; callers
    /// that need this after the fact should read the return value of
    /// `make_decodable` directly.
    #[must_use]
    pub fn highest_packet_index(&self) -> usize {
        self.highest_packet_index
    }

    /// Registers a non-media (Empty) packet's sequence number without
    /// running it through the full insert/duplicate/shift machinery.
    ///
    /// Grounded on `session_info.h::InformOfEmptyPacket`.
    pub fn note_empty_seq_num(&mut self, seq_num: SeqNum) {
        self.empty_seq_low = Some(match self.empty_seq_low {
            Some(low) if low.is_newer_than(seq_num) => seq_num,
            Some(low) => low,
            None => seq_num,
        });
        self.empty_seq_high = Some(match self.empty_seq_high {
            Some(high) if seq_num.is_newer_than(high) => seq_num,
            Some(high) => high,
            None => seq_num,
        });
    }

    /// Inserts one packet into the session.
    ///
    /// # Errors
    /// Returns [`SessionError::Size`] if placing this packet would exceed
    /// the session's capacity (either via a right-shift for a
    /// lower-than-`low_seq_num` packet, or because its index is beyond
    /// capacity). Returns [`SessionError::State`] if a prior call already
    /// failed and [`Session::reset`] has not been called since.
    pub fn insert(
        &mut self,
        packet: &Packet,
        now_ms: u64,
        decodability: DecodabilityPolicy,
    ) -> Result<InsertResult, SessionError> {
        if self.failed {
            return Err(SessionError::State);
        }

        if packet.frame_type.is_empty() {
            self.note_empty_seq_num(packet.seq_num);
            self.latest_packet_time_ms = now_ms;
            trace!(seq = packet.seq_num.0, "empty packet noted");
            return Ok(InsertResult::NewBytes(0));
        }

        match self.low_seq_num {
            None => {
                self.low_seq_num = Some(packet.seq_num);
                self.high_seq_num = Some(packet.seq_num);
                self.frame_type = packet.frame_type;
            },
            Some(low) => {
                let delta = packet.seq_num.wrapping_distance(low);
                if delta < 0 {
                    let shift = (-delta) as usize;
                    if self.highest_packet_index + shift + 1 > self.capacity {
                        self.failed = true;
                        warn!(shift, "session insert would exceed capacity on shift");
                        return Err(SessionError::Size);
                    }
                    let mut shifted = vec![None; shift];
                    shifted.append(&mut self.slots);
                    self.slots = shifted;
                    self.highest_packet_index += shift;
                    self.low_seq_num = Some(packet.seq_num);
                }
                if packet.seq_num.is_newer_than(self.high_seq_num.unwrap_or(packet.seq_num)) {
                    self.high_seq_num = Some(packet.seq_num);
                }
            },
        }

        let low = self.low_seq_num.expect("set above");
        let idx = packet.seq_num.wrapping_distance(low);
        debug_assert!(idx >= 0);
        let idx = idx as usize;

        if idx >= self.capacity {
            self.failed = true;
            warn!(idx, capacity = self.capacity, "packet index exceeds capacity");
            return Err(SessionError::Size);
        }

        if idx > self.highest_packet_index || self.slots.len() <= idx {
            self.slots.resize(idx + 1, None);
            self.highest_packet_index = self.highest_packet_index.max(idx);
        }

        if self.slots[idx].is_some() {
            trace!(seq = packet.seq_num.0, "duplicate packet");
            return Ok(InsertResult::Duplicate);
        }

        let offset = self.offset_of(idx);
        let mut data = Vec::with_capacity(H264_START_CODE.len() + packet.payload.len());
        if packet.insert_start_code {
            data.extend_from_slice(&H264_START_CODE);
        }
        data.extend_from_slice(&packet.payload);
        self.splice_insert(offset, &data);

        self.slots[idx] = Some(PacketMeta {
            size_bytes: data.len(),
            nalu_completeness: packet.nalu_completeness,
            codec_specific: packet.codec_specific,
            continuation_bits: packet.continuation_bits,
        });

        if packet.is_first_packet_in_frame {
            self.first_packet_seen = true;
        }
        if packet.marker {
            self.marker_seen = true;
        }
        self.latest_packet_time_ms = now_ms;

        self.update_complete_session();
        self.update_decodable_session(decodability);

        Ok(InsertResult::NewBytes(data.len()))
    }

    fn offset_of(&self, idx: usize) -> usize {
        self.slots[..idx.min(self.slots.len())]
            .iter()
            .map(|s| s.as_ref().map_or(0, |m| m.size_bytes))
            .sum()
    }

    /// Grows the buffer by `data.len()` bytes, shifting anything at or
    /// after `offset` to the right, then writes `data` into the gap.
    fn splice_insert(&mut self, offset: usize, data: &[u8]) {
        let old_len = self.buffer.len();
        self.buffer.resize(old_len + data.len(), 0);
        self.buffer.copy_within(offset..old_len, offset + data.len());
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Removes bytes `[offset, offset+len)`, shifting the remainder left.
    fn splice_remove(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let old_len = self.buffer.len();
        self.buffer.copy_within(offset + len..old_len, offset);
        self.buffer.truncate(old_len - len);
    }

    fn update_complete_session(&mut self) {
        if !(self.first_packet_seen && self.marker_seen) {
            self.complete_session = false;
            return;
        }
        self.complete_session =
            (0..=self.highest_packet_index).all(|i| self.slots.get(i).is_some_and(Option::is_some));
    }

    /// Decides whether a non-complete session may already be handed to the
    /// decoder. See [`DecodabilityPolicy`] for the shape of the knob; the
    /// rule implemented here: the session must have its first packet, and
    /// the number of still-missing indices must fit within an RTT-scaled
    /// allowance (a higher RTT makes the buffer more willing to give up
    /// waiting for a retransmission).
    fn update_decodable_session(&mut self, policy: DecodabilityPolicy) {
        if self.complete_session {
            self.decodable_session = true;
            return;
        }
        if !policy.enabled || !self.first_packet_seen {
            self.decodable_session = false;
            return;
        }
        let missing = (0..=self.highest_packet_index)
            .filter(|&i| self.slots.get(i).is_none_or(Option::is_none))
            .count();
        // Scales up with RTT: the higher the round trip, the less likely a
        // retransmission lands in time, so the buffer gives up waiting sooner.
        let allowance = (policy.rtt_ms / 50).min(8) as usize;
        self.decodable_session = missing > 0 && missing <= allowance;
    }

    /// Finds the `[start, end]` index range of the NAL unit enclosing the
    /// missing packet at `idx`: the nearest preceding index whose
    /// completeness ends a NALU (exclusive), through the nearest following
    /// index whose completeness starts or ends one (inclusive).
    fn find_nalu_border(&self, idx: usize) -> (usize, usize) {
        let mut start = 0;
        for j in (0..idx).rev() {
            if let Some(meta) = &self.slots[j] {
                if meta.nalu_completeness.ends_nalu() {
                    start = j + 1;
                    break;
                }
            }
        }
        let mut end = self.highest_packet_index;
        for j in (idx + 1)..=self.highest_packet_index {
            if let Some(meta) = &self.slots[j] {
                if meta.nalu_completeness.starts_nalu() {
                    end = j - 1;
                    break;
                }
                if meta.nalu_completeness.ends_nalu() {
                    end = j;
                    break;
                }
            }
        }
        (start, end)
    }

    fn delete_range(&mut self, start: usize, end: usize) -> usize {
        let bytes_to_delete: usize = (start..=end)
            .map(|j| self.slots[j].as_ref().map_or(0, |m| m.size_bytes))
            .sum();
        if bytes_to_delete > 0 {
            let dest_offset = self.offset_of(start);
            self.splice_remove(dest_offset, bytes_to_delete);
        }
        self.slots.drain(start..=end);
        self.highest_packet_index = self.highest_packet_index.saturating_sub(end - start + 1);
        bytes_to_delete
    }

    /// True iff `seq` falls within the session's noted Empty-packet range.
    #[must_use]
    pub fn is_empty_seq_num(&self, seq: SeqNum) -> bool {
        match (self.empty_seq_low, self.empty_seq_high) {
            (Some(low), Some(high)) => !seq.is_older_than(low) && !seq.is_newer_than(high),
            _ => false,
        }
    }

    /// True iff `idx`'s derived sequence number falls within the session's
    /// noted Empty-packet range.
    fn index_is_in_empty_range(&self, idx: usize) -> bool {
        let Some(low) = self.low_seq_num else {
            return false;
        };
        self.is_empty_seq_num(low.wrapping_add(idx as u16))
    }

    /// True iff a packet has arrived at index `idx` (bounds-safe).
    #[must_use]
    pub fn has_packet_at_index(&self, idx: usize) -> bool {
        self.slots.get(idx).is_some_and(Option::is_some)
    }

    /// Makes the session decodable by discarding undecodable NAL units.
    ///
    /// Walks the per-index array; wherever a packet never arrived, deletes
    /// the smallest enclosing NAL unit (or, for the one legacy codec that
    /// fabricates missing Empty packets, splices in
    /// [`FABRICATED_EMPTY_PACKET_BYTES`] zero bytes instead). Returns the
    /// number of bytes dropped.
    pub fn make_decodable(&mut self, codec: Codec) -> usize {
        let mut dropped = 0;
        let mut idx = 0;
        while idx <= self.highest_packet_index && idx < self.slots.len() {
            if self.slots[idx].is_none() {
                if codec == Codec::BitContinuation && self.index_is_in_empty_range(idx) {
                    let offset = self.offset_of(idx);
                    self.splice_insert(offset, &[0u8; FABRICATED_EMPTY_PACKET_BYTES]);
                    self.slots[idx] = Some(PacketMeta {
                        size_bytes: FABRICATED_EMPTY_PACKET_BYTES,
                        nalu_completeness: NaluCompleteness::Complete,
                        codec_specific: CodecSpecific::None,
                        continuation_bits: false,
                    });
                    idx += 1;
                    continue;
                }

                let (start, end) = self.find_nalu_border(idx);
                dropped += self.delete_range(start, end);
                idx = start;
                continue;
            }
            idx += 1;
        }
        self.update_complete_session();
        dropped
    }

    /// OR-merges continuation-bit packets with their predecessor and
    /// shifts the remainder left by one byte each time, for legacy
    /// bit-continuation codecs. No-op for other codecs.
    pub fn prepare_for_decode(&mut self, codec: Codec) -> usize {
        if codec != Codec::BitContinuation {
            return self.buffer.len();
        }

        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            offsets.push(offset);
            offset += slot.as_ref().map_or(0, |m| m.size_bytes);
        }

        let mut shrink = 0usize;
        for idx in 0..self.slots.len() {
            let continuation = self.slots[idx].as_ref().is_some_and(|m| m.continuation_bits);
            if !continuation {
                continue;
            }
            let this_offset = offsets[idx].saturating_sub(shrink);
            if this_offset == 0 {
                continue;
            }
            let predecessor_present = idx > 0 && self.slots[idx - 1].is_some();
            if predecessor_present {
                let merged = self.buffer[this_offset - 1] | self.buffer[this_offset];
                self.buffer[this_offset - 1] = merged;
            } else {
                self.buffer[this_offset - 1] = 0;
            }
            let buf_len = self.buffer.len();
            self.buffer.copy_within(this_offset + 1..buf_len, this_offset);
            self.buffer.truncate(buf_len - 1);
            shrink += 1;
            if let Some(meta) = self.slots[idx].as_mut() {
                meta.size_bytes = meta.size_bytes.saturating_sub(1);
            }
        }

        if !self.buffer.is_empty() && self.buffer.iter().all(|&b| b == 0) {
            self.buffer.clear();
        }

        self.buffer.len()
    }

    fn find_next_partition_beginning(&self, from: usize) -> usize {
        let mut idx = from;
        while idx <= self.highest_packet_index && idx < self.slots.len() {
            match &self.slots[idx] {
                None => idx += 1,
                Some(meta) => match meta.codec_specific {
                    CodecSpecific::Partition(p) if p.beginning_of_partition => return idx,
                    _ => idx += 1,
                },
            }
        }
        idx
    }

    fn find_partition_end(&self, from: usize, partition_id: u8) -> usize {
        let mut idx = from;
        loop {
            if idx > self.highest_packet_index || idx >= self.slots.len() {
                return idx - 1;
            }
            let meta = match &self.slots[idx] {
                None => return idx - 1,
                Some(meta) => meta,
            };
            let is_boundary = match meta.codec_specific {
                CodecSpecific::Partition(p) => {
                    (idx > from && p.beginning_of_partition) || p.partition_id != partition_id
                },
                _ => true,
            };
            if is_boundary {
                return idx - 1;
            }
            idx += 1;
        }
    }

    /// Emits a fragmentation header for partition-based codecs: one
    /// `(partition_id, offset, length)` triple per independently-decodable
    /// partition. A partition terminates at a missing packet, a gap, or a
    /// change of partition id; partitions after an incomplete one are still
    /// emitted, since they remain independently decodable.
    pub fn build_partition_header(&self) -> (Vec<PartitionFragment>, usize) {
        let mut fragments = Vec::new();
        let mut total = 0usize;
        if self.low_seq_num.is_none() {
            return (fragments, total);
        }

        let mut i = self.find_next_partition_beginning(0);
        while i <= self.highest_packet_index && i < self.slots.len() {
            let partition_id = match self.slots[i].as_ref().map(|m| m.codec_specific) {
                Some(CodecSpecific::Partition(p)) => p.partition_id,
                _ => break,
            };
            let end = self.find_partition_end(i, partition_id);
            let offset = self.offset_of(i);
            let end_len = self.slots[end].as_ref().map_or(0, |m| m.size_bytes);
            let length = self.offset_of(end) + end_len - offset;

            fragments.push(PartitionFragment {
                partition_id,
                offset,
                length,
            });
            total += length;
            i = self.find_next_partition_beginning(end + 1);
        }

        (fragments, total)
    }
}

/// One independently-decodable fragment of a partitioned frame, as produced
/// by [`Session::build_partition_header`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionFragment {
    pub partition_id: u8,
    pub offset: usize,
    pub length: usize,
}
