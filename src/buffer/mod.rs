//! The jitter buffer core: a fixed-capacity pool of frame slots, a
//! timestamp-ordered release queue, a NACK candidate set, and the glue
//! between the session assembler (C3), the decoding-state tracker (C5),
//! and the delay/jitter estimators (C6/C7).
//!
//! Grounded on `jitter_buffer.cc` end to end (`GetFrame`, `InsertPacket`,
//! `NextCompleteTimestamp`, `ExtractAndSetDecode`,
//! `RecycleFramesUntilKeyFrame`, `CreateNackList`, `IncomingRateStatistics`).
//! The mutex/condvar shape is grounded on the reference driver's
//! `parking_lot`-based coarse-grained locking.

pub mod error;

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, instrument, trace, warn};

use crate::config::{Config, NackMode};
use crate::decoding_state::DecodingState;
use crate::delay::DelayEstimator;
use crate::jitter::JitterEstimator;
use crate::packet::{FrameType, Packet};
use crate::protection::{LossProtectionSelector, ProtectionMethodKind, ProtectionParameters};
use crate::seq::{RtpTimestamp, SeqNum};
use crate::session::{DecodabilityPolicy, PartitionFragment};
use crate::slot::{FrameSlot, SlotInsertOutcome, SlotState};
use crate::stats::{DropSnapshot, DropStatistics, IncomingRateStatistics, RateSnapshot};

pub use error::JitterBufferError;

/// Index into the slot pool. Stable for the lifetime of the frame it
/// currently holds (until the slot returns to `Free`).
pub type SlotIndex = usize;

/// Caller-visible outcome of [`JitterBuffer::insert_packet`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum InsertOutcome {
    FirstPacket,
    CompleteSession,
    DecodableSession,
    Incomplete,
    Duplicate,
    /// A directive: the NACK list or the old-frame/old-packet streak lost
    /// integrity. The caller should request a fresh key frame upstream.
    FlushIndicator,
}

/// A consumer's borrow of one assembled frame, valid until
/// [`JitterBuffer::release_frame`].
#[derive(Clone, Debug)]
pub struct Frame {
    slot: SlotIndex,
    pub bytes: Bytes,
    pub length: usize,
    pub frame_type: FrameType,
    pub rtp_timestamp: RtpTimestamp,
    /// Monotonic-ms hint for when this frame should be rendered; derived
    /// from the latest packet's arrival time, not a full playout schedule.
    pub render_time_hint_ms: u64,
    pub is_complete: bool,
    pub had_missing_frame: bool,
    pub partition_fragments: Vec<PartitionFragment>,
}

impl Frame {
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }
}

/// Cache of a still-incomplete frame extracted for decoding, so a belated
/// completion updates frame-size statistics without double-counting delay.
#[derive(Clone, Copy, Debug)]
struct WaitingForCompletion {
    rtp_timestamp: RtpTimestamp,
    running_size: usize,
    extracted_at_ms: u64,
    delay_ms: i64,
}

struct BufferState {
    config: Config,
    running: bool,

    slots: Vec<FrameSlot>,
    free_list: Vec<SlotIndex>,
    ordered_frames: Vec<SlotIndex>,

    missing_seq_nums: BTreeSet<SeqNum>,
    latest_received_seq_num: Option<SeqNum>,
    first_packet_received: bool,

    rtt_ms: u32,
    decoding_state: DecodingState,
    delay: DelayEstimator,
    jitter: JitterEstimator,
    protection: LossProtectionSelector,
    rate_stats: IncomingRateStatistics,
    drop_stats: DropStatistics,

    waiting_for_completion: Option<WaitingForCompletion>,
    consecutive_old_frames: u32,
    consecutive_old_packets: u32,
}

impl BufferState {
    fn new(config: Config) -> Self {
        let start_frames = config.start_frames;
        let mut slots = Vec::with_capacity(start_frames);
        for _ in 0..start_frames {
            slots.push(FrameSlot::new(config.max_packets_per_frame));
        }
        let free_list = (0..start_frames).rev().collect();

        Self {
            config,
            running: false,
            slots,
            free_list,
            ordered_frames: Vec::new(),
            missing_seq_nums: BTreeSet::new(),
            latest_received_seq_num: None,
            first_packet_received: false,
            rtt_ms: crate::config::DEFAULT_RTT_MS,
            decoding_state: DecodingState::new(),
            delay: DelayEstimator::default(),
            jitter: JitterEstimator::new(),
            protection: LossProtectionSelector::new(),
            rate_stats: IncomingRateStatistics::new(),
            drop_stats: DropStatistics::new(),
            waiting_for_completion: None,
            consecutive_old_frames: 0,
            consecutive_old_packets: 0,
        }
    }

    /// Position of `idx` among `ordered_frames` under the ring's current
    /// anchor (the front of the queue), a wrap-aware total order that's
    /// valid as long as the whole queue spans less than half the modulus
    /// (always true at `MAX_FRAMES` scale).
    fn order_key(&self, ts: RtpTimestamp) -> i64 {
        match self.ordered_frames.first() {
            Some(&anchor_idx) => match self.slots[anchor_idx].timestamp() {
                Some(anchor_ts) => ts.wrapping_distance(anchor_ts),
                None => 0,
            },
            None => 0,
        }
    }

    fn insert_sorted(&mut self, idx: SlotIndex) {
        let Some(ts) = self.slots[idx].timestamp() else {
            return;
        };
        let key = self.order_key(ts);
        let pos = self
            .ordered_frames
            .partition_point(|&other| self.order_key(self.slots[other].timestamp().unwrap_or(ts)) < key);
        self.ordered_frames.insert(pos, idx);
    }

    fn find_slot_for_timestamp(&self, ts: RtpTimestamp) -> Option<SlotIndex> {
        self.ordered_frames
            .iter()
            .copied()
            .find(|&idx| self.slots[idx].timestamp() == Some(ts))
    }

    /// Releases oldest frames until the front of the queue is a key frame
    /// (success) or the queue is exhausted (failure).
    fn recycle_until_key_frame(&mut self) -> bool {
        while let Some(&idx) = self.ordered_frames.first() {
            if self.slots[idx].frame_type() == FrameType::Key {
                self.decoding_state.reset();
                if let Some(low) = self.slots[idx].low_seq_num() {
                    self.missing_seq_nums.retain(|&s| !s.is_older_than(low));
                }
                return true;
            }
            self.ordered_frames.remove(0);
            self.slots[idx].reset_to_free();
            self.free_list.push(idx);
            self.drop_stats.drop_count += 1;
            trace!(slot = idx, "recycled non-key frame while hunting for a key frame");
        }
        false
    }

    fn enforce_nack_bounds(&mut self) -> bool {
        loop {
            let over_size = self.missing_seq_nums.len() > self.config.max_nack_list_size;
            let too_old = match (self.missing_seq_nums.iter().next(), self.latest_received_seq_num) {
                (Some(&oldest), Some(latest)) => {
                    latest.wrapping_distance(oldest) > i32::from(self.config.max_packet_age_to_nack)
                },
                _ => false,
            };
            if !over_size && !too_old {
                return false;
            }
            if !self.recycle_until_key_frame() {
                warn!("nack list lost integrity and no key frame could be recycled to");
                self.missing_seq_nums.clear();
                return true;
            }
        }
    }

    fn update_nack_candidates(&mut self, seq_num: SeqNum) {
        match self.latest_received_seq_num {
            None => {
                self.latest_received_seq_num = Some(seq_num);
                self.first_packet_received = true;
            },
            Some(latest) if seq_num.is_newer_than(latest) => {
                let mut s = latest.wrapping_add(1);
                while s != seq_num {
                    self.missing_seq_nums.insert(s);
                    s = s.wrapping_add(1);
                }
                self.latest_received_seq_num = Some(seq_num);
            },
            Some(_) => {
                self.missing_seq_nums.remove(&seq_num);
            },
        }
    }

    /// Drops every queued frame preceding the nearest key frame, resetting
    /// the decoding-state tracker to resume there. Used by the
    /// too-long-non-decodable escape hatch.
    fn resync_to_nearest_key_frame(&mut self) -> bool {
        let Some(pos) = self.ordered_frames.iter().position(|&i| self.slots[i].frame_type() == FrameType::Key) else {
            warn!("too-long-non-decodable with no key frame left in queue");
            return false;
        };
        for &idx in &self.ordered_frames[..pos] {
            self.slots[idx].reset_to_free();
            self.free_list.push(idx);
            self.drop_stats.drop_count += 1;
        }
        self.ordered_frames.drain(..pos);
        self.decoding_state.reset();
        if let Some(&idx) = self.ordered_frames.first() {
            if let Some(low) = self.slots[idx].low_seq_num() {
                self.missing_seq_nums.retain(|&s| !s.is_older_than(low));
            }
        }
        true
    }

    fn ready_timestamp(&mut self, now_ms: u64) -> Option<RtpTimestamp> {
        let &idx = self.ordered_frames.first()?;
        if self.slots[idx].state() != SlotState::Complete {
            return None;
        }
        let ts = self.slots[idx].timestamp()?;

        let continuous = self.decoding_state.is_continuous(&self.slots[idx])
            || (self.config.decode_with_errors && self.slots[idx].frame_type() == FrameType::Key);
        if continuous {
            return Some(ts);
        }

        if self.config.max_incomplete_time_ms > 0 {
            let elapsed = now_ms.saturating_sub(self.slots[idx].latest_packet_time_ms());
            if elapsed >= u64::from(self.config.max_incomplete_time_ms) && self.resync_to_nearest_key_frame() {
                return self.ready_timestamp(now_ms);
            }
        }
        None
    }
}

/// Pool + queue + NACK set + estimators, guarded by one mutex with two
/// condition variables (*frame-ready*, *packet-ready*) per the concurrency
/// model: parallel producer threads, coarse-grained exclusion, bounded
/// parking only inside `next_complete_timestamp`.
pub struct JitterBuffer {
    state: Mutex<BufferState>,
    frame_ready: Condvar,
    packet_ready: Condvar,
}

impl JitterBuffer {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            state: Mutex::new(BufferState::new(config)),
            frame_ready: Condvar::new(),
            packet_ready: Condvar::new(),
        }
    }

    pub fn start(&self) {
        self.state.lock().running = true;
    }

    /// Wakes any waiter parked in `next_complete_timestamp` and rejects
    /// further inserts with [`JitterBufferError::Uninitialized`].
    pub fn stop(&self) {
        self.state.lock().running = false;
        self.frame_ready.notify_all();
        self.packet_ready.notify_all();
    }

    /// Releases all slots to `Free`, clears the queue, the NACK set, and
    /// resets the estimators. `num_discarded_packets` survives (see
    /// [`DropStatistics::reset`]).
    pub fn flush(&self) {
        let mut st = self.state.lock();
        for &idx in &st.ordered_frames {
            st.slots[idx].reset_to_free();
            st.free_list.push(idx);
        }
        st.ordered_frames.clear();
        st.missing_seq_nums.clear();
        st.latest_received_seq_num = None;
        st.first_packet_received = false;
        st.decoding_state.reset();
        st.delay.reset();
        st.jitter.reset();
        st.protection.reset();
        st.rate_stats.reset();
        st.waiting_for_completion = None;
        st.consecutive_old_frames = 0;
        st.consecutive_old_packets = 0;
        st.drop_stats.reset();
        drop(st);
        self.frame_ready.notify_all();
        debug!("jitter buffer flushed");
    }

    /// Returns the slot for `packet`'s RTP timestamp, allocating one (and
    /// recycling toward a key frame if the pool is full) if none exists
    /// yet. Rejects packets the decoding-state tracker judges already
    /// decoded.
    #[instrument(skip(self, packet), fields(seq = packet.seq_num.0, ts = packet.rtp_timestamp.0))]
    pub fn get_frame(&self, packet: &Packet, now_ms: u64) -> Result<SlotIndex, JitterBufferError> {
        let mut st = self.state.lock();
        if !st.running {
            return Err(JitterBufferError::Uninitialized);
        }

        if let Some(waiting) = st.waiting_for_completion {
            if waiting.rtp_timestamp == packet.rtp_timestamp {
                let running_size = waiting.running_size + packet.size_bytes();
                let elapsed = now_ms.saturating_sub(waiting.extracted_at_ms);
                if elapsed >= st.config.waiting_for_completion_timeout.as_millis() as u64 {
                    st.waiting_for_completion = None;
                    st.jitter.update(waiting.delay_ms as f64, running_size as f64, true);
                    trace!("belated completion sample recorded after timeout");
                } else {
                    st.waiting_for_completion = Some(WaitingForCompletion { running_size, ..waiting });
                }
                return Err(JitterBufferError::OldPacket { should_flush: false });
            }
        }

        if st.first_packet_received && st.decoding_state.is_old(packet.rtp_timestamp, packet.seq_num) {
            if packet.size_bytes() > 0 {
                st.drop_stats.num_discarded_packets += 1;
            }
            st.consecutive_old_packets += 1;
            if packet.is_first_packet_in_frame {
                st.consecutive_old_frames += 1;
            }
            let should_flush = st.consecutive_old_packets > st.config.max_consecutive_old_packets
                || st.consecutive_old_frames > st.config.max_consecutive_old_frames;
            if should_flush {
                st.consecutive_old_packets = 0;
                st.consecutive_old_frames = 0;
            }
            trace!(should_flush, "rejected old packet");
            return Err(JitterBufferError::OldPacket { should_flush });
        }
        st.consecutive_old_packets = 0;
        st.consecutive_old_frames = 0;

        if let Some(idx) = st.find_slot_for_timestamp(packet.rtp_timestamp) {
            return Ok(idx);
        }

        let idx = if let Some(idx) = st.free_list.pop() {
            idx
        } else if st.slots.len() < st.config.max_frames {
            st.slots.push(FrameSlot::new(st.config.max_packets_per_frame));
            st.slots.len() - 1
        } else if st.recycle_until_key_frame() {
            match st.free_list.pop() {
                Some(idx) => idx,
                None => return Err(JitterBufferError::BufferFull),
            }
        } else {
            warn!("frame pool exhausted and no key frame could be recycled");
            return Err(JitterBufferError::BufferFull);
        };

        st.slots[idx].allocate(packet.rtp_timestamp);
        st.insert_sorted(idx);
        Ok(idx)
    }

    /// Inserts `packet` into `slot`'s session, updates the NACK candidate
    /// set from the sequence-number gap, and signals the *packet-ready*
    /// (always) and *frame-ready* (on completion) condition variables.
    #[instrument(skip(self, packet), fields(slot, seq = packet.seq_num.0))]
    pub fn insert_packet(
        &self,
        slot: SlotIndex,
        packet: &Packet,
        now_ms: u64,
    ) -> Result<InsertOutcome, JitterBufferError> {
        let mut st = self.state.lock();
        if !st.running {
            return Err(JitterBufferError::Uninitialized);
        }

        st.update_nack_candidates(packet.seq_num);

        let decodability = DecodabilityPolicy {
            enabled: st.config.nack_mode != NackMode::Off,
            rtt_ms: st.rtt_ms,
        };
        let slot_outcome = st.slots[slot].insert(packet, now_ms, decodability)?;

        if !packet.frame_type.is_empty() {
            st.rate_stats.update(packet.size_bytes(), now_ms);
        }

        let mode = st.config.nack_mode;
        let rtt_ms = st.rtt_ms;
        let high_rtt = st.config.high_rtt_nack_threshold_ms;
        st.slots[slot].zero_out_nack_entries(&mut st.missing_seq_nums, mode, rtt_ms, high_rtt);

        let request_key_frame = st.enforce_nack_bounds();

        let outcome = if request_key_frame {
            InsertOutcome::FlushIndicator
        } else {
            match slot_outcome {
                SlotInsertOutcome::FirstPacket => InsertOutcome::FirstPacket,
                SlotInsertOutcome::CompleteSession => InsertOutcome::CompleteSession,
                SlotInsertOutcome::DecodableSession => InsertOutcome::DecodableSession,
                SlotInsertOutcome::Incomplete => InsertOutcome::Incomplete,
                SlotInsertOutcome::Duplicate => InsertOutcome::Duplicate,
            }
        };

        let wake_frame_ready = matches!(
            outcome,
            InsertOutcome::FirstPacket | InsertOutcome::CompleteSession | InsertOutcome::DecodableSession
        );
        drop(st);
        self.packet_ready.notify_all();
        if wake_frame_ready {
            self.frame_ready.notify_all();
        }
        Ok(outcome)
    }

    /// Blocks up to `max_wait_ms` on *frame-ready*, returning the RTP
    /// timestamp of the oldest complete-and-continuous frame once one is
    /// available. `now_ms` is used only for the too-long-non-decodable
    /// escape hatch (`max_incomplete_time_ms`).
    pub fn next_complete_timestamp(&self, max_wait_ms: u64, now_ms: u64) -> Option<RtpTimestamp> {
        let mut st = self.state.lock();
        if let Some(ts) = st.ready_timestamp(now_ms) {
            return Some(ts);
        }
        if max_wait_ms == 0 || !st.running {
            return None;
        }
        self.frame_ready.wait_for(&mut st, Duration::from_millis(max_wait_ms));
        if !st.running {
            return None;
        }
        st.ready_timestamp(now_ms)
    }

    /// Non-blocking. Returns the oldest frame's timestamp if it is
    /// `Complete` or `Decodable`, subject to key-frame-required-in-initial-
    /// state (no continuity check beyond that, unlike
    /// `next_complete_timestamp`).
    pub fn next_maybe_incomplete_timestamp(&self) -> Option<RtpTimestamp> {
        let st = self.state.lock();
        if !st.running {
            return None;
        }
        let &idx = st.ordered_frames.first()?;
        if !matches!(st.slots[idx].state(), SlotState::Complete | SlotState::Decodable) {
            return None;
        }
        if st.decoding_state.in_initial_state() && st.slots[idx].frame_type() != FrameType::Key {
            return None;
        }
        st.slots[idx].timestamp()
    }

    /// Removes the slot at `rtp_ts` from the queue, feeds one delay/jitter
    /// sample, advances the decoding-state tracker, prunes the NACK list,
    /// and marks the slot `Decoding`. Returns `None` if no such frame is
    /// queued (e.g. a concurrent `flush` removed it).
    #[instrument(skip(self))]
    pub fn extract_and_set_decode(&self, rtp_ts: RtpTimestamp, now_ms: u64) -> Option<Frame> {
        let mut st = self.state.lock();
        if !st.running {
            return None;
        }
        let pos = st.ordered_frames.iter().position(|&i| st.slots[i].timestamp() == Some(rtp_ts))?;
        let idx = st.ordered_frames.remove(pos);

        let codec = st.config.codec;
        if st.slots[idx].state() == SlotState::Decodable {
            let dropped = st.slots[idx].make_session_decodable(codec);
            if dropped > 0 {
                st.drop_stats.num_not_decodable_packets += 1;
            }
        }
        st.slots[idx].prepare_for_decode(codec);
        let (partition_fragments, _) = st.slots[idx].build_partition_header();

        let is_complete = st.slots[idx].is_complete();
        let frame_type = st.slots[idx].frame_type();
        let length = st.slots[idx].length();
        let bytes = st.slots[idx].bytes();
        let latest_packet_time_ms = st.slots[idx].latest_packet_time_ms();

        // A still-incomplete frame previously extracted (its slot is already out of
        // `ordered_frames`) gets superseded here: fold its running size into one
        // final jitter sample before starting a new wait for this extraction.
        if let Some(prev) = st.waiting_for_completion.take() {
            st.jitter.update(prev.delay_ms as f64, prev.running_size as f64, true);
            trace!("belated completion sample recorded, superseded by a newer extraction");
        }

        let delay_ms = st.delay.compute_delay_ms(rtp_ts, latest_packet_time_ms);
        if let Some(delay) = delay_ms {
            if is_complete {
                st.jitter.update(delay as f64, length as f64, false);
            } else {
                st.waiting_for_completion = Some(WaitingForCompletion {
                    rtp_timestamp: rtp_ts,
                    running_size: length,
                    extracted_at_ms: now_ms,
                    delay_ms: delay,
                });
            }
        }

        if st.slots[idx].nack_count() > 0 {
            st.jitter.frame_nacked();
        } else {
            st.jitter.reset_nack_count();
        }

        st.decoding_state.update(&st.slots[idx], None, None);
        let last = st.decoding_state.last_decoded_seq_num();
        st.missing_seq_nums.retain(|&s| s.is_newer_than(last));

        st.drop_stats.note_released_frame(frame_type);
        st.slots[idx].set_state(SlotState::Decoding);

        Some(Frame {
            slot: idx,
            bytes,
            length,
            frame_type,
            rtp_timestamp: rtp_ts,
            render_time_hint_ms: latest_packet_time_ms,
            is_complete,
            had_missing_frame: !is_complete,
            partition_fragments,
        })
    }

    /// `Decoding -> Free`.
    pub fn release_frame(&self, slot: SlotIndex) {
        let mut st = self.state.lock();
        debug_assert_eq!(st.slots[slot].state(), SlotState::Decoding, "release_frame called on a non-decoding slot");
        st.slots[slot].reset_to_free();
        st.free_list.push(slot);
    }

    /// Returns the current NACK set as a sorted list, plus whether the
    /// caller should request a fresh key frame (the set lost integrity and
    /// could not be repaired by recycling toward a key frame).
    pub fn get_nack_list(&self) -> (Vec<SeqNum>, bool) {
        let mut st = self.state.lock();
        let request_key_frame = st.enforce_nack_bounds();
        (st.missing_seq_nums.iter().copied().collect(), request_key_frame)
    }

    pub fn update_rtt(&self, rtt_ms: u32) {
        let mut st = self.state.lock();
        st.rtt_ms = rtt_ms;
        st.jitter.set_rtt(rtt_ms);
    }

    pub fn set_nack_mode(&self, mode: NackMode, low_rtt_ms: u32, high_rtt_ms: u32) {
        let mut st = self.state.lock();
        st.config.nack_mode = mode;
        st.config.low_rtt_nack_threshold_ms = low_rtt_ms;
        st.config.high_rtt_nack_threshold_ms = high_rtt_ms;
    }

    pub fn set_nack_settings(&self, max_list_size: usize, max_packet_age: u16, max_incomplete_time_ms: u32) {
        let mut st = self.state.lock();
        st.config.max_nack_list_size = max_list_size;
        st.config.max_packet_age_to_nack = max_packet_age;
        st.config.max_incomplete_time_ms = max_incomplete_time_ms;
    }

    /// Exponentially-smoothed `(frame_rate, bit_rate_bps)` over at most a
    /// 1000 ms window.
    pub fn incoming_rate_statistics(&self, now_ms: u64) -> (u32, u32) {
        self.state.lock().rate_stats.rates(now_ms)
    }

    /// [`Self::incoming_rate_statistics`], wrapped in a JSON-serializable
    /// shape for telemetry export (see [`RateSnapshot`]).
    #[must_use]
    pub fn rate_snapshot(&self, now_ms: u64) -> RateSnapshot {
        self.state.lock().rate_stats.snapshot(now_ms)
    }

    #[must_use]
    pub fn drop_snapshot(&self) -> DropSnapshot {
        self.state.lock().drop_stats.snapshot()
    }

    /// Scores and selects a loss-protection method from the same RTT/loss/
    /// bitrate inputs the buffer itself observes; a side channel the
    /// caller drives explicitly (the buffer does not act on the choice).
    pub fn update_protection_parameters(&self, params: &ProtectionParameters) -> ProtectionMethodKind {
        self.state.lock().protection.update(params)
    }

    #[must_use]
    pub fn frame_counts(&self) -> (u64, u64) {
        self.state.lock().drop_stats.frame_counts()
    }

    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.state.lock().drop_stats.drop_count
    }

    #[must_use]
    pub fn num_discarded_packets(&self) -> u64 {
        self.state.lock().drop_stats.num_discarded_packets
    }

    #[must_use]
    pub fn num_not_decodable_packets(&self) -> u64 {
        self.state.lock().drop_stats.num_not_decodable_packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Codec, PacketBuilder};

    fn media(seq: u16, ts: u32, marker: bool, first: bool, payload: &[u8]) -> Packet {
        PacketBuilder::new(seq, ts, Bytes::copy_from_slice(payload))
            .marker(marker)
            .first_packet(first)
            .build()
    }

    fn insert(buf: &JitterBuffer, pkt: &Packet, now_ms: u64) -> InsertOutcome {
        let slot = buf.get_frame(pkt, now_ms).unwrap();
        buf.insert_packet(slot, pkt, now_ms).unwrap()
    }

    #[test]
    fn s1_single_packet_delta_frame() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();
        let pkt = media(1234, 0, true, true, &[0u8; 1400]);
        let outcome = insert(&buf, &pkt, 0);
        assert_eq!(outcome, InsertOutcome::FirstPacket);

        let ts = buf.next_complete_timestamp(10, 0).unwrap();
        assert_eq!(ts, RtpTimestamp::new(0));

        let frame = buf.extract_and_set_decode(ts, 0).unwrap();
        assert_eq!(frame.length, 1400);
        assert_eq!(frame.frame_type, FrameType::Delta);
    }

    #[test]
    fn s2_two_packet_out_of_order() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();
        let ts = 33 * 90;
        let p1 = media(1236, ts, true, false, &[1u8; 1400]);
        let p2 = media(1235, ts, false, true, &[2u8; 1400]);

        assert_eq!(insert(&buf, &p1, 0), InsertOutcome::FirstPacket);
        assert_eq!(insert(&buf, &p2, 1), InsertOutcome::CompleteSession);

        let frame = buf.extract_and_set_decode(RtpTimestamp::new(ts), 1).unwrap();
        assert_eq!(frame.length, 2800);
    }

    #[test]
    fn old_packets_are_rejected_after_extraction() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();
        let p1 = media(10, 1000, true, true, &[0u8; 10]);
        insert(&buf, &p1, 0);
        let ts = buf.next_complete_timestamp(0, 0).unwrap();
        buf.extract_and_set_decode(ts, 0).unwrap();

        let stale = media(5, 900, true, true, &[0u8; 10]);
        let err = buf.get_frame(&stale, 10).unwrap_err();
        assert_eq!(err, JitterBufferError::OldPacket { should_flush: false });
    }

    #[test]
    fn s4_nack_generation_with_every_tenth_packet_dropped() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();

        let ts = 99 * 90;
        let first = media(1237, ts, false, true, &[0u8; 10]);
        insert(&buf, &first, 0);

        for i in 1..99u16 {
            if i % 10 == 0 {
                continue;
            }
            let pkt = media(1237 + i, ts, i == 98, false, &[0u8; 10]);
            insert(&buf, &pkt, 0);
        }

        let (nacks, request_key_frame) = buf.get_nack_list();
        assert!(!request_key_frame);
        let expected: Vec<SeqNum> =
            [1247, 1257, 1267, 1277, 1287, 1297, 1307, 1317, 1327].into_iter().map(SeqNum::new).collect();
        assert_eq!(nacks, expected);

        assert!(buf.next_complete_timestamp(0, 0).is_none());
    }

    #[test]
    fn s5_buffer_full_fails_when_the_only_queued_frame_is_the_key_frame() {
        let config = Config::default().with_max_frames(3).with_start_frames(3);
        let buf = JitterBuffer::new(config);
        buf.start();

        let mut key_pkt = media(1, 0, true, true, &[0u8; 10]);
        key_pkt.frame_type = FrameType::Key;
        insert(&buf, &key_pkt, 0);

        for i in 0..2u32 {
            let pkt = media((i + 10) as u16, 1000 + i * 1000, true, true, &[0u8; 10]);
            insert(&buf, &pkt, 0);
        }

        // All 3 slots are full and the oldest queued frame is the key frame
        // itself: `recycle_until_key_frame` has nothing droppable in front of
        // it, so no space is freed.
        let overflow = media(100, 9000, true, true, &[0u8; 10]);
        let err = buf.get_frame(&overflow, 0).unwrap_err();
        assert_eq!(err, JitterBufferError::BufferFull);

        // Once the consumer drains the key frame through the normal
        // extract/release path, a slot is free again.
        let key_ts = buf.next_complete_timestamp(0, 0).unwrap();
        assert_eq!(key_ts, RtpTimestamp::new(0));
        let frame = buf.extract_and_set_decode(key_ts, 0).unwrap();
        buf.release_frame(frame.slot());

        let mut fresh_key = media(200, 10_000, true, true, &[0u8; 10]);
        fresh_key.frame_type = FrameType::Key;
        let outcome = insert(&buf, &fresh_key, 0);
        assert_eq!(outcome, InsertOutcome::FirstPacket);
    }

    #[test]
    fn recycle_drops_leading_delta_frames_to_make_room_for_a_new_frame() {
        let config = Config::default().with_max_frames(2).with_start_frames(2);
        let buf = JitterBuffer::new(config);
        buf.start();

        let delta = media(1, 0, true, true, &[0u8; 10]);
        insert(&buf, &delta, 0);

        let mut key_pkt = media(2, 1000, true, true, &[0u8; 10]);
        key_pkt.frame_type = FrameType::Key;
        insert(&buf, &key_pkt, 0);

        // Both slots are full, but the oldest frame is a plain delta frame:
        // recycling drops it and stops at the key frame behind it, freeing
        // exactly one slot.
        let next = media(3, 2000, true, true, &[0u8; 10]);
        let outcome = insert(&buf, &next, 0);
        assert_eq!(outcome, InsertOutcome::FirstPacket);
        assert_eq!(buf.drop_count(), 1);
    }

    #[test]
    fn buffer_full_with_no_key_frame_anywhere_fails_but_frees_the_backlog() {
        let config = Config::default().with_max_frames(2).with_start_frames(2);
        let buf = JitterBuffer::new(config);
        buf.start();

        insert(&buf, &media(1, 0, true, true, &[0u8; 10]), 0);
        insert(&buf, &media(2, 1000, true, true, &[0u8; 10]), 0);

        let overflow = media(3, 2000, true, true, &[0u8; 10]);
        let err = buf.get_frame(&overflow, 0).unwrap_err();
        assert_eq!(err, JitterBufferError::BufferFull);
        assert_eq!(buf.drop_count(), 2);

        // The backlog was discarded wholesale (no resync point existed); a
        // genuine key frame now has room.
        let mut key_pkt = media(4, 3000, true, true, &[0u8; 10]);
        key_pkt.frame_type = FrameType::Key;
        let outcome = insert(&buf, &key_pkt, 0);
        assert_eq!(outcome, InsertOutcome::FirstPacket);
    }

    #[test]
    fn stop_wakes_a_parked_waiter() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();
        buf.stop();
        assert!(buf.next_complete_timestamp(50, 0).is_none());
    }

    #[test]
    fn flush_returns_all_slots_and_clears_the_queue() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();
        let pkt = media(1, 0, true, true, &[0u8; 10]);
        insert(&buf, &pkt, 0);
        buf.flush();
        assert!(buf.next_maybe_incomplete_timestamp().is_none());
        assert!(buf.get_nack_list().0.is_empty());
    }

    #[test]
    fn uninitialized_buffer_rejects_inserts() {
        let buf = JitterBuffer::new(Config::default());
        let pkt = media(1, 0, true, true, &[0u8; 10]);
        let err = buf.get_frame(&pkt, 0).unwrap_err();
        assert_eq!(err, JitterBufferError::Uninitialized);
    }

    #[test]
    fn partitioned_codec_frame_reports_fragments() {
        let config = Config::default().with_codec(Codec::Partitioned);
        let buf = JitterBuffer::new(config);
        buf.start();

        let mut pkt = media(1, 0, true, true, &[0u8; 10]);
        pkt.codec = Codec::Partitioned;
        pkt.codec_specific = crate::packet::CodecSpecific::Partition(crate::packet::PartitionInfo {
            partition_id: 0,
            beginning_of_partition: true,
        });
        insert(&buf, &pkt, 0);

        let ts = buf.next_complete_timestamp(0, 0).unwrap();
        let frame = buf.extract_and_set_decode(ts, 0).unwrap();
        assert_eq!(frame.partition_fragments.len(), 1);
    }

    #[test]
    fn s6_belated_completion_records_exactly_one_jitter_sample() {
        let buf = JitterBuffer::new(Config::default());
        buf.start();
        buf.update_rtt(100);

        // Exit the initial decoding state with one clean key frame so the
        // later gapped delta frame is eligible for `next_maybe_incomplete_timestamp`.
        let mut key_pkt = media(1, 0, true, true, &[0u8; 10]);
        key_pkt.frame_type = FrameType::Key;
        insert(&buf, &key_pkt, 0);
        let key_ts = buf.next_complete_timestamp(0, 0).unwrap();
        let key_frame = buf.extract_and_set_decode(key_ts, 0).unwrap();
        buf.release_frame(key_frame.slot());

        // A 3-packet delta frame missing its middle packet: with rtt_ms=100
        // the decodability allowance covers the one missing index, so the
        // slot reaches `Decodable` without ever reaching `Complete`.
        let p1 = media(10, 1000, false, true, &[1u8; 10]);
        let p3 = media(12, 1000, true, false, &[3u8; 10]);
        insert(&buf, &p1, 33);
        insert(&buf, &p3, 33);

        assert!(buf.next_complete_timestamp(0, 33).is_none());
        let ts = buf.next_maybe_incomplete_timestamp().unwrap();
        assert_eq!(ts, RtpTimestamp::new(1000));

        let frame = buf.extract_and_set_decode(ts, 50).unwrap();
        assert!(!frame.is_complete);
        assert!(buf.state.lock().waiting_for_completion.is_some());

        // A belated packet for the same timestamp, still within the
        // completion-wait timeout: it's absorbed silently, no sample yet.
        let late = media(11, 1000, false, false, &[2u8; 10]);
        let err = buf.get_frame(&late, 550).unwrap_err();
        assert_eq!(err, JitterBufferError::OldPacket { should_flush: false });
        assert!(buf.state.lock().waiting_for_completion.is_some());

        // Past the timeout: the cached entry is finalized into exactly one
        // jitter sample and cleared, so nothing is left to double-count.
        let later = media(11, 1000, false, false, &[2u8; 10]);
        let err = buf.get_frame(&later, 50 + 2000).unwrap_err();
        assert_eq!(err, JitterBufferError::OldPacket { should_flush: false });
        assert!(buf.state.lock().waiting_for_completion.is_none());
    }
}
