//! Inbound rate and drop statistics.
//!
//! Grounded on `jitter_buffer.cc::GetUpdate`'s `_incomingFrameRate`/
//! `_incomingBitRate` windowing: counts accumulate for up to ~1000ms, then
//! fold into an average with the previous window's rate rather than
//! replacing it outright.

use crate::packet::FrameType;

/// A point-in-time snapshot of [`IncomingRateStatistics`], serializable
/// behind `serde-stats` for callers that export telemetry as JSON.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde-stats", derive(serde::Serialize, serde::Deserialize))]
pub struct RateSnapshot {
    pub frame_rate: u32,
    pub bit_rate_bps: u32,
}

impl RateSnapshot {
    /// Serializes this snapshot as JSON. Only meaningful with `serde-stats`
    /// enabled; without it, every field is still reachable directly.
    #[cfg(feature = "serde-stats")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Exponentially-smoothed frame-rate / bit-rate tracker over ~1000ms
/// windows (`VCMJitterBuffer::GetUpdate`).
#[derive(Clone, Copy, Debug, Default)]
pub struct IncomingRateStatistics {
    frame_count: u32,
    bit_count: u64,
    time_last_update_ms: u64,
    incoming_frame_rate: u32,
    incoming_bit_rate: u32,
}

impl IncomingRateStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one newly-received frame of `size_bytes`, at time `now_ms`.
    pub fn update(&mut self, size_bytes: usize, now_ms: u64) {
        self.frame_count += 1;
        self.bit_count += size_bytes as u64 * 8;
        if self.time_last_update_ms == 0 {
            self.time_last_update_ms = now_ms;
        }
    }

    /// Returns `(frame_rate, bit_rate_bps)`, folding in the current window
    /// if at least ~1000ms have elapsed since the last fold; otherwise
    /// reports the last folded rates unchanged.
    pub fn rates(&mut self, now_ms: u64) -> (u32, u32) {
        let mut diff = now_ms.saturating_sub(self.time_last_update_ms);

        if diff < 1000 && self.incoming_frame_rate > 0 && self.incoming_bit_rate > 0 {
            return (self.incoming_frame_rate, self.incoming_bit_rate);
        }

        if self.frame_count == 0 {
            self.time_last_update_ms = now_ms;
            self.incoming_bit_rate = 0;
            return (0, 0);
        }

        if diff == 0 {
            diff = 1;
        }

        let mut rate = 0.5 + (self.frame_count as f64 * 1000.0) / diff as f64;
        if rate < 1.0 {
            rate = 1.0;
        }

        let frame_rate = (self.incoming_frame_rate + rate as u32) / 2;
        self.incoming_frame_rate = rate as u32;

        let bit_rate = if self.bit_count == 0 {
            0
        } else {
            (10 * ((100 * self.bit_count) / diff.max(1))) as u32
        };
        self.incoming_bit_rate = bit_rate;

        self.frame_count = 0;
        self.bit_count = 0;
        self.time_last_update_ms = now_ms;

        (frame_rate, bit_rate)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// [`Self::rates`] wrapped in the serializable [`RateSnapshot`] shape.
    pub fn snapshot(&mut self, now_ms: u64) -> RateSnapshot {
        let (frame_rate, bit_rate_bps) = self.rates(now_ms);
        RateSnapshot { frame_rate, bit_rate_bps }
    }
}

/// Serializable snapshot of [`DropStatistics`], for callers that export
/// telemetry as JSON via `serde-stats`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde-stats", derive(serde::Serialize, serde::Deserialize))]
pub struct DropSnapshot {
    pub drop_count: u64,
    pub num_discarded_packets: u64,
    pub num_not_decodable_packets: u64,
    pub delta_frames: u64,
    pub key_frames: u64,
}

impl DropSnapshot {
    #[cfg(feature = "serde-stats")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Drop and discard counters, broken out per the error taxonomy in §7.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropStatistics {
    pub drop_count: u64,
    pub num_discarded_packets: u64,
    pub num_not_decodable_packets: u64,
    key_frames: u64,
    delta_frames: u64,
}

impl DropStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_released_frame(&mut self, frame_type: FrameType) {
        if frame_type.is_key() {
            self.key_frames += 1;
        } else {
            self.delta_frames += 1;
        }
    }

    #[must_use]
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.delta_frames, self.key_frames)
    }

    pub fn reset(&mut self) {
        let preserved_discarded = self.num_discarded_packets;
        *self = Self::default();
        // `flush` preserves num_discarded_packets per the jitter buffer
        // contract; callers that want a full reset use `Default::default()`.
        self.num_discarded_packets = preserved_discarded;
    }

    #[must_use]
    pub fn snapshot(&self) -> DropSnapshot {
        DropSnapshot {
            drop_count: self.drop_count,
            num_discarded_packets: self.num_discarded_packets,
            num_not_decodable_packets: self.num_not_decodable_packets,
            delta_frames: self.delta_frames,
            key_frames: self.key_frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_zero_before_any_frame() {
        let mut stats = IncomingRateStatistics::new();
        assert_eq!(stats.rates(0), (0, 0));
    }

    #[test]
    fn steady_thirty_fps_settles_near_thirty() {
        let mut stats = IncomingRateStatistics::new();
        let mut now = 0u64;
        let mut last_rates = (0, 0);
        for _ in 0..3 {
            for _ in 0..30 {
                stats.update(1000, now);
                now += 33;
            }
            last_rates = stats.rates(now);
        }
        assert!((25..=35).contains(&last_rates.0));
        assert!(last_rates.1 > 0);
    }

    #[test]
    fn no_frames_since_last_call_reports_zero() {
        let mut stats = IncomingRateStatistics::new();
        stats.update(1000, 0);
        stats.rates(1000);
        assert_eq!(stats.rates(5000), (0, 0));
    }

    #[test]
    fn drop_statistics_preserve_discard_count_on_reset() {
        let mut stats = DropStatistics::new();
        stats.num_discarded_packets = 5;
        stats.drop_count = 3;
        stats.note_released_frame(FrameType::Key);
        stats.reset();
        assert_eq!(stats.num_discarded_packets, 5);
        assert_eq!(stats.drop_count, 0);
        assert_eq!(stats.frame_counts(), (0, 0));
    }

    #[test]
    fn drop_snapshot_mirrors_live_counters() {
        let mut stats = DropStatistics::new();
        stats.note_released_frame(FrameType::Key);
        stats.note_released_frame(FrameType::Delta);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.key_frames, 1);
        assert_eq!(snapshot.delta_frames, 1);
    }
}
