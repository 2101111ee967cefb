//! Converts (RTP-timestamp delta, wallclock delta) pairs into one filtered
//! inter-frame delay sample, rejecting reordered arrivals.
//!
//! Grounded on the inter-frame timing half of the original's frame-release
//! path in `jitter_buffer.cc` (the delay feeding `VCMJitterEstimator::UpdateEstimate`).

use crate::seq::RtpTimestamp;

/// Default RTP clock rate assumed for video (90 kHz).
pub const DEFAULT_RTP_HZ: u32 = 90_000;

/// Converts successive (timestamp, wallclock) pairs into delay samples.
#[derive(Clone, Copy, Debug)]
pub struct DelayEstimator {
    last: Option<(RtpTimestamp, u64)>,
    rtp_hz: u32,
}

impl Default for DelayEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_RTP_HZ)
    }
}

impl DelayEstimator {
    #[must_use]
    pub fn new(rtp_hz: u32) -> Self {
        Self { last: None, rtp_hz }
    }

    /// Computes one delay sample in ms, or `None` if this is the first
    /// frame seen, the timestamp repeats, or the arrival is reordered
    /// (negative RTP delta after modular unwrap).
    pub fn compute_delay_ms(&mut self, timestamp: RtpTimestamp, wallclock_ms: u64) -> Option<i64> {
        let Some((last_ts, last_wall)) = self.last else {
            self.last = Some((timestamp, wallclock_ms));
            return None;
        };

        if timestamp == last_ts {
            return None;
        }

        let rtp_delta_ticks = timestamp.wrapping_distance(last_ts);
        if rtp_delta_ticks <= 0 {
            return None;
        }

        let rtp_delta_ms = (rtp_delta_ticks * 1000) / i64::from(self.rtp_hz);
        let wallclock_delta_ms = wallclock_ms as i64 - last_wall as i64;
        self.last = Some((timestamp, wallclock_ms));

        Some(wallclock_delta_ms - rtp_delta_ms)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
