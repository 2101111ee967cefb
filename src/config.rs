//! Tunable thresholds for the jitter buffer, collected into one `Config`
//! value rather than scattered free constants (builder-style, mirroring the
//! reference driver's per-feature `Config` types).

use std::time::Duration;

use crate::packet::Codec;

/// Default, and minimum sane, number of frame slots the pool starts with.
pub const START_FRAMES: usize = 32;
/// Default maximum number of frame slots the pool may grow to.
pub const MAX_FRAMES: usize = 256;
/// Default maximum number of packets a single frame's session may hold.
pub const MAX_PACKETS_PER_FRAME: usize = 1024;
/// Default maximum size of the NACK candidate list.
pub const MAX_NACK_LIST_SIZE: usize = 250;
/// Default maximum age (in sequence-number distance) of the oldest NACK
/// candidate before the list is considered stale.
pub const MAX_PACKET_AGE_TO_NACK: u16 = 450;
/// Default "too long non-decodable" duration; 0 disables the policy.
pub const MAX_INCOMPLETE_TIME_MS: u32 = 0;
/// Number of consecutive old/duplicate-of-decoded frames before a flush is
/// requested.
pub const MAX_CONSECUTIVE_OLD_FRAMES: u32 = 60;
/// Number of consecutive old packets before a flush is requested.
pub const MAX_CONSECUTIVE_OLD_PACKETS: u32 = 300;
/// How long to wait for a belated completion sample before reporting the
/// frame's size as final.
pub const WAITING_FOR_COMPLETION_TIMEOUT_MS: u64 = 2000;
/// RTT ceiling, in ms, above which the NACK method is no longer viable.
pub const NACK_MAX_RTT_MS: u32 = 200;
/// RTT floor, in ms, below which a hybrid NACK/FEC policy counts on FEC
/// alone (`HybridNackTH::kLowRttNackMs`).
pub const LOW_RTT_NACK_MS: u32 = 20;
/// RTT ceiling, in ms, above which a hybrid NACK/FEC policy gives up on
/// NACK and counts on FEC alone (`HybridNackTH::kHighRttNackMs`). Shared
/// between the jitter buffer's wait-for-retransmission policy and the
/// protection selector's own hybrid method, same as upstream.
pub const HIGH_RTT_NACK_MS: u32 = 100;
/// RTT ceiling, in ms, above which an intra-frame request is no longer
/// viable.
pub const IREQ_MAX_RTT_MS: u32 = 150;
/// Minimum bit rate, in kbps, for macroblock refresh to be viable.
pub const MBREF_MIN_BITRATE_KBPS: u32 = 150;
/// Number of 1-second samples retained for the loss-probability history.
pub const LOSS_PR_HISTORY_SIZE: usize = 30;
/// Width, in ms, of one loss-probability history bucket.
pub const LOSS_PR_SHORT_WIN_MS: u64 = 1000;
/// RTT assumed before the first real RTT sample arrives.
pub const DEFAULT_RTT_MS: u32 = 200;

/// NACK request policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde-stats", derive(serde::Serialize, serde::Deserialize))]
pub enum NackMode {
    /// Never wait for retransmissions; release incomplete frames immediately.
    Off,
    /// Always wait for retransmissions of the oldest incomplete frame.
    Infinite,
    /// Wait only while the measured RTT is below `high_rtt_nack_threshold_ms`.
    Hybrid,
}

/// All tunable thresholds for one [`crate::buffer::JitterBuffer`] instance.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-stats", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub start_frames: usize,
    pub max_frames: usize,
    pub max_packets_per_frame: usize,
    pub max_nack_list_size: usize,
    pub max_packet_age_to_nack: u16,
    pub max_incomplete_time_ms: u32,
    pub max_consecutive_old_frames: u32,
    pub max_consecutive_old_packets: u32,
    pub waiting_for_completion_timeout: Duration,
    pub nack_mode: NackMode,
    pub low_rtt_nack_threshold_ms: u32,
    pub high_rtt_nack_threshold_ms: u32,
    /// When true, a complete key frame may be released even when it is not
    /// continuous with the decoding state (decode-with-errors policy).
    pub decode_with_errors: bool,
    /// Which codec-specific reassembly rule `make_decodable`/
    /// `prepare_for_decode`/`build_partition_header` apply at extraction.
    /// One buffer instance serves one codec family.
    pub codec: Codec,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_frames: START_FRAMES,
            max_frames: MAX_FRAMES,
            max_packets_per_frame: MAX_PACKETS_PER_FRAME,
            max_nack_list_size: MAX_NACK_LIST_SIZE,
            max_packet_age_to_nack: MAX_PACKET_AGE_TO_NACK,
            max_incomplete_time_ms: MAX_INCOMPLETE_TIME_MS,
            max_consecutive_old_frames: MAX_CONSECUTIVE_OLD_FRAMES,
            max_consecutive_old_packets: MAX_CONSECUTIVE_OLD_PACKETS,
            waiting_for_completion_timeout: Duration::from_millis(
                WAITING_FOR_COMPLETION_TIMEOUT_MS,
            ),
            nack_mode: NackMode::Hybrid,
            low_rtt_nack_threshold_ms: LOW_RTT_NACK_MS,
            high_rtt_nack_threshold_ms: HIGH_RTT_NACK_MS,
            decode_with_errors: false,
            codec: Codec::Avc,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    #[must_use]
    pub fn with_start_frames(mut self, start_frames: usize) -> Self {
        self.start_frames = start_frames;
        self
    }

    #[must_use]
    pub fn with_nack_mode(mut self, mode: NackMode, low_rtt_ms: u32, high_rtt_ms: u32) -> Self {
        self.nack_mode = mode;
        self.low_rtt_nack_threshold_ms = low_rtt_ms;
        self.high_rtt_nack_threshold_ms = high_rtt_ms;
        self
    }

    #[must_use]
    pub fn with_nack_settings(
        mut self,
        max_list_size: usize,
        max_packet_age: u16,
        max_incomplete_time_ms: u32,
    ) -> Self {
        self.max_nack_list_size = max_list_size;
        self.max_packet_age_to_nack = max_packet_age;
        self.max_incomplete_time_ms = max_incomplete_time_ms;
        self
    }

    #[must_use]
    pub fn with_decode_with_errors(mut self, enabled: bool) -> Self {
        self.decode_with_errors = enabled;
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}
