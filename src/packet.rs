//! The only input type the jitter buffer core consumes: one RTP payload unit,
//! as produced by a codec-specific depacketizer external to this crate.

use bytes::Bytes;

use crate::seq::{RtpTimestamp, SeqNum};

/// Which kind of video frame a packet belongs to.
///
/// `Empty` marks non-media padding or FEC packets: they occupy a sequence
/// number but carry no decodable bytes and must never bias timing estimates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum FrameType {
    Key,
    Delta,
    Golden,
    AltRef,
    Empty,
}

impl FrameType {
    #[must_use]
    pub fn is_key(self) -> bool {
        self == FrameType::Key
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self == FrameType::Empty
    }
}

/// Opaque codec identity. This crate does not depacketize RTP itself; it
/// only needs to know enough to pick the right session-assembly rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Codec {
    /// NAL-unit-per-packet or fragmented NAL units, start-code delimited.
    Avc,
    /// Partition-based codec (VP8-style): packets carry a partition id and
    /// a beginning-of-partition flag.
    Partitioned,
    /// Legacy bit-continuation codec: adjacent packets may share a byte
    /// boundary that must be OR-merged at finalisation.
    BitContinuation,
}

/// NAL-unit completeness of one packet, as derived by the depacketizer from
/// codec-specific RTP header bits.
///
/// `Unset` is the sentinel for "no packet has arrived at this index" — it is
/// never produced by a depacketizer for a packet that actually arrived.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum NaluCompleteness {
    #[default]
    Unset,
    Start,
    Incomplete,
    End,
    Complete,
}

impl NaluCompleteness {
    #[must_use]
    pub fn starts_nalu(self) -> bool {
        matches!(self, NaluCompleteness::Start | NaluCompleteness::Complete)
    }

    #[must_use]
    pub fn ends_nalu(self) -> bool {
        matches!(self, NaluCompleteness::End | NaluCompleteness::Complete)
    }
}

/// Partition metadata for [`Codec::Partitioned`] streams.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct PartitionInfo {
    pub partition_id: u8,
    pub beginning_of_partition: bool,
}

/// Codec-specific per-packet data that doesn't fit cleanly into the common
/// fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum CodecSpecific {
    #[default]
    None,
    Partition(PartitionInfo),
    PictureId(u16),
}

/// One RTP payload unit, already stripped of transport/crypto framing by an
/// external depacketizer.
///
/// All fields are immutable once constructed; the jitter buffer takes
/// ownership of `payload` on insert.
#[derive(Clone, Debug)]
pub struct Packet {
    pub seq_num: SeqNum,
    pub rtp_timestamp: RtpTimestamp,
    /// True on the last packet of a frame, by RTP marker-bit convention.
    pub marker: bool,
    /// Set by the depacketizer for codec-specific start markers.
    pub is_first_packet_in_frame: bool,
    pub payload: Bytes,
    pub frame_type: FrameType,
    pub codec: Codec,
    pub nalu_completeness: NaluCompleteness,
    pub codec_specific: CodecSpecific,
    /// When true, the assembler prepends a 4-byte `00 00 00 01` start code
    /// before this packet's payload.
    pub insert_start_code: bool,
    /// When true, this packet's first and/or last byte must be OR-merged
    /// with a neighbor at `prepare_for_decode` time.
    pub continuation_bits: bool,
}

impl Packet {
    /// Payload length in bytes, as received (before any start-code prepend).
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Builds packets for tests and for callers that want sane defaults for the
/// fields a given codec doesn't use.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    packet: Packet,
}

impl PacketBuilder {
    #[must_use]
    pub fn new(seq_num: u16, rtp_timestamp: u32, payload: Bytes) -> Self {
        Self {
            packet: Packet {
                seq_num: SeqNum::new(seq_num),
                rtp_timestamp: RtpTimestamp::new(rtp_timestamp),
                marker: false,
                is_first_packet_in_frame: false,
                payload,
                frame_type: FrameType::Delta,
                codec: Codec::Avc,
                nalu_completeness: NaluCompleteness::Complete,
                codec_specific: CodecSpecific::None,
                insert_start_code: false,
                continuation_bits: false,
            },
        }
    }

    #[must_use]
    pub fn marker(mut self, marker: bool) -> Self {
        self.packet.marker = marker;
        self
    }

    #[must_use]
    pub fn first_packet(mut self, first: bool) -> Self {
        self.packet.is_first_packet_in_frame = first;
        self
    }

    #[must_use]
    pub fn frame_type(mut self, frame_type: FrameType) -> Self {
        self.packet.frame_type = frame_type;
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: Codec) -> Self {
        self.packet.codec = codec;
        self
    }

    #[must_use]
    pub fn nalu_completeness(mut self, completeness: NaluCompleteness) -> Self {
        self.packet.nalu_completeness = completeness;
        self
    }

    #[must_use]
    pub fn codec_specific(mut self, specific: CodecSpecific) -> Self {
        self.packet.codec_specific = specific;
        self
    }

    #[must_use]
    pub fn insert_start_code(mut self, insert: bool) -> Self {
        self.packet.insert_start_code = insert;
        self
    }

    #[must_use]
    pub fn continuation_bits(mut self, continuation: bool) -> Self {
        self.packet.continuation_bits = continuation;
        self
    }

    #[must_use]
    pub fn build(self) -> Packet {
        self.packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_sane() {
        let pkt = PacketBuilder::new(1, 90_000, Bytes::from_static(b"abcd"))
            .marker(true)
            .first_packet(true)
            .frame_type(FrameType::Key)
            .build();

        assert_eq!(pkt.seq_num, SeqNum::new(1));
        assert!(pkt.marker);
        assert!(pkt.is_first_packet_in_frame);
        assert_eq!(pkt.frame_type, FrameType::Key);
        assert_eq!(pkt.size_bytes(), 4);
    }

    #[test]
    fn empty_frame_type_is_empty() {
        assert!(FrameType::Empty.is_empty());
        assert!(!FrameType::Key.is_empty());
        assert!(FrameType::Key.is_key());
    }
}
