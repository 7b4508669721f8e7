//! TDS 5.0 packet header definitions and message fragmentation.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum TDS packet size (64KB - 1).
pub const MAX_PACKET_SIZE: usize = 65535;

/// Smallest packet size a client may negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Packet size used until the login exchange negotiates another.
pub const DEFAULT_PACKET_SIZE: usize = 512;

/// TDS 5.0 buffer (packet) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BufferType {
    /// Language request (pre-5.0 clients).
    Lang = 1,
    /// Login record.
    Login = 2,
    /// Remote procedure call (pre-5.0 clients).
    Rpc = 3,
    /// Server response.
    Response = 4,
    /// Unformatted data.
    Unformatted = 5,
    /// Attention (cancel) signal.
    Attention = 6,
    /// Bulk copy data.
    Bulk = 7,
    /// Protocol setup.
    Setup = 8,
    /// Close connection.
    Close = 9,
    /// Protocol error.
    Error = 10,
    /// Protocol acknowledgement.
    ProtAck = 11,
    /// Echo request.
    Echo = 12,
    /// Logout.
    Logout = 13,
    /// End of parameters.
    EndParam = 14,
    /// TDS 5.0 token stream request.
    Normal = 15,
    /// Urgent event.
    Urgent = 16,
    /// Connection migration.
    Migrate = 17,
    /// Hello.
    Hello = 18,
    /// Command sequence, normal.
    CmdSeqNormal = 24,
    /// Command sequence, login.
    CmdSeqLogin = 25,
    /// Command sequence, liveness.
    CmdSeqLiveness = 26,
}

impl BufferType {
    /// Create a buffer type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            1 => Self::Lang,
            2 => Self::Login,
            3 => Self::Rpc,
            4 => Self::Response,
            5 => Self::Unformatted,
            6 => Self::Attention,
            7 => Self::Bulk,
            8 => Self::Setup,
            9 => Self::Close,
            10 => Self::Error,
            11 => Self::ProtAck,
            12 => Self::Echo,
            13 => Self::Logout,
            14 => Self::EndParam,
            15 => Self::Normal,
            16 => Self::Urgent,
            17 => Self::Migrate,
            18 => Self::Hello,
            24 => Self::CmdSeqNormal,
            25 => Self::CmdSeqLogin,
            26 => Self::CmdSeqLiveness,
            _ => return Err(ProtocolError::InvalidPacketType(value)),
        })
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets follow.
        const NORMAL = 0x00;
        /// Last packet of the logical message.
        const END_OF_MESSAGE = 0x01;
        /// Acknowledges an attention request.
        const ATTENTION_ACK = 0x02;
        /// Attention request.
        const ATTENTION = 0x04;
        /// Event notification.
        const EVENT = 0x08;
        /// Sealed payload.
        const SEAL = 0x10;
        /// Encrypted payload.
        const ENCRYPT = 0x20;
        /// Symmetric-key encrypted payload.
        const SYM_ENCRYPT = 0x40;
    }
}

/// TDS packet header.
///
/// Every physical packet begins with this 8-byte header. The length field
/// counts the header itself and is big-endian regardless of the byte order
/// negotiated for the token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of buffer.
    pub buffer_type: BufferType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Channel number (0 for the main channel).
    pub channel: u16,
    /// Packet sequence number within the message (wraps at 256).
    pub packet_number: u8,
    /// Window (unused, 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(buffer_type: BufferType, status: PacketStatus, length: u16) -> Self {
        Self {
            buffer_type,
            status,
            length,
            channel: 0,
            packet_number: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    ///
    /// Unknown status bits are kept as-is so that flags from newer servers
    /// never fail framing.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let buffer_type = BufferType::from_u8(src.get_u8())?;
        let status = PacketStatus::from_bits_retain(src.get_u8());
        let length = src.get_u16();
        let channel = src.get_u16();
        let packet_number = src.get_u8();
        let window = src.get_u8();

        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength(length as usize));
        }

        Ok(Self {
            buffer_type,
            status,
            length,
            channel,
            packet_number,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.buffer_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.channel);
        dst.put_u8(self.packet_number);
        dst.put_u8(self.window);
    }

    /// Encode the packet header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Check if the server flagged this packet as an attention acknowledgement.
    #[must_use]
    pub const fn is_attention_ack(&self) -> bool {
        self.status.contains(PacketStatus::ATTENTION_ACK)
    }

    /// Set the packet sequence number.
    #[must_use]
    pub const fn with_packet_number(mut self, number: u8) -> Self {
        self.packet_number = number;
        self
    }
}

/// Split a logical message into physical packets of at most `packet_size`
/// bytes each.
///
/// Returns `(header, payload)` pairs with lengths and sequence numbers
/// filled in. An empty message still produces one end-of-message packet.
/// Sequence numbers start at 0 and wrap modulo 256.
pub fn fragment(
    payload: &Bytes,
    buffer_type: BufferType,
    packet_size: usize,
) -> Result<Vec<(PacketHeader, Bytes)>, ProtocolError> {
    if !(PACKET_HEADER_SIZE < packet_size && packet_size <= MAX_PACKET_SIZE) {
        return Err(ProtocolError::InvalidPacketLength(packet_size));
    }
    let chunk = packet_size - PACKET_HEADER_SIZE;
    let count = payload.len().div_ceil(chunk).max(1);

    let mut packets = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * chunk;
        let end = (start + chunk).min(payload.len());
        let body = payload.slice(start..end);
        let status = if i + 1 == count {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let length = (PACKET_HEADER_SIZE + body.len()) as u16;
        let header = PacketHeader::new(buffer_type, status, length).with_packet_number(i as u8);
        packets.push((header, body));
    }
    Ok(packets)
}

/// Reassemble logical messages from a contiguous run of encoded packets.
///
/// Each returned entry is one complete message, split exactly at its
/// end-of-message packet. Trailing packets without end-of-message, a
/// truncated header or a length that overruns the input are errors.
pub fn reassemble(mut src: &[u8]) -> Result<Vec<(BufferType, Bytes)>, ProtocolError> {
    let mut messages = Vec::new();
    let mut current = BytesMut::new();
    let mut current_type = None;

    while !src.is_empty() {
        let header = PacketHeader::decode(&mut src)?;
        let body_len = header.payload_length();
        if src.len() < body_len {
            return Err(ProtocolError::IncompletePacket {
                expected: body_len,
                actual: src.len(),
            });
        }
        current.extend_from_slice(&src[..body_len]);
        src.advance(body_len);
        current_type.get_or_insert(header.buffer_type);

        if header.is_end_of_message() {
            if let Some(buffer_type) = current_type.take() {
                messages.push((buffer_type, current.split().freeze()));
            }
        }
    }

    if current_type.is_some() {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(messages)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_all(packets: &[(PacketHeader, Bytes)]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for (header, body) in packets {
            header.encode(&mut out);
            out.extend_from_slice(body);
        }
        out.to_vec()
    }

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            buffer_type: BufferType::Normal,
            status: PacketStatus::END_OF_MESSAGE,
            length: 100,
            channel: 3,
            packet_number: 1,
            window: 0,
        };

        let bytes = header.encode_to_bytes();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE);

        let mut cursor = bytes.as_ref();
        let decoded = PacketHeader::decode(&mut cursor).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_length_is_big_endian() {
        let header = PacketHeader::new(BufferType::Response, PacketStatus::END_OF_MESSAGE, 0x0200);
        let bytes = header.encode_to_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x01, 0x02, 0x00]);
    }

    #[test]
    fn test_payload_length() {
        let header = PacketHeader::new(BufferType::Normal, PacketStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn test_buffer_type_from_u8() {
        assert_eq!(BufferType::from_u8(0x0F).unwrap(), BufferType::Normal);
        assert_eq!(BufferType::from_u8(0x04).unwrap(), BufferType::Response);
        assert!(BufferType::from_u8(0x20).is_err());
        assert!(BufferType::from_u8(0).is_err());
    }

    #[test]
    fn test_decode_rejects_short_length() {
        let bytes = [0x04, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        let mut cursor = &bytes[..];
        assert_eq!(
            PacketHeader::decode(&mut cursor),
            Err(ProtocolError::InvalidPacketLength(4))
        );
    }

    #[test]
    fn test_fragment_marks_only_last() {
        let payload = Bytes::from(vec![0xAB; 1200]);
        let packets = fragment(&payload, BufferType::Normal, 512).unwrap();
        assert_eq!(packets.len(), 3);
        for (i, (header, body)) in packets.iter().enumerate() {
            assert!(header.length as usize <= 512);
            assert_eq!(header.packet_number, i as u8);
            assert_eq!(header.payload_length(), body.len());
            assert_eq!(header.is_end_of_message(), i == 2);
        }
    }

    #[test]
    fn test_fragment_empty_payload() {
        let packets = fragment(&Bytes::new(), BufferType::Attention, 512).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].0.is_end_of_message());
        assert_eq!(packets[0].0.length as usize, PACKET_HEADER_SIZE);
    }

    #[test]
    fn test_fragment_rejects_tiny_packet_size() {
        assert!(fragment(&Bytes::new(), BufferType::Normal, 8).is_err());
    }

    #[test]
    fn test_reassemble_back_to_back_messages() {
        let first = Bytes::from(vec![1u8; 700]);
        let second = Bytes::from_static(b"second");
        let mut wire = encode_all(&fragment(&first, BufferType::Response, 512).unwrap());
        wire.extend(encode_all(&fragment(&second, BufferType::Response, 512).unwrap()));

        let messages = reassemble(&wire).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, first);
        assert_eq!(messages[1].1, second);
    }

    #[test]
    fn test_reassemble_truncated() {
        let wire = encode_all(&fragment(&Bytes::from(vec![7u8; 600]), BufferType::Response, 512).unwrap());
        assert!(reassemble(&wire[..wire.len() - 1]).is_err());
        assert!(reassemble(&wire[..512]).is_err());
        assert!(reassemble(&wire[..5]).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fragment_then_reassemble(
                payload in proptest::collection::vec(any::<u8>(), 0..4096),
                packet_size in 9usize..2048,
            ) {
                let payload = Bytes::from(payload);
                let packets = fragment(&payload, BufferType::Normal, packet_size).unwrap();
                let last = packets.len() - 1;
                for (i, (header, _)) in packets.iter().enumerate() {
                    prop_assert!(header.length as usize <= packet_size);
                    prop_assert_eq!(header.is_end_of_message(), i == last);
                }
                let messages = reassemble(&encode_all(&packets)).unwrap();
                prop_assert_eq!(messages.len(), 1);
                prop_assert_eq!(&messages[0].1, &payload);
            }
        }
    }
}
