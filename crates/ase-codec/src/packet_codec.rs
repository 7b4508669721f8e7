//! TDS 5.0 packet codec implementation.

use bytes::{BufMut, Bytes, BytesMut};
use tds5_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A TDS packet with header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Packet payload (excluding header).
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet with the given header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get the total packet size including header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// TDS packet codec for tokio-util framing.
///
/// Decoding validates the header (buffer type, length bounds) before waiting
/// for the body, so a corrupt length never makes the reader buffer
/// unbounded data. Encoding writes the header as given apart from the
/// length, which is recomputed from the payload.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    /// Maximum packet size to accept or emit.
    max_packet_size: usize,
}

impl PacketCodec {
    /// Create a codec accepting packets up to the protocol maximum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Create a codec with a custom maximum packet size.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.set_max_packet_size(size);
        self
    }

    /// Change the maximum packet size.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size.clamp(PACKET_HEADER_SIZE + 1, MAX_PACKET_SIZE);
    }

    /// The current maximum packet size.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least a header to proceed
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        // Validate the header before waiting for the body
        let header = PacketHeader::decode(&mut &src[..PACKET_HEADER_SIZE])?;
        let length = header.length as usize;
        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader);
        }
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut packet_bytes = src.split_to(length);
        let payload = packet_bytes.split_off(PACKET_HEADER_SIZE).freeze();

        tracing::trace!(
            buffer_type = ?header.buffer_type,
            length = length,
            packet_number = header.packet_number,
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() => Ok(None),
            None => Err(CodecError::TruncatedPacket(buf.len())),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = item.total_size();

        if total_length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);

        let mut header = item.header;
        header.length = total_length as u16;
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            buffer_type = ?header.buffer_type,
            length = total_length,
            packet_number = header.packet_number,
            "encoded TDS packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds5_protocol::packet::{BufferType, PacketStatus};
    use tds5_protocol::ProtocolError;

    fn raw_packet(buffer_type: u8, length: u16, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(buffer_type);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(length);
        data.put_u16(0); // channel
        data.put_u8(0); // packet number
        data.put_u8(0); // window
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_packet() {
        let mut codec = PacketCodec::new();
        let mut data = raw_packet(BufferType::Response as u8, 12, b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.buffer_type, BufferType::Response);
        assert!(packet.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn test_encode_packet() {
        let mut codec = PacketCodec::new();
        let header = PacketHeader::new(BufferType::Normal, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, Bytes::from_static(b"test"));

        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();

        assert_eq!(dst.len(), 12);
        assert_eq!(dst[0], BufferType::Normal as u8);
        assert_eq!(&dst[2..4], &[0, 12]);
    }

    #[test]
    fn test_incomplete_packet() {
        let mut codec = PacketCodec::new();
        let mut data = raw_packet(BufferType::Response as u8, 12, b"te");
        assert!(codec.decode(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_truncated_at_eof() {
        let mut codec = PacketCodec::new();
        let mut data = BytesMut::from(&[4u8, 1, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut data),
            Err(CodecError::TruncatedPacket(3))
        ));
    }

    #[test]
    fn test_unknown_buffer_type() {
        let mut codec = PacketCodec::new();
        let mut data = raw_packet(0x63, 8, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::Protocol(ProtocolError::InvalidPacketType(0x63)))
        ));
    }

    #[test]
    fn test_length_bounds() {
        let mut codec = PacketCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(BufferType::Response as u8, 4, b"");
        assert!(codec.decode(&mut data).is_err());

        let mut data = raw_packet(BufferType::Response as u8, 1024, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::PacketTooLarge { size: 1024, max: 512 })
        ));
    }
}
