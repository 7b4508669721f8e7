//! TDS message reassembly.
//!
//! A logical message spans one or more packets; the last carries the
//! end-of-message status. The assembler buffers payloads until then and
//! starts afresh on the next packet, so back-to-back messages never merge.

use bytes::{Bytes, BytesMut};
use tds5_protocol::packet::BufferType;

use crate::packet_codec::Packet;

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Buffer type of the first packet.
    pub buffer_type: BufferType,
    /// The complete message payload (all packets combined).
    pub payload: Bytes,
    /// Whether any packet carried the attention-acknowledge status.
    pub attention_ack: bool,
}

impl Message {
    /// Create a message from a single packet.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Self {
        Self {
            buffer_type: packet.header.buffer_type,
            attention_ack: packet.header.is_attention_ack(),
            payload: packet.payload,
        }
    }

    /// Get the message payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reassembles packets into complete messages.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    buffer_type: Option<BufferType>,
    attention_ack: bool,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create a new message assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet into the assembler.
    ///
    /// Returns `Some(Message)` if this packet completes a message,
    /// `None` if more packets are needed.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let buffer_type = *self.buffer_type.get_or_insert(packet.header.buffer_type);
        self.attention_ack |= packet.header.is_attention_ack();
        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            buffer_type = ?buffer_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.is_end_of_message(),
            "assembling message"
        );

        if !packet.is_end_of_message() {
            return None;
        }

        let message = Message {
            buffer_type,
            payload: self.buffer.split().freeze(),
            attention_ack: self.attention_ack,
        };
        self.buffer_type = None;
        self.attention_ack = false;
        self.packet_count = 0;
        Some(message)
    }

    /// Check if the assembler has partial data buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buffer_type.is_some()
    }

    /// Get the number of packets accumulated so far.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Clear any partial message data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.buffer_type = None;
        self.attention_ack = false;
        self.packet_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tds5_protocol::packet::{PacketHeader, PacketStatus};

    fn make_packet(status: PacketStatus, payload: &'static [u8]) -> Packet {
        let header = PacketHeader::new(BufferType::Response, status, 0);
        Packet::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"hello"))
            .expect("should complete message");

        assert_eq!(message.buffer_type, BufferType::Response);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();

        assert!(assembler.push(make_packet(PacketStatus::NORMAL, b"hel")).is_none());
        assert!(assembler.has_partial());
        assert_eq!(assembler.packet_count(), 1);

        let message = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"lo"))
            .expect("should complete message");
        assert_eq!(&message.payload[..], b"hello");
        assert_eq!(assembler.packet_count(), 0);
    }

    #[test]
    fn test_back_to_back_messages_stay_separate() {
        let mut assembler = MessageAssembler::new();
        let first = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"one"))
            .unwrap();
        let second = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"two"))
            .unwrap();
        assert_eq!(&first.payload[..], b"one");
        assert_eq!(&second.payload[..], b"two");
    }

    #[test]
    fn test_attention_ack_flag() {
        let mut assembler = MessageAssembler::new();
        assert!(
            assembler
                .push(make_packet(PacketStatus::ATTENTION_ACK, b"x"))
                .is_none()
        );
        let message = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"y"))
            .unwrap();
        assert!(message.attention_ack);

        let next = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"z"))
            .unwrap();
        assert!(!next.attention_ack);
    }

    #[test]
    fn test_clear() {
        let mut assembler = MessageAssembler::new();
        assembler.push(make_packet(PacketStatus::NORMAL, b"partial"));
        assembler.clear();
        assert!(!assembler.has_partial());

        let message = assembler
            .push(make_packet(PacketStatus::END_OF_MESSAGE, b"fresh"))
            .unwrap();
        assert_eq!(&message.payload[..], b"fresh");
    }
}
