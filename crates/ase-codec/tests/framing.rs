//! Packet framing through the codec and the split connection.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use ase_codec::{Connection, MessageAssembler, Packet, PacketCodec};
use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tds5_protocol::packet::{BufferType, PACKET_HEADER_SIZE, fragment};
use tokio_test::io::Builder;
use tokio_util::codec::{Decoder, Encoder};

proptest! {
    #[test]
    fn codec_roundtrip_preserves_message(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        packet_size in (PACKET_HEADER_SIZE + 1)..2048usize,
    ) {
        let payload = Bytes::from(payload);
        let packets = fragment(&payload, BufferType::Response, packet_size).unwrap();

        let mut codec = PacketCodec::new();
        let mut wire = BytesMut::new();
        for (header, body) in packets {
            codec.encode(Packet::new(header, body), &mut wire).unwrap();
        }

        let mut assembler = MessageAssembler::new();
        let mut messages = Vec::new();
        while let Some(packet) = codec.decode(&mut wire).unwrap() {
            prop_assert!(packet.total_size() <= packet_size);
            if let Some(message) = assembler.push(packet) {
                messages.push(message);
            }
        }

        prop_assert!(wire.is_empty());
        prop_assert_eq!(messages.len(), 1);
        prop_assert_eq!(&messages[0].payload, &payload);
    }

    #[test]
    fn split_reads_yield_same_packets(
        payload in proptest::collection::vec(any::<u8>(), 1..2048),
        split in 1usize..64,
    ) {
        let payload = Bytes::from(payload);
        let mut codec = PacketCodec::new();
        let mut wire = BytesMut::new();
        for (header, body) in fragment(&payload, BufferType::Normal, 512).unwrap() {
            codec.encode(Packet::new(header, body), &mut wire).unwrap();
        }

        // Deliver the bytes in small chunks, as TCP might.
        let mut buffer = BytesMut::new();
        let mut assembler = MessageAssembler::new();
        let mut result = None;
        for chunk in wire.chunks(split) {
            buffer.extend_from_slice(chunk);
            while let Some(packet) = codec.decode(&mut buffer).unwrap() {
                if let Some(message) = assembler.push(packet) {
                    result = Some(message.payload);
                }
            }
        }
        prop_assert_eq!(result, Some(payload));
    }
}

// =============================================================================
// Connection over scripted IO
// =============================================================================

#[tokio::test]
async fn connection_reassembles_packets_from_partial_reads() {
    let first = [4u8, 0x00, 0, 12, 0, 0, 0, 0, b'a', b'b', b'c', b'd'];
    let last = [4u8, 0x01, 0, 10, 0, 0, 1, 0, b'e', b'f'];
    let io = Builder::new()
        .read(&first[..5])
        .read(&first[5..])
        .read(&last)
        .build();

    let mut conn = Connection::new(io);
    let message = conn.read_message().await.unwrap().unwrap();
    assert_eq!(message.buffer_type, BufferType::Response);
    assert_eq!(&message.payload[..], b"abcdef");
    assert!(!message.attention_ack);
}

#[tokio::test]
async fn connection_writes_single_packet_request() {
    let io = Builder::new()
        .write(&[15, 0x01, 0, 11, 0, 0, 0, 0, 1, 2, 3])
        .build();

    let mut conn = Connection::new(io);
    conn.send_message(BufferType::Normal, Bytes::from_static(&[1, 2, 3]))
        .await
        .unwrap();
}

#[tokio::test]
async fn attention_wakes_signal_even_without_waiter() {
    let io = Builder::new().write(&[6, 0x01, 0, 8, 0, 0, 0, 0]).build();

    let conn = Connection::new(io);
    let signal = conn.attention_signal();
    assert!(conn.attention_handle().send().await.unwrap());
    assert!(conn.is_attention_pending());

    // The wakeup was stored before anyone waited on it.
    tokio::time::timeout(Duration::from_secs(1), signal.notified())
        .await
        .unwrap();
}
