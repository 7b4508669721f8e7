//! Split I/O connection with attention support.
//!
//! The transport is split into read and write halves so that an attention
//! packet can be written from another task while the owning task is blocked
//! reading a large response.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tds5_protocol::packet::{
    BufferType, DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, fragment,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::Packet;

/// A TDS connection with split I/O.
///
/// Outgoing messages are fragmented at the negotiated packet size. Incoming
/// packets are accepted up to the protocol maximum, since the server may
/// switch sizes inside the login response.
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    assembler: MessageAssembler,
    /// Set while an attention is outstanding.
    attention: Arc<AtomicBool>,
    /// Woken each time an attention is written.
    attention_sent: Arc<Notify>,
    /// A packet without end-of-message has been read.
    in_message: bool,
    packet_size: usize,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection from a transport.
    ///
    /// The transport is immediately split into read and write halves.
    pub fn new(transport: T) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::new(read_half),
            writer: Arc::new(Mutex::new(PacketWriter::new(write_half))),
            assembler: MessageAssembler::new(),
            attention: Arc::new(AtomicBool::new(false)),
            attention_sent: Arc::new(Notify::new()),
            in_message: false,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }

    /// Packet size used for outgoing messages.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Change the packet size used for outgoing messages.
    pub fn set_packet_size(&mut self, size: usize) {
        tracing::debug!(packet_size = size, "packet size set");
        self.packet_size = size;
    }

    /// Get a handle for sending attention from another task.
    #[must_use]
    pub fn attention_handle(&self) -> AttentionHandle<T> {
        AttentionHandle {
            writer: Arc::clone(&self.writer),
            pending: Arc::clone(&self.attention),
            sent: Arc::clone(&self.attention_sent),
        }
    }

    /// Signal woken after an attention is written.
    ///
    /// A wakeup is stored when nobody is waiting, so a read that starts
    /// after the flag check still observes an attention sent in between.
    #[must_use]
    pub fn attention_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.attention_sent)
    }

    /// Check if an attention is outstanding.
    #[must_use]
    pub fn is_attention_pending(&self) -> bool {
        self.attention.load(Ordering::Acquire)
    }

    /// Mark the outstanding attention as acknowledged.
    pub fn clear_attention(&self) {
        self.attention.store(false, Ordering::Release);
    }

    /// Whether a message has been partly read.
    #[must_use]
    pub fn in_message(&self) -> bool {
        self.in_message
    }

    /// Read a single packet from the connection.
    ///
    /// Returns `None` when the peer closed the stream between messages.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, CodecError>
    where
        T: Unpin,
    {
        match self.reader.next().await {
            Some(Ok(packet)) => {
                self.in_message = !packet.is_end_of_message();
                Ok(Some(packet))
            }
            Some(Err(e)) => Err(e),
            None if self.in_message => Err(CodecError::ConnectionClosed),
            None => Ok(None),
        }
    }

    /// Read the next complete message from the connection.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError>
    where
        T: Unpin,
    {
        loop {
            match self.read_packet().await? {
                Some(packet) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(Some(message));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Discard the rest of a partly read message.
    ///
    /// Returns whether any discarded packet acknowledged an attention.
    pub async fn drain_message(&mut self) -> Result<bool, CodecError>
    where
        T: Unpin,
    {
        self.assembler.clear();
        let mut attention_ack = false;
        let mut discarded = 0usize;
        while self.in_message {
            match self.read_packet().await? {
                Some(packet) => {
                    attention_ack |= packet.header.is_attention_ack();
                    discarded += 1;
                }
                None => return Err(CodecError::ConnectionClosed),
            }
        }
        if discarded > 0 {
            tracing::debug!(packets = discarded, "drained unread response packets");
        }
        Ok(attention_ack)
    }

    /// Send a complete message, split into packets at the current size.
    pub async fn send_message(
        &mut self,
        buffer_type: BufferType,
        payload: Bytes,
    ) -> Result<(), CodecError>
    where
        T: Unpin,
    {
        let packets = fragment(&payload, buffer_type, self.packet_size)?;
        tracing::trace!(
            buffer_type = ?buffer_type,
            payload_len = payload.len(),
            packets = packets.len(),
            "sending message"
        );

        let mut writer = self.writer.lock().await;
        for (header, body) in packets {
            writer.feed(Packet::new(header, body)).await?;
        }
        writer.flush().await
    }

    /// Shut down the write half, signalling the server that no more data
    /// will follow.
    pub async fn shutdown(&mut self) -> Result<(), CodecError>
    where
        T: Unpin,
    {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        writer.get_mut().shutdown().await?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("attention_pending", &self.is_attention_pending())
            .field("in_message", &self.in_message)
            .finish_non_exhaustive()
    }
}

/// Handle for sending attention on a connection.
///
/// Clones share the pending flag, so only the first of several concurrent
/// requests writes a packet.
pub struct AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    pending: Arc<AtomicBool>,
    sent: Arc<Notify>,
}

impl<T> AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send an attention packet.
    ///
    /// Returns `false` without writing anything if an attention is already
    /// outstanding.
    pub async fn send(&self) -> Result<bool, CodecError> {
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("attention already pending");
            return Ok(false);
        }

        tracing::debug!("sending attention");

        let header = PacketHeader::new(
            BufferType::Attention,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.send(Packet::new(header, Bytes::new())).await?;
            writer.flush().await
        }
        .await;

        drop(writer);

        if result.is_err() {
            self.pending.store(false, Ordering::Release);
        }
        self.sent.notify_one();
        result.map(|()| true)
    }

    /// Check if an attention is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl<T> Clone for AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            pending: Arc::clone(&self.pending),
            sent: Arc::clone(&self.sent),
        }
    }
}

impl<T> std::fmt::Debug for AttentionHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttentionHandle")
            .field("pending", &self.pending.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
