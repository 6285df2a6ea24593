//! Length-prefixed record framing for the DHash stream protocol
//! (`spec.md` §4.6): each record is `u32_be length | length bytes of
//! `dhash_message::DHashMessage::encode` output`.
//!
//! Send and receive run as independent state machines over one
//! `TcpStream`: a connection backs a FIFO queue of outgoing records and, on
//! the receive side, an incremental length-prefix assembler that yields
//! complete records as bytes accumulate. Neither side blocks on the other.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::dhash_message::DHashMessage;
use crate::error::{Error, Result};

const LENGTH_PREFIX_BYTES: usize = 4;

/// Incrementally assembles complete length-prefixed records out of bytes
/// arriving in arbitrary-sized reads.
#[derive(Default)]
struct Assembler {
    buf: BytesMut,
}

impl Assembler {
    fn feed(&mut self, chunk: &[u8]) {
        self.buf.put_slice(chunk);
    }

    /// Pulls one complete record out of the buffer, if enough bytes have
    /// accumulated. Leaves a partial trailing record in place for the next
    /// `feed`.
    fn try_take_record(&mut self) -> Option<BytesMut> {
        if self.buf.len() < LENGTH_PREFIX_BYTES {
            return None;
        }
        let len = u32::from_be_bytes(self.buf[..LENGTH_PREFIX_BYTES].try_into().unwrap()) as usize;
        if self.buf.len() < LENGTH_PREFIX_BYTES + len {
            return None;
        }
        self.buf.advance(LENGTH_PREFIX_BYTES);
        Some(self.buf.split_to(len))
    }
}

fn frame(record: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + record.len());
    out.put_u32(record.len() as u32);
    out.put_slice(record);
    out
}

/// One DHash stream connection: an outgoing send queue plus a receive
/// assembler, both driven from `Connection::pump`.
pub struct Connection {
    stream: TcpStream,
    send_queue: VecDeque<BytesMut>,
    assembler: Assembler,
    read_buf: [u8; 4096],
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self { stream, send_queue: VecDeque::new(), assembler: Assembler::default(), read_buf: [0u8; 4096] }
    }

    pub async fn connect(addr: std::net::SocketAddrV4) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// Enqueues a message for transmission; does not block on the socket.
    pub fn enqueue(&mut self, transaction_id: u32, message: &DHashMessage) {
        self.send_queue.push_back(frame(&message.encode(transaction_id)));
    }

    /// Drains as much of the send queue as the socket accepts without
    /// blocking, then reads whatever is available and returns any records
    /// that completed as a result.
    pub async fn pump(&mut self) -> Result<Vec<(u32, DHashMessage)>> {
        while let Some(front) = self.send_queue.front_mut() {
            match self.stream.write_buf(front).await {
                Ok(0) => return Err(Error::ConnectionReset),
                Ok(_) => {
                    if !front.has_remaining() {
                        self.send_queue.pop_front();
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let n = self.stream.read(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionReset);
        }
        self.assembler.feed(&self.read_buf[..n]);

        let mut out = Vec::new();
        while let Some(record) = self.assembler.try_take_record() {
            out.push(DHashMessage::decode(&record)?);
        }
        Ok(out)
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.send_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_yields_nothing_until_full_record_arrives() {
        let mut asm = Assembler::default();
        let record = b"hello";
        let framed = frame(record);
        asm.feed(&framed[..3]);
        assert!(asm.try_take_record().is_none());
        asm.feed(&framed[3..]);
        let taken = asm.try_take_record().unwrap();
        assert_eq!(&taken[..], record);
        assert!(asm.try_take_record().is_none());
    }

    #[test]
    fn assembler_handles_multiple_records_in_one_feed() {
        let mut asm = Assembler::default();
        let mut chunk = BytesMut::new();
        chunk.put_slice(&frame(b"one"));
        chunk.put_slice(&frame(b"two"));
        asm.feed(&chunk);
        assert_eq!(&asm.try_take_record().unwrap()[..], b"one");
        assert_eq!(&asm.try_take_record().unwrap()[..], b"two");
        assert!(asm.try_take_record().is_none());
    }
}
