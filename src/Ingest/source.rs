use std::io::{self, ErrorKind, Read};

use tracing::trace;

use crate::error::{IngestError, Result};
use crate::Structs::{Packet, PacketHeader, HEADER_SIZE, PACKET_VERSION};

/// Largest payload a [`StreamSource`] accepts before treating the stream as garbage.
pub const MAX_PAYLOAD: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// The caller's packet now holds the next packet.
    Packet,
    EndOfStream,
}

/// Supplier of complete packets. Framing is the source's business.
pub trait PacketSource {
    /// Read the next packet into `packet`, reusing its payload allocation.
    ///
    /// Format errors are transient: the packet is lost, the stream goes on.
    fn read_packet(&mut self, packet: &mut Packet) -> Result<SourceEvent>;
}

impl<S: PacketSource + ?Sized> PacketSource for &mut S {
    fn read_packet(&mut self, packet: &mut Packet) -> Result<SourceEvent> {
        (**self).read_packet(packet)
    }
}

/// Frames packets out of a byte stream (file, pipe, TCP connection).
pub struct StreamSource<R> {
    reader: R,
    finished: bool,
}

impl<R: Read> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Fill `buf` as far as the stream allows. Returns the bytes read.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Err(IngestError::os("failed to read packet stream", e));
                }
            }
        }
        Ok(filled)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        let copied = io::copy(&mut self.reader.by_ref().take(len as u64), &mut io::sink());
        match copied {
            Ok(skipped) => {
                if skipped < len as u64 {
                    self.finished = true;
                }
                Ok(())
            }
            Err(e) => {
                self.finished = true;
                Err(IngestError::os("failed to read packet stream", e))
            }
        }
    }

    fn truncated(&mut self, what: &str, got: usize, wanted: usize) -> IngestError {
        self.finished = true;
        IngestError::Format(format!("stream ended inside a {what} ({got} of {wanted} bytes)"))
    }
}

impl<R: Read> PacketSource for StreamSource<R> {
    fn read_packet(&mut self, packet: &mut Packet) -> Result<SourceEvent> {
        if self.finished {
            return Ok(SourceEvent::EndOfStream);
        }

        let mut raw = [0u8; HEADER_SIZE];
        let got = self.read_full(&mut raw)?;
        if got == 0 {
            self.finished = true;
            return Ok(SourceEvent::EndOfStream);
        }
        if got < HEADER_SIZE {
            return Err(self.truncated("header", got, HEADER_SIZE));
        }

        let header = PacketHeader::decode(&raw)?;
        let len = header.payload_len as usize;
        if len > MAX_PAYLOAD {
            // No way to find the next header boundary.
            self.finished = true;
            return Err(IngestError::Format(format!(
                "payload length {len} exceeds {MAX_PAYLOAD}, stream abandoned"
            )));
        }
        if header.version != PACKET_VERSION {
            self.skip(len)?;
            return Err(IngestError::Format(format!(
                "unknown packet version {}",
                header.version
            )));
        }
        if header.flags != 0 {
            self.skip(len)?;
            return Err(IngestError::Format(format!(
                "reserved flags {:#x} set",
                header.flags
            )));
        }

        packet.payload.resize(len, 0);
        let got = self.read_full(&mut packet.payload)?;
        if got < len {
            return Err(self.truncated("payload", got, len));
        }
        packet.header = header;
        trace!(board = header.board, time_index = header.time_index, len, "packet framed");
        Ok(SourceEvent::Packet)
    }
}

/// Replays packets from an iterator.
pub struct IterSource<I> {
    packets: I,
}

impl<I: Iterator<Item = Packet>> IterSource<I> {
    pub fn new<T: IntoIterator<IntoIter = I>>(packets: T) -> Self {
        Self {
            packets: packets.into_iter(),
        }
    }
}

impl<I: Iterator<Item = Packet>> PacketSource for IterSource<I> {
    fn read_packet(&mut self, packet: &mut Packet) -> Result<SourceEvent> {
        match self.packets.next() {
            Some(next) => {
                *packet = next;
                Ok(SourceEvent::Packet)
            }
            None => Ok(SourceEvent::EndOfStream),
        }
    }
}
