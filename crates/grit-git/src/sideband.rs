//! Sideband multiplexing of pack data, progress and errors.
//!
//! Each pkt-line payload starts with a channel byte. The pkt-line length
//! header plus channel byte plus data must fit the negotiated packet size.

use crate::pktline::{PktLine, PktLineReader, PktLineWriter, LEN_SIZE};
use crate::{GitError, Result};
use std::io::{self, Read, Write};
use tracing::debug;

/// Which sideband flavour was negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandKind {
    /// `side-band`: packets up to 1000 bytes.
    Sideband,
    /// `side-band-64k`: packets up to 65520 bytes.
    Sideband64k,
}

impl SidebandKind {
    /// Largest packet, length header included.
    pub fn max_packet_size(&self) -> usize {
        match self {
            Self::Sideband => 1000,
            Self::Sideband64k => 65520,
        }
    }

    /// Largest data chunk carried by one packet.
    pub fn max_data_size(&self) -> usize {
        self.max_packet_size() - LEN_SIZE - 1
    }
}

/// Sideband channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    /// Pack file bytes.
    PackData = 1,
    /// Human-readable progress text.
    Progress = 2,
    /// Fatal error message; the stream ends after it.
    Error = 3,
}

impl Channel {
    /// Parses a channel byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::PackData),
            2 => Some(Self::Progress),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Writes data split into sideband packets. `Write` goes to channel 1.
pub struct Muxer<W> {
    kind: SidebandKind,
    writer: PktLineWriter<W>,
}

impl<W: Write> Muxer<W> {
    /// Creates a muxer writing packets to `writer`.
    pub fn new(kind: SidebandKind, writer: W) -> Self {
        Self {
            kind,
            writer: PktLineWriter::new(writer),
        }
    }

    /// Writes all of `data` to the given channel.
    pub fn write_channel(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        let mut packet = Vec::with_capacity(self.kind.max_data_size().min(data.len()) + 1);
        for chunk in data.chunks(self.kind.max_data_size()) {
            packet.clear();
            packet.push(channel as u8);
            packet.extend_from_slice(chunk);
            self.writer.write_data(&packet)?;
        }
        Ok(())
    }

    /// Sends a progress message.
    pub fn progress(&mut self, message: &str) -> Result<()> {
        self.write_channel(Channel::Progress, message.as_bytes())
    }

    /// Sends a fatal error message.
    pub fn error(&mut self, message: &str) -> Result<()> {
        self.write_channel(Channel::Error, message.as_bytes())
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write> Write for Muxer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(self.kind.max_data_size());
        self.write_channel(Channel::PackData, &buf[..len])
            .map_err(into_io_error)?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().map_err(into_io_error)
    }
}

/// Reads channel 1 out of a sideband stream.
///
/// Progress text goes to the optional sink; a message on channel 3 ends the
/// stream with [`GitError::Remote`]. A flush or end of stream ends the data.
pub struct Demuxer<R> {
    kind: SidebandKind,
    reader: PktLineReader<R>,
    progress: Option<Box<dyn Write + Send>>,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> Demuxer<R> {
    /// Creates a demuxer reading packets from `reader`.
    pub fn new(kind: SidebandKind, reader: R) -> Self {
        Self {
            kind,
            reader: PktLineReader::new(reader),
            progress: None,
            pending: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Forwards progress messages to `sink`.
    pub fn with_progress(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Reads every remaining data byte.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while self.fill()? {
            out.extend_from_slice(&self.pending[self.pos..]);
            self.pos = self.pending.len();
        }
        Ok(out)
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Makes sure unread data is pending. Returns false at end of data.
    fn fill(&mut self) -> Result<bool> {
        while self.pos >= self.pending.len() {
            if self.done {
                return Ok(false);
            }
            let data = match self.reader.read()? {
                Some(PktLine::Data(data)) => data,
                Some(PktLine::Flush) | None => {
                    self.done = true;
                    return Ok(false);
                }
            };
            if data.len() + LEN_SIZE > self.kind.max_packet_size() {
                return Err(GitError::Protocol(format!(
                    "max. packet size exceeded: {} bytes",
                    data.len() + LEN_SIZE
                )));
            }

            match Channel::from_byte(data[0]) {
                Some(Channel::PackData) => {
                    self.pending = data;
                    self.pos = 1;
                }
                Some(Channel::Progress) => {
                    debug!(message = %String::from_utf8_lossy(&data[1..]).trim_end(), "remote progress");
                    if let Some(sink) = self.progress.as_mut() {
                        sink.write_all(&data[1..])?;
                    }
                }
                Some(Channel::Error) => {
                    self.done = true;
                    let message = String::from_utf8_lossy(&data[1..]).trim_end().to_string();
                    return Err(GitError::Remote(message));
                }
                None => {
                    return Err(GitError::Protocol(format!("unknown channel {}", data[0])));
                }
            }
        }
        Ok(true)
    }
}

impl<R: Read> Read for Demuxer<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.fill().map_err(into_io_error)? {
            return Ok(0);
        }
        let available = &self.pending[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

fn into_io_error(error: GitError) -> io::Error {
    match error {
        GitError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
