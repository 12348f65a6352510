//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character lowercase hex length that counts
//! itself, or "0000" for flush.

use crate::{GitError, Result};
use std::io::{ErrorKind, Read, Write};

/// Size of the length header.
pub const LEN_SIZE: usize = 4;

/// Largest payload a single pkt-line can carry.
pub const MAX_PAYLOAD_SIZE: usize = 65516;

/// Largest value of the length header.
pub const MAX_PKT_SIZE: usize = MAX_PAYLOAD_SIZE + LEN_SIZE;

/// The flush-pkt.
pub const FLUSH: &[u8; 4] = b"0000";

/// A pkt-line packet.
///
/// An empty payload and a flush are the same thing on the wire; `Flush` is the
/// only representation this module produces for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Creates a packet from bytes; an empty payload becomes `Flush`.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        let data = b.into();
        if data.is_empty() {
            Self::Flush
        } else {
            Self::Data(data)
        }
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) if data.is_empty() => Ok(FLUSH.to_vec()),
            Self::Data(data) => {
                if data.len() > MAX_PAYLOAD_SIZE {
                    return Err(GitError::PayloadTooLong(data.len()));
                }
                let mut result = format!("{:04x}", data.len() + LEN_SIZE).into_bytes();
                result.extend_from_slice(data);
                Ok(result)
            }
            Self::Flush => Ok(FLUSH.to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        match self {
            Self::Flush => true,
            Self::Data(data) => data.is_empty(),
        }
    }

    /// Returns the data content, or None for flush.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) if !data.is_empty() => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

fn parse_len(header: &[u8; LEN_SIZE]) -> Result<usize> {
    let mut len = 0usize;
    for &b in header {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            _ => return Err(GitError::InvalidPktLen(String::from_utf8_lossy(header).into_owned())),
        };
        len = (len << 4) | digit as usize;
    }
    Ok(len)
}

/// Reader for pkt-line format.
///
/// `read` returns `Ok(None)` only at a clean end of stream, so callers can
/// keep scanning past any number of flush-delimited sections.
pub struct PktLineReader<R> {
    reader: R,
    lines: usize,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader, lines: 0 }
    }

    /// Number of packets read so far, flushes included.
    pub fn lines_read(&self) -> usize {
        self.lines
    }

    /// Reads the next packet.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; LEN_SIZE];
        let mut filled = 0;
        while filled < LEN_SIZE {
            match self.reader.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(GitError::InvalidPktLen(
                        String::from_utf8_lossy(&len_buf[..filled]).into_owned(),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let len = parse_len(&len_buf)?;
        self.lines += 1;
        if len == 0 {
            return Ok(Some(PktLine::Flush));
        }
        if len <= LEN_SIZE || len > MAX_PKT_SIZE {
            return Err(GitError::InvalidPktLen(
                String::from_utf8_lossy(&len_buf).into_owned(),
            ));
        }

        let mut data = vec![0u8; len - LEN_SIZE];
        self.reader.read_exact(&mut data)?;
        Ok(Some(PktLine::Data(data)))
    }

    /// Reads all packets until a flush packet or end of stream.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a data line. An empty slice writes a flush.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(GitError::PayloadTooLong(data.len()));
        }
        if data.is_empty() {
            return self.flush_pkt();
        }
        self.writer
            .write_all(format!("{:04x}", data.len() + LEN_SIZE).as_bytes())?;
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Writes a string line (with newline).
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        if s.ends_with('\n') {
            self.write_data(s.as_bytes())
        } else {
            let mut data = Vec::with_capacity(s.len() + 1);
            data.extend_from_slice(s.as_bytes());
            data.push(b'\n');
            self.write_data(&data)
        }
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.writer.write_all(FLUSH)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns a mutable reference to the inner writer.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    proptest! {
        /// Property: any payload up to the maximum survives encode/decode.
        #[test]
        fn prop_pktline_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
            let mut buf = Vec::new();
            PktLineWriter::new(&mut buf).write_data(&payload).unwrap();

            let mut reader = PktLineReader::new(Cursor::new(buf));
            let expected = PktLine::from_bytes(payload);
            prop_assert_eq!(reader.read().unwrap(), Some(expected));
            prop_assert_eq!(reader.read().unwrap(), None);
        }

        /// Property: arbitrary input never panics the reader.
        #[test]
        fn prop_reader_no_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let mut reader = PktLineReader::new(Cursor::new(data));
            while let Ok(Some(_)) = reader.read() {}
        }
    }
}
