//! Upload-pack requests (wants, haves, depth) and responses.

use crate::capability::{Capability, CapabilityList};
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::sideband::{Demuxer, Muxer, SidebandKind};
use crate::{GitError, Result};
use grit_storage::{ObjectId, HEX_LEN};
use std::io::{Read, Write};

/// How much history the client asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Depth {
    /// Full history.
    #[default]
    Infinite,
    /// At most this many commits from each want.
    Commits(u32),
    /// Commits newer than this Unix timestamp.
    Since(i64),
    /// Commits not reachable from this ref.
    Reference(String),
}

/// The want/shallow/deepen section of an upload-pack request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    /// Capabilities the client wants to use; sent on the first want line.
    pub capabilities: CapabilityList,
    /// Objects whose closure the client wants.
    pub wants: Vec<ObjectId>,
    /// Commits the client has without parents.
    pub shallows: Vec<ObjectId>,
    /// Requested history depth.
    pub depth: Depth,
}

impl UploadRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the request is self-consistent.
    pub fn validate(&self) -> Result<()> {
        if self.wants.is_empty() {
            return Err(GitError::InvalidRequest("want can't be empty".to_string()));
        }

        let caps = &self.capabilities;
        let missing = |c: Capability| GitError::InvalidRequest(format!("missing capability {c}"));
        if caps.supports(Capability::Sideband) && caps.supports(Capability::Sideband64k) {
            return Err(GitError::InvalidRequest(
                "side-band and side-band-64k are mutually exclusive".to_string(),
            ));
        }
        if caps.supports(Capability::MultiAck) && caps.supports(Capability::MultiAckDetailed) {
            return Err(GitError::InvalidRequest(
                "multi_ack and multi_ack_detailed are mutually exclusive".to_string(),
            ));
        }
        if !self.shallows.is_empty() && !caps.supports(Capability::Shallow) {
            return Err(missing(Capability::Shallow));
        }
        match &self.depth {
            Depth::Infinite => {}
            Depth::Commits(0) => {}
            Depth::Commits(_) if !caps.supports(Capability::Shallow) => {
                return Err(missing(Capability::Shallow));
            }
            Depth::Since(_) if !caps.supports(Capability::DeepenSince) => {
                return Err(missing(Capability::DeepenSince));
            }
            Depth::Reference(_) if !caps.supports(Capability::DeepenNot) => {
                return Err(missing(Capability::DeepenNot));
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the sideband framing the client negotiated, if any.
    pub fn sideband(&self) -> Option<SidebandKind> {
        if self.capabilities.supports(Capability::Sideband64k) {
            Some(SidebandKind::Sideband64k)
        } else if self.capabilities.supports(Capability::Sideband) {
            Some(SidebandKind::Sideband)
        } else {
            None
        }
    }

    /// Writes the request section, terminated by a flush. Wants are sorted
    /// and deduplicated.
    pub fn encode<W: Write>(&self, writer: &mut PktLineWriter<W>) -> Result<()> {
        let mut wants = self.wants.clone();
        wants.sort();
        wants.dedup();

        let Some((first, rest)) = wants.split_first() else {
            return Err(GitError::InvalidRequest("want can't be empty".to_string()));
        };
        if self.capabilities.is_empty() {
            writer.write_line(&format!("want {first}"))?;
        } else {
            writer.write_line(&format!("want {first} {}", self.capabilities))?;
        }
        for want in rest {
            writer.write_line(&format!("want {want}"))?;
        }

        let mut shallows = self.shallows.clone();
        shallows.sort();
        for shallow in shallows {
            writer.write_line(&format!("shallow {shallow}"))?;
        }

        match &self.depth {
            Depth::Infinite | Depth::Commits(0) => {}
            Depth::Commits(n) => writer.write_line(&format!("deepen {n}"))?,
            Depth::Since(t) => writer.write_line(&format!("deepen-since {t}"))?,
            Depth::Reference(r) => writer.write_line(&format!("deepen-not {r}"))?,
        }

        writer.flush_pkt()
    }

    /// Reads the request section up to its flush.
    pub fn decode<R: Read>(reader: &mut PktLineReader<R>) -> Result<Self> {
        let mut request = Self::new();
        let mut first = true;
        loop {
            let line = match reader.read()? {
                Some(PktLine::Data(data)) => data,
                Some(PktLine::Flush) => break,
                None => return Err(malformed("unexpected EOF")),
            };
            let line = trim_eol(&line);

            if let Some(rest) = line.strip_prefix(b"want ") {
                let (hex, caps) = match rest.iter().position(|&b| b == b' ') {
                    Some(i) => (&rest[..i], Some(&rest[i + 1..])),
                    None => (rest, None),
                };
                request.wants.push(parse_id(hex, "want")?);
                if let Some(caps) = caps {
                    if !first {
                        return Err(malformed("capabilities after the first want"));
                    }
                    request.capabilities = CapabilityList::decode(caps)?;
                }
            } else if first {
                return Err(malformed("missing 'want ' prefix"));
            } else if let Some(hex) = line.strip_prefix(b"shallow ") {
                request.shallows.push(parse_id(hex, "shallow")?);
            } else if let Some(n) = line.strip_prefix(b"deepen ") {
                let n = parse_number(n, "deepen")?;
                request.depth = Depth::Commits(n);
            } else if let Some(t) = line.strip_prefix(b"deepen-since ") {
                let t = parse_number(t, "deepen-since")?;
                request.depth = Depth::Since(t);
            } else if let Some(r) = line.strip_prefix(b"deepen-not ") {
                request.depth = Depth::Reference(String::from_utf8_lossy(r).into_owned());
            } else {
                return Err(malformed(format!(
                    "unexpected payload: {}",
                    String::from_utf8_lossy(line)
                )));
            }
            first = false;
        }
        if first {
            return Err(malformed("missing 'want ' prefix"));
        }
        Ok(request)
    }
}

/// A full upload-pack request: the want section plus the haves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackRequest {
    /// Wants, shallows, depth and capabilities.
    pub request: UploadRequest,
    /// Objects the client already has.
    pub haves: Vec<ObjectId>,
}

impl UploadPackRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if every want is already a have, so there is nothing to
    /// fetch.
    pub fn is_empty(&self) -> bool {
        self.request.wants.iter().all(|w| self.haves.contains(w))
    }

    /// Checks the request is self-consistent.
    pub fn validate(&self) -> Result<()> {
        self.request.validate()
    }

    /// Writes the request, haves and the final `done`.
    pub fn encode<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = PktLineWriter::new(writer);
        self.request.encode(&mut writer)?;

        let mut haves = self.haves.clone();
        haves.sort();
        haves.dedup();
        for have in &haves {
            writer.write_line(&format!("have {have}"))?;
        }
        if !haves.is_empty() {
            writer.flush_pkt()?;
        }
        writer.write_line("done")?;
        writer.flush()
    }

    /// Reads a request up to `done` or end of stream.
    pub fn decode<R: Read>(reader: R) -> Result<Self> {
        let mut reader = PktLineReader::new(reader);
        let request = UploadRequest::decode(&mut reader)?;
        let mut haves = Vec::new();
        loop {
            match reader.read()? {
                None => break,
                Some(PktLine::Flush) => continue,
                Some(PktLine::Data(data)) => {
                    let line = trim_eol(&data);
                    if line == b"done" {
                        break;
                    }
                    let Some(hex) = line.strip_prefix(b"have ") else {
                        return Err(malformed(format!(
                            "unexpected payload: {}",
                            String::from_utf8_lossy(line)
                        )));
                    };
                    haves.push(parse_id(hex, "have")?);
                }
            }
        }
        Ok(Self { request, haves })
    }
}

/// Server answer to an upload-pack request: `NAK` then the pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackResponse {
    /// Shallow boundaries; always empty from our server.
    pub shallows: Vec<ObjectId>,
    /// The encoded pack.
    pub pack: Vec<u8>,
}

impl UploadPackResponse {
    /// Writes `NAK` and the pack, multiplexed on channel 1 when a sideband
    /// was negotiated.
    pub fn encode<W: Write>(&self, writer: W, sideband: Option<SidebandKind>) -> Result<()> {
        let mut writer = PktLineWriter::new(writer);
        for shallow in &self.shallows {
            writer.write_line(&format!("shallow {shallow}"))?;
        }
        if !self.shallows.is_empty() {
            writer.flush_pkt()?;
        }
        writer.write_line("NAK")?;

        match sideband {
            Some(kind) => {
                let mut muxer = Muxer::new(kind, writer.into_inner());
                muxer.write_all(&self.pack)?;
                let mut writer = PktLineWriter::new(muxer.into_inner());
                writer.flush_pkt()?;
                writer.flush()
            }
            None => {
                let mut inner = writer.into_inner();
                inner.write_all(&self.pack)?;
                inner.flush()?;
                Ok(())
            }
        }
    }

    /// Reads a response: skips acknowledgements up to `NAK`, then collects
    /// the pack. Progress messages go to `progress` when given.
    pub fn decode<R: Read>(
        reader: R,
        sideband: Option<SidebandKind>,
        progress: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        let mut reader = PktLineReader::new(reader);
        let mut shallows = Vec::new();
        loop {
            let line = match reader.read()? {
                Some(PktLine::Data(data)) => data,
                Some(PktLine::Flush) => continue,
                None => return Err(malformed("missing NAK")),
            };
            let line = trim_eol(&line);
            if line == b"NAK" {
                break;
            }
            if let Some(hex) = line.strip_prefix(b"shallow ") {
                shallows.push(parse_id(hex, "shallow")?);
            } else if !line.starts_with(b"ACK ") && !line.starts_with(b"unshallow ") {
                return Err(malformed(format!(
                    "unexpected payload: {}",
                    String::from_utf8_lossy(line)
                )));
            }
        }

        let inner = reader.into_inner();
        let pack = match sideband {
            Some(kind) => {
                let mut demuxer = Demuxer::new(kind, inner);
                if let Some(progress) = progress {
                    demuxer = demuxer.with_progress(progress);
                }
                demuxer.read_all()?
            }
            None => {
                let mut inner = inner;
                let mut pack = Vec::new();
                inner.read_to_end(&mut pack)?;
                pack
            }
        };
        Ok(Self { shallows, pack })
    }
}

fn malformed(reason: impl Into<String>) -> GitError {
    GitError::MalformedRequest(reason.into())
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn parse_id(hex: &[u8], what: &str) -> Result<ObjectId> {
    if hex.len() != HEX_LEN {
        return Err(malformed(format!(
            "invalid {what} line length: expected {HEX_LEN}, got {}",
            hex.len()
        )));
    }
    std::str::from_utf8(hex)
        .ok()
        .and_then(|hex| ObjectId::from_hex(hex).ok())
        .ok_or_else(|| malformed(format!("invalid {what} object id")))
}

fn parse_number<T: std::str::FromStr>(raw: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(format!("invalid {what} value")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn test_validate() {
        let mut request = UploadRequest::new();
        assert!(request.validate().is_err());

        request.wants.push(id(1));
        assert!(request.validate().is_ok());

        request.depth = Depth::Commits(1);
        assert!(request.validate().is_err());
        request.capabilities.add_flag(Capability::Shallow).unwrap();
        assert!(request.validate().is_ok());

        request.capabilities.add_flag(Capability::Sideband).unwrap();
        request.capabilities.add_flag(Capability::Sideband64k).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_encode_wire_format() {
        let mut request = UploadPackRequest::new();
        request.request.wants = vec![id(2), id(1), id(2)];
        request
            .request
            .capabilities
            .add_flag(Capability::OfsDelta)
            .unwrap();
        request.haves = vec![id(3)];

        let mut out = Vec::new();
        request.encode(&mut out).unwrap();
        let expected = format!(
            "003cwant {} ofs-delta\n0032want {}\n00000032have {}\n00000009done\n",
            id(1),
            id(2),
            id(3)
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_decode_roundtrip() {
        let mut request = UploadPackRequest::new();
        request.request.wants = vec![id(1), id(2)];
        request
            .request
            .capabilities
            .add_flag(Capability::Sideband64k)
            .unwrap();
        request
            .request
            .capabilities
            .add(Capability::Agent, vec!["test/1".to_string()])
            .unwrap();
        request.request.depth = Depth::Commits(3);
        request.request.shallows = vec![id(9)];
        request.haves = vec![id(4), id(5)];

        let mut out = Vec::new();
        request.encode(&mut out).unwrap();
        let decoded = UploadPackRequest::decode(Cursor::new(out)).unwrap();
        assert_eq!(decoded.request.wants, request.request.wants);
        assert_eq!(decoded.request.depth, Depth::Commits(3));
        assert_eq!(decoded.request.shallows, vec![id(9)]);
        assert_eq!(decoded.haves, request.haves);
        assert_eq!(decoded.request.sideband(), Some(SidebandKind::Sideband64k));
        assert_eq!(
            decoded.request.capabilities.get(Capability::Agent),
            Some(&["test/1".to_string()][..])
        );
    }

    #[test]
    fn test_decode_rejects_missing_want() {
        let mut out = Vec::new();
        let mut writer = PktLineWriter::new(&mut out);
        writer.write_line(&format!("have {}", id(1))).unwrap();
        writer.flush_pkt().unwrap();
        assert!(matches!(
            UploadPackRequest::decode(Cursor::new(out)),
            Err(GitError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_capability() {
        let mut out = Vec::new();
        let mut writer = PktLineWriter::new(&mut out);
        writer
            .write_line(&format!("want {} no-such-thing", id(1)))
            .unwrap();
        writer.flush_pkt().unwrap();
        assert!(matches!(
            UploadPackRequest::decode(Cursor::new(out)),
            Err(GitError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_is_empty() {
        let mut request = UploadPackRequest::new();
        request.request.wants = vec![id(1)];
        assert!(!request.is_empty());
        request.haves = vec![id(2), id(1)];
        assert!(request.is_empty());
    }

    #[test]
    fn test_response_plain() {
        let response = UploadPackResponse {
            shallows: vec![],
            pack: b"PACKDATA".to_vec(),
        };
        let mut out = Vec::new();
        response.encode(&mut out, None).unwrap();
        assert_eq!(out, b"0008NAK\nPACKDATA");

        let decoded = UploadPackResponse::decode(Cursor::new(out), None, None).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_response_sideband() {
        let pack: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let response = UploadPackResponse {
            shallows: vec![],
            pack,
        };
        let mut out = Vec::new();
        response
            .encode(&mut out, Some(SidebandKind::Sideband))
            .unwrap();
        assert!(out.ends_with(b"0000"));

        let decoded =
            UploadPackResponse::decode(Cursor::new(out), Some(SidebandKind::Sideband), None)
                .unwrap();
        assert_eq!(decoded.pack, response.pack);
    }

    #[test]
    fn test_response_skips_acks() {
        let mut out = Vec::new();
        let mut writer = PktLineWriter::new(&mut out);
        writer.write_line(&format!("ACK {}", id(1))).unwrap();
        writer.write_line("NAK").unwrap();
        out.extend_from_slice(b"PACK");
        let decoded = UploadPackResponse::decode(Cursor::new(out), None, None).unwrap();
        assert_eq!(decoded.pack, b"PACK");
    }
}
