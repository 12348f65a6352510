//! Advertised references: the first message of every exchange.
//!
//! ```text
//! [# service=git-upload-pack\n] [flush]
//! <hash> HEAD\0<capabilities>\n        (or "<zero> capabilities^{}\0..." when empty)
//! <hash> refs/heads/main\n
//! <hash> refs/tags/v1\n
//! <hash> refs/tags/v1^{}\n            (peeled target of the tag above)
//! shallow <hash>\n
//! flush
//! ```

use crate::capability::{Capability, CapabilityList};
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{GitError, Result};
use grit_storage::{ObjectId, Reference, BRANCH_PREFIX, HEAD, HEX_LEN};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::debug;

/// Ref name used in the first line when there are no refs.
const NO_REFS_MARKER: &str = "capabilities^{}";

/// Suffix marking a peeled tag line.
const PEELED_SUFFIX: &str = "^{}";

const SHALLOW_PREFIX: &str = "shallow ";

/// What a server advertises before any negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvRefs {
    /// Lines before the first reference, such as the HTTP service banner.
    /// Stored without their trailing newline.
    pub prefix: Vec<PktLine>,
    /// Where HEAD points, if the server advertised it.
    pub head: Option<ObjectId>,
    /// Server capabilities.
    pub capabilities: CapabilityList,
    /// Advertised refs other than HEAD.
    pub references: BTreeMap<String, ObjectId>,
    /// Peeled targets of annotated tags, keyed by tag ref name.
    pub peeled: BTreeMap<String, ObjectId>,
    /// Shallow boundaries of the server repository.
    pub shallows: Vec<ObjectId>,
}

impl AdvRefs {
    /// Creates an empty advertisement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference. Symbolic refs are advertised through `symref`.
    pub fn add_reference(&mut self, name: &str, reference: &Reference) -> Result<()> {
        match reference {
            Reference::Symbolic(target) => self
                .capabilities
                .add(Capability::SymRef, vec![format!("{name}:{target}")]),
            Reference::Direct(id) if name == HEAD => {
                self.head = Some(*id);
                Ok(())
            }
            Reference::Direct(id) => {
                self.references.insert(name.to_string(), *id);
                Ok(())
            }
        }
    }

    /// Returns true if no ref, peeled ref or shallow was advertised.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
            && self.references.is_empty()
            && self.peeled.is_empty()
            && self.shallows.is_empty()
    }

    /// Returns the target of HEAD advertised through `symref`, if any.
    pub fn symbolic_head(&self) -> Option<&str> {
        self.capabilities
            .get(Capability::SymRef)?
            .iter()
            .filter_map(|value| value.split_once(':'))
            .find(|(name, _)| *name == HEAD)
            .map(|(_, target)| target)
    }

    /// Returns every advertised ref, with HEAD as a symbolic ref when its
    /// target can be determined.
    ///
    /// The target comes from `symref` when present; otherwise the branch with
    /// HEAD's hash is chosen, preferring `refs/heads/master`.
    pub fn all_references(&self) -> BTreeMap<String, Reference> {
        let mut all: BTreeMap<String, Reference> = self
            .references
            .iter()
            .map(|(name, id)| (name.clone(), Reference::Direct(*id)))
            .collect();

        let Some(head) = self.head else {
            return all;
        };

        let target = self
            .symbolic_head()
            .filter(|target| self.references.contains_key(*target))
            .map(str::to_string)
            .or_else(|| {
                let master = format!("{BRANCH_PREFIX}master");
                (self.references.get(&master) == Some(&head)).then_some(master)
            })
            .or_else(|| {
                self.references
                    .iter()
                    .find(|(name, id)| **id == head && name.starts_with(BRANCH_PREFIX))
                    .map(|(name, _)| name.clone())
            });

        let head_ref = match target {
            Some(target) => Reference::Symbolic(target),
            None => Reference::Direct(head),
        };
        all.insert(HEAD.to_string(), head_ref);
        all
    }

    /// Reads an advertisement up to and including its terminating flush.
    pub fn decode<R: Read>(reader: &mut PktLineReader<R>) -> Result<Self> {
        AdvRefsDecoder::new(reader).decode()
    }

    /// Writes the advertisement, terminated by a flush.
    ///
    /// Refs and shallows are written in sorted order; a peeled line always
    /// follows its tag.
    pub fn encode<W: Write>(&self, writer: &mut PktLineWriter<W>) -> Result<()> {
        for line in &self.prefix {
            match line {
                PktLine::Flush => writer.flush_pkt()?,
                PktLine::Data(data) => {
                    let mut data = data.clone();
                    data.push(b'\n');
                    writer.write_data(&data)?;
                }
            }
        }

        let mut refs = self.references.iter();
        let caps = self.capabilities.to_string();
        let mut first_ref = None;
        let (first_id, first_name) = match self.head {
            Some(head) => (head, HEAD),
            None => match refs.next() {
                Some((name, id)) => {
                    first_ref = Some(name);
                    (*id, name.as_str())
                }
                None => (ObjectId::ZERO, NO_REFS_MARKER),
            },
        };
        let mut first = format!("{first_id} {first_name}").into_bytes();
        first.push(0);
        first.extend_from_slice(caps.as_bytes());
        first.push(b'\n');
        writer.write_data(&first)?;
        if let Some(name) = first_ref {
            self.write_peeled(writer, name)?;
        }

        for (name, id) in refs {
            writer.write_line(&format!("{id} {name}"))?;
            self.write_peeled(writer, name)?;
        }

        let mut shallows: Vec<&ObjectId> = self.shallows.iter().collect();
        shallows.sort();
        for id in shallows {
            writer.write_line(&format!("{SHALLOW_PREFIX}{id}"))?;
        }

        writer.flush_pkt()
    }

    fn write_peeled<W: Write>(&self, writer: &mut PktLineWriter<W>, name: &str) -> Result<()> {
        if let Some(peeled) = self.peeled.get(name) {
            writer.write_line(&format!("{peeled} {name}{PEELED_SUFFIX}"))?;
        }
        Ok(())
    }
}

/// Where the decoder is in the advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Service banner and the flush after it.
    Prefix,
    /// The first hash: zero means no refs follow.
    FirstHash,
    /// `capabilities^{}` after a zero hash.
    SkipNoRefs,
    /// The ref name in the first line.
    FirstRef,
    /// Capabilities after the NUL.
    Capabilities,
    /// One `hash name` line per ref.
    OtherRefs,
    /// `shallow hash` lines.
    Shallows,
    /// Flush seen.
    Done,
}

struct AdvRefsDecoder<'r, R> {
    reader: &'r mut PktLineReader<R>,
    line: Option<PktLine>,
    /// Unconsumed part of the current line.
    rest: Vec<u8>,
    hash: ObjectId,
    data: AdvRefs,
}

impl<'r, R: Read> AdvRefsDecoder<'r, R> {
    fn new(reader: &'r mut PktLineReader<R>) -> Self {
        Self {
            reader,
            line: None,
            rest: Vec::new(),
            hash: ObjectId::ZERO,
            data: AdvRefs::new(),
        }
    }

    fn decode(mut self) -> Result<AdvRefs> {
        self.line = self.reader.read()?;
        if self.line.is_none() {
            return Err(GitError::EmptyAdvRefs);
        }

        let mut state = DecoderState::Prefix;
        while state != DecoderState::Done {
            state = match state {
                DecoderState::Prefix => self.prefix()?,
                DecoderState::FirstHash => self.first_hash()?,
                DecoderState::SkipNoRefs => self.skip_no_refs()?,
                DecoderState::FirstRef => self.first_ref()?,
                DecoderState::Capabilities => self.capabilities(),
                DecoderState::OtherRefs => self.other_refs()?,
                DecoderState::Shallows => self.shallows()?,
                DecoderState::Done => DecoderState::Done,
            };
        }
        debug!(
            refs = self.data.references.len(),
            head = ?self.data.head,
            "decoded advertised refs"
        );
        Ok(self.data)
    }

    fn error(&self, reason: impl Into<String>) -> GitError {
        GitError::MalformedAdvRefs {
            line: self.reader.lines_read(),
            reason: reason.into(),
        }
    }

    /// Reads the next line, trimming its newline. End of stream is an error
    /// since every advertisement ends with a flush.
    fn next_line(&mut self) -> Result<()> {
        self.line = self.reader.read()?;
        if self.line.is_none() {
            return Err(self.error("unexpected EOF"));
        }
        self.rest = self.current_data();
        Ok(())
    }

    fn current_data(&self) -> Vec<u8> {
        match &self.line {
            Some(PktLine::Data(data)) => data.strip_suffix(b"\n").unwrap_or(data).to_vec(),
            _ => Vec::new(),
        }
    }

    fn is_flush(&self) -> bool {
        matches!(self.line, Some(PktLine::Flush))
    }

    fn prefix(&mut self) -> Result<DecoderState> {
        self.rest = self.current_data();
        if self.rest.starts_with(b"#") {
            self.data.prefix.push(PktLine::Data(self.rest.clone()));
            self.next_line()?;
        }
        if self.is_flush() && !self.data.prefix.is_empty() {
            self.data.prefix.push(PktLine::Flush);
            self.line = self.reader.read()?;
            if self.line.is_none() {
                return Err(GitError::EmptyAdvRefs);
            }
            self.rest = self.current_data();
        }
        Ok(DecoderState::FirstHash)
    }

    fn first_hash(&mut self) -> Result<DecoderState> {
        // An empty repository over HTTP answers with a bare flush.
        if self.is_flush() {
            return Err(GitError::EmptyAdvRefs);
        }
        if self.rest.len() < HEX_LEN {
            return Err(self.error("cannot read hash, pkt-line too short"));
        }
        self.hash = self.parse_hash(&self.rest[..HEX_LEN])?;
        self.rest.drain(..HEX_LEN);

        if self.hash.is_zero() {
            Ok(DecoderState::SkipNoRefs)
        } else {
            Ok(DecoderState::FirstRef)
        }
    }

    fn skip_no_refs(&mut self) -> Result<DecoderState> {
        let marker = format!(" {NO_REFS_MARKER}\0");
        if self.rest.len() < marker.len() {
            return Err(self.error("too short zero-id ref"));
        }
        if !self.rest.starts_with(marker.as_bytes()) {
            return Err(self.error("malformed zero-id ref"));
        }
        self.rest.drain(..marker.len());
        Ok(DecoderState::Capabilities)
    }

    fn first_ref(&mut self) -> Result<DecoderState> {
        if self.rest.len() < 3 {
            return Err(self.error("line too short after hash"));
        }
        if self.rest[0] != b' ' {
            return Err(self.error("no space after hash"));
        }
        let Some(nul) = self.rest.iter().position(|&b| b == 0) else {
            return Err(self.error("NULL not found"));
        };
        let name = String::from_utf8_lossy(&self.rest[1..nul]).into_owned();
        if name.is_empty() {
            return Err(self.error("empty reference name"));
        }
        if name == HEAD {
            self.data.head = Some(self.hash);
        } else {
            self.data.references.insert(name, self.hash);
        }
        self.rest.drain(..=nul);
        Ok(DecoderState::Capabilities)
    }

    fn capabilities(&mut self) -> DecoderState {
        self.data.capabilities = CapabilityList::decode_lenient(&self.rest);
        DecoderState::OtherRefs
    }

    fn other_refs(&mut self) -> Result<DecoderState> {
        self.next_line()?;
        if self.is_flush() {
            return Ok(DecoderState::Done);
        }
        if self.rest.starts_with(SHALLOW_PREFIX.as_bytes()) {
            return self.shallow_line();
        }

        let line = String::from_utf8_lossy(&self.rest).into_owned();
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 2 {
            return Err(self.error("malformed ref data: wrong number of fields"));
        }
        let id = self.parse_hash(fields[0].as_bytes())?;
        match fields[1].strip_suffix(PEELED_SUFFIX) {
            Some(name) => self.data.peeled.insert(name.to_string(), id),
            None => self.data.references.insert(fields[1].to_string(), id),
        };
        Ok(DecoderState::OtherRefs)
    }

    fn shallows(&mut self) -> Result<DecoderState> {
        self.next_line()?;
        if self.is_flush() {
            return Ok(DecoderState::Done);
        }
        self.shallow_line()
    }

    fn shallow_line(&mut self) -> Result<DecoderState> {
        let Some(hex) = self.rest.strip_prefix(SHALLOW_PREFIX.as_bytes()) else {
            return Err(self.error("malformed shallow prefix"));
        };
        let id = self.parse_hash(hex)?;
        self.data.shallows.push(id);
        Ok(DecoderState::Shallows)
    }

    fn parse_hash(&self, raw: &[u8]) -> Result<ObjectId> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|hex| ObjectId::from_hex(hex).ok())
            .ok_or_else(|| {
                self.error(format!(
                    "invalid hash text: {}",
                    String::from_utf8_lossy(raw)
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const A: &str = "6ecf0ef2c2dffb796033e5a02219af86ec6584e5";
    const B: &str = "a6930aaee06755d1bdcfd943fbf614e4d92bb0c7";
    const C: &str = "5dc01c595e6c6ec9ccda4f6f69c131c0dd945f8c";

    fn pkts(lines: &[&str]) -> Vec<u8> {
        let mut writer = PktLineWriter::new(Vec::new());
        for line in lines {
            if line.is_empty() {
                writer.flush_pkt().unwrap();
            } else {
                writer.write_data(line.as_bytes()).unwrap();
            }
        }
        writer.into_inner()
    }

    fn decode(lines: &[&str]) -> Result<AdvRefs> {
        let mut reader = PktLineReader::new(Cursor::new(pkts(lines)));
        AdvRefs::decode(&mut reader)
    }

    fn id(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(decode(&[]), Err(GitError::EmptyAdvRefs)));
    }

    #[test]
    fn test_bare_flush_is_empty() {
        assert!(matches!(decode(&[""]), Err(GitError::EmptyAdvRefs)));
    }

    #[test]
    fn test_no_refs() {
        let first = format!("{} capabilities^{{}}\0ofs-delta\n", ObjectId::ZERO);
        let adv = decode(&[&first, ""]).unwrap();
        assert!(adv.head.is_none());
        assert!(adv.references.is_empty());
        assert!(adv.capabilities.supports(Capability::OfsDelta));
        assert!(adv.is_empty());
    }

    #[test]
    fn test_malformed_zero_id() {
        let first = format!("{} HEAD\0ofs-delta\n", ObjectId::ZERO);
        assert!(matches!(
            decode(&[&first, ""]),
            Err(GitError::MalformedAdvRefs { .. })
        ));
    }

    #[test]
    fn test_head_symref_and_one_branch() {
        let first = format!("{A} HEAD\0symref=HEAD:refs/heads/master ofs-delta\n");
        let branch = format!("{A} refs/heads/master\n");
        let adv = decode(&[&first, &branch, ""]).unwrap();

        assert_eq!(adv.head, Some(id(A)));
        assert_eq!(adv.references.len(), 1);
        assert!(adv.peeled.is_empty());
        assert_eq!(adv.symbolic_head(), Some("refs/heads/master"));

        let all = adv.all_references();
        assert_eq!(
            all.get(HEAD),
            Some(&Reference::Symbolic("refs/heads/master".to_string()))
        );
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_head_guessed_from_hash() {
        let first = format!("{B} HEAD\0ofs-delta\n");
        let lines = [
            first,
            format!("{A} refs/heads/dev\n"),
            format!("{B} refs/heads/main\n"),
        ];
        let mut input: Vec<&str> = lines.iter().map(String::as_str).collect();
        input.push("");
        let adv = decode(&input).unwrap();
        assert_eq!(
            adv.all_references().get(HEAD),
            Some(&Reference::Symbolic("refs/heads/main".to_string()))
        );
    }

    #[test]
    fn test_first_line_is_a_branch() {
        let first = format!("{A} refs/heads/main\0report-status\n");
        let adv = decode(&[&first, ""]).unwrap();
        assert!(adv.head.is_none());
        assert_eq!(adv.references.get("refs/heads/main"), Some(&id(A)));
    }

    #[test]
    fn test_peeled_and_shallow() {
        let lines = [
            format!("{A} HEAD\0\n"),
            format!("{B} refs/tags/v1\n"),
            format!("{C} refs/tags/v1^{{}}\n"),
            format!("shallow {C}\n"),
            format!("shallow {B}\n"),
        ];
        let mut input: Vec<&str> = lines.iter().map(String::as_str).collect();
        input.push("");
        let adv = decode(&input).unwrap();
        assert_eq!(adv.peeled.get("refs/tags/v1"), Some(&id(C)));
        assert!(!adv.references.contains_key("refs/tags/v1^{}"));
        assert_eq!(adv.shallows, vec![id(C), id(B)]);
    }

    #[test]
    fn test_service_prefix() {
        let first = format!("{A} HEAD\0agent=git/2.40\n");
        let adv = decode(&["# service=git-upload-pack\n", "", &first, ""]).unwrap();
        assert_eq!(
            adv.prefix,
            vec![
                PktLine::Data(b"# service=git-upload-pack".to_vec()),
                PktLine::Flush
            ]
        );
        assert_eq!(adv.head, Some(id(A)));
    }

    #[test]
    fn test_malformed_ref_line() {
        let first = format!("{A} HEAD\0\n");
        let bad = format!("{B} refs/heads/a b\n");
        let err = decode(&[&first, &bad, ""]).unwrap_err();
        assert!(matches!(err, GitError::MalformedAdvRefs { line: 2, .. }));
        assert!(err.to_string().contains("malformed ref data"));
    }

    #[test]
    fn test_missing_nul() {
        let first = format!("{A} HEAD ofs-delta\n");
        assert!(decode(&[&first, ""]).is_err());
    }

    #[test]
    fn test_truncated_stream() {
        let first = format!("{A} HEAD\0\n");
        let err = decode(&[&first]).unwrap_err();
        assert!(err.to_string().contains("unexpected EOF"));
    }

    #[test]
    fn test_short_hash() {
        assert!(matches!(
            decode(&["abc HEAD\0\n", ""]),
            Err(GitError::MalformedAdvRefs { .. })
        ));
    }

    #[test]
    fn test_unknown_capabilities_are_tolerated() {
        let first = format!("{A} HEAD\0ofs-delta filter allow-x\n");
        let adv = decode(&[&first, ""]).unwrap();
        assert!(adv.capabilities.supports(Capability::OfsDelta));
    }

    #[test]
    fn test_encode_sorted_with_peeled() {
        let mut adv = AdvRefs::new();
        adv.head = Some(id(A));
        adv.capabilities.add_flag(Capability::OfsDelta).unwrap();
        adv.references.insert("refs/tags/v1".to_string(), id(B));
        adv.references.insert("refs/heads/main".to_string(), id(A));
        adv.peeled.insert("refs/tags/v1".to_string(), id(C));
        adv.shallows = vec![id(C), id(B)];

        let mut writer = PktLineWriter::new(Vec::new());
        adv.encode(&mut writer).unwrap();
        let expected = pkts(&[
            &format!("{A} HEAD\0ofs-delta\n"),
            &format!("{A} refs/heads/main\n"),
            &format!("{B} refs/tags/v1\n"),
            &format!("{C} refs/tags/v1^{{}}\n"),
            &format!("shallow {C}\n"),
            &format!("shallow {B}\n"),
            "",
        ]);
        // shallows are sorted by hex: 5dc0... before a693...
        assert_eq!(writer.into_inner(), expected);
    }

    #[test]
    fn test_encode_empty() {
        let mut adv = AdvRefs::new();
        adv.capabilities.add_flag(Capability::ReportStatus).unwrap();
        let mut writer = PktLineWriter::new(Vec::new());
        adv.encode(&mut writer).unwrap();
        let expected = pkts(&[
            &format!("{} capabilities^{{}}\0report-status\n", ObjectId::ZERO),
            "",
        ]);
        assert_eq!(writer.into_inner(), expected);
    }

    #[test]
    fn test_encode_decode_preserves_content() {
        let mut adv = AdvRefs::new();
        adv.prefix = vec![PktLine::Data(b"# service=git-receive-pack".to_vec()), PktLine::Flush];
        adv.capabilities.add_flag(Capability::ReportStatus).unwrap();
        adv.references.insert("refs/heads/a".to_string(), id(A));
        adv.references.insert("refs/tags/t".to_string(), id(B));
        adv.peeled.insert("refs/tags/t".to_string(), id(C));

        let mut writer = PktLineWriter::new(Vec::new());
        adv.encode(&mut writer).unwrap();
        let mut reader = PktLineReader::new(Cursor::new(writer.into_inner()));
        assert_eq!(AdvRefs::decode(&mut reader).unwrap(), adv);
    }

    #[test]
    fn test_add_reference() {
        let mut adv = AdvRefs::new();
        adv.add_reference(HEAD, &Reference::Symbolic("refs/heads/main".to_string()))
            .unwrap();
        adv.add_reference("refs/heads/main", &Reference::Direct(id(A)))
            .unwrap();
        assert_eq!(adv.symbolic_head(), Some("refs/heads/main"));
        assert_eq!(adv.references.get("refs/heads/main"), Some(&id(A)));
    }
}
