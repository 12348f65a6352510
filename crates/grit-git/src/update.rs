//! Receive-pack reference update requests.
//!
//! ```text
//! [shallow <hash>]
//! <old> <new> <ref>\0<capabilities>
//! <old> <new> <ref>
//! flush
//! <pack>
//! ```

use crate::capability::CapabilityList;
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{GitError, Result};
use grit_storage::{ObjectId, HEX_LEN};
use std::io::{Read, Write};

/// Shortest command line: two hashes, two spaces and a one-byte name.
const MIN_COMMAND_LEN: usize = HEX_LEN * 2 + 3;

/// Shortest first line: a command plus the NUL.
const MIN_COMMAND_AND_CAPS_LEN: usize = MIN_COMMAND_LEN + 1;

const SHALLOW_LINE_LEN: usize = "shallow ".len() + HEX_LEN;

/// What a command does to its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Old is zero: the reference must not exist yet.
    Create,
    /// Both hashes set.
    Update,
    /// New is zero.
    Delete,
    /// Both hashes zero.
    Invalid,
}

/// One reference update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Reference name.
    pub name: String,
    /// Value the client believes the reference has.
    pub old: ObjectId,
    /// Value to set.
    pub new: ObjectId,
}

impl Command {
    /// Creates a command.
    pub fn new(name: impl Into<String>, old: ObjectId, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            old,
            new,
        }
    }

    /// Classifies the command.
    pub fn action(&self) -> CommandAction {
        match (self.old.is_zero(), self.new.is_zero()) {
            (true, true) => CommandAction::Invalid,
            (true, false) => CommandAction::Create,
            (false, true) => CommandAction::Delete,
            (false, false) => CommandAction::Update,
        }
    }

    /// Rejects commands with both hashes zero.
    pub fn validate(&self) -> Result<()> {
        if self.action() == CommandAction::Invalid {
            return Err(GitError::InvalidRequest(format!(
                "malformed command for {}: old and new are both zero",
                self.name
            )));
        }
        Ok(())
    }

    fn encode(&self) -> String {
        format!("{} {} {}", self.old, self.new, self.name)
    }
}

/// A push: commands plus the pack carrying the new objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceUpdateRequest {
    /// Capabilities the client wants to use.
    pub capabilities: CapabilityList,
    /// Updates in the order the client sent them.
    pub commands: Vec<Command>,
    /// Shallow boundary of the client.
    pub shallow: Option<ObjectId>,
    /// Pack bytes; empty when every command is a delete.
    pub pack: Vec<u8>,
}

impl ReferenceUpdateRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks there is something to do and every command is valid.
    pub fn validate(&self) -> Result<()> {
        if self.commands.is_empty() {
            return Err(GitError::InvalidRequest("commands cannot be empty".to_string()));
        }
        for command in &self.commands {
            command.validate()?;
        }
        Ok(())
    }

    /// Returns true if a pack has to accompany the commands.
    pub fn needs_pack(&self) -> bool {
        self.commands
            .iter()
            .any(|c| c.action() != CommandAction::Delete)
    }

    /// Writes the commands, the flush and the pack.
    pub fn encode<W: Write>(&self, writer: W) -> Result<()> {
        self.validate()?;
        let mut writer = PktLineWriter::new(writer);
        if let Some(shallow) = &self.shallow {
            writer.write_data(format!("shallow {shallow}").as_bytes())?;
        }

        let mut commands = self.commands.iter();
        if let Some(first) = commands.next() {
            let mut line = first.encode().into_bytes();
            line.push(0);
            line.extend_from_slice(self.capabilities.to_string().as_bytes());
            writer.write_data(&line)?;
        }
        for command in commands {
            writer.write_data(command.encode().as_bytes())?;
        }
        writer.flush_pkt()?;

        let mut inner = writer.into_inner();
        inner.write_all(&self.pack)?;
        inner.flush()?;
        Ok(())
    }

    /// Reads a request; everything after the command flush is the pack.
    ///
    /// A lone flush (the client has nothing to push) decodes to a request
    /// with no commands.
    pub fn decode<R: Read>(reader: R) -> Result<Self> {
        let mut reader = PktLineReader::new(reader);
        let mut request = Self::new();

        let mut line = match reader.read()? {
            None => return Err(GitError::EmptyRequest),
            Some(PktLine::Flush) => return Ok(request),
            Some(PktLine::Data(data)) => data,
        };

        if line.starts_with(b"shallow") {
            request.shallow = Some(decode_shallow(&line)?);
            line = match reader.read()? {
                Some(PktLine::Data(data)) => data,
                _ => return Err(malformed("missing command after shallow line")),
            };
        }

        let line = trim_eol(&line);
        if line.len() < MIN_COMMAND_AND_CAPS_LEN {
            return Err(malformed(format!(
                "invalid command and capabilities line length: expected at least \
                 {MIN_COMMAND_AND_CAPS_LEN}, got {}",
                line.len()
            )));
        }
        let Some(nul) = line.iter().position(|&b| b == 0) else {
            return Err(malformed("capabilities delimiter not found"));
        };
        request.commands.push(decode_command(&line[..nul])?);
        request.capabilities = CapabilityList::decode(&line[nul + 1..])?;

        loop {
            match reader.read()? {
                Some(PktLine::Flush) => break,
                None => return Err(malformed("unexpected EOF before flush")),
                Some(PktLine::Data(data)) => {
                    request.commands.push(decode_command(trim_eol(&data))?);
                }
            }
        }

        reader.into_inner().read_to_end(&mut request.pack)?;
        Ok(request)
    }
}

fn malformed(reason: impl Into<String>) -> GitError {
    GitError::MalformedRequest(reason.into())
}

fn trim_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn decode_shallow(line: &[u8]) -> Result<ObjectId> {
    let line = trim_eol(line);
    if line.len() != SHALLOW_LINE_LEN {
        return Err(malformed(format!(
            "invalid shallow line length: expected {SHALLOW_LINE_LEN}, got {}",
            line.len()
        )));
    }
    parse_hash(&line["shallow ".len()..])
        .map_err(|e| malformed(format!("invalid shallow object id: {e}")))
}

fn decode_command(line: &[u8]) -> Result<Command> {
    if line.len() < MIN_COMMAND_LEN {
        return Err(malformed(format!(
            "invalid command line length: expected at least {MIN_COMMAND_LEN}, got {}",
            line.len()
        )));
    }
    let text = String::from_utf8_lossy(line);
    let mut fields = text.split_ascii_whitespace();
    let (Some(old), Some(new), Some(name)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(malformed("malformed command: EOF"));
    };
    let old = parse_hash(old.as_bytes())
        .map_err(|e| malformed(format!("invalid old object id: {e}")))?;
    let new = parse_hash(new.as_bytes())
        .map_err(|e| malformed(format!("invalid new object id: {e}")))?;
    Ok(Command::new(name, old, new))
}

fn parse_hash(raw: &[u8]) -> std::result::Result<ObjectId, String> {
    if raw.len() != HEX_LEN {
        return Err(format!(
            "invalid hash size: expected {HEX_LEN}, got {}",
            raw.len()
        ));
    }
    let text = String::from_utf8_lossy(raw);
    ObjectId::from_hex(&text).map_err(|e| format!("invalid hash: {e}"))
}
