//! The `report-status` message sent at the end of a push.

use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{GitError, Result};
use std::io::{Read, Write};

/// Status string meaning success.
pub const OK: &str = "ok";

/// Outcome of a single reference update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    /// Reference the command targeted.
    pub reference: String,
    /// `ok` or the failure reason.
    pub status: String,
}

impl CommandStatus {
    /// A successful update.
    pub fn ok(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            status: OK.to_string(),
        }
    }

    /// A failed update.
    pub fn failed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            status: reason.into(),
        }
    }

    /// Returns true if the update went through.
    pub fn is_ok(&self) -> bool {
        self.status == OK
    }

    /// The failure as an error, if any.
    pub fn error(&self) -> Option<GitError> {
        (!self.is_ok()).then(|| {
            GitError::Remote(format!(
                "command error on {}: {}",
                self.reference, self.status
            ))
        })
    }
}

/// Unpack result plus one status per command, in command order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    /// `ok` or the reason unpacking failed.
    pub unpack_status: String,
    /// Per-reference outcomes.
    pub command_statuses: Vec<CommandStatus>,
}

impl Default for ReportStatus {
    fn default() -> Self {
        Self {
            unpack_status: OK.to_string(),
            command_statuses: Vec::new(),
        }
    }
}

impl ReportStatus {
    /// Creates a report with a successful unpack and no commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if unpacking and every command succeeded.
    pub fn is_ok(&self) -> bool {
        self.error().is_none()
    }

    /// The first failure, unpack errors first.
    pub fn error(&self) -> Option<GitError> {
        if self.unpack_status != OK {
            return Some(GitError::Remote(format!(
                "unpack error: {}",
                self.unpack_status
            )));
        }
        self.command_statuses.iter().find_map(CommandStatus::error)
    }

    /// Writes the report followed by a flush.
    pub fn encode<W: Write>(&self, writer: &mut PktLineWriter<W>) -> Result<()> {
        writer.write_line(&format!("unpack {}", self.unpack_status))?;
        for status in &self.command_statuses {
            if status.is_ok() {
                writer.write_line(&format!("ok {}", status.reference))?;
            } else {
                writer.write_line(&format!("ng {} {}", status.reference, status.status))?;
            }
        }
        writer.flush_pkt()
    }

    /// Reads a report up to and including its flush.
    pub fn decode<R: Read>(reader: &mut PktLineReader<R>) -> Result<Self> {
        let first = match reader.read()? {
            None => return Err(malformed("unexpected EOF")),
            Some(PktLine::Flush) => return Err(malformed("premature flush")),
            Some(PktLine::Data(data)) => data,
        };
        let line = trim_eol(&first);
        let unpack_status = match line.split_once(' ') {
            Some(("unpack", status)) => status.to_string(),
            _ => return Err(malformed(format!("malformed unpack status: {line}"))),
        };

        let mut report = Self {
            unpack_status,
            command_statuses: Vec::new(),
        };
        loop {
            match reader.read()? {
                Some(PktLine::Flush) => return Ok(report),
                None => return Err(malformed("missing flush")),
                Some(PktLine::Data(data)) => {
                    report.command_statuses.push(decode_command_status(&data)?);
                }
            }
        }
    }
}

fn decode_command_status(data: &[u8]) -> Result<CommandStatus> {
    let line = trim_eol(data);
    let mut fields = line.splitn(3, ' ');
    match (fields.next(), fields.next(), fields.next()) {
        (Some("ok"), Some(reference), None) => Ok(CommandStatus::ok(reference)),
        (Some("ng"), Some(reference), Some(reason)) => Ok(CommandStatus::failed(reference, reason)),
        _ => Err(malformed(format!("malformed command status: {line}"))),
    }
}

fn trim_eol(data: &[u8]) -> String {
    let line = data.strip_suffix(b"\n").unwrap_or(data);
    String::from_utf8_lossy(line).into_owned()
}

fn malformed(reason: impl Into<String>) -> GitError {
    GitError::MalformedReportStatus(reason.into())
}
