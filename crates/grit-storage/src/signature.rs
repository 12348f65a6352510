//! Author, committer and tagger signatures.

use crate::{Result, StorageError};
use std::fmt;

/// A point in time with the author's UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Offset from UTC in minutes.
    pub offset_minutes: i32,
}

impl Time {
    /// Creates a new time.
    pub fn new(seconds: i64, offset_minutes: i32) -> Self {
        Self {
            seconds,
            offset_minutes,
        }
    }

    fn parse_offset(tz: &str) -> Result<i32> {
        let invalid = || StorageError::InvalidObject(format!("invalid timezone offset: {tz}"));
        if tz.len() != 5 || !tz.is_ascii() {
            return Err(invalid());
        }
        let sign = match &tz[..1] {
            "+" => 1,
            "-" => -1,
            _ => return Err(invalid()),
        };
        let hours: i32 = tz[1..3].parse().map_err(|_| invalid())?;
        let minutes: i32 = tz[3..5].parse().map_err(|_| invalid())?;
        Ok(sign * (hours * 60 + minutes))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let offset = self.offset_minutes.abs();
        write!(
            f,
            "{} {}{:02}{:02}",
            self.seconds,
            sign,
            offset / 60,
            offset % 60
        )
    }
}

/// Identity plus timestamp, as found on commit and tag headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Display name.
    pub name: String,
    /// Email address, without the angle brackets.
    pub email: String,
    /// When the signature was made.
    pub when: Time,
}

impl Signature {
    /// Creates a new signature.
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: Time) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
        }
    }

    /// Parses `Name <email> 1234567890 +0100`.
    pub fn decode(line: &str) -> Result<Self> {
        let open = line
            .find('<')
            .ok_or_else(|| StorageError::InvalidObject(format!("signature without email: {line}")))?;
        let close = line[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| StorageError::InvalidObject(format!("unterminated email: {line}")))?;

        let name = line[..open].trim_end().to_string();
        let email = line[open + 1..close].to_string();

        let mut rest = line[close + 1..].split_whitespace();
        let when = match (rest.next(), rest.next()) {
            (Some(seconds), Some(tz)) => {
                let seconds = seconds.parse().map_err(|_| {
                    StorageError::InvalidObject(format!("invalid timestamp: {seconds}"))
                })?;
                Time::new(seconds, Time::parse_offset(tz)?)
            }
            (Some(seconds), None) => {
                let seconds = seconds.parse().map_err(|_| {
                    StorageError::InvalidObject(format!("invalid timestamp: {seconds}"))
                })?;
                Time::new(seconds, 0)
            }
            _ => Time::default(),
        };

        Ok(Self { name, email, when })
    }

    /// Renders the signature in its header form.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.when)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let line = "Alice Example <alice@example.com> 1234567890 +0130";
        let sig = Signature::decode(line).unwrap();
        assert_eq!(sig.name, "Alice Example");
        assert_eq!(sig.email, "alice@example.com");
        assert_eq!(sig.when, Time::new(1234567890, 90));
        assert_eq!(sig.encode(), line);
    }

    #[test]
    fn test_signature_negative_offset() {
        let sig = Signature::decode("Bob <bob@example.com> 1700000000 -0700").unwrap();
        assert_eq!(sig.when.offset_minutes, -420);
        assert!(sig.encode().ends_with("-0700"));
    }

    #[test]
    fn test_signature_without_time() {
        let sig = Signature::decode("Carol <carol@example.com>").unwrap();
        assert_eq!(sig.when, Time::default());
    }

    #[test]
    fn test_signature_invalid() {
        assert!(Signature::decode("no email here").is_err());
        assert!(Signature::decode("Dan <dan@example.com").is_err());
        assert!(Signature::decode("Eve <eve@example.com> soon +0000").is_err());
        assert!(Signature::decode("Eve <eve@example.com> 1 0000").is_err());
    }
}
