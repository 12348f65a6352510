//! Low-level pack encodings: entry headers and the two varint flavours.

use crate::{ObjectType, PackError};

/// Magic bytes at the start of a pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
pub const PACK_VERSION: u32 = 2;
/// Signature, version and object count.
pub const HEADER_LEN: usize = 12;
/// SHA-1 of everything before it.
pub const TRAILER_LEN: usize = 20;

/// Entry type codes as stored in the 3-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackObjectType {
    /// Full commit.
    Commit,
    /// Full tree.
    Tree,
    /// Full blob.
    Blob,
    /// Full annotated tag.
    Tag,
    /// Delta against the entry at a negative offset.
    OfsDelta,
    /// Delta against the object with a given id.
    RefDelta,
}

impl PackObjectType {
    /// Parses a type code; 0 and 5 are reserved.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            6 => Some(Self::OfsDelta),
            7 => Some(Self::RefDelta),
            _ => None,
        }
    }

    /// Returns the type code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OfsDelta => 6,
            Self::RefDelta => 7,
        }
    }

    /// Returns the object type for non-delta entries.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::OfsDelta | Self::RefDelta => None,
        }
    }
}

impl From<ObjectType> for PackObjectType {
    fn from(object_type: ObjectType) -> Self {
        match object_type {
            ObjectType::Commit => Self::Commit,
            ObjectType::Tree => Self::Tree,
            ObjectType::Blob => Self::Blob,
            ObjectType::Tag => Self::Tag,
        }
    }
}

fn next_byte(data: &[u8], pos: &mut usize, what: &str) -> Result<u8, PackError> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| PackError::MalformedPackfile(format!("unexpected end of pack in {what}")))?;
    *pos += 1;
    Ok(byte)
}

/// Writes an entry header.
///
/// First byte: (MSB=more bytes) (3 bits type) (4 bits size); then 7 bits of
/// size per byte, least significant group first.
pub fn write_entry_header(out: &mut Vec<u8>, kind: PackObjectType, size: u64) {
    let mut first_byte = (kind.code() << 4) | (size & 0x0F) as u8;
    let mut remaining_size = size >> 4;

    if remaining_size > 0 {
        first_byte |= 0x80;
    }
    out.push(first_byte);

    while remaining_size > 0 {
        let mut byte = (remaining_size & 0x7F) as u8;
        remaining_size >>= 7;
        if remaining_size > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Reads an entry header, returning the raw type code and inflated size.
pub fn read_entry_header(data: &[u8], pos: &mut usize) -> Result<(u8, u64), PackError> {
    let first_byte = next_byte(data, pos, "entry header")?;
    let code = (first_byte >> 4) & 0x07;
    let mut size = u64::from(first_byte & 0x0F);
    let mut shift = 4u32;
    let mut byte = first_byte;

    while byte & 0x80 != 0 {
        byte = next_byte(data, pos, "entry size")?;
        if shift > 57 {
            return Err(PackError::MalformedPackfile("entry size overflows".to_string()));
        }
        size |= u64::from(byte & 0x7F) << shift;
        shift += 7;
    }
    Ok((code, size))
}

/// Writes the distance back to an OFS-delta base.
///
/// Big-endian groups of 7 bits where every continuation adds one before
/// shifting, so each length has a distinct range.
pub fn write_ofs_offset(out: &mut Vec<u8>, mut offset: u64) {
    let mut buf = [0u8; 10];
    let mut pos = buf.len() - 1;
    buf[pos] = (offset & 0x7F) as u8;
    offset >>= 7;
    while offset > 0 {
        offset -= 1;
        pos -= 1;
        buf[pos] = 0x80 | (offset & 0x7F) as u8;
        offset >>= 7;
    }
    out.extend_from_slice(&buf[pos..]);
}

/// Reads the distance back to an OFS-delta base.
pub fn read_ofs_offset(data: &[u8], pos: &mut usize) -> Result<u64, PackError> {
    let mut byte = next_byte(data, pos, "delta offset")?;
    let mut offset = u64::from(byte & 0x7F);
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos, "delta offset")?;
        offset = offset
            .checked_add(1)
            .filter(|o| *o <= u64::MAX >> 7)
            .ok_or_else(|| PackError::MalformedPackfile("delta offset overflows".to_string()))?;
        offset = (offset << 7) | u64::from(byte & 0x7F);
    }
    Ok(offset)
}

/// Writes a delta header size: little-endian groups of 7 bits.
pub fn write_delta_size(out: &mut Vec<u8>, mut size: u64) {
    loop {
        let mut byte = (size & 0x7F) as u8;
        size >>= 7;
        if size > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if size == 0 {
            break;
        }
    }
}

/// Reads a delta header size.
pub fn read_delta_size(data: &[u8], pos: &mut usize) -> Result<u64, PackError> {
    let mut size = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| PackError::InvalidDelta("truncated size header".to_string()))?;
        *pos += 1;
        if shift > 63 {
            return Err(PackError::InvalidDelta("size header overflows".to_string()));
        }
        size |= u64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_header_small() {
        let mut out = Vec::new();
        write_entry_header(&mut out, PackObjectType::Blob, 10);
        assert_eq!(out, [0x3a]);

        let mut pos = 0;
        assert_eq!(read_entry_header(&out, &mut pos).unwrap(), (3, 10));
        assert_eq!(pos, 1);
    }

    #[test]
    fn test_entry_header_large() {
        let mut out = Vec::new();
        write_entry_header(&mut out, PackObjectType::Commit, 1_000_000);
        let mut pos = 0;
        assert_eq!(read_entry_header(&out, &mut pos).unwrap(), (1, 1_000_000));
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_entry_header_truncated() {
        let mut pos = 0;
        assert!(read_entry_header(&[0x90], &mut pos).is_err());
    }

    #[test]
    fn test_entry_header_overflow() {
        let data = [0xff; 16];
        let mut pos = 0;
        assert!(read_entry_header(&data, &mut pos).is_err());
    }

    #[test]
    fn test_ofs_offset_known_encodings() {
        // 128 is the first value needing two bytes: 0x80 0x00.
        let mut out = Vec::new();
        write_ofs_offset(&mut out, 128);
        assert_eq!(out, [0x80, 0x00]);

        let mut out = Vec::new();
        write_ofs_offset(&mut out, 127);
        assert_eq!(out, [0x7f]);

        for value in [0u64, 1, 127, 128, 16511, 16512, 1 << 32, u64::MAX >> 8] {
            let mut out = Vec::new();
            write_ofs_offset(&mut out, value);
            let mut pos = 0;
            assert_eq!(read_ofs_offset(&out, &mut pos).unwrap(), value);
            assert_eq!(pos, out.len());
        }
    }

    #[test]
    fn test_ofs_offset_overflow() {
        let data = [0xff; 12];
        let mut pos = 0;
        assert!(read_ofs_offset(&data, &mut pos).is_err());
    }

    #[test]
    fn test_delta_size() {
        for value in [0u64, 1, 127, 128, 300, 1 << 40] {
            let mut out = Vec::new();
            write_delta_size(&mut out, value);
            let mut pos = 0;
            assert_eq!(read_delta_size(&out, &mut pos).unwrap(), value);
        }
        let mut out = Vec::new();
        write_delta_size(&mut out, 300);
        assert_eq!(out, [0xac, 0x02]);
    }

    #[test]
    fn test_type_codes() {
        assert!(PackObjectType::from_code(0).is_none());
        assert!(PackObjectType::from_code(5).is_none());
        assert_eq!(PackObjectType::from_code(6), Some(PackObjectType::OfsDelta));
        assert_eq!(PackObjectType::from(ObjectType::Tag).code(), 4);
        assert!(PackObjectType::RefDelta.object_type().is_none());
    }
}
