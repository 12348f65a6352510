//! Random access to the objects of an indexed pack.

use super::delta::patch_delta;
use super::format::{
    read_entry_header, read_ofs_offset, PackObjectType, HEADER_LEN, PACK_SIGNATURE, PACK_VERSION,
    TRAILER_LEN,
};
use super::index::PackIndex;
use crate::{GitObject, ObjectId, ObjectType, PackError, Result, StorageError, ID_LEN};
use flate2::bufread::ZlibDecoder;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

enum RawEntry {
    Full(ObjectType, Vec<u8>),
    OfsDelta { base_offset: u64, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// A pack held in memory together with its index.
pub struct PackFile {
    data: Vec<u8>,
    index: PackIndex,
}

impl fmt::Debug for PackFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackFile")
            .field("bytes", &self.data.len())
            .field("objects", &self.index.len())
            .field("checksum", &self.index.pack_checksum())
            .finish()
    }
}

impl PackFile {
    /// Reads `<name>.pack` and its `<name>.idx`.
    pub fn open(pack_path: &Path, index_path: &Path) -> Result<Self> {
        let index = PackIndex::decode(&fs::read(index_path)?)?;
        let data = fs::read(pack_path)?;
        Ok(Self::new(data, index)?)
    }

    /// Pairs pack bytes with their index after checking that they match.
    pub fn new(data: Vec<u8>, index: PackIndex) -> std::result::Result<Self, PackError> {
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(PackError::MalformedPackfile("truncated pack".to_string()));
        }
        if &data[..4] != PACK_SIGNATURE {
            return Err(PackError::MalformedPackfile("bad signature".to_string()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        if count as usize != index.len() {
            return Err(PackError::MalformedPackfile(format!(
                "pack holds {count} objects, index lists {}",
                index.len()
            )));
        }
        let trailer = ObjectId::from_bytes(trailer_bytes(&data));
        if trailer != index.pack_checksum() {
            return Err(PackError::ChecksumMismatch {
                expected: index.pack_checksum(),
                actual: trailer,
            });
        }
        Ok(Self { data, index })
    }

    /// The pack's index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Returns true if the pack holds `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Reads `id` from the pack, resolving any delta chain.
    pub fn object(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        let Some(offset) = self.index.offset(id) else {
            return Ok(None);
        };
        let object = self.object_at(offset)?;
        if object.id != *id {
            return Err(StorageError::Corruption(format!(
                "packed object {} hashes to {}",
                id, object.id
            )));
        }
        Ok(Some(object))
    }

    /// Reads the entry at `offset`.
    ///
    /// Deltas are followed back to a full entry, then applied from the base
    /// outwards. REF-delta bases must live in this pack.
    pub fn object_at(&self, offset: u64) -> std::result::Result<GitObject, PackError> {
        let mut deltas = Vec::new();
        let mut offset = offset;
        let (object_type, mut data) = loop {
            if deltas.len() > self.index.len() {
                return Err(PackError::MalformedPackfile(format!(
                    "delta chain at offset {offset} does not end"
                )));
            }
            match self.entry_at(offset)? {
                RawEntry::Full(object_type, data) => break (object_type, data),
                RawEntry::OfsDelta { base_offset, delta } => {
                    deltas.push(delta);
                    offset = base_offset;
                }
                RawEntry::RefDelta { base, delta } => {
                    deltas.push(delta);
                    offset = self
                        .index
                        .offset(&base)
                        .ok_or_else(|| PackError::PackEntryNotFound(format!("delta base {base}")))?;
                }
            }
        };
        for delta in deltas.iter().rev() {
            data = patch_delta(&data, delta)?;
        }
        Ok(GitObject::new(object_type, data))
    }

    fn entry_at(&self, offset: u64) -> std::result::Result<RawEntry, PackError> {
        let end = self.data.len() - TRAILER_LEN;
        let mut pos = usize::try_from(offset)
            .ok()
            .filter(|pos| (HEADER_LEN..end).contains(pos))
            .ok_or_else(|| PackError::PackEntryNotFound(format!("no entry at offset {offset}")))?;
        let body = &self.data[..end];

        let (code, size) = read_entry_header(body, &mut pos)?;
        let kind = PackObjectType::from_code(code).ok_or(PackError::InvalidObject { offset, code })?;
        match kind {
            PackObjectType::OfsDelta => {
                let distance = read_ofs_offset(body, &mut pos)?;
                let base_offset = offset
                    .checked_sub(distance)
                    .filter(|_| distance > 0)
                    .ok_or_else(|| {
                        PackError::MalformedPackfile(format!(
                            "delta at offset {offset} points {distance} bytes back"
                        ))
                    })?;
                let delta = inflate(body, pos, offset, size)?;
                Ok(RawEntry::OfsDelta { base_offset, delta })
            }
            PackObjectType::RefDelta => {
                let raw = body
                    .get(pos..pos + ID_LEN)
                    .ok_or_else(|| PackError::MalformedPackfile("truncated delta base".to_string()))?;
                let mut base = [0u8; ID_LEN];
                base.copy_from_slice(raw);
                let delta = inflate(body, pos + ID_LEN, offset, size)?;
                Ok(RawEntry::RefDelta {
                    base: ObjectId::from_bytes(base),
                    delta,
                })
            }
            _ => {
                let object_type = kind
                    .object_type()
                    .ok_or(PackError::InvalidObject { offset, code })?;
                Ok(RawEntry::Full(object_type, inflate(body, pos, offset, size)?))
            }
        }
    }
}

fn trailer_bytes(data: &[u8]) -> [u8; ID_LEN] {
    let mut trailer = [0u8; ID_LEN];
    trailer.copy_from_slice(&data[data.len() - TRAILER_LEN..]);
    trailer
}

fn inflate(body: &[u8], pos: usize, offset: u64, size: u64) -> std::result::Result<Vec<u8>, PackError> {
    let mut out = Vec::with_capacity(size.min(1 << 20) as usize);
    ZlibDecoder::new(&body[pos..])
        .take(size.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| PackError::MalformedPackfile(format!("zlib error at offset {offset}: {e}")))?;
    if out.len() as u64 != size {
        return Err(PackError::SizeMismatch {
            offset,
            expected: size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}
