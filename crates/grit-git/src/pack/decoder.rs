//! Reading pack files.

use super::format::{
    read_entry_header, read_ofs_offset, PackObjectType, HEADER_LEN, PACK_SIGNATURE, PACK_VERSION,
    TRAILER_LEN,
};
use super::{patch_delta, DEFAULT_MAX_OBJECTS};
use crate::{PackError, Result};
use flate2::bufread::ZlibDecoder;
use grit_storage::{GitObject, ObjectId, ObjectStorer, ID_LEN};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info};

/// What a successful decode wrote to the storer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Ids of the decoded objects, in pack order.
    pub objects: Vec<ObjectId>,
    /// Bytes consumed, trailer included.
    pub bytes_read: u64,
    /// The pack's trailing checksum; `None` when the input stopped right
    /// after the last entry.
    pub checksum: Option<ObjectId>,
}

enum EntryState {
    Resolved(GitObject),
    OfsDelta { base_offset: u64, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

struct Entry {
    offset: u64,
    state: EntryState,
}

/// Decodes a pack held in memory and writes its objects to a storer.
///
/// REF-delta bases may come from the storer itself, so thin packs decode as
/// long as the receiving side already has the bases.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    max_objects: u32,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over a complete pack.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            max_objects: DEFAULT_MAX_OBJECTS,
        }
    }

    /// Sets the ceiling on declared object count.
    pub fn with_max_objects(mut self, max_objects: u32) -> Self {
        self.max_objects = max_objects;
        self
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Decodes every entry, resolves deltas, verifies the checksum and stores
    /// the objects.
    ///
    /// Nothing is written to the storer unless the whole pack is valid.
    pub fn decode<S: ObjectStorer + ?Sized>(&mut self, storer: &S) -> Result<DecodeSummary> {
        let count = self.read_header()?;
        debug!(count, "decoding pack");

        let mut entries: Vec<Entry> = Vec::with_capacity(count.min(4096) as usize);
        for index in 0..count {
            let entry = self.read_entry(index)?;
            entries.push(entry);
        }
        let checksum = self.read_trailer()?;

        let objects = resolve(entries, storer)?;
        let mut ids = Vec::with_capacity(objects.len());
        for object in objects {
            ids.push(storer.set_object(object)?);
        }

        info!(objects = ids.len(), bytes = self.pos, "pack decoded");
        Ok(DecodeSummary {
            objects: ids,
            bytes_read: self.pos as u64,
            checksum,
        })
    }

    fn read_header(&mut self) -> Result<u32> {
        if self.data.is_empty() {
            return Err(PackError::EmptyPackfile.into());
        }
        if self.data.len() < HEADER_LEN {
            return Err(PackError::MalformedPackfile("truncated header".to_string()).into());
        }
        if &self.data[..4] != PACK_SIGNATURE {
            return Err(PackError::MalformedPackfile("bad signature".to_string()).into());
        }
        let version = u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version).into());
        }
        let count = u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]]);
        if count > self.max_objects {
            return Err(PackError::MaxObjectsLimitReached {
                count,
                max: self.max_objects,
            }
            .into());
        }
        self.pos = HEADER_LEN;
        Ok(count)
    }

    fn read_entry(&mut self, index: u32) -> Result<Entry> {
        let offset = self.pos as u64;
        let (code, size) = read_entry_header(self.data, &mut self.pos)?;
        let kind = PackObjectType::from_code(code).ok_or(PackError::InvalidObject { offset, code })?;

        let state = match kind {
            PackObjectType::OfsDelta => {
                let distance = read_ofs_offset(self.data, &mut self.pos)?;
                let base_offset = offset
                    .checked_sub(distance)
                    .filter(|_| distance > 0)
                    .ok_or_else(|| {
                        PackError::MalformedPackfile(format!(
                            "delta at offset {offset} points {distance} bytes back"
                        ))
                    })?;
                let delta = self.inflate(offset, index, size)?;
                EntryState::OfsDelta { base_offset, delta }
            }
            PackObjectType::RefDelta => {
                let raw = self
                    .data
                    .get(self.pos..self.pos + ID_LEN)
                    .ok_or_else(|| PackError::MalformedPackfile("truncated delta base".to_string()))?;
                let base = ObjectId::from_slice(raw)?;
                self.pos += ID_LEN;
                let delta = self.inflate(offset, index, size)?;
                EntryState::RefDelta { base, delta }
            }
            _ => {
                let object_type = kind
                    .object_type()
                    .ok_or(PackError::InvalidObject { offset, code })?;
                let data = self.inflate(offset, index, size)?;
                EntryState::Resolved(GitObject::new(object_type, data))
            }
        };
        Ok(Entry { offset, state })
    }

    fn inflate(&mut self, offset: u64, index: u32, size: u64) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(&self.data[self.pos..]);
        let mut out = Vec::with_capacity(size.min(1 << 20) as usize);
        decoder
            .by_ref()
            .take(size.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| PackError::ZLib {
                offset,
                index,
                message: e.to_string(),
            })?;
        if out.len() as u64 != size {
            return Err(PackError::SizeMismatch {
                offset,
                expected: size,
                actual: out.len() as u64,
            }
            .into());
        }
        self.pos += decoder.total_in() as usize;
        Ok(out)
    }

    /// Verifies the trailer if there is one.
    fn read_trailer(&mut self) -> Result<Option<ObjectId>> {
        if self.pos == self.data.len() {
            debug!(bytes = self.pos, "pack has no trailer");
            return Ok(None);
        }
        let raw = self
            .data
            .get(self.pos..self.pos + TRAILER_LEN)
            .ok_or_else(|| PackError::MalformedPackfile("truncated trailer".to_string()))?;
        let expected = ObjectId::from_slice(raw)?;
        let actual = ObjectId::from_slice(&Sha1::digest(&self.data[..self.pos]))?;
        if expected != actual {
            return Err(PackError::ChecksumMismatch { expected, actual }.into());
        }
        self.pos += TRAILER_LEN;
        Ok(Some(expected))
    }
}

/// Turns every delta entry into a full object.
///
/// Bases may appear in any order relative to their deltas, so this repeats
/// passes until nothing changes.
fn resolve<S: ObjectStorer + ?Sized>(mut entries: Vec<Entry>, storer: &S) -> Result<Vec<GitObject>> {
    let by_offset: HashMap<u64, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.offset, i))
        .collect();
    let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if let EntryState::Resolved(object) = &entry.state {
            by_id.insert(object.id, i);
        }
    }

    let mut pending: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| !matches!(e.state, EntryState::Resolved(_)))
        .map(|(i, _)| i)
        .collect();

    while !pending.is_empty() {
        let mut still_pending = Vec::new();
        for &i in &pending {
            let base = match &entries[i].state {
                EntryState::OfsDelta { base_offset, .. } => {
                    let base_index = *by_offset.get(base_offset).ok_or_else(|| {
                        PackError::PackEntryNotFound(format!("no entry at offset {base_offset}"))
                    })?;
                    match &entries[base_index].state {
                        EntryState::Resolved(object) => Some(object.clone()),
                        _ => None,
                    }
                }
                EntryState::RefDelta { base, .. } => match by_id.get(base) {
                    Some(&base_index) => match &entries[base_index].state {
                        EntryState::Resolved(object) => Some(object.clone()),
                        _ => None,
                    },
                    None if storer.has_object(base)? => Some(storer.object(base)?),
                    None => None,
                },
                EntryState::Resolved(_) => continue,
            };

            let Some(base) = base else {
                still_pending.push(i);
                continue;
            };
            let delta = match &entries[i].state {
                EntryState::OfsDelta { delta, .. } | EntryState::RefDelta { delta, .. } => delta,
                EntryState::Resolved(_) => continue,
            };
            let data = patch_delta(&base.data, delta)?;
            let object = GitObject::new(base.object_type, data);
            debug!(offset = entries[i].offset, id = %object.id, "resolved delta");
            by_id.insert(object.id, i);
            entries[i].state = EntryState::Resolved(object);
        }

        if still_pending.len() == pending.len() {
            let missing = match &entries[still_pending[0]].state {
                EntryState::RefDelta { base, .. } => format!("delta base {base}"),
                EntryState::OfsDelta { base_offset, .. } => {
                    format!("delta base at offset {base_offset}")
                }
                EntryState::Resolved(object) => object.id.to_string(),
            };
            return Err(PackError::PackEntryNotFound(missing).into());
        }
        pending = still_pending;
    }

    Ok(entries
        .into_iter()
        .filter_map(|e| match e.state {
            EntryState::Resolved(object) => Some(object),
            _ => None,
        })
        .collect())
}

/// Reads a whole pack from `reader` and decodes it into `storer`.
pub fn decode_from_reader<R, S>(mut reader: R, storer: &S, max_objects: u32) -> Result<DecodeSummary>
where
    R: Read,
    S: ObjectStorer + ?Sized,
{
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Decoder::new(&data).with_max_objects(max_objects).decode(storer)
}
