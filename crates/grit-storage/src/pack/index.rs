//! Version 2 pack index (`.idx`) files.
//!
//! Layout: magic `\xfftOc`, version, 256 cumulative fan-out counts, sorted
//! object ids, one CRC32 per object, 31-bit offsets (MSB set means "index
//! into the 64-bit table"), the 64-bit offsets, then the pack checksum and
//! the checksum of the index itself.

use crate::{ObjectId, PackError, ID_LEN};
use sha1::{Digest, Sha1};

const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_VERSION: u32 = 2;
const FANOUT_ENTRIES: usize = 256;
const HEADER_LEN: usize = 8 + FANOUT_ENTRIES * 4;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// The id to offset map of one pack.
#[derive(Debug, Clone)]
pub struct PackIndex {
    ids: Vec<ObjectId>,
    offsets: Vec<u64>,
    pack_checksum: ObjectId,
}

fn malformed(reason: impl Into<String>) -> PackError {
    PackError::MalformedPackfile(format!("pack index: {}", reason.into()))
}

fn be_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

impl PackIndex {
    /// Parses an index, verifying its own checksum.
    pub fn decode(data: &[u8]) -> Result<Self, PackError> {
        if data.len() < HEADER_LEN + 2 * ID_LEN {
            return Err(malformed("truncated header"));
        }
        if data[..4] != IDX_SIGNATURE {
            return Err(malformed("bad signature"));
        }
        let version = be_u32(data, 4);
        if version != IDX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let body_end = data.len() - ID_LEN;
        let expected = ObjectId::from_slice(&data[body_end..]).map_err(|e| malformed(e.to_string()))?;
        let actual =
            ObjectId::from_slice(&Sha1::digest(&data[..body_end])).map_err(|e| malformed(e.to_string()))?;
        if expected != actual {
            return Err(PackError::ChecksumMismatch { expected, actual });
        }

        let count = be_u32(data, 8 + (FANOUT_ENTRIES - 1) * 4) as usize;

        let ids_start = HEADER_LEN;
        let crcs_start = ids_start + count * ID_LEN;
        let offsets_start = crcs_start + count * 4;
        let large_start = offsets_start + count * 4;
        let large_end = body_end - ID_LEN;
        if large_start > large_end || (large_end - large_start) % 8 != 0 {
            return Err(malformed(format!("size does not fit {count} objects")));
        }

        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let start = ids_start + i * ID_LEN;
            let id = ObjectId::from_slice(&data[start..start + ID_LEN])
                .map_err(|e| malformed(e.to_string()))?;
            if ids.last().is_some_and(|last| *last >= id) {
                return Err(malformed("object ids are not sorted"));
            }
            ids.push(id);
        }
        for byte in 0..FANOUT_ENTRIES {
            let declared = be_u32(data, 8 + byte * 4) as usize;
            let actual = ids.partition_point(|id| usize::from(id.as_bytes()[0]) <= byte);
            if declared != actual {
                return Err(malformed(format!("fan-out entry {byte} is wrong")));
            }
        }

        let large = &data[large_start..large_end];
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let raw = be_u32(data, offsets_start + i * 4);
            let offset = if raw & LARGE_OFFSET_FLAG == 0 {
                u64::from(raw)
            } else {
                let slot = (raw & !LARGE_OFFSET_FLAG) as usize * 8;
                let bytes = large
                    .get(slot..slot + 8)
                    .ok_or_else(|| malformed(format!("large offset {slot} out of range")))?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            };
            offsets.push(offset);
        }

        let pack_checksum =
            ObjectId::from_slice(&data[large_end..body_end]).map_err(|e| malformed(e.to_string()))?;

        Ok(Self {
            ids,
            offsets,
            pack_checksum,
        })
    }

    /// Number of objects in the pack.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true for an index of an empty pack.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorted ids of every object in the pack.
    pub fn ids(&self) -> &[ObjectId] {
        &self.ids
    }

    /// Offset of `id` in the pack, if present.
    pub fn offset(&self, id: &ObjectId) -> Option<u64> {
        self.ids.binary_search(id).ok().map(|i| self.offsets[i])
    }

    /// Returns true if the pack holds `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.ids.binary_search(id).is_ok()
    }

    /// Checksum of the pack this index describes.
    pub fn pack_checksum(&self) -> ObjectId {
        self.pack_checksum
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::build_index;
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn test_decode_lookup() {
        let entries = [(id(0x30), 12), (id(0x01), 400), (id(0xfe), 99)];
        let idx = build_index(&entries, &[0x77; 20]);
        let index = PackIndex::decode(&idx).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.ids(), &[id(0x01), id(0x30), id(0xfe)]);
        assert_eq!(index.offset(&id(0x30)), Some(12));
        assert_eq!(index.offset(&id(0x01)), Some(400));
        assert_eq!(index.offset(&id(0x02)), None);
        assert!(index.contains(&id(0xfe)));
        assert_eq!(index.pack_checksum(), id(0x77));
    }

    #[test]
    fn test_large_offsets() {
        let entries = [(id(0x10), 12), (id(0x20), 0x1_0000_0000), (id(0x30), 0x8000_0000)];
        let index = PackIndex::decode(&build_index(&entries, &[0; 20])).unwrap();
        assert_eq!(index.offset(&id(0x20)), Some(0x1_0000_0000));
        assert_eq!(index.offset(&id(0x30)), Some(0x8000_0000));
        assert_eq!(index.offset(&id(0x10)), Some(12));
    }

    #[test]
    fn test_empty_index() {
        let index = PackIndex::decode(&build_index(&[], &[0; 20])).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_corrupt_checksum() {
        let mut idx = build_index(&[(id(0x30), 12)], &[0; 20]);
        idx[HEADER_LEN] ^= 0xff;
        assert!(matches!(
            PackIndex::decode(&idx),
            Err(PackError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(
            PackIndex::decode(&[0; 16]),
            Err(PackError::MalformedPackfile(_))
        ));

        let mut idx = build_index(&[], &[0; 20]);
        idx[7] = 1;
        assert!(matches!(
            PackIndex::decode(&idx),
            Err(PackError::UnsupportedVersion(1))
        ));
    }
}
