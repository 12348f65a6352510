//! Writing pack files.

use super::format::{
    write_entry_header, write_ofs_offset, PackObjectType, PACK_SIGNATURE, PACK_VERSION,
};
use super::selector::{DeltaSelector, ObjectToPack};
use super::PackConfig;
use crate::{PackError, Result};
use flate2::write::ZlibEncoder;
use grit_storage::{CompressionLevel, GitObject, ObjectId, ObjectStorer};
use sha1::{Digest, Sha1};
use std::io::Write;
use tracing::debug;

/// Hashes and counts everything written through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Streams a pack to a writer.
pub struct Encoder<W: Write> {
    writer: HashingWriter<W>,
    compression: CompressionLevel,
    use_ref_deltas: bool,
}

impl<W: Write> Encoder<W> {
    /// Creates an encoder with the given settings.
    pub fn new(writer: W, config: &PackConfig) -> Self {
        Self {
            writer: HashingWriter {
                inner: writer,
                hasher: Sha1::new(),
                written: 0,
            },
            compression: config.compression,
            use_ref_deltas: config.use_ref_deltas,
        }
    }

    /// Writes header, entries and trailer; returns the pack checksum.
    ///
    /// Entries with a base are written as OFS deltas (or REF deltas when
    /// configured); the base must appear earlier in `objects`.
    pub fn encode(mut self, objects: &[ObjectToPack]) -> Result<(ObjectId, W)> {
        let count = u32::try_from(objects.len())
            .map_err(|_| PackError::MalformedPackfile("too many objects".to_string()))?;

        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(PACK_SIGNATURE);
        header.extend_from_slice(&PACK_VERSION.to_be_bytes());
        header.extend_from_slice(&count.to_be_bytes());
        self.writer.write_all(&header)?;

        let mut offsets = Vec::with_capacity(objects.len());
        for (index, object) in objects.iter().enumerate() {
            let offset = self.writer.written;
            offsets.push(offset);

            let mut entry = Vec::new();
            let payload: &[u8] = match (object.base, &object.delta) {
                (Some(base), Some(delta)) if base < index => {
                    if self.use_ref_deltas {
                        write_entry_header(&mut entry, PackObjectType::RefDelta, delta.len() as u64);
                        entry.extend_from_slice(objects[base].id().as_bytes());
                    } else {
                        write_entry_header(&mut entry, PackObjectType::OfsDelta, delta.len() as u64);
                        write_ofs_offset(&mut entry, offset - offsets[base]);
                    }
                    delta.as_slice()
                }
                _ => {
                    let kind = PackObjectType::from(object.original.object_type);
                    write_entry_header(&mut entry, kind, object.size() as u64);
                    &object.original.data[..]
                }
            };
            self.writer.write_all(&entry)?;
            self.write_compressed(payload)?;
        }

        let HashingWriter {
            mut inner, hasher, ..
        } = self.writer;
        let checksum = ObjectId::from_slice(&hasher.finalize())?;
        inner.write_all(checksum.as_bytes())?;
        inner.flush()?;

        debug!(objects = objects.len(), checksum = %checksum, "pack encoded");
        Ok((checksum, inner))
    }

    fn write_compressed(&mut self, data: &[u8]) -> Result<()> {
        let mut encoder = ZlibEncoder::new(&mut self.writer, self.compression.to_flate2());
        encoder.write_all(data)?;
        encoder.finish()?;
        Ok(())
    }
}

/// Loads `ids` from the storer, selects deltas and writes a pack.
pub fn encode_objects<S, W>(
    storer: &S,
    ids: &[ObjectId],
    config: &PackConfig,
    writer: W,
) -> Result<ObjectId>
where
    S: ObjectStorer + ?Sized,
    W: Write,
{
    let mut objects = Vec::with_capacity(ids.len());
    for id in ids {
        objects.push(storer.object(id)?);
    }
    let list = DeltaSelector::new(config).select(objects);
    let (checksum, _) = Encoder::new(writer, config).encode(&list)?;
    Ok(checksum)
}

/// Builds an in-memory pack file from a set of objects.
#[derive(Debug, Default)]
pub struct PackBuilder {
    objects: Vec<GitObject>,
    config: PackConfig,
}

impl PackBuilder {
    /// Creates a new pack builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with the given settings.
    pub fn with_config(config: PackConfig) -> Self {
        Self {
            objects: Vec::new(),
            config,
        }
    }

    /// Adds an object to the pack.
    pub fn add(&mut self, object: GitObject) {
        self.objects.push(object);
    }

    /// Returns the number of objects added so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let list = DeltaSelector::new(&self.config).select(self.objects);
        let (_, pack) = Encoder::new(Vec::new(), &self.config).encode(&list)?;
        Ok(pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grit_storage::ObjectType;

    #[test]
    fn test_empty_pack() {
        let pack = PackBuilder::new().build().unwrap();
        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(&pack[4..8], &[0, 0, 0, 2]);
        assert_eq!(&pack[8..12], &[0, 0, 0, 0]);
        assert_eq!(pack.len(), 32);

        let checksum = Sha1::digest(&pack[..12]);
        assert_eq!(&pack[12..], checksum.as_slice());
    }

    #[test]
    fn test_header_counts_objects() {
        let mut builder = PackBuilder::new();
        builder.add(GitObject::blob(b"one".to_vec()));
        builder.add(GitObject::new(ObjectType::Commit, b"tree x\n".to_vec()));
        assert_eq!(builder.len(), 2);
        let pack = builder.build().unwrap();
        assert_eq!(&pack[8..12], &[0, 0, 0, 2]);
    }

    #[test]
    fn test_returns_checksum_of_content() {
        let list = vec![ObjectToPack::new(GitObject::blob(b"x".to_vec()))];
        let (checksum, pack) = Encoder::new(Vec::new(), &PackConfig::default())
            .encode(&list)
            .unwrap();
        let body = &pack[..pack.len() - 20];
        assert_eq!(checksum.as_bytes().as_slice(), Sha1::digest(body).as_slice());
        assert_eq!(&pack[pack.len() - 20..], checksum.as_bytes().as_slice());
    }
}
