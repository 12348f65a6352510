//! Compression utilities for storage.
//!
//! Loose objects and pack entries are both zlib streams.

use crate::Result;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression
    None,
    /// Fast compression (lower ratio)
    Fast,
    /// Default compression (balanced)
    #[default]
    Default,
    /// Best compression (slower, higher ratio)
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Compresses `data` into a zlib stream.
pub fn deflate(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level.to_flate2());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a complete zlib stream.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_levels() {
        let data = b"hello world hello world hello world".repeat(100);

        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Default,
            CompressionLevel::Best,
        ] {
            let compressed = deflate(&data, level).unwrap();
            assert_eq!(inflate(&compressed).unwrap(), data);
        }
    }

    #[test]
    fn test_best_is_smaller_than_none() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(64);
        let none = deflate(&data, CompressionLevel::None).unwrap();
        let best = deflate(&data, CompressionLevel::Best).unwrap();
        assert!(best.len() < none.len());
    }

    #[test]
    fn test_inflate_garbage() {
        assert!(inflate(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_level_deserialize() {
        let level: CompressionLevel = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(level, CompressionLevel::Best);
        assert_eq!(CompressionLevel::default(), CompressionLevel::Default);
    }
}
