//! Applying git deltas.
//!
//! A delta is two size headers (base, target) followed by instructions:
//! a copy from the base (MSB set, with optional offset and size bytes) or an
//! insert of up to 127 literal bytes (MSB clear, low bits are the length).

use super::format::read_delta_size;
use crate::PackError;

/// A copy instruction with no size bytes copies this many bytes.
const DEFAULT_COPY_SIZE: usize = 0x10000;

/// Reads the base and target sizes from the start of a delta.
pub fn delta_header_sizes(delta: &[u8]) -> Result<(u64, u64), PackError> {
    let mut pos = 0;
    let base_size = read_delta_size(delta, &mut pos)?;
    let target_size = read_delta_size(delta, &mut pos)?;
    Ok((base_size, target_size))
}

/// Applies a delta to a base object, producing the target.
pub fn patch_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut pos = 0;
    let base_size = read_delta_size(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(PackError::InvalidDelta(format!(
            "base size {} does not match delta header {}",
            base.len(),
            base_size
        )));
    }
    let target_size = usize::try_from(read_delta_size(delta, &mut pos)?)
        .map_err(|_| PackError::InvalidDelta("target size too large".to_string()))?;

    let mut out = Vec::with_capacity(target_size.min(delta.len().saturating_mul(128)));

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut offset = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(truncated)?;
                    pos += 1;
                    offset |= usize::from(byte) << (8 * i);
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(truncated)?;
                    pos += 1;
                    size |= usize::from(byte) << (8 * i);
                }
            }
            if size == 0 {
                size = DEFAULT_COPY_SIZE;
            }

            let end = offset
                .checked_add(size)
                .filter(|end| *end <= base.len())
                .ok_or_else(|| {
                    PackError::InvalidDelta(format!(
                        "copy of {size} bytes at {offset} exceeds base of {} bytes",
                        base.len()
                    ))
                })?;
            if out.len() + size > target_size {
                return Err(overrun(target_size));
            }
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let size = usize::from(cmd);
            let literal = delta.get(pos..pos + size).ok_or_else(truncated)?;
            pos += size;
            if out.len() + size > target_size {
                return Err(overrun(target_size));
            }
            out.extend_from_slice(literal);
        } else {
            return Err(PackError::InvalidDelta("reserved instruction 0".to_string()));
        }
    }

    if out.len() != target_size {
        return Err(PackError::InvalidDelta(format!(
            "delta produced {} bytes, header declares {}",
            out.len(),
            target_size
        )));
    }
    Ok(out)
}

fn truncated() -> PackError {
    PackError::InvalidDelta("truncated instruction".to_string())
}

fn overrun(target_size: usize) -> PackError {
    PackError::InvalidDelta(format!("delta writes past target size {target_size}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_and_insert() {
        let base = b"hello world";
        // base 11, target 12, copy 0..6, insert "there!"
        let delta = [11, 12, 0x90, 6, 6, b't', b'h', b'e', b'r', b'e', b'!'];
        assert_eq!(patch_delta(base, &delta).unwrap(), b"hello there!");
    }

    #[test]
    fn test_copy_with_offset() {
        let base = b"abcdefgh";
        let delta = [8, 3, 0x91, 5, 3];
        assert_eq!(patch_delta(base, &delta).unwrap(), b"fgh");
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(delta_header_sizes(&[0xac, 0x02, 5]).unwrap(), (300, 5));
        assert!(delta_header_sizes(&[0x80]).is_err());
    }

    #[test]
    fn test_empty_target() {
        assert_eq!(patch_delta(b"", &[0, 0]).unwrap(), b"");
    }

    #[test]
    fn test_base_size_mismatch() {
        let delta = [5, 1, 1, b'x'];
        assert!(matches!(
            patch_delta(b"abc", &delta),
            Err(PackError::InvalidDelta(_))
        ));
    }

    #[test]
    fn test_copy_out_of_bounds() {
        let delta = [3, 4, 0x90, 4];
        assert!(patch_delta(b"abc", &delta).is_err());
    }

    #[test]
    fn test_target_size_mismatch() {
        let delta = [3, 5, 0x90, 3];
        assert!(patch_delta(b"abc", &delta).is_err());
    }

    #[test]
    fn test_insert_past_target() {
        let delta = [0, 1, 2, b'a', b'b'];
        assert!(patch_delta(b"", &delta).is_err());
    }

    #[test]
    fn test_truncated_insert() {
        let delta = [0, 5, 5, b'a'];
        assert!(patch_delta(b"", &delta).is_err());
    }

    #[test]
    fn test_zero_opcode() {
        let delta = [0, 0, 0];
        assert!(patch_delta(b"", &delta).is_err());
    }
}
