//! Computing git deltas.

use super::format::write_delta_size;
use similar::{capture_diff_slices_deadline, Algorithm, DiffTag};
use std::time::{Duration, Instant};

/// Longest span a single copy instruction emits.
const MAX_COPY_SIZE: usize = 0xFFFF;

/// Longest literal a single insert instruction carries.
const MAX_INSERT_SIZE: usize = 0x7F;

/// Matching runs shorter than this are cheaper to insert than to copy.
const MIN_COPY_SIZE: usize = 4;

/// Diffing gives up refining after this long and falls back to coarser hunks.
const DIFF_DEADLINE: Duration = Duration::from_secs(1);

/// Produces a delta that turns `base` into `target`.
///
/// `patch_delta(base, &diff_delta(base, target))` always yields `target`.
pub fn diff_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_delta_size(&mut out, base.len() as u64);
    write_delta_size(&mut out, target.len() as u64);

    let ops = capture_diff_slices_deadline(
        Algorithm::Myers,
        base,
        target,
        Some(Instant::now() + DIFF_DEADLINE),
    );

    let mut literal: Vec<u8> = Vec::new();
    for op in ops {
        let (tag, old, new) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal if old.len() >= MIN_COPY_SIZE && old.start <= u32::MAX as usize => {
                flush_insert(&mut out, &mut literal);
                let mut offset = old.start;
                let mut remaining = old.len();
                while remaining > 0 {
                    let size = remaining.min(MAX_COPY_SIZE);
                    emit_copy(&mut out, offset, size);
                    offset += size;
                    remaining -= size;
                }
            }
            DiffTag::Delete => {}
            DiffTag::Equal | DiffTag::Insert | DiffTag::Replace => {
                literal.extend_from_slice(&target[new]);
            }
        }
    }
    flush_insert(&mut out, &mut literal);
    out
}

fn flush_insert(out: &mut Vec<u8>, literal: &mut Vec<u8>) {
    for chunk in literal.chunks(MAX_INSERT_SIZE) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    literal.clear();
}

fn emit_copy(out: &mut Vec<u8>, offset: usize, size: usize) {
    let at = out.len();
    let mut cmd = 0x80u8;
    out.push(0);
    for i in 0..4 {
        let byte = ((offset >> (8 * i)) & 0xFF) as u8;
        if byte != 0 {
            cmd |= 1 << i;
            out.push(byte);
        }
    }
    for i in 0..3 {
        let byte = ((size >> (8 * i)) & 0xFF) as u8;
        if byte != 0 {
            cmd |= 0x10 << i;
            out.push(byte);
        }
    }
    out[at] = cmd;
}

#[cfg(test)]
mod tests {
    use super::super::patch_delta;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identical_is_small() {
        let data = vec![7u8; 10_000];
        let delta = diff_delta(&data, &data);
        assert!(delta.len() < 32);
        assert_eq!(patch_delta(&data, &delta).unwrap(), data);
    }

    #[test]
    fn test_edit_in_the_middle() {
        let base: Vec<u8> = (0..4000u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut target = base.clone();
        target[8000..8010].copy_from_slice(b"0123456789");
        let delta = diff_delta(&base, &target);
        assert!(delta.len() < 256);
        assert_eq!(patch_delta(&base, &delta).unwrap(), target);
    }

    #[test]
    fn test_long_copies_are_split() {
        let base = vec![1u8; 200_000];
        let mut target = base.clone();
        target.push(2);
        assert_eq!(patch_delta(&base, &diff_delta(&base, &target)).unwrap(), target);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(patch_delta(b"", &diff_delta(b"", b"")).unwrap(), b"");
        assert_eq!(patch_delta(b"abc", &diff_delta(b"abc", b"")).unwrap(), b"");
        assert_eq!(patch_delta(b"", &diff_delta(b"", b"xyz")).unwrap(), b"xyz");
    }

    proptest! {
        #[test]
        fn prop_patch_inverts_diff(
            base in proptest::collection::vec(any::<u8>(), 0..2048),
            target in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let delta = diff_delta(&base, &target);
            prop_assert_eq!(patch_delta(&base, &delta).unwrap(), target);
        }

        #[test]
        fn prop_patch_inverts_diff_of_related_inputs(
            base in proptest::collection::vec(0u8..4, 0..4096),
            edits in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..16),
        ) {
            let mut target = base.clone();
            for (index, byte) in edits {
                if !target.is_empty() {
                    let i = index.index(target.len());
                    target[i] = byte;
                }
            }
            let delta = diff_delta(&base, &target);
            prop_assert_eq!(patch_delta(&base, &delta).unwrap(), target);
        }
    }
}
