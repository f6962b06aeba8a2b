//! Property-based tests for the chunk codec and the archive container
//!
//! These tests use randomized inputs to verify round trips and integrity
//! checks across a wide range of data patterns.

use hpi::archive::tree::DirNode;
use hpi::paths::sanitize_name;
use hpi::{compress_chunk, decompress_chunk, CompressionFlavor, HpiError, CHUNK_SIZE};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_decompression_never_panics(data in prop::collection::vec(any::<u8>(), 0..200)) {
        // Random bytes are not a valid chunk, but must only produce errors
        let _ = decompress_chunk(&data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_deflate_round_trip(data in prop::collection::vec(any::<u8>(), 0..4000)) {
        let framed = compress_chunk(&data, CompressionFlavor::Deflate).unwrap();
        prop_assert_eq!(decompress_chunk(&framed).unwrap(), data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_zopfli_round_trip(
        pattern in prop::collection::vec(any::<u8>(), 1..40),
        repeat_count in 1..120usize,
        noise in prop::collection::vec(any::<u8>(), 0..300),
    ) {
        let mut data = Vec::new();
        for _ in 0..repeat_count {
            data.extend_from_slice(&pattern);
        }
        data.extend_from_slice(&noise);

        let flavor = CompressionFlavor::Zopfli { iterations: 2 };
        let framed = compress_chunk(&data, flavor).unwrap();
        prop_assert_eq!(decompress_chunk(&framed).unwrap(), data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_single_byte_flip_detected(
        data in prop::collection::vec(any::<u8>(), 1..2000),
        at in any::<prop::sample::Index>(),
        flip in 1..=255u8,
    ) {
        let mut framed = compress_chunk(&data, CompressionFlavor::Deflate).unwrap();
        let payload = 19..framed.len();
        let i = payload.start + at.index(payload.len());
        framed[i] ^= flip;
        let is_checksum_error = matches!(
            decompress_chunk(&framed),
            Err(HpiError::ChecksumMismatch { .. })
        );
        prop_assert!(is_checksum_error);
    }
}

proptest! {
    #[test]
    fn test_sanitized_names_are_safe(name in ".{0,40}") {
        let clean = sanitize_name(&name);
        prop_assert_eq!(clean.chars().count(), name.chars().count());
        prop_assert!(!clean.chars().any(|c| c.is_control() || "<>\"/\\|?*:".contains(c)));
    }
}

proptest! {
    #[test]
    fn test_directory_size_prediction(
        paths in prop::collection::btree_set("[a-z]{1,3}(/[a-z]{1,3}){0,3}\\.[a-z]{1,3}", 0..40)
    ) {
        // file names carry an extension and directories never do, so no conflicts
        let tree = DirNode::from_paths(paths.iter().map(String::as_str)).unwrap();
        let mut out = Vec::new();
        tree.serialize(20, &mut out, &|_| Ok([0u8; 9])).unwrap();
        prop_assert_eq!(out.len(), tree.serialized_size());
    }
}

#[test]
fn test_chunked_file_reassembles() {
    // three full chunks and a partial one, compressed independently
    let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 1234)
        .map(|i| ((i * 31) ^ (i >> 9)) as u8)
        .collect();
    let mut rebuilt = Vec::new();
    for piece in data.chunks(CHUNK_SIZE) {
        let framed = compress_chunk(piece, CompressionFlavor::Deflate).unwrap();
        rebuilt.extend(decompress_chunk(&framed).unwrap());
    }
    assert_eq!(rebuilt, data);
}
