use crate::models::error::{BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Gzip `data` at `level` (0-9). Output carries no timestamp, so equal
/// input and level give equal bytes.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        Compression::new(level.min(9)),
    );
    encoder.write_all(data).map_err(BackupError::Compression)?;
    encoder.finish().map_err(BackupError::Compression)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(BackupError::Compression)?;
    Ok(out)
}

/// Compressed size over original size, 0.0 for empty input
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        compressed as f64 / original as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compressible_input_shrinks() {
        let data = b"INSERT INTO t VALUES (1);\n".repeat(1000);
        let compressed = compress(&data, 6).unwrap();
        assert!(compressed.len() < data.len() / 10);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_output_is_deterministic() {
        let data = b"same bytes every time".repeat(50);
        assert_eq!(compress(&data, 9).unwrap(), compress(&data, 9).unwrap());
    }

    #[test]
    fn test_corrupt_input_is_compression_error() {
        let mut compressed = compress(b"some data worth keeping", 6).unwrap();
        let mid = compressed.len() / 2;
        compressed.truncate(mid);
        let err = decompress(&compressed).unwrap_err();
        assert_eq!(err.kind(), "compression");

        let err = decompress(b"definitely not gzip").unwrap_err();
        assert_eq!(err.kind(), "compression");
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(0, 20), 0.0);
        assert_eq!(compression_ratio(100, 25), 0.25);
    }

    proptest! {
        #[test]
        fn prop_decompress_inverts_compress(data in proptest::collection::vec(any::<u8>(), 0..4096), level in 0u32..=9) {
            let compressed = compress(&data, level).unwrap();
            prop_assert_eq!(decompress(&compressed).unwrap(), data);
        }
    }
}
