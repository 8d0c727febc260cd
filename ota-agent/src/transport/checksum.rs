//! SHA-256 digests for downloaded artifacts.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{error, info};

use crate::utils::errors::{OtaError, Result};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a byte slice.
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Case-insensitive comparison of a digest against the declared checksum.
pub fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

/// Verify `path` against `expected`. A mismatch is an integrity failure.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    if !path.exists() {
        return Err(OtaError::Integrity(format!(
            "file not found for verification: {}",
            path.display()
        )));
    }

    let actual = file_digest(path)?;
    if digest_matches(&actual, expected) {
        info!("Checksum verified for {}", path.display());
        Ok(())
    } else {
        error!(
            "Checksum mismatch for {}: expected {}, actual {}",
            path.display(),
            expected,
            actual
        );
        Err(OtaError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_digest_bytes() {
        assert_eq!(digest_bytes(b"hello world"), HELLO_SHA256);
    }

    #[test]
    fn test_verify_file_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("payload.bin");
        std::fs::write(&path, b"hello world").unwrap();

        assert!(verify_file(&path, &HELLO_SHA256.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_file_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("payload.bin");
        std::fs::write(&path, b"hello world!").unwrap();

        match verify_file(&path, HELLO_SHA256) {
            Err(OtaError::ChecksumMismatch { expected, .. }) => assert_eq!(expected, HELLO_SHA256),
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_missing_file() {
        let result = verify_file(Path::new("/nonexistent/payload.bin"), HELLO_SHA256);
        assert!(matches!(result, Err(OtaError::Integrity(_))));
    }

    #[test]
    fn test_large_file_spans_buffers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("large.bin");
        let data = vec![0xABu8; BUFFER_SIZE * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        assert_eq!(file_digest(&path).unwrap(), digest_bytes(&data));
    }

    proptest! {
        #[test]
        fn prop_single_bit_flip_fails_verification(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let expected = digest_bytes(&data);
            prop_assert!(digest_matches(&digest_bytes(&data), &expected));

            let mut corrupted = data.clone();
            let i = index.index(corrupted.len());
            corrupted[i] ^= 1 << bit;
            prop_assert!(!digest_matches(&digest_bytes(&corrupted), &expected));
        }
    }
}
