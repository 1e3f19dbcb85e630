//! SHA-256 helpers for staged and uploaded files

use crate::error::{Result, SynthflowError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of everything readable from `reader`
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex-encoded SHA-256 of a file on disk
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}

/// Fail with [`SynthflowError::ChecksumMismatch`] unless the file hashes to `expected`
pub fn verify_sha256_file(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let path = path.as_ref();
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(SynthflowError::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_bytes() {
        assert_eq!(sha256_bytes(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_sha256_reader_matches_bytes() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        assert_eq!(sha256_reader(&mut cursor).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_verify_sha256_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert!(verify_sha256_file(file.path(), HELLO_WORLD).is_ok());
        assert!(verify_sha256_file(file.path(), &HELLO_WORLD.to_uppercase()).is_ok());

        let err = verify_sha256_file(file.path(), "deadbeef").unwrap_err();
        assert!(matches!(err, SynthflowError::ChecksumMismatch { .. }));
    }
}
