//! Streaming SHA-256 helpers.
//!
//! Both sides of the protocol hash the same way: the client hashes the file
//! before creating a session, the server re-hashes the staging file once the
//! final byte arrives.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Computes the lowercase-hex SHA-256 of everything `reader` yields.
pub async fn sha256_hex<R>(mut reader: R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Case-insensitive comparison of two hex digests.
pub fn matches(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_sha256_hex_known_vector() {
        let digest = sha256_hex(Cursor::new(b"hello")).await.unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_sha256_hex_empty() {
        let digest = sha256_hex(Cursor::new(b"")).await.unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_matches_ignores_case() {
        assert!(matches("ABCDEF", "abcdef"));
        assert!(!matches("abcdef", "abcde0"));
    }
}
