//! Client-side upload fingerprints.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Derives the resumption key for a file: a SHA-256 over its absolute path
/// and declared size.
///
/// The key only has to identify "the same upload of this file" across runs;
/// whether the server still recognizes the stored URL is what actually
/// decides resumption, so no content digest is mixed in.
pub fn fingerprint(path: &Path, size: u64) -> String {
    let absolute = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());

    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(size.to_le_bytes());

    hex::encode(hasher.finalize())
}
