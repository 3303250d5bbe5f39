//! faceswap-gateway — HTTP gateway for a hosted face-swap inference model.
//!
//! Accepts two uploaded images, normalizes and fingerprints them, and either
//! serves a cached result or forwards the pair to the remote model with
//! bounded retry. Successful outputs are persisted under the output
//! directory, sharpened, and cached by content hash for an hour.
//!
//! The model itself is an external black box; this crate owns validation,
//! normalization, caching, retry, and output finalization only.

pub mod cache;
pub mod config;
pub mod image_ops;
pub mod metrics;
pub mod remote;
pub mod server;

use sha2::{Digest, Sha256};
use std::path::Path;

/// File extensions accepted for upload and for remote-call inputs.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Check whether a filename carries an allowed image extension.
///
/// Matching is case-insensitive and requires an actual `.ext` suffix;
/// a bare name with no dot is rejected.
pub fn has_allowed_extension(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Check that a local path exists and carries an allowed image extension.
///
/// Used by the remote invoker to fail fast before any network round-trip.
pub fn is_valid_input_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .map(has_allowed_extension)
        .unwrap_or(false)
}

/// SHA-256 fingerprint of a byte buffer, hex-encoded.
///
/// Computed over *normalized* image bytes so that trivially resized copies
/// of the same image map to the same cache key component.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
