//! Image normalization and output finalization.
//!
//! Normalization is best-effort by contract: anything that fails to decode
//! or re-encode passes through unchanged, because the cache key and the
//! remote call only need *stable* bytes, not necessarily smaller ones.
//! Finalization persists the remote model's raw output under a unique name
//! and applies a sharpening pass; it signals failure with `None` and never
//! propagates an error to the invoker.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use rand::RngCore;

/// Largest dimension an image is allowed to keep after normalization.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Post-processing sharpness factor applied to finalized outputs.
/// 1.0 leaves the image untouched; 2.0 doubles edge contrast.
pub const SHARPNESS_FACTOR: f32 = 2.0;

/// Prefix for finalized output filenames.
const OUTPUT_PREFIX: &str = "face_swap_";

/// Downscale an image to fit within `max_dim` and re-encode it as PNG.
///
/// Aspect ratio is preserved and images already within bounds are not
/// upscaled, but every decodable input is re-encoded so that the same
/// pixels always hash to the same fingerprint regardless of the container
/// format they arrived in. On any decode or encode failure the original
/// bytes are returned unchanged.
pub fn normalize(bytes: &[u8], max_dim: u32) -> Vec<u8> {
    match try_normalize(bytes, max_dim) {
        Some(normalized) => normalized,
        None => {
            tracing::debug!(len = bytes.len(), "normalization failed, passing bytes through");
            bytes.to_vec()
        }
    }
}

fn try_normalize(bytes: &[u8], max_dim: u32) -> Option<Vec<u8>> {
    let img = image::load_from_memory(bytes).ok()?;

    let img = if img.width() > max_dim || img.height() > max_dim {
        img.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).ok()?;
    Some(buf)
}

/// Persist a raw model output into `output_dir` and sharpen it in place.
///
/// The image is force-converted to 3-channel RGB and saved as PNG under a
/// fresh `face_swap_<128-bit-hex>.png` name. Returns `None` if the
/// directory cannot be created or the image cannot be read or written;
/// a failed sharpening pass leaves the unsharpened file standing.
pub fn finalize_output(result_path: &Path, output_dir: &Path) -> Option<PathBuf> {
    std::fs::create_dir_all(output_dir).ok()?;

    let img = image::open(result_path).ok()?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let output_path = output_dir.join(format!("{}{}.png", OUTPUT_PREFIX, random_token()));
    rgb.save_with_format(&output_path, ImageFormat::Png).ok()?;

    sharpen_in_place(&output_path);
    Some(output_path)
}

/// Sharpen a saved image in place, overwriting the same file.
///
/// Best-effort: a failure here is logged and swallowed, leaving the
/// unsharpened image as the result.
pub fn sharpen_in_place(path: &Path) {
    let Ok(img) = image::open(path) else {
        tracing::warn!(path = %path.display(), "could not reopen output for sharpening");
        return;
    };

    let sharpened = img.filter3x3(&sharpen_kernel(SHARPNESS_FACTOR));
    if sharpened.save_with_format(path, ImageFormat::Png).is_err() {
        tracing::warn!(path = %path.display(), "could not save sharpened output");
    }
}

/// 3x3 unsharp kernel for the given sharpness factor.
///
/// Factor 1.0 is the identity kernel; each unit above adds one full
/// strength of the classic `[-1, 5, -1]` cross sharpen.
fn sharpen_kernel(factor: f32) -> [f32; 9] {
    let s = factor - 1.0;
    [
        0.0, -s, 0.0, //
        -s,
        1.0 + 4.0 * s,
        -s, //
        0.0, -s, 0.0,
    ]
}

/// Random 128-bit hex token for output and staging filenames.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
