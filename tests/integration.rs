//! Integration tests for the faceswap-gateway library.
//!
//! Run with: cargo test --test integration

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbImage};

use faceswap_gateway::cache::ResultCache;
use faceswap_gateway::image_ops;
use faceswap_gateway::remote::{RetryPolicy, SwapError};
use faceswap_gateway::{content_hash, has_allowed_extension, is_valid_input_file};

fn encoded_test_image(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, seed])
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

// ---------------------------------------------------------------------------
// Result cache semantics
// ---------------------------------------------------------------------------

#[test]
fn test_repeat_request_hits_cache() {
    let cache = ResultCache::new(3600, 100);

    let source = image_ops::normalize(&encoded_test_image(64, 64, 1), 1024);
    let dest = image_ops::normalize(&encoded_test_image(64, 64, 2), 1024);
    let key = ResultCache::key(&content_hash(&source), &content_hash(&dest));

    assert!(cache.get(&key).is_none());
    cache.insert(key.clone(), "static/output/face_swap_one.png".to_string());

    // A second identical pair produces the same key and the cached path.
    let source_again = image_ops::normalize(&encoded_test_image(64, 64, 1), 1024);
    let dest_again = image_ops::normalize(&encoded_test_image(64, 64, 2), 1024);
    let key_again = ResultCache::key(&content_hash(&source_again), &content_hash(&dest_again));

    assert_eq!(key, key_again);
    assert_eq!(
        cache.get(&key_again).as_deref(),
        Some("static/output/face_swap_one.png")
    );
}

#[test]
fn test_cache_keys_are_order_sensitive() {
    let a = content_hash(b"image A");
    let b = content_hash(b"image B");
    assert_ne!(ResultCache::key(&a, &b), ResultCache::key(&b, &a));
}

#[test]
fn test_expired_entries_are_absent() {
    let cache = ResultCache::new(1, 100);
    cache.insert("k".to_string(), "v".to_string());
    assert!(cache.get("k").is_some());

    std::thread::sleep(Duration::from_millis(1200));
    assert!(cache.get("k").is_none());
}

#[test]
fn test_cache_respects_capacity_bound() {
    let cache = ResultCache::new(3600, 100);
    for i in 0..150 {
        cache.insert(format!("key-{}", i), format!("value-{}", i));
    }
    assert!(cache.synced_entry_count() <= 100);
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(2),
        multiplier: 2.0,
    }
}

#[tokio::test]
async fn test_second_attempt_success_is_transparent() {
    let calls = AtomicU32::new(0);
    let result: eyre::Result<&str> = fast_policy()
        .run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    eyre::bail!("connection reset")
                }
                Ok("swapped")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "swapped");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_third_attempt_success_is_transparent() {
    let calls = AtomicU32::new(0);
    let result: eyre::Result<&str> = fast_policy()
        .run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    eyre::bail!("connection reset")
                }
                Ok("swapped")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "swapped");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_the_error() {
    let calls = AtomicU32::new(0);
    let result: eyre::Result<()> = fast_policy()
        .run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { eyre::bail!("model offline") }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("model offline"));
    // The handler renders this as a 500 with "Error: <message>".
    assert_eq!(
        SwapError::Remote(err.to_string()).message(),
        "Error: model offline"
    );
}

// ---------------------------------------------------------------------------
// Upload validation
// ---------------------------------------------------------------------------

#[test]
fn test_disallowed_extension_rejected_regardless_of_content() {
    // A real PNG payload behind a .gif name is still rejected.
    assert!(!has_allowed_extension("animation.gif"));
    assert!(!has_allowed_extension("document.pdf"));
    assert!(has_allowed_extension("face.jpeg"));
}

#[test]
fn test_empty_filename_rejected() {
    assert!(!has_allowed_extension(""));
}

#[test]
fn test_input_file_validation_checks_existence_and_extension() {
    let dir = tempfile::tempdir().unwrap();

    let good = dir.path().join("face.png");
    std::fs::write(&good, encoded_test_image(8, 8, 0)).unwrap();
    assert!(is_valid_input_file(&good));

    let wrong_ext = dir.path().join("face.gif");
    std::fs::write(&wrong_ext, encoded_test_image(8, 8, 0)).unwrap();
    assert!(!is_valid_input_file(&wrong_ext));

    assert!(!is_valid_input_file(Path::new("/nonexistent/face.png")));
}

// ---------------------------------------------------------------------------
// Normalization and finalization
// ---------------------------------------------------------------------------

#[test]
fn test_corrupt_buffer_passes_through_unchanged() {
    let corrupt = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x42];
    assert_eq!(image_ops::normalize(&corrupt, 1024), corrupt);
}

#[test]
fn test_normalization_bounds_dimensions() {
    let oversized = encoded_test_image(2000, 1000, 7);
    let normalized = image_ops::normalize(&oversized, 1024);
    let img = image::load_from_memory(&normalized).unwrap();
    assert!(img.width() <= 1024 && img.height() <= 1024);
    assert_eq!(img.width(), 1024); // aspect-preserving shrink of the long edge
}

#[test]
fn test_normalization_stabilizes_cache_keys() {
    // The same pixels re-encoded twice must fingerprint identically.
    let bytes = encoded_test_image(400, 400, 9);
    let first = content_hash(&image_ops::normalize(&bytes, 256));
    let second = content_hash(&image_ops::normalize(&bytes, 256));
    assert_eq!(first, second);
}

#[test]
fn test_finalized_output_is_rgb_png_with_unique_name() {
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let raw = work.path().join("model_result.png");
    std::fs::write(&raw, encoded_test_image(40, 30, 3)).unwrap();

    let first = image_ops::finalize_output(&raw, out.path()).unwrap();
    let second = image_ops::finalize_output(&raw, out.path()).unwrap();

    assert_ne!(first, second); // fresh random token per finalization
    for path in [&first, &second] {
        assert!(path.exists());
        let img = image::open(path).unwrap();
        assert_eq!((img.width(), img.height()), (40, 30));
    }
}

#[test]
fn test_finalizer_failure_is_a_sentinel_not_a_panic() {
    let out = tempfile::tempdir().unwrap();
    let missing = Path::new("/nonexistent/model_result.png");
    assert!(image_ops::finalize_output(missing, out.path()).is_none());
}
