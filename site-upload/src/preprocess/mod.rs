//! Image preprocessing: shrink large photos before their first attempt.
//!
//! Only `image/*` payloads of at least [`MIN_COMPRESS_BYTES`] are touched.
//! The result is accepted only when strictly smaller than the input; any
//! codec failure falls back to the original bytes.

pub mod codec;

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{CompressionError, DeviceProfile};

pub use codec::{DecodedImage, EncodedImage, ImageCodec, RasterCodec};

/// Smaller images are uploaded as-is
pub const MIN_COMPRESS_BYTES: u64 = 500 * 1024;

/// JPEG quality used for re-encoding
pub const JPEG_QUALITY: u8 = 80;

/// Payload after preprocessing
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub bytes: Bytes,
    pub mime_type: String,
    pub compressed: bool,
}

impl Preprocessed {
    fn unchanged(bytes: Bytes, mime_type: &str) -> Self {
        Self {
            bytes,
            mime_type: mime_type.to_string(),
            compressed: false,
        }
    }
}

/// Whether a payload is a candidate for compression at all
pub fn is_eligible(mime_type: &str, size_bytes: u64) -> bool {
    mime_type.to_ascii_lowercase().starts_with("image/") && size_bytes >= MIN_COMPRESS_BYTES
}

/// Scale factor for an image of `width` x `height` weighing `size_bytes`.
///
/// Starts from the factor that fits the longest edge into `max_dimension`.
/// If the size projected from that factor still exceeds `target_bytes` and
/// the factor is above 0.5, it is shrunk further by `sqrt(target / size)`.
/// A result of 1.0 or more means "leave it alone".
pub fn scale_ratio(width: u32, height: u32, size_bytes: u64, max_dimension: u32, target_bytes: u64) -> f64 {
    if width == 0 || height == 0 || size_bytes == 0 {
        return 1.0;
    }

    let max = f64::from(max_dimension);
    let mut ratio = f64::min(max / f64::from(width), max / f64::from(height));

    let size = size_bytes as f64;
    let target = target_bytes as f64;
    let projected = size * ratio.min(1.0).powi(2);
    if projected > target && ratio > 0.5 {
        ratio *= (target / size).sqrt();
    }

    ratio
}

/// Output dimensions for `ratio`, never below 1px
pub fn scaled_dimensions(width: u32, height: u32, ratio: f64) -> (u32, u32) {
    let scale = |edge: u32| ((f64::from(edge) * ratio).round() as u32).max(1);
    (scale(width), scale(height))
}

/// Shrinks image payloads on the blocking pool
#[derive(Clone)]
pub struct Preprocessor {
    codec: Option<Arc<dyn ImageCodec>>,
    max_dimension: u32,
    target_bytes: u64,
}

impl std::fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessor")
            .field("enabled", &self.codec.is_some())
            .field("max_dimension", &self.max_dimension)
            .field("target_bytes", &self.target_bytes)
            .finish()
    }
}

impl Preprocessor {
    pub fn new(codec: Arc<dyn ImageCodec>, device: &DeviceProfile) -> Self {
        Self {
            codec: Some(codec),
            max_dimension: device.max_image_dimension,
            target_bytes: device.target_image_bytes,
        }
    }

    /// Pass every payload through untouched
    pub fn disabled() -> Self {
        Self {
            codec: None,
            max_dimension: 0,
            target_bytes: 0,
        }
    }

    /// True when [`process`](Self::process) would try to compress
    pub fn applies_to(&self, mime_type: &str, size_bytes: u64) -> bool {
        self.codec.is_some() && is_eligible(mime_type, size_bytes)
    }

    /// Compress `bytes` if it pays off; never fails
    pub async fn process(&self, mime_type: &str, bytes: Bytes) -> Preprocessed {
        let Some(codec) = self.codec.clone() else {
            return Preprocessed::unchanged(bytes, mime_type);
        };
        if !is_eligible(mime_type, bytes.len() as u64) {
            return Preprocessed::unchanged(bytes, mime_type);
        }

        let input = bytes.clone();
        let max_dimension = self.max_dimension;
        let target_bytes = self.target_bytes;
        let result = tokio::task::spawn_blocking(move || {
            compress(codec.as_ref(), &input, max_dimension, target_bytes)
        })
        .await
        .unwrap_or_else(|e| Err(CompressionError::Task(e.to_string())));

        match result {
            Ok(Some(encoded)) => {
                debug!(
                    "Compressed image from {} to {} bytes",
                    bytes.len(),
                    encoded.bytes.len()
                );
                Preprocessed {
                    bytes: Bytes::from(encoded.bytes),
                    mime_type: encoded.mime_type,
                    compressed: true,
                }
            }
            Ok(None) => Preprocessed::unchanged(bytes, mime_type),
            Err(e) => {
                warn!("Image compression failed, uploading original: {}", e);
                Preprocessed::unchanged(bytes, mime_type)
            }
        }
    }
}

fn compress(
    codec: &dyn ImageCodec,
    bytes: &[u8],
    max_dimension: u32,
    target_bytes: u64,
) -> Result<Option<EncodedImage>, CompressionError> {
    let image = codec.decode(bytes)?;
    let ratio = scale_ratio(image.width, image.height, bytes.len() as u64, max_dimension, target_bytes);
    if ratio >= 1.0 {
        return Ok(None);
    }

    let (width, height) = scaled_dimensions(image.width, image.height, ratio);
    let encoded = codec.encode(image, width, height, JPEG_QUALITY)?;

    if encoded.bytes.len() < bytes.len() {
        Ok(Some(encoded))
    } else {
        Ok(None)
    }
}
