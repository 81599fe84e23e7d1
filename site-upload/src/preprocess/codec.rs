//! Raster decode/encode behind a small trait so the preprocessor can be
//! driven by a fake in tests.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use crate::CompressionError;

/// Decoded RGBA8 pixels
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self { width, height, rgba }
    }
}

/// Re-encoded output
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Image backend used by [`Preprocessor`](super::Preprocessor).
///
/// Both calls are CPU-bound and run on the blocking pool.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, CompressionError>;

    /// Resize to exactly `width` x `height` and encode at `quality` (1-100)
    fn encode(
        &self,
        image: DecodedImage,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<EncodedImage, CompressionError>;
}

/// `image`-crate backend: Lanczos3 resize, baseline JPEG output
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, CompressionError> {
        let img = image::load_from_memory(bytes).map_err(|e| CompressionError::Decode(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage::new(width, height, rgba.into_raw()))
    }

    fn encode(
        &self,
        image: DecodedImage,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<EncodedImage, CompressionError> {
        let buffer = RgbaImage::from_raw(image.width, image.height, image.rgba).ok_or_else(|| {
            CompressionError::Encode("pixel buffer does not match image dimensions".to_string())
        })?;

        // JPEG has no alpha channel
        let resized = DynamicImage::ImageRgba8(buffer)
            .resize_exact(width, height, FilterType::Lanczos3)
            .to_rgb8();

        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
        encoder
            .encode_image(&resized)
            .map_err(|e| CompressionError::Encode(e.to_string()))?;

        Ok(EncodedImage {
            bytes,
            mime_type: "image/jpeg".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn decode_reports_dimensions() {
        let decoded = RasterCodec.decode(&png(40, 30)).unwrap();
        assert_eq!((decoded.width, decoded.height), (40, 30));
        assert_eq!(decoded.rgba.len(), 40 * 30 * 4);
    }

    #[test]
    fn encode_resizes_to_jpeg() {
        let decoded = RasterCodec.decode(&png(40, 30)).unwrap();
        let encoded = RasterCodec.encode(decoded, 20, 15, 80).unwrap();
        assert_eq!(encoded.mime_type, "image/jpeg");

        let reloaded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (20, 15));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = RasterCodec.decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, CompressionError::Decode(_)));
    }

    #[test]
    fn mismatched_buffer_is_an_encode_error() {
        let bogus = DecodedImage::new(10, 10, vec![0; 12]);
        let err = RasterCodec.encode(bogus, 5, 5, 80).unwrap_err();
        assert!(matches!(err, CompressionError::Encode(_)));
    }
}
