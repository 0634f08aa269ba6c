//! Super-resolution transform.

use std::io::Cursor;
use std::sync::Arc;

use image::ImageFormat;
use tracing::debug;
use upscale_job_queue::{Transform, TransformError};

use crate::model::SharedScaler;

/// Upscales encoded images by the shared model's factor and re-encodes as PNG.
#[derive(Debug, Clone)]
pub struct Upscaler {
    scaler: Arc<SharedScaler>,
}

impl Upscaler {
    pub fn new(scaler: Arc<SharedScaler>) -> Self {
        Self { scaler }
    }

    pub fn scaler(&self) -> &Arc<SharedScaler> {
        &self.scaler
    }
}

impl Transform for Upscaler {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let model = self
            .scaler
            .get_or_load()
            .map_err(|e| TransformError::new(format!("model unavailable: {e}")))?;

        let img = image::load_from_memory(input)
            .map_err(|e| TransformError::new(format!("failed to decode image: {e}")))?;
        let (width, height) = (img.width(), img.height());
        let (target_w, target_h) = width
            .checked_mul(model.scale)
            .zip(height.checked_mul(model.scale))
            .ok_or_else(|| {
                TransformError::new(format!("image too large to upscale: {width}x{height}"))
            })?;

        let upscaled = img.resize_exact(target_w, target_h, model.filter.into());
        let mut buf: Vec<u8> = Vec::new();
        upscaled
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| TransformError::new(format!("failed to encode upscaled image: {e}")))?;

        debug!(width, height, target_w, target_h, "image upscaled");
        Ok(buf)
    }
}

/// Returns its input unchanged. Used when the service runs in fake mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTransform;

impl Transform for PassthroughTransform {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        Ok(input.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn encode(img: image::DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format)
            .expect("encode image");
        buf
    }

    fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> image::DynamicImage {
        let mut img = image::RgbaImage::new(width, height);
        for px in img.pixels_mut() {
            *px = image::Rgba(rgba);
        }
        image::DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn doubles_dimensions_and_outputs_png() {
        let upscaler = Upscaler::new(Arc::new(SharedScaler::new(None)));
        let input = encode(solid_rgba(16, 16, [255, 0, 0, 255]), ImageFormat::Png);

        let output = upscaler.transform(&input).unwrap();

        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
        let [r, g, b, a] = decoded.to_rgba8().get_pixel(10, 10).0;
        assert!(r >= 250 && g <= 5 && b <= 5 && a >= 250);
    }

    #[test]
    fn accepts_jpeg_input() {
        let upscaler = Upscaler::new(Arc::new(SharedScaler::new(None)));
        let rgb = image::DynamicImage::ImageRgb8(solid_rgba(10, 6, [0, 128, 255, 255]).to_rgb8());
        let input = encode(rgb, ImageFormat::Jpeg);

        let output = upscaler.transform(&input).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 12));
    }

    #[test]
    fn undecodable_input_fails_without_poisoning_model() {
        let upscaler = Upscaler::new(Arc::new(SharedScaler::new(None)));

        let err = upscaler.transform(b"definitely not an image").unwrap_err();
        assert!(err.message().starts_with("failed to decode image"));

        let input = encode(solid_rgba(4, 4, [1, 2, 3, 255]), ImageFormat::Png);
        assert!(upscaler.transform(&input).is_ok());
        assert_eq!(upscaler.scaler().load_attempts(), 1);
    }

    #[test]
    fn missing_model_reports_unavailable() {
        let scaler = SharedScaler::new(Some(PathBuf::from("/nonexistent/scaler.json")));
        let upscaler = Upscaler::new(Arc::new(scaler));
        let input = encode(solid_rgba(2, 2, [0, 0, 0, 255]), ImageFormat::Png);

        let err = upscaler.transform(&input).unwrap_err();
        assert!(err.message().starts_with("model unavailable"));
    }

    #[test]
    fn passthrough_is_identity() {
        let input = b"\x89PNG\r\n\x1a\nrest".to_vec();
        assert_eq!(PassthroughTransform.transform(&input).unwrap(), input);
    }
}
