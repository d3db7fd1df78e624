use crate::models::OcrOutput;
use crate::utils::EngineError;
use async_trait::async_trait;
use image::GrayImage;
use std::sync::Arc;

/// A text recogniser the router can call without knowing its implementation.
///
/// Implementations must be cheap to share across tasks; heavy work belongs in
/// `spawn_blocking` inside `recognize`.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(
        &self,
        image: Arc<GrayImage>,
        rotation_degrees: u32,
    ) -> Result<OcrOutput, EngineError>;
}

/// Rotates a grayscale image by a multiple of 90 degrees.
pub fn rotate_quadrant(image: &GrayImage, rotation_degrees: u32) -> GrayImage {
    match rotation_degrees % 360 {
        90 => image::imageops::rotate90(image),
        180 => image::imageops::rotate180(image),
        270 => image::imageops::rotate270(image),
        _ => image.clone(),
    }
}
