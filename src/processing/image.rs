use crate::models::{MrzBox, OcrMetrics};
use crate::processing::frame_gate::laplacian_variance;
use crate::processing::presets::PreprocessParams;
use crate::utils::MrzError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::box_filter;

pub const DEFAULT_CONTRAST_FACTOR: f32 = 1.8;

/// Bitmap transforms that turn an MRZ crop into recognition input.
pub struct ImageProcessor;

impl ImageProcessor {
    pub fn grayscale(img: &DynamicImage) -> GrayImage {
        img.to_luma8()
    }

    pub fn crop(img: &GrayImage, region: &MrzBox) -> GrayImage {
        let (w, h) = img.dimensions();
        let (x, y, cw, ch) = region.to_crop_rect(w, h);
        imageops::crop_imm(img, x, y, cw, ch).to_image()
    }

    /// Linear stretch around mid-grey: `v * factor - 128 * (factor - 1)`.
    pub fn enhance_contrast(img: &GrayImage, factor: f32) -> GrayImage {
        let translate = -128.0 * (factor - 1.0);
        let mut enhanced = img.clone();
        for pixel in enhanced.pixels_mut() {
            let value = pixel[0] as f32 * factor + translate;
            pixel[0] = value.round().clamp(0.0, 255.0) as u8;
        }
        enhanced
    }

    pub fn blur(img: &GrayImage, radius: u32) -> GrayImage {
        if radius == 0 {
            return img.clone();
        }
        box_filter(img, radius, radius)
    }

    pub fn upscale(img: &GrayImage, scale: f32) -> GrayImage {
        let (w, h) = img.dimensions();
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        if nw == w && nh == h {
            return img.clone();
        }
        imageops::resize(img, nw, nh, FilterType::Triangle)
    }

    /// Local mean thresholding: dark (0) when below `mean - offset`, else white (255).
    pub fn adaptive_threshold(
        img: &GrayImage,
        block_size: u32,
        offset: i32,
    ) -> Result<GrayImage, MrzError> {
        if block_size < 3 || block_size % 2 == 0 {
            return Err(MrzError::invalid(format!(
                "block size must be odd and >= 3, got {}",
                block_size
            )));
        }
        let (w, h) = img.dimensions();
        let (wu, hu) = (w as usize, h as usize);
        let stride = wu + 1;
        let mut integral = vec![0u64; stride * (hu + 1)];
        for y in 0..hu {
            let mut row_sum = 0u64;
            for x in 0..wu {
                row_sum += img.get_pixel(x as u32, y as u32)[0] as u64;
                integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
            }
        }

        let half = (block_size / 2) as usize;
        let out = GrayImage::from_fn(w, h, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let x0 = x.saturating_sub(half);
            let y0 = y.saturating_sub(half);
            let x1 = (x + half + 1).min(wu);
            let y1 = (y + half + 1).min(hu);
            let area = ((x1 - x0) * (y1 - y0)) as f64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let mean = sum as f64 / area;
            let value = img.get_pixel(x as u32, y as u32)[0] as f64;
            if value < mean - offset as f64 {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        Ok(out)
    }

    /// Input for the general engine: contrast only.
    pub fn prepare_general(crop: &GrayImage, contrast_factor: f32) -> GrayImage {
        Self::enhance_contrast(crop, contrast_factor)
    }

    /// Input for the specialised engine: contrast, blur, upscale, binarise.
    pub fn prepare_specialized(
        crop: &GrayImage,
        params: &PreprocessParams,
        contrast_factor: f32,
    ) -> Result<GrayImage, MrzError> {
        params.validate()?;
        let enhanced = Self::enhance_contrast(crop, contrast_factor);
        let blurred = Self::blur(&enhanced, params.blur_radius);
        let scaled = Self::upscale(&blurred, params.scale);
        Self::adaptive_threshold(&scaled, params.block_size, params.offset)
    }

    /// Brightness, contrast, sharpness and noise residual of an image.
    pub fn metrics(img: &GrayImage) -> OcrMetrics {
        let (w, h) = img.dimensions();
        let pixels = img.as_raw();
        if pixels.is_empty() {
            return OcrMetrics::default();
        }
        let n = pixels.len() as f64;
        let mean = pixels.iter().map(|p| *p as f64).sum::<f64>() / n;
        let variance = pixels
            .iter()
            .map(|p| {
                let d = *p as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        let local = box_filter(img, 1, 1);
        let noise = pixels
            .iter()
            .zip(local.as_raw())
            .map(|(p, m)| (*p as f64 - *m as f64).abs())
            .sum::<f64>()
            / n;

        OcrMetrics {
            brightness: mean,
            contrast: variance.sqrt(),
            sharpness: laplacian_variance(pixels, w as usize, h as usize),
            noise,
        }
    }
}
