use crate::models::{Frame, MrzBox};
use image::imageops::{self, FilterType};
use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerParams {
    pub working_width: u32,
    /// Vertical search window as fractions of frame height.
    pub search_top: f32,
    pub search_bottom: f32,
    pub row_smooth_window: usize,
    pub row_threshold: f32,
    pub expand_px: u32,
    pub min_height_ratio: f32,
    pub max_height_ratio: f32,
    pub column_smooth_window: usize,
    pub column_threshold: f32,
    pub min_width_ratio: f32,
    pub min_aspect: f32,
    pub min_bottom_ratio: f32,
}

impl Default for LocalizerParams {
    fn default() -> Self {
        LocalizerParams {
            working_width: 320,
            search_top: 0.40,
            search_bottom: 0.98,
            row_smooth_window: 5,
            row_threshold: 0.55,
            expand_px: 2,
            min_height_ratio: 0.10,
            max_height_ratio: 0.45,
            column_smooth_window: 9,
            column_threshold: 0.15,
            min_width_ratio: 0.60,
            min_aspect: 3.0,
            min_bottom_ratio: 0.55,
        }
    }
}

/// Model-free MRZ band detector based on horizontal edge energy.
pub struct BandLocalizer {
    params: LocalizerParams,
}

impl BandLocalizer {
    pub fn new(params: LocalizerParams) -> Self {
        BandLocalizer { params }
    }

    pub fn params(&self) -> &LocalizerParams {
        &self.params
    }

    pub fn locate(&self, frame: &Frame) -> Option<MrzBox> {
        self.locate_image(&frame.to_gray_image())
    }

    /// Returns the band in `image` coordinates, or `None` when nothing MRZ-like is found.
    pub fn locate_image(&self, image: &GrayImage) -> Option<MrzBox> {
        let p = &self.params;
        let (orig_w, orig_h) = image.dimensions();
        if orig_w < 4 || orig_h < 4 {
            return None;
        }

        let scale = if orig_w > p.working_width && p.working_width > 0 {
            p.working_width as f32 / orig_w as f32
        } else {
            1.0
        };
        let work = if scale < 1.0 {
            let h = ((orig_h as f32 * scale).round() as u32).max(4);
            imageops::resize(image, p.working_width, h, FilterType::Triangle)
        } else {
            image.clone()
        };
        let (w, h) = work.dimensions();
        let pixels = work.as_raw();
        let (w_us, h_us) = (w as usize, h as usize);

        let y0 = ((h as f32 * p.search_top).floor() as usize).min(h_us - 1);
        let y1 = ((h as f32 * p.search_bottom).ceil() as usize).clamp(y0 + 1, h_us);

        let row_energy: Vec<f64> = (y0..y1)
            .map(|y| {
                let row = &pixels[y * w_us..(y + 1) * w_us];
                row.windows(2)
                    .map(|px| (px[1] as i32 - px[0] as i32).unsigned_abs() as f64)
                    .sum()
            })
            .collect();
        let smoothed = moving_average(&row_energy, p.row_smooth_window);
        let peak = smoothed.iter().cloned().fold(0.0, f64::max);
        if peak <= 0.0 {
            debug!("localizer: no edge energy in search window");
            return None;
        }

        let threshold = peak * p.row_threshold as f64;
        let (run_start, run_end) = best_run(&smoothed, threshold)?;
        let top = (y0 + run_start).saturating_sub(p.expand_px as usize);
        let bottom = (y0 + run_end + 1 + p.expand_px as usize).min(h_us);
        let band_h = (bottom - top) as f32;

        let height_ratio = band_h / h as f32;
        if height_ratio < p.min_height_ratio || height_ratio > p.max_height_ratio {
            debug!("localizer: band height ratio {:.3} out of range", height_ratio);
            return None;
        }

        let mut col_energy = vec![0f64; w_us.saturating_sub(1)];
        for y in top..bottom {
            let row = &pixels[y * w_us..(y + 1) * w_us];
            for (x, px) in row.windows(2).enumerate() {
                col_energy[x] += (px[1] as i32 - px[0] as i32).unsigned_abs() as f64;
            }
        }
        let col_smoothed = moving_average(&col_energy, p.column_smooth_window);
        let col_peak = col_smoothed.iter().cloned().fold(0.0, f64::max);
        if col_peak <= 0.0 {
            return None;
        }
        let col_threshold = col_peak * p.column_threshold as f64;
        let first = col_smoothed.iter().position(|v| *v > col_threshold)?;
        let last = col_smoothed.iter().rposition(|v| *v > col_threshold)?;
        let left = first.saturating_sub(p.expand_px as usize);
        let right = (last + 2 + p.expand_px as usize).min(w_us);
        let band_w = (right - left) as f32;

        let width_ratio = band_w / w as f32;
        if width_ratio < p.min_width_ratio {
            debug!("localizer: band width ratio {:.3} too small", width_ratio);
            return None;
        }
        if band_w / band_h < p.min_aspect {
            debug!("localizer: band aspect {:.2} too square", band_w / band_h);
            return None;
        }
        if (bottom as f32) / (h as f32) < p.min_bottom_ratio {
            debug!("localizer: band ends too high in the frame");
            return None;
        }

        let inv = 1.0 / scale;
        let mapped = MrzBox {
            left: left as f32 * inv,
            top: top as f32 * inv,
            right: right as f32 * inv,
            bottom: bottom as f32 * inv,
        };
        Some(mapped.clamp_to(orig_w, orig_h))
    }
}

impl Default for BandLocalizer {
    fn default() -> Self {
        BandLocalizer::new(LocalizerParams::default())
    }
}

/// Centred moving average, zero-padded at the edges.
fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let half = window.max(1) / 2;
    let n = values.len();
    let mut prefix = vec![0f64; n + 1];
    for (i, v) in values.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            (prefix[hi] - prefix[lo]) / window.max(1) as f64
        })
        .collect()
}

/// Inclusive bounds of the above-threshold run with the largest summed energy.
fn best_run(values: &[f64], threshold: f64) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    let mut start: Option<usize> = None;
    let mut acc = 0f64;
    for (i, v) in values.iter().enumerate() {
        if *v > threshold {
            if start.is_none() {
                start = Some(i);
                acc = 0.0;
            }
            acc += v;
        }
        let run_ends = *v <= threshold || i + 1 == values.len();
        if run_ends {
            if let Some(s) = start.take() {
                let end = if *v > threshold { i } else { i - 1 };
                if best.map_or(true, |(_, _, e)| acc > e) {
                    best = Some((s, end, acc));
                }
            }
        }
    }
    best.map(|(s, e, _)| (s, e))
}
