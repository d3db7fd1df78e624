use crate::models::{Frame, GateMetrics, GateResult, GateThresholds, MrzBox};
use crate::utils::MrzError;
use log::debug;

/// Top of the default sharpness/motion window, as a fraction of frame height.
const DEFAULT_ROI_TOP: f32 = 0.6;

/// Pixel rectangle `(x, y, width, height)` the sharpness and motion metrics cover.
type Window = (usize, usize, usize, usize);

/// Per-frame quality statistics and the pass/fail decision.
///
/// Brightness and contrast cover the whole frame. Sharpness and motion cover
/// the region hint, or the bottom 40 % of the frame where the MRZ usually sits.
pub struct FrameGate;

impl FrameGate {
    pub fn evaluate(frame: &Frame, thresholds: &GateThresholds) -> GateResult {
        Self::evaluate_in(frame, thresholds, None)
    }

    pub fn evaluate_in(frame: &Frame, thresholds: &GateThresholds, roi: Option<&MrzBox>) -> GateResult {
        let metrics = Self::metrics_unchecked(
            frame.luma(),
            frame.width() as usize,
            frame.height() as usize,
            frame.previous(),
            Self::window(frame.width(), frame.height(), roi),
        );
        let pass = Self::passes(&metrics, thresholds);
        if !pass {
            debug!("gate rejected frame at {} ms: {:?}", frame.timestamp_ms(), metrics);
        }
        GateResult { pass, metrics }
    }

    /// Metrics for a raw plane; errors if the buffer is smaller than declared.
    pub fn compute_metrics(
        luma: &[u8],
        width: u32,
        height: u32,
        previous: Option<&[u8]>,
        roi: Option<&MrzBox>,
    ) -> Result<GateMetrics, MrzError> {
        if width == 0 || height == 0 {
            return Err(MrzError::invalid("width/height must be positive"));
        }
        let n = width as usize * height as usize;
        if luma.len() < n {
            return Err(MrzError::invalid(format!(
                "luma plane has {} bytes, expected at least {}",
                luma.len(),
                n
            )));
        }
        Ok(Self::metrics_unchecked(
            luma,
            width as usize,
            height as usize,
            previous,
            Self::window(width, height, roi),
        ))
    }

    fn window(width: u32, height: u32, roi: Option<&MrzBox>) -> Window {
        match roi {
            Some(b) => {
                let (x, y, w, h) = b.to_crop_rect(width, height);
                (x as usize, y as usize, w as usize, h as usize)
            }
            None => {
                let top = (height as f32 * DEFAULT_ROI_TOP) as usize;
                (0, top, width as usize, height as usize - top)
            }
        }
    }

    pub fn passes(m: &GateMetrics, t: &GateThresholds) -> bool {
        m.brightness_mean >= t.min_brightness
            && m.brightness_mean <= t.max_brightness
            && m.contrast_std >= t.min_contrast
            && m.blur_variance_laplacian >= t.min_blur_variance
            && m.motion_mean_abs_diff <= t.max_motion
    }

    fn metrics_unchecked(
        luma: &[u8],
        w: usize,
        h: usize,
        previous: Option<&[u8]>,
        window: Window,
    ) -> GateMetrics {
        let n = w * h;
        let plane = &luma[..n];

        let mut sum = 0f64;
        let mut sum_sq = 0f64;
        for &p in plane {
            let v = p as f64;
            sum += v;
            sum_sq += v * v;
        }
        let mean = sum / n as f64;
        let variance = (sum_sq / n as f64 - mean * mean).max(0.0);

        GateMetrics {
            brightness_mean: mean as f32,
            contrast_std: variance.sqrt() as f32,
            blur_variance_laplacian: laplacian_variance_in(plane, w, h, window) as f32,
            motion_mean_abs_diff: match previous {
                Some(prev) if prev.len() >= n => mean_abs_diff(plane, &prev[..n], w, window) as f32,
                _ => 0.0,
            },
        }
    }
}

/// Variance of the 4-neighbour Laplacian over the interior, skipping a 1px border.
pub(crate) fn laplacian_variance(plane: &[u8], w: usize, h: usize) -> f64 {
    laplacian_variance_in(plane, w, h, (0, 0, w, h))
}

fn laplacian_variance_in(plane: &[u8], w: usize, h: usize, window: Window) -> f64 {
    if w < 3 || h < 3 {
        return 0.0;
    }
    let (wx, wy, ww, wh) = window;
    let (x0, y0) = (wx.max(1), wy.max(1));
    let (x1, y1) = ((wx + ww).min(w - 1), (wy + wh).min(h - 1));
    if x0 >= x1 || y0 >= y1 {
        return 0.0;
    }
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    let mut count = 0usize;
    for y in y0..y1 {
        let row = y * w;
        for x in x0..x1 {
            let i = row + x;
            let lap = plane[i - 1] as i32
                + plane[i + 1] as i32
                + plane[i - w] as i32
                + plane[i + w] as i32
                - 4 * plane[i] as i32;
            let v = lap as f64;
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }
    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

fn mean_abs_diff(a: &[u8], b: &[u8], w: usize, window: Window) -> f64 {
    let (x0, y0, ww, wh) = window;
    if ww == 0 || wh == 0 {
        return 0.0;
    }
    let mut total = 0u64;
    for y in y0..y0 + wh {
        let row = y * w;
        total += a[row + x0..row + x0 + ww]
            .iter()
            .zip(&b[row + x0..row + x0 + ww])
            .map(|(p, q)| (*p as i32 - *q as i32).unsigned_abs() as u64)
            .sum::<u64>();
    }
    total as f64 / (ww * wh) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: usize, h: usize) -> Vec<u8> {
        (0..w * h)
            .map(|i| if ((i % w) / 4 + (i / w) / 4) % 2 == 0 { 30 } else { 220 })
            .collect()
    }

    #[test]
    fn test_uniform_frame_has_no_contrast_or_sharpness() {
        let m = FrameGate::compute_metrics(&vec![120u8; 64 * 48], 64, 48, None, None).unwrap();
        assert_eq!(m.brightness_mean, 120.0);
        assert_eq!(m.contrast_std, 0.0);
        assert_eq!(m.blur_variance_laplacian, 0.0);
        assert_eq!(m.motion_mean_abs_diff, 0.0);
    }

    #[test]
    fn test_motion_increases_with_difference() {
        let base = vec![100u8; 32 * 32];
        let small: Vec<u8> = base.iter().map(|v| v + 5).collect();
        let large: Vec<u8> = base.iter().map(|v| v + 40).collect();
        let m_small = FrameGate::compute_metrics(&small, 32, 32, Some(base.as_slice()), None).unwrap();
        let m_large = FrameGate::compute_metrics(&large, 32, 32, Some(base.as_slice()), None).unwrap();
        assert_eq!(m_small.motion_mean_abs_diff, 5.0);
        assert!(m_large.motion_mean_abs_diff > m_small.motion_mean_abs_diff);
    }

    #[test]
    fn test_mismatched_previous_is_ignored() {
        let m = FrameGate::compute_metrics(&vec![10u8; 16], 4, 4, Some(&[0u8; 4][..]), None).unwrap();
        assert_eq!(m.motion_mean_abs_diff, 0.0);
    }

    #[test]
    fn test_undersized_plane_rejected() {
        assert!(FrameGate::compute_metrics(&[0u8; 10], 4, 4, None, None).is_err());
        assert!(FrameGate::compute_metrics(&[], 0, 4, None, None).is_err());
    }

    #[test]
    fn test_sharp_frame_passes_all_thresholds() {
        let luma = checker(80, 60);
        let frame = Frame::new(80, 60, luma.clone(), Some(luma), 0).unwrap();
        let result = FrameGate::evaluate(&frame, &GateThresholds::default());
        assert!(result.pass, "{:?}", result.metrics);

        let dark = Frame::new(80, 60, vec![5u8; 80 * 60], None, 0).unwrap();
        assert!(!FrameGate::evaluate(&dark, &GateThresholds::default()).pass);
    }

    #[test]
    fn test_sharpness_and_motion_follow_the_bottom_window() {
        // texture only in the top half: whole-frame contrast, no sharpness below
        let (w, h) = (40usize, 40usize);
        let mut luma = vec![100u8; w * h];
        for (i, p) in luma.iter_mut().enumerate().take(w * h / 2) {
            *p = if (i % w + i / w) % 2 == 0 { 0 } else { 255 };
        }
        let m = FrameGate::compute_metrics(&luma, 40, 40, None, None).unwrap();
        assert!(m.contrast_std > 0.0);
        assert_eq!(m.blur_variance_laplacian, 0.0);

        let top = MrzBox::new(0.0, 0.0, 40.0, 20.0).unwrap();
        let m = FrameGate::compute_metrics(&luma, 40, 40, None, Some(&top)).unwrap();
        assert!(m.blur_variance_laplacian > 0.0);

        // motion outside the window is ignored
        let moved: Vec<u8> = luma
            .iter()
            .enumerate()
            .map(|(i, p)| if i < w * h / 2 { p.wrapping_add(50) } else { *p })
            .collect();
        let m = FrameGate::compute_metrics(&moved, 40, 40, Some(luma.as_slice()), None).unwrap();
        assert_eq!(m.motion_mean_abs_diff, 0.0);
        let m = FrameGate::compute_metrics(&moved, 40, 40, Some(luma.as_slice()), Some(&top)).unwrap();
        assert!(m.motion_mean_abs_diff > 0.0);
    }
}
