use crate::utils::MrzError;
use image::GrayImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    TD1, // ID card, 3 x 30
    TD2, // ID card, 2 x 36
    TD3, // Passport, 2 x 44
}

impl DocumentFormat {
    pub fn mrz_lines(&self) -> usize {
        match self {
            DocumentFormat::TD1 => 3,
            DocumentFormat::TD2 => 2,
            DocumentFormat::TD3 => 2,
        }
    }

    pub fn mrz_chars_per_line(&self) -> usize {
        match self {
            DocumentFormat::TD1 => 30,
            DocumentFormat::TD2 => 36,
            DocumentFormat::TD3 => 44,
        }
    }

    /// Total number of MRZ characters for this format.
    pub fn mrz_len(&self) -> usize {
        self.mrz_lines() * self.mrz_chars_per_line()
    }
}

/// One luma plane from the camera, plus the previous plane for motion.
///
/// Constructed once per camera callback and then only read.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
    previous: Option<Vec<u8>>,
    timestamp_ms: u64,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        luma: Vec<u8>,
        previous: Option<Vec<u8>>,
        timestamp_ms: u64,
    ) -> Result<Self, MrzError> {
        if width == 0 || height == 0 {
            return Err(MrzError::invalid("width/height must be positive"));
        }
        let needed = width as usize * height as usize;
        if luma.len() < needed {
            return Err(MrzError::invalid(format!(
                "luma plane has {} bytes, {}x{} needs {}",
                luma.len(),
                width,
                height,
                needed
            )));
        }
        if let Some(prev) = &previous {
            if prev.len() < needed {
                return Err(MrzError::invalid(
                    "previous luma plane is smaller than width*height",
                ));
            }
        }
        Ok(Frame {
            width,
            height,
            luma,
            previous,
            timestamp_ms,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    pub fn previous(&self) -> Option<&[u8]> {
        self.previous.as_deref()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Copies the plane into an owned grayscale image (row stride = width).
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([self.luma[y as usize * self.width as usize + x as usize]])
        })
    }

    /// Copies the pixels under `region` without materialising the whole frame.
    pub fn crop(&self, region: &MrzBox) -> GrayImage {
        let (x0, y0, w, h) = region.to_crop_rect(self.width, self.height);
        let stride = self.width as usize;
        GrayImage::from_fn(w, h, |x, y| {
            let idx = (y0 + y) as usize * stride + (x0 + x) as usize;
            image::Luma([self.luma[idx]])
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateMetrics {
    pub brightness_mean: f32,
    pub contrast_std: f32,
    pub blur_variance_laplacian: f32,
    pub motion_mean_abs_diff: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    pub min_brightness: f32,
    pub max_brightness: f32,
    pub min_contrast: f32,
    pub min_blur_variance: f32,
    pub max_motion: f32,
}

impl Default for GateThresholds {
    fn default() -> Self {
        GateThresholds {
            min_brightness: 40.0,
            max_brightness: 220.0,
            min_contrast: 18.0,
            min_blur_variance: 60.0,
            max_motion: 12.0,
        }
    }
}

impl GateThresholds {
    pub fn new(
        min_brightness: f32,
        max_brightness: f32,
        min_contrast: f32,
        min_blur_variance: f32,
        max_motion: f32,
    ) -> Result<Self, MrzError> {
        let thresholds = GateThresholds {
            min_brightness,
            max_brightness,
            min_contrast,
            min_blur_variance,
            max_motion,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), MrzError> {
        let values = [
            self.min_brightness,
            self.max_brightness,
            self.min_contrast,
            self.min_blur_variance,
            self.max_motion,
        ];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(MrzError::invalid("gate thresholds must be finite and non-negative"));
        }
        if self.min_brightness > self.max_brightness {
            return Err(MrzError::invalid("min_brightness must be <= max_brightness"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GateResult {
    pub pass: bool,
    pub metrics: GateMetrics,
}

/// Axis-aligned rectangle in the coordinate space of the frame it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MrzBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl MrzBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Result<Self, MrzError> {
        if !(left.is_finite() && top.is_finite() && right.is_finite() && bottom.is_finite()) {
            return Err(MrzError::invalid("box coordinates must be finite"));
        }
        if right < left || bottom < top {
            return Err(MrzError::invalid(format!(
                "invalid box bounds ({}, {}, {}, {})",
                left, top, right, bottom
            )));
        }
        Ok(MrzBox {
            left,
            top,
            right,
            bottom,
        })
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &MrzBox) -> f32 {
        let inter_w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let inter_h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Clamps into `[0, frame_w] x [0, frame_h]`, keeping at least one pixel of extent.
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> MrzBox {
        let w = frame_w.max(1) as f32;
        let h = frame_h.max(1) as f32;
        let left = self.left.clamp(0.0, w - 1.0);
        let top = self.top.clamp(0.0, h - 1.0);
        let right = self.right.clamp(left + 1.0, w);
        let bottom = self.bottom.clamp(top + 1.0, h);
        MrzBox {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Integer crop rectangle `(x, y, width, height)` inside the frame.
    pub fn to_crop_rect(&self, frame_w: u32, frame_h: u32) -> (u32, u32, u32, u32) {
        let clamped = self.clamp_to(frame_w, frame_h);
        let x = clamped.left.floor() as u32;
        let y = clamped.top.floor() as u32;
        let right = (clamped.right.ceil() as u32).min(frame_w).max(x + 1);
        let bottom = (clamped.bottom.ceil() as u32).min(frame_h).max(y + 1);
        (x, y, right - x, bottom - y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackResult {
    pub stable: bool,
    pub stable_count: u32,
    /// `1 - IoU` against the previous smoothed box.
    pub jitter: f32,
    /// Exponentially smoothed box.
    pub smoothed: MrzBox,
    /// Window-averaged box used for cropping.
    pub averaged: MrzBox,
}

/// One engine's recognition result for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub raw_text: String,
    pub elapsed_ms: u64,
    /// Share of characters that belong to the MRZ alphabet.
    pub whitelist_ratio: f32,
    /// Number of `<` filler characters in the text.
    pub control_char_count: u32,
}

pub const MRZ_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789<";

impl OcrOutput {
    pub fn from_text(raw_text: impl Into<String>, elapsed_ms: u64) -> Self {
        let raw_text = raw_text.into();
        let mut total = 0u32;
        let mut allowed = 0u32;
        let mut fillers = 0u32;
        for c in raw_text.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if MRZ_ALPHABET.contains(c) {
                allowed += 1;
            }
            if c == '<' {
                fillers += 1;
            }
        }
        let whitelist_ratio = if total == 0 {
            0.0
        } else {
            allowed as f32 / total as f32
        };
        OcrOutput {
            raw_text,
            elapsed_ms,
            whitelist_ratio,
            control_char_count: fillers,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}

/// Image statistics of the region handed to the engines.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct OcrMetrics {
    pub brightness: f64,
    pub contrast: f64,
    pub sharpness: f64,
    pub noise: f64,
}

/// Normalised, repaired MRZ lines that passed the checksum threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MrzCandidate {
    pub line1: String,
    pub line2: String,
    pub line3: Option<String>,
    pub format: DocumentFormat,
    /// Number of passing check digits, 0..=4.
    pub confidence: u8,
}

impl MrzCandidate {
    pub fn lines(&self) -> Vec<&str> {
        let mut lines = vec![self.line1.as_str(), self.line2.as_str()];
        if let Some(l3) = &self.line3 {
            lines.push(l3.as_str());
        }
        lines
    }

    pub fn as_mrz_text(&self) -> String {
        self.lines().join("\n")
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence.min(4);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MrzChecksums {
    pub document_number_ok: bool,
    pub birth_date_ok: bool,
    pub expiry_date_ok: bool,
    pub final_composite_ok: bool,
    pub passed_count: u8,
    pub total_count: u8,
}

impl MrzChecksums {
    pub fn new(
        document_number_ok: bool,
        birth_date_ok: bool,
        expiry_date_ok: bool,
        final_composite_ok: bool,
    ) -> Self {
        let passed_count = [
            document_number_ok,
            birth_date_ok,
            expiry_date_ok,
            final_composite_ok,
        ]
        .iter()
        .filter(|ok| **ok)
        .count() as u8;
        MrzChecksums {
            document_number_ok,
            birth_date_ok,
            expiry_date_ok,
            final_composite_ok,
            passed_count,
            total_count: 4,
        }
    }

    pub fn none() -> Self {
        MrzChecksums::new(false, false, false, false)
    }

    pub fn all_passed(&self) -> bool {
        self.passed_count == self.total_count
    }
}

/// Decoded identity attributes of a machine-readable zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MrzFields {
    pub document_type: String,
    pub issuing_country: String,
    pub document_number: String,
    pub nationality: String,
    pub birth_date_yymmdd: String,
    pub sex: String,
    pub expiry_date_yymmdd: String,
    pub personal_number: Option<String>,
    pub surname: String,
    pub given_names: String,
}

/// Minimal identity used for cross-frame equality and as the chip-access seed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MrzKey {
    pub document_number: String,
    pub birth_date_yymmdd: String,
    pub expiry_date_yymmdd: String,
}

impl From<&MrzFields> for MrzKey {
    fn from(fields: &MrzFields) -> Self {
        MrzKey {
            document_number: fields.document_number.clone(),
            birth_date_yymmdd: fields.birth_date_yymmdd.clone(),
            expiry_date_yymmdd: fields.expiry_date_yymmdd.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MrzFailReason {
    UnknownFormat,
    BadLength,
    BadCharset,
    ChecksumFail,
}

/// Weighted structural score of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MrzScore {
    pub checksum_score: u8,
    pub length_score: f32,
    pub charset_score: f32,
    pub structure_score: f32,
    pub total: f32,
}

impl MrzScore {
    pub fn new(checksum_score: u8, length_ok: bool, charset_ok: bool, structure_ok: bool) -> Self {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let mut score = MrzScore {
            checksum_score,
            length_score: flag(length_ok),
            charset_score: flag(charset_ok),
            structure_score: flag(structure_ok),
            total: 0.0,
        };
        score.total = score.checksum_score as f32 * 10.0
            + score.length_score * 2.0
            + score.charset_score * 2.0
            + score.structure_score * 3.0;
        score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MrzParseResult {
    pub format: Option<DocumentFormat>,
    pub lines: Vec<String>,
    pub fields: Option<MrzFields>,
    pub checksums: MrzChecksums,
    pub score: MrzScore,
    pub valid: bool,
    pub fail_reason: Option<MrzFailReason>,
}

impl MrzParseResult {
    pub fn key(&self) -> Option<MrzKey> {
        if !self.valid {
            return None;
        }
        self.fields.as_ref().map(MrzKey::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Searching,
    Tracking,
    OcrRunning,
    OcrCooldown,
    Confirmed,
    Timeout,
}

/// User-facing feedback derived from a pipeline output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Waiting,
    OcrInFlight,
    MrzNotFound,
    MrzFoundOcrRejected,
    MrzFoundInvalidChecksum,
    MrzFound,
    Error,
}
