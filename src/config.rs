use crate::analysis::aggregator::AggregatorParams;
use crate::models::GateThresholds;
use crate::processing::localizer::LocalizerParams;
use crate::processing::tracker::TrackerParams;
use crate::recognition::router::RouterConfig;
use crate::utils::MrzError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Every tunable of the recognition pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub gate: GateThresholds,
    pub localizer: LocalizerParams,
    pub tracker: TrackerParams,
    pub router: RouterConfig,
    pub aggregator: AggregatorParams,
    /// Minimum spacing between OCR attempts.
    pub min_ocr_interval_ms: u64,
    /// Minimum spacing between frames handed to the analyzer.
    pub min_analyze_interval_ms: u64,
    pub session_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            gate: GateThresholds::default(),
            localizer: LocalizerParams::default(),
            tracker: TrackerParams::default(),
            router: RouterConfig::default(),
            aggregator: AggregatorParams::default(),
            min_ocr_interval_ms: 250,
            min_analyze_interval_ms: 0,
            session_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MrzError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MrzError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), MrzError> {
        self.gate
            .validate()
            .map_err(|e| MrzError::Config(format!("gate: {}", e)))?;

        let l = &self.localizer;
        let fraction = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if l.working_width == 0 {
            return Err(MrzError::Config("localizer.working_width must be positive".into()));
        }
        if !(fraction(l.search_top) && fraction(l.search_bottom) && l.search_top < l.search_bottom) {
            return Err(MrzError::Config("localizer search window must satisfy 0 <= top < bottom <= 1".into()));
        }
        if !(fraction(l.min_height_ratio)
            && fraction(l.max_height_ratio)
            && l.min_height_ratio <= l.max_height_ratio)
        {
            return Err(MrzError::Config("localizer height ratios must satisfy 0 <= min <= max <= 1".into()));
        }
        if !(fraction(l.row_threshold) && fraction(l.column_threshold) && fraction(l.min_width_ratio)) {
            return Err(MrzError::Config("localizer thresholds must be within [0, 1]".into()));
        }
        if l.row_smooth_window == 0 || l.column_smooth_window == 0 {
            return Err(MrzError::Config("localizer smoothing windows must be >= 1".into()));
        }

        let t = &self.tracker;
        if !(t.alpha > 0.0 && t.alpha <= 1.0) {
            return Err(MrzError::Config("tracker.alpha must be in (0, 1]".into()));
        }
        if !fraction(t.iou_threshold) {
            return Err(MrzError::Config("tracker.iou_threshold must be within [0, 1]".into()));
        }
        if t.window == 0 || t.stable_streak == 0 || t.max_outliers == 0 {
            return Err(MrzError::Config("tracker window, streak and outlier limit must be >= 1".into()));
        }

        let r = &self.router;
        if r.dual_timeout_ms == 0 || r.engine_timeout_ms == 0 {
            return Err(MrzError::Config("router timeouts must be positive".into()));
        }
        if !(r.contrast_factor.is_finite() && r.contrast_factor > 0.0) {
            return Err(MrzError::Config("router.contrast_factor must be positive".into()));
        }

        let a = &self.aggregator;
        if a.min_count == 0 || a.max_frames == 0 || a.min_confidence > 4 {
            return Err(MrzError::Config("aggregator counts must be >= 1 and min_confidence <= 4".into()));
        }
        if self.session_timeout_ms == Some(0) {
            return Err(MrzError::Config("session_timeout_ms must be positive when set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::router::RouterMode;
    use tempfile::NamedTempFile;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_ocr_interval_ms, 250);
        assert_eq!(config.router.dual_timeout_ms, 1200);
        assert_eq!(config.aggregator.max_frames, 12);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"router": {"mode": "Race", "camera_id": "back"}, "session_timeout_ms": 15000}"#,
        )
        .unwrap();
        assert_eq!(config.router.mode, RouterMode::Race);
        assert_eq!(config.router.camera_id.as_deref(), Some("back"));
        assert_eq!(config.router.dual_timeout_ms, 1200);
        assert_eq!(config.session_timeout_ms, Some(15000));
        assert_eq!(config.tracker.window, 6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"gate": {"min_brightness": 200, "max_brightness": 100}}"#);
        assert!(matches!(err, Err(MrzError::Config(_))));
        let err = PipelineConfig::from_json_str(r#"{"tracker": {"alpha": 0.0}}"#);
        assert!(matches!(err, Err(MrzError::Config(_))));
        let err = PipelineConfig::from_json_str(r#"{"gate": 5}"#);
        assert!(matches!(err, Err(MrzError::Json(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_ocr_interval_ms": 400}}"#).unwrap();
        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.min_ocr_interval_ms, 400);
        assert!(PipelineConfig::from_json_file("/nonexistent/mrz.json").is_err());
    }
}
