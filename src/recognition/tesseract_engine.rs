use crate::models::{OcrOutput, MRZ_ALPHABET};
use crate::recognition::engine::{rotate_quadrant, RecognitionEngine};
use crate::utils::EngineError;
use async_trait::async_trait;
use image::GrayImage;
use log::debug;
use std::sync::Arc;
use std::time::Instant;
use tesseract::{PageSegMode, Tesseract};

const MRZ_BLACKLIST: &str = " \n\r\t\"'`“”‘’«»‹›()[]{}.,:;!/\\|_-";

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub datapath: Option<String>,
    pub language: String,
    pub whitelist: Option<String>,
    pub blacklist: Option<String>,
    pub dpi: Option<u32>,
    pub single_block: bool,
}

/// Tesseract behind the engine contract; runs on the blocking pool.
pub struct TesseractEngine {
    name: String,
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new(name: impl Into<String>, config: TesseractConfig) -> Self {
        TesseractEngine {
            name: name.into(),
            config,
        }
    }

    /// Plain text recognition with automatic page segmentation.
    pub fn general() -> Self {
        Self::new(
            "tesseract-general",
            TesseractConfig {
                datapath: None,
                language: "eng".to_string(),
                whitelist: None,
                blacklist: None,
                dpi: None,
                single_block: false,
            },
        )
    }

    /// MRZ-tuned recognition: restricted alphabet, single text block, fixed DPI.
    pub fn mrz() -> Self {
        Self::new(
            "tesseract-mrz",
            TesseractConfig {
                datapath: None,
                language: "eng".to_string(),
                whitelist: Some(MRZ_ALPHABET.to_string()),
                blacklist: Some(MRZ_BLACKLIST.to_string()),
                dpi: Some(300),
                single_block: true,
            },
        )
    }

    fn run_blocking(config: &TesseractConfig, image: &GrayImage) -> Result<String, EngineError> {
        let temp_file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| EngineError::Failed(format!("Failed to create temp file: {}", e)))?;
        image
            .save(temp_file.path())
            .map_err(|e| EngineError::Decode(format!("Failed to write image: {}", e)))?;
        let path_str = temp_file
            .path()
            .to_str()
            .ok_or_else(|| EngineError::Failed("Could not convert path to string".to_string()))?;

        let mut tess = Tesseract::new(config.datapath.as_deref(), Some(&config.language))
            .map_err(|e| EngineError::Unavailable(format!("Failed to initialize Tesseract: {}", e)))?;
        if let Some(whitelist) = &config.whitelist {
            tess = tess
                .set_variable("tessedit_char_whitelist", whitelist)
                .map_err(|e| EngineError::Failed(format!("Failed to set whitelist: {}", e)))?;
        }
        if let Some(blacklist) = &config.blacklist {
            tess = tess
                .set_variable("tessedit_char_blacklist", blacklist)
                .map_err(|e| EngineError::Failed(format!("Failed to set blacklist: {}", e)))?;
        }
        if let Some(dpi) = config.dpi {
            tess = tess
                .set_variable("user_defined_dpi", &dpi.to_string())
                .map_err(|e| EngineError::Failed(format!("Failed to set dpi: {}", e)))?;
        }
        tess.set_page_seg_mode(if config.single_block {
            PageSegMode::PsmSingleBlock
        } else {
            PageSegMode::PsmAuto
        });

        tess = tess
            .set_image(path_str)
            .map_err(|e| EngineError::Decode(format!("Failed to set image: {}", e)))?;
        tess.get_text()
            .map_err(|e| EngineError::Failed(format!("Failed to extract text: {}", e)))
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recognize(
        &self,
        image: Arc<GrayImage>,
        rotation_degrees: u32,
    ) -> Result<OcrOutput, EngineError> {
        let config = self.config.clone();
        let started = Instant::now();
        let text = tokio::task::spawn_blocking(move || {
            let rotated = rotate_quadrant(&image, rotation_degrees);
            Self::run_blocking(&config, &rotated)
        })
        .await
        .map_err(|e| EngineError::Failed(format!("Task join error: {}", e)))??;

        let elapsed = started.elapsed().as_millis() as u64;
        debug!("{} recognised {} chars in {} ms", self.name, text.len(), elapsed);
        Ok(OcrOutput::from_text(text, elapsed))
    }
}
