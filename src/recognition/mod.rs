pub mod engine;
pub mod router;
#[cfg(feature = "tesseract")]
pub mod tesseract_engine;

pub use engine::RecognitionEngine;
pub use router::{EngineKind, OcrRouter, RecognitionOutcome, RouterConfig, RouterMode};
#[cfg(feature = "tesseract")]
pub use tesseract_engine::TesseractEngine;
