pub mod analysis;
pub mod config;
pub mod models;
pub mod processing;
pub mod recognition;
pub mod utils;
pub mod validation;

pub use analysis::{FrameAnalyzer, MrzPipeline, ScanListener};
pub use config::PipelineConfig;
pub use utils::{EngineError, MrzError};
pub use validation::{MrzTextNormalizer, MrzValidator};
