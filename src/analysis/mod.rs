pub mod aggregator;
pub mod analyzer;
pub mod executor;
pub mod facade;
pub mod state_machine;

pub use aggregator::{AggregatorParams, BurstAggregator, BurstResult};
pub use analyzer::{scan_state, FrameAnalyzer, RateLimiter, ScanListener};
pub use executor::PipelineExecutor;
pub use facade::{Confirmation, MrzPipeline, PipelineOutput, RecognitionUpdate};
pub use state_machine::MrzStateMachine;
