use crate::analysis::executor::PipelineExecutor;
use crate::analysis::facade::{Confirmation, MrzPipeline, PipelineOutput};
use crate::models::{Frame, ScanState};
use crate::utils::MrzError;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives pipeline events on the analyzer's worker thread.
pub trait ScanListener: Send + Sync {
    fn on_frame_processed(&self, _output: &PipelineOutput, _state: ScanState) {}

    fn on_confirmed(&self, confirmation: &Confirmation);

    fn on_analyzer_error(&self, message: &str);
}

/// Drops events that arrive sooner than `min_interval_ms` after the last accepted one.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    min_interval_ms: u64,
    last_ms: Option<u64>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        RateLimiter {
            min_interval_ms,
            last_ms: None,
        }
    }

    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        match self.last_ms {
            Some(last) if now_ms >= last && now_ms - last < self.min_interval_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_ms = None;
    }
}

/// User-facing feedback for one processed frame.
pub fn scan_state(output: &PipelineOutput) -> ScanState {
    if output.confirmed.is_some() {
        return ScanState::MrzFound;
    }
    if let Some(update) = &output.recognition {
        if update.outcome.is_err() {
            return ScanState::Error;
        }
        return match &update.parse {
            None => ScanState::MrzFoundOcrRejected,
            Some(p) if !p.valid => ScanState::MrzFoundInvalidChecksum,
            Some(_) => ScanState::MrzFound,
        };
    }
    if output.ocr_in_flight {
        return ScanState::OcrInFlight;
    }
    if output.gate.pass && output.detected.is_none() {
        return ScanState::MrzNotFound;
    }
    ScanState::Waiting
}

// a panic inside the pipeline must not wedge later frames
fn lock_pipeline(pipeline: &Mutex<MrzPipeline>) -> MutexGuard<'_, MrzPipeline> {
    pipeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Camera-callback side of the pipeline: accepts frames without blocking and
/// processes the latest one on a dedicated worker.
pub struct FrameAnalyzer {
    executor: PipelineExecutor,
    pipeline: Arc<Mutex<MrzPipeline>>,
    listener: Arc<dyn ScanListener>,
    limiter: Mutex<RateLimiter>,
    delivered: Arc<AtomicBool>,
}

impl FrameAnalyzer {
    pub fn new(
        pipeline: MrzPipeline,
        listener: Arc<dyn ScanListener>,
        min_analyze_interval_ms: u64,
    ) -> Result<Self, MrzError> {
        let panic_listener = Arc::clone(&listener);
        let executor = PipelineExecutor::start("mrz-analyzer", move |message| {
            panic_listener.on_analyzer_error(&message);
        })?;
        Ok(FrameAnalyzer {
            executor,
            pipeline: Arc::new(Mutex::new(pipeline)),
            listener,
            limiter: Mutex::new(RateLimiter::new(min_analyze_interval_ms)),
            delivered: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Queues `frame` for analysis. Returns false when the frame was rate
    /// limited or the analyzer is shut down.
    pub fn submit(&self, frame: Frame) -> bool {
        let accepted = self
            .limiter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .try_acquire(frame.timestamp_ms());
        if !accepted {
            debug!("frame at {} ms rate limited", frame.timestamp_ms());
            return false;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let listener = Arc::clone(&self.listener);
        let delivered = Arc::clone(&self.delivered);
        self.executor.submit(move || {
            let output = lock_pipeline(&pipeline).on_frame(&frame);
            let state = scan_state(&output);
            listener.on_frame_processed(&output, state);
            if let Some(confirmation) = &output.confirmed {
                if !delivered.swap(true, Ordering::SeqCst) {
                    listener.on_confirmed(confirmation);
                }
            }
        })
    }

    pub fn reset_session(&self) {
        lock_pipeline(&self.pipeline).reset_session();
        self.limiter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset();
        self.delivered.store(false, Ordering::SeqCst);
    }

    /// Frames dropped because a newer one arrived before they started.
    pub fn replaced_frames(&self) -> u64 {
        self.executor.replaced_count()
    }

    /// Stops the worker after the frame being analysed, if any, completes.
    pub fn shutdown(&mut self) {
        self.executor.shutdown();
        debug!("analyzer stopped");
    }
}
