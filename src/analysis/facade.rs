use crate::analysis::aggregator::{BurstAggregator, BurstResult};
use crate::analysis::state_machine::MrzStateMachine;
use crate::config::PipelineConfig;
use crate::models::{
    Frame, GateResult, MrzBox, MrzCandidate, MrzKey, MrzParseResult, PipelineState, TrackResult,
};
use crate::processing::frame_gate::FrameGate;
use crate::processing::localizer::BandLocalizer;
use crate::processing::tracker::RoiTracker;
use crate::recognition::router::{OcrRouter, RecognitionOutcome};
use crate::utils::{EngineError, MrzError};
use crate::validation::MrzValidator;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Identity handed to the chip-access side once a session is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    pub key: MrzKey,
    pub candidate: MrzCandidate,
    /// True when the burst vote decided rather than the two-in-a-row rule.
    pub by_burst: bool,
}

/// Result of one finished recognition, applied to the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionUpdate {
    pub outcome: Result<RecognitionOutcome, EngineError>,
    pub candidate: Option<MrzCandidate>,
    pub parse: Option<MrzParseResult>,
    pub burst: Option<BurstResult>,
    pub state: PipelineState,
}

/// Everything the pipeline learned from one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub timestamp_ms: u64,
    pub gate: GateResult,
    pub detected: Option<MrzBox>,
    pub track: Option<TrackResult>,
    /// Recognition that completed since the previous frame.
    pub recognition: Option<RecognitionUpdate>,
    pub ocr_started: bool,
    pub ocr_in_flight: bool,
    pub confirmed: Option<Confirmation>,
    pub state: PipelineState,
}

struct Completion {
    generation: u64,
    result: Result<RecognitionOutcome, EngineError>,
}

/// Per-session orchestration: gate, localise, track, recognise, vote, confirm.
///
/// One caller at a time; the analyzer's single worker provides that.
pub struct MrzPipeline {
    config: PipelineConfig,
    localizer: BandLocalizer,
    tracker: RoiTracker,
    aggregator: BurstAggregator,
    state: MrzStateMachine,
    router: Arc<OcrRouter>,
    runtime: Handle,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    generation: u64,
    in_flight: bool,
    last_ocr_ms: Option<u64>,
    confirmation: Option<Confirmation>,
}

impl MrzPipeline {
    pub fn new(config: PipelineConfig, router: Arc<OcrRouter>, runtime: Handle) -> Result<Self, MrzError> {
        config.validate()?;
        let (completions_tx, completions_rx) = unbounded();
        Ok(MrzPipeline {
            localizer: BandLocalizer::new(config.localizer.clone()),
            tracker: RoiTracker::new(config.tracker),
            aggregator: BurstAggregator::new(config.aggregator),
            state: MrzStateMachine::new(),
            config,
            router,
            runtime,
            completions_tx,
            completions_rx,
            generation: 0,
            in_flight: false,
            last_ocr_ms: None,
            confirmation: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state.state()
    }

    pub fn confirmation(&self) -> Option<&Confirmation> {
        self.confirmation.as_ref()
    }

    pub fn ocr_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn on_frame(&mut self, frame: &Frame) -> PipelineOutput {
        let now = frame.timestamp_ms();
        let mut recognition = None;
        while let Ok(done) = self.completions_rx.try_recv() {
            if let Some(update) = self.apply_completion(done) {
                recognition = Some(update);
            }
        }

        let gate = FrameGate::evaluate(frame, &self.config.gate);
        let detected = if gate.pass && !self.state.is_confirmed() {
            self.localizer.locate(frame)
        } else {
            None
        };
        let track = detected.map(|b| self.tracker.update(b, frame.width(), frame.height()));

        if track.map_or(false, |t| t.stable) {
            self.state.on_stable_box(now);
        }
        self.check_session_timeout(now);

        let mut ocr_started = false;
        if let Some(t) = track {
            if gate.pass && t.stable && self.may_start_ocr(now) {
                self.start_recognition(frame, &t.averaged);
                ocr_started = true;
            }
        }

        PipelineOutput {
            timestamp_ms: now,
            gate,
            detected,
            track,
            recognition,
            ocr_started,
            ocr_in_flight: self.in_flight,
            confirmed: self.confirmation.clone(),
            state: self.state.state(),
        }
    }

    /// Blocks until the in-flight recognition reports back, or `timeout` passes.
    pub fn await_recognition(&mut self, timeout: Duration) -> Option<RecognitionUpdate> {
        if !self.in_flight {
            return None;
        }
        loop {
            match self.completions_rx.recv_timeout(timeout) {
                Ok(done) => {
                    if let Some(update) = self.apply_completion(done) {
                        return Some(update);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Starts a new capture session; a recognition still running is ignored when it lands.
    pub fn reset_session(&mut self) {
        self.generation += 1;
        self.tracker.reset();
        self.aggregator.reset();
        self.state.reset();
        self.in_flight = false;
        self.last_ocr_ms = None;
        self.confirmation = None;
        debug!("session reset (generation {})", self.generation);
    }

    fn may_start_ocr(&self, now: u64) -> bool {
        if self.in_flight {
            return false;
        }
        if matches!(
            self.state.state(),
            PipelineState::Confirmed | PipelineState::Timeout | PipelineState::Searching
        ) {
            return false;
        }
        match self.last_ocr_ms {
            Some(last) => now.saturating_sub(last) >= self.config.min_ocr_interval_ms,
            None => true,
        }
    }

    fn check_session_timeout(&mut self, now: u64) {
        let (Some(limit), Some(start)) = (self.config.session_timeout_ms, self.state.session_start_ms()) else {
            return;
        };
        if self.state.is_confirmed() || now.saturating_sub(start) <= limit {
            return;
        }
        info!("session timed out after {} ms", now.saturating_sub(start));
        // a recognition still running belongs to the expired session
        self.generation += 1;
        self.in_flight = false;
        self.state.on_timeout();
        self.aggregator.reset();
        self.tracker.reset();
    }

    fn start_recognition(&mut self, frame: &Frame, region: &MrzBox) {
        let roi = frame.crop(region);
        let (w, h) = (frame.width(), frame.height());
        let router = Arc::clone(&self.router);
        let tx = self.completions_tx.clone();
        let generation = self.generation;

        self.in_flight = true;
        self.last_ocr_ms = Some(frame.timestamp_ms());
        self.state.on_ocr_started();
        debug!("recognition started on {}x{} roi", roi.width(), roi.height());

        self.runtime.spawn(async move {
            let result = router.recognize(&roi, w, h).await;
            // receiver gone means the pipeline was dropped
            let _ = tx.send(Completion { generation, result });
        });
    }

    fn apply_completion(&mut self, done: Completion) -> Option<RecognitionUpdate> {
        if done.generation != self.generation {
            debug!("dropping recognition from an earlier session");
            return None;
        }
        self.in_flight = false;

        let (candidate, parse) = match &done.result {
            Ok(outcome) => (outcome.candidate.clone(), outcome.parse.clone()),
            Err(e) => {
                debug!("recognition failed: {}", e);
                (None, None)
            }
        };
        // late results do not vote once the session is decided
        if matches!(self.state.state(), PipelineState::Confirmed | PipelineState::Timeout) {
            return Some(RecognitionUpdate {
                outcome: done.result,
                candidate,
                parse,
                burst: None,
                state: self.state.state(),
            });
        }

        let key = parse.as_ref().and_then(|p| p.key());
        let burst = self.aggregator.add(candidate.clone());
        let state = self.state.on_ocr_result(key.as_ref());

        if state == PipelineState::Confirmed {
            if let (Some(key), Some(candidate)) = (key, candidate.clone()) {
                self.confirm(key, candidate, false);
            }
        } else if let Some(result) = &burst {
            let parsed = MrzValidator::parse_candidate(&result.candidate);
            if let Some(key) = parsed.key() {
                self.state.force_confirm(key.clone());
                self.confirm(key, result.candidate.clone(), true);
            }
        }

        Some(RecognitionUpdate {
            outcome: done.result,
            candidate,
            parse,
            burst,
            state: self.state.state(),
        })
    }

    fn confirm(&mut self, key: MrzKey, candidate: MrzCandidate, by_burst: bool) {
        info!(
            "confirmed document {} ({:?}, burst: {})",
            key.document_number, candidate.format, by_burst
        );
        self.aggregator.reset();
        self.confirmation = Some(Confirmation {
            key,
            candidate,
            by_burst,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OcrOutput;
    use crate::processing::presets::InMemoryPresetStore;
    use crate::recognition::engine::RecognitionEngine;
    use crate::recognition::router::RouterMode;
    use async_trait::async_trait;
    use image::GrayImage;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::runtime::Runtime;

    const ERIKSSON: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\nL898902C36UTO7408122F1204159ZE184226B<<<<<10";

    struct FixedEngine {
        reply: Result<String, EngineError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecognitionEngine for FixedEngine {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn recognize(&self, _image: Arc<GrayImage>, _rotation: u32) -> Result<OcrOutput, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map(|text| OcrOutput::from_text(text, 1))
        }
    }

    /// Replies from a queue after `delay`, then repeats `fallback`.
    struct ScriptedEngine {
        replies: Mutex<VecDeque<String>>,
        fallback: String,
        delay: Duration,
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(&self, _image: Arc<GrayImage>, _rotation: u32) -> Result<OcrOutput, EngineError> {
            tokio::time::sleep(self.delay).await;
            let next = self.replies.lock().unwrap().pop_front();
            Ok(OcrOutput::from_text(next.unwrap_or_else(|| self.fallback.clone()), 1))
        }
    }

    fn scripted(replies: &[&str], fallback: &str, delay_ms: u64) -> Arc<ScriptedEngine> {
        Arc::new(ScriptedEngine {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            fallback: fallback.to_string(),
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn engine(reply: Result<&str, EngineError>) -> Arc<FixedEngine> {
        Arc::new(FixedEngine {
            reply: reply.map(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    fn pipeline<E: RecognitionEngine + 'static>(rt: &Runtime, engine: Arc<E>, config: PipelineConfig) -> MrzPipeline {
        let router = OcrRouter::new(
            engine.clone(),
            engine,
            Arc::new(InMemoryPresetStore::new()),
            config.router.clone(),
        );
        MrzPipeline::new(config, Arc::new(router), rt.handle().clone()).unwrap()
    }

    fn general_only() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.router.mode = RouterMode::GeneralOnly;
        config
    }

    fn document_frame(ts: u64) -> Frame {
        let (w, h) = (320u32, 240u32);
        let mut luma = vec![128u8; (w * h) as usize];
        for y in 170..215 {
            for x in 16..304 {
                luma[(y * w + x) as usize] = if (x / 2) % 2 == 0 { 0 } else { 255 };
            }
        }
        Frame::new(w, h, luma, None, ts).unwrap()
    }

    fn blank_frame(ts: u64) -> Frame {
        Frame::new(320, 240, vec![128u8; 320 * 240], None, ts).unwrap()
    }

    /// Feeds frames every 100 ms until recognition starts; returns the next timestamp.
    fn run_until_ocr(p: &mut MrzPipeline, mut ts: u64) -> u64 {
        for _ in 0..20 {
            let out = p.on_frame(&document_frame(ts));
            ts += 100;
            if out.ocr_started {
                return ts;
            }
        }
        panic!("recognition never started");
    }

    #[test]
    fn test_blank_frames_stay_searching() {
        let rt = Runtime::new().unwrap();
        let mut p = pipeline(&rt, engine(Ok(ERIKSSON)), general_only());
        for i in 0..5 {
            let out = p.on_frame(&blank_frame(i * 100));
            assert!(!out.gate.pass);
            assert!(out.detected.is_none());
            assert!(!out.ocr_started);
            assert_eq!(out.state, PipelineState::Searching);
        }
    }

    #[test]
    fn test_recognition_starts_once_track_is_stable() {
        let rt = Runtime::new().unwrap();
        let mut p = pipeline(&rt, engine(Ok(ERIKSSON)), general_only());
        for i in 0..3 {
            let out = p.on_frame(&document_frame(i * 100));
            assert!(out.gate.pass);
            assert!(out.detected.is_some());
            assert!(!out.ocr_started);
        }
        let out = p.on_frame(&document_frame(300));
        assert!(out.ocr_started);
        assert!(out.ocr_in_flight);
        assert_eq!(out.state, PipelineState::OcrRunning);

        // nothing new starts while one is in flight
        let out = p.on_frame(&document_frame(900));
        assert!(!out.ocr_started || out.recognition.is_some());
    }

    #[test]
    fn test_two_matching_reads_confirm() {
        let rt = Runtime::new().unwrap();
        let reader = engine(Ok(ERIKSSON));
        let mut p = pipeline(&rt, reader.clone(), general_only());

        let ts = run_until_ocr(&mut p, 0);
        let first = p.await_recognition(Duration::from_secs(5)).unwrap();
        assert_eq!(first.state, PipelineState::OcrCooldown);
        assert!(first.parse.as_ref().unwrap().valid);
        assert!(p.confirmation().is_none());

        // too soon after the previous attempt
        let out = p.on_frame(&document_frame(ts));
        assert!(!out.ocr_started);

        run_until_ocr(&mut p, ts + 300);
        let second = p.await_recognition(Duration::from_secs(5)).unwrap();
        assert_eq!(second.state, PipelineState::Confirmed);

        let confirmed = p.confirmation().unwrap();
        assert_eq!(confirmed.key.document_number, "L898902C3");
        assert_eq!(confirmed.key.birth_date_yymmdd, "740812");
        assert_eq!(confirmed.key.expiry_date_yymmdd, "120415");
        assert!(!confirmed.by_burst);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);

        let out = p.on_frame(&document_frame(ts + 2000));
        assert!(!out.ocr_started);
        assert!(out.confirmed.is_some());
        assert_eq!(out.state, PipelineState::Confirmed);
    }

    #[test]
    fn test_engine_failure_cools_down() {
        let rt = Runtime::new().unwrap();
        let mut p = pipeline(&rt, engine(Err(EngineError::Failed("no model".into()))), general_only());
        run_until_ocr(&mut p, 0);
        let update = p.await_recognition(Duration::from_secs(5)).unwrap();
        assert!(update.outcome.is_err());
        assert!(update.candidate.is_none());
        assert_eq!(update.state, PipelineState::OcrCooldown);
        assert!(!p.ocr_in_flight());
    }

    #[test]
    fn test_reset_discards_result_from_previous_session() {
        let rt = Runtime::new().unwrap();
        let mut p = pipeline(&rt, engine(Ok(ERIKSSON)), general_only());
        run_until_ocr(&mut p, 0);
        p.reset_session();
        assert_eq!(p.state(), PipelineState::Searching);
        assert!(p.await_recognition(Duration::from_millis(50)).is_none());

        // give the stale task time to land, then make sure it is dropped
        std::thread::sleep(Duration::from_millis(200));
        let out = p.on_frame(&document_frame(10_000));
        assert!(out.recognition.is_none());
        assert_eq!(out.state, PipelineState::Searching);
    }

    #[test]
    fn test_session_timeout() {
        let rt = Runtime::new().unwrap();
        let mut config = general_only();
        config.session_timeout_ms = Some(1000);
        let mut p = pipeline(&rt, engine(Ok("")), config);

        run_until_ocr(&mut p, 0);
        p.await_recognition(Duration::from_secs(5));
        let out = p.on_frame(&document_frame(2000));
        assert_eq!(out.state, PipelineState::Timeout);
        assert!(!out.ocr_started);

        // a new stable region opens a fresh session
        let mut state = out.state;
        for i in 1..=4 {
            state = p.on_frame(&document_frame(2000 + i * 100)).state;
        }
        assert_ne!(state, PipelineState::Timeout);
    }

    #[test]
    fn test_single_read_among_empty_ones_does_not_confirm() {
        let rt = Runtime::new().unwrap();
        let mut p = pipeline(&rt, scripted(&[ERIKSSON], "", 0), general_only());

        let mut ts = 0;
        for _ in 0..12 {
            ts = run_until_ocr(&mut p, ts);
            let update = p.await_recognition(Duration::from_secs(5)).unwrap();
            assert!(update.burst.is_none());
        }
        assert!(p.confirmation().is_none());
        assert_eq!(p.state(), PipelineState::OcrCooldown);
        assert_eq!(p.aggregator.total_frames(), 1);
    }

    #[test]
    fn test_timeout_discards_recognition_still_running() {
        let rt = Runtime::new().unwrap();
        let mut config = general_only();
        config.session_timeout_ms = Some(1000);
        // two identical reads would confirm if the first one survived the timeout
        let mut p = pipeline(&rt, scripted(&[ERIKSSON, ERIKSSON], "", 500), config);

        run_until_ocr(&mut p, 0);
        assert!(p.ocr_in_flight());
        let out = p.on_frame(&document_frame(2000));
        assert_eq!(out.state, PipelineState::Timeout);
        assert!(!out.ocr_in_flight);

        run_until_ocr(&mut p, 2100);
        let update = p.await_recognition(Duration::from_secs(5)).unwrap();
        assert!(update.parse.as_ref().unwrap().valid);
        assert_eq!(update.state, PipelineState::OcrCooldown);
        assert_eq!(p.state.valid_streak(), 1);
        assert!(p.confirmation().is_none());
    }
}
