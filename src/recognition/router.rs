use crate::models::{DocumentFormat, MrzCandidate, MrzParseResult, OcrMetrics, OcrOutput};
use crate::processing::image::{ImageProcessor, DEFAULT_CONTRAST_FACTOR};
use crate::processing::presets::{PreprocessParams, PresetKey, PresetStore};
use crate::recognition::engine::RecognitionEngine;
use crate::utils::EngineError;
use crate::validation::{MrzTextNormalizer, MrzValidator};
use image::GrayImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RouterMode {
    /// General engine first, specialised engine with preset search on empty text or failure.
    #[default]
    GeneralFirst,
    /// Both engines concurrently under one deadline; best candidate wins.
    Race,
    SpecializedOnly,
    GeneralOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    General,
    Specialized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub mode: RouterMode,
    /// Overall deadline of a race.
    pub dual_timeout_ms: u64,
    /// Deadline of a single engine call outside a race.
    pub engine_timeout_ms: u64,
    pub contrast_factor: f32,
    pub rotation_degrees: u32,
    pub camera_id: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            mode: RouterMode::GeneralFirst,
            dual_timeout_ms: 1200,
            engine_timeout_ms: 3000,
            contrast_factor: DEFAULT_CONTRAST_FACTOR,
            rotation_degrees: 0,
            camera_id: None,
        }
    }
}

/// What one routed recognition produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionOutcome {
    pub engine: EngineKind,
    pub output: OcrOutput,
    pub candidate: Option<MrzCandidate>,
    pub parse: Option<MrzParseResult>,
    pub preset: Option<PreprocessParams>,
    pub metrics: OcrMetrics,
    pub elapsed_ms: u64,
}

impl RecognitionOutcome {
    fn score(&self) -> f32 {
        self.parse.as_ref().map_or(-1.0, |p| p.score.total)
    }

    fn is_valid(&self) -> bool {
        self.parse.as_ref().map_or(false, |p| p.valid)
    }
}

/// Drives the general and specialised engines for one region of interest.
pub struct OcrRouter {
    general: Arc<dyn RecognitionEngine>,
    specialized: Arc<dyn RecognitionEngine>,
    presets: Arc<dyn PresetStore>,
    config: RouterConfig,
}

impl OcrRouter {
    pub fn new(
        general: Arc<dyn RecognitionEngine>,
        specialized: Arc<dyn RecognitionEngine>,
        presets: Arc<dyn PresetStore>,
        config: RouterConfig,
    ) -> Self {
        OcrRouter {
            general,
            specialized,
            presets,
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Recognises `roi`, a crop taken from a `frame_width` x `frame_height` camera frame.
    pub async fn recognize(
        &self,
        roi: &GrayImage,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<RecognitionOutcome, EngineError> {
        let started = Instant::now();
        let metrics = ImageProcessor::metrics(roi);
        let key = PresetKey::new(self.config.camera_id.clone(), frame_width, frame_height);

        let mut outcome = match self.config.mode {
            RouterMode::GeneralFirst => match self.run_general(roi, metrics).await {
                Ok(out) if !out.output.is_blank() => {
                    debug!("general engine produced text, specialised engine skipped");
                    Ok(out)
                }
                Ok(_) => {
                    debug!("general engine returned empty text, falling back");
                    self.run_specialized(roi, &key, metrics).await
                }
                Err(e) => {
                    warn!("general engine failed ({}), falling back", e);
                    self.run_specialized(roi, &key, metrics).await
                }
            },
            RouterMode::Race => self.race(roi, &key, metrics).await,
            RouterMode::SpecializedOnly => self.run_specialized(roi, &key, metrics).await,
            RouterMode::GeneralOnly => self.run_general(roi, metrics).await,
        }?;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(outcome)
    }

    async fn call(
        &self,
        engine: &Arc<dyn RecognitionEngine>,
        image: GrayImage,
    ) -> Result<OcrOutput, EngineError> {
        let timeout_ms = self.config.engine_timeout_ms;
        let fut = engine.recognize(Arc::new(image), self.config.rotation_degrees);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout_ms)),
        }
    }

    async fn run_general(
        &self,
        roi: &GrayImage,
        metrics: OcrMetrics,
    ) -> Result<RecognitionOutcome, EngineError> {
        let input = ImageProcessor::prepare_general(roi, self.config.contrast_factor);
        let output = self.call(&self.general, input).await?;
        Ok(evaluate(EngineKind::General, output, None, metrics))
    }

    /// Tries presets in learned-first order until one yields a valid MRZ.
    async fn run_specialized(
        &self,
        roi: &GrayImage,
        key: &PresetKey,
        metrics: OcrMetrics,
    ) -> Result<RecognitionOutcome, EngineError> {
        let cached = match self.presets.load(key) {
            Ok(c) => c,
            Err(e) => {
                warn!("preset store read failed: {}", e);
                None
            }
        };

        let mut best: Option<RecognitionOutcome> = None;
        let mut last_error = None;
        for params in PreprocessParams::trial_order(cached) {
            let input = match ImageProcessor::prepare_specialized(
                roi,
                &params,
                self.config.contrast_factor,
            ) {
                Ok(img) => img,
                Err(e) => {
                    warn!("skipping preset {:?}: {}", params, e);
                    continue;
                }
            };
            let output = match self.call(&self.specialized, input).await {
                Ok(o) => o,
                Err(e) => {
                    debug!("specialised engine failed with preset {:?}: {}", params, e);
                    last_error = Some(e);
                    continue;
                }
            };
            let attempt = evaluate(EngineKind::Specialized, output, Some(params), metrics);
            let valid = attempt.is_valid();
            let better = match &best {
                Some(b) => attempt.score() > b.score(),
                None => true,
            };
            if better {
                best = Some(attempt);
            }
            if valid {
                break;
            }
        }

        match best {
            Some(outcome) => {
                if let (Some(params), Some(_)) = (outcome.preset, &outcome.candidate) {
                    if cached != Some(params) {
                        info!("caching preset {:?} for {:?}", params, key.storage_key());
                    }
                    if let Err(e) = self.presets.save(key, &params) {
                        warn!("preset store write failed: {}", e);
                    }
                }
                Ok(outcome)
            }
            None => Err(last_error
                .unwrap_or_else(|| EngineError::Failed("no usable preprocessing preset".into()))),
        }
    }

    /// Runs both engines concurrently; the deadline and the two completions
    /// compete in one `select!`, so exactly one path closes the window.
    async fn race(
        &self,
        roi: &GrayImage,
        key: &PresetKey,
        metrics: OcrMetrics,
    ) -> Result<RecognitionOutcome, EngineError> {
        let cached = self.presets.load(key).unwrap_or_else(|e| {
            warn!("preset store read failed: {}", e);
            None
        });
        let params = PreprocessParams::trial_order(cached)
            .into_iter()
            .next()
            .unwrap_or_default();
        let rotation = self.config.rotation_degrees;

        let general_input = Arc::new(ImageProcessor::prepare_general(
            roi,
            self.config.contrast_factor,
        ));
        let specialized_input = Arc::new(
            ImageProcessor::prepare_specialized(roi, &params, self.config.contrast_factor)
                .map_err(|e| EngineError::Decode(e.to_string()))?,
        );

        let general = Arc::clone(&self.general);
        let specialized = Arc::clone(&self.specialized);
        let mut general_task: JoinHandle<Result<OcrOutput, EngineError>> =
            tokio::spawn(async move { general.recognize(general_input, rotation).await });
        let mut specialized_task: JoinHandle<Result<OcrOutput, EngineError>> =
            tokio::spawn(async move { specialized.recognize(specialized_input, rotation).await });

        let timeout_ms = self.config.dual_timeout_ms;
        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        let mut general_result: Option<Result<OcrOutput, EngineError>> = None;
        let mut specialized_result: Option<Result<OcrOutput, EngineError>> = None;
        while general_result.is_none() || specialized_result.is_none() {
            tokio::select! {
                joined = &mut general_task, if general_result.is_none() => {
                    general_result = Some(flatten_join(joined));
                }
                joined = &mut specialized_task, if specialized_result.is_none() => {
                    specialized_result = Some(flatten_join(joined));
                }
                _ = &mut deadline => {
                    debug!("race deadline of {} ms reached", timeout_ms);
                    break;
                }
            }
        }
        // unfinished engines keep running detached; their results are dropped

        let general = match general_result {
            Some(Ok(o)) => Some(evaluate(EngineKind::General, o, None, metrics)),
            Some(Err(e)) => {
                debug!("general engine failed in race: {}", e);
                None
            }
            None => None,
        };
        let specialized = match specialized_result {
            Some(Ok(o)) => Some(evaluate(EngineKind::Specialized, o, Some(params), metrics)),
            Some(Err(e)) => {
                debug!("specialised engine failed in race: {}", e);
                None
            }
            None => None,
        };

        let winner = pick_best(general, specialized).ok_or(EngineError::Timeout(timeout_ms))?;
        if winner.engine == EngineKind::Specialized && winner.candidate.is_some() {
            if let Err(e) = self.presets.save(key, &params) {
                warn!("preset store write failed: {}", e);
            }
        }
        Ok(winner)
    }
}

fn flatten_join(
    joined: Result<Result<OcrOutput, EngineError>, tokio::task::JoinError>,
) -> Result<OcrOutput, EngineError> {
    joined.unwrap_or_else(|e| Err(EngineError::Failed(format!("engine task aborted: {}", e))))
}

/// Normalises, repairs and parses one engine output.
fn evaluate(
    engine: EngineKind,
    output: OcrOutput,
    preset: Option<PreprocessParams>,
    metrics: OcrMetrics,
) -> RecognitionOutcome {
    let mut candidate = MrzTextNormalizer::find_candidate(&output.raw_text);
    if engine == EngineKind::Specialized {
        candidate = candidate.map(|c| {
            let boosted = c.confidence + 1;
            c.with_confidence(boosted)
        });
    }
    let parse = candidate.as_ref().map(MrzValidator::parse_candidate);
    RecognitionOutcome {
        engine,
        output,
        candidate,
        parse,
        preset,
        metrics,
        elapsed_ms: 0,
    }
}

/// Higher confidence wins; ties go to TD3, then to the specialised engine.
fn pick_best(
    general: Option<RecognitionOutcome>,
    specialized: Option<RecognitionOutcome>,
) -> Option<RecognitionOutcome> {
    match (general, specialized) {
        (Some(g), Some(s)) => match (&g.candidate, &s.candidate) {
            (Some(gc), Some(sc)) => {
                let rank = |c: &MrzCandidate| (c.confidence, c.format == DocumentFormat::TD3);
                if rank(gc) > rank(sc) {
                    Some(g)
                } else {
                    Some(s)
                }
            }
            (Some(_), None) => Some(g),
            (None, Some(_)) => Some(s),
            (None, None) => {
                if g.output.is_blank() && !s.output.is_blank() {
                    Some(s)
                } else {
                    Some(g)
                }
            }
        },
        (Some(g), None) => Some(g),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}
