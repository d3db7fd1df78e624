use crate::models::{MrzBox, TrackResult};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// EMA weight of the newest box.
    pub alpha: f32,
    pub iou_threshold: f32,
    pub stable_streak: u32,
    pub window: usize,
    /// Consecutive rejected boxes after which the averager starts over.
    pub max_outliers: u32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        TrackerParams {
            alpha: 0.5,
            iou_threshold: 0.7,
            stable_streak: 3,
            window: 6,
            max_outliers: 3,
        }
    }
}

/// Exponential smoothing plus an IoU streak counter.
#[derive(Debug)]
pub struct MrzTracker {
    params: TrackerParams,
    previous: Option<MrzBox>,
    stable_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityUpdate {
    pub smoothed: MrzBox,
    pub stable_count: u32,
    pub stable: bool,
    pub jitter: f32,
}

impl MrzTracker {
    pub fn new(params: TrackerParams) -> Self {
        MrzTracker {
            params,
            previous: None,
            stable_count: 0,
        }
    }

    pub fn update(&mut self, candidate: MrzBox) -> StabilityUpdate {
        let (smoothed, jitter) = match self.previous {
            None => {
                self.stable_count = 0;
                (candidate, 0.0)
            }
            Some(prev) => {
                let iou = prev.iou(&candidate);
                if iou >= self.params.iou_threshold {
                    self.stable_count += 1;
                    (ema(prev, candidate, self.params.alpha), 1.0 - iou)
                } else {
                    if self.stable_count > 0 {
                        debug!("tracker: iou {:.2} below threshold, streak reset", iou);
                    }
                    self.stable_count = 0;
                    (candidate, 1.0 - iou)
                }
            }
        };
        self.previous = Some(smoothed);
        StabilityUpdate {
            smoothed,
            stable_count: self.stable_count,
            stable: self.stable_count >= self.params.stable_streak,
            jitter,
        }
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.stable_count = 0;
    }
}

fn ema(prev: MrzBox, next: MrzBox, alpha: f32) -> MrzBox {
    let mix = |p: f32, n: f32| alpha * n + (1.0 - alpha) * p;
    MrzBox {
        left: mix(prev.left, next.left),
        top: mix(prev.top, next.top),
        right: mix(prev.right, next.right),
        bottom: mix(prev.bottom, next.bottom),
    }
}

/// Bounded window of accepted boxes; the crop region is their mean.
#[derive(Debug)]
pub struct BoxAverager {
    params: TrackerParams,
    window: VecDeque<MrzBox>,
    last_stable: Option<MrzBox>,
    outliers: u32,
}

impl BoxAverager {
    pub fn new(params: TrackerParams) -> Self {
        BoxAverager {
            window: VecDeque::with_capacity(params.window),
            params,
            last_stable: None,
            outliers: 0,
        }
    }

    pub fn update(&mut self, candidate: MrzBox, frame_w: u32, frame_h: u32) -> MrzBox {
        let candidate = candidate.clamp_to(frame_w, frame_h);

        if let Some(last) = self.last_stable {
            if last.iou(&candidate) < self.params.iou_threshold && !self.window.is_empty() {
                self.outliers += 1;
                if self.outliers < self.params.max_outliers {
                    return last;
                }
                debug!("averager: {} outliers in a row, restarting window", self.outliers);
                self.window.clear();
            }
        }

        self.outliers = 0;
        if self.window.len() >= self.params.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(candidate);
        let averaged = self.average().clamp_to(frame_w, frame_h);
        self.last_stable = Some(averaged);
        averaged
    }

    fn average(&self) -> MrzBox {
        let n = self.window.len().max(1) as f32;
        let (l, t, r, b) = self.window.iter().fold((0.0, 0.0, 0.0, 0.0), |acc, bx| {
            (acc.0 + bx.left, acc.1 + bx.top, acc.2 + bx.right, acc.3 + bx.bottom)
        });
        MrzBox {
            left: l / n,
            top: t / n,
            right: r / n,
            bottom: b / n,
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.last_stable = None;
        self.outliers = 0;
    }
}

/// Stability tracking and crop averaging for one capture session.
#[derive(Debug)]
pub struct RoiTracker {
    tracker: MrzTracker,
    averager: BoxAverager,
}

impl RoiTracker {
    pub fn new(params: TrackerParams) -> Self {
        RoiTracker {
            tracker: MrzTracker::new(params),
            averager: BoxAverager::new(params),
        }
    }

    pub fn update(&mut self, detected: MrzBox, frame_w: u32, frame_h: u32) -> TrackResult {
        let clamped = detected.clamp_to(frame_w, frame_h);
        let stability = self.tracker.update(clamped);
        let averaged = self.averager.update(clamped, frame_w, frame_h);
        TrackResult {
            stable: stability.stable,
            stable_count: stability.stable_count,
            jitter: stability.jitter,
            smoothed: stability.smoothed,
            averaged,
        }
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.averager.reset();
    }
}
