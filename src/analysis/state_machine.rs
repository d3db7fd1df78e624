use crate::models::{MrzKey, PipelineState};
use log::debug;

/// Consecutive identical keys needed for confirmation.
pub const CONFIRM_STREAK: u32 = 2;

/// Session lifecycle: searching, tracking, recognising, confirmed or timed out.
#[derive(Debug)]
pub struct MrzStateMachine {
    state: PipelineState,
    valid_streak: u32,
    last_key: Option<MrzKey>,
    confirmed_key: Option<MrzKey>,
    session_start_ms: Option<u64>,
}

impl Default for MrzStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MrzStateMachine {
    pub fn new() -> Self {
        MrzStateMachine {
            state: PipelineState::Searching,
            valid_streak: 0,
            last_key: None,
            confirmed_key: None,
            session_start_ms: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn valid_streak(&self) -> u32 {
        self.valid_streak
    }

    pub fn confirmed_key(&self) -> Option<&MrzKey> {
        self.confirmed_key.as_ref()
    }

    pub fn session_start_ms(&self) -> Option<u64> {
        self.session_start_ms
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == PipelineState::Confirmed
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            debug!("pipeline state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// First stable region of a session (or after a timeout) starts tracking.
    pub fn on_stable_box(&mut self, now_ms: u64) -> PipelineState {
        if matches!(self.state, PipelineState::Searching | PipelineState::Timeout) {
            self.valid_streak = 0;
            self.last_key = None;
            self.session_start_ms = Some(now_ms);
            self.transition(PipelineState::Tracking);
        }
        self.state
    }

    pub fn on_ocr_started(&mut self) -> PipelineState {
        if !matches!(self.state, PipelineState::Confirmed | PipelineState::Timeout) {
            self.transition(PipelineState::OcrRunning);
        }
        self.state
    }

    /// `key` is the validated identity of this attempt, `None` when it produced nothing usable.
    pub fn on_ocr_result(&mut self, key: Option<&MrzKey>) -> PipelineState {
        if self.state == PipelineState::Confirmed {
            return self.state;
        }
        match key {
            None => {
                self.valid_streak = 0;
                self.last_key = None;
                self.transition(PipelineState::OcrCooldown);
            }
            Some(k) => {
                if self.last_key.as_ref() == Some(k) {
                    self.valid_streak += 1;
                } else {
                    self.valid_streak = 1;
                    self.last_key = Some(k.clone());
                }
                if self.valid_streak >= CONFIRM_STREAK {
                    self.confirmed_key = Some(k.clone());
                    self.transition(PipelineState::Confirmed);
                } else {
                    self.transition(PipelineState::OcrCooldown);
                }
            }
        }
        self.state
    }

    /// Confirmation decided outside the streak rule, e.g. by the burst vote.
    pub fn force_confirm(&mut self, key: MrzKey) -> PipelineState {
        self.last_key = Some(key.clone());
        self.confirmed_key = Some(key);
        self.transition(PipelineState::Confirmed);
        self.state
    }

    pub fn on_timeout(&mut self) -> PipelineState {
        if self.state != PipelineState::Confirmed {
            self.valid_streak = 0;
            self.last_key = None;
            self.session_start_ms = None;
            self.transition(PipelineState::Timeout);
        }
        self.state
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
