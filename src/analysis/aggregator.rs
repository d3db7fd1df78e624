use crate::models::MrzCandidate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorParams {
    pub min_count: u32,
    pub max_frames: u32,
    pub min_confidence: u8,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        AggregatorParams {
            min_count: 3,
            max_frames: 12,
            min_confidence: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bucket {
    best: MrzCandidate,
    count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstResult {
    pub candidate: MrzCandidate,
    pub count: u32,
    pub total_frames: u32,
    /// True when accepted because the frame cap was reached.
    pub forced: bool,
}

/// Cross-frame vote over candidates sharing the same filler-free text.
#[derive(Debug, Default)]
pub struct BurstAggregator {
    params: AggregatorParams,
    buckets: HashMap<String, Bucket>,
    total_frames: u32,
}

impl BurstAggregator {
    pub fn new(params: AggregatorParams) -> Self {
        BurstAggregator {
            params,
            buckets: HashMap::new(),
            total_frames: 0,
        }
    }

    /// Bucket key: MRZ text without line breaks or fillers.
    pub fn key_of(candidate: &MrzCandidate) -> String {
        candidate
            .as_mrz_text()
            .chars()
            .filter(|c| *c != '\n' && *c != '<')
            .collect()
    }

    /// Records one frame's outcome; returns a result once the burst is decided.
    ///
    /// Frames without a candidate neither vote nor count toward `max_frames`.
    pub fn add(&mut self, candidate: Option<MrzCandidate>) -> Option<BurstResult> {
        let candidate = candidate?;
        self.total_frames += 1;

        let key = Self::key_of(&candidate);
        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            best: candidate.clone(),
            count: 0,
        });
        bucket.count += 1;
        if candidate.confidence > bucket.best.confidence {
            bucket.best = candidate;
        }

        if bucket.count >= self.params.min_count && bucket.best.confidence >= self.params.min_confidence {
            let result = BurstResult {
                candidate: bucket.best.clone(),
                count: bucket.count,
                total_frames: self.total_frames,
                forced: false,
            };
            info!(
                "burst early accept after {} frames ({} votes)",
                result.total_frames, result.count
            );
            self.reset();
            return Some(result);
        }

        if self.total_frames >= self.params.max_frames {
            let forced = self
                .buckets
                .iter()
                .max_by(|(ka, a), (kb, b)| {
                    (a.best.confidence, a.count)
                        .cmp(&(b.best.confidence, b.count))
                        .then_with(|| kb.cmp(ka))
                })
                .map(|(_, b)| BurstResult {
                    candidate: b.best.clone(),
                    count: b.count,
                    total_frames: self.total_frames,
                    forced: true,
                });
            match &forced {
                Some(r) => info!(
                    "burst force accept at frame cap {} ({} votes, confidence {})",
                    r.total_frames, r.count, r.candidate.confidence
                ),
                None => debug!("burst frame cap reached with no candidates"),
            }
            self.reset();
            return forced;
        }
        None
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.total_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentFormat;

    fn candidate(line2: &str, confidence: u8) -> MrzCandidate {
        MrzCandidate {
            line1: "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<".to_string(),
            line2: line2.to_string(),
            line3: None,
            format: DocumentFormat::TD3,
            confidence,
        }
    }

    const L2: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    #[test]
    fn test_early_accept_on_third_vote() {
        let mut agg = BurstAggregator::new(AggregatorParams::default());
        assert!(agg.add(Some(candidate(L2, 4))).is_none());
        assert!(agg.add(Some(candidate(L2, 4))).is_none());
        let result = agg.add(Some(candidate(L2, 4))).unwrap();
        assert_eq!(result.count, 3);
        assert!(!result.forced);
        assert_eq!(agg.total_frames(), 0);
    }

    #[test]
    fn test_filler_noise_shares_a_bucket() {
        let a = candidate(L2, 3);
        let mut b = candidate(L2, 4);
        b.line1 = "P<UTOERIKSSON<ANNA<MARIA<<<<<<<<<<<<<<<<<<<<".to_string();
        assert_eq!(BurstAggregator::key_of(&a), BurstAggregator::key_of(&b));
    }

    #[test]
    fn test_low_confidence_waits_for_cap() {
        let mut agg = BurstAggregator::new(AggregatorParams::default());
        for _ in 0..11 {
            assert!(agg.add(Some(candidate(L2, 1))).is_none());
        }
        // an empty frame does not reach the cap
        assert!(agg.add(None).is_none());
        assert_eq!(agg.total_frames(), 11);

        let forced = agg.add(Some(candidate(L2, 1))).unwrap();
        assert!(forced.forced);
        assert_eq!(forced.count, 12);
        assert_eq!(forced.total_frames, 12);
    }

    #[test]
    fn test_force_accept_picks_highest_confidence() {
        let params = AggregatorParams {
            min_count: 5,
            max_frames: 4,
            min_confidence: 2,
        };
        let mut agg = BurstAggregator::new(params);
        let other = "X898902C36UTO7408122F1204159ZE184226B<<<<<10";
        agg.add(Some(candidate(other, 1)));
        agg.add(Some(candidate(other, 1)));
        agg.add(Some(candidate(L2, 3)));
        assert!(agg.add(None).is_none());
        let forced = agg.add(Some(candidate(other, 1))).unwrap();
        assert_eq!(forced.candidate.line2, L2);
        assert_eq!(forced.count, 1);
        assert_eq!(agg.bucket_count(), 0);
    }

    #[test]
    fn test_empty_frames_never_count() {
        let mut agg = BurstAggregator::new(AggregatorParams::default());
        assert!(agg.add(Some(candidate(L2, 4))).is_none());
        for _ in 0..30 {
            assert!(agg.add(None).is_none());
        }
        assert_eq!(agg.total_frames(), 1);
        assert_eq!(agg.bucket_count(), 1);
    }

    #[test]
    fn test_best_candidate_is_kept() {
        let mut agg = BurstAggregator::new(AggregatorParams::default());
        agg.add(Some(candidate(L2, 1)));
        agg.add(Some(candidate(L2, 3)));
        let result = agg.add(Some(candidate(L2, 2))).unwrap();
        assert_eq!(result.candidate.confidence, 3);
    }
}
