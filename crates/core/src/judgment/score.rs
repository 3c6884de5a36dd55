use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::Judgment;
use crate::config::ScoringConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub perfect: u32,
    pub great: u32,
    pub good: u32,
    pub miss: u32,
}

impl TierCounts {
    pub fn total(&self) -> u32 {
        self.perfect + self.great + self.good + self.miss
    }

    fn bump(&mut self, tier: Judgment) {
        match tier {
            Judgment::Perfect => self.perfect += 1,
            Judgment::Great => self.great += 1,
            Judgment::Good => self.good += 1,
            Judgment::Miss => self.miss += 1,
        }
    }
}

/// Score and combo at one instant, as published to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
}

/// Running score, combo and per-tier statistics for one session.
#[derive(Debug, Clone)]
pub struct ScoreBoard {
    scoring: ScoringConfig,
    score: u64,
    combo: u32,
    max_combo: u32,
    counts: TierCounts,
    empty_presses: u32,
    recent_errors: VecDeque<f64>,
}

impl ScoreBoard {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self {
            scoring,
            score: 0,
            combo: 0,
            max_combo: 0,
            counts: TierCounts::default(),
            empty_presses: 0,
            recent_errors: VecDeque::new(),
        }
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn combo(&self) -> u32 {
        self.combo
    }

    pub fn max_combo(&self) -> u32 {
        self.max_combo
    }

    pub fn counts(&self) -> TierCounts {
        self.counts
    }

    pub fn empty_presses(&self) -> u32 {
        self.empty_presses
    }

    /// Timing errors of recent hits, oldest first.
    pub fn recent_errors(&self) -> impl Iterator<Item = f64> + '_ {
        self.recent_errors.iter().copied()
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            score: self.score,
            combo: self.combo,
            max_combo: self.max_combo,
        }
    }

    /// Weighted hit accuracy in percent, 100 before any judgment.
    pub fn accuracy(&self) -> f64 {
        let total = self.counts.total();
        if total == 0 {
            return 100.0;
        }
        let weighted = f64::from(self.counts.perfect) * 100.0
            + f64::from(self.counts.great) * 75.0
            + f64::from(self.counts.good) * 50.0;
        weighted / f64::from(total)
    }

    /// Applies one judgment and returns the combo afterwards.
    ///
    /// Hits extend the combo and earn the tier's base score times the
    /// multiplier for the new combo; misses reset it.
    pub fn apply(&mut self, tier: Judgment, error: Option<f64>) -> u32 {
        self.counts.bump(tier);

        if tier == Judgment::Miss {
            self.combo = 0;
            self.score += u64::from(self.scoring.miss);
            return self.combo;
        }

        self.combo += 1;
        self.max_combo = self.max_combo.max(self.combo);
        let base = match tier {
            Judgment::Perfect => self.scoring.perfect,
            Judgment::Great => self.scoring.great,
            _ => self.scoring.good,
        };
        self.score += (f64::from(base) * self.scoring.multiplier(self.combo)) as u64;

        if let Some(error) = error {
            if self.scoring.history_len > 0 {
                if self.recent_errors.len() == self.scoring.history_len {
                    self.recent_errors.pop_front();
                }
                self.recent_errors.push_back(error);
            }
        }
        self.combo
    }

    pub(crate) fn record_empty_press(&mut self) {
        self.empty_presses += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.scoring));
    }
}
