//! Input judgment, combo and score.
//!
//! [`JudgmentEngine`] classifies presses and releases against the notes owned
//! by a [`NoteScheduler`]. It never writes note state itself; every change goes
//! through [`NoteScheduler::transition`]. Results are plain values and the
//! caller decides what sound or visual feedback they trigger.

mod score;

use serde::{Deserialize, Serialize};

pub use score::{ScoreBoard, ScoreSnapshot, TierCounts};

use crate::{
    config::JudgmentWindows,
    timeline::{Note, NoteId, NoteScheduler, NoteState},
    SessionConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgment {
    Perfect,
    Great,
    Good,
    Miss,
}

impl Judgment {
    pub fn is_hit(self) -> bool {
        self != Self::Miss
    }
}

/// What produced a [`JudgmentResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentKind {
    Tap,
    /// Press on a hold note; a release result follows.
    HoldStart,
    Release,
    /// Press with no note in reach.
    EmptyPress,
    /// Miss window elapsed without input.
    Expired,
    /// Hold never released; force-completed after the safety bound.
    HoldTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgmentResult {
    pub tier: Judgment,
    /// Seconds, negative when early.
    pub error: f64,
    pub note: Option<Note>,
    /// Combo after this result was applied.
    pub combo: u32,
    pub kind: JudgmentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Press,
    Release,
}

/// Player input, already translated to music time by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub lane: u8,
    pub action: InputAction,
    pub time: f64,
}

impl InputEvent {
    pub fn press(lane: u8, time: f64) -> Self {
        Self {
            lane,
            action: InputAction::Press,
            time,
        }
    }

    pub fn release(lane: u8, time: f64) -> Self {
        Self {
            lane,
            action: InputAction::Release,
            time,
        }
    }
}

/// Tier for an absolute timing error, or [`Judgment::Miss`] beyond the good
/// window.
pub fn classify(windows: &JudgmentWindows, error: f64) -> Judgment {
    let error = error.abs();
    if error <= windows.perfect {
        Judgment::Perfect
    } else if error <= windows.great {
        Judgment::Great
    } else if error <= windows.good {
        Judgment::Good
    } else {
        Judgment::Miss
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ActiveHold {
    note: NoteId,
    /// Press time; kept for release bookkeeping.
    grabbed_at: f64,
}

#[derive(Debug, Clone, Default)]
struct LaneState {
    /// Note ids in this lane, in hit order.
    notes: Vec<NoteId>,
    /// First note that may still be unjudged.
    cursor: usize,
    hold: Option<ActiveHold>,
}

#[derive(Debug, Clone)]
pub struct JudgmentEngine {
    windows: JudgmentWindows,
    lanes: Vec<LaneState>,
    score: ScoreBoard,
}

impl JudgmentEngine {
    pub fn new(config: &SessionConfig, notes: &NoteScheduler) -> Self {
        let highest_lane = notes.notes().map(|note| note.lane).max().unwrap_or(0);
        let lane_count = usize::from(config.analysis.lane_count).max(usize::from(highest_lane) + 1);
        let mut lanes = vec![LaneState::default(); lane_count];
        for note in notes.notes() {
            lanes[usize::from(note.lane)].notes.push(note.id);
        }

        Self {
            windows: config.judgment.clone(),
            lanes,
            score: ScoreBoard::new(config.scoring.clone()),
        }
    }

    pub fn score(&self) -> &ScoreBoard {
        &self.score
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// The note currently held in `lane`, if any.
    pub fn holding(&self, lane: u8) -> Option<NoteId> {
        self.lanes
            .get(usize::from(lane))
            .and_then(|state| state.hold)
            .map(|hold| hold.note)
    }

    /// Clears lane cursors, active holds and the score.
    pub fn restart(&mut self) {
        for lane in &mut self.lanes {
            lane.cursor = 0;
            lane.hold = None;
        }
        self.score.reset();
    }

    pub fn apply(&mut self, notes: &mut NoteScheduler, input: InputEvent) -> Option<JudgmentResult> {
        match input.action {
            InputAction::Press => self.judge(notes, input.lane, input.time),
            InputAction::Release => self.release(notes, input.lane, input.time),
        }
    }

    /// Judges a press in `lane` at music time `now`.
    ///
    /// Returns `None` before scheduling has started, for unknown lanes and
    /// while the lane is already holding a note.
    pub fn judge(&mut self, notes: &mut NoteScheduler, lane: u8, now: f64) -> Option<JudgmentResult> {
        if !notes.is_started() {
            return None;
        }
        let miss_window = self.windows.miss;
        let state = self.lanes.get_mut(usize::from(lane))?;
        if state.hold.is_some() {
            return None;
        }

        while let Some(id) = state.notes.get(state.cursor) {
            match notes.note(*id) {
                Some(note) if note.state().is_judgeable() => break,
                _ => state.cursor += 1,
            }
        }

        // Nearest note wins; equal distance goes to the earlier note.
        let mut target: Option<(f64, Note)> = None;
        for id in &state.notes[state.cursor..] {
            let Some(note) = notes.note(*id) else {
                continue;
            };
            if note.hit_time - now > miss_window {
                break;
            }
            let distance = (now - note.hit_time).abs();
            if !note.state().is_judgeable() || distance > miss_window {
                continue;
            }
            let closer = match &target {
                Some((best, best_note)) => {
                    distance < *best || (distance == *best && note.hit_time < best_note.hit_time)
                }
                None => true,
            };
            if closer {
                target = Some((distance, *note));
            }
        }

        let Some((_, note)) = target else {
            return Some(self.empty_press(now));
        };

        let error = now - note.hit_time;
        // A note found inside the miss window is always a hit.
        let tier = match classify(&self.windows, error) {
            Judgment::Miss => Judgment::Good,
            tier => tier,
        };
        let (next, kind) = if note.is_hold() {
            (NoteState::Holding, JudgmentKind::HoldStart)
        } else {
            (NoteState::Judged, JudgmentKind::Tap)
        };
        let note = notes.transition(note.id, next)?;
        if next == NoteState::Holding {
            state.hold = Some(ActiveHold {
                note: note.id,
                grabbed_at: now,
            });
        }

        Some(self.resolve(tier, error, Some(note), kind))
    }

    /// Judges a release in `lane`. Returns `None` when the lane holds nothing.
    pub fn release(&mut self, notes: &mut NoteScheduler, lane: u8, now: f64) -> Option<JudgmentResult> {
        if !notes.is_started() {
            return None;
        }
        let hold = self.lanes.get_mut(usize::from(lane))?.hold.take()?;
        let note = *notes.note(hold.note)?;

        let error = now - note.end_time();
        let tier = if error.abs() <= self.windows.release {
            // Release timing is harder to perceive, so the error is scaled
            // down, and anything inside the window counts as a hit.
            match classify(&self.windows, error / self.windows.release_tolerance) {
                Judgment::Miss => Judgment::Good,
                tier => tier,
            }
        } else {
            Judgment::Miss
        };
        tracing::trace!(
            note = ?note.id,
            held_for = now - hold.grabbed_at,
            ?tier,
            "hold released"
        );

        let next = if tier.is_hit() {
            NoteState::Judged
        } else {
            NoteState::Missed
        };
        let note = notes.transition(note.id, next)?;
        Some(self.resolve(tier, error, Some(note), JudgmentKind::Release))
    }

    /// Force-completes holds still active past `end + release + safety`.
    pub fn sweep_holds(&mut self, notes: &mut NoteScheduler, now: f64) -> Vec<JudgmentResult> {
        let deadline = self.windows.release + self.windows.hold_safety;
        let mut expired = Vec::new();

        for state in &mut self.lanes {
            let Some(hold) = state.hold else {
                continue;
            };
            let Some(note) = notes.note(hold.note).copied() else {
                state.hold = None;
                continue;
            };
            if now >= note.end_time() + deadline {
                state.hold = None;
                if let Some(note) = notes.transition(note.id, NoteState::Missed) {
                    tracing::debug!(note = ?note.id, lane = note.lane, "hold never released");
                    expired.push((note, now - note.end_time()));
                }
            }
        }

        expired
            .into_iter()
            .map(|(note, error)| {
                self.resolve(Judgment::Miss, error, Some(note), JudgmentKind::HoldTimeout)
            })
            .collect()
    }

    /// Records a note the scheduler swept as missed.
    pub fn record_miss(&mut self, note: Note, now: f64) -> JudgmentResult {
        self.resolve(Judgment::Miss, now - note.hit_time, Some(note), JudgmentKind::Expired)
    }

    fn empty_press(&mut self, now: f64) -> JudgmentResult {
        let combo = if self.windows.empty_press_breaks_combo {
            self.score.apply(Judgment::Miss, None)
        } else {
            self.score.combo()
        };
        self.score.record_empty_press();
        tracing::trace!(now, "press with no note in reach");

        JudgmentResult {
            tier: Judgment::Miss,
            error: 0.0,
            note: None,
            combo,
            kind: JudgmentKind::EmptyPress,
        }
    }

    fn resolve(
        &mut self,
        tier: Judgment,
        error: f64,
        note: Option<Note>,
        kind: JudgmentKind,
    ) -> JudgmentResult {
        let combo = self.score.apply(tier, tier.is_hit().then_some(error));
        JudgmentResult {
            tier,
            error,
            note,
            combo,
            kind,
        }
    }
}
