use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{ObstacleKind, VoiceId, VoiceRole},
    SessionConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(pub u32);

/// Lifecycle of a note. Only [`NoteScheduler`] writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteState {
    #[default]
    Pending,
    Spawned,
    Holding,
    Judged,
    Missed,
}

impl NoteState {
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Judged | Self::Missed)
    }

    /// Whether a press may still claim a note in this state.
    pub fn is_judgeable(self) -> bool {
        matches!(self, Self::Pending | Self::Spawned)
    }

    fn can_become(self, next: Self) -> bool {
        use NoteState::*;
        matches!(
            (self, next),
            (Pending, Spawned)
                | (Pending | Spawned, Holding)
                | (Pending | Spawned | Holding, Judged)
                | (Pending | Spawned | Holding, Missed)
        )
    }
}

/// A single playable unit. Everything except the state is fixed when the
/// analyzer creates it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    /// Music time in seconds at which the note should be hit.
    pub hit_time: f64,
    /// Zero for taps, the hold length otherwise.
    pub duration: f64,
    pub lane: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub voice: VoiceId,
    pub role: VoiceRole,
    /// Merge priority of the originating voice; 0 is the highest.
    pub priority: u8,
    pub kind: ObstacleKind,
    #[serde(default)]
    pub(crate) state: NoteState,
}

impl Note {
    /// A hand-authored note outside any analysed voice.
    pub fn new(id: NoteId, hit_time: f64, duration: f64, lane: u8) -> Self {
        Self {
            id,
            hit_time,
            duration,
            lane,
            pitch: 0,
            velocity: 100,
            voice: VoiceId(0),
            role: VoiceRole::Unclassified,
            priority: 0,
            kind: ObstacleKind::Mid,
            state: NoteState::Pending,
        }
    }

    pub fn state(&self) -> NoteState {
        self.state
    }

    pub fn is_hold(&self) -> bool {
        self.duration > 0.0
    }

    pub fn end_time(&self) -> f64 {
        self.hit_time + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub note: Note,
    /// `note.hit_time - travel_time`.
    pub spawn_time: f64,
}

/// Notes that changed state during one [`NoteScheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub spawned: Vec<Note>,
    /// Spawned notes whose miss window elapsed without input.
    pub missed: Vec<Note>,
}

impl TickOutcome {
    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty() && self.missed.is_empty()
    }
}

/// Owns the session's notes and their schedule. Two cursors walk the
/// time-ordered entries (one for spawning, one for the miss sweep), so each
/// tick costs amortised constant work regardless of song length.
#[derive(Debug, Default)]
pub struct NoteScheduler {
    entries: Vec<ScheduleEntry>,
    index: HashMap<NoteId, usize>,
    travel_time: f64,
    miss_window: f64,
    spawn_cursor: usize,
    sweep_cursor: usize,
    started: bool,
}

impl NoteScheduler {
    pub fn new(config: &SessionConfig, notes: Vec<Note>) -> Self {
        let mut scheduler = Self {
            travel_time: config.travel.travel_time(),
            miss_window: config.judgment.miss,
            ..Self::default()
        };
        scheduler.set_notes(notes);
        scheduler
    }

    /// Replaces the schedule. Every note starts out pending.
    pub fn set_notes(&mut self, notes: Vec<Note>) {
        let travel_time = self.travel_time;
        self.entries = notes
            .into_iter()
            .map(|mut note| {
                note.state = NoteState::Pending;
                ScheduleEntry {
                    spawn_time: note.hit_time - travel_time,
                    note,
                }
            })
            .collect();
        self.entries.sort_by(|a, b| {
            a.note
                .hit_time
                .total_cmp(&b.note.hit_time)
                .then(a.note.id.cmp(&b.note.id))
        });
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.note.id, position))
            .collect();
        self.restart();
    }

    /// Rewinds both cursors and returns every note to pending.
    pub fn restart(&mut self) {
        for entry in &mut self.entries {
            entry.note.state = NoteState::Pending;
        }
        self.spawn_cursor = 0;
        self.sweep_cursor = 0;
        self.started = false;
    }

    pub fn travel_time(&self) -> f64 {
        self.travel_time
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> + '_ {
        self.entries.iter().map(|entry| &entry.note)
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.index.get(&id).map(|&position| &self.entries[position].note)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once every note has been judged or missed.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|entry| entry.note.state.is_resolved())
    }

    /// Spawns every pending note whose spawn time has been reached and sweeps
    /// spawned notes whose miss window has passed.
    pub fn tick(&mut self, now: f64) -> TickOutcome {
        TickOutcome {
            spawned: self.spawn_due(now),
            missed: self.sweep_missed(now),
        }
    }

    /// Spawning half of [`Self::tick`]. Marks the schedule as started.
    pub fn spawn_due(&mut self, now: f64) -> Vec<Note> {
        self.started = true;
        let mut spawned = Vec::new();

        while let Some(entry) = self.entries.get_mut(self.spawn_cursor) {
            if entry.spawn_time > now {
                break;
            }
            if entry.note.state == NoteState::Pending {
                entry.note.state = NoteState::Spawned;
                spawned.push(entry.note);
            }
            self.spawn_cursor += 1;
        }
        spawned
    }

    /// Miss-sweep half of [`Self::tick`].
    pub fn sweep_missed(&mut self, now: f64) -> Vec<Note> {
        let mut missed = Vec::new();

        while let Some(entry) = self.entries.get_mut(self.sweep_cursor) {
            if entry.note.hit_time + self.miss_window >= now {
                break;
            }
            // Holding notes belong to the judgment engine until released.
            if entry.note.state == NoteState::Spawned {
                entry.note.state = NoteState::Missed;
                missed.push(entry.note);
            }
            self.sweep_cursor += 1;
        }
        missed
    }

    /// Moves a note to `next` if the lifecycle allows it and returns the
    /// updated note. Invalid or unknown requests are ignored.
    pub fn transition(&mut self, id: NoteId, next: NoteState) -> Option<Note> {
        let position = *self.index.get(&id)?;
        let note = &mut self.entries[position].note;
        if !note.state.can_become(next) {
            tracing::trace!(?id, from = ?note.state, to = ?next, "ignored note transition");
            return None;
        }
        note.state = next;
        Some(*note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap(id: u32, hit_time: f64, lane: u8) -> Note {
        Note {
            id: NoteId(id),
            hit_time,
            duration: 0.0,
            lane,
            pitch: 60 + lane,
            velocity: 100,
            voice: VoiceId(0),
            role: VoiceRole::Melody,
            priority: 0,
            kind: ObstacleKind::Mid,
            state: NoteState::Pending,
        }
    }

    fn scheduler(notes: Vec<Note>) -> NoteScheduler {
        NoteScheduler::new(&SessionConfig::default(), notes)
    }

    #[test]
    fn spawn_time_is_hit_time_minus_travel() {
        let scheduler = scheduler(vec![tap(0, 10.0, 0), tap(1, 0.5, 1)]);
        for entry in scheduler.entries() {
            assert_eq!(entry.spawn_time, entry.note.hit_time - scheduler.travel_time());
            assert!(entry.spawn_time <= entry.note.hit_time);
        }
        // Sorted by hit time regardless of input order.
        assert_eq!(scheduler.entries()[0].note.id, NoteId(1));
    }

    #[test]
    fn spawns_exactly_at_spawn_time() {
        let mut scheduler = scheduler(vec![tap(0, 10.0, 0)]);
        assert!(scheduler.tick(7.999).spawned.is_empty());

        let outcome = scheduler.tick(8.0);
        assert_eq!(outcome.spawned.len(), 1);
        assert_eq!(outcome.spawned[0].state(), NoteState::Spawned);

        assert!(scheduler.tick(8.5).spawned.is_empty());
    }

    #[test]
    fn sweeps_unanswered_notes_once() {
        let mut scheduler = scheduler(vec![tap(0, 1.0, 0), tap(1, 1.2, 1)]);
        scheduler.tick(0.0);
        let miss = SessionConfig::default().judgment.miss;

        assert!(scheduler.tick(1.0 + miss).missed.is_empty());
        let outcome = scheduler.tick(1.0 + miss + 0.01);
        assert_eq!(outcome.missed.len(), 1);
        assert_eq!(outcome.missed[0].id, NoteId(0));
        assert_eq!(scheduler.note(NoteId(0)).unwrap().state(), NoteState::Missed);

        let outcome = scheduler.tick(5.0);
        assert_eq!(outcome.missed.len(), 1);
        assert!(scheduler.tick(6.0).is_empty());
        assert!(scheduler.is_complete());
    }

    #[test]
    fn sweep_leaves_holding_and_judged_notes_alone() {
        let mut scheduler = scheduler(vec![tap(0, 1.0, 0), tap(1, 1.1, 1)]);
        scheduler.tick(0.0);
        scheduler.transition(NoteId(0), NoteState::Judged).unwrap();
        scheduler.transition(NoteId(1), NoteState::Holding).unwrap();

        assert!(scheduler.tick(10.0).missed.is_empty());
        assert_eq!(scheduler.note(NoteId(1)).unwrap().state(), NoteState::Holding);
    }

    #[test]
    fn rejects_transitions_out_of_resolved_states() {
        let mut scheduler = scheduler(vec![tap(0, 1.0, 0)]);
        assert!(scheduler.transition(NoteId(0), NoteState::Missed).is_some());
        assert!(scheduler.transition(NoteId(0), NoteState::Judged).is_none());
        assert!(scheduler.transition(NoteId(0), NoteState::Spawned).is_none());
        assert!(scheduler.transition(NoteId(9), NoteState::Judged).is_none());
    }

    #[test]
    fn restart_rewinds_cursors() {
        let mut scheduler = scheduler(vec![tap(0, 3.0, 0)]);
        assert_eq!(scheduler.tick(2.0).spawned.len(), 1);
        scheduler.restart();
        assert!(!scheduler.is_started());
        assert_eq!(scheduler.note(NoteId(0)).unwrap().state(), NoteState::Pending);
        assert_eq!(scheduler.tick(2.0).spawned.len(), 1);
    }
}
