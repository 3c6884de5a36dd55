//! One play-through of a timeline.
//!
//! A [`Session`] owns every mutable piece of game state and is driven by a
//! single caller, once per rendered frame, through [`Session::tick`]. Input
//! callbacks either queue events for the next tick or apply them immediately;
//! in both cases all mutation happens on the driving thread.

use std::{collections::VecDeque, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::NoteTimeline,
    audio::CueScheduler,
    judgment::{InputEvent, JudgmentEngine, JudgmentResult, ScoreBoard, ScoreSnapshot},
    sync::SyncClock,
    timeline::{Note, NoteId, NoteScheduler, NoteState},
    Result, SessionConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DespawnReason {
    Judged,
    Missed,
}

/// Something the presentation layer should react to, in the order it
/// happened within a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    NoteSpawned { note: Note },
    /// Carries the note in its resolved state.
    NoteDespawned { note: Note, reason: DespawnReason },
    Judged { result: JudgmentResult },
    ScoreChanged { score: ScoreSnapshot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct Despawn {
    at: f64,
    note: Note,
    reason: DespawnReason,
}

pub struct Session {
    config: SessionConfig,
    notes: Arc<[Note]>,
    scheduler: NoteScheduler,
    clock: SyncClock,
    judgment: JudgmentEngine,
    input: VecDeque<InputEvent>,
    despawns: Vec<Despawn>,
    published: ScoreSnapshot,
    state: PlayState,
}

impl Session {
    /// Builds a session over `timeline`. Nothing is constructed when the
    /// configuration is invalid or the timeline has no notes.
    pub fn new(config: SessionConfig, timeline: NoteTimeline) -> Result<Self> {
        config.validate()?;
        timeline.ensure_playable()?;

        let notes: Arc<[Note]> = timeline.notes.into();
        let scheduler = NoteScheduler::new(&config, notes.to_vec());
        let clock = SyncClock::new(&config.sync);
        let judgment = JudgmentEngine::new(&config, &scheduler);
        let published = judgment.score().snapshot();

        tracing::info!(
            notes = notes.len(),
            lanes = judgment.lane_count(),
            travel_time = scheduler.travel_time(),
            "session ready"
        );

        Ok(Self {
            config,
            notes,
            scheduler,
            clock,
            judgment,
            input: VecDeque::new(),
            despawns: Vec::new(),
            published,
            state: PlayState::Playing,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only snapshot of the committed notes.
    pub fn notes(&self) -> Arc<[Note]> {
        self.notes.clone()
    }

    /// A look-ahead cue scheduler over the committed notes.
    pub fn cue_scheduler(&self) -> CueScheduler {
        CueScheduler::new(&self.config.audio, self.notes())
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.scheduler.note(id)
    }

    pub fn note_state(&self, id: NoteId) -> Option<NoteState> {
        self.note(id).map(Note::state)
    }

    pub fn score(&self) -> &ScoreBoard {
        self.judgment.score()
    }

    /// Current music time.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    /// True once every note is resolved and has left the screen.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_complete() && self.despawns.is_empty()
    }

    /// Advances the session by one frame.
    ///
    /// `raw_audio_time` is the audio player's reported position and
    /// `frame_delta` the wall-clock time since the previous tick.
    pub fn tick(&mut self, raw_audio_time: f64, frame_delta: f64) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state != PlayState::Playing {
            return events;
        }

        let now = self
            .clock
            .sample(raw_audio_time - self.config.session.audio_offset, frame_delta);

        events.extend(
            self.scheduler
                .spawn_due(now)
                .into_iter()
                .map(|note| SessionEvent::NoteSpawned { note }),
        );

        // Input carries its own timestamp, so it is judged before the sweep
        // can expire a note it pressed in time.
        while let Some(input) = self.input.pop_front() {
            if let Some(result) = self.judgment.apply(&mut self.scheduler, input) {
                self.push_result(result, &mut events);
            }
        }

        for note in self.scheduler.sweep_missed(now) {
            let result = self.judgment.record_miss(note, now);
            self.push_result(result, &mut events);
        }

        for result in self.judgment.sweep_holds(&mut self.scheduler, now) {
            self.push_result(result, &mut events);
        }

        self.despawns.retain(|despawn| {
            if despawn.at <= now {
                events.push(SessionEvent::NoteDespawned {
                    note: despawn.note,
                    reason: despawn.reason,
                });
                false
            } else {
                true
            }
        });

        if self.is_finished() {
            tracing::debug!(now, score = self.score().score(), "all notes resolved");
        }
        events
    }

    /// Queues input for the next tick.
    pub fn queue_input(&mut self, input: InputEvent) {
        if self.state == PlayState::Playing {
            self.input.push_back(input);
        }
    }

    /// Judges a press immediately.
    pub fn press(&mut self, lane: u8, time: f64) -> Vec<SessionEvent> {
        self.apply_now(InputEvent::press(lane, time))
    }

    /// Judges a release immediately.
    pub fn release(&mut self, lane: u8, time: f64) -> Vec<SessionEvent> {
        self.apply_now(InputEvent::release(lane, time))
    }

    /// Freezes the clock; no timing window elapses while paused.
    pub fn pause(&mut self) {
        if self.state == PlayState::Playing {
            self.state = PlayState::Paused;
            tracing::debug!(now = self.now(), "session paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlayState::Paused {
            self.state = PlayState::Playing;
            tracing::debug!(now = self.now(), "session resumed");
        }
    }

    /// Abandons the session. Active holds are dropped as they are and every
    /// later tick or input is ignored.
    pub fn stop(&mut self) {
        if self.state != PlayState::Stopped {
            self.state = PlayState::Stopped;
            self.input.clear();
            tracing::info!(
                now = self.now(),
                score = self.score().score(),
                "session stopped"
            );
        }
    }

    /// Rewinds every component to the start.
    pub fn restart(&mut self) {
        self.scheduler.restart();
        self.clock.reset();
        self.judgment.restart();
        self.input.clear();
        self.despawns.clear();
        self.published = self.judgment.score().snapshot();
        self.state = PlayState::Playing;
        tracing::info!("session restarted");
    }

    fn apply_now(&mut self, input: InputEvent) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state != PlayState::Playing {
            return events;
        }
        if let Some(result) = self.judgment.apply(&mut self.scheduler, input) {
            self.push_result(result, &mut events);
        }
        events
    }

    fn push_result(&mut self, result: JudgmentResult, events: &mut Vec<SessionEvent>) {
        if let Some(note) = result.note {
            match note.state() {
                NoteState::Judged => self.despawns.push(Despawn {
                    at: f64::NEG_INFINITY,
                    note,
                    reason: DespawnReason::Judged,
                }),
                // Missed notes keep scrolling past the line before leaving.
                NoteState::Missed => self.despawns.push(Despawn {
                    at: note.end_time() + self.config.session.despawn_delay,
                    note,
                    reason: DespawnReason::Missed,
                }),
                _ => {}
            }
        }

        events.push(SessionEvent::Judged { result });

        let score = self.judgment.score().snapshot();
        if score != self.published {
            self.published = score;
            events.push(SessionEvent::ScoreChanged { score });
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("notes", &self.notes.len())
            .field("now", &self.now())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::VoiceCue,
        judgment::{Judgment, JudgmentKind},
        RhythmError,
    };

    const FRAME: f64 = 1.0 / 60.0;

    fn session(notes: Vec<Note>) -> Session {
        Session::new(SessionConfig::default(), NoteTimeline::from_notes(notes)).unwrap()
    }

    fn tap(hit_time: f64, lane: u8) -> Note {
        Note::new(NoteId(0), hit_time, 0.0, lane)
    }

    /// Ticks with the audio clock in lockstep until `until`.
    fn run(session: &mut Session, until: f64) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let mut time = session.now();
        while time < until {
            time += FRAME;
            events.extend(session.tick(time, FRAME));
        }
        events
    }

    #[test]
    fn empty_timeline_is_rejected() {
        let err = Session::new(SessionConfig::default(), NoteTimeline::default()).unwrap_err();
        assert!(matches!(err, RhythmError::NoPlayableContent { .. }));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = SessionConfig::default();
        config.judgment.great = 0.01;
        let err = Session::new(config, NoteTimeline::from_notes(vec![tap(1.0, 0)])).unwrap_err();
        assert!(matches!(err, RhythmError::InvalidConfig(_)));
    }

    #[test]
    fn hit_note_is_judged_and_despawned() {
        let mut session = session(vec![tap(1.0, 0)]);
        let spawned = session.tick(0.0, 0.0);
        assert!(matches!(spawned[0], SessionEvent::NoteSpawned { .. }));

        let events = session.press(0, 1.02);
        assert!(matches!(
            events[0],
            SessionEvent::Judged { result } if result.tier == Judgment::Perfect
        ));
        assert!(matches!(events[1], SessionEvent::ScoreChanged { score } if score.score == 100));

        let events = session.tick(FRAME, FRAME);
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::NoteDespawned { note, reason } => {
                assert_eq!(note.id, NoteId(0));
                assert_eq!(note.state(), NoteState::Judged);
                assert_eq!(*reason, DespawnReason::Judged);
            }
            other => panic!("expected a despawn, got {other:?}"),
        }
        assert!(session.is_finished());
    }

    #[test]
    fn unanswered_note_is_missed_then_despawned_later() {
        let mut session = session(vec![tap(1.0, 2)]);
        let events = run(&mut session, 1.4);

        let missed = events.iter().find_map(|event| match event {
            SessionEvent::Judged { result } => Some(*result),
            _ => None,
        });
        let missed = missed.expect("note should have been missed");
        assert_eq!(missed.tier, Judgment::Miss);
        assert_eq!(session.note_state(NoteId(0)), Some(NoteState::Missed));
        assert!(!session.is_finished());

        let events = run(&mut session, 1.6);
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::NoteDespawned { note, reason: DespawnReason::Missed }
                if note.id == NoteId(0) && note.state() == NoteState::Missed
        )));
        assert!(session.is_finished());
    }

    #[test]
    fn queued_input_is_judged_on_next_tick() {
        let mut session = session(vec![tap(0.5, 1)]);
        run(&mut session, 0.45);
        session.queue_input(InputEvent::press(1, 0.5));
        let events = session.tick(session.now() + FRAME, FRAME);
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::Judged { result } if result.tier == Judgment::Perfect)));
    }

    #[test]
    fn queued_press_beats_miss_sweep_on_a_long_frame() {
        let mut session = session(vec![tap(1.0, 0)]);
        run(&mut session, 1.3);
        session.queue_input(InputEvent::press(0, 1.3));

        // One long frame carries the clock past the miss window.
        let events = session.tick(session.now() + 0.2, 0.2);
        assert!(session.now() > 1.0 + session.config().judgment.miss);

        let judged: Vec<JudgmentResult> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Judged { result } => Some(*result),
                _ => None,
            })
            .collect();
        assert_eq!(judged.len(), 1);
        assert_eq!(judged[0].tier, Judgment::Good);
        assert_eq!(judged[0].kind, JudgmentKind::Tap);
        assert_eq!(session.note_state(NoteId(0)), Some(NoteState::Judged));
        assert_eq!(session.score().counts().miss, 0);
    }

    #[test]
    fn pause_freezes_timing() {
        let mut session = session(vec![tap(1.0, 0)]);
        run(&mut session, 0.9);
        session.pause();
        let frozen = session.now();

        for _ in 0..120 {
            assert!(session.tick(5.0, FRAME).is_empty());
        }
        assert_eq!(session.now(), frozen);
        assert_eq!(session.note_state(NoteId(0)), Some(NoteState::Spawned));
        assert!(session.press(0, 1.0).is_empty());

        session.resume();
        let events = session.press(0, 1.0);
        assert!(matches!(events[0], SessionEvent::Judged { .. }));
    }

    #[test]
    fn stop_abandons_holds() {
        let mut session = session(vec![Note::new(NoteId(0), 0.5, 2.0, 0)]);
        run(&mut session, 0.5);
        session.press(0, 0.5);
        session.stop();

        assert!(session.tick(10.0, FRAME).is_empty());
        assert_eq!(session.note_state(NoteId(0)), Some(NoteState::Holding));
        assert_eq!(session.state(), PlayState::Stopped);
    }

    #[test]
    fn restart_rewinds_everything() {
        let mut session = session(vec![tap(0.5, 0)]);
        run(&mut session, 0.5);
        session.press(0, 0.5);
        assert_eq!(session.score().score(), 100);

        session.restart();
        assert_eq!(session.score().score(), 0);
        assert_eq!(session.now(), 0.0);
        assert_eq!(session.note_state(NoteId(0)), Some(NoteState::Pending));
        assert_eq!(session.tick(0.0, 0.0).len(), 1);
    }

    #[test]
    fn cue_scheduler_shares_committed_notes() {
        let session = session(vec![tap(0.5, 0), tap(0.05, 1)]);
        let mut cues = session.cue_scheduler();
        let mut sink: Vec<(VoiceCue, f64)> = Vec::new();
        cues.pump(0.0, &mut sink);
        assert_eq!(sink.len(), 1);
        assert!(Arc::ptr_eq(&session.notes(), &session.notes));
    }
}
