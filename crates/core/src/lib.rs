//! Timing and judgment core for a lane-based rhythm game.
//!
//! A multi-voice track is reduced to a single playable [`NoteTimeline`] by the
//! [`TrackAnalyzer`]. A [`Session`] then drives that timeline once per frame:
//! the [`SyncClock`] turns the jittery audio position into a smooth music
//! time, the [`NoteScheduler`] spawns and sweeps notes, and the
//! [`JudgmentEngine`] classifies player input and keeps score. Rendering,
//! audio output and input capture live outside this crate.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod judgment;
pub mod session;
pub mod sync;
pub mod timeline;
pub mod track;

pub use analysis::{NoteTimeline, ObstacleKind, RoleAssignment, TrackAnalyzer, VoiceId, VoiceRole};
pub use audio::{AudioClock, CueScheduler, CueWorker, ManualClock, VoiceCue, VoiceSink};
pub use config::SessionConfig;
pub use error::{Result, RhythmError};
pub use judgment::{
    InputAction, InputEvent, Judgment, JudgmentEngine, JudgmentKind, JudgmentResult, ScoreBoard,
    ScoreSnapshot,
};
pub use session::{DespawnReason, PlayState, Session, SessionEvent};
pub use sync::{ClockSample, SyncClock};
pub use timeline::{Note, NoteId, NoteScheduler, NoteState};
pub use track::{RawEvent, TrackFile, VoiceData};
