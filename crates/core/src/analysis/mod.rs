//! Voice selection and obstacle timeline generation.
//!
//! The analyzer scores every voice of a [`TrackFile`], picks one melody, one
//! bass and one rhythm voice, and merges them into a single time-ordered
//! timeline. The melody is placed unconditionally; the other roles only fill
//! gaps the higher-priority layers left open.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::{AnalysisConfig, RoleWeights},
    timeline::{Note, NoteId, NoteState},
    track::{RawEvent, TrackFile, VoiceData},
    Result, RhythmError,
};

const BASS_PROGRAMS: std::ops::RangeInclusive<u8> = 32..=39;
const LOW_REGISTER_CEILING: u8 = 48;
const MID_REGISTER_CEILING: u8 = 72;

/// Index of a voice in the source track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceId(pub usize);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceRole {
    Melody,
    Bass,
    Rhythm,
    Unclassified,
}

/// Gameplay subtype of a note. Rhythm notes take theirs from the drum that
/// was hit; melodic notes from their register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    Kick,
    Snare,
    HiHat,
    Cymbal,
    Low,
    Mid,
    High,
}

impl ObstacleKind {
    /// General MIDI percussion key map. Unlisted drums produce no note.
    pub fn from_drum(key: u8) -> Option<Self> {
        match key {
            35 | 36 => Some(Self::Kick),
            38 | 40 => Some(Self::Snare),
            42 | 44 | 46 => Some(Self::HiHat),
            49 | 51 | 52 | 55 | 57 | 59 => Some(Self::Cymbal),
            _ => None,
        }
    }

    pub fn from_pitch(pitch: u8) -> Self {
        if pitch < LOW_REGISTER_CEILING {
            Self::Low
        } else if pitch < MID_REGISTER_CEILING {
            Self::Mid
        } else {
            Self::High
        }
    }
}

/// A source voice under consideration. Only lives while roles are chosen.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: VoiceId,
    pub name: String,
    pub events: Vec<RawEvent>,
    pub percussive: bool,
    /// Declared program, or one inferred from the voice name.
    pub program: u8,
    pub role: VoiceRole,
    pub role_score: f64,
    melody_score: Option<f64>,
    bass_score: Option<f64>,
}

impl Voice {
    pub fn average_pitch(&self) -> f64 {
        average_pitch(&self.events)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub melody: Option<VoiceId>,
    pub bass: Option<VoiceId>,
    pub rhythm: Option<VoiceId>,
}

impl RoleAssignment {
    /// Selected voices from highest to lowest merge priority.
    pub fn layers(&self) -> Vec<(VoiceId, VoiceRole)> {
        [
            (self.melody, VoiceRole::Melody),
            (self.bass, VoiceRole::Bass),
            (self.rhythm, VoiceRole::Rhythm),
        ]
        .into_iter()
        .filter_map(|(voice, role)| voice.map(|id| (id, role)))
        .collect()
    }
}

/// Output of [`TrackAnalyzer::analyze`]: the merged, time-ordered notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteTimeline {
    pub notes: Vec<Note>,
    pub roles: RoleAssignment,
    pub tempo_bpm: f64,
    pub duration: f64,
}

impl NoteTimeline {
    /// Wraps hand-authored notes, sorted by hit time and numbered in order.
    pub fn from_notes(mut notes: Vec<Note>) -> Self {
        notes.sort_by(|a, b| a.hit_time.total_cmp(&b.hit_time));
        for (index, note) in notes.iter_mut().enumerate() {
            note.id = NoteId(index as u32);
            note.state = NoteState::Pending;
        }
        let duration = notes.iter().map(Note::end_time).fold(0.0, f64::max);
        Self {
            notes,
            roles: RoleAssignment::default(),
            tempo_bpm: crate::track::DEFAULT_TEMPO_BPM,
            duration,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Signals [`RhythmError::NoPlayableContent`] for an empty timeline.
    pub fn ensure_playable(&self) -> Result<()> {
        if self.notes.is_empty() {
            Err(RhythmError::no_playable_content())
        } else {
            Ok(())
        }
    }

    /// Number of notes per lane, for difficulty summaries.
    pub fn lane_histogram(&self, lane_count: u8) -> Vec<usize> {
        let mut lanes = vec![0; usize::from(lane_count)];
        for note in &self.notes {
            if let Some(count) = lanes.get_mut(usize::from(note.lane)) {
                *count += 1;
            }
        }
        lanes
    }
}

#[derive(Debug)]
pub struct TrackAnalyzer<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> TrackAnalyzer<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Builds the obstacle timeline for a track. A track with no voice above
    /// the minimum event count yields an empty timeline; callers surface that
    /// through [`NoteTimeline::ensure_playable`].
    pub fn analyze(&self, track: &TrackFile) -> NoteTimeline {
        let voices = self.score_voices(track);
        let mut timeline = NoteTimeline {
            notes: Vec::new(),
            roles: RoleAssignment::default(),
            tempo_bpm: track.tempo_bpm,
            duration: track.duration(),
        };

        if voices.is_empty() {
            tracing::warn!(track = %track.name, "no voice passed the minimum event filter");
            return timeline;
        }

        timeline.roles = assign_roles(&voices);
        tracing::info!(
            melody = ?timeline.roles.melody,
            bass = ?timeline.roles.bass,
            rhythm = ?timeline.roles.rhythm,
            "roles assigned"
        );

        let merged = self.merge_layers(&voices, &timeline.roles);
        timeline.notes = self.guard_lanes(merged);
        tracing::info!(notes = timeline.notes.len(), "timeline generated");
        timeline
    }

    /// Filters noise voices, scores the rest and tags each with the role it
    /// would be given by [`Self::analyze`].
    pub fn score_voices(&self, track: &TrackFile) -> Vec<Voice> {
        let weights = &self.config.weights;
        let mut voices = Vec::new();

        for (index, data) in track.voices.iter().enumerate() {
            if data.events.len() < self.config.min_events {
                tracing::debug!(
                    voice = index,
                    events = data.events.len(),
                    "discarding voice below minimum event count"
                );
                continue;
            }
            voices.push(score_voice(VoiceId(index), data, weights));
        }

        let roles = assign_roles(&voices);
        for voice in &mut voices {
            let role = if roles.melody == Some(voice.id) {
                VoiceRole::Melody
            } else if roles.bass == Some(voice.id) {
                VoiceRole::Bass
            } else if roles.rhythm == Some(voice.id) {
                VoiceRole::Rhythm
            } else {
                VoiceRole::Unclassified
            };
            voice.role = role;
        }
        voices
    }

    /// Configured lane count; a zero count collapses to a single lane.
    fn lane_count(&self) -> u8 {
        self.config.lane_count.max(1)
    }

    fn merge_layers(&self, voices: &[Voice], roles: &RoleAssignment) -> Vec<Note> {
        let gap = self.config.gap_buffer;
        let mut placed = PlacedIntervals::default();
        let mut notes = Vec::new();

        for (priority, (voice_id, role)) in roles.layers().into_iter().enumerate() {
            let Some(voice) = voices.iter().find(|voice| voice.id == voice_id) else {
                continue;
            };
            let priority = priority as u8;
            let mut added = 0usize;
            let mut skipped = 0usize;

            for event in &voice.events {
                let Some(kind) = subtype(role, event.pitch) else {
                    continue;
                };
                let duration = if event.duration >= self.config.long_note_min {
                    event.duration
                } else {
                    0.0
                };
                let start = event.time;
                let end = start + duration;

                if priority > 0 && placed.collides(start, end, gap) {
                    skipped += 1;
                    continue;
                }

                placed.insert(start, end);
                notes.push(Note {
                    id: NoteId(0),
                    hit_time: start,
                    duration,
                    lane: lane_for(event.pitch, self.lane_count()),
                    pitch: event.pitch,
                    velocity: event.velocity,
                    voice: voice.id,
                    role,
                    priority,
                    kind,
                    state: NoteState::Pending,
                });
                added += 1;
            }

            tracing::debug!(
                voice = %voice.id,
                ?role,
                priority,
                added,
                skipped,
                "merged layer"
            );
        }

        notes
    }

    /// Sorts the merged notes, keeps each lane physically playable and
    /// assigns ids in time order.
    fn guard_lanes(&self, mut notes: Vec<Note>) -> Vec<Note> {
        notes.sort_by(|a, b| {
            a.hit_time
                .total_cmp(&b.hit_time)
                .then(a.priority.cmp(&b.priority))
                .then(a.lane.cmp(&b.lane))
        });

        let mut blocked_until = vec![f64::NEG_INFINITY; usize::from(self.lane_count())];
        let mut kept = Vec::with_capacity(notes.len());
        for note in notes {
            let lane = usize::from(note.lane);
            if note.hit_time < blocked_until[lane] {
                continue;
            }
            blocked_until[lane] = note.end_time() + self.config.lane_guard;
            kept.push(note);
        }

        for (index, note) in kept.iter_mut().enumerate() {
            note.id = NoteId(index as u32);
        }
        kept
    }
}

/// Non-overlap index over already placed notes, sorted by start time.
#[derive(Debug, Default)]
struct PlacedIntervals {
    intervals: Vec<(f64, f64)>,
    longest: f64,
}

impl PlacedIntervals {
    fn collides(&self, start: f64, end: f64, gap: f64) -> bool {
        let upper = self
            .intervals
            .partition_point(|(existing, _)| *existing < end + gap);
        for &(existing_start, existing_end) in self.intervals[..upper].iter().rev() {
            if existing_start + self.longest + gap <= start {
                break;
            }
            if start < existing_end + gap && end > existing_start - gap {
                return true;
            }
        }
        false
    }

    fn insert(&mut self, start: f64, end: f64) {
        let index = self
            .intervals
            .partition_point(|(existing, _)| *existing <= start);
        self.intervals.insert(index, (start, end));
        self.longest = self.longest.max(end - start);
    }
}

fn score_voice(id: VoiceId, data: &VoiceData, weights: &RoleWeights) -> Voice {
    let name = data.name.to_lowercase();
    let percussive =
        data.is_percussion_channel() || contains_any(&name, &weights.percussion_keywords);
    let program = data.program.unwrap_or_else(|| infer_program(&name));
    let events = data.events.clone();
    let count = events.len().min(weights.event_count_cap) as f64;
    let average = average_pitch(&events);

    let (melody_score, bass_score, role_score) = if percussive {
        // Percussion is reserved for the rhythm role and never scored as
        // melody or bass.
        (None, None, count)
    } else {
        let mut melody = count / weights.melody_count_divisor;
        if (weights.melody_pitch_low..=weights.melody_pitch_high).contains(&average) {
            melody += weights.melody_range_bonus;
        }
        if contains_any(&name, &weights.melody_keywords) {
            melody += weights.melody_keyword_bonus;
        }

        let has_bass_keyword = contains_any(&name, &weights.bass_keywords);
        let bass = (BASS_PROGRAMS.contains(&program) || has_bass_keyword).then(|| {
            let mut score =
                (weights.bass_pitch_ceiling - average) + count / weights.bass_count_divisor;
            if has_bass_keyword {
                score += weights.bass_keyword_bonus;
            }
            score
        });

        let role_score = bass.map_or(melody, |bass| bass.max(melody));
        (Some(melody), bass, role_score)
    };

    Voice {
        id,
        name: data.name.clone(),
        events,
        percussive,
        program,
        role: if percussive {
            VoiceRole::Rhythm
        } else {
            VoiceRole::Unclassified
        },
        role_score,
        melody_score,
        bass_score,
    }
}

fn assign_roles(voices: &[Voice]) -> RoleAssignment {
    let melody = best(
        voices
            .iter()
            .filter(|voice| is_melodic_program(voice.program))
            .filter_map(|voice| voice.melody_score.map(|score| (voice.id, score))),
    )
    .or_else(|| {
        best(
            voices
                .iter()
                .filter_map(|voice| voice.melody_score.map(|score| (voice.id, score))),
        )
    });

    let bass = best(
        voices
            .iter()
            .filter(|voice| Some(voice.id) != melody)
            .filter_map(|voice| voice.bass_score.map(|score| (voice.id, score))),
    );

    let rhythm = best(
        voices
            .iter()
            .filter(|voice| voice.percussive)
            .map(|voice| (voice.id, voice.role_score)),
    );

    RoleAssignment {
        melody,
        bass,
        rhythm,
    }
}

/// Highest score wins; equal scores go to the lower voice index.
fn best(candidates: impl Iterator<Item = (VoiceId, f64)>) -> Option<VoiceId> {
    candidates
        .fold(None, |best: Option<(VoiceId, f64)>, (id, score)| match best {
            Some((_, top)) if score <= top => best,
            _ => Some((id, score)),
        })
        .map(|(id, _)| id)
}

fn subtype(role: VoiceRole, pitch: u8) -> Option<ObstacleKind> {
    match role {
        VoiceRole::Rhythm => ObstacleKind::from_drum(pitch),
        _ => Some(ObstacleKind::from_pitch(pitch)),
    }
}

fn lane_for(pitch: u8, lane_count: u8) -> u8 {
    pitch % lane_count
}

/// Piano, chromatic percussion, organ, guitar, strings through synth leads,
/// and ethnic instruments.
fn is_melodic_program(program: u8) -> bool {
    matches!(program, 0..=31 | 40..=87 | 104..=111)
}

fn infer_program(name: &str) -> u8 {
    const GUESSES: &[(&[&str], u8)] = &[
        (&["bass"], 33),
        (&["piano"], 0),
        (&["guitar"], 25),
        (&["string", "viol", "cello"], 40),
        (&["brass", "trumpet", "sax"], 56),
        (&["lead", "synth"], 81),
    ];

    GUESSES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| name.contains(keyword)))
        .map(|(_, program)| *program)
        .unwrap_or(0)
}

fn contains_any(name: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| name.contains(keyword.as_str()))
}

fn average_pitch(events: &[RawEvent]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    events.iter().map(|event| f64::from(event.pitch)).sum::<f64>() / events.len() as f64
}
