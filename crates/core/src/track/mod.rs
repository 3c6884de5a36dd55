//! Source track model consumed by the analyzer.
//!
//! A [`TrackFile`] is the parsed, format-independent view of a multi-voice
//! song: each voice is a time-ordered list of events in seconds. It can be
//! read from the JSON form below or imported from a Standard MIDI File.

mod midi;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, RhythmError};

pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// General MIDI percussion channel (channel 10, zero based).
pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFile {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_tempo")]
    pub tempo_bpm: f64,
    /// Song length in seconds. Derived from the events when absent.
    #[serde(default)]
    pub duration: Option<f64>,
    pub voices: Vec<VoiceData>,
}

fn default_tempo() -> f64 {
    DEFAULT_TEMPO_BPM
}

/// One instrument part of the source track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceData {
    #[serde(default)]
    pub name: String,
    /// General MIDI program number, if the source declared one.
    #[serde(default)]
    pub program: Option<u8>,
    #[serde(default)]
    pub channel: Option<u8>,
    #[serde(default)]
    pub percussion: bool,
    pub events: Vec<RawEvent>,
}

impl VoiceData {
    /// True for voices on the GM percussion channel or flagged as drums.
    pub fn is_percussion_channel(&self) -> bool {
        self.percussion || self.channel == Some(PERCUSSION_CHANNEL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub time: f64,
    pub pitch: u8,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    #[serde(default)]
    pub duration: f64,
}

fn default_velocity() -> u8 {
    100
}

impl RawEvent {
    pub fn new(time: f64, pitch: u8, velocity: u8, duration: f64) -> Self {
        Self {
            time,
            pitch,
            velocity,
            duration,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.time + self.duration
    }
}

impl TrackFile {
    /// Loads a track, choosing the decoder from the file extension: `.mid`
    /// and `.midi` are decoded as Standard MIDI Files, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_midi = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
            .unwrap_or(false);

        if is_midi {
            Self::load_midi(path)
        } else {
            Self::load_json(path)
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses the JSON form. Any decode or validation failure is reported as
    /// [`RhythmError::NoPlayableContent`] with the failure as its cause.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let decoded = serde_json::from_str::<Self>(text)
            .map_err(RhythmError::from)
            .and_then(|mut track| track.normalize().map(|()| track));
        decoded.map_err(RhythmError::unplayable)
    }

    pub fn load_midi(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut track = Self::from_midi_bytes(&bytes)?;
        if track.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                track.name = stem.to_string();
            }
        }
        Ok(track)
    }

    /// Decodes a Standard MIDI File, folding failures into
    /// [`RhythmError::NoPlayableContent`] like [`Self::from_json_str`].
    pub fn from_midi_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded = midi::decode(bytes).and_then(|mut track| track.normalize().map(|()| track));
        decoded.map_err(RhythmError::unplayable)
    }

    /// Song length: the declared duration, or the end of the last event.
    pub fn duration(&self) -> f64 {
        self.duration.unwrap_or_else(|| {
            self.voices
                .iter()
                .flat_map(|voice| voice.events.iter())
                .map(RawEvent::end_time)
                .fold(0.0, f64::max)
        })
    }

    /// Rejects non-finite or negative timings and sorts every voice by time.
    fn normalize(&mut self) -> Result<()> {
        if !(self.tempo_bpm.is_finite() && self.tempo_bpm > 0.0) {
            return Err(RhythmError::InvalidTrack(format!(
                "tempo must be positive, got {}",
                self.tempo_bpm
            )));
        }

        for (index, voice) in self.voices.iter_mut().enumerate() {
            if let Some(event) = voice.events.iter().find(|event| {
                !(event.time.is_finite() && event.time >= 0.0)
                    || !(event.duration.is_finite() && event.duration >= 0.0)
                    || event.pitch > 127
            }) {
                return Err(RhythmError::InvalidTrack(format!(
                    "voice {index} has an invalid event at {:?}",
                    event.time
                )));
            }
            voice
                .events
                .sort_by(|a, b| a.time.total_cmp(&b.time).then(a.pitch.cmp(&b.pitch)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_with_defaults() {
        let track = TrackFile::from_json_str(
            r#"{
                "voices": [
                    { "name": "Lead", "program": 81,
                      "events": [ { "time": 1.5, "pitch": 72 }, { "time": 0.5, "pitch": 70, "duration": 0.25 } ] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(track.tempo_bpm, DEFAULT_TEMPO_BPM);
        let events = &track.voices[0].events;
        assert_eq!(events[0].time, 0.5);
        assert_eq!(events[1].velocity, 100);
        assert!((track.duration() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_negative_event_times() {
        let err = TrackFile::from_json_str(
            r#"{ "voices": [ { "events": [ { "time": -1.0, "pitch": 60 } ] } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RhythmError::NoPlayableContent { cause: Some(cause) }
                if matches!(*cause, RhythmError::InvalidTrack(_))
        ));
    }

    #[test]
    fn malformed_json_has_no_playable_content() {
        let err = TrackFile::from_json_str("{ not json").unwrap_err();
        assert!(matches!(
            &err,
            RhythmError::NoPlayableContent { cause: Some(cause) }
                if matches!(**cause, RhythmError::Json(_))
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn percussion_detected_from_channel() {
        let voice = VoiceData {
            channel: Some(PERCUSSION_CHANNEL),
            ..Default::default()
        };
        assert!(voice.is_percussion_channel());
    }

    #[test]
    fn load_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        std::fs::write(&path, r#"{ "name": "song", "voices": [] }"#).unwrap();
        assert_eq!(TrackFile::load(&path).unwrap().name, "song");

        let midi_path = dir.path().join("broken.mid");
        std::fs::write(&midi_path, b"not a midi file").unwrap();
        assert!(matches!(
            TrackFile::load(&midi_path).unwrap_err(),
            RhythmError::NoPlayableContent { cause: Some(cause) }
                if matches!(*cause, RhythmError::Midi(_))
        ));

        // A missing file is an I/O problem, not a content one.
        assert!(matches!(
            TrackFile::load(dir.path().join("absent.json")).unwrap_err(),
            RhythmError::Io(_)
        ));
    }
}
