use std::collections::{BTreeMap, HashMap};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::{RawEvent, TrackFile, VoiceData, DEFAULT_TEMPO_BPM, PERCUSSION_CHANNEL};
use crate::Result;

const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;

/// Decodes a Standard MIDI File into one voice per (track, channel) pair.
pub(super) fn decode(bytes: &[u8]) -> Result<TrackFile> {
    let smf = Smf::parse(bytes)?;
    let clock = TickClock::from_smf(&smf);

    let mut voices = Vec::new();
    for events in &smf.tracks {
        let mut track_name = String::new();
        let mut instrument_name = String::new();
        let mut channels: BTreeMap<u8, VoiceBuilder> = BTreeMap::new();
        let mut tick: u64 = 0;

        for event in events {
            tick += u64::from(event.delta.as_int());

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    track_name = String::from_utf8_lossy(raw).trim().to_string();
                }
                TrackEventKind::Meta(MetaMessage::InstrumentName(raw)) => {
                    instrument_name = String::from_utf8_lossy(raw).trim().to_string();
                }
                TrackEventKind::Midi { channel, message } => {
                    let voice = channels.entry(channel.as_int()).or_default();
                    match message {
                        MidiMessage::ProgramChange { program } => {
                            voice.program.get_or_insert(program.as_int());
                        }
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            voice.open(key.as_int(), vel.as_int(), tick);
                        }
                        // A note-on with zero velocity is a note-off.
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            voice.close(key.as_int(), tick, &clock);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        let name = match (track_name.is_empty(), instrument_name.is_empty()) {
            (false, false) => format!("{track_name} {instrument_name}"),
            (false, true) => track_name,
            _ => instrument_name,
        };

        for (channel, voice) in channels {
            if let Some(voice) = voice.finish(&name, channel, tick, &clock) {
                voices.push(voice);
            }
        }
    }

    tracing::debug!(voices = voices.len(), "decoded midi file");

    Ok(TrackFile {
        name: String::new(),
        tempo_bpm: clock.initial_bpm(),
        duration: None,
        voices,
    })
}

#[derive(Debug, Default)]
struct VoiceBuilder {
    program: Option<u8>,
    pending: HashMap<u8, Vec<(u64, u8)>>,
    events: Vec<RawEvent>,
}

impl VoiceBuilder {
    fn open(&mut self, key: u8, velocity: u8, tick: u64) {
        self.pending.entry(key).or_default().push((tick, velocity));
    }

    fn close(&mut self, key: u8, tick: u64, clock: &TickClock) {
        if let Some((onset, velocity)) = self.pending.get_mut(&key).and_then(Vec::pop) {
            self.push(key, velocity, onset, tick, clock);
        }
    }

    fn push(&mut self, key: u8, velocity: u8, onset: u64, offset: u64, clock: &TickClock) {
        let start = clock.seconds_at(onset);
        let end = clock.seconds_at(offset);
        self.events
            .push(RawEvent::new(start, key, velocity, (end - start).max(0.0)));
    }

    /// Closes notes still sounding at the end of the track and produces the
    /// voice, or nothing if the channel never played a note.
    fn finish(
        mut self,
        name: &str,
        channel: u8,
        end_tick: u64,
        clock: &TickClock,
    ) -> Option<VoiceData> {
        let unterminated: Vec<(u8, u64, u8)> = self
            .pending
            .drain()
            .flat_map(|(key, stack)| stack.into_iter().map(move |(tick, vel)| (key, tick, vel)))
            .collect();
        for (key, onset, velocity) in unterminated {
            self.push(key, velocity, onset, end_tick, clock);
        }

        if self.events.is_empty() {
            return None;
        }

        Some(VoiceData {
            name: name.to_string(),
            program: self.program,
            channel: Some(channel),
            percussion: channel == PERCUSSION_CHANNEL,
            events: self.events,
        })
    }
}

/// Converts absolute ticks to seconds using the file's tempo map.
#[derive(Debug)]
struct TickClock {
    ticks_per_beat: f64,
    /// (tick, seconds at tick, microseconds per beat), sorted by tick.
    segments: Vec<(u64, f64, u32)>,
    /// Fixed tick length for SMPTE timecode files, which ignore tempo.
    timecode_tick: Option<f64>,
}

impl TickClock {
    fn from_smf(smf: &Smf) -> Self {
        let (ticks_per_beat, timecode_tick) = match smf.header.timing {
            Timing::Metrical(ticks) => (f64::from(ticks.as_int().max(1)), None),
            Timing::Timecode(fps, subframe) => {
                let per_second = f64::from(fps.as_f32()) * f64::from(subframe.max(1));
                (480.0, Some(1.0 / per_second))
            }
        };

        let mut changes = Vec::new();
        for events in &smf.tracks {
            let mut tick: u64 = 0;
            for event in events {
                tick += u64::from(event.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    changes.push((tick, tempo.as_int()));
                }
            }
        }
        changes.sort_by_key(|(tick, _)| *tick);

        let mut segments = vec![(0, 0.0, DEFAULT_MICROS_PER_BEAT)];
        for (tick, micros) in changes {
            let (last_tick, last_seconds, last_micros) = segments[segments.len() - 1];
            if tick == last_tick {
                segments.pop();
                segments.push((tick, last_seconds, micros));
                continue;
            }
            let seconds = last_seconds + seconds_for(tick - last_tick, last_micros, ticks_per_beat);
            segments.push((tick, seconds, micros));
        }

        Self {
            ticks_per_beat,
            segments,
            timecode_tick,
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        if let Some(tick_length) = self.timecode_tick {
            return tick as f64 * tick_length;
        }

        let index = self
            .segments
            .partition_point(|(start, _, _)| *start <= tick)
            .saturating_sub(1);
        let (start, seconds, micros) = self.segments[index];
        seconds + seconds_for(tick - start, micros, self.ticks_per_beat)
    }

    fn initial_bpm(&self) -> f64 {
        if self.timecode_tick.is_some() {
            return DEFAULT_TEMPO_BPM;
        }
        let micros = self.segments[0].2;
        60_000_000.0 / f64::from(micros.max(1))
    }
}

fn seconds_for(ticks: u64, micros_per_beat: u32, ticks_per_beat: f64) -> f64 {
    ticks as f64 / ticks_per_beat * f64::from(micros_per_beat) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal SMF writer for fixtures: format 1, metrical timing.
    fn smf_bytes(ticks_per_beat: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = b"MThd".to_vec();
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&ticks_per_beat.to_be_bytes());
        for body in tracks {
            out.extend_from_slice(b"MTrk");
            let mut body = body.clone();
            body.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend_from_slice(&body);
        }
        out
    }

    fn delta(mut value: u32) -> Vec<u8> {
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            bytes.insert(0, ((value & 0x7F) as u8) | 0x80);
            value >>= 7;
        }
        bytes
    }

    fn event(delta_ticks: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = delta(delta_ticks);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn decodes_notes_with_tempo_map() {
        let mut conductor = Vec::new();
        // 120 bpm, then 60 bpm from beat 2.
        conductor.extend(event(0, &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]));
        conductor.extend(event(960, &[0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40]));

        let mut lead = Vec::new();
        lead.extend(event(0, &[0xFF, 0x03, 0x04, b'L', b'e', b'a', b'd']));
        lead.extend(event(0, &[0xC0, 81]));
        lead.extend(event(0, &[0x90, 72, 100]));
        lead.extend(event(480, &[0x80, 72, 0]));
        lead.extend(event(480, &[0x90, 74, 90]));
        lead.extend(event(480, &[0x90, 74, 0]));
        // Left sounding; closed at the end of the track.
        lead.extend(event(0, &[0x99, 36, 120]));

        let bytes = smf_bytes(480, &[conductor, lead]);
        let track = TrackFile::from_midi_bytes(&bytes).unwrap();

        assert_eq!(track.tempo_bpm, 120.0);
        assert_eq!(track.voices.len(), 2);

        let melodic = &track.voices[0];
        assert_eq!(melodic.name, "Lead");
        assert_eq!(melodic.program, Some(81));
        assert!(!melodic.percussion);
        assert_eq!(melodic.events.len(), 2);
        assert!((melodic.events[0].time - 0.0).abs() < 1e-9);
        assert!((melodic.events[0].duration - 0.5).abs() < 1e-9);
        // Beat 2 at 120 bpm is one second in; the next beat runs at 60 bpm.
        assert!((melodic.events[1].time - 1.0).abs() < 1e-9);
        assert!((melodic.events[1].duration - 1.0).abs() < 1e-9);
        assert_eq!(melodic.events[1].velocity, 90);

        let drums = &track.voices[1];
        assert!(drums.percussion);
        assert_eq!(drums.events[0].pitch, 36);
        assert_eq!(drums.events[0].duration, 0.0);
    }
}
