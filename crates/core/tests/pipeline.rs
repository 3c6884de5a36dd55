use pretty_assertions::assert_eq;
use rhythm_core::{
    config::AnalysisConfig, Judgment, RawEvent, RoleAssignment, RhythmError, Session,
    SessionConfig, SessionEvent, TrackAnalyzer, TrackFile, VoiceData, VoiceId,
};

fn voice(name: &str, program: u8, events: Vec<RawEvent>) -> VoiceData {
    VoiceData {
        name: name.to_string(),
        program: Some(program),
        channel: None,
        percussion: false,
        events,
    }
}

fn spaced(start: f64, step: f64, count: usize, pitch: u8) -> Vec<RawEvent> {
    (0..count)
        .map(|i| RawEvent::new(start + step * i as f64, pitch, 100, 0.1))
        .collect()
}

fn track(voices: Vec<VoiceData>) -> TrackFile {
    TrackFile {
        name: "fixture".to_string(),
        tempo_bpm: 120.0,
        duration: None,
        voices,
    }
}

#[test]
fn colliding_lower_priority_note_is_dropped() {
    let mut melody = spaced(2.0, 0.5, 12, 72);
    melody.push(RawEvent::new(1.000, 74, 100, 0.1));
    let mut bass = spaced(2.25, 0.5, 12, 36);
    bass.push(RawEvent::new(1.001, 38, 100, 0.1));

    let config = AnalysisConfig {
        gap_buffer: 0.1,
        ..AnalysisConfig::default()
    };
    let track = track(vec![voice("melody", 0, melody), voice("bass", 33, bass)]);
    let timeline = TrackAnalyzer::new(&config).analyze(&track);

    let near: Vec<_> = timeline
        .notes
        .iter()
        .filter(|note| (note.hit_time - 1.0).abs() < 0.01)
        .collect();
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].priority, 0);
    assert_eq!(near[0].hit_time, 1.000);
}

#[test]
fn merged_voices_keep_their_distance() {
    // Three busy layers whose onsets drift against each other.
    let track = track(vec![
        voice("lead", 80, spaced(0.0, 0.31, 60, 76)),
        voice("bass", 33, spaced(0.05, 0.23, 80, 40)),
        VoiceData {
            percussion: true,
            ..voice("drums", 0, {
                (0..120)
                    .map(|i| RawEvent::new(i as f64 * 0.17, if i % 2 == 0 { 36 } else { 42 }, 100, 0.0))
                    .collect()
            })
        },
    ]);
    let config = AnalysisConfig::default();
    let timeline = TrackAnalyzer::new(&config).analyze(&track);

    assert_eq!(
        timeline.roles,
        RoleAssignment {
            melody: Some(VoiceId(0)),
            bass: Some(VoiceId(1)),
            rhythm: Some(VoiceId(2)),
        }
    );

    for (i, a) in timeline.notes.iter().enumerate() {
        for b in &timeline.notes[i + 1..] {
            if a.voice == b.voice || (a.priority == 0 && b.priority == 0) {
                continue;
            }
            assert!(
                (a.hit_time - b.hit_time).abs() >= config.gap_buffer - 1e-9,
                "{:?} at {} and {:?} at {} are too close",
                a.voice,
                a.hit_time,
                b.voice,
                b.hit_time
            );
        }
    }
}

#[test]
fn silent_track_cannot_start_a_session() {
    let track = track(vec![voice("sparse", 0, spaced(0.0, 1.0, 4, 60))]);
    let config = SessionConfig::default();
    let timeline = TrackAnalyzer::new(&config.analysis).analyze(&track);

    let err = Session::new(config, timeline).unwrap_err();
    assert!(matches!(err, RhythmError::NoPlayableContent { .. }));
}

#[test]
fn json_track_plays_through() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.json");
    let track = track(vec![voice("lead", 0, spaced(0.5, 0.4, 16, 64))]);
    std::fs::write(&path, serde_json::to_string(&track).unwrap()).unwrap();

    let loaded = TrackFile::load(&path).unwrap();
    assert_eq!(loaded, track);

    let config = SessionConfig::default();
    let timeline = TrackAnalyzer::new(&config.analysis).analyze(&loaded);
    let mut presses: Vec<(u8, f64)> = timeline
        .notes
        .iter()
        .map(|note| (note.lane, note.hit_time))
        .collect();
    presses.reverse();
    let mut session = Session::new(config, timeline).unwrap();

    let frame = 1.0 / 60.0;
    let mut time = 0.0;
    let mut judged = Vec::new();
    while !session.is_finished() && time < 20.0 {
        time += frame;
        let mut events = session.tick(time, frame);
        while presses.last().is_some_and(|(_, hit)| *hit <= session.now()) {
            if let Some((lane, hit)) = presses.pop() {
                events.extend(session.press(lane, hit));
            }
        }
        judged.extend(events.into_iter().filter_map(|event| match event {
            SessionEvent::Judged { result } => Some(result.tier),
            _ => None,
        }));
    }

    assert!(session.is_finished());
    assert_eq!(judged, vec![Judgment::Perfect; 16]);
    assert_eq!(session.score().max_combo(), 16);
    assert_eq!(session.score().score(), 1600);
}
