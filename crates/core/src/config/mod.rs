use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, RhythmError};

/// Immutable per-session configuration. Built once and handed by reference to
/// every component constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub travel: TravelConfig,
    pub judgment: JudgmentWindows,
    pub sync: SyncConfig,
    pub scoring: ScoringConfig,
    pub analysis: AnalysisConfig,
    pub audio: AudioConfig,
    pub session: PlaybackConfig,
}

impl SessionConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults; the result is validated before it is returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.travel.validate()?;
        self.judgment.validate()?;
        self.sync.validate()?;
        self.scoring.validate()?;
        self.analysis.validate()?;
        self.audio.validate()
    }
}

/// Distance a note travels before reaching the judgment line and the speed it
/// travels at. Together they fix the look-ahead used for spawning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelConfig {
    pub distance: f64,
    pub scroll_speed: f64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            distance: 24.0,
            scroll_speed: 12.0,
        }
    }
}

impl TravelConfig {
    /// Seconds between a note spawning and reaching the judgment line.
    pub fn travel_time(&self) -> f64 {
        self.distance / self.scroll_speed
    }

    fn validate(&self) -> Result<()> {
        if !(self.scroll_speed > 0.0) {
            return Err(RhythmError::config("scroll speed must be positive"));
        }
        if !(self.distance >= 0.0) {
            return Err(RhythmError::config("travel distance must not be negative"));
        }
        Ok(())
    }
}

/// Timing windows in seconds. Each tier window must be at least as wide as the
/// one before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgmentWindows {
    pub perfect: f64,
    pub great: f64,
    pub good: f64,
    pub miss: f64,
    pub release: f64,
    /// Release errors are divided by this factor before tiering.
    pub release_tolerance: f64,
    /// Extra time past `end + release` after which an unreleased hold is
    /// force-completed as a miss.
    pub hold_safety: f64,
    pub empty_press_breaks_combo: bool,
}

impl Default for JudgmentWindows {
    fn default() -> Self {
        Self {
            perfect: 0.080,
            great: 0.160,
            good: 0.250,
            miss: 0.350,
            release: 0.250,
            release_tolerance: 1.5,
            hold_safety: 1.0,
            empty_press_breaks_combo: true,
        }
    }
}

impl JudgmentWindows {
    fn validate(&self) -> Result<()> {
        let ordered = [self.perfect, self.great, self.good, self.miss];
        if ordered.iter().any(|w| !(*w > 0.0)) {
            return Err(RhythmError::config("judgment windows must be positive"));
        }
        if ordered.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(RhythmError::config(
                "judgment windows must increase from perfect to miss",
            ));
        }
        if !(self.release > 0.0) || !(self.release_tolerance >= 1.0) {
            return Err(RhythmError::config(
                "release window must be positive and its tolerance at least 1.0",
            ));
        }
        if !(self.hold_safety >= 0.0) {
            return Err(RhythmError::config("hold safety bound must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A raw/smoothed disagreement larger than this is treated as a seek.
    pub snap_threshold: f64,
    pub correction_gain: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snap_threshold: 0.5,
            correction_gain: 5.0,
        }
    }
}

impl SyncConfig {
    fn validate(&self) -> Result<()> {
        if !(self.snap_threshold > 0.0) || !(self.correction_gain >= 0.0) {
            return Err(RhythmError::config(
                "snap threshold must be positive and correction gain non-negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub perfect: u32,
    pub great: u32,
    pub good: u32,
    pub miss: u32,
    /// Step function over the combo count, sorted by `min_combo`.
    pub combo_tiers: Vec<ComboTier>,
    /// Number of recent timing errors kept for hit-error display.
    pub history_len: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            perfect: 100,
            great: 75,
            good: 50,
            miss: 0,
            combo_tiers: vec![
                ComboTier::new(0, 1.0),
                ComboTier::new(20, 1.2),
                ComboTier::new(50, 1.5),
            ],
            history_len: 32,
        }
    }
}

impl ScoringConfig {
    /// Multiplier of the highest tier whose threshold the combo has reached.
    pub fn multiplier(&self, combo: u32) -> f64 {
        self.combo_tiers
            .iter()
            .rev()
            .find(|tier| combo >= tier.min_combo)
            .map(|tier| tier.multiplier)
            .unwrap_or(1.0)
    }

    fn validate(&self) -> Result<()> {
        if self
            .combo_tiers
            .windows(2)
            .any(|pair| pair[0].min_combo >= pair[1].min_combo)
        {
            return Err(RhythmError::config(
                "combo tiers must be sorted by strictly increasing thresholds",
            ));
        }
        if self.combo_tiers.iter().any(|tier| !(tier.multiplier >= 0.0)) {
            return Err(RhythmError::config("combo multipliers must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComboTier {
    pub min_combo: u32,
    pub multiplier: f64,
}

impl ComboTier {
    pub fn new(min_combo: u32, multiplier: f64) -> Self {
        Self {
            min_combo,
            multiplier,
        }
    }
}

/// Parameters for voice selection and timeline merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_events: usize,
    /// Minimum spacing kept between a lower-priority note and anything
    /// already placed.
    pub gap_buffer: f64,
    pub lane_count: u8,
    /// Events at least this long become hold notes.
    pub long_note_min: f64,
    /// Spacing kept after a note's end before its lane accepts another note.
    pub lane_guard: f64,
    pub weights: RoleWeights,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_events: 10,
            gap_buffer: 0.1,
            lane_count: 4,
            long_note_min: 0.5,
            lane_guard: 0.02,
            weights: RoleWeights::default(),
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<()> {
        if self.lane_count == 0 {
            return Err(RhythmError::config("lane count must be at least one"));
        }
        if !(self.gap_buffer >= 0.0) || !(self.lane_guard >= 0.0) {
            return Err(RhythmError::config("gap buffers must not be negative"));
        }
        if !(self.long_note_min > 0.0) {
            return Err(RhythmError::config("long note minimum must be positive"));
        }
        Ok(())
    }
}

/// Tunable weights for the role heuristics. None of these are load-bearing
/// beyond "more events and a role-appropriate register score higher".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleWeights {
    /// Event counts above this contribute nothing further.
    pub event_count_cap: usize,
    pub melody_count_divisor: f64,
    pub bass_count_divisor: f64,
    pub melody_pitch_low: f64,
    pub melody_pitch_high: f64,
    pub melody_range_bonus: f64,
    /// Bass score grows as average pitch falls below this ceiling.
    pub bass_pitch_ceiling: f64,
    pub melody_keyword_bonus: f64,
    pub bass_keyword_bonus: f64,
    pub melody_keywords: Vec<String>,
    pub bass_keywords: Vec<String>,
    pub percussion_keywords: Vec<String>,
}

impl Default for RoleWeights {
    fn default() -> Self {
        Self {
            event_count_cap: 1000,
            melody_count_divisor: 50.0,
            bass_count_divisor: 20.0,
            melody_pitch_low: 60.0,
            melody_pitch_high: 84.0,
            melody_range_bonus: 50.0,
            bass_pitch_ceiling: 100.0,
            melody_keyword_bonus: 100.0,
            bass_keyword_bonus: 50.0,
            melody_keywords: strings(&["melody", "vocal", "lead", "main"]),
            bass_keywords: strings(&["bass"]),
            percussion_keywords: strings(&["drum", "perc"]),
        }
    }
}

fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Cadence of the look-ahead cue scheduler that feeds the audio player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub look_ahead_interval: f64,
    pub schedule_ahead: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            look_ahead_interval: 0.025,
            schedule_ahead: 0.1,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if !(self.look_ahead_interval > 0.0) || self.schedule_ahead < self.look_ahead_interval {
            return Err(RhythmError::config(
                "schedule-ahead horizon must cover at least one look-ahead interval",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How long a resolved note stays on screen past its end before the
    /// session reports it despawned.
    pub despawn_delay: f64,
    /// Output latency subtracted from the raw audio time.
    pub audio_offset: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            despawn_delay: 0.5,
            audio_offset: 0.0,
        }
    }
}
