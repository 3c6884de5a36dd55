//! Look-ahead audio cue scheduling.
//!
//! The render tick is too irregular to trigger sounds on time, so a
//! [`CueScheduler`] runs on its own coarse interval and hands every cue that
//! falls due within the next `schedule_ahead` seconds to a [`VoiceSink`],
//! which is expected to start the sound at the exact requested time. The
//! scheduler only ever reads the committed note list.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::VoiceId,
    config::AudioConfig,
    timeline::{Note, NoteId},
    Result, RhythmError,
};

/// Position of the external audio player.
pub trait AudioClock {
    /// Playback position in seconds.
    fn current_time(&self) -> f64;

    /// Length of the loaded audio, when known.
    fn duration(&self) -> Option<f64>;
}

/// Destination for scheduled sounds.
pub trait VoiceSink {
    /// Starts `cue` at audio time `at`, which may lie slightly in the future.
    fn play_voice(&mut self, cue: &VoiceCue, at: f64);
}

impl VoiceSink for Vec<(VoiceCue, f64)> {
    fn play_voice(&mut self, cue: &VoiceCue, at: f64) {
        self.push((*cue, at));
    }
}

impl VoiceSink for mpsc::Sender<(VoiceCue, f64)> {
    fn play_voice(&mut self, cue: &VoiceCue, at: f64) {
        // A closed receiver means nobody is listening any more.
        let _ = self.send((*cue, at));
    }
}

/// Explicitly advanced clock for tests and offline simulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualClock {
    time: f64,
    duration: Option<f64>,
}

impl ManualClock {
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            time: 0.0,
            duration,
        }
    }

    pub fn reset(&mut self) {
        self.time = 0.0;
    }

    pub fn advance(&mut self, delta: f64) {
        self.time = (self.time + delta).max(0.0);
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time.max(0.0);
    }
}

impl AudioClock for ManualClock {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

/// Locks a shared clock. A panicked writer cannot leave a position half
/// written, so a poisoned lock still yields the last stored reading.
fn lock_clock<C>(clock: &Mutex<C>) -> MutexGuard<'_, C> {
    clock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("audio clock lock poisoned, reading last stored position");
        poisoned.into_inner()
    })
}

impl<C: AudioClock> AudioClock for Arc<Mutex<C>> {
    fn current_time(&self) -> f64 {
        lock_clock(self).current_time()
    }

    fn duration(&self) -> Option<f64> {
        lock_clock(self).duration()
    }
}

/// Sound to trigger for one note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceCue {
    pub note: NoteId,
    pub voice: VoiceId,
    pub pitch: u8,
    pub velocity: u8,
    pub duration: f64,
}

impl From<&Note> for VoiceCue {
    fn from(note: &Note) -> Self {
        Self {
            note: note.id,
            voice: note.voice,
            pitch: note.pitch,
            velocity: note.velocity,
            duration: note.duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CueScheduler {
    notes: Arc<[Note]>,
    /// Indices into `notes`, sorted by hit time.
    order: Vec<usize>,
    cursor: usize,
    schedule_ahead: f64,
    interval: f64,
    last_pump: Option<f64>,
}

impl CueScheduler {
    pub fn new(config: &AudioConfig, notes: Arc<[Note]>) -> Self {
        let mut order: Vec<usize> = (0..notes.len()).collect();
        order.sort_by(|&a, &b| notes[a].hit_time.total_cmp(&notes[b].hit_time));

        Self {
            notes,
            order,
            cursor: 0,
            schedule_ahead: config.schedule_ahead,
            interval: config.look_ahead_interval,
            last_pump: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval.max(0.0))
    }

    /// Number of cues not yet dispatched.
    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }

    pub fn is_drained(&self) -> bool {
        self.cursor == self.order.len()
    }

    /// Skips every cue before `time`; the next pump starts from there.
    pub fn seek(&mut self, time: f64) {
        self.cursor = self
            .order
            .partition_point(|&index| self.notes[index].hit_time < time);
        self.last_pump = None;
    }

    /// Dispatches every cue due before `now + schedule_ahead` and returns how
    /// many were sent. Each cue is dispatched at most once.
    pub fn pump(&mut self, now: f64, sink: &mut impl VoiceSink) -> usize {
        self.last_pump = Some(now);
        let horizon = now + self.schedule_ahead;
        let mut sent = 0;

        while let Some(&index) = self.order.get(self.cursor) {
            let note = &self.notes[index];
            if note.hit_time >= horizon {
                break;
            }
            sink.play_voice(&VoiceCue::from(note), note.hit_time);
            self.cursor += 1;
            sent += 1;
        }

        if sent > 0 {
            tracing::trace!(sent, now, remaining = self.remaining(), "dispatched cues");
        }
        sent
    }

    /// Pumps against `clock` when at least one interval has passed since the
    /// previous pump. For callers that poll faster than the interval.
    pub fn poll(&mut self, clock: &impl AudioClock, sink: &mut impl VoiceSink) -> usize {
        let now = clock.current_time();
        match self.last_pump {
            Some(last) if now >= last && now - last < self.interval => 0,
            _ => self.pump(now, sink),
        }
    }

    /// Runs the scheduler on a background thread until stopped or drained.
    pub fn spawn<C, S>(self, clock: C, sink: S) -> Result<CueWorker<S>>
    where
        C: AudioClock + Send + 'static,
        S: VoiceSink + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(Mutex::new(sink));

        let handle = thread::Builder::new()
            .name("cue-scheduler".into())
            .spawn({
                let stop = stop.clone();
                let sink = sink.clone();
                move || {
                    let mut scheduler = self;
                    let interval = scheduler.interval();
                    while !stop.load(Ordering::Relaxed) && !scheduler.is_drained() {
                        let now = clock.current_time();
                        match sink.lock() {
                            Ok(mut sink) => {
                                scheduler.pump(now, &mut *sink);
                            }
                            Err(_) => break,
                        }
                        thread::sleep(interval);
                    }
                    tracing::debug!(remaining = scheduler.remaining(), "cue scheduler stopped");
                }
            })?;

        Ok(CueWorker {
            stop,
            sink,
            handle: Some(handle),
        })
    }
}

/// Handle to a [`CueScheduler`] running on its own thread.
pub struct CueWorker<S> {
    stop: Arc<AtomicBool>,
    sink: Arc<Mutex<S>>,
    handle: Option<JoinHandle<()>>,
}

impl<S> CueWorker<S> {
    pub fn sink(&self) -> Result<MutexGuard<'_, S>> {
        self.sink
            .lock()
            .map_err(|_| RhythmError::msg("voice sink has been poisoned"))
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the thread to stop and waits for it.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RhythmError::msg("cue scheduler thread panicked")),
            None => Ok(()),
        }
    }
}

impl<S> Drop for CueWorker<S> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl<S> std::fmt::Debug for CueWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CueWorker")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(times: &[f64]) -> Arc<[Note]> {
        times
            .iter()
            .enumerate()
            .map(|(id, &time)| Note::new(NoteId(id as u32), time, 0.0, 0))
            .collect()
    }

    fn config() -> AudioConfig {
        AudioConfig {
            look_ahead_interval: 0.025,
            schedule_ahead: 0.1,
        }
    }

    #[test]
    fn dispatches_each_cue_once_within_horizon() {
        let mut scheduler = CueScheduler::new(&config(), notes(&[0.5, 0.05, 1.0]));
        let mut sink: Vec<(VoiceCue, f64)> = Vec::new();

        assert_eq!(scheduler.pump(0.0, &mut sink), 1);
        assert_eq!(scheduler.pump(0.0, &mut sink), 0);
        assert_eq!(scheduler.pump(0.45, &mut sink), 1);
        assert_eq!(scheduler.pump(2.0, &mut sink), 1);
        assert!(scheduler.is_drained());

        let times: Vec<f64> = sink.iter().map(|(_, at)| *at).collect();
        assert_eq!(times, vec![0.05, 0.5, 1.0]);
        assert_eq!(sink[0].0.note, NoteId(1));
    }

    #[test]
    fn poll_waits_for_interval() {
        let mut scheduler = CueScheduler::new(&config(), notes(&[0.11, 0.12]));
        let mut clock = ManualClock::new(Some(3.0));
        let mut sink: Vec<(VoiceCue, f64)> = Vec::new();

        scheduler.poll(&clock, &mut sink);
        clock.advance(0.015);
        // 0.11 is inside the horizon now, but the interval has not elapsed.
        assert_eq!(scheduler.poll(&clock, &mut sink), 0);
        clock.advance(0.015);
        assert_eq!(scheduler.poll(&clock, &mut sink), 2);
    }

    #[test]
    fn seek_skips_past_cues() {
        let mut scheduler = CueScheduler::new(&config(), notes(&[1.0, 2.0, 3.0]));
        scheduler.seek(1.5);
        assert_eq!(scheduler.remaining(), 2);

        let mut sink: Vec<(VoiceCue, f64)> = Vec::new();
        scheduler.pump(2.95, &mut sink);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn manual_clock_never_goes_negative() {
        let mut clock = ManualClock::new(None);
        clock.advance(0.5);
        clock.advance(-2.0);
        assert_eq!(clock.current_time(), 0.0);
        assert_eq!(clock.duration(), None);
    }

    #[test]
    fn poisoned_clock_keeps_its_position() {
        let clock = Arc::new(Mutex::new(ManualClock::new(Some(30.0))));
        let writer = clock.clone();
        let panicked = thread::spawn(move || {
            let mut guard = writer.lock().unwrap();
            guard.set_time(4.5);
            panic!("writer died while holding the clock");
        })
        .join();

        assert!(panicked.is_err());
        assert!(clock.is_poisoned());
        assert_eq!(clock.current_time(), 4.5);
        assert_eq!(clock.duration(), Some(30.0));
    }

    #[test]
    fn worker_dispatches_from_its_own_thread() {
        let clock = Arc::new(Mutex::new(ManualClock::new(None)));
        clock.lock().unwrap().set_time(10.0);
        let (sender, receiver) = mpsc::channel();

        let scheduler = CueScheduler::new(&config(), notes(&[0.5, 9.0]));
        let worker = scheduler.spawn(clock, sender).unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            received.push(receiver.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        worker.stop().unwrap();

        assert_eq!(received[0].1, 0.5);
        assert_eq!(received[1].1, 9.0);
    }
}
