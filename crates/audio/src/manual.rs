//! Handgesteuerte Audio-Senke ohne Hardware
//!
//! Die Uhr laeuft nur, wenn sie explizit vorgestellt wird. Dadurch lassen
//! sich Scheduler und Sitzung deterministisch pruefen.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AudioResult;
use crate::scheduler::{AudioSink, SourceId};

/// Ein an die Senke uebergebenes Segment
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedSegment {
    pub id: SourceId,
    pub start_time: f64,
    pub frames: usize,
}

impl PlayedSegment {
    fn end_time(&self, sample_rate: u32) -> f64 {
        self.start_time + self.frames as f64 / sample_rate as f64
    }
}

#[derive(Debug, Default)]
struct ManualState {
    clock: f64,
    next_id: u64,
    played: Vec<PlayedSegment>,
    running: Vec<PlayedSegment>,
    stopped: Vec<SourceId>,
    finished: Vec<SourceId>,
}

/// Senke mit manueller Uhr
///
/// Klone teilen sich den Zustand, sodass ein Test die Senke an den
/// Scheduler uebergeben und trotzdem weiter beobachten kann.
#[derive(Debug, Clone)]
pub struct ManualSink {
    sample_rate: u32,
    state: Arc<Mutex<ManualState>>,
}

impl ManualSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Setzt die Uhr ohne Segmente zu beenden
    pub fn set_clock(&self, time: f64) {
        self.state.lock().clock = time;
    }

    /// Stellt die Uhr vor und beendet alle bis dahin abgespielten Segmente
    pub fn advance_to(&self, time: f64) {
        let rate = self.sample_rate;
        let mut state = self.state.lock();
        state.clock = state.clock.max(time);
        let clock = state.clock;

        let (fertig, laufend): (Vec<_>, Vec<_>) = std::mem::take(&mut state.running)
            .into_iter()
            .partition(|seg| seg.end_time(rate) <= clock);
        state.running = laufend;
        state.finished.extend(fertig.into_iter().map(|seg| seg.id));
    }

    /// Alle jemals eingeplanten Segmente
    pub fn played(&self) -> Vec<PlayedSegment> {
        self.state.lock().played.clone()
    }

    /// Per `stop_source` abgebrochene Segmente
    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().stopped.clone()
    }

    /// Anzahl der noch laufenden Segmente
    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }
}

impl AudioSink for ManualSink {
    fn current_time(&self) -> f64 {
        self.state.lock().clock
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play_at(&mut self, samples: Vec<f32>, start_time: f64) -> AudioResult<SourceId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let segment = PlayedSegment {
            id: SourceId(state.next_id),
            start_time: start_time.max(state.clock),
            frames: samples.len(),
        };
        state.played.push(segment.clone());
        state.running.push(segment.clone());
        Ok(segment.id)
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = self.state.lock();
        let vorher = state.running.len();
        state.running.retain(|seg| seg.id != id);
        if state.running.len() < vorher {
            state.stopped.push(id);
        }
    }

    fn drain_finished(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.state.lock().finished)
    }
}
