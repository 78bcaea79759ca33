//! Playback-Scheduler
//!
//! Eingehende Audio-Segmente kommen in Schueben und schneller als
//! Echtzeit. Der Scheduler legt sie lueckenlos und ohne Ueberlappung
//! hintereinander auf die Audio-Uhr der Ausgabe:
//!
//! ```text
//! start = max(next_start_time, aktuelle_zeit)
//! next_start_time = start + dauer
//! ```
//!
//! `dauer` zaehlt die tatsaechlich an die Senke gegebenen Frames in deren
//! Rate. Weicht die Segment-Rate ab, rechnet ein durchlaufender
//! [`StreamResampler`] um; ein angefangener Chunk wandert mit dem naechsten
//! Segment hinaus.
//!
//! Laufende Segmente werden in `active` gefuehrt, damit ein Stopp alle
//! sofort abbrechen kann. Natuerlich beendete Segmente meldet die Senke
//! ueber [`AudioSink::drain_finished`].

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, trace};

use crate::codec::pcm16_to_floats;
use crate::error::AudioResult;
use crate::resample::StreamResampler;

/// Handle eines geplanten Segments in der Senke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source:{}", self.0)
    }
}

/// Ausgabeseite mit eigener Audio-Uhr
///
/// `current_time` und `start_time` sind Sekunden auf der Uhr der Senke.
/// Samples uebergibt der Scheduler bereits in `sample_rate()`.
pub trait AudioSink: Send {
    /// Aktuelle Zeit der Audio-Uhr in Sekunden
    fn current_time(&self) -> f64;

    /// Abtastrate, in der die Senke Samples erwartet
    fn sample_rate(&self) -> u32;

    /// Plant Mono-Samples ab `start_time` ein
    fn play_at(&mut self, samples: Vec<f32>, start_time: f64) -> AudioResult<SourceId>;

    /// Bricht ein Segment sofort ab. Unbekannte Ids werden ignoriert.
    fn stop_source(&mut self, id: SourceId);

    /// Segmente, die seit dem letzten Aufruf natuerlich geendet haben
    fn drain_finished(&mut self) -> Vec<SourceId>;
}

/// Ergebnis einer Einplanung
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    /// `None` bei leeren oder noch im Resampler gepufferten Segmenten
    pub source: Option<SourceId>,
    pub start_time: f64,
    pub duration: f64,
}

/// Reiht Segmente lueckenlos auf der Audio-Uhr auf
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    next_start_time: f64,
    active: HashSet<SourceId>,
    resampler: Option<StreamResampler>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            next_start_time: 0.0,
            active: HashSet::new(),
            resampler: None,
        }
    }

    /// Plant ein Mono-Segment in Abtastrate `sample_rate` ein
    ///
    /// Leere Segmente verschieben den Cursor um null und erreichen die
    /// Senke nicht.
    pub fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32) -> AudioResult<ScheduledSegment> {
        self.reap_finished();

        let now = self.sink.current_time();
        let start_time = self.next_start_time.max(now);

        if samples.is_empty() || sample_rate == 0 {
            trace!(start_time, "Leeres Segment uebersprungen");
            return Ok(ScheduledSegment {
                source: None,
                start_time,
                duration: 0.0,
            });
        }

        let sink_rate = self.sink.sample_rate();
        let samples = if sink_rate != sample_rate {
            self.umrechnen(&samples, sample_rate, sink_rate)?
        } else {
            samples
        };
        if samples.is_empty() {
            trace!(start_time, "Segment vollstaendig im Resampler gepuffert");
            return Ok(ScheduledSegment {
                source: None,
                start_time,
                duration: 0.0,
            });
        }

        let duration = samples.len() as f64 / sink_rate as f64;

        let id = self.sink.play_at(samples, start_time)?;
        self.active.insert(id);
        self.next_start_time = start_time + duration;

        trace!(
            source = %id,
            start_time,
            duration,
            next = self.next_start_time,
            "Segment eingeplant"
        );

        Ok(ScheduledSegment {
            source: Some(id),
            start_time,
            duration,
        })
    }

    fn umrechnen(&mut self, samples: &[f32], from: u32, to: u32) -> AudioResult<Vec<f32>> {
        let resampler = match self.resampler.take() {
            Some(r) if r.from_rate() == from && r.to_rate() == to => r,
            _ => {
                debug!(from, to, "Resampler fuer Wiedergabe angelegt");
                StreamResampler::new(from, to)?
            }
        };
        self.resampler.insert(resampler).process(samples)
    }

    /// Dekodiert PCM16-Mono und plant es ein
    pub fn schedule_pcm(&mut self, pcm: &[u8], sample_rate: u32) -> AudioResult<ScheduledSegment> {
        let samples = pcm16_to_floats(pcm, 1)?
            .into_iter()
            .next()
            .unwrap_or_default();
        self.schedule(samples, sample_rate)
    }

    /// Stoppt alle laufenden Segmente und leert die Menge
    ///
    /// `next_start_time` bleibt unveraendert; weitere Segmente starten
    /// spaetestens zur aktuellen Uhrzeit. Im Resampler gepufferte Reste
    /// werden verworfen.
    pub fn stop_all(&mut self) -> usize {
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
        let count = self.active.len();
        for id in self.active.drain() {
            self.sink.stop_source(id);
        }
        if count > 0 {
            debug!(count, "Alle Segmente gestoppt");
        }
        count
    }

    /// Entfernt natuerlich beendete Segmente aus der Menge
    pub fn reap_finished(&mut self) -> usize {
        let finished = self.sink.drain_finished();
        let mut removed = 0;
        for id in finished {
            if self.active.remove(&id) {
                removed += 1;
            }
        }
        removed
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: SourceId) -> bool {
        self.active.contains(&id)
    }

    pub fn current_time(&self) -> f64 {
        self.sink.current_time()
    }

    /// Wie viele Sekunden Audio noch vor der Uhr eingeplant sind
    pub fn queued_ahead(&self) -> f64 {
        (self.next_start_time - self.sink.current_time()).max(0.0)
    }
}
