//! Audio-Playback via cpal
//!
//! Eingeplante Segmente liegen auf einer [`PlaybackTimeline`] mit
//! Frame-genauer Audio-Uhr. Der cpal-Callback rendert die Timeline und
//! stellt dabei die Uhr vor; beendete Segmente werden gesammelt, bis der
//! Scheduler sie abholt.

use std::sync::Arc;

use cpal::traits::DeviceTrait;
use cpal::SampleFormat;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::codec::PLAYBACK_SAMPLE_RATE;
use crate::device::{load_cpal_output_device, negotiate_output_format, NegotiatedFormat};
use crate::engine::DeviceErrorCallback;
use crate::error::{AudioError, AudioResult};
use crate::scheduler::{AudioSink, SourceId};
use crate::stream_thread::StreamThread;

/// Konfiguration fuer den Audio-Playback
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Abtastrate der eingehenden Segmente in Hz
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

#[derive(Debug)]
struct Segment {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mischpult mit Frame-Uhr
#[derive(Debug)]
pub struct PlaybackTimeline {
    sample_rate: u32,
    clock: u64,
    next_id: u64,
    segments: Vec<Segment>,
    finished: Vec<SourceId>,
}

impl PlaybackTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: 0,
            next_id: 0,
            segments: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock_frames(&self) -> u64 {
        self.clock
    }

    /// Uhrzeit in Sekunden
    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.clock as f64 / self.sample_rate as f64
    }

    /// Legt Mono-Samples ab `start_frame` auf die Timeline
    ///
    /// Startframes in der Vergangenheit werden auf die aktuelle Uhr
    /// angehoben.
    pub fn insert(&mut self, start_frame: u64, samples: Vec<f32>) -> SourceId {
        self.next_id += 1;
        let id = SourceId(self.next_id);
        let segment = Segment {
            id,
            start_frame: start_frame.max(self.clock),
            samples,
        };
        if segment.samples.is_empty() {
            self.finished.push(id);
        } else {
            self.segments.push(segment);
        }
        id
    }

    /// Entfernt ein Segment sofort. `false` wenn es nicht (mehr) laeuft.
    pub fn remove(&mut self, id: SourceId) -> bool {
        let vorher = self.segments.len();
        self.segments.retain(|s| s.id != id);
        self.segments.len() < vorher
    }

    /// Anzahl der noch nicht beendeten Segmente
    pub fn pending(&self) -> usize {
        self.segments.len()
    }

    /// Rendert `out.len() / channels` Frames und stellt die Uhr vor
    ///
    /// Jeder Frame traegt auf allen Kanaelen dasselbe Mono-Sample.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let window_start = self.clock;
        let window_end = window_start + frames;

        for seg in &self.segments {
            if seg.start_frame >= window_end || seg.end_frame() <= window_start {
                continue;
            }
            let von = seg.start_frame.max(window_start);
            let bis = seg.end_frame().min(window_end);
            for frame in von..bis {
                let sample = seg.samples[(frame - seg.start_frame) as usize];
                let base = (frame - window_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.clock = window_end;
        let clock = self.clock;
        let finished = &mut self.finished;
        self.segments.retain(|seg| {
            let laeuft = seg.end_frame() > clock;
            if !laeuft {
                finished.push(seg.id);
            }
            laeuft
        });
    }

    /// Seit dem letzten Aufruf natuerlich beendete Segmente
    pub fn drain_finished(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.finished)
    }
}

/// [`AudioSink`] ueber eine geteilte Timeline
///
/// Die Timeline wird zwischen Callback-Thread und Scheduler geteilt;
/// beide halten den Lock nur kurz.
#[derive(Debug, Clone)]
pub struct TimelineSink {
    timeline: Arc<Mutex<PlaybackTimeline>>,
}

impl TimelineSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(PlaybackTimeline::new(sample_rate))),
        }
    }

    /// Geteilter Zugriff fuer den Render-Callback
    pub fn timeline(&self) -> Arc<Mutex<PlaybackTimeline>> {
        Arc::clone(&self.timeline)
    }
}

impl AudioSink for TimelineSink {
    fn current_time(&self) -> f64 {
        self.timeline.lock().current_time()
    }

    fn sample_rate(&self) -> u32 {
        self.timeline.lock().sample_rate()
    }

    fn play_at(&mut self, samples: Vec<f32>, start_time: f64) -> AudioResult<SourceId> {
        let mut timeline = self.timeline.lock();
        let start_frame = (start_time.max(0.0) * timeline.sample_rate() as f64).round() as u64;
        Ok(timeline.insert(start_frame, samples))
    }

    fn stop_source(&mut self, id: SourceId) {
        self.timeline.lock().remove(id);
    }

    fn drain_finished(&mut self) -> Vec<SourceId> {
        self.timeline.lock().drain_finished()
    }
}

/// Lautsprecher-Ausgabe ueber cpal
pub struct CpalOutput {
    sink: TimelineSink,
    format: NegotiatedFormat,
    thread: StreamThread,
}

impl CpalOutput {
    /// Oeffnet das Ausgabegeraet und startet den Render-Stream
    ///
    /// Die Timeline laeuft in der Rate des Geraets; der Scheduler rechnet
    /// eingehende Segmente bei Bedarf um.
    pub fn open(
        device_name: Option<&str>,
        config: &PlaybackConfig,
        on_error: DeviceErrorCallback,
    ) -> AudioResult<Self> {
        let device_name = device_name.map(str::to_string);
        let wanted_rate = config.sample_rate;

        let (thread, (sink, format)) = StreamThread::spawn("oracle-playback", move || {
            let device = load_cpal_output_device(device_name.as_deref())?;
            let format = negotiate_output_format(&device, wanted_rate)?;
            let sink = TimelineSink::new(format.sample_rate);
            let stream = build_output_stream(&device, format, sink.timeline(), on_error)?;
            Ok((stream, (sink, format)))
        })?;

        info!(
            rate = format.sample_rate,
            kanaele = format.channels,
            "Playback-Stream geoeffnet"
        );
        Ok(Self {
            sink,
            format,
            thread,
        })
    }

    pub fn format(&self) -> NegotiatedFormat {
        self.format
    }
}

impl AudioSink for CpalOutput {
    fn current_time(&self) -> f64 {
        self.sink.current_time()
    }

    fn sample_rate(&self) -> u32 {
        self.sink.sample_rate()
    }

    fn play_at(&mut self, samples: Vec<f32>, start_time: f64) -> AudioResult<SourceId> {
        if !self.thread.ist_aktiv() {
            return Err(AudioError::StreamFehler("Playback-Stream beendet".into()));
        }
        self.sink.play_at(samples, start_time)
    }

    fn stop_source(&mut self, id: SourceId) {
        self.sink.stop_source(id);
    }

    fn drain_finished(&mut self) -> Vec<SourceId> {
        self.sink.drain_finished()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.thread.beenden();
        debug!("Playback-Stream geschlossen");
    }
}

fn build_output_stream(
    device: &cpal::Device,
    format: NegotiatedFormat,
    timeline: Arc<Mutex<PlaybackTimeline>>,
    on_error: DeviceErrorCallback,
) -> AudioResult<cpal::Stream> {
    let stream_config = format.stream_config();
    let channels = format.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        on_error(AudioError::StreamFehler(err.to_string()));
    };

    let stream = match format.sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| {
                timeline.lock().render(data, channels);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    scratch.resize(data.len(), 0.0);
                    timeline.lock().render(&mut scratch, channels);
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [u16], _| {
                    scratch.resize(data.len(), 0.0);
                    timeline.lock().render(&mut scratch, channels);
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = ((s + 1.0) * 0.5 * u16::MAX as f32) as u16;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {other:?}"
            )))
        }
    };
    stream.map_err(|e| AudioError::StreamFehler(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PlaybackScheduler;

    #[test]
    fn playback_config_default() {
        assert_eq!(PlaybackConfig::default().sample_rate, 24000);
    }

    #[test]
    fn segmente_werden_frame_genau_gemischt() {
        let mut tl = PlaybackTimeline::new(10);
        tl.insert(2, vec![0.5, 0.5]);
        tl.insert(3, vec![0.25]);

        let mut out = vec![0.0; 5];
        tl.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.75, 0.0]);
        assert_eq!(tl.clock_frames(), 5);
        assert_eq!(tl.drain_finished().len(), 2);
        assert_eq!(tl.pending(), 0);
    }

    #[test]
    fn mono_auf_alle_kanaele() {
        let mut tl = PlaybackTimeline::new(10);
        tl.insert(0, vec![0.5, -0.5]);
        let mut out = vec![0.0; 4];
        tl.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn segment_ueber_mehrere_callbacks() {
        let mut tl = PlaybackTimeline::new(10);
        let id = tl.insert(0, vec![0.1, 0.2, 0.3]);
        let mut out = vec![0.0; 2];

        tl.render(&mut out, 1);
        assert_eq!(out, vec![0.1, 0.2]);
        assert!(tl.drain_finished().is_empty());

        tl.render(&mut out, 1);
        assert_eq!(out, vec![0.3, 0.0]);
        assert_eq!(tl.drain_finished(), vec![id]);
    }

    #[test]
    fn vergangener_start_wird_angehoben() {
        let mut tl = PlaybackTimeline::new(10);
        let mut out = vec![0.0; 4];
        tl.render(&mut out, 1);

        tl.insert(1, vec![0.5]);
        tl.render(&mut out, 1);
        assert_eq!(out[0], 0.5);
    }

    #[test]
    fn entfernte_segmente_gelten_nicht_als_beendet() {
        let mut tl = PlaybackTimeline::new(10);
        let id = tl.insert(0, vec![0.5; 8]);
        assert!(tl.remove(id));
        assert!(!tl.remove(id));

        let mut out = vec![0.0; 8];
        tl.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(tl.drain_finished().is_empty());
    }

    #[test]
    fn summe_wird_begrenzt() {
        let mut tl = PlaybackTimeline::new(10);
        tl.insert(0, vec![0.75]);
        tl.insert(0, vec![0.75]);
        let mut out = vec![0.0; 1];
        tl.render(&mut out, 1);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn scheduler_ueber_timeline_ohne_luecke() {
        let sink = TimelineSink::new(100);
        let timeline = sink.timeline();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        scheduler.schedule(vec![0.25; 50], 100).unwrap();
        scheduler.schedule(vec![0.5; 50], 100).unwrap();

        let mut out = vec![0.0; 100];
        timeline.lock().render(&mut out, 1);
        assert!(out[..50].iter().all(|&s| s == 0.25));
        assert!(out[50..].iter().all(|&s| s == 0.5));

        assert_eq!(scheduler.reap_finished(), 2);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn umgerechnete_segmente_ohne_stille_dazwischen() {
        // Typischer Fall: 24-kHz-Antworten auf einem 48-kHz-Geraet
        let sink = TimelineSink::new(48000);
        let timeline = sink.timeline();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink));

        let mut frames = 0;
        for _ in 0..3 {
            let seg = scheduler.schedule(vec![0.5; 2400], 24000).unwrap();
            frames += (seg.duration * 48000.0).round() as usize;
        }
        assert!(frames > 14000, "Frames {frames}");
        assert_eq!((scheduler.next_start_time() * 48000.0).round() as usize, frames);

        let mut out = vec![0.0; 14400];
        timeline.lock().render(&mut out, 1);

        let erster = out.iter().position(|s| s.abs() >= 1e-3).unwrap();
        assert!(erster < 16, "Einsatz erst bei Frame {erster}");
        let stumm: Vec<usize> = (erster..frames)
            .filter(|&i| out[i].abs() < 1e-3)
            .collect();
        assert!(stumm.is_empty(), "Stille Frames: {stumm:?}");
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn standard_ausgabe_oeffnen() {
        let on_error: DeviceErrorCallback = Arc::new(|_| {});
        let output = CpalOutput::open(None, &PlaybackConfig::default(), on_error);
        assert!(output.is_ok());
    }
}
