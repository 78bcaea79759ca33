//! Mikrofon-Capture via cpal
//!
//! Der cpal-Callback liefert Bloecke beliebiger Laenge. Die
//! [`CapturePipeline`] sammelt sie zu festen Bloecken (Standard 4096
//! Samples bei 16 kHz Mono), kodiert jeden Block zu einem
//! [`EncodedChunk`] und uebergibt ihn per `try_send` an den Transport.
//!
//! Der Callback wartet nie: ist die Warteschlange voll oder geschlossen,
//! wird der Chunk verworfen und gezaehlt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::DeviceTrait;
use cpal::SampleFormat;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::codec::{downmix_to_mono, AudioFormat, EncodedChunk, CAPTURE_SAMPLE_RATE};
use crate::device::{load_cpal_input_device, negotiate_input_format, NegotiatedFormat};
use crate::engine::DeviceErrorCallback;
use crate::error::{AudioError, AudioResult};
use crate::resample::StreamResampler;
use crate::stream_thread::StreamThread;

/// Standard-Blockgroesse in Samples
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Konfiguration fuer den Audio-Capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Abtastrate der gesendeten Chunks in Hz
    pub sample_rate: u32,
    /// Samples pro Chunk
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl CaptureConfig {
    /// Format der gesendeten Chunks (immer Mono)
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// BlockAssembler
// ---------------------------------------------------------------------------

/// Sammelt Samples zu Bloecken fester Groesse
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    buffer: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            buffer: Vec::with_capacity(block_size),
        }
    }

    /// Haengt Samples an und ruft `on_block` fuer jeden vollen Block
    ///
    /// Gibt die Anzahl der fertigen Bloecke zurueck. Der Rest bleibt
    /// fuer den naechsten Aufruf liegen.
    pub fn push(&mut self, mut samples: &[f32], mut on_block: impl FnMut(&[f32])) -> usize {
        let mut fertig = 0;
        loop {
            let fehlend = self.block_size - self.buffer.len();
            if samples.len() < fehlend {
                self.buffer.extend_from_slice(samples);
                return fertig;
            }
            self.buffer.extend_from_slice(&samples[..fehlend]);
            on_block(&self.buffer);
            self.buffer.clear();
            samples = &samples[fehlend..];
            fertig += 1;
        }
    }

    /// Samples im angefangenen Block
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

// ---------------------------------------------------------------------------
// Zaehler
// ---------------------------------------------------------------------------

/// Momentaufnahme der Capture-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub blocks_sent: u64,
    pub blocks_dropped: u64,
}

/// Lock-freie Zaehler, geteilt zwischen Callback und Sitzung
#[derive(Debug, Default)]
pub struct CaptureCounters {
    blocks_sent: AtomicU64,
    blocks_dropped: AtomicU64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Block-Bildung, Kodierung und nicht-blockierende Uebergabe
pub struct CapturePipeline {
    format: AudioFormat,
    assembler: BlockAssembler,
    resampler: Option<StreamResampler>,
    tx: mpsc::Sender<EncodedChunk>,
    counters: Arc<CaptureCounters>,
}

impl CapturePipeline {
    pub fn new(config: &CaptureConfig, tx: mpsc::Sender<EncodedChunk>) -> Self {
        Self {
            format: config.format(),
            assembler: BlockAssembler::new(config.block_size),
            resampler: None,
            tx,
            counters: Arc::new(CaptureCounters::default()),
        }
    }

    /// Geraet liefert in `rate` statt in der Zielrate
    pub fn with_source_rate(mut self, rate: u32) -> Self {
        if rate == self.format.sample_rate || rate == 0 {
            self.resampler = None;
            return self;
        }
        self.resampler = match StreamResampler::new(rate, self.format.sample_rate) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(rate, "Resampler nicht verfuegbar, Samples unveraendert: {e}");
                None
            }
        };
        self
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Geteilte Zaehler (bleiben nach dem Drop der Pipeline lesbar)
    pub fn counters(&self) -> Arc<CaptureCounters> {
        Arc::clone(&self.counters)
    }

    /// Verarbeitet Mono-Samples in Geraete-Rate
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let resampled;
        let samples = match self.resampler.as_mut() {
            Some(r) => match r.process(samples) {
                Ok(out) => {
                    resampled = out;
                    &resampled[..]
                }
                Err(e) => {
                    trace!("Umrechnung fehlgeschlagen, Block verworfen: {e}");
                    return 0;
                }
            },
            None => samples,
        };

        let Self {
            format,
            assembler,
            tx,
            counters,
            ..
        } = self;
        assembler.push(samples, |block| {
            offer_block(tx, counters, *format, block);
        })
    }

    /// Verarbeitet verschraenkte Mehrkanal-Samples (Downmix auf Mono)
    pub fn push_interleaved(&mut self, data: &[f32], channels: u16) -> usize {
        if channels <= 1 {
            return self.push_samples(data);
        }
        let mono = downmix_to_mono(data, channels);
        self.push_samples(&mono)
    }
}

fn offer_block(
    tx: &mpsc::Sender<EncodedChunk>,
    counters: &CaptureCounters,
    format: AudioFormat,
    block: &[f32],
) {
    let chunk = EncodedChunk::from_samples(block, format);
    match tx.try_send(chunk) {
        Ok(()) => {
            counters.blocks_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Full(_)) => {
            counters.blocks_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Sendewarteschlange voll, Chunk verworfen");
        }
        Err(TrySendError::Closed(_)) => {
            counters.blocks_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Transport geschlossen, Chunk verworfen");
        }
    }
}

// ---------------------------------------------------------------------------
// AudioInput
// ---------------------------------------------------------------------------

/// Belegtes Eingabegeraet
///
/// Nach `acquire` laeuft das Geraet bereits, Samples werden aber erst
/// nach `start` weitergegeben.
pub trait AudioInput: Send {
    /// Verbindet das Geraet mit der Pipeline
    fn start(&mut self, pipeline: CapturePipeline) -> AudioResult<()>;

    /// Gibt das Geraet frei. Idempotent.
    fn release(&mut self);

    fn is_acquired(&self) -> bool;
}

type PipelineSlot = Arc<Mutex<Option<CapturePipeline>>>;

/// Mikrofon ueber cpal
pub struct CpalInput {
    slot: PipelineSlot,
    format: NegotiatedFormat,
    thread: StreamThread,
}

impl CpalInput {
    /// Belegt das Eingabegeraet und startet den Stream
    pub fn acquire(
        device_name: Option<&str>,
        config: &CaptureConfig,
        on_error: DeviceErrorCallback,
    ) -> AudioResult<Self> {
        let device_name = device_name.map(str::to_string);
        let wanted_rate = config.sample_rate;
        let slot: PipelineSlot = Arc::new(Mutex::new(None));
        let callback_slot = Arc::clone(&slot);

        let (thread, format) = StreamThread::spawn("oracle-capture", move || {
            let device = load_cpal_input_device(device_name.as_deref())?;
            let format = negotiate_input_format(&device, wanted_rate)?;
            let stream = build_input_stream(&device, format, callback_slot, on_error)?;
            Ok((stream, format))
        })?;

        info!(
            rate = format.sample_rate,
            kanaele = format.channels,
            "Capture-Stream geoeffnet"
        );
        Ok(Self {
            slot,
            format,
            thread,
        })
    }

    pub fn format(&self) -> NegotiatedFormat {
        self.format
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, pipeline: CapturePipeline) -> AudioResult<()> {
        if !self.thread.ist_aktiv() {
            return Err(AudioError::StreamFehler("Capture-Stream beendet".into()));
        }
        let pipeline = pipeline.with_source_rate(self.format.sample_rate);
        *self.slot.lock() = Some(pipeline);
        debug!("Capture mit Pipeline verbunden");
        Ok(())
    }

    fn release(&mut self) {
        if self.thread.ist_aktiv() {
            self.thread.beenden();
            debug!("Eingabegeraet freigegeben");
        }
        self.slot.lock().take();
    }

    fn is_acquired(&self) -> bool {
        self.thread.ist_aktiv()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.release();
    }
}

/// Uebergibt Samples an die Pipeline, ohne auf den Lock zu warten
fn feed(slot: &PipelineSlot, data: &[f32], channels: u16) {
    if let Some(mut guard) = slot.try_lock() {
        if let Some(pipeline) = guard.as_mut() {
            pipeline.push_interleaved(data, channels);
        }
    }
}

fn build_input_stream(
    device: &cpal::Device,
    format: NegotiatedFormat,
    slot: PipelineSlot,
    on_error: DeviceErrorCallback,
) -> AudioResult<cpal::Stream> {
    let stream_config = format.stream_config();
    let channels = format.channels;
    let err_fn = move |err: cpal::StreamError| {
        on_error(AudioError::StreamFehler(err.to_string()));
    };

    let stream = match format.sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| feed(&slot, data, channels),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                feed(&slot, &floats, channels);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _| {
                let floats: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 - 32768.0) / 32768.0)
                    .collect();
                feed(&slot, &floats, channels);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {other:?}"
            )))
        }
    };
    stream.map_err(|e| AudioError::StreamFehler(e.to_string()))
}
