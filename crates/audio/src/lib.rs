//! oracle-audio – Audio-Seite der Voice-Bridge
//!
//! - PCM16-Codec und base64-Transportkodierung
//! - Mikrofon-Capture via cpal mit fester Blockgroesse
//! - Playback-Scheduler fuer lueckenlose Wiedergabe
//! - Geraete-Auflistung und Format-Aushandlung

pub mod capture;
pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod manual;
pub mod playback;
pub mod resample;
pub mod scheduler;
pub mod stream_thread;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{
    AudioInput, BlockAssembler, CaptureConfig, CaptureCounters, CapturePipeline, CaptureStats,
    CpalInput,
};
pub use codec::{
    bytes_to_text, floats_to_pcm16, parse_pcm_rate, pcm16_to_floats, text_to_bytes, AudioFormat,
    EncodedChunk,
};
pub use device::{list_input_devices, list_output_devices, AudioDevice};
pub use engine::{AudioBackend, AudioEngineConfig, CpalBackend, DeviceErrorCallback};
pub use error::{AudioError, AudioResult};
pub use manual::ManualSink;
pub use playback::{CpalOutput, PlaybackConfig, PlaybackTimeline, TimelineSink};
pub use scheduler::{AudioSink, PlaybackScheduler, ScheduledSegment, SourceId};
