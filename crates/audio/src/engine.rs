//! Audio-Backend – Belegung von Ein- und Ausgabe
//!
//! Die Sitzung kennt nur das [`AudioBackend`]-Trait. [`CpalBackend`]
//! belegt echte Geraete, Tests setzen eigene Backends ein.

use std::sync::Arc;

use tracing::debug;

use crate::capture::{AudioInput, CaptureConfig, CpalInput};
use crate::error::{AudioError, AudioResult};
use crate::playback::{CpalOutput, PlaybackConfig};
use crate::scheduler::AudioSink;

/// Meldet Geraetefehler aus dem Audio-Thread an die Sitzung
pub type DeviceErrorCallback = Arc<dyn Fn(AudioError) + Send + Sync>;

/// Quelle fuer Ein- und Ausgabegeraete einer Sitzung
pub trait AudioBackend: Send {
    /// Belegt das Eingabegeraet (Mikrofon)
    fn acquire_input(&mut self, on_error: DeviceErrorCallback) -> AudioResult<Box<dyn AudioInput>>;

    /// Oeffnet die Ausgabe (Lautsprecher)
    fn open_output(&mut self, on_error: DeviceErrorCallback) -> AudioResult<Box<dyn AudioSink>>;
}

/// Konfiguration der Audio-Seite
#[derive(Debug, Clone, Default)]
pub struct AudioEngineConfig {
    /// Name des Eingabegeraets (None = Standard)
    pub input_device: Option<String>,
    /// Name des Ausgabegeraets (None = Standard)
    pub output_device: Option<String>,
    /// Capture-Konfiguration
    pub capture: CaptureConfig,
    /// Playback-Konfiguration
    pub playback: PlaybackConfig,
}

/// Backend ueber cpal
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    config: AudioEngineConfig,
}

impl CpalBackend {
    pub fn new(config: AudioEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AudioEngineConfig {
        &self.config
    }
}

impl AudioBackend for CpalBackend {
    fn acquire_input(&mut self, on_error: DeviceErrorCallback) -> AudioResult<Box<dyn AudioInput>> {
        debug!(geraet = ?self.config.input_device, "Belege Eingabegeraet");
        let input = CpalInput::acquire(
            self.config.input_device.as_deref(),
            &self.config.capture,
            on_error,
        )?;
        Ok(Box::new(input))
    }

    fn open_output(&mut self, on_error: DeviceErrorCallback) -> AudioResult<Box<dyn AudioSink>> {
        debug!(geraet = ?self.config.output_device, "Oeffne Ausgabegeraet");
        let output = CpalOutput::open(
            self.config.output_device.as_deref(),
            &self.config.playback,
            on_error,
        )?;
        Ok(Box::new(output))
    }
}
