//! Bridge-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Bridge ohne Konfigurationsdatei
//! lauffaehig ist. Nur der API-Schluessel kommt immer aus der Umgebung.

use std::time::Duration;

use anyhow::{bail, Context};
use oracle_audio::{AudioEngineConfig, CaptureConfig, PlaybackConfig};
use oracle_live::{LiveConfig, SessionConfig};
use oracle_observability::logging::{log_format_gueltig, log_level_gueltig};
use oracle_protocol::SetupParams;
use serde::{Deserialize, Serialize};

/// Vollstaendige Bridge-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Verbindung zum Sprachmodell
    pub live: LiveEinstellungen,
    /// Audio-Geraete und Formate
    pub audio: AudioEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Verbindung zum Realtime-Sprachmodell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveEinstellungen {
    /// WebSocket-Endpunkt (ohne `?key=`)
    pub endpoint: String,
    /// Modellname
    pub model: String,
    /// Vorgefertigte Stimme
    pub voice: String,
    /// Systemanweisung fuer das Modell
    pub system_instruction: String,
    /// Name der Umgebungsvariable mit dem API-Schluessel
    pub api_key_env: String,
    /// Obergrenze fuer Verbindungsaufbau plus Setup in Sekunden
    pub setup_timeout_secs: u64,
}

impl Default for LiveEinstellungen {
    fn default() -> Self {
        Self {
            endpoint: oracle_live::ws::DEFAULT_ENDPOINT.into(),
            model: "gemini-2.5-flash-native-audio-preview-12-2025".into(),
            voice: "Zephyr".into(),
            system_instruction: "You are the BaseTech AI Oracle. You guide users on the Base \
                Layer 2 ecosystem. Be concise, expert, and encouraging. Focus on Base chain \
                specifics like Aerodrome, Clanker, and Coinbase infrastructure."
                .into(),
            api_key_env: "API_KEY".into(),
            setup_timeout_secs: 15,
        }
    }
}

/// Audio-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Eingabegeraet (Teilstring des Namens, leer = Standard)
    pub input_device: Option<String>,
    /// Ausgabegeraet (Teilstring des Namens, leer = Standard)
    pub output_device: Option<String>,
    /// Abtastrate der gesendeten Chunks in Hz
    pub capture_rate: u32,
    /// Samples pro gesendetem Chunk
    pub block_size: usize,
    /// Abtastrate der Wiedergabe in Hz
    pub playback_rate: u32,
    /// Maximale Anzahl wartender ausgehender Chunks
    pub outbound_capacity: usize,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_rate: 16000,
            block_size: 4096,
            playback_rate: 24000,
            outbound_capacity: 64,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl BridgeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die TOML allein nicht ausschliesst
    pub fn validieren(&self) -> anyhow::Result<()> {
        if self.live.endpoint.trim().is_empty() {
            bail!("live.endpoint darf nicht leer sein");
        }
        if self.live.model.trim().is_empty() {
            bail!("live.model darf nicht leer sein");
        }
        if self.live.setup_timeout_secs == 0 {
            bail!("live.setup_timeout_secs muss groesser als 0 sein");
        }
        if self.audio.capture_rate == 0 || self.audio.playback_rate == 0 {
            bail!("Abtastraten muessen groesser als 0 sein");
        }
        if self.audio.block_size == 0 {
            bail!("audio.block_size muss groesser als 0 sein");
        }
        if self.audio.outbound_capacity == 0 {
            bail!("audio.outbound_capacity muss groesser als 0 sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("Unbekanntes Log-Level '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Unbekanntes Log-Format '{}'", self.logging.format);
        }
        Ok(())
    }

    /// Liest den API-Schluessel aus der konfigurierten Umgebungsvariable
    pub fn api_key(&self) -> anyhow::Result<String> {
        let key = std::env::var(&self.live.api_key_env).with_context(|| {
            format!("Umgebungsvariable '{}' nicht gesetzt", self.live.api_key_env)
        })?;
        if key.trim().is_empty() {
            bail!("Umgebungsvariable '{}' ist leer", self.live.api_key_env);
        }
        Ok(key)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.audio.capture_rate,
            block_size: self.audio.block_size,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            capture: self.capture_config(),
            playback_rate: self.audio.playback_rate,
        }
    }

    pub fn audio_engine_config(&self) -> AudioEngineConfig {
        AudioEngineConfig {
            input_device: nicht_leer(&self.audio.input_device),
            output_device: nicht_leer(&self.audio.output_device),
            capture: self.capture_config(),
            playback: PlaybackConfig {
                sample_rate: self.audio.playback_rate,
            },
        }
    }

    pub fn live_config(&self, api_key: String) -> LiveConfig {
        LiveConfig {
            endpoint: self.live.endpoint.clone(),
            api_key,
            setup: SetupParams {
                model: self.live.model.clone(),
                voice_name: self.live.voice.clone(),
                system_instruction: self.live.system_instruction.clone(),
                output_transcription: true,
            },
            setup_timeout: Duration::from_secs(self.live.setup_timeout_secs),
            outbound_capacity: self.audio.outbound_capacity,
        }
    }
}

fn nicht_leer(wert: &Option<String>) -> Option<String> {
    wert.as_ref()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
}
