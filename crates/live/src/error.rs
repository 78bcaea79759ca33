//! Fehlertypen der Sitzungssteuerung

use oracle_audio::AudioError;
use oracle_core::OracleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Es laeuft bereits eine Sitzung")]
    SitzungLaeuft,

    #[error("Audio-Geraet nicht verfuegbar: {0}")]
    GeraetNichtVerfuegbar(#[from] AudioError),

    #[error("Transportfehler: {0}")]
    Transport(String),

    #[error("Dekodierung fehlgeschlagen: {0}")]
    Dekodierung(String),

    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] OracleError),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Bridge-Worker beendet")]
    WorkerBeendet,
}

impl LiveError {
    /// Fehler, die eine Sitzung beenden
    ///
    /// Dekodier- und Protokollfehler betreffen nur eine Nachricht.
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::GeraetNichtVerfuegbar(_)
                | Self::Transport(_)
                | Self::Konfiguration(_)
                | Self::WorkerBeendet
        )
    }
}

pub type LiveResult<T> = Result<T, LiveError>;
