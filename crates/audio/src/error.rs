//! Fehlertypen fuer die Audio-Seite

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Seite
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Audio-Thread-Fehler: {0}")]
    AudioThread(String),

    #[error("Dekodierung fehlgeschlagen: {0}")]
    Dekodierung(String),

    #[error("Resampler-Fehler: {0}")]
    Resampler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl AudioError {
    /// Geraet konnte nicht belegt oder betrieben werden
    ///
    /// Dekodier- und Konfigurationsfehler betreffen einzelne Daten oder
    /// Aufrufe, nicht das Geraet selbst.
    pub fn ist_geraetefehler(&self) -> bool {
        matches!(
            self,
            Self::GeraetNichtGefunden(_)
                | Self::KeinStandardEingabegeraet
                | Self::KeinStandardAusgabegeraet
                | Self::StreamFehler(_)
                | Self::AudioThread(_)
        )
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
