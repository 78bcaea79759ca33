//! Fehlertypen fuer die Oracle Voice-Bridge
//!
//! Crate-uebergreifender Fehler-Enum. Untermodule definieren eigene
//! Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias
pub type Result<T> = std::result::Result<T, OracleError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum OracleError {
    // --- Verbindung ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl OracleError {
    /// Erstellt einen Konfigurationsfehler aus einer beliebigen Nachricht
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler die Gegenstelle betrifft
    /// (und nicht die lokale Konfiguration oder Daten)
    pub fn ist_verbindungsfehler(&self) -> bool {
        matches!(self, Self::Verbindung(_) | Self::Zeitlimit(_))
    }
}
