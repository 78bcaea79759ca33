//! Sitzungszustand und Benachrichtigungen
//!
//! Der Lebenszyklus einer Voice-Sitzung:
//!
//! ```text
//! Idle -> Connecting -> Active -> Closed
//!              |           |
//!              +-----------+--> Failed
//! ```
//!
//! Nach `Closed` oder `Failed` kann eine neue Sitzung gestartet werden.

use serde::{Deserialize, Serialize};

/// Beobachtbarer Zustand einer Voice-Sitzung
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Noch nie gestartet
    #[default]
    Idle,
    /// Geraet belegt, Verbindung wird aufgebaut
    Connecting,
    /// Verbindung offen, Audio fliesst in beide Richtungen
    Active,
    /// Vom Benutzer beendet
    Closed,
    /// Durch Geraete- oder Transportfehler beendet
    Failed,
}

impl SessionState {
    /// Connecting oder Active – es existiert eine laufende Sitzung
    pub fn ist_laufend(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    /// Closed oder Failed
    pub fn ist_beendet(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Benachrichtigungen an Beobachter einer Sitzung (z.B. eine Anzeige)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum SessionNotification {
    /// Zustandswechsel
    Zustand { zustand: SessionState },
    /// Transkript der Modell-Ausgabe wurde erweitert (vollstaendiger Stand)
    Transkript { text: String },
    /// Transkript der Benutzer-Eingabe
    EingabeTranskript { text: String },
    /// Das Modell hat seinen Redebeitrag beendet
    ZugBeendet,
    /// Das Modell wurde unterbrochen, laufende Wiedergabe gestoppt
    Unterbrochen,
    /// Ein Audio-Segment konnte nicht dekodiert werden und wurde verworfen
    SegmentVerworfen { grund: String },
    /// Sitzung fehlgeschlagen
    Fehler { grund: String },
}
