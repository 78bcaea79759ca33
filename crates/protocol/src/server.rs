//! Eingehende Nachrichten (Modell -> Client)
//!
//! Eine einzelne Server-Nachricht kann mehrere Ereignisse tragen, z.B.
//! Audio und Transkript im selben Frame. [`ServerMessage::into_events`]
//! zerlegt sie in eine geordnete Liste von [`LiveEvent`]s.

use oracle_core::OracleError;
use serde::Deserialize;

/// Ein einzelnes Ereignis der Gegenstelle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Setup abgeschlossen, Audio darf fliessen
    SetupComplete,
    /// Synthetisiertes Audio (base64, noch nicht dekodiert)
    Audio {
        mime_type: Option<String>,
        data: String,
    },
    /// Transkript der Modell-Ausgabe
    OutputTranscript(String),
    /// Transkript der Benutzer-Eingabe
    InputTranscript(String),
    /// Das Modell hat seinen Redebeitrag beendet
    TurnComplete,
    /// Das Modell wurde durch neue Benutzer-Sprache unterbrochen
    Interrupted,
    /// Die Gegenstelle kuendigt das Verbindungsende an
    GoAway,
    /// Fehler der Gegenstelle
    Error(String),
}

/// Roh-Umschlag einer Server-Nachricht
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerMessage {
    /// Parst einen JSON-Text-Frame
    pub fn parse(text: &str) -> oracle_core::Result<Self> {
        serde_json::from_str(text).map_err(|e| OracleError::UngueltigeNachricht(e.to_string()))
    }

    /// Parst einen Binaer-Frame, der JSON enthaelt
    ///
    /// Die Gegenstelle sendet JSON teilweise als Binaer-Frame.
    pub fn parse_bytes(data: &[u8]) -> oracle_core::Result<Self> {
        if data.first() != Some(&b'{') {
            return Err(OracleError::UngueltigeNachricht(format!(
                "Binaer-Frame ohne JSON ({} Bytes)",
                data.len()
            )));
        }
        let text = std::str::from_utf8(data)
            .map_err(|e| OracleError::UngueltigeNachricht(e.to_string()))?;
        Self::parse(text)
    }

    /// Zerlegt die Nachricht in Ereignisse, in Protokoll-Reihenfolge
    pub fn into_events(self) -> Vec<LiveEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(LiveEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(LiveEvent::Interrupted);
            }
            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                if let Some(inline) = part.inline_data {
                    if !inline.data.is_empty() {
                        events.push(LiveEvent::Audio {
                            mime_type: inline.mime_type,
                            data: inline.data,
                        });
                    }
                }
            }
            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                events.push(LiveEvent::InputTranscript(t.text));
            }
            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                events.push(LiveEvent::OutputTranscript(t.text));
            }
            if content.turn_complete {
                events.push(LiveEvent::TurnComplete);
            }
        }

        if self.go_away.is_some() {
            events.push(LiveEvent::GoAway);
        }

        if let Some(err) = self.error {
            events.push(LiveEvent::Error(
                err.message
                    .unwrap_or_else(|| "Unbekannter Fehler der Gegenstelle".to_string()),
            ));
        }

        events
    }
}
