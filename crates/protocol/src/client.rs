//! Ausgehende Nachrichten (Client -> Modell)
//!
//! ## Design
//! - Erste Nachricht jeder Verbindung ist immer `setup`
//! - Danach nur noch `realtimeInput` mit jeweils einem Audio-Chunk
//! - Feldnamen im camelCase des Modell-Protokolls, via serde umbenannt

use serde::Serialize;

/// Antwort-Modalitaet: das Modell antwortet mit synthetisierter Sprache
pub const MODALITY_AUDIO: &str = "AUDIO";

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Parameter fuer den Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    /// Modellname, mit oder ohne `models/`-Praefix
    pub model: String,
    /// Name der vorgefertigten Stimme
    pub voice_name: String,
    /// Systemanweisung (leer = keine)
    pub system_instruction: String,
    /// Transkript der Modell-Ausgabe anfordern
    pub output_transcription: bool,
}

/// Setup-Umschlag: `{"setup": {...}}`
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyObject>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serialisiert zu `{}`
#[derive(Debug, Default, Serialize)]
pub struct EmptyObject {}

impl SetupMessage {
    /// Baut die Setup-Nachricht aus den Parametern
    pub fn new(params: &SetupParams) -> Self {
        let model = if params.model.starts_with("models/") {
            params.model.clone()
        } else {
            format!("models/{}", params.model)
        };

        let system_instruction = (!params.system_instruction.trim().is_empty()).then(|| Content {
            parts: vec![TextPart {
                text: params.system_instruction.clone(),
            }],
        });

        Self {
            setup: SetupPayload {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![MODALITY_AUDIO.to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: params.voice_name.clone(),
                            },
                        },
                    },
                },
                system_instruction,
                output_audio_transcription: params.output_transcription.then(EmptyObject::default),
            },
        }
    }

    /// Serialisiert zu JSON
    pub fn to_json(&self) -> oracle_core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Realtime-Input
// ---------------------------------------------------------------------------

/// Audio-Chunk: MIME-Tag plus base64-Daten
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

/// `{"realtimeInput": {"mediaChunks": [...]}}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

impl RealtimeInputMessage {
    /// Verpackt einen einzelnen bereits kodierten Audio-Chunk
    pub fn audio(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: mime_type.into(),
                    data: data.into(),
                }],
            },
        }
    }

    /// Serialisiert zu JSON
    pub fn to_json(&self) -> oracle_core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SetupParams {
        SetupParams {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".into(),
            voice_name: "Zephyr".into(),
            system_instruction: "Sei knapp.".into(),
            output_transcription: true,
        }
    }

    #[test]
    fn setup_modell_bekommt_praefix() {
        let msg = SetupMessage::new(&params());
        assert_eq!(
            msg.setup.model,
            "models/gemini-2.5-flash-native-audio-preview-12-2025"
        );
    }

    #[test]
    fn setup_praefix_wird_nicht_verdoppelt() {
        let mut p = params();
        p.model = "models/x".into();
        assert_eq!(SetupMessage::new(&p).setup.model, "models/x");
    }

    #[test]
    fn setup_json_struktur() {
        let json = SetupMessage::new(&params()).to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            v["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            v["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert_eq!(v["setup"]["systemInstruction"]["parts"][0]["text"], "Sei knapp.");
        assert!(v["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_ohne_anweisung_und_transkript() {
        let mut p = params();
        p.system_instruction = "   ".into();
        p.output_transcription = false;
        let json = SetupMessage::new(&p).to_json().unwrap();
        assert!(!json.contains("systemInstruction"));
        assert!(!json.contains("outputAudioTranscription"));
    }

    #[test]
    fn realtime_input_format() {
        let json = RealtimeInputMessage::audio("audio/pcm;rate=16000", "AAEC")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAEC"}]}}"#
        );
    }
}
