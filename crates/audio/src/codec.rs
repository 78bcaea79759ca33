//! PCM16-Codec und Text-Transportkodierung
//!
//! Wandelt f32-Samples (-1.0..1.0) in 16-Bit Little-Endian PCM und zurueck,
//! und PCM-Bytes in base64-Text, weil der Transportkanal nur Text traegt.
//!
//! Ueberlaufende Samples werden saettigend begrenzt statt umgebrochen:
//! `1.0` wird zu `32767`, nicht zu `-32768`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{AudioError, AudioResult};

/// Skalierungsfaktor zwischen f32 und i16
pub const PCM16_SCALE: f32 = 32768.0;

/// Abtastrate fuer Mikrofon-Capture
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;
/// Abtastrate fuer Modell-Audio
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

const MIME_PCM: &str = "audio/pcm";

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Abtastrate und Kanalanzahl eines PCM-Stroms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// 16 kHz Mono – Mikrofon zum Modell
    pub const fn capture() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// 24 kHz Mono – Modell zum Lautsprecher
    pub const fn playback() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Dauer von `frames` Frames in Sekunden
    pub fn duration_of(&self, frames: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    /// MIME-Tag, z.B. `audio/pcm;rate=16000`
    pub fn mime_type(&self) -> String {
        format!("{MIME_PCM};rate={}", self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Sample-Konvertierung
// ---------------------------------------------------------------------------

/// Kodiert f32-Samples zu 16-Bit Little-Endian PCM
///
/// Skaliert mit 32768 und schneidet Richtung Null ab. Werte ausserhalb
/// von -1.0..1.0 saettigen bei `i16::MIN`/`i16::MAX`, NaN wird zu 0.
pub fn floats_to_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        // `as` saettigt bei f32 -> i16 und bildet NaN auf 0 ab
        buf.put_i16_le((s * PCM16_SCALE) as i16);
    }
    buf.freeze()
}

/// Dekodiert 16-Bit Little-Endian PCM zu f32, getrennt nach Kanaelen
///
/// Die Eingabe ist verschraenkt (L R L R ...). Das Ergebnis enthaelt
/// pro Kanal eine Sample-Folge gleicher Laenge.
pub fn pcm16_to_floats(bytes: &[u8], channels: u16) -> AudioResult<Vec<Vec<f32>>> {
    if channels == 0 {
        return Err(AudioError::Dekodierung("Kanalanzahl 0".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(AudioError::Dekodierung(format!(
            "ungerade Byte-Anzahl {} fuer PCM16",
            bytes.len()
        )));
    }
    let channels = channels as usize;
    let sample_count = bytes.len() / 2;
    if sample_count % channels != 0 {
        return Err(AudioError::Dekodierung(format!(
            "{sample_count} Samples lassen sich nicht auf {channels} Kanaele verteilen"
        )));
    }

    let frames = sample_count / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    let mut cursor = bytes;
    for _ in 0..frames {
        for kanal in out.iter_mut() {
            kanal.push(cursor.get_i16_le() as f32 / PCM16_SCALE);
        }
    }
    Ok(out)
}

/// Mischt verschraenkte Mehrkanal-Samples zu Mono (Mittelwert)
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Text-Transportkodierung
// ---------------------------------------------------------------------------

/// Binaer -> base64 (Standard-Alphabet mit Padding)
pub fn bytes_to_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// base64 -> Binaer
pub fn text_to_bytes(text: &str) -> AudioResult<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| AudioError::Dekodierung(format!("base64: {e}")))
}

/// Liest die Abtastrate aus einem MIME-Tag wie `audio/pcm;rate=24000`
///
/// Gibt `None` zurueck wenn kein gueltiger `rate`-Parameter vorhanden ist.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|&rate| rate > 0)
}

// ---------------------------------------------------------------------------
// EncodedChunk
// ---------------------------------------------------------------------------

/// Text-sichere Serialisierung eines PCM-Frames plus MIME-Tag
///
/// Wird vom Capture erzeugt und sofort vom Transport verbraucht.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

impl EncodedChunk {
    /// Kodiert einen Block f32-Samples
    pub fn from_samples(samples: &[f32], format: AudioFormat) -> Self {
        Self {
            mime_type: format.mime_type(),
            data: bytes_to_text(&floats_to_pcm16(samples)),
        }
    }

    /// Dekodiert zurueck zu PCM-Bytes
    pub fn to_pcm(&self) -> AudioResult<Vec<u8>> {
        text_to_bytes(&self.data)
    }
}
