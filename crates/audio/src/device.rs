//! Audio-Geraete: Auflistung, Auswahl und Format-Aushandlung
//!
//! Geraete werden ueber einen Teilstring ihres Namens ausgewaehlt,
//! `None` steht fuer das Standardgeraet des Hosts.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfig};
use tracing::{debug, warn};

use crate::error::{AudioError, AudioResult};

/// Gaengige Raten, die bei der Auflistung geprueft werden
const GAENGIGE_RATEN: [u32; 5] = [8000, 16000, 24000, 44100, 48000];

/// Repraesentiert ein Audio-Geraet mit seinen Eigenschaften
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Anzeigename des Geraets
    pub name: String,
    /// Unterstuetzte gaengige Abtastraten
    pub sample_rates: Vec<u32>,
    /// Maximale Kanalanzahl
    pub channels: u16,
    /// Standardgeraet des Hosts
    pub is_default: bool,
}

/// Vom Geraet tatsaechlich gelieferte Stream-Parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl NegotiatedFormat {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn from_supported(cfg: &SupportedStreamConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate().0,
            channels: cfg.channels(),
            sample_format: cfg.sample_format(),
        }
    }
}

/// Listet alle verfuegbaren Eingabegeraete auf
pub fn list_input_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        match describe_device(&device, true, default_name.as_deref()) {
            Ok(ad) => result.push(ad),
            Err(e) => warn!("Eingabegeraet konnte nicht gelesen werden: {}", e),
        }
    }
    debug!("Gefundene Eingabegeraete: {}", result.len());
    Ok(result)
}

/// Listet alle verfuegbaren Ausgabegeraete auf
pub fn list_output_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        match describe_device(&device, false, default_name.as_deref()) {
            Ok(ad) => result.push(ad),
            Err(e) => warn!("Ausgabegeraet konnte nicht gelesen werden: {}", e),
        }
    }
    debug!("Gefundene Ausgabegeraete: {}", result.len());
    Ok(result)
}

/// Laedt ein cpal-Device anhand des Namens fuer Eingabe
pub fn load_cpal_input_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinStandardEingabegeraet),
        Some(n) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            find_by_name(devices, n)
        }
    }
}

/// Laedt ein cpal-Device anhand des Namens fuer Ausgabe
pub fn load_cpal_output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::KeinStandardAusgabegeraet),
        Some(n) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            find_by_name(devices, n)
        }
    }
}

fn find_by_name(devices: impl Iterator<Item = Device>, name: &str) -> AudioResult<Device> {
    for device in devices {
        if let Ok(dev_name) = device.name() {
            if matches_name(&dev_name, name) {
                return Ok(device);
            }
        }
    }
    Err(AudioError::GeraetNichtGefunden(name.to_string()))
}

/// Teilstring-Vergleich ohne Gross-/Kleinschreibung
pub fn matches_name(device_name: &str, wanted: &str) -> bool {
    device_name
        .to_lowercase()
        .contains(&wanted.trim().to_lowercase())
}

/// Waehlt ein Eingabeformat, bevorzugt `wanted_rate` mit moeglichst
/// wenigen Kanaelen. Sonst gilt das Standardformat des Geraets.
pub fn negotiate_input_format(device: &Device, wanted_rate: u32) -> AudioResult<NegotiatedFormat> {
    let passend = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter(|c| c.min_sample_rate().0 <= wanted_rate && c.max_sample_rate().0 >= wanted_rate)
        .filter(|c| is_convertible(c.sample_format()))
        .min_by_key(|c| c.channels());

    let cfg = match passend {
        Some(range) => range.with_sample_rate(cpal::SampleRate(wanted_rate)),
        None => device
            .default_input_config()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
    };
    let format = NegotiatedFormat::from_supported(&cfg);
    if format.sample_rate != wanted_rate {
        debug!(
            gewuenscht = wanted_rate,
            geraet = format.sample_rate,
            "Eingabegeraet ohne Wunschrate, es wird umgerechnet"
        );
    }
    Ok(format)
}

/// Wie [`negotiate_input_format`], fuer Ausgabe
pub fn negotiate_output_format(device: &Device, wanted_rate: u32) -> AudioResult<NegotiatedFormat> {
    let passend = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter(|c| c.min_sample_rate().0 <= wanted_rate && c.max_sample_rate().0 >= wanted_rate)
        .filter(|c| is_convertible(c.sample_format()))
        .min_by_key(|c| c.channels());

    let cfg = match passend {
        Some(range) => range.with_sample_rate(cpal::SampleRate(wanted_rate)),
        None => device
            .default_output_config()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
    };
    let format = NegotiatedFormat::from_supported(&cfg);
    if format.sample_rate != wanted_rate {
        debug!(
            gewuenscht = wanted_rate,
            geraet = format.sample_rate,
            "Ausgabegeraet ohne Wunschrate, es wird umgerechnet"
        );
    }
    Ok(format)
}

/// Sample-Formate, die Capture und Playback wandeln koennen
pub fn is_convertible(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

fn describe_device(device: &Device, input: bool, default_name: Option<&str>) -> AudioResult<AudioDevice> {
    let name = device
        .name()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let ranges: Vec<(u32, u32, u16)> = if input {
        device
            .supported_input_configs()
            .map(|it| {
                it.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|it| {
                it.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                    .collect()
            })
            .unwrap_or_default()
    };

    let (sample_rates, channels) = summarize_ranges(&ranges);
    Ok(AudioDevice {
        is_default: default_name == Some(name.as_str()),
        name,
        sample_rates,
        channels,
    })
}

// (min, max, kanaele) -> (gaengige Raten, max. Kanaele)
fn summarize_ranges(ranges: &[(u32, u32, u16)]) -> (Vec<u32>, u16) {
    let mut sample_rates = Vec::new();
    let mut max_channels = 1u16;
    for &(min, max, channels) in ranges {
        for rate in GAENGIGE_RATEN {
            if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
        max_channels = max_channels.max(channels);
    }
    sample_rates.sort_unstable();
    (sample_rates, max_channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn eingabegeraete_auflistbar() {
        let devices = list_input_devices().expect("Liste sollte abrufbar sein");
        println!(
            "Eingabegeraete: {:?}",
            devices.iter().map(|d| &d.name).collect::<Vec<_>>()
        );
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn standard_eingabe_aushandeln() {
        let device = load_cpal_input_device(None).expect("Standardgeraet");
        let format = negotiate_input_format(&device, 16000).expect("Format");
        assert!(format.channels >= 1);
    }

    #[test]
    fn name_teilstring_ohne_gross_klein() {
        assert!(matches_name("USB Audio Mic (2- Rode)", "rode"));
        assert!(matches_name("Built-in Output", " built-in "));
        assert!(!matches_name("Built-in Output", "usb"));
    }

    #[test]
    fn raten_zusammenfassen() {
        let (raten, kanaele) = summarize_ranges(&[(16000, 16000, 1), (44100, 48000, 2)]);
        assert_eq!(raten, vec![16000, 44100, 48000]);
        assert_eq!(kanaele, 2);
    }

    #[test]
    fn konvertierbare_formate() {
        assert!(is_convertible(SampleFormat::F32));
        assert!(is_convertible(SampleFormat::I16));
        assert!(!is_convertible(SampleFormat::U8));
    }
}
