//! oracle-bridge – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Audio-Backend, Transport und den
//! Sitzungs-Worker zu einer lauffaehigen Bridge.

pub mod config;

use anyhow::Result;
use config::BridgeConfig;
use oracle_audio::{list_input_devices, list_output_devices, CpalBackend};
use oracle_core::{SessionNotification, SessionState};
use oracle_live::{VoiceBridge, WsConnector};
use oracle_observability::BridgeMetrics;
use tokio::sync::broadcast;

/// Haelt die geladene Konfiguration zusammen
pub struct Bridge {
    pub config: BridgeConfig,
}

impl Bridge {
    /// Erstellt eine neue Bridge aus der gegebenen Konfiguration
    pub fn neu(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Startet eine Sitzung und laeuft bis Ctrl-C oder Sitzungsende
    ///
    /// Reihenfolge:
    /// 1. API-Schluessel aus der Umgebung lesen
    /// 2. Audio-Backend und WebSocket-Connector bauen
    /// 3. Sitzung starten, Benachrichtigungen protokollieren
    /// 4. Bei Ctrl-C oder Fehler sauber beenden
    pub async fn starten(self) -> Result<()> {
        let api_key = self.config.api_key()?;
        let metrics = BridgeMetrics::neu()?;

        let backend = CpalBackend::new(self.config.audio_engine_config());
        let connector = WsConnector::new(self.config.live_config(api_key));

        tracing::info!(
            modell = %self.config.live.model,
            stimme = %self.config.live.voice,
            capture_rate = self.config.audio.capture_rate,
            playback_rate = self.config.audio.playback_rate,
            "Bridge startet"
        );

        let bridge = VoiceBridge::spawn(
            backend,
            connector,
            self.config.session_config(),
            metrics.clone(),
        );
        let mut benachrichtigungen = bridge.subscribe();

        let ergebnis = match bridge.start().await {
            Ok(session_id) => {
                tracing::info!(%session_id, "Sitzung gestartet, Ctrl-C beendet");
                warten(&mut benachrichtigungen).await
            }
            Err(e) => Err(e.into()),
        };

        if bridge.stop().await.unwrap_or(false) {
            tracing::info!("Sitzung beendet");
        }
        bridge.shutdown().await;

        match metrics.exportieren() {
            Ok(text) => tracing::debug!(metriken = %text, "Abschlussmetriken"),
            Err(e) => tracing::warn!(fehler = %e, "Metriken nicht exportierbar"),
        }
        ergebnis
    }
}

/// Protokolliert Benachrichtigungen bis Ctrl-C oder Sitzungsende
async fn warten(rx: &mut broadcast::Receiver<SessionNotification>) -> Result<()> {
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown-Signal empfangen, Bridge wird beendet");
                return Ok(());
            }
            n = rx.recv() => match n {
                Ok(n) => {
                    if let Some(ende) = protokollieren(&n) {
                        return ende;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(verpasst)) => {
                    tracing::warn!(verpasst, "Benachrichtigungen uebersprungen");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Gibt `Some` zurueck, sobald die Sitzung beendet ist
fn protokollieren(n: &SessionNotification) -> Option<Result<()>> {
    match n {
        SessionNotification::Zustand { zustand } => {
            tracing::info!(zustand = %zustand, "Zustand geaendert");
            match zustand {
                SessionState::Closed => Some(Ok(())),
                _ => None,
            }
        }
        SessionNotification::Transkript { text } => {
            tracing::info!(transkript = %text, "Oracle");
            None
        }
        SessionNotification::EingabeTranskript { text } => {
            tracing::info!(transkript = %text, "Nutzer");
            None
        }
        SessionNotification::ZugBeendet => {
            tracing::debug!("Zug beendet");
            None
        }
        SessionNotification::Unterbrochen => {
            tracing::debug!("Wiedergabe unterbrochen");
            None
        }
        SessionNotification::SegmentVerworfen { grund } => {
            tracing::warn!(grund = %grund, "Audio-Segment verworfen");
            None
        }
        SessionNotification::Fehler { grund } => {
            Some(Err(anyhow::anyhow!("Sitzung fehlgeschlagen: {grund}")))
        }
    }
}

/// Gibt die verfuegbaren Audio-Geraete aus
pub fn geraete_auflisten() -> Result<()> {
    for (art, geraete) in [
        ("Eingabe", list_input_devices()?),
        ("Ausgabe", list_output_devices()?),
    ] {
        println!("{art}:");
        for g in geraete {
            let standard = if g.is_default { " (Standard)" } else { "" };
            println!(
                "  {}{standard} – {} Kanaele, Raten {:?}",
                g.name, g.channels, g.sample_rates
            );
        }
    }
    Ok(())
}
