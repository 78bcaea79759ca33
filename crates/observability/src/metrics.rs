//! Prometheus-kompatible Metriken fuer die Voice-Bridge
//!
//! Registrierte Metriken:
//! - `oracle_chunks_sent_total` – Counter: An den Transport uebergebene Audio-Chunks
//! - `oracle_chunks_dropped_total` – Counter: Verworfene Chunks (Warteschlange voll/zu)
//! - `oracle_segments_scheduled_total` – Counter: Eingeplante Playback-Segmente
//! - `oracle_segments_dropped_total` – Counter: Nicht dekodierbare Segmente
//! - `oracle_sessions_total` – Counter: Gestartete Sitzungen
//! - `oracle_session_failures_total` – Counter: Fehlgeschlagene Sitzungen
//! - `oracle_playback_queue_seconds` – Gauge: Eingeplanter Audio-Vorlauf
//! - `oracle_playback_active_sources` – Gauge: Laufende Playback-Segmente

use anyhow::Result;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Prometheus-Metriken der Bridge
#[derive(Clone)]
pub struct BridgeMetrics {
    pub registry: Arc<Registry>,

    // Capture
    pub chunks_sent_total: IntCounter,
    pub chunks_dropped_total: IntCounter,

    // Playback
    pub segments_scheduled_total: IntCounter,
    pub segments_dropped_total: IntCounter,
    pub playback_queue_seconds: Gauge,
    pub playback_active_sources: IntGauge,

    // Sitzungen
    pub sessions_total: IntCounter,
    pub session_failures_total: IntCounter,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl BridgeMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let chunks_sent_total = zaehler(
            &registry,
            "oracle_chunks_sent_total",
            "An den Transport uebergebene Audio-Chunks",
        )?;
        let chunks_dropped_total = zaehler(
            &registry,
            "oracle_chunks_dropped_total",
            "Verworfene Audio-Chunks (Warteschlange voll oder geschlossen)",
        )?;
        let segments_scheduled_total = zaehler(
            &registry,
            "oracle_segments_scheduled_total",
            "Eingeplante Playback-Segmente",
        )?;
        let segments_dropped_total = zaehler(
            &registry,
            "oracle_segments_dropped_total",
            "Verworfene Playback-Segmente (Dekodierfehler)",
        )?;
        let sessions_total = zaehler(&registry, "oracle_sessions_total", "Gestartete Sitzungen")?;
        let session_failures_total = zaehler(
            &registry,
            "oracle_session_failures_total",
            "Fehlgeschlagene Sitzungen",
        )?;

        let playback_queue_seconds = Gauge::with_opts(Opts::new(
            "oracle_playback_queue_seconds",
            "Eingeplanter Audio-Vorlauf in Sekunden",
        ))?;
        registry.register(Box::new(playback_queue_seconds.clone()))?;

        let playback_active_sources = IntGauge::with_opts(Opts::new(
            "oracle_playback_active_sources",
            "Laufende Playback-Segmente",
        ))?;
        registry.register(Box::new(playback_active_sources.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            chunks_sent_total,
            chunks_dropped_total,
            segments_scheduled_total,
            segments_dropped_total,
            playback_queue_seconds,
            playback_active_sources,
            sessions_total,
            session_failures_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
