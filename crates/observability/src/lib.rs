//! # oracle-observability
//!
//! Observability fuer die Voice-Bridge:
//! - Prometheus-kompatible Zaehler fuer Capture, Playback und Sitzungen
//! - Structured Logging (text/json) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::BridgeMetrics;
