//! Oracle Bridge – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet eine
//! Sitzung. `--geraete` listet nur die Audio-Geraete auf.

use anyhow::Result;
use oracle_bridge::{config::BridgeConfig, geraete_auflisten, Bridge};
use oracle_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().skip(1).any(|a| a == "--geraete") {
        return geraete_auflisten();
    }

    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("ORACLE_CONFIG").unwrap_or_else(|_| "oracle.toml".into());

    let config = BridgeConfig::laden(&config_pfad)?;
    config.validieren()?;

    logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Oracle Bridge wird initialisiert"
    );

    Bridge::neu(config).starten().await
}
