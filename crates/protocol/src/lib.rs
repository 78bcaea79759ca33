//! oracle-protocol – Nachrichten der Realtime-Verbindung
//!
//! Dieses Crate definiert die JSON-Umschlaege, die zwischen Client und
//! dem entfernten Sprachmodell ueber die WebSocket-Verbindung laufen.
//!
//! - [`client`]: ausgehend (Setup, Realtime-Audio)
//! - [`server`]: eingehend (Setup-Bestaetigung, Audio, Transkripte, Fehler)

pub mod client;
pub mod server;

pub use client::{MediaChunk, RealtimeInputMessage, SetupMessage, SetupParams};
pub use server::{LiveEvent, ServerMessage};
