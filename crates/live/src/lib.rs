//! oracle-live – Sitzungssteuerung der Voice-Bridge
//!
//! - [`VoiceSession`]: synchrone Zustandsmaschine einer Sitzung
//! - [`VoiceBridge`]: ein Tokio-Worker, der die Sitzung besitzt und
//!   Kommandos sowie Transport-/Geraeteereignisse nacheinander abarbeitet
//! - [`WsConnector`]: WebSocket-Transport zur Realtime-Gegenstelle

pub mod bridge;
pub mod error;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod ws;

pub use bridge::VoiceBridge;
pub use error::{LiveError, LiveResult};
pub use session::{SessionConfig, VoiceSession};
pub use transcript::Transcript;
pub use transport::{Connector, EventSender, Link, SessionEvent, TransportEvent};
pub use ws::{LiveConfig, WsConnector};
