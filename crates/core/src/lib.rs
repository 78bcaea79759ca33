//! oracle-core – Gemeinsame Typen, Zustaende und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Oracle-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{OracleError, Result};
pub use event::{SessionNotification, SessionState};
pub use types::SessionId;
