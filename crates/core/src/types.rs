//! Identifikationstypen
//!
//! IDs verwenden das Newtype-Pattern, damit sie nicht mit anderen
//! UUIDs verwechselt werden koennen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige ID einer Voice-Sitzung
///
/// Jede gestartete Sitzung erhaelt eine neue ID; sie taucht in allen
/// Log-Zeilen der Sitzung als Feld `session_id` auf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_sind_eindeutig() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn session_id_anzeige() {
        let id = SessionId::new();
        assert!(id.to_string().starts_with("session:"));
        assert!(id.to_string().ends_with(&id.inner().to_string()));
    }

    #[test]
    fn session_id_serde_roundtrip() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let zurueck: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, zurueck);
    }
}
