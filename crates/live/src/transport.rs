//! Transport-Abstraktion
//!
//! Ein [`Connector`] oeffnet pro Sitzung einen [`Link`]. Alles, was die
//! Gegenstelle meldet, landet als [`SessionEvent`] in der Ereignis-Queue
//! des Workers. Jedes Ereignis traegt die Generation der Sitzung, damit
//! Nachzuegler einer alten Verbindung erkannt werden.

use oracle_audio::{AudioError, EncodedChunk};
use oracle_protocol::LiveEvent;
use tokio::sync::mpsc;

use crate::error::LiveResult;

/// Meldungen des Transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Verbindung steht, Setup bestaetigt
    Geoeffnet,
    /// Ereignis der Gegenstelle
    Nachricht(LiveEvent),
    /// Transportfehler
    Fehler(String),
    /// Verbindung geschlossen (optional mit Grund)
    Geschlossen(Option<String>),
}

/// Eintrag der Ereignis-Queue
#[derive(Debug)]
pub enum SessionEvent {
    Transport { generation: u64, event: TransportEvent },
    Device { generation: u64, error: AudioError },
}

impl SessionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Transport { generation, .. } | Self::Device { generation, .. } => *generation,
        }
    }
}

/// Sender fuer Ereignisse einer bestimmten Sitzungs-Generation
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Meldet ein Transport-Ereignis. `false` wenn niemand mehr zuhoert.
    pub fn transport(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Meldet einen Geraetefehler aus einem Audio-Thread
    pub fn device(&self, error: AudioError) -> bool {
        self.tx
            .send(SessionEvent::Device {
                generation: self.generation,
                error,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Baut Verbindungen zur Gegenstelle auf
pub trait Connector: Send {
    /// Startet den Verbindungsaufbau. Kehrt sofort zurueck; der Erfolg
    /// wird spaeter als [`TransportEvent::Geoeffnet`] gemeldet.
    fn open(&mut self, events: EventSender) -> LiveResult<Box<dyn Link>>;
}

/// Eine offene (oder sich oeffnende) Verbindung
pub trait Link: Send {
    /// Warteschlange fuer ausgehende Audio-Chunks
    fn chunk_sender(&self) -> mpsc::Sender<EncodedChunk>;

    /// Schliesst die Verbindung. Idempotent.
    fn close(&mut self);
}
