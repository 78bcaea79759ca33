//! WebSocket-Transport zur Realtime-Gegenstelle
//!
//! Ablauf einer Verbindung (ein Tokio-Task pro Sitzung):
//!
//! 1. `connect_async` auf `<endpoint>?key=<api_key>`
//! 2. `setup`-Nachricht senden, auf `setupComplete` warten
//!    (beides zusammen begrenzt durch `setup_timeout`)
//! 3. [`TransportEvent::Geoeffnet`] melden
//! 4. Schleife: ausgehende Chunks als `realtimeInput` senden, eingehende
//!    Frames (Text oder JSON im Binaer-Frame) als Ereignisse melden
//!
//! Es gibt keinen automatischen Wiederaufbau. Nach einem Fehler muss der
//! Aufrufer eine neue Sitzung starten.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use oracle_audio::EncodedChunk;
use oracle_protocol::{LiveEvent, RealtimeInputMessage, ServerMessage, SetupMessage, SetupParams};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{LiveError, LiveResult};
use crate::transport::{Connector, EventSender, Link, TransportEvent};

/// Standard-Endpunkt der Realtime-Gegenstelle
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Verbindungsparameter
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub setup: SetupParams,
    /// Obergrenze fuer Verbindungsaufbau plus Setup
    pub setup_timeout: Duration,
    /// Kapazitaet der Warteschlange fuer ausgehende Chunks
    pub outbound_capacity: usize,
}

/// Oeffnet pro Sitzung eine WebSocket-Verbindung
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: LiveConfig,
}

impl WsConnector {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }
}

impl Connector for WsConnector {
    fn open(&mut self, events: EventSender) -> LiveResult<Box<dyn Link>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| LiveError::Transport("Keine Tokio-Runtime verfuegbar".into()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let cancel = CancellationToken::new();

        runtime.spawn(run_connection(
            self.config.clone(),
            chunk_rx,
            events,
            cancel.clone(),
        ));

        Ok(Box::new(WsLink {
            chunk_tx,
            cancel,
        }))
    }
}

/// Handle auf den Verbindungs-Task
pub struct WsLink {
    chunk_tx: mpsc::Sender<EncodedChunk>,
    cancel: CancellationToken,
}

impl Link for WsLink {
    fn chunk_sender(&self) -> mpsc::Sender<EncodedChunk> {
        self.chunk_tx.clone()
    }

    fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Verbindung wird geschlossen");
            self.cancel.cancel();
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_connection(
    config: LiveConfig,
    mut chunk_rx: mpsc::Receiver<EncodedChunk>,
    events: EventSender,
    cancel: CancellationToken,
) {
    let generation = events.generation();

    let ws = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(generation, "Verbindungsaufbau abgebrochen");
            return;
        }
        ergebnis = connect_and_setup(&config) => match ergebnis {
            Ok(ws) => ws,
            Err(e) => {
                warn!(generation, fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                events.transport(TransportEvent::Fehler(e.to_string()));
                return;
            }
        },
    };

    info!(generation, "Realtime-Verbindung steht");
    if !events.transport(TransportEvent::Geoeffnet) {
        return;
    }

    let (mut sender, mut receiver) = ws.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                debug!(generation, "Verbindung lokal geschlossen");
                break;
            }
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let json = match RealtimeInputMessage::audio(chunk.mime_type, chunk.data).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(generation, fehler = %e, "Chunk nicht serialisierbar");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json)).await {
                    events.transport(TransportEvent::Fehler(format!("Senden fehlgeschlagen: {e}")));
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    dispatch(&events, ServerMessage::parse(&text));
                }
                Some(Ok(Message::Binary(data))) => {
                    dispatch(&events, ServerMessage::parse_bytes(&data));
                }
                Some(Ok(Message::Close(frame))) => {
                    let grund = close_reason(frame);
                    info!(generation, grund = ?grund, "Gegenstelle hat die Verbindung geschlossen");
                    events.transport(TransportEvent::Geschlossen(grund));
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/Pong beantwortet tungstenite selbst
                }
                Some(Err(e)) => {
                    events.transport(TransportEvent::Fehler(format!("WebSocket-Fehler: {e}")));
                    break;
                }
                None => {
                    events.transport(TransportEvent::Geschlossen(None));
                    break;
                }
            }
        }
    }
}

fn dispatch(events: &EventSender, parsed: oracle_core::Result<ServerMessage>) {
    match parsed {
        Ok(msg) => {
            for event in msg.into_events() {
                trace!(?event, "Ereignis der Gegenstelle");
                events.transport(TransportEvent::Nachricht(event));
            }
        }
        Err(e) => warn!(fehler = %e, "Nachricht der Gegenstelle ignoriert"),
    }
}

async fn connect_and_setup(config: &LiveConfig) -> LiveResult<WsStream> {
    let url = build_url(&config.endpoint, &config.api_key);
    let setup_json = SetupMessage::new(&config.setup).to_json()?;

    let aufbau = async {
        debug!(endpoint = %config.endpoint, model = %config.setup.model, "Verbinde");
        let (mut ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::Transport(format!("Verbindung fehlgeschlagen: {e}")))?;

        ws.send(Message::Text(setup_json))
            .await
            .map_err(|e| LiveError::Transport(format!("Setup nicht gesendet: {e}")))?;

        while let Some(msg) = ws.next().await {
            let parsed = match msg {
                Ok(Message::Text(text)) => ServerMessage::parse(&text),
                Ok(Message::Binary(data)) => ServerMessage::parse_bytes(&data),
                Ok(Message::Close(frame)) => {
                    return Err(LiveError::Transport(format!(
                        "Verbindung vor setupComplete geschlossen: {}",
                        close_reason(frame).unwrap_or_else(|| "ohne Grund".into())
                    )));
                }
                Ok(_) => continue,
                Err(e) => {
                    return Err(LiveError::Transport(format!(
                        "WebSocket-Fehler vor setupComplete: {e}"
                    )))
                }
            };
            match parsed.map(|m| setup_status(&m.into_events())) {
                Ok(Some(Ok(()))) => return Ok(ws),
                Ok(Some(Err(grund))) => return Err(LiveError::Transport(grund)),
                Ok(None) => {}
                Err(e) => warn!(fehler = %e, "Unerwartete Nachricht waehrend Setup"),
            }
        }
        Err(LiveError::Transport("Stream vor setupComplete beendet".into()))
    };

    tokio::time::timeout(config.setup_timeout, aufbau)
        .await
        .map_err(|_| {
            LiveError::Transport(format!(
                "Kein setupComplete innerhalb von {} s",
                config.setup_timeout.as_secs_f64()
            ))
        })?
}

/// Haengt den API-Schluessel als Query-Parameter an
fn build_url(endpoint: &str, api_key: &str) -> String {
    let trenner = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{trenner}key={api_key}")
}

/// `Some(Ok)` bei setupComplete, `Some(Err)` bei Fehler der Gegenstelle
fn setup_status(events: &[LiveEvent]) -> Option<Result<(), String>> {
    for event in events {
        match event {
            LiveEvent::SetupComplete => return Some(Ok(())),
            LiveEvent::Error(grund) => return Some(Err(format!("Setup abgelehnt: {grund}"))),
            _ => {}
        }
    }
    None
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> Option<String> {
    frame
        .map(|f| f.reason.to_string())
        .filter(|grund| !grund.is_empty())
}
