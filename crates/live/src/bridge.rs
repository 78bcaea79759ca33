//! VoiceBridge – ein Worker pro Bridge
//!
//! Der Worker-Task besitzt die [`VoiceSession`] exklusiv. Kommandos des
//! Aufrufers und Ereignisse von Transport und Audio-Geraeten werden in
//! einer `select!`-Schleife nacheinander abgearbeitet, sodass Scheduler
//! und Zustandsmaschine nie parallel veraendert werden.
//!
//! Ein Intervall-Takt raeumt zusaetzlich natuerlich beendete Segmente ab,
//! auch wenn nach dem letzten Zug keine Ereignisse mehr eintreffen.
//!
//! Zustand und Transkript sind ueber `watch` abrufbar, einzelne
//! Benachrichtigungen ueber `broadcast`.

use std::time::Duration;

use oracle_audio::AudioBackend;
use oracle_core::{SessionId, SessionNotification, SessionState};
use oracle_observability::BridgeMetrics;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{LiveError, LiveResult};
use crate::session::{SessionConfig, VoiceSession};
use crate::transport::{Connector, SessionEvent};

/// Takt fuer [`VoiceSession::tick`]
const PFLEGE_INTERVALL: Duration = Duration::from_millis(100);

enum Command {
    Start(oneshot::Sender<LiveResult<SessionId>>),
    Stop(oneshot::Sender<bool>),
    Shutdown,
}

/// Handle auf den Bridge-Worker
pub struct VoiceBridge {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    transcript_rx: watch::Receiver<String>,
    notify: broadcast::Sender<SessionNotification>,
    worker: Option<JoinHandle<()>>,
}

impl VoiceBridge {
    /// Startet den Worker. Muss innerhalb einer Tokio-Runtime laufen.
    pub fn spawn<B, C>(backend: B, connector: C, config: SessionConfig, metrics: BridgeMetrics) -> Self
    where
        B: AudioBackend + 'static,
        C: Connector + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = VoiceSession::new(backend, connector, config, events_tx, metrics);
        let notify = session.notifier();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (transcript_tx, transcript_rx) = watch::channel(String::new());

        let worker = tokio::spawn(run_worker(
            session,
            cmd_rx,
            events_rx,
            state_tx,
            transcript_tx,
        ));

        Self {
            cmd_tx,
            state_rx,
            transcript_rx,
            notify,
            worker: Some(worker),
        }
    }

    /// Startet eine neue Sitzung
    pub async fn start(&self) -> LiveResult<SessionId> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| LiveError::WorkerBeendet)?
    }

    /// Beendet die laufende Sitzung. `false` wenn keine lief.
    pub async fn stop(&self) -> LiveResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx))?;
        rx.await.map_err(|_| LiveError::WorkerBeendet)
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Aktueller Stand des Transkripts
    pub fn transcript(&self) -> String {
        self.transcript_rx.borrow().clone()
    }

    pub fn transcript_watch(&self) -> watch::Receiver<String> {
        self.transcript_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notify.subscribe()
    }

    /// Beendet eine laufende Sitzung und wartet auf das Worker-Ende
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    fn send(&self, cmd: Command) -> LiveResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| LiveError::WorkerBeendet)
    }
}

async fn run_worker<B, C>(
    mut session: VoiceSession<B, C>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    transcript_tx: watch::Sender<String>,
) where
    B: AudioBackend,
    C: Connector,
{
    let mut pflege = tokio::time::interval(PFLEGE_INTERVALL);
    pflege.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!("Bridge-Worker gestartet");
    // Antworten gehen erst nach dem Veroeffentlichen raus, damit der
    // Aufrufer nach `start().await` bereits den neuen Zustand sieht.
    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Start(reply)) => {
                    let ergebnis = session.start();
                    publish(&session, &state_tx, &transcript_tx);
                    let _ = reply.send(ergebnis);
                }
                Some(Command::Stop(reply)) => {
                    let gestoppt = session.stop();
                    publish(&session, &state_tx, &transcript_tx);
                    let _ = reply.send(gestoppt);
                }
                Some(Command::Shutdown) | None => {
                    session.stop();
                    publish(&session, &state_tx, &transcript_tx);
                    break;
                }
            },
            Some(event) = events_rx.recv() => {
                session.handle(event);
                publish(&session, &state_tx, &transcript_tx);
            }
            _ = pflege.tick() => {
                session.tick();
            }
        }
    }
    info!("Bridge-Worker beendet");
}

fn publish<B: AudioBackend, C: Connector>(
    session: &VoiceSession<B, C>,
    state_tx: &watch::Sender<SessionState>,
    transcript_tx: &watch::Sender<String>,
) {
    let state = session.state();
    state_tx.send_if_modified(|aktuell| {
        let geaendert = *aktuell != state;
        *aktuell = state;
        geaendert
    });
    transcript_tx.send_if_modified(|aktuell| {
        if aktuell.as_str() == session.transcript() {
            return false;
        }
        *aktuell = session.transcript().to_string();
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{FakeBackend, FakeConnector};
    use crate::transport::TransportEvent;
    use oracle_audio::{bytes_to_text, floats_to_pcm16};
    use oracle_protocol::LiveEvent;
    use std::sync::atomic::Ordering;

    fn bridge() -> (VoiceBridge, FakeBackend, FakeConnector) {
        let (bridge, backend, connector, _) = bridge_mit_metriken();
        (bridge, backend, connector)
    }

    fn bridge_mit_metriken() -> (VoiceBridge, FakeBackend, FakeConnector, BridgeMetrics) {
        let backend = FakeBackend::new();
        let connector = FakeConnector::new();
        let metrics = BridgeMetrics::neu().unwrap();
        let bridge = VoiceBridge::spawn(
            backend.clone(),
            connector.clone(),
            SessionConfig::default(),
            metrics.clone(),
        );
        (bridge, backend, connector, metrics)
    }

    async fn warte_bis(mut bedingung: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !bedingung() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Zeitlimit");
    }

    async fn warte_auf(bridge: &VoiceBridge, ziel: SessionState) {
        let mut rx = bridge.state_watch();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == ziel))
            .await
            .expect("Zeitlimit")
            .expect("Worker laeuft");
    }

    #[tokio::test]
    async fn kompletter_lebenszyklus() {
        let (bridge, backend, connector) = bridge();
        assert_eq!(bridge.state(), SessionState::Idle);

        bridge.start().await.unwrap();
        assert_eq!(bridge.state(), SessionState::Connecting);

        connector.remote().transport(TransportEvent::Geoeffnet);
        warte_auf(&bridge, SessionState::Active).await;

        connector
            .remote()
            .transport(TransportEvent::Nachricht(LiveEvent::OutputTranscript(
                "Willkommen".into(),
            )));
        let mut transkript = bridge.transcript_watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            transkript.wait_for(|t| t == "Willkommen"),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(bridge.stop().await.unwrap());
        assert!(!bridge.stop().await.unwrap());
        assert_eq!(bridge.state(), SessionState::Closed);
        assert!(!backend.acquired.load(Ordering::SeqCst));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn stop_im_idle_ist_noop() {
        let (bridge, _, _) = bridge();
        assert!(!bridge.stop().await.unwrap());
        assert_eq!(bridge.state(), SessionState::Idle);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn zweiter_start_wird_abgelehnt() {
        let (bridge, _, connector) = bridge();
        bridge.start().await.unwrap();
        assert!(matches!(
            bridge.start().await,
            Err(LiveError::SitzungLaeuft)
        ));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn transportfehler_wird_gemeldet() {
        let (bridge, backend, connector) = bridge();
        let mut rx = bridge.subscribe();
        bridge.start().await.unwrap();
        connector.remote().transport(TransportEvent::Geoeffnet);
        connector
            .remote()
            .transport(TransportEvent::Fehler("Verbindung zurueckgesetzt".into()));

        warte_auf(&bridge, SessionState::Failed).await;
        assert!(!backend.acquired.load(Ordering::SeqCst));

        let mut fehler = None;
        while let Ok(n) = rx.try_recv() {
            if let SessionNotification::Fehler { grund } = n {
                fehler = Some(grund);
            }
        }
        assert_eq!(fehler.as_deref(), Some("Verbindung zurueckgesetzt"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_gibt_geraet_frei() {
        let (bridge, backend, connector) = bridge();
        bridge.start().await.unwrap();
        connector.remote().transport(TransportEvent::Geoeffnet);
        warte_auf(&bridge, SessionState::Active).await;

        bridge.shutdown().await;
        assert!(!backend.acquired.load(Ordering::SeqCst));
        assert_eq!(backend.outputs_open.load(Ordering::SeqCst), 0);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_raeumt_beendete_segmente_ohne_neue_ereignisse_ab() {
        let (bridge, backend, connector, metrics) = bridge_mit_metriken();
        bridge.start().await.unwrap();
        connector.remote().transport(TransportEvent::Geoeffnet);
        warte_auf(&bridge, SessionState::Active).await;

        connector
            .remote()
            .transport(TransportEvent::Nachricht(LiveEvent::Audio {
                mime_type: Some("audio/pcm;rate=24000".into()),
                data: bytes_to_text(&floats_to_pcm16(&[0.25; 2400])),
            }));
        warte_bis(|| metrics.playback_active_sources.get() == 1).await;

        // Segment laeuft aus, danach kommt nichts mehr von der Gegenstelle
        backend.sink().advance_to(1.0);
        warte_bis(|| metrics.playback_active_sources.get() == 0).await;
        assert_eq!(bridge.state(), SessionState::Active);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn neustart_nach_fehler() {
        let (bridge, _, connector) = bridge();
        bridge.start().await.unwrap();
        connector
            .remote()
            .transport(TransportEvent::Geschlossen(Some("goAway".into())));
        warte_auf(&bridge, SessionState::Failed).await;

        bridge.start().await.unwrap();
        assert_eq!(bridge.state(), SessionState::Connecting);
        assert_eq!(bridge.transcript(), "");
        bridge.shutdown().await;
    }
}
