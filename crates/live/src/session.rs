//! Voice-Sitzung – synchrone Zustandsmaschine
//!
//! Besitzt fuer die Dauer einer Sitzung das Eingabegeraet, den
//! Playback-Scheduler und die Verbindung. Alle Mutationen laufen ueber
//! `&mut self`; der [`VoiceBridge`](crate::VoiceBridge)-Worker ruft
//! `start`, `stop` und `handle` nacheinander auf.
//!
//! Stop und Fehler geben alle Geraete frei, auch die Ausgabe: der
//! Scheduler lebt nur so lange wie die Sitzung.
//!
//! Ereignisse tragen die Generation ihrer Sitzung. Meldungen einer alten
//! Verbindung werden nach einem Neustart verworfen.

use std::sync::Arc;

use oracle_audio::capture::CaptureCounters;
use oracle_audio::{
    parse_pcm_rate, text_to_bytes, AudioBackend, AudioError, AudioInput, CaptureConfig,
    CapturePipeline, CaptureStats, DeviceErrorCallback, PlaybackScheduler,
};
use oracle_core::{SessionId, SessionNotification, SessionState};
use oracle_observability::BridgeMetrics;
use oracle_protocol::LiveEvent;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::error::{LiveError, LiveResult};
use crate::transcript::Transcript;
use crate::transport::{Connector, EventSender, Link, SessionEvent, TransportEvent};

const NOTIFICATION_CAPACITY: usize = 256;

/// Sitzungsparameter
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture: CaptureConfig,
    /// Rate eingehender Segmente ohne `rate`-Angabe im MIME-Tag
    pub playback_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            playback_rate: oracle_audio::codec::PLAYBACK_SAMPLE_RATE,
        }
    }
}

pub struct VoiceSession<B: AudioBackend, C: Connector> {
    backend: B,
    connector: C,
    config: SessionConfig,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    notify: broadcast::Sender<SessionNotification>,
    metrics: BridgeMetrics,

    state: SessionState,
    generation: u64,
    session_id: Option<SessionId>,
    transcript: Transcript,

    input: Option<Box<dyn AudioInput>>,
    scheduler: Option<PlaybackScheduler>,
    link: Option<Box<dyn Link>>,
    capture_counters: Option<Arc<CaptureCounters>>,
    capture_synced: CaptureStats,
}

impl<B: AudioBackend, C: Connector> VoiceSession<B, C> {
    pub fn new(
        backend: B,
        connector: C,
        config: SessionConfig,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        metrics: BridgeMetrics,
    ) -> Self {
        let (notify, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            backend,
            connector,
            config,
            events_tx,
            notify,
            metrics,
            state: SessionState::Idle,
            generation: 0,
            session_id: None,
            transcript: Transcript::new(),
            input: None,
            scheduler: None,
            link: None,
            capture_counters: None,
            capture_synced: CaptureStats::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Startet eine neue Sitzung
    ///
    /// Belegt Ein- und Ausgabe und beginnt den Verbindungsaufbau. Laeuft
    /// bereits eine Sitzung, wird der Aufruf abgelehnt. Schlaegt die
    /// Geraetebelegung fehl, endet die Sitzung in `Failed`.
    pub fn start(&mut self) -> LiveResult<SessionId> {
        if self.state.ist_laufend() {
            warn!(state = %self.state, "Start abgelehnt, Sitzung laeuft bereits");
            return Err(LiveError::SitzungLaeuft);
        }

        self.generation += 1;
        let session_id = SessionId::new();
        self.session_id = Some(session_id);
        self.transcript.clear();
        self.capture_synced = CaptureStats::default();
        self.metrics.sessions_total.inc();

        info!(%session_id, generation = self.generation, "Sitzung startet");
        self.set_state(SessionState::Connecting);

        let events = EventSender::new(self.generation, self.events_tx.clone());
        let on_error: DeviceErrorCallback = {
            let events = events.clone();
            Arc::new(move |error: AudioError| {
                events.device(error);
            })
        };

        match self.backend.acquire_input(Arc::clone(&on_error)) {
            Ok(input) => self.input = Some(input),
            Err(e) => return Err(self.fail_start(e)),
        }
        match self.backend.open_output(on_error) {
            Ok(sink) => self.scheduler = Some(PlaybackScheduler::new(sink)),
            Err(e) => return Err(self.fail_start(e)),
        }

        match self.connector.open(events) {
            Ok(link) => self.link = Some(link),
            Err(e) => {
                self.fail(format!("Verbindungsaufbau fehlgeschlagen: {e}"));
                return Err(e);
            }
        }

        Ok(session_id)
    }

    /// Beendet die laufende Sitzung
    ///
    /// Gibt `false` zurueck, wenn keine Sitzung lief (No-op).
    pub fn stop(&mut self) -> bool {
        if !self.state.ist_laufend() {
            debug!(state = %self.state, "Stop ohne laufende Sitzung ignoriert");
            return false;
        }
        info!(session_id = ?self.session_id, "Sitzung wird beendet");
        self.teardown();
        self.set_state(SessionState::Closed);
        true
    }

    /// Verarbeitet ein Transport- oder Geraeteereignis
    pub fn handle(&mut self, event: SessionEvent) {
        if event.generation() != self.generation || !self.state.ist_laufend() {
            trace!(
                generation = event.generation(),
                aktuell = self.generation,
                state = %self.state,
                "Veraltetes Ereignis ignoriert"
            );
            return;
        }

        match event {
            SessionEvent::Device { error, .. } => {
                self.fail(format!("Audio-Geraet ausgefallen: {error}"));
            }
            SessionEvent::Transport { event, .. } => self.on_transport(event),
        }
        self.sync_capture_metrics();
    }

    /// Periodische Pflege aus dem Worker
    ///
    /// Entfernt natuerlich beendete Segmente aus der aktiven Menge und
    /// zieht Gauges und Capture-Zaehler nach. Gibt die Anzahl der
    /// entfernten Segmente zurueck.
    pub fn tick(&mut self) -> usize {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return 0;
        };
        let entfernt = scheduler.reap_finished();
        if entfernt > 0 {
            trace!(entfernt, aktiv = scheduler.active_count(), "Beendete Segmente abgeraeumt");
        }
        self.metrics.playback_queue_seconds.set(scheduler.queued_ahead());
        self.metrics
            .playback_active_sources
            .set(scheduler.active_count() as i64);
        self.sync_capture_metrics();
        entfernt
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transcript(&self) -> &str {
        self.transcript.as_str()
    }

    /// Scheduler der laufenden Sitzung, `None` nach Stop oder Fehler
    pub fn scheduler(&self) -> Option<&PlaybackScheduler> {
        self.scheduler.as_ref()
    }

    pub fn output_open(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn input_acquired(&self) -> bool {
        self.input.as_ref().is_some_and(|i| i.is_acquired())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notify.subscribe()
    }

    pub fn notifier(&self) -> broadcast::Sender<SessionNotification> {
        self.notify.clone()
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Geoeffnet => {
                if self.state == SessionState::Connecting {
                    self.activate();
                }
            }
            TransportEvent::Nachricht(live) => {
                if self.state == SessionState::Active {
                    self.on_live_event(live);
                } else {
                    debug!(?live, "Nachricht vor dem Oeffnen ignoriert");
                }
            }
            TransportEvent::Fehler(grund) => self.fail(grund),
            TransportEvent::Geschlossen(grund) => {
                self.fail(grund.unwrap_or_else(|| "Verbindung unerwartet geschlossen".into()));
            }
        }
    }

    fn activate(&mut self) {
        let Some(link) = self.link.as_ref() else {
            self.fail("Verbindung fehlt beim Oeffnen".into());
            return;
        };
        let pipeline = CapturePipeline::new(&self.config.capture, link.chunk_sender());
        self.capture_counters = Some(pipeline.counters());

        let ergebnis = match self.input.as_mut() {
            Some(input) => input.start(pipeline),
            None => Err(AudioError::KeinStandardEingabegeraet),
        };
        if let Err(e) = ergebnis {
            self.fail(format!("Capture konnte nicht starten: {e}"));
            return;
        }

        self.set_state(SessionState::Active);
    }

    fn on_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::SetupComplete => trace!("Wiederholtes setupComplete ignoriert"),
            LiveEvent::Audio { mime_type, data } => self.play_segment(mime_type.as_deref(), &data),
            LiveEvent::OutputTranscript(text) => {
                if self.transcript.append(&text) {
                    self.publish(SessionNotification::Transkript {
                        text: self.transcript.as_str().to_string(),
                    });
                }
            }
            LiveEvent::InputTranscript(text) => {
                self.publish(SessionNotification::EingabeTranskript { text });
            }
            LiveEvent::TurnComplete => self.publish(SessionNotification::ZugBeendet),
            LiveEvent::Interrupted => {
                let gestoppt = self.scheduler.as_mut().map_or(0, |s| s.stop_all());
                debug!(gestoppt, "Modell unterbrochen, Wiedergabe gestoppt");
                self.metrics.playback_queue_seconds.set(0.0);
                self.metrics.playback_active_sources.set(0);
                self.publish(SessionNotification::Unterbrochen);
            }
            LiveEvent::GoAway => info!("Gegenstelle kuendigt Verbindungsende an"),
            LiveEvent::Error(grund) => self.fail(format!("Fehler der Gegenstelle: {grund}")),
        }
    }

    /// Dekodiert und plant ein Segment ein. Dekodierfehler verwerfen nur
    /// dieses Segment, Geraetefehler beenden die Sitzung.
    fn play_segment(&mut self, mime_type: Option<&str>, data: &str) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        let rate = mime_type
            .and_then(parse_pcm_rate)
            .unwrap_or(self.config.playback_rate);

        match text_to_bytes(data).and_then(|pcm| scheduler.schedule_pcm(&pcm, rate)) {
            Ok(segment) => {
                trace!(start = segment.start_time, dauer = segment.duration, "Segment eingeplant");
                self.metrics.segments_scheduled_total.inc();
                self.metrics
                    .playback_queue_seconds
                    .set(scheduler.queued_ahead());
                self.metrics
                    .playback_active_sources
                    .set(scheduler.active_count() as i64);
            }
            Err(e) if !e.ist_geraetefehler() => {
                let fehler = LiveError::Dekodierung(e.to_string());
                warn!(fehler = %fehler, "Audio-Segment verworfen");
                self.metrics.segments_dropped_total.inc();
                self.publish(SessionNotification::SegmentVerworfen {
                    grund: fehler.to_string(),
                });
            }
            Err(e) => self.fail(format!("Ausgabegeraet ausgefallen: {e}")),
        }
    }

    fn fail_start(&mut self, error: AudioError) -> LiveError {
        let fehler = LiveError::GeraetNichtVerfuegbar(error);
        self.fail(fehler.to_string());
        fehler
    }

    /// Gleiche Aufraeumarbeit wie beim Stop, Endzustand `Failed`
    fn fail(&mut self, grund: String) {
        warn!(session_id = ?self.session_id, grund = %grund, "Sitzung fehlgeschlagen");
        self.teardown();
        self.metrics.session_failures_total.inc();
        self.set_state(SessionState::Failed);
        self.publish(SessionNotification::Fehler { grund });
    }

    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop_all();
            // Drop der Senke schliesst das Ausgabegeraet
            drop(scheduler);
            debug!("Ausgabegeraet freigegeben");
        }
        if let Some(mut input) = self.input.take() {
            input.release();
        }
        self.sync_capture_metrics();
        self.capture_counters = None;
        self.metrics.playback_queue_seconds.set(0.0);
        self.metrics.playback_active_sources.set(0);
    }

    fn sync_capture_metrics(&mut self) {
        let Some(counters) = self.capture_counters.as_ref() else {
            return;
        };
        let aktuell = counters.snapshot();
        self.metrics
            .chunks_sent_total
            .inc_by(aktuell.blocks_sent - self.capture_synced.blocks_sent);
        self.metrics
            .chunks_dropped_total
            .inc_by(aktuell.blocks_dropped - self.capture_synced.blocks_dropped);
        self.capture_synced = aktuell;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(von = %self.state, nach = %state, "Zustandswechsel");
        self.state = state;
        self.publish(SessionNotification::Zustand { zustand: state });
    }

    fn publish(&self, notification: SessionNotification) {
        // Ohne Abonnenten schlaegt send fehl, das ist kein Fehler
        let _ = self.notify.send(notification);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use oracle_audio::codec::floats_to_pcm16;
    use oracle_audio::{bytes_to_text, AudioResult, AudioSink, EncodedChunk, ManualSink};
    use parking_lot::Mutex;
    use oracle_audio::SourceId;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) type Shared<T> = Arc<Mutex<Option<T>>>;

    // --- Test-Doubles ------------------------------------------------------

    pub(crate) struct FakeInput {
        acquired: Arc<AtomicBool>,
        pipeline: Shared<CapturePipeline>,
    }

    impl AudioInput for FakeInput {
        fn start(&mut self, pipeline: CapturePipeline) -> AudioResult<()> {
            *self.pipeline.lock() = Some(pipeline);
            Ok(())
        }

        fn release(&mut self) {
            self.acquired.store(false, Ordering::SeqCst);
            *self.pipeline.lock() = None;
        }

        fn is_acquired(&self) -> bool {
            self.acquired.load(Ordering::SeqCst)
        }
    }

    /// Ausgabe ueber eine [`ManualSink`], zaehlt offene Geraete
    pub(crate) struct FakeOutput {
        sink: ManualSink,
        open: Arc<AtomicUsize>,
    }

    impl AudioSink for FakeOutput {
        fn current_time(&self) -> f64 {
            self.sink.current_time()
        }

        fn sample_rate(&self) -> u32 {
            self.sink.sample_rate()
        }

        fn play_at(&mut self, samples: Vec<f32>, start_time: f64) -> AudioResult<SourceId> {
            self.sink.play_at(samples, start_time)
        }

        fn stop_source(&mut self, id: SourceId) {
            self.sink.stop_source(id);
        }

        fn drain_finished(&mut self) -> Vec<SourceId> {
            self.sink.drain_finished()
        }
    }

    impl Drop for FakeOutput {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    pub(crate) struct FakeBackend {
        pub input_fails: bool,
        pub acquired: Arc<AtomicBool>,
        pub pipeline: Shared<CapturePipeline>,
        pub sink: Shared<ManualSink>,
        /// Anzahl der offenen Ausgaben
        pub outputs_open: Arc<AtomicUsize>,
        pub device_errors: Shared<DeviceErrorCallback>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                input_fails: false,
                acquired: Arc::new(AtomicBool::new(false)),
                pipeline: Arc::new(Mutex::new(None)),
                sink: Arc::new(Mutex::new(None)),
                outputs_open: Arc::new(AtomicUsize::new(0)),
                device_errors: Arc::new(Mutex::new(None)),
            }
        }

        /// Senke der aktuellen Sitzung
        pub fn sink(&self) -> ManualSink {
            self.sink.lock().clone().expect("Ausgabe geoeffnet")
        }

        /// Simuliert Mikrofon-Samples
        pub fn speak(&self, samples: &[f32]) -> usize {
            self.pipeline
                .lock()
                .as_mut()
                .map_or(0, |p| p.push_samples(samples))
        }
    }

    impl AudioBackend for FakeBackend {
        fn acquire_input(&mut self, on_error: DeviceErrorCallback) -> AudioResult<Box<dyn AudioInput>> {
            if self.input_fails {
                return Err(AudioError::KeinStandardEingabegeraet);
            }
            self.acquired.store(true, Ordering::SeqCst);
            *self.device_errors.lock() = Some(on_error);
            Ok(Box::new(FakeInput {
                acquired: Arc::clone(&self.acquired),
                pipeline: self.pipeline.clone(),
            }))
        }

        fn open_output(&mut self, _on_error: DeviceErrorCallback) -> AudioResult<Box<dyn AudioSink>> {
            let sink = ManualSink::new(24000);
            *self.sink.lock() = Some(sink.clone());
            self.outputs_open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeOutput {
                sink,
                open: Arc::clone(&self.outputs_open),
            }))
        }
    }

    pub(crate) struct FakeLink {
        chunk_tx: mpsc::Sender<EncodedChunk>,
        closed: Arc<AtomicUsize>,
    }

    impl Link for FakeLink {
        fn chunk_sender(&self) -> mpsc::Sender<EncodedChunk> {
            self.chunk_tx.clone()
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    pub(crate) struct FakeConnector {
        pub events: Shared<EventSender>,
        pub chunks: Shared<mpsc::Receiver<EncodedChunk>>,
        pub closed: Arc<AtomicUsize>,
        pub opened: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self {
                events: Arc::new(Mutex::new(None)),
                chunks: Arc::new(Mutex::new(None)),
                closed: Arc::new(AtomicUsize::new(0)),
                opened: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Sender der zuletzt geoeffneten Verbindung
        pub fn remote(&self) -> EventSender {
            self.events.lock().clone().expect("Verbindung geoeffnet")
        }
    }

    impl Connector for FakeConnector {
        fn open(&mut self, events: EventSender) -> LiveResult<Box<dyn Link>> {
            let (chunk_tx, chunk_rx) = mpsc::channel(8);
            *self.events.lock() = Some(events);
            *self.chunks.lock() = Some(chunk_rx);
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeLink {
                chunk_tx,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    // --- Hilfen ------------------------------------------------------------

    struct Harness {
        session: VoiceSession<FakeBackend, FakeConnector>,
        backend: FakeBackend,
        connector: FakeConnector,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        metrics: BridgeMetrics,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_backend(FakeBackend::new())
        }

        fn with_backend(backend: FakeBackend) -> Self {
            let connector = FakeConnector::new();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let metrics = BridgeMetrics::neu().unwrap();
            let config = SessionConfig {
                capture: CaptureConfig {
                    sample_rate: 16000,
                    block_size: 4,
                },
                playback_rate: 24000,
            };
            let session = VoiceSession::new(
                backend.clone(),
                connector.clone(),
                config,
                events_tx,
                metrics.clone(),
            );
            Self {
                session,
                backend,
                connector,
                events_rx,
                metrics,
            }
        }

        /// Arbeitet alle anstehenden Ereignisse ab
        fn pump(&mut self) {
            while let Ok(event) = self.events_rx.try_recv() {
                self.session.handle(event);
            }
        }

        fn remote(&mut self, event: TransportEvent) {
            self.connector.remote().transport(event);
            self.pump();
        }

        fn aktiv(&mut self) {
            self.session.start().unwrap();
            self.remote(TransportEvent::Geoeffnet);
            assert_eq!(self.session.state(), SessionState::Active);
        }

        fn audio(&mut self, sekunden: f64) {
            let samples = vec![0.25f32; (sekunden * 24000.0) as usize];
            self.remote(TransportEvent::Nachricht(LiveEvent::Audio {
                mime_type: Some("audio/pcm;rate=24000".into()),
                data: bytes_to_text(&floats_to_pcm16(&samples)),
            }));
        }
    }

    // --- Lebenszyklus ------------------------------------------------------

    #[test]
    fn stop_im_idle_ist_noop() {
        let mut h = Harness::new();
        assert!(!h.session.stop());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn start_belegt_geraet_und_verbindet() {
        let mut h = Harness::new();
        h.session.start().unwrap();
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert!(h.session.input_acquired());
        assert_eq!(h.connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(h.metrics.sessions_total.get(), 1);
    }

    #[test]
    fn geoeffnet_aktiviert_und_verdrahtet_capture() {
        let mut h = Harness::new();
        h.aktiv();

        assert_eq!(h.backend.speak(&[0.5; 8]), 2);
        let chunk = h
            .connector
            .chunks
            .lock()
            .as_mut()
            .unwrap()
            .try_recv()
            .unwrap();
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn zweiter_start_wird_abgelehnt() {
        let mut h = Harness::new();
        h.session.start().unwrap();
        assert!(matches!(h.session.start(), Err(LiveError::SitzungLaeuft)));

        h.remote(TransportEvent::Geoeffnet);
        assert!(matches!(h.session.start(), Err(LiveError::SitzungLaeuft)));
        assert_eq!(h.connector.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn doppelter_stop_schliesst_genau_einmal() {
        let mut h = Harness::new();
        h.aktiv();
        let mut rx = h.session.subscribe();

        assert!(h.session.stop());
        assert!(!h.session.stop());
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(h.connector.closed.load(Ordering::SeqCst), 1);
        assert!(!h.session.input_acquired());

        let mut geschlossen = 0;
        while let Ok(n) = rx.try_recv() {
            if n == (SessionNotification::Zustand {
                zustand: SessionState::Closed,
            }) {
                geschlossen += 1;
            }
        }
        assert_eq!(geschlossen, 1);
    }

    #[test]
    fn transportfehler_raeumt_auf() {
        let mut h = Harness::new();
        h.aktiv();
        h.audio(1.0);
        h.audio(1.0);
        let sink = h.backend.sink();
        assert_eq!(sink.running_count(), 2);

        h.remote(TransportEvent::Fehler("Verbindung zurueckgesetzt".into()));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert!(!h.session.input_acquired());
        assert!(!h.backend.acquired.load(Ordering::SeqCst));
        assert!(h.session.scheduler().is_none());
        assert_eq!(sink.running_count(), 0);
        assert_eq!(h.backend.outputs_open.load(Ordering::SeqCst), 0);
        assert_eq!(h.connector.closed.load(Ordering::SeqCst), 1);
        assert_eq!(h.metrics.session_failures_total.get(), 1);

        // Stop nach Failed ist ein No-op
        assert!(!h.session.stop());
        assert_eq!(h.session.state(), SessionState::Failed);
    }

    #[test]
    fn stop_gibt_ausgabe_frei() {
        let mut h = Harness::new();
        h.aktiv();
        h.audio(1.0);
        assert!(h.session.output_open());
        assert_eq!(h.backend.outputs_open.load(Ordering::SeqCst), 1);

        h.session.stop();
        assert!(!h.session.output_open());
        assert_eq!(h.backend.outputs_open.load(Ordering::SeqCst), 0);
        assert_eq!(h.backend.sink().stopped().len(), 1);

        // Neustart oeffnet genau eine neue Ausgabe
        h.session.start().unwrap();
        assert_eq!(h.backend.outputs_open.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn geraeteausfall_gibt_ausgabe_frei() {
        let mut h = Harness::new();
        h.aktiv();
        let melden = h.backend.device_errors.lock().clone().unwrap();
        melden(AudioError::StreamFehler("Lautsprecher entfernt".into()));
        h.pump();
        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.backend.outputs_open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unerwartetes_schliessen_fuehrt_zu_failed() {
        let mut h = Harness::new();
        h.aktiv();
        h.remote(TransportEvent::Geschlossen(None));
        assert_eq!(h.session.state(), SessionState::Failed);
    }

    #[test]
    fn fehler_waehrend_verbindungsaufbau() {
        let mut h = Harness::new();
        h.session.start().unwrap();
        h.remote(TransportEvent::Fehler("Kein setupComplete".into()));
        assert_eq!(h.session.state(), SessionState::Failed);
        assert!(!h.session.input_acquired());
    }

    #[test]
    fn geraetefehler_beim_start() {
        let mut backend = FakeBackend::new();
        backend.input_fails = true;
        let mut h = Harness::with_backend(backend);
        let mut rx = h.session.subscribe();

        let e = h.session.start().unwrap_err();
        assert!(matches!(e, LiveError::GeraetNichtVerfuegbar(_)));
        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.connector.opened.load(Ordering::SeqCst), 0);

        let zustaende: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|n| match n {
                SessionNotification::Zustand { zustand } => Some(zustand),
                _ => None,
            })
            .collect();
        assert_eq!(zustaende, vec![SessionState::Connecting, SessionState::Failed]);
    }

    #[test]
    fn geraeteausfall_waehrend_sitzung() {
        let mut h = Harness::new();
        h.aktiv();
        let melden = h.backend.device_errors.lock().clone().unwrap();
        melden(AudioError::StreamFehler("USB entfernt".into()));
        h.pump();
        assert_eq!(h.session.state(), SessionState::Failed);
        assert!(!h.session.input_acquired());
    }

    #[test]
    fn neustart_nach_stop_ist_frisch() {
        let mut h = Harness::new();
        h.aktiv();
        h.remote(TransportEvent::Nachricht(LiveEvent::OutputTranscript(
            "Hallo".into(),
        )));
        h.audio(1.0);
        assert_eq!(h.session.transcript(), "Hallo");
        assert!(h.session.scheduler().unwrap().next_start_time() > 0.0);
        let alte_id = h.session.session_id();

        h.session.stop();
        h.session.start().unwrap();

        assert_eq!(h.session.transcript(), "");
        assert_eq!(h.session.scheduler().unwrap().next_start_time(), 0.0);
        assert_ne!(h.session.session_id(), alte_id);
        assert_eq!(h.session.state(), SessionState::Connecting);
    }

    #[test]
    fn veraltete_ereignisse_werden_ignoriert() {
        let mut h = Harness::new();
        h.aktiv();
        let alte_verbindung = h.connector.remote();
        h.session.stop();
        h.session.start().unwrap();

        // Nachzuegler der alten Verbindung darf die neue nicht beenden
        alte_verbindung.transport(TransportEvent::Fehler("alt".into()));
        alte_verbindung.transport(TransportEvent::Geoeffnet);
        h.pump();
        assert_eq!(h.session.state(), SessionState::Connecting);

        h.remote(TransportEvent::Geoeffnet);
        assert_eq!(h.session.state(), SessionState::Active);
    }

    // --- Nachrichten -------------------------------------------------------

    #[test]
    fn transkript_in_ankunftsreihenfolge() {
        let mut h = Harness::new();
        h.aktiv();
        for teil in ["Base", "ist schnell."] {
            h.remote(TransportEvent::Nachricht(LiveEvent::OutputTranscript(
                teil.into(),
            )));
        }
        assert_eq!(h.session.transcript(), "Base ist schnell.");
    }

    #[test]
    fn nachricht_vor_dem_oeffnen_wird_ignoriert() {
        let mut h = Harness::new();
        h.session.start().unwrap();
        h.remote(TransportEvent::Nachricht(LiveEvent::OutputTranscript(
            "zu frueh".into(),
        )));
        assert_eq!(h.session.transcript(), "");
    }

    #[test]
    fn audio_wird_lueckenlos_eingeplant() {
        let mut h = Harness::new();
        h.aktiv();
        h.audio(1.0);
        h.audio(0.5);
        h.audio(2.0);

        let starts: Vec<f64> = h.backend.sink().played().iter().map(|p| p.start_time).collect();
        assert_eq!(starts, vec![0.0, 1.0, 1.5]);
        assert_eq!(h.metrics.segments_scheduled_total.get(), 3);
    }

    #[test]
    fn kaputtes_segment_wird_verworfen() {
        let mut h = Harness::new();
        h.aktiv();
        let mut rx = h.session.subscribe();

        h.remote(TransportEvent::Nachricht(LiveEvent::Audio {
            mime_type: None,
            data: "@@kein base64@@".into(),
        }));
        // Ungerade Byte-Anzahl
        h.remote(TransportEvent::Nachricht(LiveEvent::Audio {
            mime_type: None,
            data: bytes_to_text(&[1, 2, 3]),
        }));

        assert_eq!(h.session.state(), SessionState::Active);
        assert_eq!(h.metrics.segments_dropped_total.get(), 2);
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionNotification::SegmentVerworfen { .. }
        ));

        // Danach laeuft die Wiedergabe normal weiter
        h.audio(0.5);
        assert_eq!(h.session.scheduler().unwrap().active_count(), 1);
    }

    #[test]
    fn unterbrechung_stoppt_wiedergabe() {
        let mut h = Harness::new();
        h.aktiv();
        h.audio(1.0);
        h.audio(1.0);

        h.remote(TransportEvent::Nachricht(LiveEvent::Interrupted));
        assert_eq!(h.session.state(), SessionState::Active);
        assert_eq!(h.session.scheduler().unwrap().active_count(), 0);
        assert_eq!(h.backend.sink().stopped().len(), 2);
    }

    #[test]
    fn fehler_der_gegenstelle_beendet_sitzung() {
        let mut h = Harness::new();
        h.aktiv();
        h.remote(TransportEvent::Nachricht(LiveEvent::Error("Quota".into())));
        assert_eq!(h.session.state(), SessionState::Failed);
    }

    #[test]
    fn tick_raeumt_beendete_segmente_ab() {
        let mut h = Harness::new();
        h.aktiv();
        h.audio(0.5);
        h.audio(0.5);
        assert_eq!(h.metrics.playback_active_sources.get(), 2);

        // Letzter Zug: danach kommt kein weiteres Segment mehr
        h.backend.sink().advance_to(0.5);
        assert_eq!(h.session.tick(), 1);
        assert_eq!(h.session.scheduler().unwrap().active_count(), 1);

        h.backend.sink().advance_to(2.0);
        assert_eq!(h.session.tick(), 1);
        assert_eq!(h.session.scheduler().unwrap().active_count(), 0);
        assert_eq!(h.metrics.playback_active_sources.get(), 0);
        assert_eq!(h.metrics.playback_queue_seconds.get(), 0.0);
    }

    #[test]
    fn tick_ohne_sitzung_ist_harmlos() {
        let mut h = Harness::new();
        assert_eq!(h.session.tick(), 0);
        h.aktiv();
        h.session.stop();
        assert_eq!(h.session.tick(), 0);
    }

    #[test]
    fn capture_zaehler_landen_in_metriken() {
        let mut h = Harness::new();
        h.aktiv();
        h.backend.speak(&[0.0; 12]);
        h.session.stop();
        assert_eq!(h.metrics.chunks_sent_total.get(), 3);
    }
}
