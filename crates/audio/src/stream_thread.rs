//! Dedizierter Thread fuer einen cpal-Stream
//!
//! `cpal::Stream` ist nicht `Send` und kann daher nicht in einem
//! Tokio-Task leben. Der Stream wird deshalb in einem eigenen std::thread
//! gebaut, gestartet und bis zum Beenden-Signal am Leben gehalten.

use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Haelt einen cpal-Stream in einem eigenen Thread am Leben
///
/// Wird der `StreamThread` gedroppt, stoppt der Stream automatisch.
pub struct StreamThread {
    name: String,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Startet den Thread und baut darin den Stream via `build`.
    ///
    /// Kehrt erst zurueck, wenn der Stream laeuft oder der Aufbau
    /// fehlgeschlagen ist. Fehler beim Aufbau werden durchgereicht.
    /// Der Zusatzwert `T` (z.B. das ausgehandelte Format) wird an den
    /// Aufrufer weitergegeben.
    pub fn spawn<F, T>(name: &str, build: F) -> AudioResult<(Self, T)>
    where
        F: FnOnce() -> AudioResult<(cpal::Stream, T)> + Send + 'static,
        T: Send + 'static,
    {
        use cpal::traits::StreamTrait;

        let (ready_tx, ready_rx) = bounded::<AudioResult<T>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, info) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamFehler(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(info));

                // Blockiert bis beenden() oder bis der Sender gedroppt wird
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!(thread = %thread_name, "Stream-Thread beendet, Stream gedroppt");
            })
            .map_err(|e| AudioError::AudioThread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok((
                Self {
                    name: name.to_string(),
                    shutdown_tx: Some(shutdown_tx),
                    handle: Some(handle),
                },
                info,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::AudioThread(format!(
                    "Thread '{name}' vorzeitig beendet"
                )))
            }
        }
    }

    /// Stoppt den Stream und wartet auf das Thread-Ende. Idempotent.
    pub fn beenden(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(thread = %self.name, "Stream-Thread ist in Panik beendet");
            }
        }
    }

    /// Laeuft der Stream noch?
    pub fn ist_aktiv(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.beenden();
    }
}
