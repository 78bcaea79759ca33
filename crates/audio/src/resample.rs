//! Abtastraten-Umrechnung via rubato
//!
//! Viele Geraete unterstuetzen 16 kHz bzw. 24 kHz nicht nativ. Dann laeuft
//! der Stream mit der Geraete-Rate und die Samples werden hier umgerechnet.
//!
//! rubato arbeitet in festen Eingabe-Chunks. Der [`StreamResampler`]
//! puffert den Rest eines Blocks bis zum naechsten Aufruf, sodass
//! aufeinanderfolgende Bloecke ein durchgehendes Signal ergeben.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{AudioError, AudioResult};

/// Eingabe-Frames pro rubato-Durchlauf
pub const CHUNK_FRAMES: usize = 64;

/// Streaming-Resampler (Mono) mit Zustand ueber Blockgrenzen
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: FastFixedIn<f32>,
    /// Eingabe, die noch keinen vollen Chunk ergibt
    pending: Vec<f32>,
    /// Noch zu verwerfende Frames der Einschwingverzoegerung
    skip: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> AudioResult<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(AudioError::Konfiguration(format!(
                "Ungueltige Abtastraten {from_rate} -> {to_rate}"
            )));
        }
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = FastFixedIn::<f32>::new(ratio, 1.1, PolynomialDegree::Cubic, CHUNK_FRAMES, 1)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;
        let skip = inner.output_delay();
        Ok(Self {
            from_rate,
            to_rate,
            inner,
            pending: Vec::with_capacity(CHUNK_FRAMES),
            skip,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Eingabe-Samples, die auf den naechsten Aufruf warten
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Rechnet einen Block um
    ///
    /// Liefert nur Ausgabe fuer vollstaendige Chunks; der Rest bleibt
    /// gepuffert.
    pub fn process(&mut self, input: &[f32]) -> AudioResult<Vec<f32>> {
        self.pending.extend_from_slice(input);

        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let mut out = Vec::with_capacity((self.pending.len() as f64 * ratio).ceil() as usize + 1);
        let mut verbraucht = 0;

        while self.pending.len() - verbraucht >= CHUNK_FRAMES {
            let chunk: [&[f32]; 1] = [&self.pending[verbraucht..verbraucht + CHUNK_FRAMES]];
            let mut frames = self
                .inner
                .process(&chunk[..], None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;
            verbraucht += CHUNK_FRAMES;

            let mono = frames.pop().unwrap_or_default();
            let weg = self.skip.min(mono.len());
            self.skip -= weg;
            out.extend_from_slice(&mono[weg..]);
        }

        self.pending.drain(..verbraucht);
        Ok(out)
    }

    /// Verwirft Puffer und Filterzustand
    pub fn reset(&mut self) {
        self.inner.reset();
        self.pending.clear();
        self.skip = self.inner.output_delay();
    }
}
