/// Laufendes Transkript der Modell-Ausgabe
///
/// Stuecke werden in Ankunftsreihenfolge mit einem Leerzeichen verbunden.
/// Geleert wird nur beim Start einer neuen Sitzung.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    pieces: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Haengt ein Stueck an
    ///
    /// Jedes Stueck wird an beiden Enden getrimmt und mit genau einem
    /// Leerzeichen angehaengt. Das weicht bewusst vom reinen Aneinander-
    /// haengen ab: liefert die Gegenstelle Wortteile (`"Aero"`, `"drome"`),
    /// entsteht `"Aero drome"`. Leere oder reine Leerraum-Stuecke werden
    /// ignoriert und liefern `false`.
    pub fn append(&mut self, piece: &str) -> bool {
        let piece = piece.trim();
        if piece.is_empty() {
            return false;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(piece);
        self.pieces += 1;
        true
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.pieces = 0;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Anzahl angehaengter Stuecke
    pub fn pieces(&self) -> usize {
        self.pieces
    }
}
