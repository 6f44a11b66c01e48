use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("score contains no measures")]
    Empty,
    #[error("measure {0} has no time span (start == end)")]
    ZeroSpan(u32),
}

/// A single note event, immutable once produced by the notation parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch, 0-127.
    pub pitch: u8,
    /// Onset time in seconds.
    pub start_time: f64,
    /// Release time in seconds.
    pub end_time: f64,
    /// MIDI velocity, 0-127.
    pub velocity: u8,
}

impl Note {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// Pitch class (0-11, C = 0).
    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }
}

/// A chord label attached to a measure by the notation parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chord {
    /// Chord symbol as written, e.g. "G7", "Dbmaj7".
    pub symbol: String,
    /// Root pitch class (0-11, C = 0).
    pub root_pc: u8,
    pub start_time: f64,
    pub end_time: f64,
}

/// Enharmonic spellings mapped to pitch classes. Both sharp and flat
/// spellings of each root resolve to the same class.
const ROOT_SPELLINGS: &[(&str, u8)] = &[
    ("C", 0),
    ("B#", 0),
    ("C#", 1),
    ("Db", 1),
    ("D", 2),
    ("D#", 3),
    ("Eb", 3),
    ("E", 4),
    ("Fb", 4),
    ("F", 5),
    ("E#", 5),
    ("F#", 6),
    ("Gb", 6),
    ("G", 7),
    ("G#", 8),
    ("Ab", 8),
    ("A", 9),
    ("A#", 10),
    ("Bb", 10),
    ("B", 11),
    ("Cb", 11),
];

impl Chord {
    /// Build a chord from its symbol, deriving the root pitch class from
    /// the leading note name (longest spelling wins, so "Db7" parses as Db
    /// rather than D). Returns None if no root can be read.
    pub fn from_symbol(symbol: &str, start_time: f64, end_time: f64) -> Option<Self> {
        let root_pc = parse_root_pc(symbol)?;
        Some(Self {
            symbol: symbol.to_string(),
            root_pc,
            start_time,
            end_time,
        })
    }
}

/// Parse the root pitch class out of a chord symbol via the enharmonic table.
pub fn parse_root_pc(symbol: &str) -> Option<u8> {
    let mut best: Option<(usize, u8)> = None;
    for &(spelling, pc) in ROOT_SPELLINGS {
        if symbol.starts_with(spelling) {
            match best {
                Some((len, _)) if len >= spelling.len() => {}
                _ => best = Some((spelling.len(), pc)),
            }
        }
    }
    best.map(|(_, pc)| pc)
}

/// One measure of the primary part, as produced by the external
/// MusicXML/audio parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// 1-based measure number.
    pub number: u32,
    pub notes: Vec<Note>,
    pub chords: Vec<Chord>,
    pub start_time: f64,
    pub end_time: f64,
    pub divisions: u32,
    pub beats_per_measure: u32,
    pub beat_type: u32,
}

impl Measure {
    pub fn span(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// Mean note duration in this measure; 0.0 if empty.
    pub fn mean_note_duration(&self) -> f64 {
        if self.notes.is_empty() {
            return 0.0;
        }
        self.notes.iter().map(Note::duration).sum::<f64>() / self.notes.len() as f64
    }

    /// The last-sounding note (latest onset), if any.
    pub fn last_note(&self) -> Option<&Note> {
        self.notes.iter().max_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Normalized single-part score. Produced by an external parser; this crate
/// only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub measures: Vec<Measure>,
}

impl Score {
    /// Fail fast on unusable input rather than producing degenerate output.
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.measures.is_empty() {
            return Err(ScoreError::Empty);
        }
        for m in &self.measures {
            if m.span() <= 0.0 {
                return Err(ScoreError::ZeroSpan(m.number));
            }
        }
        Ok(())
    }

    pub fn total_measures(&self) -> u32 {
        self.measures.len() as u32
    }
}
