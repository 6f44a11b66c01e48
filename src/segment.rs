use crate::features::Features;
use crate::score::{Chord, Note};
use serde::{Deserialize, Serialize};

/// Hierarchy levels, smallest first. Ordering follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Motif,
    Subphrase,
    Phrase,
    Period,
    Theme,
    Section,
    Movement,
    Root,
}

/// Mergeable levels in bottom-up order. `Root` is synthesized last and is
/// never a merge target.
pub const LEVEL_PROGRESSION: [Level; 7] = [
    Level::Motif,
    Level::Subphrase,
    Level::Phrase,
    Level::Period,
    Level::Theme,
    Level::Section,
    Level::Movement,
];

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motif => "motif",
            Self::Subphrase => "subphrase",
            Self::Phrase => "phrase",
            Self::Period => "period",
            Self::Theme => "theme",
            Self::Section => "section",
            Self::Movement => "movement",
            Self::Root => "root",
        }
    }

    /// Typical bar-span range for this level, used by the phrase-structure
    /// rule and for relabeling oversized unmerged nodes.
    pub fn typical_bars(&self) -> Option<(u32, u32)> {
        match self {
            Self::Motif => Some((1, 2)),
            Self::Subphrase => Some((2, 4)),
            Self::Phrase => Some((4, 8)),
            Self::Period => Some((8, 16)),
            Self::Theme => Some((16, 32)),
            Self::Section => Some((32, 64)),
            Self::Movement | Self::Root => None,
        }
    }

    /// The level a node of `bars` width already behaves like, regardless of
    /// how many merges produced it.
    pub fn for_bar_span(bars: u32) -> Level {
        match bars {
            b if b >= 32 => Level::Section,
            b if b >= 16 => Level::Theme,
            b if b >= 8 => Level::Period,
            b if b >= 4 => Level::Phrase,
            b if b >= 2 => Level::Subphrase,
            _ => Level::Motif,
        }
    }
}

/// How a merged node's children relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Repetition,
    Recapitulation,
    Sequence,
    Variation,
    Development,
    Contrast,
    Recurrence,
    Grouped,
    Unknown,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repetition => "repetition",
            Self::Recapitulation => "recapitulation",
            Self::Sequence => "sequence",
            Self::Variation => "variation",
            Self::Development => "development",
            Self::Contrast => "contrast",
            Self::Recurrence => "recurrence",
            Self::Grouped => "grouped",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "repetition" => Some(Self::Repetition),
            "recapitulation" => Some(Self::Recapitulation),
            "sequence" => Some(Self::Sequence),
            "variation" => Some(Self::Variation),
            "development" => Some(Self::Development),
            "contrast" => Some(Self::Contrast),
            "recurrence" => Some(Self::Recurrence),
            "grouped" => Some(Self::Grouped),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A node of the structural hierarchy. Leaves come from segmentation and
/// hold the actual notes; internal nodes are created once by the tree
/// builder and carry merged features instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Inclusive 1-based bar span.
    pub start_bar: u32,
    pub end_bar: u32,
    pub start_time: f64,
    pub end_time: f64,
    /// Chronologically ordered; empty for internal nodes.
    pub notes: Vec<Note>,
    /// Chord labels covering the span, kept through merges so the cadence
    /// rule can read trailing harmony at every level.
    pub chords: Vec<Chord>,
    pub level: Level,
    pub features: Features,
    /// 1.0 for leaves pending validation; merge composite score above.
    pub confidence: f64,
    /// None for leaves and the root.
    pub relation: Option<RelationType>,
    pub children: Vec<Segment>,
    /// Id back-reference, set when a merge creates the parent. Never used
    /// for ownership.
    pub parent: Option<String>,
}

impl Segment {
    pub fn leaf(
        id: String,
        start_bar: u32,
        end_bar: u32,
        start_time: f64,
        end_time: f64,
        notes: Vec<Note>,
        chords: Vec<Chord>,
        features: Features,
    ) -> Self {
        Self {
            id,
            start_bar,
            end_bar,
            start_time,
            end_time,
            notes,
            chords,
            level: Level::Motif,
            features,
            confidence: 1.0,
            relation: None,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Inclusive bar count of the span.
    pub fn bar_count(&self) -> u32 {
        self.end_bar.saturating_sub(self.start_bar) + 1
    }

    /// Depth-first leaves under this node (the node itself if it is one).
    pub fn leaves(&self) -> Vec<&Segment> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Segment>) {
        if self.is_leaf() {
            out.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }
}
