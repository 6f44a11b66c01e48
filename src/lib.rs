pub mod config;
pub mod embedding;
pub mod features;
pub mod pipeline;
pub mod proposals;
pub mod rules;
pub mod score;
pub mod segment;
pub mod segmentation;
pub mod tree;

pub use config::{AnalysisConfig, RuleConfig};
pub use pipeline::{Analysis, AnalyzeError, analyze, analyze_with_progress};
pub use score::Score;
pub use segment::Segment;

/// Minimum leaf segment size in measures. Candidate boundaries closer
/// together than this are dropped during segmentation.
pub const MIN_SEGMENT_BARS: u32 = 2;
