use super::{RuleContext, RuleEvaluation, RuleKind};
use serde::Serialize;
use serde_json::json;

/// Krumhansl-Kessler major key profile (probe-tone ratings, C rotation).
pub const KRUMHANSL_MAJOR: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
/// Krumhansl-Kessler minor key profile.
pub const KRUMHANSL_MINOR: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Contours matching at this ratio despite a key shift read as a melodic
/// sequence.
const SEQUENCE_MATCH_RATIO: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
}

/// Best-correlating (tonic, mode) for a pitch-class histogram.
#[derive(Debug, Clone, Copy)]
pub struct KeyEstimate {
    pub tonic: u8,
    pub mode: Mode,
    pub correlation: f64,
}

impl KeyEstimate {
    pub fn name(&self) -> String {
        let mode = match self.mode {
            Mode::Major => "major",
            Mode::Minor => "minor",
        };
        format!("{} {}", NOTE_NAMES[self.tonic as usize], mode)
    }
}

/// Krumhansl-Schmuckler key estimation: correlate the histogram against
/// all 24 rotations of the reference profiles and keep the best. None for
/// an all-zero histogram (no pitch content to estimate from).
pub fn estimate_key(histogram: &[f64; 12]) -> Option<KeyEstimate> {
    if histogram.iter().all(|&b| b == 0.0) {
        return None;
    }
    let mut best: Option<KeyEstimate> = None;
    for tonic in 0..12u8 {
        for (mode, profile) in [
            (Mode::Major, &KRUMHANSL_MAJOR),
            (Mode::Minor, &KRUMHANSL_MINOR),
        ] {
            let correlation = profile_correlation(histogram, profile, tonic);
            if best.is_none_or(|b| correlation > b.correlation) {
                best = Some(KeyEstimate {
                    tonic,
                    mode,
                    correlation,
                });
            }
        }
    }
    best
}

/// Pearson correlation between the histogram and a profile rotated so the
/// given tonic sits at degree zero. Zero variance yields 0, never an
/// error.
fn profile_correlation(histogram: &[f64; 12], profile: &[f64; 12], tonic: u8) -> f64 {
    let hist_mean = histogram.iter().sum::<f64>() / 12.0;
    let prof_mean = profile.iter().sum::<f64>() / 12.0;
    let mut cov = 0.0;
    let mut var_h = 0.0;
    let mut var_p = 0.0;
    for pc in 0..12 {
        let dh = histogram[pc] - hist_mean;
        let dp = profile[(pc + 12 - tonic as usize) % 12] - prof_mean;
        cov += dh * dp;
        var_h += dh * dh;
        var_p += dp * dp;
    }
    let denom = (var_h * var_p).sqrt();
    if denom < 1e-10 { 0.0 } else { cov / denom }
}

/// Compare the two nodes' estimated keys and score how naturally they sit
/// next to each other in a tonal plan.
pub fn evaluate(ctx: &RuleContext) -> RuleEvaluation {
    let key_a = estimate_key(&ctx.a.features.pitch_class_histogram);
    let key_b = estimate_key(&ctx.b.features.pitch_class_histogram);

    let (Some(key_a), Some(key_b)) = (key_a, key_b) else {
        return RuleEvaluation {
            rule: RuleKind::TonalAnalysis,
            decision: "unknown".to_string(),
            score: 0.4,
            reason: "insufficient pitch content for key estimation".to_string(),
            evidence: json!({}),
        };
    };

    let shift = (key_b.tonic + 12 - key_a.tonic) % 12;
    let (decision, score) = if shift == 0 && key_a.mode == key_b.mode {
        ("same_key", 1.0)
    } else if shift == 0 {
        ("parallel", 0.85)
    } else if shift == 3 || shift == 9 {
        ("relative", 0.8)
    } else if shift == 7 {
        ("dominant", 0.75)
    } else if shift == 5 {
        ("subdominant", 0.7)
    } else if contour_match_ratio(
        &ctx.a.features.interval_contour,
        &ctx.b.features.interval_contour,
    ) > SEQUENCE_MATCH_RATIO
    {
        // same melodic line restated in a shifted key
        ("sequence", 0.8)
    } else {
        ("distant", 0.3)
    };

    RuleEvaluation {
        rule: RuleKind::TonalAnalysis,
        decision: decision.to_string(),
        score,
        reason: format!("{} vs {}: {}", key_a.name(), key_b.name(), decision),
        evidence: json!({
            "key_a": key_a.name(),
            "key_b": key_b.name(),
            "tonic_shift": shift,
            "correlation_a": key_a.correlation,
            "correlation_b": key_b.correlation,
        }),
    }
}

/// Fraction of positions where two interval contours agree exactly,
/// over the shorter length. 0 when either is empty.
pub fn contour_match_ratio(a: &[i32], b: &[i32]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f64 / n as f64
}
