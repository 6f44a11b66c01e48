use super::{RuleContext, RuleEvaluation, RuleKind};
use crate::features::contour_similarity;
use crate::segment::{LEVEL_PROGRESSION, Level};
use serde_json::json;

/// Ideal length ratios for asymmetric pairs: balanced, golden, 2:1, 3:4.
const IDEAL_RATIOS: [f64; 4] = [1.0, 0.618, 0.5, 0.75];
/// How close the best ideal-ratio match must be to call the pair
/// proportional.
const PROPORTIONAL_FLOOR: f64 = 0.6;

const SQUARE_SCORE: f64 = 0.9;
const REGULAR_SCORE: f64 = 0.8;
const PROPORTIONAL_SCORE: f64 = 0.7;

const PARALLEL_PATTERN_SCORE: f64 = 0.9;
const CONTRASTING_PATTERN_SCORE: f64 = 0.7;
const MIXED_PATTERN_SCORE: f64 = 0.75;

/// Score how well the merged pair matches conventional phrase
/// architecture: length symmetry on one side, melodic patterning on the
/// other, averaged.
pub fn evaluate(ctx: &RuleContext) -> RuleEvaluation {
    let bars_a = ctx.a.bar_count();
    let bars_b = ctx.b.bar_count();
    let merged = bars_a + bars_b;

    let (length_label, length_score, ratio) = length_classification(bars_a, bars_b);
    let (pattern_label, pattern_score, similarity) = pattern_classification(ctx);
    let score = (length_score + pattern_score) / 2.0;

    RuleEvaluation {
        rule: RuleKind::PhraseStructure,
        decision: length_label.to_string(),
        score,
        reason: format!(
            "{bars_a}+{bars_b} bars: {length_label} lengths, {pattern_label} pattern{}",
            typical_level_for(merged)
                .map(|l| format!(", typical {}", l.as_str()))
                .unwrap_or_default()
        ),
        evidence: json!({
            "bars_a": bars_a,
            "bars_b": bars_b,
            "merged_bars": merged,
            "length_ratio": ratio,
            "length_score": length_score,
            "pattern": pattern_label,
            "contour_similarity": similarity,
        }),
    }
}

/// Square (equal and power-of-two or divisible by 4) beats regular
/// (merely equal) beats proportional (close to a conventional asymmetric
/// ratio) beats everything else.
fn length_classification(bars_a: u32, bars_b: u32) -> (&'static str, f64, f64) {
    if bars_a == 0 || bars_b == 0 {
        return ("degenerate", 0.3, 0.0);
    }
    let ratio = bars_a.min(bars_b) as f64 / bars_a.max(bars_b) as f64;
    if bars_a == bars_b {
        if bars_a.is_power_of_two() || bars_a % 4 == 0 {
            return ("square", SQUARE_SCORE, ratio);
        }
        return ("regular", REGULAR_SCORE, ratio);
    }
    let best_match = IDEAL_RATIOS
        .iter()
        .map(|ideal| 1.0 - (ratio - ideal).abs())
        .fold(f64::NEG_INFINITY, f64::max);
    if best_match > PROPORTIONAL_FLOOR {
        ("proportional", PROPORTIONAL_SCORE, ratio)
    } else {
        ("irregular", 0.3 + 0.4 * ratio, ratio)
    }
}

fn pattern_classification(ctx: &RuleContext) -> (&'static str, f64, f64) {
    let similarity = contour_similarity(
        &ctx.a.features.interval_contour,
        &ctx.b.features.interval_contour,
    );
    if similarity > 0.8 {
        ("parallel", PARALLEL_PATTERN_SCORE, similarity)
    } else if similarity < 0.3 {
        ("contrasting", CONTRASTING_PATTERN_SCORE, similarity)
    } else {
        ("mixed", MIXED_PATTERN_SCORE, similarity)
    }
}

/// The hierarchy level whose typical bar range contains the merged span.
fn typical_level_for(merged_bars: u32) -> Option<Level> {
    LEVEL_PROGRESSION.iter().copied().find(|level| {
        level
            .typical_bars()
            .is_some_and(|(lo, hi)| (lo..=hi).contains(&merged_bars))
    })
}
