use super::{RuleContext, RuleEvaluation, RuleKind};
use serde_json::json;

/// Similarity a gapped pair needs before it reads as a recurrence rather
/// than an accident of the scan.
const RECURRENCE_SIMILARITY: f64 = 0.8;

const GOLDEN_RATIO: f64 = 0.618;
const GOLDEN_TOLERANCE: f64 = 0.05;
const TWO_TO_ONE_TOLERANCE: f64 = 0.05;
const THREE_TO_TWO: f64 = 2.0 / 3.0;
const THREE_TO_TWO_TOLERANCE: f64 = 0.1;

/// Temporal-proportion check. Gapped pairs are gated first: far-apart
/// segments either register as a recurrence (when similar enough) or are
/// rejected outright, skipping the proportion ladder entirely.
pub fn evaluate(ctx: &RuleContext) -> RuleEvaluation {
    let max_gap = ctx.config.thresholds.max_gap_bars as i64;
    if ctx.gap_bars > max_gap + 1 {
        return gap_verdict(ctx, max_gap);
    }

    let bars_a = ctx.a.bar_count();
    let bars_b = ctx.b.bar_count();
    let ratio = if bars_a.max(bars_b) == 0 {
        0.0
    } else {
        bars_a.min(bars_b) as f64 / bars_a.max(bars_b) as f64
    };

    let (decision, score) = if bars_a == bars_b && bars_a.is_power_of_two() {
        ("square", 1.0)
    } else if bars_a == bars_b {
        ("regular", 0.85)
    } else if (ratio - GOLDEN_RATIO).abs() < GOLDEN_TOLERANCE {
        ("golden", 0.8)
    } else if (ratio - 0.5).abs() < TWO_TO_ONE_TOLERANCE {
        ("two_to_one", 0.75)
    } else if (ratio - THREE_TO_TWO).abs() < THREE_TO_TWO_TOLERANCE {
        ("three_to_two", 0.7)
    } else {
        ("asymmetric", 0.5 + 0.3 * ratio)
    };

    RuleEvaluation {
        rule: RuleKind::ProportionCheck,
        decision: decision.to_string(),
        score,
        reason: format!("{bars_a}+{bars_b} bars, ratio {ratio:.3}: {decision}"),
        evidence: json!({
            "bars_a": bars_a,
            "bars_b": bars_b,
            "ratio": ratio,
            "gap_bars": ctx.gap_bars,
        }),
    }
}

fn gap_verdict(ctx: &RuleContext, max_gap: i64) -> RuleEvaluation {
    let recurrence = ctx.similarity > RECURRENCE_SIMILARITY;
    let (decision, score) = if recurrence {
        ("recurrence", 0.6)
    } else {
        ("reject", 0.2)
    };
    RuleEvaluation {
        rule: RuleKind::ProportionCheck,
        decision: decision.to_string(),
        score,
        reason: format!(
            "gap of {} bars exceeds max {} (+1): {}",
            ctx.gap_bars, max_gap, decision
        ),
        evidence: json!({
            "gap_bars": ctx.gap_bars,
            "max_gap_bars": max_gap,
            "similarity": ctx.similarity,
        }),
    }
}
