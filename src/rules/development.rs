use super::{RuleContext, RuleEvaluation, RuleKind};
use crate::features::{Features, resample_correlation};
use crate::rules::tonal::contour_match_ratio;
use serde_json::json;

/// Length of the interval-direction subpattern that counts as shared
/// motivic material.
const SHARED_PATTERN_LEN: usize = 3;

/// Classify how the second node relates to the first on a ladder from
/// literal repetition down to contrast, using four correlation-based
/// similarities over the nodes' features.
pub fn evaluate(ctx: &RuleContext) -> RuleEvaluation {
    let fa = &ctx.a.features;
    let fb = &ctx.b.features;

    let contour_sim = resample_correlation(&directions(fa), &directions(fb));
    let interval_sim = resample_correlation(&intervals(fa), &intervals(fb));
    let rhythm_sim = resample_correlation(&fa.rhythm_fingerprint, &fb.rhythm_fingerprint);
    let histogram_sim =
        resample_correlation(&fa.pitch_class_histogram, &fb.pitch_class_histogram);
    let interval_match = contour_match_ratio(&fa.interval_contour, &fb.interval_contour);

    let (decision, score) = if contour_sim > 0.95 && interval_sim > 0.95 && rhythm_sim > 0.9 {
        ("repetition", 0.95)
    } else if contour_sim > 0.85 && interval_sim > 0.8 && rhythm_sim > 0.75 {
        ("recapitulation", 0.85)
    } else if contour_sim > 0.85 && interval_match > 0.85 {
        ("sequence", 0.8)
    } else if contour_sim > 0.7 && (rhythm_sim < 0.7 || interval_sim < 0.7) {
        ("variation", 0.7)
    } else if contour_sim > 0.5 || shares_direction_pattern(fa, fb) {
        ("development", 0.6)
    } else {
        ("contrast", 0.3)
    };

    RuleEvaluation {
        rule: RuleKind::DevelopmentRelation,
        decision: decision.to_string(),
        score,
        reason: format!(
            "contour {contour_sim:.2}, intervals {interval_sim:.2}, rhythm {rhythm_sim:.2}: {decision}"
        ),
        evidence: json!({
            "contour_similarity": contour_sim,
            "interval_similarity": interval_sim,
            "rhythm_similarity": rhythm_sim,
            "histogram_similarity": histogram_sim,
            "interval_match_ratio": interval_match,
        }),
    }
}

/// Direction-only view of the contour: -1, 0, +1 per step.
fn directions(features: &Features) -> Vec<f64> {
    features
        .interval_contour
        .iter()
        .map(|&step| step.signum() as f64)
        .collect()
}

fn intervals(features: &Features) -> Vec<f64> {
    features
        .interval_contour
        .iter()
        .map(|&step| step as f64)
        .collect()
}

/// True when any 3-step interval-direction run of one node reappears in
/// the other — the motivic thread that marks development rather than
/// contrast.
fn shares_direction_pattern(fa: &Features, fb: &Features) -> bool {
    let da: Vec<i32> = fa.interval_contour.iter().map(|s| s.signum()).collect();
    let db: Vec<i32> = fb.interval_contour.iter().map(|s| s.signum()).collect();
    if da.len() < SHARED_PATTERN_LEN || db.len() < SHARED_PATTERN_LEN {
        return false;
    }
    da.windows(SHARED_PATTERN_LEN)
        .any(|pattern| db.windows(SHARED_PATTERN_LEN).any(|w| w == pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::features;
    use crate::score::Note;
    use crate::segment::Segment;

    fn note(pitch: u8, start: f64, dur: f64) -> Note {
        Note {
            pitch,
            start_time: start,
            end_time: start + dur,
            velocity: 72,
        }
    }

    fn leaf_from(id: &str, pitches: &[u8], onsets: &[f64]) -> Segment {
        let notes: Vec<Note> = pitches
            .iter()
            .zip(onsets)
            .map(|(&p, &on)| note(p, on, 0.4))
            .collect();
        let feats = features::extract(&notes);
        Segment::leaf(id.to_string(), 1, 4, 0.0, 8.0, notes, vec![], feats)
    }

    fn run(a: &Segment, b: &Segment) -> RuleEvaluation {
        let config = RuleConfig::default();
        let ctx = RuleContext {
            a,
            b,
            similarity: 0.9,
            gap_bars: 1,
            config: &config,
        };
        evaluate(&ctx)
    }

    const PITCHES: [u8; 8] = [60, 62, 64, 65, 67, 65, 64, 62];
    const ONSETS: [f64; 8] = [0.0, 0.5, 1.0, 2.0, 3.0, 3.5, 4.5, 6.0];

    // identical features read as repetition
    #[test]
    fn identical_nodes_are_repetition() {
        let a = leaf_from("seg_0", &PITCHES, &ONSETS);
        let b = leaf_from("seg_1", &PITCHES, &ONSETS);
        let eval = run(&a, &b);
        assert_eq!(eval.decision, "repetition");
        assert!((eval.score - 0.95).abs() < 1e-12);
    }

    #[test]
    fn transposed_restatement_is_a_sequence_or_stronger() {
        let shifted: Vec<u8> = PITCHES.iter().map(|&p| p + 5).collect();
        // same intervals and contour, different rhythm
        let slower: Vec<f64> = ONSETS.iter().map(|&t| t * 1.7).collect();
        let a = leaf_from("seg_0", &PITCHES, &ONSETS);
        let b = leaf_from("seg_1", &shifted, &slower);
        let eval = run(&a, &b);
        assert!(
            ["repetition", "recapitulation", "sequence"].contains(&eval.decision.as_str()),
            "got {}",
            eval.decision
        );
    }

    #[test]
    fn same_shape_different_intervals_is_variation() {
        // widened leaps, same up/down shape, different rhythm ratios
        let widened: [u8; 8] = [60, 67, 72, 74, 79, 74, 72, 67];
        let uneven: [f64; 8] = [0.0, 0.25, 1.5, 1.75, 3.0, 3.25, 4.75, 5.0];
        let a = leaf_from("seg_0", &PITCHES, &ONSETS);
        let b = leaf_from("seg_1", &widened, &uneven);
        let eval = run(&a, &b);
        assert!(
            ["variation", "recapitulation"].contains(&eval.decision.as_str()),
            "got {}",
            eval.decision
        );
    }

    #[test]
    fn unrelated_material_is_contrast() {
        let zigzag: [u8; 8] = [60, 72, 58, 71, 59, 73, 57, 70];
        let a = leaf_from("seg_0", &PITCHES, &ONSETS);
        let b = leaf_from("seg_1", &zigzag, &ONSETS);
        let eval = run(&a, &b);
        assert_eq!(eval.decision, "contrast");
        assert!((eval.score - 0.3).abs() < 1e-12);
    }

    #[test]
    fn shared_three_step_pattern_marks_development() {
        let fa = features::Features {
            interval_contour: vec![2, 2, -1, -3],
            ..Default::default()
        };
        let fb = features::Features {
            interval_contour: vec![-5, 1, 4, -2, 7],
            ..Default::default()
        };
        // directions: a = [+,+,-,-], b = [-,+,+,-,+] — b contains [+,+,-]
        assert!(shares_direction_pattern(&fa, &fb));
    }

    #[test]
    fn empty_features_fall_to_contrast() {
        let a = leaf_from("seg_0", &[], &[]);
        let b = leaf_from("seg_1", &PITCHES, &ONSETS);
        let eval = run(&a, &b);
        assert_eq!(eval.decision, "contrast");
    }
}
