pub mod cadence;
pub mod development;
pub mod phrase;
pub mod proportion;
pub mod tonal;

use crate::config::RuleConfig;
use crate::proposals::MergeProposal;
use crate::segment::{RelationType, Segment};
use serde::Serialize;

/// The five structural rules, in their fixed evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    CadenceDetection,
    PhraseStructure,
    TonalAnalysis,
    DevelopmentRelation,
    ProportionCheck,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::CadenceDetection,
        RuleKind::PhraseStructure,
        RuleKind::TonalAnalysis,
        RuleKind::DevelopmentRelation,
        RuleKind::ProportionCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CadenceDetection => "cadence_detection",
            Self::PhraseStructure => "phrase_structure",
            Self::TonalAnalysis => "tonal_analysis",
            Self::DevelopmentRelation => "development_relation",
            Self::ProportionCheck => "proportion_check",
        }
    }

    pub fn evaluate(&self, ctx: &RuleContext) -> RuleEvaluation {
        match self {
            Self::CadenceDetection => cadence::evaluate(ctx),
            Self::PhraseStructure => phrase::evaluate(ctx),
            Self::TonalAnalysis => tonal::evaluate(ctx),
            Self::DevelopmentRelation => development::evaluate(ctx),
            Self::ProportionCheck => proportion::evaluate(ctx),
        }
    }
}

/// Engine-level verdict on a proposed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Downgrade,
    Reject,
}

/// One rule's output. `decision` is a rule-specific label ("square",
/// "recurrence", "not_closed", ...), not the engine decision.
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvaluation {
    pub rule: RuleKind,
    pub decision: String,
    pub score: f64,
    pub reason: String,
    pub evidence: serde_json::Value,
}

/// Composite verdict across all enabled rules.
#[derive(Debug, Clone, Serialize)]
pub struct RuleVerdict {
    pub decision: Decision,
    pub score: f64,
    pub reason: String,
    pub evidence: Vec<RuleEvaluation>,
    pub relation: RelationType,
}

/// Everything a rule may look at. Rules read immutable segment data and
/// return a value; they never fail.
pub struct RuleContext<'a> {
    pub a: &'a Segment,
    pub b: &'a Segment,
    pub similarity: f64,
    /// Bar gap from a's end to b's start; 1 when adjacent.
    pub gap_bars: i64,
    pub config: &'a RuleConfig,
}

/// Downgrade opens at this fraction of the merge threshold.
const DOWNGRADE_FACTOR: f64 = 0.85;

/// Run every enabled rule against the proposal and fold the scores into a
/// weighted composite. A critical cadence rejection short-circuits the
/// whole verdict — a failed final cadence invalidates the boundary no
/// matter what the other rules say.
pub fn validate_proposal(
    a: &Segment,
    b: &Segment,
    proposal: &MergeProposal,
    config: &RuleConfig,
) -> RuleVerdict {
    let ctx = RuleContext {
        a,
        b,
        similarity: proposal.similarity,
        gap_bars: proposal.gap_bars(),
        config,
    };

    let mut evidence: Vec<RuleEvaluation> = Vec::with_capacity(RuleKind::ALL.len());
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for kind in RuleKind::ALL {
        if !config.is_enabled(kind) {
            continue;
        }
        let eval = kind.evaluate(&ctx);
        if kind == RuleKind::CadenceDetection && is_critical_rejection(&eval) {
            log::debug!(
                "critical cadence rejection for {} + {}: {}",
                a.id,
                b.id,
                eval.reason
            );
            evidence.push(eval);
            return RuleVerdict {
                decision: Decision::Reject,
                score: 0.0,
                reason: "critical cadence rejection".to_string(),
                evidence,
                relation: RelationType::Unknown,
            };
        }
        weighted += config.weight(kind) * eval.score;
        total_weight += config.weight(kind);
        evidence.push(eval);
    }

    let score = if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    };

    let merge_threshold = config.thresholds.merge;
    let decision = if score >= merge_threshold {
        Decision::Accept
    } else if score >= DOWNGRADE_FACTOR * merge_threshold {
        Decision::Downgrade
    } else {
        Decision::Reject
    };

    let relation = relation_from_evidence(&evidence);
    let reason = evidence
        .iter()
        .map(|e| format!("{}={}({:.2})", e.rule.as_str(), e.decision, e.score))
        .collect::<Vec<_>>()
        .join(", ");

    RuleVerdict {
        decision,
        score,
        reason,
        evidence,
        relation,
    }
}

/// Reserved extension point: no current rule ever emits it, but the engine
/// honors it if one does.
fn is_critical_rejection(eval: &RuleEvaluation) -> bool {
    eval.decision == "reject"
        && eval
            .evidence
            .get("is_critical")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
}

/// A recurrence gate from the proportion rule wins; otherwise the
/// development rule names the relation.
fn relation_from_evidence(evidence: &[RuleEvaluation]) -> RelationType {
    if evidence
        .iter()
        .any(|e| e.rule == RuleKind::ProportionCheck && e.decision == "recurrence")
    {
        return RelationType::Recurrence;
    }
    evidence
        .iter()
        .find(|e| e.rule == RuleKind::DevelopmentRelation)
        .and_then(|e| RelationType::from_label(&e.decision))
        .unwrap_or(RelationType::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features;
    use crate::proposals::{MergeProposal, ProposalKind};
    use crate::score::Note;

    fn note(pitch: u8, start: f64, dur: f64) -> Note {
        Note {
            pitch,
            start_time: start,
            end_time: start + dur,
            velocity: 72,
        }
    }

    /// A melodic 4-bar leaf with varied contour and rhythm, shifted in time.
    pub(crate) fn melodic_leaf(id: &str, start_bar: u32, t0: f64) -> Segment {
        let pitches = [60u8, 62, 64, 65, 67, 65, 64, 62];
        let onsets = [0.0, 0.5, 1.0, 2.0, 3.0, 3.5, 4.5, 6.0];
        let notes: Vec<Note> = pitches
            .iter()
            .zip(onsets)
            .enumerate()
            .map(|(i, (&p, on))| note(p, t0 + on, if i == 7 { 1.5 } else { 0.5 }))
            .collect();
        let feats = features::extract(&notes);
        Segment::leaf(
            id.to_string(),
            start_bar,
            start_bar + 3,
            t0,
            t0 + 8.0,
            notes,
            vec![],
            feats,
        )
    }

    fn proposal_for(a: &Segment, b: &Segment, similarity: f64) -> MergeProposal {
        MergeProposal {
            a_id: a.id.clone(),
            b_id: b.id.clone(),
            a_index: 0,
            b_index: 1,
            a_start_bar: a.start_bar,
            a_end_bar: a.end_bar,
            b_start_bar: b.start_bar,
            b_end_bar: b.end_bar,
            similarity,
            kind: if b.start_bar as i64 - a.end_bar as i64 == 1 {
                ProposalKind::Adjacent
            } else {
                ProposalKind::Recurrence
            },
            priority: 0,
        }
    }

    #[test]
    fn identical_adjacent_phrases_are_accepted() {
        let a = melodic_leaf("seg_0", 1, 0.0);
        let b = melodic_leaf("seg_1", 5, 8.0);
        let config = RuleConfig::default();
        let verdict = validate_proposal(&a, &b, &proposal_for(&a, &b, 0.98), &config);
        assert_eq!(verdict.decision, Decision::Accept);
        assert!(verdict.score >= config.thresholds.merge);
        assert_eq!(verdict.relation, RelationType::Repetition);
        assert_eq!(verdict.evidence.len(), 5);
    }

    // Composite renormalizes over the enabled subset
    #[test]
    fn disabled_rules_are_skipped_and_weights_renormalize() {
        let a = melodic_leaf("seg_0", 1, 0.0);
        let b = melodic_leaf("seg_1", 5, 8.0);
        let mut config = RuleConfig::default();
        config.enabled.cadence_detection = false;
        config.enabled.tonal_analysis = false;
        let verdict = validate_proposal(&a, &b, &proposal_for(&a, &b, 0.98), &config);
        assert_eq!(verdict.evidence.len(), 3);
        assert!((0.0..=1.0).contains(&verdict.score));
    }

    // only the cadence rule, at weight 1.0, with a perfect cadence
    #[test]
    fn lone_perfect_cadence_rule_accepts_at_full_score() {
        use crate::score::Chord;

        let a = melodic_leaf("seg_0", 1, 0.0);
        let mut b = melodic_leaf("seg_1", 5, 8.0);
        // Unambiguous C-major tonality, V -> I close, melody landing on the
        // tonic
        let pitches = [60u8, 64, 67, 72, 67, 64, 62, 60];
        let onsets = [0.0, 0.5, 1.0, 2.0, 3.0, 3.5, 4.5, 6.0];
        b.notes = pitches
            .iter()
            .zip(onsets)
            .enumerate()
            .map(|(i, (&p, on))| note(p, 8.0 + on, if i == 7 { 2.0 } else { 0.5 }))
            .collect();
        b.chords = vec![
            Chord::from_symbol("G", 12.0, 14.0).unwrap(),
            Chord::from_symbol("C", 14.0, 16.0).unwrap(),
        ];
        b.features = features::extract(&b.notes);

        let mut config = RuleConfig::default();
        config.weights.cadence_detection = 1.0;
        config.weights.phrase_structure = 0.0;
        config.weights.tonal_analysis = 0.0;
        config.weights.development_relation = 0.0;
        config.weights.proportion_check = 0.0;
        config.thresholds.merge = 0.5;
        config.validate().unwrap();

        let verdict = validate_proposal(&a, &b, &proposal_for(&a, &b, 0.9), &config);
        assert!((verdict.score - 1.0).abs() < 1e-9, "score = {}", verdict.score);
        assert_eq!(verdict.decision, Decision::Accept);
    }

    #[test]
    fn critical_rejection_short_circuits() {
        let eval = RuleEvaluation {
            rule: RuleKind::CadenceDetection,
            decision: "reject".to_string(),
            score: 0.0,
            reason: "synthetic".to_string(),
            evidence: serde_json::json!({ "is_critical": true }),
        };
        assert!(is_critical_rejection(&eval));
        // the cadence rule itself never emits this today
        let a = melodic_leaf("seg_0", 1, 0.0);
        let b = melodic_leaf("seg_1", 5, 8.0);
        let ctx = RuleContext {
            a: &a,
            b: &b,
            similarity: 0.9,
            gap_bars: 1,
            config: &RuleConfig::default(),
        };
        let real = RuleKind::CadenceDetection.evaluate(&ctx);
        assert!(!is_critical_rejection(&real));
    }

    #[test]
    fn downgrade_band_sits_below_merge_threshold() {
        let config = RuleConfig::default();
        let t = config.thresholds.merge;
        // decision mapping boundaries: accept at t, downgrade at 0.85t
        assert!(t > 0.85 * t);
    }
}
