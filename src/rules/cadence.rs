use super::{RuleContext, RuleEvaluation, RuleKind};
use crate::features::CadenceType;
use crate::rules::tonal;
use crate::score::Note;
use crate::segment::Segment;
use serde_json::json;

/// Scale degrees (semitones above the tonic) carrying dominant function:
/// V and its functional stand-in vii(dim).
const DOMINANT_DEGREES: [u8; 2] = [7, 11];
/// Degrees carrying subdominant function: IV and ii.
const SUBDOMINANT_DEGREES: [u8; 2] = [5, 2];

/// A final note this much longer than the node average reads as a
/// rhythmic close.
const RHYTHMIC_CLOSE_FACTOR: f64 = 1.4;

// Scoring ladder for the no-chord fallback.
const BOTH_CLOSURES_SCORE: f64 = 0.7;
const RHYTHMIC_ONLY_SCORE: f64 = 0.5;
const MELODIC_ONLY_SCORE: f64 = 0.45;
const NO_CLOSURE_SCORE: f64 = 0.3;

/// Inspect the later-ending node's trailing harmony for one of the five
/// cadence archetypes; fall back to rhythmic/melodic closure when the
/// chord track is silent or inconclusive. Never fails: missing evidence
/// lands at the bottom of the ladder, not in an error.
pub fn evaluate(ctx: &RuleContext) -> RuleEvaluation {
    let node = if ctx.b.end_time >= ctx.a.end_time {
        ctx.b
    } else {
        ctx.a
    };
    match chord_cadence(node) {
        Some(eval) => eval,
        None => closure_fallback(node),
    }
}

/// Roman-numeral match on the node's last two chords, read against its own
/// estimated key.
fn chord_cadence(node: &Segment) -> Option<RuleEvaluation> {
    let key = tonal::estimate_key(&node.features.pitch_class_histogram)?;
    if node.chords.len() < 2 {
        return None;
    }
    let mut chords: Vec<_> = node.chords.iter().collect();
    chords.sort_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let prev = chords[chords.len() - 2];
    let last = chords[chords.len() - 1];
    let prev_degree = (prev.root_pc + 12 - key.tonic) % 12;
    let last_degree = (last.root_pc + 12 - key.tonic) % 12;

    let archetype = if DOMINANT_DEGREES.contains(&prev_degree) && last_degree == 0 {
        // authentic close; perfect needs the melody to land on the tonic
        if landing_pitch_class(node) == Some(key.tonic) {
            CadenceType::Perfect
        } else {
            CadenceType::Imperfect
        }
    } else if DOMINANT_DEGREES.contains(&prev_degree) && last_degree == 9 {
        CadenceType::Deceptive
    } else if SUBDOMINANT_DEGREES.contains(&prev_degree) && last_degree == 0 {
        CadenceType::Plagal
    } else if last_degree == 7 {
        CadenceType::Half
    } else {
        return None;
    };

    Some(RuleEvaluation {
        rule: RuleKind::CadenceDetection,
        decision: archetype.as_str().to_string(),
        score: archetype.weight(),
        reason: format!(
            "{} cadence ({} -> {}) in {}",
            archetype.as_str(),
            prev.symbol,
            last.symbol,
            key.name()
        ),
        evidence: json!({
            "archetype": archetype.as_str(),
            "prev_degree": prev_degree,
            "last_degree": last_degree,
            "key": key.name(),
            "is_critical": false,
        }),
    })
}

/// Rhythmic lengthening and melodic closure when no chord archetype
/// matches.
fn closure_fallback(node: &Segment) -> RuleEvaluation {
    let rhythmic = rhythmic_close(node);
    let melodic = melodic_close(node);

    let (decision, score) = match (rhythmic, melodic) {
        (true, true) => ("closed", BOTH_CLOSURES_SCORE),
        (true, false) => ("rhythmic_close", RHYTHMIC_ONLY_SCORE),
        (false, true) => ("melodic_close", MELODIC_ONLY_SCORE),
        (false, false) => ("not_closed", NO_CLOSURE_SCORE),
    };

    RuleEvaluation {
        rule: RuleKind::CadenceDetection,
        decision: decision.to_string(),
        score,
        reason: format!(
            "no chord cadence; rhythmic close: {rhythmic}, melodic close: {melodic}"
        ),
        evidence: json!({
            "rhythmic_close": rhythmic,
            "melodic_close": melodic,
            "is_critical": false,
        }),
    }
}

fn rhythmic_close(node: &Segment) -> bool {
    let avg = node.features.average_duration;
    if avg <= 0.0 {
        return false;
    }
    match last_note(node) {
        Some(last) => last.duration() > RHYTHMIC_CLOSE_FACTOR * avg,
        None => false,
    }
}

/// Stepwise three-note descent, or the melody landing on pitch class 0
/// or 7 (C or G, absolute — no key context in the fallback).
fn melodic_close(node: &Segment) -> bool {
    let contour = &node.features.interval_contour;
    if contour.len() >= 2 {
        let tail = &contour[contour.len() - 2..];
        if tail.iter().all(|&step| (-2..=-1).contains(&step)) {
            return true;
        }
    }
    matches!(landing_pitch_class(node), Some(0) | Some(7))
}

fn last_note(node: &Segment) -> Option<&Note> {
    node.notes.iter().max_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn landing_pitch_class(node: &Segment) -> Option<u8> {
    last_note(node).map(Note::pitch_class)
}
