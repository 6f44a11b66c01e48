use crate::config::RuleConfig;
use crate::embedding::{cosine_similarity, embed};
use crate::features;
use crate::proposals::{MergeProposal, ProposalKind};
use crate::rules::{self, Decision, RuleVerdict};
use crate::segment::{LEVEL_PROGRESSION, Level, RelationType, Segment};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("cannot build a hierarchy from zero leaves")]
    NoLeaves,
}

/// Composite score below which a non-rejected pair still does not merge.
const MERGE_SCORE_FLOOR: f64 = 0.5;

/// Typical merged bar span per merge step, indexed alongside
/// LEVEL_PROGRESSION targets (subphrase through movement). A merge is
/// only committed when its span lands within [0.5x, 2x] of the step's
/// typical size.
const TYPICAL_MERGED_BARS: [u32; 6] = [4, 8, 16, 32, 64, 128];

/// A merge proposal paired with the verdict the rule engine gave it.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedProposal {
    pub proposal: MergeProposal,
    pub verdict: RuleVerdict,
}

impl ValidatedProposal {
    /// Whether this proposal covers the given pair, by id or by exact bar
    /// spans.
    pub fn matches(&self, a: &Segment, b: &Segment) -> bool {
        (self.proposal.a_id == a.id && self.proposal.b_id == b.id)
            || (self.proposal.a_start_bar == a.start_bar
                && self.proposal.a_end_bar == a.end_bar
                && self.proposal.b_start_bar == b.start_bar
                && self.proposal.b_end_bar == b.end_bar)
    }
}

/// Build the structural hierarchy bottom-up: one left-to-right merge pass
/// per level, committing adjacent merges the rule engine approved. A pass
/// that commits nothing gets a forced pairwise grouping, so node count
/// shrinks at every level and construction always reaches the synthesized
/// root within the level progression.
pub fn build_tree(
    leaves: Vec<Segment>,
    validated: &[ValidatedProposal],
    config: &RuleConfig,
) -> Result<Segment, TreeError> {
    if leaves.is_empty() {
        return Err(TreeError::NoLeaves);
    }

    let mut nodes = leaves;
    let mut next_id = 0usize;

    for (step, target) in LEVEL_PROGRESSION.iter().copied().enumerate().skip(1) {
        if nodes.len() < 2 {
            break;
        }
        let typical = TYPICAL_MERGED_BARS[step - 1];
        let before = nodes.len();
        nodes = merge_pass(nodes, validated, config, target, typical, &mut next_id);
        if nodes.len() == before {
            log::warn!(
                "no eligible merges toward {}; grouping {} nodes pairwise",
                target.as_str(),
                nodes.len()
            );
            nodes = force_group_pass(nodes, target, &mut next_id);
        }
    }

    Ok(synthesize_root(nodes))
}

/// One left-to-right scan: each adjacent pair either merges (consuming
/// both) or leaves its first node behind, relabeled upward when its span
/// already reads as a wider level.
fn merge_pass(
    nodes: Vec<Segment>,
    validated: &[ValidatedProposal],
    config: &RuleConfig,
    target: Level,
    typical: u32,
    next_id: &mut usize,
) -> Vec<Segment> {
    let mut queue: VecDeque<Segment> = nodes.into();
    let mut out = Vec::with_capacity(queue.len());

    while let Some(a) = queue.pop_front() {
        let Some(b) = queue.front() else {
            out.push(relabel_for_span(a));
            break;
        };
        let verdict = pair_verdict(&a, b, validated, config);
        let merged_bars = b.end_bar.max(a.end_bar) - a.start_bar.min(b.start_bar) + 1;
        if should_merge(&verdict, merged_bars, typical) {
            match queue.pop_front() {
                Some(b) => out.push(make_parent(
                    a,
                    b,
                    verdict.score,
                    verdict.relation,
                    target,
                    next_id,
                )),
                None => out.push(relabel_for_span(a)),
            }
        } else {
            out.push(relabel_for_span(a));
        }
    }
    out
}

/// Upgrade an unmerged node's level tag when its bar span already matches
/// a wider level. No merge happens; only the label moves.
fn relabel_for_span(mut node: Segment) -> Segment {
    let span_level = Level::for_bar_span(node.bar_count());
    if span_level > node.level {
        node.level = span_level;
    }
    node
}

/// Reuse the leaf-stage verdict when one covers this pair; otherwise run
/// the rule engine fresh, which happens for every pair above leaf level.
fn pair_verdict(
    a: &Segment,
    b: &Segment,
    validated: &[ValidatedProposal],
    config: &RuleConfig,
) -> RuleVerdict {
    if let Some(hit) = validated.iter().find(|v| v.matches(a, b)) {
        return hit.verdict.clone();
    }
    let similarity = cosine_similarity(&embed(&a.features), &embed(&b.features));
    let gap = b.start_bar as i64 - a.end_bar as i64;
    let proposal = MergeProposal {
        a_id: a.id.clone(),
        b_id: b.id.clone(),
        a_index: 0,
        b_index: 1,
        a_start_bar: a.start_bar,
        a_end_bar: a.end_bar,
        b_start_bar: b.start_bar,
        b_end_bar: b.end_bar,
        similarity,
        kind: if gap == 1 {
            ProposalKind::Adjacent
        } else {
            ProposalKind::Recurrence
        },
        priority: 0,
    };
    rules::validate_proposal(a, b, &proposal, config)
}

fn should_merge(verdict: &RuleVerdict, merged_bars: u32, typical: u32) -> bool {
    if verdict.decision == Decision::Reject || verdict.score < MERGE_SCORE_FLOOR {
        return false;
    }
    let bars = merged_bars as f64;
    let t = typical as f64;
    bars >= 0.5 * t && bars <= 2.0 * t
}

/// Unconditional pairwise grouping for a stalled level. Grouped parents
/// carry a flat 0.5 confidence: the hierarchy asserts containment, not
/// kinship.
fn force_group_pass(nodes: Vec<Segment>, target: Level, next_id: &mut usize) -> Vec<Segment> {
    let mut queue: VecDeque<Segment> = nodes.into();
    let mut out = Vec::with_capacity(queue.len() / 2 + 1);
    while let Some(a) = queue.pop_front() {
        match queue.pop_front() {
            Some(b) => out.push(make_parent(a, b, 0.5, RelationType::Grouped, target, next_id)),
            None => out.push(a),
        }
    }
    out
}

fn make_parent(
    mut a: Segment,
    mut b: Segment,
    confidence: f64,
    relation: RelationType,
    target: Level,
    next_id: &mut usize,
) -> Segment {
    let id = format!("node_{}", *next_id);
    *next_id += 1;

    let start_bar = a.start_bar.min(b.start_bar);
    let end_bar = a.end_bar.max(b.end_bar);
    let start_time = a.start_time.min(b.start_time);
    let end_time = a.end_time.max(b.end_time);

    // A node spanning more bars than its nominal level already behaves
    // like the wider one; a parent must also sit strictly above both
    // children.
    let level = target
        .max(Level::for_bar_span(end_bar - start_bar + 1))
        .max(level_above(a.level.max(b.level)));

    let features = features::merge(&a.features, &b.features);
    let mut notes = a.notes.clone();
    notes.extend_from_slice(&b.notes);
    let mut chords = a.chords.clone();
    chords.extend_from_slice(&b.chords);

    a.parent = Some(id.clone());
    b.parent = Some(id.clone());

    Segment {
        id,
        start_bar,
        end_bar,
        start_time,
        end_time,
        notes,
        chords,
        level,
        features,
        confidence,
        relation: Some(relation),
        children: vec![a, b],
        parent: None,
    }
}

/// Next mergeable level up; movement is the ceiling below the root.
fn level_above(level: Level) -> Level {
    LEVEL_PROGRESSION
        .iter()
        .position(|&l| l == level)
        .and_then(|pos| LEVEL_PROGRESSION.get(pos + 1))
        .copied()
        .unwrap_or(Level::Movement)
}

/// Wrap whatever remains under a synthesized root covering the whole
/// score. The root is always present, even over a single node.
fn synthesize_root(mut nodes: Vec<Segment>) -> Segment {
    let start_bar = nodes.iter().map(|n| n.start_bar).min().unwrap_or(1);
    let end_bar = nodes.iter().map(|n| n.end_bar).max().unwrap_or(1);
    let start_time = nodes.iter().map(|n| n.start_time).fold(f64::INFINITY, f64::min);
    let end_time = nodes.iter().map(|n| n.end_time).fold(f64::NEG_INFINITY, f64::max);

    let mut iter = nodes.iter();
    let features = match iter.next() {
        Some(first) => iter.fold(first.features.clone(), |acc, n| {
            features::merge(&acc, &n.features)
        }),
        None => features::Features::default(),
    };
    let notes = nodes.iter().flat_map(|n| n.notes.clone()).collect();
    let chords = nodes.iter().flat_map(|n| n.chords.clone()).collect();

    for node in &mut nodes {
        node.parent = Some("root".to_string());
    }

    Segment {
        id: "root".to_string(),
        start_bar,
        end_bar,
        start_time: if start_time.is_finite() { start_time } else { 0.0 },
        end_time: if end_time.is_finite() { end_time } else { 0.0 },
        notes,
        chords,
        level: Level::Root,
        features,
        confidence: 1.0,
        relation: None,
        children: nodes,
        parent: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleToggles;
    use crate::score::Note;

    fn note(pitch: u8, start: f64, dur: f64) -> Note {
        Note {
            pitch,
            start_time: start,
            end_time: start + dur,
            velocity: 72,
        }
    }

    /// 4-bar leaf with an arch contour and varied rhythm, shifted to its
    /// bar position.
    fn melodic_leaf(n: usize, start_bar: u32) -> Segment {
        let t0 = (start_bar - 1) as f64 * 2.0;
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
            format!("seg_{n}"),
            start_bar,
            start_bar + 3,
            t0,
            t0 + 8.0,
            notes,
            vec![],
            feats,
        )
    }

    fn zigzag_leaf(n: usize, start_bar: u32) -> Segment {
        let t0 = (start_bar - 1) as f64 * 2.0;
        let pitches = [60u8, 72, 58, 71, 59, 73, 57, 70];
        let onsets = [0.0, 0.5, 1.0, 2.0, 3.0, 3.5, 4.5, 6.0];
        let notes: Vec<Note> = pitches
            .iter()
            .zip(onsets)
            .map(|(&p, on)| note(p, t0 + on, 0.5))
            .collect();
        let feats = features::extract(&notes);
        Segment::leaf(
            format!("seg_{n}"),
            start_bar,
            start_bar + 3,
            t0,
            t0 + 8.0,
            notes,
            vec![],
            feats,
        )
    }

    fn check_invariants(node: &Segment) {
        assert!((0.0..=1.0).contains(&node.confidence));
        if !node.children.is_empty() {
            // non-leaf bounds are exactly the min/max over children
            let min_start = node.children.iter().map(|c| c.start_bar).min().unwrap();
            let max_end = node.children.iter().map(|c| c.end_bar).max().unwrap();
            assert_eq!(node.start_bar, min_start);
            assert_eq!(node.end_bar, max_end);
        }
        for child in &node.children {
            assert!(child.level < node.level, "{:?} !< {:?}", child.level, node.level);
            assert_eq!(child.parent.as_deref(), Some(node.id.as_str()));
            check_invariants(child);
        }
    }

    // Every leaf survives exactly once and the root always exists
    #[test]
    fn similar_leaves_build_a_rooted_hierarchy() {
        let leaves: Vec<_> = (0..4).map(|i| melodic_leaf(i, i as u32 * 4 + 1)).collect();
        let root = build_tree(leaves, &[], &RuleConfig::default()).unwrap();

        assert_eq!(root.id, "root");
        assert_eq!(root.level, Level::Root);
        assert_eq!(root.confidence, 1.0);
        assert_eq!(root.start_bar, 1);
        assert_eq!(root.end_bar, 16);

        let ids: Vec<_> = root.leaves().iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec!["seg_0", "seg_1", "seg_2", "seg_3"]);
        check_invariants(&root);
    }

    #[test]
    fn merged_parents_carry_verdict_confidence_and_relation() {
        let leaves = vec![melodic_leaf(0, 1), melodic_leaf(1, 5)];
        let root = build_tree(leaves, &[], &RuleConfig::default()).unwrap();
        assert_eq!(root.children.len(), 1);
        let parent = &root.children[0];
        assert_eq!(parent.children.len(), 2);
        assert_eq!(parent.relation, Some(RelationType::Repetition));
        assert!(parent.confidence > 0.5 && parent.confidence < 1.0);
        // identical halves, merged features cover both
        assert_eq!(parent.features.note_count, 16);
        assert_eq!(parent.notes.len(), 16);
    }

    // Rejected pairs still reach a root through forced grouping
    #[test]
    fn stalled_level_forces_grouped_parents() {
        let leaves = vec![melodic_leaf(0, 1), zigzag_leaf(1, 5)];
        let config = RuleConfig {
            enabled: RuleToggles {
                cadence_detection: false,
                phrase_structure: false,
                tonal_analysis: false,
                development_relation: true,
                proportion_check: false,
            },
            ..Default::default()
        };
        let root = build_tree(leaves, &[], &config).unwrap();
        assert_eq!(root.children.len(), 1);
        let grouped = &root.children[0];
        assert_eq!(grouped.relation, Some(RelationType::Grouped));
        assert_eq!(grouped.confidence, 0.5);
        assert_eq!(grouped.children.len(), 2);
        check_invariants(&root);
    }

    #[test]
    fn single_leaf_is_wrapped_by_the_root() {
        let root = build_tree(vec![melodic_leaf(0, 1)], &[], &RuleConfig::default()).unwrap();
        assert_eq!(root.level, Level::Root);
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].is_leaf());
    }

    #[test]
    fn zero_leaves_is_an_error() {
        assert!(matches!(
            build_tree(vec![], &[], &RuleConfig::default()),
            Err(TreeError::NoLeaves)
        ));
    }

    #[test]
    fn odd_leaf_counts_still_terminate_with_all_leaves_kept() {
        let leaves: Vec<_> = (0..3).map(|i| melodic_leaf(i, i as u32 * 4 + 1)).collect();
        let root = build_tree(leaves, &[], &RuleConfig::default()).unwrap();
        let mut ids: Vec<_> = root.leaves().iter().map(|l| l.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["seg_0", "seg_1", "seg_2"]);
        check_invariants(&root);
    }

    #[test]
    fn wide_spans_relabel_upward() {
        // two 16-bar nodes merging toward "phrase" still come out themes
        // or wider by span
        let a = Segment::leaf(
            "seg_0".into(),
            1,
            16,
            0.0,
            32.0,
            vec![],
            vec![],
            features::Features::default(),
        );
        let mut next_id = 0;
        let b = Segment {
            id: "seg_1".into(),
            start_bar: 17,
            end_bar: 32,
            ..a.clone()
        };
        let parent = make_parent(a, b, 0.7, RelationType::Development, Level::Phrase, &mut next_id);
        assert_eq!(parent.level, Level::Section);
        assert_eq!(parent.bar_count(), 32);
    }

    #[test]
    fn validated_proposals_match_by_id_or_span() {
        let a = melodic_leaf(0, 1);
        let b = melodic_leaf(1, 5);
        let verdict = pair_verdict(&a, &b, &[], &RuleConfig::default());
        let vp = ValidatedProposal {
            proposal: MergeProposal {
                a_id: a.id.clone(),
                b_id: b.id.clone(),
                a_index: 0,
                b_index: 1,
                a_start_bar: 1,
                a_end_bar: 4,
                b_start_bar: 5,
                b_end_bar: 8,
                similarity: 0.9,
                kind: ProposalKind::Adjacent,
                priority: 0,
            },
            verdict,
        };
        assert!(vp.matches(&a, &b));
        let mut renamed = a.clone();
        renamed.id = "other".into();
        // spans still line up
        assert!(vp.matches(&renamed, &b));
        let mut shifted = b.clone();
        shifted.id = "other_b".into();
        shifted.start_bar = 9;
        assert!(!vp.matches(&renamed, &shifted));
    }
}
