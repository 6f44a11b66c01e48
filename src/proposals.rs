use crate::segment::Segment;
use serde::Serialize;

/// Non-adjacent pairs need at least this much similarity to be worth a
/// recurrence proposal.
pub const RECURRENCE_SIMILARITY_FLOOR: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Adjacent,
    Recurrence,
}

/// A candidate merge between two segments, awaiting rule validation.
/// Carries spans and indices so later pipeline stages need no segment
/// lookups.
#[derive(Debug, Clone, Serialize)]
pub struct MergeProposal {
    pub a_id: String,
    pub b_id: String,
    pub a_index: usize,
    pub b_index: usize,
    pub a_start_bar: u32,
    pub a_end_bar: u32,
    pub b_start_bar: u32,
    pub b_end_bar: u32,
    pub similarity: f64,
    pub kind: ProposalKind,
    /// Rank within kind by descending similarity; adjacent proposals rank
    /// ahead of recurrence ones.
    pub priority: i32,
}

impl MergeProposal {
    fn new(a: &Segment, b: &Segment, a_index: usize, b_index: usize, similarity: f64, kind: ProposalKind) -> Self {
        Self {
            a_id: a.id.clone(),
            b_id: b.id.clone(),
            a_index,
            b_index,
            a_start_bar: a.start_bar,
            a_end_bar: a.end_bar,
            b_start_bar: b.start_bar,
            b_end_bar: b.end_bar,
            similarity,
            kind,
            priority: 0,
        }
    }

    /// Bar gap from the end of the first span to the start of the second;
    /// 1 for adjacent segments.
    pub fn gap_bars(&self) -> i64 {
        self.b_start_bar as i64 - self.a_end_bar as i64
    }

    /// The bar range a committed merge would cover.
    pub fn merged_range(&self) -> (u32, u32) {
        (
            self.a_start_bar.min(self.b_start_bar),
            self.a_end_bar.max(self.b_end_bar),
        )
    }
}

/// Generate merge candidates from the leaf list and its similarity matrix:
/// one adjacent proposal per consecutive pair, plus recurrence proposals
/// for highly similar non-adjacent pairs.
pub fn generate_proposals(leaves: &[Segment], matrix: &[Vec<f64>]) -> Vec<MergeProposal> {
    let mut adjacent = Vec::new();
    let mut recurrence = Vec::new();

    for i in 0..leaves.len() {
        for j in (i + 1)..leaves.len() {
            let similarity = matrix[i][j];
            if j == i + 1 {
                adjacent.push(MergeProposal::new(
                    &leaves[i],
                    &leaves[j],
                    i,
                    j,
                    similarity,
                    ProposalKind::Adjacent,
                ));
            } else if similarity > RECURRENCE_SIMILARITY_FLOOR {
                recurrence.push(MergeProposal::new(
                    &leaves[i],
                    &leaves[j],
                    i,
                    j,
                    similarity,
                    ProposalKind::Recurrence,
                ));
            }
        }
    }

    assign_priorities(&mut adjacent, 0);
    let offset = adjacent.len() as i32;
    assign_priorities(&mut recurrence, offset);

    adjacent.extend(recurrence);
    adjacent
}

/// Priority = similarity rank within the kind, offset so adjacent proposals
/// always outrank recurrence ones. The vectors themselves keep positional
/// order for deterministic downstream scans.
fn assign_priorities(proposals: &mut [MergeProposal], offset: i32) {
    let mut order: Vec<usize> = (0..proposals.len()).collect();
    order.sort_by(|&x, &y| {
        proposals[y]
            .similarity
            .partial_cmp(&proposals[x].similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (rank, idx) in order.into_iter().enumerate() {
        proposals[idx].priority = offset + rank as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;

    fn leaf(n: usize, start_bar: u32, end_bar: u32) -> Segment {
        Segment::leaf(
            format!("seg_{n}"),
            start_bar,
            end_bar,
            start_bar as f64,
            end_bar as f64 + 1.0,
            vec![],
            vec![],
            Features::default(),
        )
    }

    fn uniform_matrix(n: usize, off_diag: f64) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { off_diag }).collect())
            .collect()
    }

    #[test]
    fn every_consecutive_pair_gets_an_adjacent_proposal() {
        let leaves: Vec<_> = (0..4).map(|i| leaf(i, i as u32 * 4 + 1, i as u32 * 4 + 4)).collect();
        let proposals = generate_proposals(&leaves, &uniform_matrix(4, 0.5));
        let adjacent: Vec<_> = proposals
            .iter()
            .filter(|p| p.kind == ProposalKind::Adjacent)
            .collect();
        assert_eq!(adjacent.len(), 3);
        assert!(adjacent.iter().all(|p| p.gap_bars() == 1));
    }

    #[test]
    fn low_similarity_non_adjacent_pairs_are_skipped() {
        let leaves: Vec<_> = (0..4).map(|i| leaf(i, i as u32 * 4 + 1, i as u32 * 4 + 4)).collect();
        let proposals = generate_proposals(&leaves, &uniform_matrix(4, 0.5));
        assert!(proposals.iter().all(|p| p.kind == ProposalKind::Adjacent));
    }

    #[test]
    fn similar_distant_pairs_become_recurrence_proposals() {
        let leaves: Vec<_> = (0..3).map(|i| leaf(i, i as u32 * 4 + 1, i as u32 * 4 + 4)).collect();
        let proposals = generate_proposals(&leaves, &uniform_matrix(3, 0.9));
        let recurrence: Vec<_> = proposals
            .iter()
            .filter(|p| p.kind == ProposalKind::Recurrence)
            .collect();
        assert_eq!(recurrence.len(), 1);
        assert_eq!(recurrence[0].a_id, "seg_0");
        assert_eq!(recurrence[0].b_id, "seg_2");
        assert!(recurrence[0].gap_bars() > 1);
    }

    #[test]
    fn adjacent_proposals_outrank_recurrence() {
        let leaves: Vec<_> = (0..3).map(|i| leaf(i, i as u32 * 4 + 1, i as u32 * 4 + 4)).collect();
        let proposals = generate_proposals(&leaves, &uniform_matrix(3, 0.9));
        let max_adjacent = proposals
            .iter()
            .filter(|p| p.kind == ProposalKind::Adjacent)
            .map(|p| p.priority)
            .max()
            .unwrap();
        let min_recurrence = proposals
            .iter()
            .filter(|p| p.kind == ProposalKind::Recurrence)
            .map(|p| p.priority)
            .min()
            .unwrap();
        assert!(max_adjacent < min_recurrence);
    }
}
