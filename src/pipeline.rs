use crate::config::{AnalysisConfig, ConfigError};
use crate::embedding::{EMBEDDING_DIM, embed, similarity_matrix};
use crate::proposals;
use crate::rules::{self, Decision};
use crate::score::{Score, ScoreError};
use crate::segment::Segment;
use crate::segmentation;
use crate::tree::{self, TreeError, ValidatedProposal};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("invalid score: {0}")]
    Score(#[from] ScoreError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("hierarchy construction failed: {0}")]
    Tree(#[from] TreeError),
    #[error("worker pool setup failed: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),
}

/// Full analysis output: the structural hierarchy plus run statistics.
#[derive(Debug, Serialize)]
pub struct Analysis {
    pub root: Segment,
    pub leaf_count: usize,
    pub proposal_count: usize,
    pub accepted: usize,
    pub downgraded: usize,
    pub rejected: usize,
}

/// Run the full analysis with no progress reporting.
pub fn analyze(score: &Score, config: &AnalysisConfig) -> Result<Analysis, AnalyzeError> {
    analyze_with_progress(score, config, |_, _| {})
}

/// Run the full analysis, reporting each completed stage through the
/// callback as (stage name, fraction in [0, 1]).
pub fn analyze_with_progress<F>(
    score: &Score,
    config: &AnalysisConfig,
    progress: F,
) -> Result<Analysis, AnalyzeError>
where
    F: Fn(&str, f32) + Sync,
{
    config.rules.validate()?;
    score.validate()?;
    progress("validate", 0.05);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.resolve_workers())
        .build()?;
    pool.install(|| run_stages(score, config, &progress))
}

fn run_stages<F>(
    score: &Score,
    config: &AnalysisConfig,
    progress: &F,
) -> Result<Analysis, AnalyzeError>
where
    F: Fn(&str, f32),
{
    let leaves = segmentation::segment_score(score);
    log::info!(
        "segmented {} measures into {} leaves",
        score.measures.len(),
        leaves.len()
    );
    progress("segment", 0.2);

    let embeddings = leaf_embeddings(&leaves, config);
    progress("embed", 0.4);

    let matrix = similarity_matrix(&embeddings);
    progress("similarity", 0.55);

    let candidates = proposals::generate_proposals(&leaves, &matrix);
    log::info!("generated {} merge proposals", candidates.len());
    progress("propose", 0.65);

    let validated: Vec<ValidatedProposal> = candidates
        .into_par_iter()
        .map(|p| {
            let verdict =
                rules::validate_proposal(&leaves[p.a_index], &leaves[p.b_index], &p, &config.rules);
            ValidatedProposal {
                proposal: p,
                verdict,
            }
        })
        .collect();
    let count_of = |d: Decision| validated.iter().filter(|v| v.verdict.decision == d).count();
    let accepted = count_of(Decision::Accept);
    let downgraded = count_of(Decision::Downgrade);
    let rejected = count_of(Decision::Reject);
    log::info!(
        "validated proposals: {accepted} accepted, {downgraded} downgraded, {rejected} rejected"
    );
    progress("rules", 0.85);

    let leaf_count = leaves.len();
    let proposal_count = validated.len();
    let root = tree::build_tree(leaves, &validated, &config.rules)?;
    log::info!(
        "built hierarchy over bars {}..={} ({} leaves)",
        root.start_bar,
        root.end_bar,
        leaf_count
    );
    progress("tree", 1.0);

    Ok(Analysis {
        root,
        leaf_count,
        proposal_count,
        accepted,
        downgraded,
        rejected,
    })
}

/// Embedding vectors for the leaf list. External embeddings are used only
/// when they cover every leaf with one consistent width; anything partial
/// or ragged falls back to the internal scheme for the whole run, so the
/// similarity matrix never mixes spaces.
fn leaf_embeddings(leaves: &[Segment], config: &AnalysisConfig) -> Vec<Vec<f64>> {
    if let Some(map) = &config.external_embeddings {
        let found: Option<Vec<&Vec<f64>>> = leaves.iter().map(|l| map.get(&l.id)).collect();
        match found {
            Some(vectors)
                if !vectors.is_empty()
                    && !vectors[0].is_empty()
                    && vectors.iter().all(|v| v.len() == vectors[0].len()) =>
            {
                log::info!("using external embeddings ({} dims)", vectors[0].len());
                return vectors.into_iter().cloned().collect();
            }
            _ => log::warn!(
                "external embeddings incomplete or ragged, using internal {EMBEDDING_DIM}-dim scheme"
            ),
        }
    }
    leaves.par_iter().map(|l| embed(&l.features).to_vec()).collect()
}
