use crate::features::Features;
use rayon::prelude::*;

/// Fixed embedding width. Downstream visualization assumes this layout;
/// do not reorder or renormalize.
pub const EMBEDDING_DIM: usize = 24;

// Normalization divisors, chosen empirically. Kept verbatim for
// compatibility with consumers of the 24-dim layout.
const PITCH_DIVISOR: f64 = 127.0;
const RANGE_DIVISOR: f64 = 48.0;
const COUNT_DIVISOR: f64 = 50.0;
const DURATION_DIVISOR: f64 = 10.0;
const VELOCITY_DIVISOR: f64 = 127.0;
const AVG_DURATION_DIVISOR: f64 = 2.0;
const PITCH_VARIANCE_DIVISOR: f64 = 100.0;
const RHYTHM_VARIANCE_DIVISOR: f64 = 1.0;
const CONTOUR_STEP_DIVISOR: f64 = 12.0;

/// Map a segment's features to the fixed 24-dim vector:
/// 0-11 pitch-class histogram, 12-19 normalized scalars, 20-23 contour
/// shape summary.
pub fn embed(features: &Features) -> [f64; EMBEDDING_DIM] {
    let mut v = [0.0_f64; EMBEDDING_DIM];
    v[..12].copy_from_slice(&features.pitch_class_histogram);

    v[12] = features.average_pitch / PITCH_DIVISOR;
    v[13] = features.pitch_range / RANGE_DIVISOR;
    v[14] = features.note_count as f64 / COUNT_DIVISOR;
    v[15] = features.duration / DURATION_DIVISOR;
    v[16] = features.average_velocity / VELOCITY_DIVISOR;
    v[17] = features.average_duration / AVG_DURATION_DIVISOR;
    v[18] = features.pitch_variance / PITCH_VARIANCE_DIVISOR;
    v[19] = features.rhythm_variance / RHYTHM_VARIANCE_DIVISOR;

    let contour = &features.interval_contour;
    if !contour.is_empty() {
        let max = contour.iter().max().copied().unwrap_or(0);
        let min = contour.iter().min().copied().unwrap_or(0);
        let len = contour.len() as f64;
        v[20] = max as f64 / CONTOUR_STEP_DIVISOR;
        v[21] = min as f64 / CONTOUR_STEP_DIVISOR;
        v[22] = contour.iter().filter(|&&s| s > 0).count() as f64 / len;
        v[23] = contour.iter().filter(|&&s| s < 0).count() as f64 / len;
    }
    v
}

/// Cosine similarity clamped to [0, 1]. Zero-norm input scores 0 — a
/// neutral value, never an error.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for i in 0..a.len().min(b.len()) {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

/// Full pairwise similarity grid with a fixed 1.0 diagonal. Rows are
/// independent and computed in parallel.
pub fn similarity_matrix(vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = vectors.len();
    (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        1.0
                    } else {
                        cosine_similarity(&vectors[i], &vectors[j])
                    }
                })
                .collect()
        })
        .collect()
}
