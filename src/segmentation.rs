use crate::MIN_SEGMENT_BARS;
use crate::features;
use crate::score::{Measure, Score};
use crate::segment::Segment;
use rayon::prelude::*;

/// A final note lasting this much longer than the measure average reads as
/// a cadential lengthening.
const CADENCE_LENGTHEN_FACTOR: f64 = 1.5;
/// Trailing silence longer than this fraction of the mean note duration
/// reads as a phrase breath.
const TRAILING_SILENCE_FACTOR: f64 = 0.5;
/// A last note filling more than this share of the measure is rhythmic
/// closure.
const RHYTHMIC_CLOSURE_SHARE: f64 = 0.8;
/// Note-density jump (in notes) that makes a 4-bar boundary credible.
const WEAK_BOUNDARY_DENSITY_DELTA: i64 = 3;

/// Partition the score into leaf segments. Boundary indicators are tested
/// per measure in priority order (cadence, rhythmic closure, weak 4-bar
/// boundary), filtered to keep segments at least MIN_SEGMENT_BARS wide.
/// A score with no indicators at all falls back to fixed-size chunking.
pub fn segment_score(score: &Score) -> Vec<Segment> {
    let measures = &score.measures;
    let boundaries = find_boundaries(measures);

    let ranges: Vec<(usize, usize)> = if boundaries.is_empty() {
        let chunk = fallback_chunk_bars(measures.len());
        log::info!(
            "no structural boundaries found in {} measures, falling back to {}-bar chunks",
            measures.len(),
            chunk
        );
        chunk_ranges(measures.len(), chunk)
    } else {
        log::debug!("kept {} boundaries: {:?}", boundaries.len(), boundaries);
        boundary_ranges(measures.len(), &boundaries)
    };

    ranges
        .into_par_iter()
        .enumerate()
        .map(|(n, (start, end))| build_leaf(n, &measures[start..=end]))
        .collect()
}

/// Candidate boundaries (measure indices where a segment ends), filtered so
/// consecutive kept boundaries are at least MIN_SEGMENT_BARS apart.
fn find_boundaries(measures: &[Measure]) -> Vec<usize> {
    let mut kept = Vec::new();
    let mut prev: i64 = -1;
    for (i, m) in measures.iter().enumerate() {
        let next = measures.get(i + 1);
        if !is_boundary(i, m, next) {
            continue;
        }
        if i as i64 - prev >= MIN_SEGMENT_BARS as i64 {
            kept.push(i);
            prev = i as i64;
        }
    }
    kept
}

fn is_boundary(index: usize, measure: &Measure, next: Option<&Measure>) -> bool {
    cadence_indicator(measure)
        || rhythmic_closure(measure)
        || weak_boundary(index, measure, next)
}

/// Cadence indicator: lengthened final note, a trailing breath, or a
/// descending whole-step tail.
fn cadence_indicator(measure: &Measure) -> bool {
    let Some(last) = measure.last_note() else {
        return false;
    };
    let mean = measure.mean_note_duration();
    if mean <= 0.0 {
        return false;
    }
    if last.duration() > CADENCE_LENGTHEN_FACTOR * mean {
        return true;
    }
    let trailing_silence = measure.end_time - last.end_time;
    if trailing_silence > TRAILING_SILENCE_FACTOR * mean {
        return true;
    }
    descending_step_tail(measure)
}

/// Two-note tail moving down by a whole step (interval in [-2, -1)).
fn descending_step_tail(measure: &Measure) -> bool {
    let mut notes: Vec<_> = measure.notes.iter().collect();
    if notes.len() < 2 {
        return false;
    }
    notes.sort_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let tail = notes[notes.len() - 1].pitch as f64 - notes[notes.len() - 2].pitch as f64;
    (-2.0..-1.0).contains(&tail)
}

/// Rhythmic closure: the last note occupies most of the measure.
fn rhythmic_closure(measure: &Measure) -> bool {
    let Some(last) = measure.last_note() else {
        return false;
    };
    let span = measure.span();
    span > 0.0 && last.duration() / span > RHYTHMIC_CLOSURE_SHARE
}

/// Weak boundary: a 4-bar grid position with a clear note-density change
/// into the following measure.
fn weak_boundary(index: usize, measure: &Measure, next: Option<&Measure>) -> bool {
    if (index + 1) % 4 != 0 {
        return false;
    }
    let Some(next) = next else {
        return false;
    };
    let delta = measure.notes.len() as i64 - next.notes.len() as i64;
    delta.abs() > WEAK_BOUNDARY_DENSITY_DELTA
}

/// Fixed-size fallback when no boundary indicator fires anywhere.
fn fallback_chunk_bars(total_measures: usize) -> usize {
    if total_measures <= 8 {
        2
    } else if total_measures <= 32 {
        4
    } else {
        8
    }
}

fn chunk_ranges(total: usize, chunk: usize) -> Vec<(usize, usize)> {
    (0..total)
        .step_by(chunk)
        .map(|start| (start, (start + chunk - 1).min(total - 1)))
        .collect()
}

/// Inclusive measure-index ranges between consecutive kept boundaries,
/// plus the trailing remainder.
fn boundary_ranges(total: usize, boundaries: &[usize]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0;
    for &b in boundaries {
        ranges.push((start, b));
        start = b + 1;
    }
    if start < total {
        ranges.push((start, total - 1));
    }
    ranges
}

/// Aggregate a measure range into one leaf segment with features extracted
/// at creation.
fn build_leaf(n: usize, measures: &[Measure]) -> Segment {
    let notes: Vec<_> = measures.iter().flat_map(|m| m.notes.clone()).collect();
    let chords: Vec<_> = measures.iter().flat_map(|m| m.chords.clone()).collect();
    let features = features::extract(&notes);
    Segment::leaf(
        format!("seg_{n}"),
        measures[0].number,
        measures[measures.len() - 1].number,
        measures[0].start_time,
        measures[measures.len() - 1].end_time,
        notes,
        chords,
        features,
    )
}
