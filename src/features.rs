use crate::score::Note;
use serde::{Deserialize, Serialize};

/// IOI ratios are capped here to keep a single long rest from dominating
/// the rhythm fingerprint.
const MAX_IOI_RATIO: f64 = 4.0;

/// Cadence archetypes recognized by the cadence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceType {
    Perfect,
    Imperfect,
    Half,
    Deceptive,
    Plagal,
}

impl CadenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perfect => "perfect",
            Self::Imperfect => "imperfect",
            Self::Half => "half",
            Self::Deceptive => "deceptive",
            Self::Plagal => "plagal",
        }
    }

    /// Archetype strength used as the cadence-rule score when the chord
    /// pattern matches. A perfect authentic cadence is the strongest close.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Perfect => 1.0,
            Self::Imperfect => 0.85,
            Self::Plagal => 0.75,
            Self::Deceptive => 0.7,
            Self::Half => 0.6,
        }
    }
}

/// Per-segment numeric descriptors. Every field is always present —
/// degenerate inputs produce zeros/empties, never missing values — so merge
/// and comparison logic needs no presence checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    /// Signed pitch steps between consecutive notes (by onset order).
    pub interval_contour: Vec<i32>,
    /// Inter-onset-interval ratios, capped at 4.0. Needs >= 3 notes.
    pub rhythm_fingerprint: Vec<f64>,
    /// Duration-weighted pitch-class distribution; sums to 1 when any
    /// duration is present, all zeros otherwise.
    pub pitch_class_histogram: [f64; 12],
    pub note_count: usize,
    pub duration: f64,
    pub average_pitch: f64,
    pub pitch_range: f64,
    pub average_velocity: f64,
    pub average_duration: f64,
    pub pitch_variance: f64,
    pub rhythm_variance: f64,
    pub has_cadence: bool,
    pub cadence_type: Option<CadenceType>,
}

/// Extract all descriptors from a note list. Pure and deterministic: the
/// same notes always yield bit-identical features.
pub fn extract(notes: &[Note]) -> Features {
    if notes.is_empty() {
        return Features::default();
    }

    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let interval_contour: Vec<i32> = sorted
        .windows(2)
        .map(|w| w[1].pitch as i32 - w[0].pitch as i32)
        .collect();

    // IOIs between consecutive onsets; zero-length gaps (grace notes,
    // chord tones) carry no rhythm information and are skipped.
    let iois: Vec<f64> = sorted
        .windows(2)
        .map(|w| w[1].start_time - w[0].start_time)
        .filter(|ioi| *ioi > 0.0)
        .collect();

    let rhythm_fingerprint: Vec<f64> = if sorted.len() >= 3 {
        iois.windows(2)
            .map(|w| (w[1] / w[0]).min(MAX_IOI_RATIO))
            .collect()
    } else {
        Vec::new()
    };

    let mut pitch_class_histogram = [0.0_f64; 12];
    let mut total_duration = 0.0;
    for note in &sorted {
        let d = note.duration();
        pitch_class_histogram[note.pitch_class() as usize] += d;
        total_duration += d;
    }
    if total_duration > 0.0 {
        for bin in &mut pitch_class_histogram {
            *bin /= total_duration;
        }
    }

    let pitches: Vec<f64> = sorted.iter().map(|n| n.pitch as f64).collect();
    let (average_pitch, pitch_variance) = mean_variance(&pitches);
    let pitch_range = pitches.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        - pitches.iter().cloned().fold(f64::INFINITY, f64::min);

    let velocities: Vec<f64> = sorted.iter().map(|n| n.velocity as f64).collect();
    let (average_velocity, _) = mean_variance(&velocities);

    let durations: Vec<f64> = sorted.iter().map(|n| n.duration()).collect();
    let (average_duration, _) = mean_variance(&durations);

    let (_, rhythm_variance) = mean_variance(&iois);

    let has_cadence = closing_gesture(&sorted, average_duration, &interval_contour);

    Features {
        interval_contour,
        rhythm_fingerprint,
        pitch_class_histogram,
        note_count: sorted.len(),
        duration: total_duration,
        average_pitch,
        pitch_range,
        average_velocity,
        average_duration,
        pitch_variance,
        rhythm_variance,
        has_cadence,
        cadence_type: None,
    }
}

/// Simple closure indicators at extraction time: a lengthened final note or
/// a stepwise descending tail. Chord-based archetypes are the cadence
/// rule's job — it sees harmonic context this function does not.
fn closing_gesture(sorted: &[&Note], average_duration: f64, contour: &[i32]) -> bool {
    let lengthened = match sorted.last() {
        Some(last) if average_duration > 0.0 => last.duration() > 1.5 * average_duration,
        _ => false,
    };
    let descending_tail = matches!(contour.last(), Some(&step) if (-2..0).contains(&step));
    lengthened || descending_tail
}

/// Combine two children's features into the parent's record. Counts and
/// durations sum, the histogram averages per-bin, contours concatenate in
/// chronological order, and the cadence flag comes from the later child —
/// a phrase closes the way its final member closes.
pub fn merge(a: &Features, b: &Features) -> Features {
    let mut interval_contour = a.interval_contour.clone();
    interval_contour.extend_from_slice(&b.interval_contour);
    let mut rhythm_fingerprint = a.rhythm_fingerprint.clone();
    rhythm_fingerprint.extend_from_slice(&b.rhythm_fingerprint);

    let mut pitch_class_histogram = [0.0_f64; 12];
    for (i, bin) in pitch_class_histogram.iter_mut().enumerate() {
        *bin = (a.pitch_class_histogram[i] + b.pitch_class_histogram[i]) / 2.0;
    }

    Features {
        interval_contour,
        rhythm_fingerprint,
        pitch_class_histogram,
        note_count: a.note_count + b.note_count,
        duration: a.duration + b.duration,
        average_pitch: (a.average_pitch + b.average_pitch) / 2.0,
        pitch_range: a.pitch_range.max(b.pitch_range),
        average_velocity: (a.average_velocity + b.average_velocity) / 2.0,
        average_duration: (a.average_duration + b.average_duration) / 2.0,
        pitch_variance: (a.pitch_variance + b.pitch_variance) / 2.0,
        rhythm_variance: (a.rhythm_variance + b.rhythm_variance) / 2.0,
        has_cadence: b.has_cadence,
        cadence_type: b.cadence_type,
    }
}

/// Similarity of two interval contours in [0, 1]. The shorter contour is
/// resampled to the longer length, then Pearson correlation is mapped from
/// [-1, 1] to [0, 1]. Empty or zero-variance input scores 0.
pub fn contour_similarity(c1: &[i32], c2: &[i32]) -> f64 {
    let a: Vec<f64> = c1.iter().map(|&v| v as f64).collect();
    let b: Vec<f64> = c2.iter().map(|&v| v as f64).collect();
    resample_correlation(&a, &b)
}

/// Resample-then-correlate similarity in [0, 1] for any pair of numeric
/// sequences. Returns 0 when either input is empty or has no variance —
/// a neutral value, never an error.
pub fn resample_correlation(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let resampled = resample_linear(short, long.len());
    match pearson(&resampled, long) {
        Some(r) => (r + 1.0) / 2.0,
        None => 0.0,
    }
}

/// Linear-interpolation resample of `values` to `target_len` points.
fn resample_linear(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() == target_len {
        return values.to_vec();
    }
    if values.len() == 1 {
        return vec![values[0]; target_len];
    }
    let scale = (values.len() - 1) as f64 / (target_len - 1).max(1) as f64;
    (0..target_len)
        .map(|i| {
            let pos = i as f64 * scale;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(values.len() - 1);
            let frac = pos - lo as f64;
            values[lo] * (1.0 - frac) + values[hi] * frac
        })
        .collect()
}

/// Pearson correlation of two equal-length series. None when either side
/// has no variance.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_a = a[..n].iter().sum::<f64>() / n_f;
    let mean_b = b[..n].iter().sum::<f64>() / n_f;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-10 {
        return None;
    }
    Some(cov / denom)
}

/// Arithmetic mean and population variance. (0, 0) for empty input.
fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}
