use crate::rules::RuleKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no enabled rule has positive weight")]
    ZeroEnabledWeight,
    #[error("merge threshold must be in (0, 1], got {0}")]
    BadMergeThreshold(f64),
    #[error("rule weight for {rule} must be non-negative, got {weight}")]
    NegativeWeight { rule: &'static str, weight: f64 },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-rule composite weights. Defaults favor cadence evidence, the
/// strongest boundary signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleWeights {
    pub cadence_detection: f64,
    pub phrase_structure: f64,
    pub tonal_analysis: f64,
    pub development_relation: f64,
    pub proportion_check: f64,
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            cadence_detection: 0.30,
            phrase_structure: 0.25,
            tonal_analysis: 0.20,
            development_relation: 0.15,
            proportion_check: 0.10,
        }
    }
}

/// Engine decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Composite score at or above which a merge is accepted. Downgrade
    /// kicks in at 0.85x this value.
    pub merge: f64,
    /// Bar gap beyond which a pair stops being adjacent for the proportion
    /// rule.
    pub max_gap_bars: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            merge: 0.55,
            max_gap_bars: 3,
        }
    }
}

/// Per-rule enable switches. All on by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleToggles {
    pub cadence_detection: bool,
    pub phrase_structure: bool,
    pub tonal_analysis: bool,
    pub development_relation: bool,
    pub proportion_check: bool,
}

impl Default for RuleToggles {
    fn default() -> Self {
        Self {
            cadence_detection: true,
            phrase_structure: true,
            tonal_analysis: true,
            development_relation: true,
            proportion_check: true,
        }
    }
}

/// Caller-supplied rule engine configuration. All fields default, so a
/// TOML config file may set only what it cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub weights: RuleWeights,
    pub thresholds: Thresholds,
    pub enabled: RuleToggles,
}

impl RuleConfig {
    /// Parse from TOML text. Unknown or missing fields fall back to
    /// defaults; validation still applies.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RuleConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.thresholds.merge > 0.0 && self.thresholds.merge <= 1.0) {
            return Err(ConfigError::BadMergeThreshold(self.thresholds.merge));
        }
        for kind in RuleKind::ALL {
            let weight = self.weight(kind);
            if weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    rule: kind.as_str(),
                    weight,
                });
            }
        }
        if self.enabled_weight_total() <= 0.0 {
            return Err(ConfigError::ZeroEnabledWeight);
        }
        Ok(())
    }

    pub fn weight(&self, kind: RuleKind) -> f64 {
        match kind {
            RuleKind::CadenceDetection => self.weights.cadence_detection,
            RuleKind::PhraseStructure => self.weights.phrase_structure,
            RuleKind::TonalAnalysis => self.weights.tonal_analysis,
            RuleKind::DevelopmentRelation => self.weights.development_relation,
            RuleKind::ProportionCheck => self.weights.proportion_check,
        }
    }

    pub fn is_enabled(&self, kind: RuleKind) -> bool {
        match kind {
            RuleKind::CadenceDetection => self.enabled.cadence_detection,
            RuleKind::PhraseStructure => self.enabled.phrase_structure,
            RuleKind::TonalAnalysis => self.enabled.tonal_analysis,
            RuleKind::DevelopmentRelation => self.enabled.development_relation,
            RuleKind::ProportionCheck => self.enabled.proportion_check,
        }
    }

    /// Total weight across enabled rules; the composite renormalizes by
    /// this.
    pub fn enabled_weight_total(&self) -> f64 {
        RuleKind::ALL
            .iter()
            .filter(|&&k| self.is_enabled(k))
            .map(|&k| self.weight(k))
            .sum()
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub rules: RuleConfig,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Externally computed embeddings keyed by segment id. When a segment
    /// has one, it overrides the internal 24-dim scheme.
    pub external_embeddings: Option<HashMap<String, Vec<f64>>>,
}

impl AnalysisConfig {
    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }
}
