//! Pipeline configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no
//! file at all) yields a working pipeline: three drafts on the
//! `[0.7, 0.9, 1.1]` temperature ladder, accept at 85, revise at 70,
//! three attempts per scene.
//!
//! ```yaml
//! drafts:
//!   count: 4
//!   temperatures: [0.6, 0.8, 1.0]
//! tribunal:
//!   accept_threshold: 88
//!   weights: { prose: 2, redundancy: 1, arc: 2 }
//! orchestration:
//!   max_attempts: 5
//! ```

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use taleforge_types::Rubric;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Draft fan-out settings.
    #[serde(default)]
    #[validate(nested)]
    pub drafts: DraftConfig,

    /// Critic tribunal and decision policy settings.
    #[serde(default)]
    #[validate(nested)]
    pub tribunal: TribunalConfig,

    /// Attempt budget, context assembly, and call deadlines.
    #[serde(default)]
    #[validate(nested)]
    pub orchestration: OrchestrationConfig,
}

impl PipelineConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Drafts
// =============================================================================

/// Draft generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_drafts"))]
pub struct DraftConfig {
    /// Drafts requested per attempt.
    #[serde(default = "default_draft_count")]
    #[validate(range(min = 1, max = 16))]
    pub count: usize,

    /// Fewest successful drafts an attempt may proceed with.
    #[serde(default = "default_min_drafts")]
    #[validate(range(min = 1))]
    pub min_drafts: usize,

    /// Sampling temperatures, cycled when `count` exceeds their number.
    #[serde(default = "default_temperatures")]
    #[validate(length(min = 1))]
    pub temperatures: Vec<f32>,

    /// Token cap per draft.
    #[serde(default = "default_draft_max_tokens")]
    #[validate(range(min = 64))]
    pub max_tokens: u32,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            count: default_draft_count(),
            min_drafts: default_min_drafts(),
            temperatures: default_temperatures(),
            max_tokens: default_draft_max_tokens(),
        }
    }
}

const fn default_draft_count() -> usize {
    3
}
const fn default_min_drafts() -> usize {
    1
}
fn default_temperatures() -> Vec<f32> {
    vec![0.7, 0.9, 1.1]
}
const fn default_draft_max_tokens() -> u32 {
    2048
}

fn validate_drafts(config: &DraftConfig) -> Result<(), ValidationError> {
    if config.min_drafts > config.count {
        return Err(ValidationError::new("min_drafts_exceeds_count"));
    }
    if config
        .temperatures
        .iter()
        .any(|t| !t.is_finite() || t.is_sign_negative() || *t > 2.0)
    {
        return Err(ValidationError::new("temperature_out_of_range"));
    }
    Ok(())
}

// =============================================================================
// Tribunal
// =============================================================================

/// Relative weight of each rubric in the aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricWeights {
    /// Weight of the prose rubric.
    #[serde(default = "default_weight")]
    pub prose: u32,
    /// Weight of the redundancy rubric.
    #[serde(default = "default_weight")]
    pub redundancy: u32,
    /// Weight of the arc rubric.
    #[serde(default = "default_weight")]
    pub arc: u32,
}

impl Default for RubricWeights {
    fn default() -> Self {
        Self {
            prose: default_weight(),
            redundancy: default_weight(),
            arc: default_weight(),
        }
    }
}

impl RubricWeights {
    /// Weight of one rubric.
    pub fn weight(&self, rubric: Rubric) -> Decimal {
        Decimal::from(match rubric {
            Rubric::Prose => self.prose,
            Rubric::Redundancy => self.redundancy,
            Rubric::Arc => self.arc,
        })
    }
}

const fn default_weight() -> u32 {
    1
}

/// Critic tribunal and decision policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_tribunal"))]
pub struct TribunalConfig {
    /// Aggregate at or above which the winner is committed.
    #[serde(default = "default_accept_threshold")]
    #[validate(range(max = 100))]
    pub accept_threshold: u8,

    /// Aggregate at or above which the winner earns one rewrite.
    #[serde(default = "default_revise_threshold")]
    #[validate(range(max = 100))]
    pub revise_threshold: u8,

    /// Rubric weights.
    #[serde(default)]
    pub weights: RubricWeights,

    /// Aggregates closer than this are tied; the lower producer index wins.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: Decimal,

    /// Sampling temperature for critic calls.
    #[serde(default = "default_critic_temperature")]
    pub critic_temperature: f32,

    /// Token cap for critic calls.
    #[serde(default = "default_critic_max_tokens")]
    #[validate(range(min = 32))]
    pub critic_max_tokens: u32,

    /// Whether the revise band triggers a rewrite at all.
    #[serde(default = "default_true")]
    pub revision_enabled: bool,
}

impl Default for TribunalConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
            revise_threshold: default_revise_threshold(),
            weights: RubricWeights::default(),
            tie_epsilon: default_tie_epsilon(),
            critic_temperature: default_critic_temperature(),
            critic_max_tokens: default_critic_max_tokens(),
            revision_enabled: default_true(),
        }
    }
}

const fn default_accept_threshold() -> u8 {
    85
}
const fn default_revise_threshold() -> u8 {
    70
}
const fn default_tie_epsilon() -> Decimal {
    Decimal::ONE
}
const fn default_critic_temperature() -> f32 {
    0.2
}
const fn default_critic_max_tokens() -> u32 {
    512
}
const fn default_true() -> bool {
    true
}

fn validate_tribunal(config: &TribunalConfig) -> Result<(), ValidationError> {
    if config.revise_threshold > config.accept_threshold {
        return Err(ValidationError::new("revise_threshold_above_accept"));
    }
    let total = u64::from(config.weights.prose)
        .saturating_add(u64::from(config.weights.redundancy))
        .saturating_add(u64::from(config.weights.arc));
    if total == 0 {
        return Err(ValidationError::new("weights_all_zero"));
    }
    if config.tie_epsilon.is_sign_negative() {
        return Err(ValidationError::new("negative_tie_epsilon"));
    }
    Ok(())
}

// =============================================================================
// Orchestration
// =============================================================================

/// Attempt budget, context assembly, and call deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OrchestrationConfig {
    /// Draft-score-decide attempts per scene before giving up.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,

    /// Committed scenes summarised into each scene context.
    #[serde(default = "default_recent_scenes")]
    #[validate(range(max = 20))]
    pub recent_scenes: usize,

    /// Characters of each recent scene's ending quoted in the context.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Per-call deadline in seconds.
    #[serde(default = "default_call_timeout_secs")]
    #[validate(range(min = 1))]
    pub call_timeout_secs: u64,

    /// Token cap for the world-update extraction call.
    #[serde(default = "default_extract_max_tokens")]
    #[validate(range(min = 64))]
    pub extract_max_tokens: u32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            recent_scenes: default_recent_scenes(),
            excerpt_chars: default_excerpt_chars(),
            call_timeout_secs: default_call_timeout_secs(),
            extract_max_tokens: default_extract_max_tokens(),
        }
    }
}

impl OrchestrationConfig {
    /// Per-call deadline.
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

const fn default_max_attempts() -> u32 {
    3
}
const fn default_recent_scenes() -> usize {
    3
}
const fn default_excerpt_chars() -> usize {
    600
}
const fn default_call_timeout_secs() -> u64 {
    180
}
const fn default_extract_max_tokens() -> u32 {
    1024
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = PipelineConfig::parse("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.drafts.count, 3);
        assert_eq!(config.drafts.temperatures, vec![0.7, 0.9, 1.1]);
        assert_eq!(config.tribunal.accept_threshold, 85);
        assert_eq!(config.tribunal.revise_threshold, 70);
        assert_eq!(config.tribunal.tie_epsilon, Decimal::ONE);
        assert_eq!(config.orchestration.max_attempts, 3);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = "drafts:\n  count: 5\ntribunal:\n  weights:\n    prose: 2\n";
        let config = PipelineConfig::parse(yaml).unwrap();
        assert_eq!(config.drafts.count, 5);
        assert_eq!(config.drafts.min_drafts, 1);
        assert_eq!(config.tribunal.weights.weight(Rubric::Prose), Decimal::from(2));
        assert_eq!(config.tribunal.weights.weight(Rubric::Arc), Decimal::ONE);
    }

    #[test]
    fn contradictory_thresholds_rejected() {
        let yaml = "tribunal:\n  accept_threshold: 60\n  revise_threshold: 70\n";
        assert!(matches!(
            PipelineConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn min_drafts_above_count_rejected() {
        let yaml = "drafts:\n  count: 2\n  min_drafts: 3\n";
        assert!(matches!(
            PipelineConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn zero_weights_rejected() {
        let yaml = "tribunal:\n  weights: { prose: 0, redundancy: 0, arc: 0 }\n";
        assert!(PipelineConfig::parse(yaml).is_err());
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        assert!(matches!(
            PipelineConfig::parse("drafts: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
