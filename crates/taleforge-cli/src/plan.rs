//! Story plan files.
//!
//! A plan names the project, seeds it, and lists the scenes to produce in
//! order:
//!
//! ```yaml
//! project: lantern-keeper
//! seed:
//!   title: The Lantern Keeper
//!   world:
//!     current_time: Night 1
//!     current_location: the lighthouse
//!     posture: alert
//!   arcs: [The missing keeper]
//! scenes:
//!   - goal: Mara finds the logbook
//!     after_state: Mara knows the keeper left willingly
//! ```

use std::path::Path;

use anyhow::{Context, ensure};
use serde::Deserialize;
use taleforge_types::{ProjectKey, ProjectSeed, SceneRequest};

/// A project seed and its scene list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoryPlan {
    /// Project key.
    pub project: ProjectKey,
    /// Used only when the project does not exist yet.
    pub seed: ProjectSeed,
    /// Scenes in order. Scene `n` of the plan is sequence number `n`.
    pub scenes: Vec<SceneRequest>,
}

impl StoryPlan {
    /// Load a plan from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read story plan {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid story plan {}", path.display()))
    }

    /// Parse a plan from YAML.
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        let plan: Self = serde_yml::from_str(yaml)?;
        ensure!(!plan.seed.title.trim().is_empty(), "seed title is empty");
        ensure!(!plan.scenes.is_empty(), "plan has no scenes");
        if let Some(blank) = plan.scenes.iter().position(|s| s.goal.trim().is_empty()) {
            anyhow::bail!("scene {} has an empty goal", blank.saturating_add(1));
        }
        Ok(plan)
    }

    /// Scenes still to produce once `head_sequence` scenes are committed.
    pub fn remaining(&self, head_sequence: u64) -> impl Iterator<Item = (u64, &SceneRequest)> {
        (1_u64..)
            .zip(&self.scenes)
            .filter(move |(sequence, _)| *sequence > head_sequence)
    }
}
