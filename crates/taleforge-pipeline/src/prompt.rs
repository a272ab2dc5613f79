//! Prompt template loading and rendering via `minijinja`.
//!
//! The crate ships a default template for every prompt the pipeline sends.
//! An operator may point [`PromptEngine::with_overrides`] at a directory;
//! any `<name>.j2` file found there replaces the built-in template of the
//! same name, so wording can be tuned without recompiling.

use std::path::Path;

use minijinja::{Environment, context};
use serde::Serialize;
use taleforge_gateway::Prompt;
use taleforge_types::{CriticVerdict, Rubric};

use crate::context::SceneContext;
use crate::error::PipelineError;
use crate::lint::LintReport;

/// Built-in templates, by name.
const BUILTIN_TEMPLATES: [(&str, &str); 9] = [
    ("draft_system", include_str!("../templates/draft_system.j2")),
    ("draft_user", include_str!("../templates/draft_user.j2")),
    ("critic_prose", include_str!("../templates/critic_prose.j2")),
    (
        "critic_redundancy",
        include_str!("../templates/critic_redundancy.j2"),
    ),
    ("critic_arc", include_str!("../templates/critic_arc.j2")),
    ("critic_user", include_str!("../templates/critic_user.j2")),
    ("revision_user", include_str!("../templates/revision_user.j2")),
    ("extract_system", include_str!("../templates/extract_system.j2")),
    ("extract_user", include_str!("../templates/extract_user.j2")),
];

/// Renders every prompt the pipeline sends.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl core::fmt::Debug for PromptEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PromptEngine").finish_non_exhaustive()
    }
}

/// One critic note as shown to the writer during revision.
#[derive(Debug, Serialize)]
struct FeedbackItem<'a> {
    rubric: &'static str,
    score: u8,
    fix_note: &'a str,
}

impl PromptEngine {
    /// Create an engine with the built-in templates only.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if a built-in template fails to
    /// compile.
    pub fn builtin() -> Result<Self, PipelineError> {
        let mut env = new_environment();
        for (name, source) in BUILTIN_TEMPLATES {
            add_template(&mut env, name, source.to_owned())?;
        }
        Ok(Self { env })
    }

    /// Create an engine where `<dir>/<name>.j2` files replace built-ins.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if an override cannot be read or
    /// any template fails to compile.
    pub fn with_overrides(dir: &Path) -> Result<Self, PipelineError> {
        let mut env = new_environment();
        for (name, builtin) in BUILTIN_TEMPLATES {
            let path = dir.join(format!("{name}.j2"));
            let source = if path.is_file() {
                tracing::debug!(template = name, path = %path.display(), "template override");
                std::fs::read_to_string(&path).map_err(|e| {
                    PipelineError::Template(format!("failed to read {}: {e}", path.display()))
                })?
            } else {
                builtin.to_owned()
            };
            add_template(&mut env, name, source)?;
        }
        Ok(Self { env })
    }

    /// Writer prompt for a fresh draft.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if rendering fails.
    pub fn draft_prompt(&self, scene: &SceneContext) -> Result<Prompt, PipelineError> {
        let ctx = context! { scene };
        Ok(Prompt::new(
            self.render("draft_system", &ctx)?,
            self.render("draft_user", &ctx)?,
        ))
    }

    /// Critic prompt for one draft under one rubric.
    ///
    /// `lint` findings are listed for the critic to weigh. `strict` appends
    /// the reformatting instruction used when the previous answer did not
    /// parse.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if rendering fails.
    pub fn critic_prompt(
        &self,
        rubric: Rubric,
        scene: &SceneContext,
        draft: &str,
        lint: &LintReport,
        strict: bool,
    ) -> Result<Prompt, PipelineError> {
        let ctx = context! {
            scene,
            draft,
            strict,
            rubric => rubric.as_str(),
            lint => &lint.findings,
        };
        let system = match rubric {
            Rubric::Prose => "critic_prose",
            Rubric::Redundancy => "critic_redundancy",
            Rubric::Arc => "critic_arc",
        };
        Ok(Prompt::new(
            self.render(system, &ctx)?,
            self.render("critic_user", &ctx)?,
        ))
    }

    /// Writer prompt for the targeted rewrite of a winning draft.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if rendering fails.
    pub fn revision_prompt(
        &self,
        scene: &SceneContext,
        draft: &str,
        verdicts: &[&CriticVerdict],
        priority: &CriticVerdict,
        irreversible_change: &str,
        lint: &LintReport,
    ) -> Result<Prompt, PipelineError> {
        let feedback: Vec<FeedbackItem<'_>> = verdicts
            .iter()
            .map(|v| FeedbackItem {
                rubric: v.rubric.as_str(),
                score: v.score,
                fix_note: &v.fix_note,
            })
            .collect();
        let priority = FeedbackItem {
            rubric: priority.rubric.as_str(),
            score: priority.score,
            fix_note: &priority.fix_note,
        };
        let ctx = context! {
            scene,
            draft,
            verdicts => feedback,
            priority,
            irreversible_change,
            lint => &lint.findings,
        };
        Ok(Prompt::new(
            self.render("draft_system", &ctx)?,
            self.render("revision_user", &ctx)?,
        ))
    }

    /// Prompt for the world-update extraction after acceptance.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if rendering fails.
    pub fn extract_prompt(
        &self,
        scene: &SceneContext,
        excerpt: &str,
    ) -> Result<Prompt, PipelineError> {
        let ctx = context! { scene, excerpt };
        Ok(Prompt::new(
            self.render("extract_system", &ctx)?,
            self.render("extract_user", &ctx)?,
        ))
    }

    fn render(&self, name: &str, ctx: &minijinja::Value) -> Result<String, PipelineError> {
        self.env
            .get_template(name)
            .map_err(|e| PipelineError::Template(format!("missing {name} template: {e}")))?
            .render(ctx)
            .map(|text| text.trim().to_owned())
            .map_err(|e| PipelineError::Template(format!("{name} render failed: {e}")))
    }
}

fn new_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env
}

fn add_template(
    env: &mut Environment<'static>,
    name: &'static str,
    source: String,
) -> Result<(), PipelineError> {
    env.add_template_owned(name, source)
        .map_err(|e| PipelineError::Template(format!("failed to add {name} template: {e}")))
}
