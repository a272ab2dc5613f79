//! Driver configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Where the driver reads its inputs and writes its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Story plan YAML (`TALEFORGE_PLAN`, required).
    pub plan: PathBuf,
    /// Pipeline configuration YAML (`TALEFORGE_CONFIG`).
    pub pipeline_config: Option<PathBuf>,
    /// `SQLite` URL for durable story memory (`TALEFORGE_DB`).
    pub database_url: Option<String>,
    /// Directory of prompt template overrides (`TALEFORGE_TEMPLATES_DIR`).
    pub templates_dir: Option<PathBuf>,
    /// Manuscript file (`TALEFORGE_MANUSCRIPT`, default `manuscript.md`).
    pub manuscript: PathBuf,
    /// Directory for per-scene files (`TALEFORGE_SCENES_DIR`).
    pub scenes_dir: Option<PathBuf>,
    /// Where to write the project export when done (`TALEFORGE_EXPORT`).
    pub export: Option<PathBuf>,
    /// Observer API address (`TALEFORGE_OBSERVER_ADDR`).
    pub observer_addr: Option<SocketAddr>,
    /// JSON log output (`TALEFORGE_LOG_JSON=true`).
    pub log_json: bool,
    /// Skip the startup provider check (`TALEFORGE_SKIP_HEALTH_CHECK=true`).
    pub skip_health_check: bool,
}

impl CliConfig {
    /// Load from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &str| var(name).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let plan = var("TALEFORGE_PLAN")
            .map(PathBuf::from)
            .context("TALEFORGE_PLAN must name a story plan file")?;

        let observer_addr = var("TALEFORGE_OBSERVER_ADDR")
            .map(|addr| {
                addr.trim()
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid TALEFORGE_OBSERVER_ADDR {addr}"))
            })
            .transpose()?;

        Ok(Self {
            plan,
            pipeline_config: var("TALEFORGE_CONFIG").map(PathBuf::from),
            database_url: var("TALEFORGE_DB"),
            templates_dir: var("TALEFORGE_TEMPLATES_DIR").map(PathBuf::from),
            manuscript: var("TALEFORGE_MANUSCRIPT")
                .map_or_else(|| PathBuf::from("manuscript.md"), PathBuf::from),
            scenes_dir: var("TALEFORGE_SCENES_DIR").map(PathBuf::from),
            export: var("TALEFORGE_EXPORT").map(PathBuf::from),
            observer_addr,
            log_json: flag("TALEFORGE_LOG_JSON"),
            skip_health_check: flag("TALEFORGE_SKIP_HEALTH_CHECK"),
        })
    }
}
