//! REST API endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/projects` | Every project with its pipeline state |
//! | `GET` | `/api/projects/{key}/status` | Pipeline status of one project |
//! | `GET` | `/api/projects/{key}/world` | Current memory snapshot |
//! | `GET` | `/api/projects/{key}/decision` | Last tribunal decision |
//! | `GET` | `/api/projects/{key}/scenes` | Most recent scenes |
//! | `GET` | `/api/projects/{key}/export` | Whole project as JSON |
//! | `POST` | `/api/projects/{key}/cancel` | Cancel the scene in flight |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};
use taleforge_pipeline::ControlHandle;
use taleforge_types::{PipelineState, ProjectKey};
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

/// Scenes returned by `GET /api/projects/{key}/scenes` when no limit is given.
const DEFAULT_SCENE_LIMIT: usize = 20;

/// Query parameters for `GET /api/projects/{key}/scenes`.
#[derive(Debug, serde::Deserialize)]
pub struct ScenesQuery {
    /// Maximum number of scenes to return, newest last (default 20).
    pub limit: Option<usize>,
}

/// One row of `GET /api/projects`.
#[derive(Debug, serde::Serialize)]
struct ProjectSummary {
    key: String,
    title: String,
    head_sequence: u64,
    total_words: u64,
    state: PipelineState,
}

/// Pipeline state of `key`, `Idle` when no scene has run yet.
///
/// Reads never register a control handle.
async fn pipeline_state(state: &AppState, key: &ProjectKey) -> PipelineState {
    match state.controls.get(key).await {
        Some(handle) => handle.state().await,
        None => PipelineState::Idle,
    }
}

/// Escape text for an HTML body or attribute.
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page listing projects and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    let mut rows = String::new();
    for key in state.store.project_keys().await? {
        let snapshot = state.store.read_snapshot(&key).await?;
        let pipeline = pipeline_state(&state, &key).await;
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{pipeline}</td></tr>\n",
            escape_html(key.as_str()),
            escape_html(&snapshot.title),
            snapshot.head_sequence
        ));
    }
    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Taleforge Observer</title></head>
<body>
<h1>Taleforge Observer</h1>
<table>
<tr><th>Project</th><th>Title</th><th>Scenes</th><th>State</th></tr>
{rows}
</table>
<p><a href="/api/projects">/api/projects</a></p>
</body>
</html>"#
    )))
}

// ---------------------------------------------------------------------------
// GET /api/projects
// ---------------------------------------------------------------------------

/// List every project with its current pipeline state.
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let keys = state.store.project_keys().await?;
    let mut projects = Vec::with_capacity(keys.len());
    for key in keys {
        let snapshot = state.store.read_snapshot(&key).await?;
        let pipeline = pipeline_state(&state, &key).await;
        projects.push(ProjectSummary {
            key: key.as_str().to_owned(),
            title: snapshot.title.clone(),
            head_sequence: snapshot.head_sequence,
            total_words: snapshot.total_words,
            state: pipeline,
        });
    }
    Ok(Json(serde_json::json!({
        "count": projects.len(),
        "projects": projects,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/projects/{key}/...
// ---------------------------------------------------------------------------

/// Current pipeline status of one project.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let key = state.project(&raw).await?;
    let status = match state.controls.get(&key).await {
        Some(handle) => handle.status().await,
        None => ControlHandle::new(key).status().await,
    };
    Ok(Json(status))
}

/// Current memory snapshot: world state, character bible, arc ledger.
pub async fn get_world(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let key = state.project(&raw).await?;
    let snapshot = state.store.read_snapshot(&key).await?;
    Ok(Json(serde_json::to_value(snapshot.as_ref())?))
}

/// The most recent tribunal decision.
///
/// Prefers the live pipeline's last decision (which may be a rejection);
/// falls back to the decision of the last committed scene.
pub async fn get_decision(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let key = state.project(&raw).await?;
    let live = match state.controls.get(&key).await {
        Some(handle) => handle.last_decision().await,
        None => None,
    };
    let decision = match live {
        Some(decision) => decision,
        None => state
            .store
            .recent_scenes(&key, 1)
            .await?
            .first()
            .map(|record| record.decision.clone())
            .ok_or_else(|| ObserverError::NotFound(format!("no decision yet for {key}")))?,
    };
    Ok(Json(decision))
}

/// The most recent committed scenes, oldest first.
pub async fn list_scenes(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Query(query): Query<ScenesQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let key = state.project(&raw).await?;
    let limit = query.limit.unwrap_or(DEFAULT_SCENE_LIMIT);
    let scenes = state.store.recent_scenes(&key, limit).await?;
    let scenes: Vec<&taleforge_types::SceneRecord> = scenes.iter().map(AsRef::as_ref).collect();
    Ok(Json(serde_json::json!({
        "count": scenes.len(),
        "scenes": serde_json::to_value(scenes)?,
    })))
}

/// The whole project as one JSON document.
pub async fn export_project(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let key = state.project(&raw).await?;
    Ok(Json(state.store.export_project(&key).await?))
}

// ---------------------------------------------------------------------------
// POST /api/projects/{key}/cancel
// ---------------------------------------------------------------------------

/// Cancel the scene in flight, or the next one if the project is idle.
///
/// Answers `409 Conflict` while the scene is committing.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let key = state.project(&raw).await?;
    let handle = state.controls.handle(&key).await;
    handle.cancel().await?;
    info!(project = %key, "cancel requested via observer API");
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("cancel requested for {key}"),
    })))
}
