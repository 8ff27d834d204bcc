//! Route handlers for the spec §6 HTTP surface. Auth, rate limiting, and
//! audit logging are applied as layers in `main.rs`; every handler here is a
//! direct, thin call into `agent_memory_core::CoreContext`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use agent_memory_core::{
    CaptureInput, Category, Filter, Memory, MaintenancePhase, RecallInput, StoreInput,
};

use crate::response::{ApiError, ApiResult};
use crate::AppState;

fn default_agent() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AgentParam {
    #[serde(default = "default_agent")]
    pub agent: String,
}

// ---------------------------------------------------------------------
// Recall / search
// ---------------------------------------------------------------------

pub async fn recall(State(state): State<AppState>, Json(input): Json<RecallInput>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %input.agent, query = %input.query, "audit: recall");
    let response = state.ctx.recall(input).await?;
    Ok(Json(serde_json::to_value(response).expect("RecallResponse always serializes")))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_agent")]
    pub agent: String,
    pub limit: Option<usize>,
}

/// `/v1/search` (GET): the same pipeline as `/v1/recall`, debug-friendly
/// query-string form.
pub async fn search(State(state): State<AppState>, Query(q): Query<SearchParams>) -> ApiResult<Json<serde_json::Value>> {
    let input = RecallInput {
        query: q.q,
        agent: q.agent.clone(),
        limit: q.limit,
        namespace: None,
        filter: None,
        max_tokens: None,
        min_score: None,
    };
    info!(agent = %q.agent, "audit: search");
    let response = state.ctx.recall(input).await?;
    Ok(Json(serde_json::to_value(response).expect("RecallResponse always serializes")))
}

// ---------------------------------------------------------------------
// Capture / store / rule
// ---------------------------------------------------------------------

pub async fn capture(State(state): State<AppState>, Json(input): Json<CaptureInput>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %input.agent, count = input.messages.len(), "audit: capture");
    let records = state.ctx.capture(input).await?;
    Ok(Json(serde_json::json!({ "records": records })))
}

pub async fn store(State(state): State<AppState>, Json(input): Json<StoreInput>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %input.agent, "audit: store");
    let record = state.ctx.store_single(input).await?;
    Ok(Json(serde_json::json!({ "record": record })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleRequest {
    text: String,
    agent: String,
    #[serde(default)]
    namespace: Option<String>,
}

pub async fn rule(State(state): State<AppState>, Json(req): Json<RuleRequest>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %req.agent, "audit: rule");
    let record = state.ctx.store_rule(&req.agent, &req.text, req.namespace.as_deref()).await?;
    Ok(Json(serde_json::json!({ "record": record })))
}

// ---------------------------------------------------------------------
// Forget / pin / unpin
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgetRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

pub async fn forget(
    State(state): State<AppState>,
    Query(a): Query<AgentParam>,
    Json(req): Json<ForgetRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %a.agent, "audit: forget");
    if let Some(id) = req.id {
        state.ctx.forget_by_id(&a.agent, &id)?;
        return Ok(Json(serde_json::json!({ "forgotten": id })));
    }
    let Some(query) = req.query else {
        return Err(ApiError::BadRequest("forget requires either `id` or `query`".to_string()));
    };
    match state.ctx.forget_by_query(&a.agent, &query).await? {
        Some(id) => Ok(Json(serde_json::json!({ "forgotten": id }))),
        None => Err(ApiError::NotFound("no matching memory to forget".to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdRequest {
    id: String,
}

pub async fn pin(State(state): State<AppState>, Query(a): Query<AgentParam>, Json(req): Json<IdRequest>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %a.agent, id = %req.id, "audit: pin");
    state.ctx.pin(&a.agent, &req.id)?;
    Ok(Json(serde_json::json!({ "pinned": req.id })))
}

pub async fn unpin(State(state): State<AppState>, Query(a): Query<AgentParam>, Json(req): Json<IdRequest>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %a.agent, id = %req.id, "audit: unpin");
    state.ctx.unpin(&a.agent, &req.id)?;
    Ok(Json(serde_json::json!({ "unpinned": req.id })))
}

// ---------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------

async fn run_phase(state: AppState, agent: String, phase: MaintenancePhase) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %agent, phase = phase.as_str(), "audit: maintenance");
    let results = state.ctx.run_maintenance_phase(&agent, phase)?;
    let body: Vec<serde_json::Value> = results
        .into_iter()
        .map(|(agent, value)| serde_json::json!({ "agent": agent, "result": value }))
        .collect();
    Ok(Json(serde_json::json!({ "agents": body })))
}

pub async fn decay(State(state): State<AppState>, Query(q): Query<AgentParam>) -> ApiResult<Json<serde_json::Value>> {
    run_phase(state, q.agent, MaintenancePhase::Decay).await
}

pub async fn consolidate(State(state): State<AppState>, Query(q): Query<AgentParam>) -> ApiResult<Json<serde_json::Value>> {
    run_phase(state, q.agent, MaintenancePhase::Consolidate).await
}

pub async fn compress(State(state): State<AppState>, Query(q): Query<AgentParam>) -> ApiResult<Json<serde_json::Value>> {
    run_phase(state, q.agent, MaintenancePhase::Compress).await
}

pub async fn gc(State(state): State<AppState>, Query(q): Query<AgentParam>) -> ApiResult<Json<serde_json::Value>> {
    run_phase(state, q.agent, MaintenancePhase::Gc).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AmnesiaCheckRequest {
    agent: String,
    topics: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AmnesiaCoverage {
    topic: String,
    covered: bool,
}

pub async fn amnesia_check(State(state): State<AppState>, Json(req): Json<AmnesiaCheckRequest>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %req.agent, topics = req.topics.len(), "audit: amnesia-check");
    let results = state.ctx.amnesia_check(&req.agent, &req.topics).await;
    let coverage: Vec<AmnesiaCoverage> = results.into_iter().map(|(topic, covered)| AmnesiaCoverage { topic, covered }).collect();
    let all_covered = coverage.iter().all(|c| c.covered);
    Ok(Json(serde_json::json!({ "coverage": coverage, "allCovered": all_covered })))
}

// ---------------------------------------------------------------------
// Operational: stats / agents / health / metrics
// ---------------------------------------------------------------------

pub async fn stats(State(state): State<AppState>, Query(a): Query<AgentParam>) -> ApiResult<Json<serde_json::Value>> {
    let agents = state.ctx.pool.resolve_agents(&a.agent).map_err(agent_memory_core::CoreError::from)?;
    let mut per_agent = Vec::with_capacity(agents.len());
    for agent in agents {
        let (memory_rows, vec_rows, fts_rows) = state.ctx.stats(&agent)?;
        per_agent.push(serde_json::json!({
            "agent": agent,
            "memoryRows": memory_rows,
            "vecRows": vec_rows,
            "ftsRows": fts_rows,
        }));
    }
    Ok(Json(serde_json::json!({ "agents": per_agent })))
}

pub async fn agents(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let agents = state.ctx.pool.known_agents()?;
    Ok(Json(serde_json::json!({ "agents": agents })))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": agent_memory_core::VERSION }))
}

/// `/v1/health/deep`: touches every known agent's store, per spec §7's
/// store-integrity-errors-surface policy — a single bad store is reported,
/// not allowed to crash the health check for the others.
pub async fn health_deep(State(state): State<AppState>) -> Json<serde_json::Value> {
    let agents = state.ctx.pool.known_agents().unwrap_or_default();
    let mut checks = Vec::with_capacity(agents.len());
    let mut healthy = true;
    for agent in agents {
        let ok = state.ctx.stats(&agent).is_ok();
        healthy &= ok;
        checks.push(serde_json::json!({ "agent": agent, "ok": ok }));
    }
    Json(serde_json::json!({ "status": if healthy { "ok" } else { "degraded" }, "stores": checks }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.ctx.metrics.to_json())
}

pub async fn metrics_prometheus(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.ctx.metrics.to_prometheus_text())
}

// ---------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportParams {
    #[serde(default = "default_agent")]
    agent: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    include_soft_deleted: bool,
}

pub async fn export(State(state): State<AppState>, Query(q): Query<ExportParams>) -> ApiResult<Json<serde_json::Value>> {
    let filter = Filter {
        namespace: q.namespace,
        category: q.category.as_deref().and_then(Category::parse),
        include_soft_deleted: q.include_soft_deleted,
        min_importance: None,
        time_range: None,
    };
    let records = state.ctx.export(&q.agent, &filter)?;
    Ok(Json(serde_json::json!({ "records": records })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportRequest {
    agent: String,
    records: Vec<Memory>,
}

pub async fn import(State(state): State<AppState>, Json(req): Json<ImportRequest>) -> ApiResult<Json<serde_json::Value>> {
    info!(agent = %req.agent, count = req.records.len(), "audit: import");
    let count = req.records.len();
    state.ctx.import(&req.agent, &req.records)?;
    Ok(Json(serde_json::json!({ "imported": count })))
}

// ---------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RotateKeyRequest {
    scope: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    revoke_id: Option<String>,
}

pub async fn rotate_key(State(state): State<AppState>, Json(req): Json<RotateKeyRequest>) -> Json<serde_json::Value> {
    let (key, record) = state.auth.rotate(&req.scope, req.label, req.revoke_id.as_deref());
    info!(scope = %req.scope, key_id = %record.id, "audit: admin key rotation");
    Json(serde_json::json!({ "key": key, "id": record.id, "scope": record.scope }))
}
