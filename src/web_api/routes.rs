//! API Routes

use axum::{
    extract::{Query, State},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity_store::{import_state_object, Entity, EntityQuery, EntityState, StateChange};
use crate::error::{Error, Result};
use crate::models::{ApiResponse, ListPayload, RevisionResponse};
use crate::state::AppState;

use super::guard_layer::admission_guard;

/// Entity list page bounds
pub const LIST_LIMIT_MIN: usize = 8;
pub const LIST_LIMIT_MAX: usize = 128;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let guard = state.guard.clone();

    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::device_status))
        // Entities
        .route("/api/entities", get(list_entities).put(upsert_entity))
        // States
        .route("/api/state", get(get_state).put(import_state))
        .route("/api/state/revision", get(state_revision))
        .route("/api/state/reset", post(reset_state))
        .layer(middleware::from_fn_with_state(guard, admission_guard))
        .with_state(state)
}

/// Result of a write
#[derive(Debug, Serialize)]
struct MutationResponse {
    change: StateChange,
    revision: u64,
}

// ========================================
// Entity Handlers
// ========================================

#[derive(Deserialize)]
struct EntityListQuery {
    domain: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(LIST_LIMIT_MAX)
        .clamp(LIST_LIMIT_MIN, LIST_LIMIT_MAX)
}

async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<EntityListQuery>,
) -> Result<Json<ApiResponse<ListPayload<Entity>>>> {
    let limit = clamp_limit(query.limit);
    let filter = EntityQuery {
        domain: query.domain,
        search: query.search,
    };

    let items = state.store.list_entities(&filter, limit)?;
    Ok(Json(ApiResponse::success(items.into())))
}

async fn upsert_entity(
    State(state): State<AppState>,
    Json(entity): Json<Entity>,
) -> Result<Json<ApiResponse<MutationResponse>>> {
    let entity_id = entity.id.clone();
    let change = state.store.upsert_entity(entity)?;
    let revision = state.store.state_revision()?;

    tracing::debug!(entity_id = %entity_id, change = ?change, "Entity upserted");
    Ok(Json(ApiResponse::success(MutationResponse { change, revision })))
}

// ========================================
// State Handlers
// ========================================

#[derive(Deserialize)]
struct StateQuery {
    entity_id: Option<String>,
}

/// Single state by `entity_id`, else the state list
async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Response> {
    match query.entity_id.filter(|id| !id.is_empty()) {
        Some(entity_id) => {
            let found: EntityState = state
                .store
                .get_state(&entity_id)?
                .ok_or_else(|| Error::NotFound(format!("state {}", entity_id)))?;
            Ok(Json(ApiResponse::success(found)).into_response())
        }
        None => {
            let items = state.store.list_states(LIST_LIMIT_MAX)?;
            Ok(Json(ApiResponse::success(ListPayload::from(items))).into_response())
        }
    }
}

async fn import_state(
    State(state): State<AppState>,
    Json(object): Json<Value>,
) -> Result<Json<ApiResponse<MutationResponse>>> {
    let change = import_state_object(&state.store, &object)?;
    let revision = state.store.state_revision()?;
    Ok(Json(ApiResponse::success(MutationResponse { change, revision })))
}

async fn state_revision(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RevisionResponse>>> {
    let revision = state.store.state_revision()?;
    Ok(Json(ApiResponse::success(RevisionResponse { revision })))
}

async fn reset_state(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RevisionResponse>>> {
    state.store.reset()?;
    let revision = state.store.state_revision()?;
    Ok(Json(ApiResponse::success(RevisionResponse { revision })))
}
