//! HTTP request handlers.

use super::AppState;
use crate::db::{EntityId, Priority, Scope, Ticket, TicketId, TicketStatus};
use crate::engine::{EngineError, TicketRequest};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

fn error_response(e: EngineError) -> Response {
    match e {
        EngineError::UnknownEntity(_) | EngineError::UnknownTicket(_) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        EngineError::Invalid(_) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        EngineError::TicketClosed(_) => (StatusCode::CONFLICT, e.to_string()).into_response(),
        EngineError::Stopped => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
        EngineError::Store(_) => {
            tracing::error!("Request failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API: Entities
// ============================================================================

/// Evaluate one entity through the full pipeline and return the decision.
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> impl IntoResponse {
    match state.engine.evaluate_one(id).await {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(e) => error_response(e),
    }
}

/// Stored status of one entity, without running the pipeline.
pub async fn handle_current_status(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> impl IntoResponse {
    match state.engine.current_status(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_trend(State(state): State<AppState>, Path(id): Path<EntityId>) -> impl IntoResponse {
    match state.engine.trend(id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Population
// ============================================================================

pub async fn handle_counts(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.population_counts() {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.list_by_category() {
        Ok(groups) => Json(groups).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_sweep(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.is_stopping() {
        return error_response(EngineError::Stopped);
    }
    match state.engine.sweep_once().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset: usize,
}

pub async fn handle_reset(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.reset_all().await {
        Ok(reset) => Json(ResetResponse { reset }).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Tickets
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TicketList {
    pub count: usize,
    pub tickets: Vec<Ticket>,
}

impl From<Vec<Ticket>> for TicketList {
    fn from(tickets: Vec<Ticket>) -> Self {
        Self {
            count: tickets.len(),
            tickets,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub entity_id: EntityId,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub fault_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub technician_note: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

pub async fn handle_create_ticket(
    State(state): State<AppState>,
    Json(req): Json<CreateTicketRequest>,
) -> impl IntoResponse {
    let priority = match req.priority.as_deref().map(str::parse::<Priority>).transpose() {
        Ok(p) => p,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let scope = match req.scope.as_deref().map(str::parse::<Scope>).transpose() {
        Ok(s) => s,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let request = TicketRequest {
        entity_id: req.entity_id,
        priority,
        fault_type: req.fault_type,
        scope,
        technician_note: req.technician_note,
        assigned_to: req.assigned_to,
    };
    match state.engine.open_ticket(request).await {
        Ok(ticket) => (StatusCode::CREATED, Json(ticket)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn handle_list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref().map(str::parse::<TicketStatus>).transpose() {
        Ok(s) => s,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    match state.engine.list_tickets(status, query.limit.unwrap_or(50)) {
        Ok(tickets) => Json(TicketList::from(tickets)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_entity_tickets(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> impl IntoResponse {
    match state.engine.entity_tickets(id) {
        Ok(tickets) => Json(TicketList::from(tickets)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TicketStatusRequest {
    pub new_status: String,
    pub changed_by: String,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn handle_update_ticket_status(
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
    Json(req): Json<TicketStatusRequest>,
) -> impl IntoResponse {
    let new_status = match req.new_status.parse::<TicketStatus>() {
        Ok(s) => s,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    match state
        .engine
        .update_ticket_status(id, new_status, &req.changed_by, req.note.as_deref())
        .await
    {
        Ok(update) => Json(update).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TicketNoteRequest {
    pub author: String,
    pub note: String,
}

pub async fn handle_add_ticket_note(
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
    Json(req): Json<TicketNoteRequest>,
) -> impl IntoResponse {
    match state.engine.add_ticket_note(id, &req.author, &req.note).await {
        Ok(ticket) => Json(ticket).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_ticket_history(
    State(state): State<AppState>,
    Path(id): Path<TicketId>,
) -> impl IntoResponse {
    match state.engine.ticket_history(id) {
        Ok(history) => Json(history).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionLogQuery {
    pub limit: Option<usize>,
}

pub async fn handle_action_log(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Query(query): Query<ActionLogQuery>,
) -> impl IntoResponse {
    match state.engine.action_log(id, query.limit.unwrap_or(50)) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub snapshot_model: bool,
    pub trend_model: bool,
    pub buffered_samples: usize,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let (snapshot_model, trend_model) = state.engine.predictors_available();
    Json(HealthResponse {
        status: if state.engine.is_stopping() { "stopping" } else { "ok" },
        snapshot_model,
        trend_model,
        buffered_samples: state.engine.window().total_len(),
    })
}
