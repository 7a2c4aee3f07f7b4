//! Connection configuration endpoints.
//!
//!   GET    /api/v1/connections/:provider         masked descriptors + flags
//!   PUT    /api/v1/connections/:provider         ordered upsert edit list
//!   POST   /api/v1/connections/:provider         add one connection
//!   DELETE /api/v1/connections/:provider/:index  delete + re-index
//!
//! Responses only ever carry masked key descriptors; raw key material
//! flows in one direction, through the edit bodies.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::connections::service::ConnectionDescriptor;
use crate::connections::{ConnectionEdit, NewConnection, ProviderConnections, ProviderKind};
use crate::errors::AppError;
use crate::AppState;

pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<ProviderKind>,
) -> Result<Json<ProviderConnections>, AppError> {
    Ok(Json(state.service.list_connections(provider)?))
}

pub async fn upsert_connections(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<ProviderKind>,
    Json(edits): Json<Vec<ConnectionEdit>>,
) -> Result<Json<ProviderConnections>, AppError> {
    let out = state.service.upsert_connections(provider, edits).await?;
    Ok(Json(out))
}

pub async fn add_connection(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<ProviderKind>,
    Json(body): Json<NewConnection>,
) -> Result<(StatusCode, Json<ConnectionDescriptor>), AppError> {
    let descriptor = state.service.add_connection(provider, body).await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path((provider, index)): Path<(ProviderKind, usize)>,
) -> Result<StatusCode, AppError> {
    state.service.delete_connection(provider, index).await?;
    Ok(StatusCode::NO_CONTENT)
}
