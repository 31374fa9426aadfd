//! JSON HTTP API over [`BuildService`].
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/api/builds` | builds, newest first |
//! | POST | `/api/builds` | 202 `{ id, status }`, 422 on invalid input |
//! | GET | `/api/builds/{id}` | one build, or 404 |
//! | GET | `/api/profiles` | profile names |
//! | GET | `/api/images/{profile}` | `[{ id, name }]` |
//! | GET | `/api/shapes/{profile}` | `[{ id, name }]` |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kiln_core::{BuildId, BuildRequest, BuildStatus, NewBuildRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::orchestrator::error_chain;
use crate::service::{BuildService, ServiceError};

type SharedService = Arc<BuildService>;

/// Serve the API on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, service: SharedService) -> std::io::Result<()> {
    serve_with_shutdown(listener, service, shutdown_signal()).await
}

/// Serve the API until `signal` resolves, then wait for running builds.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    service: SharedService,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => tracing::info!(%addr, "listening"),
        Err(e) => tracing::warn!(error = %e, "listening on an unknown address"),
    }
    let served = axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(signal)
        .await;
    service.shutdown().await;
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutting down"),
        Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C; serving until killed"),
    }
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/api/builds", get(list_builds).post(submit_build))
        .route("/api/builds/{id}", get(get_build))
        .route("/api/profiles", get(list_profiles))
        .route("/api/images/{profile}", get(list_images))
        .route("/api/shapes/{profile}", get(list_shapes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Body of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted {
    pub id: BuildId,
    pub status: BuildStatus,
}

/// One entry of a selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub name: String,
}

async fn list_builds(
    State(service): State<SharedService>,
) -> Result<Json<Vec<BuildRequest>>, ApiError> {
    Ok(Json(service.list_builds().await?))
}

async fn submit_build(
    State(service): State<SharedService>,
    Json(request): Json<NewBuildRequest>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let handle = service.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Submitted {
            id: handle.id(),
            status: BuildStatus::Queued,
        }),
    ))
}

async fn get_build(
    State(service): State<SharedService>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildRequest>, ApiError> {
    service
        .get_build(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

async fn list_profiles(State(service): State<SharedService>) -> Json<Vec<String>> {
    Json(service.profiles().await)
}

async fn list_images(
    State(service): State<SharedService>,
    Path(profile): Path<String>,
) -> Json<Vec<Choice>> {
    let images = service.images(&profile).await;
    Json(
        images
            .into_iter()
            .map(|image| Choice {
                id: image.id,
                name: image.display_name,
            })
            .collect(),
    )
}

async fn list_shapes(
    State(service): State<SharedService>,
    Path(profile): Path<String>,
) -> Json<Vec<Choice>> {
    let shapes = service.shapes(&profile).await;
    Json(
        shapes
            .into_iter()
            .map(|shape| Choice {
                id: shape.clone(),
                name: shape,
            })
            .collect(),
    )
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(BuildId),
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(e) => Self::Validation(e.to_string()),
            ServiceError::NotFound(id) => Self::NotFound(id),
            other => Self::Internal(error_chain(&other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            Self::NotFound(id) => (StatusCode::NOT_FOUND, format!("build {id} not found")),
            Self::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
