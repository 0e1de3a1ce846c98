//! Upload routes: `/v1/uploads/*`
//!
//! Artifacts uploaded during the wizard land in a temporary session until the
//! app exists and they are attached to it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use appforge_core::persistence::{Artifact, ArtifactUpload};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/uploads` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{session_id}", post(upload))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<ArtifactUpload>,
) -> Result<(StatusCode, Json<Artifact>), AppError> {
    let artifact = state
        .persistence()
        .upload_pending_artifact(&session_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(artifact)))
}
