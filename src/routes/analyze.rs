use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::analysis::{AnalyzeMetadata, AnalyzeResponse, WaitQuery};
use crate::models::job::{JobMetadata, JobStatus, JobStatusView};

use super::error::ApiError;

/// POST /api/v1/analyze — Queue an image for nutrition analysis.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let meta = AnalyzeMetadata::from_body(&body);
    meta.validate()?;

    let job_id = state
        .queue
        .enqueue(
            body,
            JobMetadata {
                image_name: meta.image_name,
                version: meta.version,
                environment: state.environment.clone(),
            },
        )
        .await?;

    Ok(Json(AnalyzeResponse {
        job_id,
        status: JobStatus::Queued,
        message: "Image analysis job has been queued".to_string(),
    }))
}

/// GET /api/v1/analyze/{job_id} — Check analysis job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobStatusView>), ApiError> {
    let view = state.status.get_status(job_id).await?;
    Ok(respond(view))
}

/// GET /api/v1/analyze/{job_id}/wait — Block until the job is terminal or the timeout passes.
pub async fn wait_for_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> Result<(StatusCode, Json<JobStatusView>), ApiError> {
    query.validate()?;
    let view = state
        .status
        .wait_for_completion(job_id, query.timeout())
        .await?;
    Ok(respond(view))
}

fn respond(view: JobStatusView) -> (StatusCode, Json<JobStatusView>) {
    let code = if view.status == JobStatus::NotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    (code, Json(view))
}
