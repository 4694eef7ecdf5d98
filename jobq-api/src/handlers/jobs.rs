use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_derive::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

use jobq_common::jobstore::{Job, NewJob, DEFAULT_MAX_RETRIES};
use jobq_common::router;

use super::AppState;

/// Payloads are opaque but not unbounded; serialized bodies above this size
/// are rejected outright.
const MAX_PAYLOAD_SIZE: usize = 1_000_000;

#[derive(Serialize, Deserialize)]
pub struct JobPostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The body of a request made to submit a job.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct JobPostRequestBody {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub project_id: Uuid,
    /// Caller-supplied id; one is allocated when absent.
    pub job_id: Option<Uuid>,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

pub async fn post(
    State(state): State<AppState>,
    Json(body): Json<JobPostRequestBody>,
) -> Result<(StatusCode, Json<JobPostResponse>), (StatusCode, Json<JobPostResponse>)> {
    debug!("received submission: {:?}", body);

    if body.job_type.is_empty() {
        return Err(bad_request("type must not be empty"));
    }

    if body.max_retries < 0 {
        return Err(bad_request("max_retries must not be negative"));
    }

    if body.payload.to_string().len() > MAX_PAYLOAD_SIZE {
        return Err(bad_request("payload too large"));
    }

    let mut new_job = NewJob::new(&body.job_type, body.payload, body.project_id);
    new_job.id = body.job_id;
    new_job.max_retries = body.max_retries;

    // The insert happens-before the broker push. If the push fails we return
    // 500 with a committed queued row behind it; the reaper re-enqueues that
    // row once it goes stale. The reverse order could lose a lane entry with
    // no row at all.
    let job = state.store.insert(new_job).await.map_err(internal_error)?;

    let lane = router::route(&job.job_type);
    state
        .broker
        .push(lane, &job.id.to_string())
        .await
        .map_err(internal_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobPostResponse {
            id: Some(job.id),
            error: None,
        }),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, StatusCode> {
    match state.store.fetch(id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(error) => {
            error!(job_id = %id, "failed to fetch job: {}", error);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    pub project_id: Uuid,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Job>>, StatusCode> {
    match state.store.list_by_project(params.project_id).await {
        Ok(jobs) => Ok(Json(jobs)),
        Err(error) => {
            error!(project_id = %params.project_id, "failed to list jobs: {}", error);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<JobPostResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(JobPostResponse {
            id: None,
            error: Some(message.to_owned()),
        }),
    )
}

fn internal_error<E>(err: E) -> (StatusCode, Json<JobPostResponse>)
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(JobPostResponse {
            id: None,
            error: Some(err.to_string()),
        }),
    )
}
