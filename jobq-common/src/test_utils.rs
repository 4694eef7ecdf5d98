//! Seeding helpers shared by the sqlx tests across the workspace.
//!
//! Job rows carry a `project_id` foreign key, so every test that inserts
//! jobs first needs a user and a project to hang them off.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobstore::{Job, JobStatus, DEFAULT_MAX_RETRIES};

/// An in-memory job value for unit tests that never touch the store.
pub fn job_fixture(job_type: &str, payload: serde_json::Value) -> Job {
    Job {
        id: Uuid::now_v7(),
        job_type: job_type.to_owned(),
        payload: sqlx::types::Json(payload),
        status: JobStatus::Queued,
        retry_count: 0,
        max_retries: DEFAULT_MAX_RETRIES,
        project_id: Uuid::now_v7(),
        duration_ms: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Insert a user plus one project and return the project id.
pub async fn seed_project(pool: &PgPool) -> Uuid {
    let marker = Uuid::now_v7();

    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, password, api_key) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(format!("{}@example.com", marker))
    .bind("hunter2")
    .bind(format!("key-{}", marker))
    .fetch_one(pool)
    .await
    .expect("failed to seed user");

    sqlx::query_scalar("INSERT INTO projects (name, user_id) VALUES ($1, $2) RETURNING id")
        .bind("test project")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("failed to seed project")
}
