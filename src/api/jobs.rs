//! Manual retry of a permanently-failed job. Resets a FAILED job back to
//! PENDING with a fresh attempt counter; the dispatcher picks it up on its
//! next tick like any other due job.

use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::Store;
use crate::error::AppError;
use crate::middleware::auth::{extract_claims, get_user_id};
use crate::models::campaign::Campaign;
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/jobs").route("/{job_id}/retry", web::post().to(retry_job)),
    );
}

async fn retry_job(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    clock: web::Data<Arc<dyn Clock>>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let job_id = path.into_inner();

    let job: crate::models::job::Job =
        sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool.get_ref())
            .await?
            .ok_or(AppError::NotFound("job"))?;

    let campaign: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
        .bind(job.campaign_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or(AppError::NotFound("campaign"))?;
    if campaign.owner_user_id != user_id {
        return Err(AppError::NotFound("job"));
    }

    let store = Store::new(pool.get_ref().clone());
    let now = clock.now();
    let affected = store.reset_job_for_retry(job_id, now).await?;
    if affected == 0 {
        return Err(AppError::Conflict("job is not in a failed state".into()));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "retried": true })))
}
