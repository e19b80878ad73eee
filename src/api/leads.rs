//! Lead CRUD, scoped under their owning campaign. Lead
//! generation/verification/signal-enrichment stay outside this core —
//! leads arrive already resolved, via this API.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{extract_claims, get_user_id};
use crate::models::campaign::Campaign;
use crate::models::lead::{CreateLeadRequest, Lead};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/campaigns/{campaign_id}/leads")
            .route("", web::get().to(list_leads))
            .route("", web::post().to(create_lead))
            .route("/{lead_id}", web::get().to(get_lead))
            .route("/{lead_id}", web::delete().to(delete_lead)),
    );
}

async fn owned_campaign(pool: &PgPool, campaign_id: Uuid, user_id: Uuid) -> Result<Campaign, AppError> {
    let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("campaign"))?;
    if campaign.owner_user_id != user_id {
        return Err(AppError::NotFound("campaign"));
    }
    Ok(campaign)
}

async fn list_leads(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owned_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let leads = sqlx::query_as::<_, Lead>(
        "SELECT * FROM leads WHERE campaign_id = $1 ORDER BY created_at ASC",
    )
    .bind(campaign.id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(leads))
}

async fn create_lead(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: web::Json<CreateLeadRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owned_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(AppError::Validation("a valid email is required".into()));
    }

    let now = Utc::now();
    let lead = sqlx::query_as::<_, Lead>(
        r#"
        INSERT INTO leads (id, campaign_id, email, first_name, company, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
        ON CONFLICT (campaign_id, email) DO UPDATE SET first_name = EXCLUDED.first_name
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(campaign.id)
    .bind(&body.email)
    .bind(&body.first_name)
    .bind(&body.company)
    .bind(now)
    .fetch_one(pool.get_ref())
    .await?;

    // A lead added after launch picks up step 1 immediately so it isn't
    // silently skipped by the dispatcher — every non-terminal lead should
    // eventually get a job.
    if campaign.campaign_status() == crate::models::campaign::CampaignStatus::Active {
        let has_step_one = crate::db::Store::load_template(pool.get_ref(), campaign.id, 1)
            .await?
            .is_some();
        if has_step_one {
            let scheduled_at = crate::services::scheduler::next_scheduled_at(
                1,
                campaign.start_time.unwrap_or(now),
                now,
                None,
                0,
            );
            let mut conn = pool.acquire().await?;
            crate::db::Store::create_job(&mut conn, campaign.id, lead.id, 1, scheduled_at, now)
                .await?;
        }
    }

    Ok(HttpResponse::Created().json(lead))
}

async fn get_lead(
    pool: web::Data<PgPool>,
    path: web::Path<(Uuid, Uuid)>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let (campaign_id, lead_id) = path.into_inner();
    let campaign = owned_campaign(pool.get_ref(), campaign_id, user_id).await?;

    let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1 AND campaign_id = $2")
        .bind(lead_id)
        .bind(campaign.id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or(AppError::NotFound("lead"))?;

    Ok(HttpResponse::Ok().json(lead))
}

async fn delete_lead(
    pool: web::Data<PgPool>,
    path: web::Path<(Uuid, Uuid)>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let (campaign_id, lead_id) = path.into_inner();
    let campaign = owned_campaign(pool.get_ref(), campaign_id, user_id).await?;

    let result = sqlx::query("DELETE FROM leads WHERE id = $1 AND campaign_id = $2")
        .bind(lead_id)
        .bind(campaign.id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("lead"));
    }
    Ok(HttpResponse::NoContent().finish())
}
