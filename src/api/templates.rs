//! Per-step email templates attached to a campaign.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{extract_claims, get_user_id};
use crate::models::campaign::Campaign;
use crate::models::template::{CreateTemplateRequest, Template};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/campaigns/{campaign_id}/templates")
            .route("", web::get().to(list_templates))
            .route("", web::post().to(upsert_template))
            .route("/{step_number}", web::delete().to(delete_template)),
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

async fn list_templates(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owned_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let templates = sqlx::query_as::<_, Template>(
        "SELECT * FROM templates WHERE campaign_id = $1 ORDER BY step_number ASC",
    )
    .bind(campaign.id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(templates))
}

/// Create-or-replace by `(campaign_id, step_number)`. A campaign's step
/// sequence must be contiguous from 1, but that's enforced at launch time,
/// not here, so drafts can be edited out of order.
async fn upsert_template(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: web::Json<CreateTemplateRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owned_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    if body.step_number < 1 {
        return Err(AppError::Validation("step_number must be >= 1".into()));
    }
    if campaign.campaign_status() != crate::models::campaign::CampaignStatus::Draft {
        return Err(AppError::Conflict(
            "templates can only be edited while the campaign is in draft".into(),
        ));
    }

    let now = Utc::now();
    let template = sqlx::query_as::<_, Template>(
        r#"
        INSERT INTO templates (id, campaign_id, step_number, subject, body_html, delay_minutes, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (campaign_id, step_number) DO UPDATE SET
            subject = EXCLUDED.subject,
            body_html = EXCLUDED.body_html,
            delay_minutes = EXCLUDED.delay_minutes
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(campaign.id)
    .bind(body.step_number)
    .bind(&body.subject)
    .bind(&body.body_html)
    .bind(body.delay_minutes.unwrap_or(0))
    .bind(now)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(template))
}

async fn delete_template(
    pool: web::Data<PgPool>,
    path: web::Path<(Uuid, i32)>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let (campaign_id, step_number) = path.into_inner();
    let campaign = owned_campaign(pool.get_ref(), campaign_id, user_id).await?;

    if campaign.campaign_status() != crate::models::campaign::CampaignStatus::Draft {
        return Err(AppError::Conflict(
            "templates can only be edited while the campaign is in draft".into(),
        ));
    }

    let result = sqlx::query("DELETE FROM templates WHERE campaign_id = $1 AND step_number = $2")
        .bind(campaign.id)
        .bind(step_number)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("template"));
    }
    Ok(HttpResponse::NoContent().finish())
}
