use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::Store;
use crate::error::AppError;
use crate::middleware::auth::{extract_claims, get_user_id};
use crate::models::campaign::{
    Campaign, CreateCampaignRequest, DuplicateCampaignRequest, LaunchCampaignRequest,
    UpdateCampaignRequest,
};
use crate::services::lifecycle::Lifecycle;
use crate::services::reply_ingestor::{IngestOutcome, InboundEventKind, ReplyIngestor};
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/campaigns")
            .route("", web::get().to(list_campaigns))
            .route("", web::post().to(create_campaign))
            .route("/{id}", web::get().to(get_campaign))
            .route("/{id}", web::put().to(update_campaign))
            .route("/{id}", web::delete().to(delete_campaign))
            .route("/{id}/launch", web::post().to(launch_campaign))
            .route("/{id}/pause", web::post().to(pause_campaign))
            .route("/{id}/resume", web::post().to(resume_campaign))
            .route("/{id}/duplicate", web::post().to(duplicate_campaign))
            .route(
                "/{id}/leads/{lead_id}/email-history",
                web::get().to(lead_email_history),
            )
            .route(
                "/{id}/leads/{lead_id}/mark-replied",
                web::post().to(mark_lead_replied),
            ),
    );
}

async fn owns_campaign(pool: &PgPool, campaign_id: Uuid, user_id: Uuid) -> Result<Campaign, AppError> {
    let campaign = Store::load_campaign(pool, campaign_id)
        .await?
        .ok_or(AppError::NotFound("campaign"))?;
    if campaign.owner_user_id != user_id {
        return Err(AppError::NotFound("campaign"));
    }
    Ok(campaign)
}

async fn list_campaigns(
    pool: web::Data<PgPool>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;

    let campaigns = sqlx::query_as::<_, Campaign>(
        "SELECT * FROM campaigns WHERE owner_user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(campaigns))
}

async fn get_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;
    Ok(HttpResponse::Ok().json(campaign))
}

async fn create_campaign(
    pool: web::Data<PgPool>,
    body: web::Json<CreateCampaignRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;

    if body.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }

    let campaign_id = Uuid::new_v4();
    let now = Utc::now();
    let tags = body.tags.clone().unwrap_or_default();

    let campaign = sqlx::query_as::<_, Campaign>(
        r#"
        INSERT INTO campaigns (id, owner_user_id, name, pitch, tone, status, start_time, tags, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'draft', NULL, $6, $7, $7)
        RETURNING *
        "#,
    )
    .bind(campaign_id)
    .bind(user_id)
    .bind(&body.name)
    .bind(body.pitch.clone().unwrap_or_default())
    .bind(body.tone.clone().unwrap_or_default())
    .bind(&tags)
    .bind(now)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(campaign))
}

async fn update_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateCampaignRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let name = body.name.clone().unwrap_or(campaign.name);
    let pitch = body.pitch.clone().unwrap_or(campaign.pitch);
    let tone = body.tone.clone().unwrap_or(campaign.tone);
    let tags = body.tags.clone().unwrap_or(campaign.tags);
    let now = Utc::now();

    let updated = sqlx::query_as::<_, Campaign>(
        r#"
        UPDATE campaigns SET name = $2, pitch = $3, tone = $4, tags = $5, updated_at = $6
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(campaign.id)
    .bind(name)
    .bind(pitch)
    .bind(tone)
    .bind(tags)
    .bind(now)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(updated))
}

async fn delete_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    clock: web::Data<Arc<dyn Clock>>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let lifecycle = Lifecycle::new(pool.get_ref().clone(), clock.get_ref().clone());
    lifecycle.delete(campaign.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn launch_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: Option<web::Json<LaunchCampaignRequest>>,
    req: HttpRequest,
    clock: web::Data<Arc<dyn Clock>>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let start_time = body.and_then(|b| b.start_time);
    let lifecycle = Lifecycle::new(pool.get_ref().clone(), clock.get_ref().clone());
    let launched = lifecycle.launch(campaign.id, start_time).await?;
    Ok(HttpResponse::Ok().json(launched))
}

async fn pause_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    clock: web::Data<Arc<dyn Clock>>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let lifecycle = Lifecycle::new(pool.get_ref().clone(), clock.get_ref().clone());
    let paused = lifecycle.pause(campaign.id).await?;
    Ok(HttpResponse::Ok().json(paused))
}

async fn resume_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    clock: web::Data<Arc<dyn Clock>>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let lifecycle = Lifecycle::new(pool.get_ref().clone(), clock.get_ref().clone());
    let resumed = lifecycle.resume(campaign.id).await?;
    Ok(HttpResponse::Ok().json(resumed))
}

async fn duplicate_campaign(
    pool: web::Data<PgPool>,
    path: web::Path<Uuid>,
    body: web::Json<DuplicateCampaignRequest>,
    req: HttpRequest,
    clock: web::Data<Arc<dyn Clock>>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let campaign = owns_campaign(pool.get_ref(), path.into_inner(), user_id).await?;

    let lifecycle = Lifecycle::new(pool.get_ref().clone(), clock.get_ref().clone());
    let copy = lifecycle
        .duplicate(campaign.id, body.into_inner().new_name)
        .await?;
    Ok(HttpResponse::Created().json(copy))
}

async fn lead_email_history(
    pool: web::Data<PgPool>,
    path: web::Path<(Uuid, Uuid)>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let (campaign_id, lead_id) = path.into_inner();
    let campaign = owns_campaign(pool.get_ref(), campaign_id, user_id).await?;

    let store = Store::new(pool.get_ref().clone());
    let history = store.email_history(campaign.id, lead_id).await?;
    Ok(HttpResponse::Ok().json(history))
}

/// Development convenience for `REPLY_MODE=simulated`: lets a test harness
/// simulate an inbound reply for a specific lead without standing up a
/// provider webhook.
async fn mark_lead_replied(
    pool: web::Data<PgPool>,
    path: web::Path<(Uuid, Uuid)>,
    req: HttpRequest,
    config: web::Data<Config>,
    ingestor: web::Data<ReplyIngestor>,
) -> Result<HttpResponse, AppError> {
    if config.reply_mode != crate::config::ReplyMode::Simulated {
        return Err(AppError::NotFound("route"));
    }

    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;
    let (campaign_id, lead_id) = path.into_inner();
    owns_campaign(pool.get_ref(), campaign_id, user_id).await?;

    let outcome = ingestor
        .ingest_by_lead(lead_id, InboundEventKind::Reply)
        .await?;
    let status = match outcome {
        IngestOutcome::Applied => "applied",
        IngestOutcome::UnknownMessage => "unknown_message",
        IngestOutcome::AlreadyTerminal => "already_terminal",
        IngestOutcome::BounceIgnored => "bounce_ignored",
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": status })))
}
