//! Inbound provider webhook for replies and bounces. Authenticated with
//! HTTP Basic against `WEBHOOK_USERNAME`/`WEBHOOK_PASSWORD`
//! rather than the bearer-JWT scheme the rest of the API uses, since the
//! caller here is the email provider, not a logged-in user.

use actix_web::{web, HttpRequest, HttpResponse};

use crate::config::Config;
use crate::error::AppError;
use crate::services::reply_ingestor::{IngestOutcome, InboundEventKind, ReplyIngestor};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhooks").route("/inbound", web::post().to(inbound_event)));
}

#[derive(Debug, serde::Deserialize)]
struct InboundWebhookPayload {
    message_id: String,
    event: String,
}

fn check_basic_auth(req: &HttpRequest, config: &Config) -> Result<(), AppError> {
    let (expected_user, expected_pass) = match (&config.webhook_username, &config.webhook_password)
    {
        (Some(u), Some(p)) => (u, p),
        _ => return Err(AppError::Auth),
    };

    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Auth)?;
    let encoded = header.strip_prefix("Basic ").ok_or(AppError::Auth)?;

    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| AppError::Auth)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AppError::Auth)?;
    let (user, pass) = decoded.split_once(':').ok_or(AppError::Auth)?;

    if user == expected_user && pass == expected_pass {
        Ok(())
    } else {
        Err(AppError::Auth)
    }
}

async fn inbound_event(
    req: HttpRequest,
    config: web::Data<Config>,
    ingestor: web::Data<ReplyIngestor>,
    body: web::Json<InboundWebhookPayload>,
) -> Result<HttpResponse, AppError> {
    check_basic_auth(&req, &config)?;

    let kind = match body.event.as_str() {
        "reply" => InboundEventKind::Reply,
        "bounce" => InboundEventKind::Bounce,
        other => {
            return Err(AppError::Validation(format!("unknown event type '{other}'")));
        }
    };

    let outcome = ingestor.ingest(&body.message_id, kind).await?;
    let status = match outcome {
        IngestOutcome::Applied => "applied",
        IngestOutcome::UnknownMessage => "unknown_message",
        IngestOutcome::AlreadyTerminal => "already_terminal",
        IngestOutcome::BounceIgnored => "bounce_ignored",
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": status })))
}
