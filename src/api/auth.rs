use actix_web::{web, HttpRequest, HttpResponse};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::middleware::auth::{extract_claims, get_user_id, Claims};
use crate::models::user::{UpdateUserRequest, User, UserResponse};

const JWT_EXPIRATION_HOURS: i64 = 24;

#[derive(Debug, serde::Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, serde::Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/me", web::get().to(get_current_user))
            .route("/me", web::put().to(update_current_user))
            .route("/refresh", web::post().to(refresh_token)),
    );
}

async fn register(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_one(pool.get_ref())
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict("email already registered".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4();
    let now = Utc::now();

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash, signature_html, profile_completed, created_at)
        VALUES ($1, $2, $3, '', false, $4)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&payload.email)
    .bind(&password_hash)
    .bind(now)
    .fetch_one(pool.get_ref())
    .await?;

    let token = generate_token(&config, &user.id.to_string(), &user.email);
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        user: user.into(),
    }))
}

async fn login(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or(AppError::Auth)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| AppError::Internal(format!("stored password hash is invalid: {e}")))?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::Auth);
    }

    let token = generate_token(&config, &user.id.to_string(), &user.email);
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: user.into(),
    }))
}

async fn get_current_user(
    pool: web::Data<PgPool>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or(AppError::NotFound("user"))?;

    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// Sets the signature appended to every rendered email body.
/// `profile_completed` flips to true once a signature has been saved, since
/// that's the one piece of per-user setup the renderer depends on.
async fn update_current_user(
    pool: web::Data<PgPool>,
    req: HttpRequest,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let user_id = get_user_id(&claims).map_err(|_| AppError::Auth)?;

    let Some(signature_html) = &payload.signature_html else {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool.get_ref())
            .await?
            .ok_or(AppError::NotFound("user"))?;
        return Ok(HttpResponse::Ok().json(UserResponse::from(user)));
    };

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET signature_html = $2, profile_completed = true
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(signature_html)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or(AppError::NotFound("user"))?;

    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

async fn refresh_token(
    config: web::Data<Config>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let claims = extract_claims(&req).map_err(|_| AppError::Auth)?;
    let token = generate_token(&config, &claims.user_id, &claims.sub);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token })))
}

fn generate_token(config: &Config, user_id: &str, email: &str) -> String {
    let now = Utc::now();
    let exp = now + Duration::hours(JWT_EXPIRATION_HOURS);

    let claims = Claims {
        sub: email.to_string(),
        user_id: user_id.to_string(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .expect("HS256 encoding with a valid secret never fails")
}
