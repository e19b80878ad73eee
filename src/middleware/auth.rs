use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    pub exp: usize,
    pub iat: usize,
}

pub struct AuthMiddleware {
    pub secret_key: String,
}

impl AuthMiddleware {
    pub fn new(secret_key: String) -> Self {
        Self { secret_key }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            secret_key: self.secret_key.clone(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    secret_key: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path();

        // Public routes: account creation/login and the inbound provider
        // webhook, which authenticates itself separately via HTTP Basic.
        if path.starts_with("/api/auth/")
            || path.starts_with("/api/webhooks/")
            || path == "/health"
            || path == "/"
        {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await });
        }

        let auth_header = req.headers().get("Authorization");

        let token = match auth_header {
            Some(header) => {
                let header_str = header.to_str().unwrap_or("");
                if let Some(stripped) = header_str.strip_prefix("Bearer ") {
                    stripped.to_string()
                } else {
                    return Box::pin(async {
                        Err(actix_web::error::ErrorUnauthorized(
                            "invalid authorization header format",
                        ))
                    });
                }
            }
            None => {
                return Box::pin(async {
                    Err(actix_web::error::ErrorUnauthorized(
                        "missing authorization header",
                    ))
                });
            }
        };

        let validation = Validation::default();
        let token_data = match decode::<Claims>(
            &token,
            &DecodingKey::from_secret(self.secret_key.as_bytes()),
            &validation,
        ) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("jwt decode error: {:?}", e);
                return Box::pin(async {
                    Err(actix_web::error::ErrorUnauthorized("invalid or expired token"))
                });
            }
        };

        req.extensions_mut().insert(token_data.claims);

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}

pub fn extract_claims(req: &actix_web::HttpRequest) -> Result<Claims, actix_web::Error> {
    req.extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorUnauthorized("not authenticated"))
}

pub fn get_user_id(claims: &Claims) -> Result<uuid::Uuid, actix_web::Error> {
    uuid::Uuid::parse_str(&claims.user_id)
        .map_err(|_| actix_web::error::ErrorBadRequest("invalid user id in token"))
}
