use actix_cors::Cors;
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;

use outreachiq::clock::{Clock, SystemClock};
use outreachiq::config::Config;
use outreachiq::services::reply_ingestor::ReplyIngestor;
use outreachiq::{api, middleware as app_middleware};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    tracing::info!("outreachiq api starting on http://0.0.0.0:8080");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let secret_key = config.secret_key.clone();

    HttpServer::new(move || {
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let cors = Cors::default()
            .allowed_origin(&frontend_url)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "PATCH"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::ACCEPT,
            ])
            .supports_credentials()
            .max_age(3600);

        let reply_ingestor = ReplyIngestor::new(pool.clone(), clock.clone());

        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(clock.clone()))
            .app_data(web::Data::new(reply_ingestor))
            .wrap(cors)
            .wrap(actix_middleware::Logger::default())
            .wrap(app_middleware::auth::AuthMiddleware::new(secret_key.clone()))
            .service(
                web::scope("/api")
                    .configure(api::auth::configure)
                    .configure(api::campaigns::configure)
                    .configure(api::leads::configure)
                    .configure(api::templates::configure)
                    .configure(api::jobs::configure)
                    .configure(api::webhooks::configure),
            )
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
