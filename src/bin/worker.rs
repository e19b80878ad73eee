use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use outreachiq::clock::{Clock, SystemClock};
use outreachiq::config::{Config, ReplyMode};
use outreachiq::services::dispatcher::Dispatcher;
use outreachiq::services::transport::{EmailTransport, SimulatedTransport, SmtpTransport};

fn build_transport(config: &Config) -> Arc<dyn EmailTransport> {
    if config.reply_mode == ReplyMode::Simulated {
        tracing::warn!("REPLY_MODE=simulated: emails are recorded in memory, not sent");
        return Arc::new(SimulatedTransport::new());
    }

    let relay_host = std::env::var("SMTP_RELAY_HOST").unwrap_or_else(|_| {
        tracing::warn!("SMTP_RELAY_HOST not set, defaulting to localhost");
        "localhost".to_string()
    });
    let port: u16 = std::env::var("SMTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(587);
    let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
    let password = config.email_api_key.clone().unwrap_or_default();

    match SmtpTransport::new(&relay_host, port, &username, &password) {
        Ok(t) => Arc::new(t),
        Err(e) => panic!("failed to initialize SMTP transport: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    tracing::info!("outreachiq worker starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport = build_transport(&config);
    let dispatcher = Dispatcher::new(pool, transport, clock, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;
    tracing::info!("outreachiq worker stopped");
    Ok(())
}
