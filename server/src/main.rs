use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use sqlx::SqlitePool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huddle_server::auth::token::create_session_token;
use huddle_server::auth::{Authenticator, JwtVerifier};
use huddle_server::config::ServerConfig;
use huddle_server::db::models::to_db_timestamp;
use huddle_server::db::pool::{create_pool, run_migrations};
use huddle_server::db::queries::presence::reset_all_offline;
use huddle_server::db::repository::SqliteRepository;
use huddle_server::engine::chat_engine::ChatEngine;
use huddle_server::engine::moderation::WordFilter;
use huddle_server::web::app_state::AppState;
use huddle_server::web::router::build_router;

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Huddle real-time group messaging server")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "huddle.toml")]
    config: String,

    /// Print a session token for the given user id and exit
    #[arg(long, value_name = "USER_ID")]
    issue_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    if let Some(user_id) = cli.issue_token {
        let token = create_session_token(
            &user_id,
            &config.auth.jwt_secret,
            config.auth.session_expiry_hours,
        )
        .context("failed to sign session token")?;
        println!("{token}");
        return Ok(());
    }

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    // No connection survives a restart.
    let stale = reset_all_offline(&pool, &to_db_timestamp(chrono::Utc::now()))
        .await
        .context("failed to reset presence")?;
    if stale > 0 {
        info!(users = stale, "reset stale online presence");
    }

    let settings = config.engine_settings();
    let repo = Arc::new(SqliteRepository::new(pool.clone()));
    let moderator = Arc::new(WordFilter::new(
        config.moderation.blocked_words.clone(),
        config.moderation.filtered_words.clone(),
    ));

    let (engine, registry_events) = ChatEngine::new(repo.clone(), moderator, settings.clone());
    engine.spawn_presence(registry_events);

    let authenticator = Authenticator::new(
        Arc::new(JwtVerifier::new(config.auth.jwt_secret.clone())),
        repo,
        settings.repository_timeout,
    );

    let engine = Arc::new(engine);
    spawn_rate_limit_cleanup(engine.clone(), settings.message_rate_window);

    let app_state = Arc::new(AppState {
        engine: engine.clone(),
        authenticator,
        heartbeat_interval: config.heartbeat_interval(),
        environment: config.server.environment.clone(),
        started_at: Instant::now(),
    });
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server.web_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.web_address))?;
    info!("Huddle server listening on {}", config.server.web_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await
        .context("server error")?;

    mark_all_offline(&pool).await;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, then close every live connection so their
/// socket tasks end and the server can drain.
async fn shutdown_signal(engine: Arc<ChatEngine>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    let closed = engine.disconnect_all();
    info!(connections = closed, "closed live connections");
}

/// Presence writes from the final disconnects run on the tracker task and
/// may not land before exit, so record the offline state directly.
async fn mark_all_offline(pool: &SqlitePool) {
    match reset_all_offline(pool, &to_db_timestamp(chrono::Utc::now())).await {
        Ok(n) => info!(users = n, "marked users offline"),
        Err(e) => warn!(error = %e, "failed to mark users offline"),
    }
}

fn spawn_rate_limit_cleanup(engine: Arc<ChatEngine>, window: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(window.max(Duration::from_secs(60)));
        loop {
            interval.tick().await;
            engine.cleanup_rate_limits(window);
        }
    });
}
