use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use rewards_server::{health_check, rewards, AppState, Settings};
use rewards_server::config::CorsConfig;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // CORS disabled - use most restrictive settings
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "PATCH"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
    };

    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new().context("failed to load configuration")?;
    info!(
        environment = %config.environment,
        storage = ?config.storage.backend,
        "Configuration loaded successfully"
    );

    // Initialize application state
    let state = AppState::new(config)
        .await
        .context("failed to initialise application state")?;
    let state = web::Data::new(state);
    let config = state.config.clone();

    // Periodically forget idle rate-limit windows
    if state.rewards.rate_limiter().is_enabled() {
        let cleanup_state = state.clone();
        let cleanup_interval = Duration::from_secs(config.rate_limit.window_seconds.max(1) as u64);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(cleanup_interval).await;
                let removed = cleanup_state.rewards.sweep_rate_limits().await;
                if removed > 0 {
                    debug!(removed, "Dropped idle rate-limit windows");
                }
            }
        });
    }

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
        .context("failed to bind listener")?;
    info!("Rewards server listening on http://{}:{}", config.server.host, config.server.port);

    let cors_config = config.cors.clone();
    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_config))
            .app_data(server_state.clone())
            .route("/health", web::get().to(health_check))
            .configure(rewards::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .context("server terminated with an error")?;

    info!("Shutting down");
    state.shutdown().await?;

    Ok(())
}
