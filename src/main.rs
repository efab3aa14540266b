//! # Voice Pipeline Server - Main Application Entry Point
//!
//! Real-time voice assistant: clients stream utterances (or text) over `/ws/assistant`,
//! each turn runs speech-to-text → language model → text-to-speech, and the transcript,
//! the answer and the synthesized audio are streamed back.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every provider call is a suspension point on the actix/tokio runtime
//! - **Trait objects**: engines are chosen at startup from configuration
//! - **Result<T, E>** with `?`: startup fails fast with a readable error chain
//! - **static AtomicBool**: shutdown signal shared with the signal handler task
//!
//! ## Application Architecture:
//! - **pipeline**: conversation context, provider traits and the per-session agent
//! - **audio / device / language**: decoding, compute device and language-code helpers
//! - **transcription / generation / synthesis**: concrete engines
//! - **factory**: builds engines from configuration and agents per session
//! - **session / protocol / websocket**: session registry, wire protocol and the socket actor
//! - **config / state / error**: configuration, shared state and HTTP errors
//! - **health / handlers / middleware**: HTTP endpoints and request instrumentation

mod audio;
mod config;
mod device;
mod error;
mod factory;
mod generation;
mod handlers;
mod health;
mod language;
mod middleware;
mod pipeline;
mod protocol;
mod session;
mod state;
mod synthesis;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use error::AppError;
use factory::ProviderFactory;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup Order:
/// 1. `.env`, then logging, so configuration problems are logged
/// 2. Configuration: load and validate
/// 3. Providers: build shared engines (fails fast on a bad provider or missing key)
/// 4. HTTP server with middleware and routes, stopped gracefully on a signal
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        stt = %config.stt.provider,
        llm = %config.llm.provider,
        tts = %config.tts.provider,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let factory = ProviderFactory::from_config(&config).await?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, factory);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::index))
            .route("/health", web::get().to(health::health_check))
            .route("/ws/assistant", web::get().to(websocket::assistant_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .default_service(web::to(not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

async fn not_found(req: actix_web::HttpRequest) -> Result<actix_web::HttpResponse, AppError> {
    Err(AppError::NotFound(format!("{} {}", req.method(), req.path())))
}

/// `RUST_LOG` controls the filter; defaults to debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_pipeline_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to initialize tracing")?;

    Ok(())
}

/// Flip [`SHUTDOWN_SIGNAL`] on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
        let interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt());

        let (mut sigterm, mut sigint) = match (terminate, interrupt) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
