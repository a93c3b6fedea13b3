// main.rs - Server bootstrap: configuration, logging, backends and routing
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{Compress, DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use actix_web_httpauth::middleware::HttpAuthentication;
use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod auth_handlers;
mod coerce;
mod config;
mod db;
mod error;
mod monitoring;
mod report_handlers;
mod reports;

use auth::{jwt_middleware, AuthService, NewUser, Role, User};
use config::{load_config, Config, SecurityConfig};
use db::{Connections, Database};
use monitoring::{Metrics, RequestLogger};
use reports::store::ReportBackend;

const DEFAULT_ADMIN_USERNAME: &str = "admin";

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (this calls load_env_file internally)
    let config = load_config()?;
    setup_logging(&config)?;
    config.print_startup_info();

    let connections = Connections::resolve(&config).await?;

    let auth_service = Arc::new(AuthService::new(&config.auth));

    match connections.primary_handle() {
        Some(primary) => {
            db::run_migrations(primary).await?;
            create_default_admin_if_needed(primary, &auth_service).await?;
        }
        None => log::warn!(
            "Primary {} database unavailable; authentication and user routes will fail",
            connections.main_kind()
        ),
    }

    let report_backend = ReportBackend::from_database(connections.secondary_handle());
    if report_backend.store().is_err() {
        log::warn!("SIK MySQL database unavailable; report routes will fail");
    }

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics = Arc::new(Metrics::new());
    let workers = config.server.workers;
    let is_production = config.is_production();

    let connections = web::Data::new(connections);
    let report_backend = web::Data::new(report_backend);
    let auth_data = web::Data::new(auth_service);
    let config_data = web::Data::new(config);
    let metrics_data = web::Data::new(metrics.clone());

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config_data.security.allowed_origins, is_production);
        let security_headers = setup_security_headers(&config_data.security);

        App::new()
            .wrap(RequestLogger::new(metrics.clone()))
            .wrap(Compress::default())
            .wrap(Logger::default())
            .wrap(security_headers)
            .wrap(cors)
            .app_data(connections.clone())
            .app_data(report_backend.clone())
            .app_data(auth_data.clone())
            .app_data(config_data.clone())
            .app_data(metrics_data.clone())
            .app_data(auth_handlers::json_config())
            // Public routes first so the authenticated /api scope does not shadow them.
            .configure(monitoring::configure)
            .configure(report_handlers::configure)
            .configure(auth_handlers::configure_public)
            .service(
                web::scope("/api")
                    .wrap(HttpAuthentication::bearer(jwt_middleware))
                    .configure(auth_handlers::configure_protected),
            )
    });

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

/// Wildcard origins are only honoured outside production; `validate` already
/// refuses them in production configs.
fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !is_production {
        log::warn!("Using wildcard CORS (*) in development mode");
        return cors.allow_any_origin().allow_any_header().allow_any_method();
    }

    for origin in allowed_origins.iter().filter(|o| !o.is_empty() && o.as_str() != "*") {
        cors = cors.allowed_origin(origin);
    }
    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("Failed to install JSON log subscriber")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install log subscriber")?;
    }

    Ok(())
}

fn setup_security_headers(config: &SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("X-XSS-Protection", "1; mode=block"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload",
        ));
    }

    headers
}

fn generate_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

async fn create_default_admin_if_needed(
    db: &Database,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count = User::count(db)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to count users: {}", e))?;
    if user_count > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_ADMIN_PASSWORD") {
        Ok(password) if !password.is_empty() => (password, false),
        _ => (generate_password(), true),
    };

    let password_hash = auth_service
        .hash_password(&password)
        .map_err(|e| anyhow::anyhow!("Failed to hash default admin password: {}", e))?;

    User::create(
        db,
        NewUser {
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            password_hash,
            role: Role::Admin,
            name: "Administrator".to_string(),
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::warn!("Default admin user created:");
    log::warn!("  Username: {}", DEFAULT_ADMIN_USERNAME);
    if generated {
        log::warn!("  Password: {} (generated - CHANGE IMMEDIATELY!)", password);
    } else {
        log::warn!("  Password: taken from DEFAULT_ADMIN_PASSWORD");
    }

    Ok(())
}
