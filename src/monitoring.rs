// src/monitoring.rs - Health checks, backend diagnostics and request metrics
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use crate::config::{BackendKind, Config};
use crate::db::{Connections, Database};
use crate::error::method_not_allowed;

const RESPONSE_TIME_WINDOW: usize = 1000;

#[derive(Debug, Default)]
pub struct Metrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    response_times: Mutex<Vec<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, time_ms: u64) {
        if let Ok(mut times) = self.response_times.lock() {
            times.push(time_ms);
            if times.len() > RESPONSE_TIME_WINDOW {
                times.remove(0);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsResponse {
        let avg_response_time_ms = match self.response_times.lock() {
            Ok(times) if !times.is_empty() => {
                times.iter().sum::<u64>() as f64 / times.len() as f64
            }
            _ => 0.0,
        };

        MetricsResponse {
            requests_total: self.request_count.load(Ordering::Relaxed),
            errors_total: self.error_count.load(Ordering::Relaxed),
            avg_response_time_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_time_ms: f64,
}

// ======== BACKEND STATUS ========

#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub message: String,
    pub time_checked: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,
    pub db_type: String,
}

impl DatabaseStatus {
    fn down(db_type: &str, message: String) -> Self {
        Self {
            connected: false,
            message,
            time_checked: Local::now(),
            db_name: None,
            tables: None,
            db_type: db_type.to_string(),
        }
    }

    /// Pings the handle and, when it answers, lists the schema it points at.
    /// `engine` is the configured engine for this role, reported when no
    /// handle exists.
    pub async fn check(db: Option<&Database>, engine: BackendKind) -> Self {
        let Some(db) = db else {
            log::warn!("{} database handle is not available", engine);
            return Self::down(engine.as_ref(), format!("Database {} tidak tersedia", engine));
        };

        let db_type = db.kind().to_string();
        if !db.ping().await {
            return Self::down(&db_type, format!("Gagal melakukan ping ke database {}", db_type));
        }

        let db_name = match db.database_name().await {
            Ok(name) if !name.is_empty() => Some(name),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Could not read database name from {}: {}", db_type, e);
                None
            }
        };
        let tables = match db.list_tables().await {
            Ok(tables) if !tables.is_empty() => Some(tables),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Could not list tables on {}: {}", db_type, e);
                None
            }
        };

        Self {
            connected: true,
            message: format!("Koneksi database {} aktif", db_type),
            time_checked: Local::now(),
            db_name,
            tables,
            db_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub main_db_type: String,
    pub primary: DatabaseStatus,
    pub secondary: DatabaseStatus,
}

#[derive(Debug, Serialize)]
pub struct MySqlStatus {
    pub connected: bool,
    pub message: String,
    pub time_checked: DateTime<Local>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

pub async fn health_check(connections: web::Data<Connections>) -> HttpResponse {
    let response = HealthResponse {
        main_db_type: connections.main_kind().to_string(),
        primary: DatabaseStatus::check(connections.primary_handle(), connections.main_kind()).await,
        secondary: DatabaseStatus::check(connections.secondary_handle(), BackendKind::MySql).await,
    };
    HttpResponse::Ok().json(response)
}

/// Reports on the SIK MySQL handle together with the configured target.
pub async fn mysql_check(
    connections: web::Data<Connections>,
    config: web::Data<Config>,
) -> HttpResponse {
    let (connected, message) = match connections.secondary() {
        Ok(db) => {
            if db.ping().await {
                (true, "Berhasil terhubung ke database MySQL".to_string())
            } else {
                (false, "Ping database MySQL gagal".to_string())
            }
        }
        Err(e) => (false, e.to_string()),
    };

    let mysql = &config.mysql;
    HttpResponse::Ok().json(MySqlStatus {
        connected,
        message,
        time_checked: Local::now(),
        host: mysql.host.clone(),
        port: mysql.port,
        user: mysql.user.clone(),
        database: mysql.dbname.clone(),
    })
}

pub async fn metrics_endpoint(metrics: web::Data<Arc<Metrics>>) -> HttpResponse {
    HttpResponse::Ok().json(metrics.snapshot())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/health")
            .route(web::get().to(health_check))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/mysql-check")
            .route(web::get().to(mysql_check))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/health/metrics")
            .route(web::get().to(metrics_endpoint))
            .default_service(web::to(method_not_allowed)),
    );
}

// ======== REQUEST METRICS MIDDLEWARE ========

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let metrics = self.metrics.clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;
            metrics.record_response_time(start_time.elapsed().as_millis() as u64);

            match &res {
                Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
                    metrics.increment_errors();
                }
                Err(_) => metrics.increment_errors(),
                _ => {}
            }
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[::core::prelude::v1::test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().avg_response_time_ms, 0.0);

        metrics.increment_requests();
        metrics.increment_requests();
        metrics.increment_errors();
        metrics.record_response_time(10);
        metrics.record_response_time(30);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.errors_total, 1);
        assert!((snap.avg_response_time_ms - 20.0).abs() < 1e-6);
    }

    #[::core::prelude::v1::test]
    fn test_response_time_window_is_bounded() {
        let metrics = Metrics::new();
        for i in 0..(RESPONSE_TIME_WINDOW as u64 + 10) {
            metrics.record_response_time(i);
        }
        assert_eq!(metrics.response_times.lock().unwrap().len(), RESPONSE_TIME_WINDOW);
    }

    #[actix_web::test]
    async fn test_missing_handle_status() {
        let status = DatabaseStatus::check(None, BackendKind::MySql).await;
        assert!(!status.connected);
        assert_eq!(status.db_type, "mysql");
        assert_eq!(status.message, "Database mysql tidak tersedia");

        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("db_name").is_none());
        assert!(value.get("tables").is_none());
    }

    #[actix_web::test]
    async fn test_health_endpoints_without_backends() {
        let metrics = Arc::new(Metrics::new());
        let app = test::init_service(
            App::new()
                .wrap(RequestLogger::new(metrics.clone()))
                .app_data(web::Data::new(Connections::new(BackendKind::Postgres, None, None)))
                .app_data(web::Data::new(Config::default()))
                .app_data(web::Data::new(metrics.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["main_db_type"], "postgres");
        assert_eq!(body["primary"]["connected"], false);
        assert_eq!(body["primary"]["db_type"], "postgres");
        assert_eq!(body["secondary"]["connected"], false);
        assert_eq!(body["secondary"]["db_type"], "mysql");

        let req = test::TestRequest::get().uri("/api/mysql-check").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["connected"], false);
        assert_eq!(body["host"], "localhost");
        assert_eq!(body["port"], 3306);
        assert_eq!(body["database"], "sik");

        let req = test::TestRequest::post().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::METHOD_NOT_ALLOWED);

        let req = test::TestRequest::get().uri("/health/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["requests_total"].as_u64().unwrap() >= 3);
        assert_eq!(body["errors_total"], 1);
    }
}
