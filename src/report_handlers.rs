// src/report_handlers.rs
//! HTTP handlers for the financial reports (laporan).

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{method_not_allowed, ApiError, ApiResult};
use crate::reports::engine::ReportEngine;
use crate::reports::response::{assemble_billing, assemble_pharmacy};
use crate::reports::store::ReportBackend;
use crate::reports::{DateRange, FilterMode, ReportKind};

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub tanggal_awal: Option<String>,
    pub tanggal_akhir: Option<String>,
    pub filter_by: Option<String>,
    pub include_piutang: Option<String>,
}

impl ReportQuery {
    fn range(&self) -> ApiResult<DateRange> {
        DateRange::from_query(self.tanggal_awal.as_deref(), self.tanggal_akhir.as_deref())
    }

    /// Receivable rows are included unless explicitly switched off.
    fn include_receivables(&self) -> bool {
        !matches!(
            self.include_piutang.as_deref().map(str::trim),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0"
        )
    }
}

async fn billing_report(
    kind: ReportKind,
    backend: &ReportBackend,
    params: &ReportQuery,
) -> ApiResult<HttpResponse> {
    let range = params.range()?;
    let mode = FilterMode::for_report(kind, params.filter_by.as_deref());
    let store = backend.store()?;

    let report = ReportEngine::new(store)
        .aggregate(kind, mode, range, params.include_receivables())
        .await?;

    log::info!(
        "Laporan {} {}..{} ({}): {} rows, {} receivables",
        kind,
        range.start_str(),
        range.end_str(),
        mode,
        report.totals.billing_count,
        report.totals.receivable_count
    );

    Ok(HttpResponse::Ok().json(assemble_billing(&report)))
}

pub async fn laporan_rawat_inap(
    backend: web::Data<ReportBackend>,
    params: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    billing_report(ReportKind::RawatInap, &backend, &params).await
}

pub async fn laporan_rawat_jalan(
    backend: web::Data<ReportBackend>,
    params: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    billing_report(ReportKind::RawatJalan, &backend, &params).await
}

pub async fn laporan_penjualan_obat(
    backend: web::Data<ReportBackend>,
    params: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    let range = params.range()?;
    let report = ReportEngine::new(backend.store()?).free_sales(range).await?;
    log::info!("Penjualan obat {}..{}: {} rows", range.start_str(), range.end_str(), report.rows.len());
    Ok(HttpResponse::Ok().json(assemble_pharmacy(&report)))
}

pub async fn laporan_penerimaan_obat(
    backend: web::Data<ReportBackend>,
    params: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    let range = params.range()?;
    let report = ReportEngine::new(backend.store()?).receiving(range).await?;
    log::info!("Penerimaan obat {}..{}: {} rows", range.start_str(), range.end_str(), report.rows.len());
    Ok(HttpResponse::Ok().json(assemble_pharmacy(&report)))
}

/// Registers the report routes. Only GET is accepted.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .service(
        web::resource("/api/laporan/rawat-inap")
            .route(web::get().to(laporan_rawat_inap))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/laporan/rawat-jalan")
            .route(web::get().to(laporan_rawat_jalan))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/laporan/penjualan-obat")
            .route(web::get().to(laporan_penjualan_obat))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/laporan/penerimaan-obat")
            .route(web::get().to(laporan_penerimaan_obat))
            .default_service(web::to(method_not_allowed)),
    );
}
