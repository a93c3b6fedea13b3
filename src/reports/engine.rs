// src/reports/engine.rs - Billing and receivable aggregation
use tracing::Instrument;

use super::query::{self, BoundQuery};
use super::store::ReportStore;
use super::{
    BillingRecord, BillingReport, DateRange, FilterMode, FreeSaleRecord, PharmacyReport,
    ReceivableRecord, ReceivingRecord, ReportKind, ReportTotals,
};
use crate::coerce::RawRow;
use crate::error::{ApiError, ApiResult, ErrorKind};

pub struct ReportEngine<'a> {
    store: &'a dyn ReportStore,
}

impl<'a> ReportEngine<'a> {
    pub fn new(store: &'a dyn ReportStore) -> Self {
        Self { store }
    }

    async fn required(&self, q: &BoundQuery) -> ApiResult<Vec<RawRow>> {
        self.store.fetch_rows(q).await.map_err(|e| {
            tracing::error!(error_kind = %ErrorKind::QueryFailed, query = %q.kind, error = %e, "report query failed");
            ApiError::QueryFailed(e.to_string())
        })
    }

    async fn optional(&self, q: &BoundQuery) -> Option<Vec<RawRow>> {
        match self.store.fetch_rows(q).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!(
                    error_kind = %ErrorKind::PartialDegradation,
                    query = %q.kind,
                    error = %e,
                    "secondary report query failed, continuing without it"
                );
                None
            }
        }
    }

    /// Builds an inpatient or outpatient report.
    ///
    /// The billing query must succeed. Receivables are additive: if they fail
    /// the report carries zero receivables. When the combined-totals query
    /// succeeds its sums replace the ones computed from the fetched rows,
    /// except the receivable total, which stays zero once receivables failed.
    pub async fn aggregate(
        &self,
        kind: ReportKind,
        mode: FilterMode,
        range: DateRange,
        include_receivable_detail: bool,
    ) -> ApiResult<BillingReport> {
        if !kind.has_receivables() {
            return Err(ApiError::BadRequest(format!("{} is not a billing report", kind)));
        }

        let span = tracing::info_span!(
            "billing_report",
            kind = %kind,
            mode = %mode,
            start = %range.start,
            end = %range.end,
        );

        async move {
            let billing_rows = self.required(&query::billing(kind, mode, &range)).await?;
            let billing: Vec<BillingRecord> = billing_rows
                .iter()
                .map(|row| BillingRecord::from_row(kind, row))
                .collect();

            let receivable_rows = self.optional(&query::receivables(kind, &range)).await;
            let receivables_fetched = receivable_rows.is_some();
            let receivables: Vec<ReceivableRecord> = receivable_rows
                .unwrap_or_default()
                .iter()
                .map(ReceivableRecord::from_row)
                .collect();

            let mut totals = ReportTotals {
                billing_count: billing.len(),
                billing_total: billing.iter().map(|r| r.amount).sum(),
                receivable_count: receivables.len(),
                receivable_total: receivables.iter().map(|r| r.outstanding_amount).sum(),
            };

            let combined_query = query::combined_totals(kind, mode, &range);
            match self.optional(&combined_query).await.as_deref() {
                Some([row, ..]) => {
                    totals.billing_total = row.amount("total_bayar");
                    if receivables_fetched {
                        totals.receivable_total = row.amount("total_piutang");
                    }
                }
                Some([]) => tracing::warn!(
                    error_kind = %ErrorKind::PartialDegradation,
                    query = %combined_query.kind,
                    "combined totals returned no row, keeping row sums"
                ),
                None => {}
            }

            tracing::info!(
                billing_rows = totals.billing_count,
                receivable_rows = totals.receivable_count,
                total = totals.combined(),
                "report aggregated"
            );

            Ok(BillingReport {
                kind,
                mode,
                range,
                billing,
                receivables: include_receivable_detail.then_some(receivables),
                totals,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn free_sales(&self, range: DateRange) -> ApiResult<PharmacyReport<FreeSaleRecord>> {
        let rows: Vec<FreeSaleRecord> = self
            .required(&query::free_sales(&range))
            .instrument(tracing::info_span!("pharmacy_report", kind = "penjualan_obat"))
            .await?
            .iter()
            .map(FreeSaleRecord::from_row)
            .collect();

        Ok(PharmacyReport {
            kind: ReportKind::PenjualanObat,
            range,
            total: rows.iter().map(|r| r.total).sum(),
            rows,
        })
    }

    pub async fn receiving(&self, range: DateRange) -> ApiResult<PharmacyReport<ReceivingRecord>> {
        let rows: Vec<ReceivingRecord> = self
            .required(&query::receiving(&range))
            .instrument(tracing::info_span!("pharmacy_report", kind = "penerimaan_obat"))
            .await?
            .iter()
            .map(ReceivingRecord::from_row)
            .collect();

        Ok(PharmacyReport {
            kind: ReportKind::PenerimaanObat,
            range,
            total: rows.iter().map(|r| r.total).sum(),
            rows,
        })
    }
}
