// src/reports/response.rs - JSON envelopes for report responses
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{BillingReport, DateRange, PharmacyReport, ReportKind};

const FREE_SALE_NOTE: &str =
    "Data merupakan pendapatan dari penjualan obat bebas yang sudah dibayar";
const RECEIVING_NOTE: &str =
    "Data merupakan penerimaan obat yang dikelompokkan berdasarkan nomor faktur";

fn envelope(kind: ReportKind, range: &DateRange) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("status".into(), json!("success"));
    body.insert("message".into(), json!(kind.message()));
    body.insert(
        "filter".into(),
        json!({
            "tanggal_awal": range.start_str(),
            "tanggal_akhir": range.end_str(),
        }),
    );
    body
}

fn to_array<T: Serialize>(rows: &[T]) -> Value {
    // Rows only hold strings, dates and finite numbers.
    serde_json::to_value(rows).unwrap_or_else(|e| {
        log::error!("Failed to serialize report rows: {}", e);
        Value::Array(Vec::new())
    })
}

/// Inpatient/outpatient payload. Keys are suffixed with the report kind, e.g.
/// `data_rawat_inap`. `data_piutang` is present only when detail was requested.
pub fn assemble_billing(report: &BillingReport) -> Value {
    let suffix = report.kind.as_ref();
    let totals = &report.totals;
    let mut body = envelope(report.kind, &report.range);

    body.insert(format!("data_{}", suffix), to_array(&report.billing));
    body.insert(format!("total_data_{}", suffix), json!(totals.billing_count));
    body.insert(format!("total_bayar_{}", suffix), json!(totals.billing_total));

    if let Some(receivables) = &report.receivables {
        body.insert("data_piutang".into(), to_array(receivables));
    }
    body.insert("total_data_piutang".into(), json!(totals.receivable_count));
    body.insert("total_piutang".into(), json!(totals.receivable_total));
    body.insert("total_pendapatan".into(), json!(totals.combined()));

    Value::Object(body)
}

pub fn assemble_pharmacy<T: Serialize>(report: &PharmacyReport<T>) -> Value {
    let (total_key, note) = match report.kind {
        ReportKind::PenerimaanObat => ("total_penerimaan", RECEIVING_NOTE),
        _ => ("total_penjualan", FREE_SALE_NOTE),
    };
    let mut body = envelope(report.kind, &report.range);

    body.insert("data".into(), to_array(&report.rows));
    body.insert("total_data".into(), json!(report.rows.len()));
    body.insert(total_key.into(), json!(report.total));
    body.insert("keterangan".into(), json!(note));

    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::{
        BillingRecord, FilterMode, FreeSaleRecord, ReceivableRecord, ReceivingRecord,
        ReportTotals, VisitDetail,
    };
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        )
    }

    fn report(kind: ReportKind, with_detail: bool) -> BillingReport {
        BillingReport {
            kind,
            mode: FilterMode::Both,
            range: range(),
            billing: vec![BillingRecord {
                visit_id: "2024/02/01/000001".into(),
                medical_record_id: "000001".into(),
                patient_name: "ANDI".into(),
                visit: VisitDetail::Inpatient {
                    admission_date: NaiveDate::from_ymd_opt(2024, 2, 1),
                    discharge_date: None,
                    invoice_date: None,
                },
                invoice_id: None,
                amount: 100.0,
                payer_name: Some("UMUM".into()),
                payer_code: Some("A09".into()),
            }],
            receivables: with_detail.then(|| {
                vec![ReceivableRecord {
                    visit_id: "2024/02/03/000002".into(),
                    payer_name: "BPJS".into(),
                    payment_category_name: "PIUTANG BPJS".into(),
                    outstanding_amount: 20.5,
                }]
            }),
            totals: ReportTotals {
                billing_count: 1,
                billing_total: 100.0,
                receivable_count: 1,
                receivable_total: 20.5,
            },
        }
    }

    #[test]
    fn test_inpatient_envelope() {
        let body = assemble_billing(&report(ReportKind::RawatInap, true));
        assert_eq!(body["status"], "success");
        assert_eq!(body["filter"]["tanggal_awal"], "2024-02-01");
        assert_eq!(body["filter"]["tanggal_akhir"], "2024-02-29");
        assert_eq!(body["total_data_rawat_inap"], 1);
        assert_eq!(body["data_rawat_inap"].as_array().unwrap().len(), 1);
        assert_eq!(body["total_bayar_rawat_inap"], 100.0);
        assert_eq!(body["data_piutang"][0]["totalpiutang"], 20.5);
        assert_eq!(body["total_data_piutang"], 1);
        assert_eq!(body["total_piutang"], 20.5);
        assert_eq!(body["total_pendapatan"], 120.5);
    }

    #[test]
    fn test_detail_omission_removes_only_receivable_rows() {
        let full = assemble_billing(&report(ReportKind::RawatJalan, true));
        let trimmed = assemble_billing(&report(ReportKind::RawatJalan, false));

        assert!(trimmed.get("data_piutang").is_none());
        let mut full_keys: Vec<&String> = full.as_object().unwrap().keys().collect();
        full_keys.retain(|k| k.as_str() != "data_piutang");
        let trimmed_keys: Vec<&String> = trimmed.as_object().unwrap().keys().collect();
        assert_eq!(full_keys, trimmed_keys);
        assert_eq!(full["total_piutang"], trimmed["total_piutang"]);
        assert_eq!(full["total_pendapatan"], trimmed["total_pendapatan"]);
        assert!(trimmed.get("data_rawat_jalan").is_some());
    }

    #[test]
    fn test_empty_data_is_array() {
        let mut r = report(ReportKind::RawatInap, true);
        r.billing.clear();
        r.receivables = Some(vec![]);
        let body = assemble_billing(&r);
        assert_eq!(body["data_rawat_inap"], json!([]));
        assert_eq!(body["data_piutang"], json!([]));
    }

    #[test]
    fn test_pharmacy_envelopes() {
        let sales = PharmacyReport {
            kind: ReportKind::PenjualanObat,
            range: range(),
            rows: vec![FreeSaleRecord {
                no_penjualan: "PJ1".into(),
                tanggal_penjualan: NaiveDate::from_ymd_opt(2024, 2, 5),
                total: 12.5,
            }],
            total: 12.5,
        };
        let body = assemble_pharmacy(&sales);
        assert_eq!(body["total_data"], 1);
        assert_eq!(body["total_penjualan"], 12.5);
        assert_eq!(body["data"][0]["tanggal_penjualan"], "2024-02-05");
        assert_eq!(body["keterangan"], FREE_SALE_NOTE);

        let receiving: PharmacyReport<ReceivingRecord> = PharmacyReport {
            kind: ReportKind::PenerimaanObat,
            range: range(),
            rows: vec![],
            total: 0.0,
        };
        let body = assemble_pharmacy(&receiving);
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["total_penerimaan"], 0.0);
        assert!(body.get("total_penjualan").is_none());
        assert_eq!(body["message"], "Data penerimaan obat berhasil diambil dari database");
    }
}
