// src/reports/mod.rs - Report data model
pub mod engine;
pub mod query;
pub mod response;
pub mod store;

use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

use crate::coerce::RawRow;
use crate::error::{ApiError, ApiResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ReportKind {
    RawatInap,
    RawatJalan,
    PenjualanObat,
    PenerimaanObat,
}

impl ReportKind {
    /// Whether the report merges patient receivables into its totals.
    pub fn has_receivables(&self) -> bool {
        matches!(self, ReportKind::RawatInap | ReportKind::RawatJalan)
    }

    /// `reg_periksa.status_lanjut` value for visits of this kind.
    pub fn visit_status(&self) -> Option<&'static str> {
        match self {
            ReportKind::RawatInap => Some("Ranap"),
            ReportKind::RawatJalan => Some("Ralan"),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ReportKind::RawatInap => "Data laporan rawat inap berhasil diambil dari database",
            ReportKind::RawatJalan => "Data laporan rawat jalan berhasil diambil dari database",
            ReportKind::PenjualanObat => "Data penjualan bebas obat berhasil diambil dari database",
            ReportKind::PenerimaanObat => "Data penerimaan obat berhasil diambil dari database",
        }
    }
}

/// Which date column(s) the range predicate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterMode {
    ByEntryDate,
    ByExitDate,
    ByPaymentDate,
    ByRegistrationDate,
    Both,
}

impl FilterMode {
    /// Maps the `filter_by` query value for a report. Anything not valid for
    /// that report, including an absent value, selects `Both`.
    pub fn for_report(kind: ReportKind, raw: Option<&str>) -> Self {
        let raw = raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
        match (kind, raw.as_str()) {
            (ReportKind::RawatInap, "tgl_masuk") => FilterMode::ByEntryDate,
            (ReportKind::RawatInap, "tgl_keluar") => FilterMode::ByExitDate,
            (ReportKind::RawatJalan, "tgl_registrasi") => FilterMode::ByRegistrationDate,
            (ReportKind::RawatJalan, "tgl_bayar") => FilterMode::ByPaymentDate,
            (_, "") | (_, "both") => FilterMode::Both,
            (_, other) => {
                log::warn!("Unknown filter_by '{}' for {}, using both", other, kind);
                FilterMode::Both
            }
        }
    }

    pub fn is_valid_for(&self, kind: ReportKind) -> bool {
        match self {
            FilterMode::Both => true,
            FilterMode::ByEntryDate | FilterMode::ByExitDate => kind == ReportKind::RawatInap,
            FilterMode::ByRegistrationDate | FilterMode::ByPaymentDate => {
                kind == ReportKind::RawatJalan
            }
        }
    }

    /// Number of bound date parameters the predicate takes.
    pub fn param_count(&self) -> usize {
        match self {
            FilterMode::Both => 4,
            _ => 2,
        }
    }
}

/// Inclusive report window. `start > end` is passed through to the query
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn first_of_month(today: NaiveDate) -> NaiveDate {
        today.with_day(1).unwrap_or(today)
    }

    pub fn last_of_month(today: NaiveDate) -> NaiveDate {
        let (year, month) = if today.month() == 12 {
            (today.year() + 1, 1)
        } else {
            (today.year(), today.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(today)
    }

    pub fn current_month(today: NaiveDate) -> Self {
        Self::new(Self::first_of_month(today), Self::last_of_month(today))
    }

    /// Builds the window from the `tanggal_awal`/`tanggal_akhir` query values.
    /// Each missing bound defaults to its edge of the current month.
    pub fn from_params(start: Option<&str>, end: Option<&str>, today: NaiveDate) -> ApiResult<Self> {
        let start = match start.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => parse_date("tanggal_awal", s)?,
            None => Self::first_of_month(today),
        };
        let end = match end.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => parse_date("tanggal_akhir", s)?,
            None => Self::last_of_month(today),
        };
        Ok(Self::new(start, end))
    }

    pub fn from_query(start: Option<&str>, end: Option<&str>) -> ApiResult<Self> {
        Self::from_params(start, end, Local::now().date_naive())
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

fn parse_date(field: &str, value: &str) -> ApiResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        ApiError::BadRequest(format!("Invalid {} '{}', expected YYYY-MM-DD", field, value))
    })
}

/// Dates that differ between inpatient and outpatient billing rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VisitDetail {
    Inpatient {
        #[serde(rename = "tgl_masuk")]
        admission_date: Option<NaiveDate>,
        #[serde(rename = "tgl_keluar")]
        discharge_date: Option<NaiveDate>,
        #[serde(rename = "tanggal")]
        invoice_date: Option<NaiveDate>,
    },
    Outpatient {
        #[serde(rename = "tgl_registrasi")]
        registration_date: Option<NaiveDate>,
        #[serde(rename = "nm_poli")]
        clinic_name: Option<String>,
        #[serde(rename = "tgl_bayar")]
        invoice_date: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingRecord {
    #[serde(rename = "no_rawat")]
    pub visit_id: String,
    #[serde(rename = "no_rkm_medis")]
    pub medical_record_id: String,
    #[serde(rename = "nm_pasien")]
    pub patient_name: String,
    #[serde(flatten)]
    pub visit: VisitDetail,
    #[serde(rename = "no_nota")]
    pub invoice_id: Option<String>,
    #[serde(rename = "besar_bayar")]
    pub amount: f64,
    #[serde(rename = "png_jawab")]
    pub payer_name: Option<String>,
    #[serde(rename = "kd_pj")]
    pub payer_code: Option<String>,
}

impl BillingRecord {
    pub fn from_row(kind: ReportKind, row: &RawRow) -> Self {
        let visit = match kind {
            ReportKind::RawatJalan => VisitDetail::Outpatient {
                registration_date: row.date("tgl_registrasi"),
                clinic_name: row.opt_text("nm_poli"),
                invoice_date: row.date("tgl_bayar"),
            },
            _ => VisitDetail::Inpatient {
                admission_date: row.date("tgl_masuk"),
                discharge_date: row.date("tgl_keluar"),
                invoice_date: row.date("tanggal"),
            },
        };

        Self {
            visit_id: row.text("no_rawat"),
            medical_record_id: row.text("no_rkm_medis"),
            patient_name: row.text("nm_pasien"),
            visit,
            invoice_id: row.opt_text("no_nota"),
            amount: row.amount("besar_bayar"),
            payer_name: row.opt_text("png_jawab"),
            payer_code: row.opt_text("kd_pj"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivableRecord {
    #[serde(rename = "no_rawat")]
    pub visit_id: String,
    #[serde(rename = "png_jawab")]
    pub payer_name: String,
    #[serde(rename = "nama_bayar")]
    pub payment_category_name: String,
    #[serde(rename = "totalpiutang")]
    pub outstanding_amount: f64,
}

impl ReceivableRecord {
    pub fn from_row(row: &RawRow) -> Self {
        Self {
            visit_id: row.text("no_rawat"),
            payer_name: row.text("png_jawab"),
            payment_category_name: row.text("nama_bayar"),
            outstanding_amount: row.amount("totalpiutang"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreeSaleRecord {
    pub no_penjualan: String,
    pub tanggal_penjualan: Option<NaiveDate>,
    pub total: f64,
}

impl FreeSaleRecord {
    pub fn from_row(row: &RawRow) -> Self {
        Self {
            no_penjualan: row.text("no_penjualan"),
            tanggal_penjualan: row.date("tanggal_penjualan"),
            total: row.amount("total"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivingRecord {
    pub no_penerimaan: String,
    pub tanggal_penerimaan: Option<NaiveDate>,
    pub kode_supplier: String,
    pub nama_supplier: String,
    pub total: f64,
}

impl ReceivingRecord {
    pub fn from_row(row: &RawRow) -> Self {
        Self {
            no_penerimaan: row.text("no_penerimaan"),
            tanggal_penerimaan: row.date("tanggal_penerimaan"),
            kode_supplier: row.text("kode_supplier"),
            nama_supplier: row.text("nama_supplier"),
            total: row.amount("total"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportTotals {
    pub billing_count: usize,
    pub billing_total: f64,
    pub receivable_count: usize,
    pub receivable_total: f64,
}

impl ReportTotals {
    pub fn combined(&self) -> f64 {
        self.billing_total + self.receivable_total
    }
}

/// Result of the inpatient/outpatient aggregation.
#[derive(Debug, Clone)]
pub struct BillingReport {
    pub kind: ReportKind,
    pub mode: FilterMode,
    pub range: DateRange,
    pub billing: Vec<BillingRecord>,
    /// `None` when receivable detail was not requested.
    pub receivables: Option<Vec<ReceivableRecord>>,
    pub totals: ReportTotals,
}

/// Result of a pharmacy listing.
#[derive(Debug, Clone)]
pub struct PharmacyReport<T> {
    pub kind: ReportKind,
    pub range: DateRange,
    pub rows: Vec<T>,
    pub total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::RawValue;
    use std::str::FromStr;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(DateRange::current_month(d(2024, 2, 1)), DateRange::new(d(2024, 2, 1), d(2024, 2, 29)));
        assert_eq!(DateRange::current_month(d(2023, 2, 14)), DateRange::new(d(2023, 2, 1), d(2023, 2, 28)));
        assert_eq!(DateRange::current_month(d(2024, 12, 31)), DateRange::new(d(2024, 12, 1), d(2024, 12, 31)));
        assert_eq!(DateRange::current_month(d(2024, 4, 1)).end, d(2024, 4, 30));
    }

    #[test]
    fn test_from_params_defaults_each_bound() {
        let today = d(2024, 3, 1);
        assert_eq!(
            DateRange::from_params(None, None, today).unwrap(),
            DateRange::new(d(2024, 3, 1), d(2024, 3, 31))
        );
        assert_eq!(
            DateRange::from_params(Some("2024-01-10"), Some(""), today).unwrap(),
            DateRange::new(d(2024, 1, 10), d(2024, 3, 31))
        );
        assert_eq!(
            DateRange::from_params(None, Some("2024-03-15"), today).unwrap(),
            DateRange::new(d(2024, 3, 1), d(2024, 3, 15))
        );
    }

    #[test]
    fn test_from_params_rejects_bad_dates() {
        let today = d(2024, 3, 1);
        assert!(matches!(
            DateRange::from_params(Some("01/03/2024"), None, today),
            Err(ApiError::BadRequest(_))
        ));
        assert!(DateRange::from_params(None, Some("2024-02-30"), today).is_err());
    }

    #[test]
    fn test_reversed_range_is_kept() {
        let range = DateRange::from_params(Some("2024-05-31"), Some("2024-05-01"), d(2024, 5, 1)).unwrap();
        assert!(range.start > range.end);
        assert_eq!(range.start_str(), "2024-05-31");
        assert_eq!(range.end_str(), "2024-05-01");
    }

    #[test]
    fn test_filter_mode_parsing() {
        use FilterMode::*;
        assert_eq!(FilterMode::for_report(ReportKind::RawatInap, Some("tgl_masuk")), ByEntryDate);
        assert_eq!(FilterMode::for_report(ReportKind::RawatInap, Some("tgl_keluar")), ByExitDate);
        assert_eq!(FilterMode::for_report(ReportKind::RawatInap, None), Both);
        assert_eq!(FilterMode::for_report(ReportKind::RawatInap, Some("both")), Both);
        assert_eq!(FilterMode::for_report(ReportKind::RawatInap, Some("tgl_bayar")), Both);
        assert_eq!(FilterMode::for_report(ReportKind::RawatJalan, Some("tgl_registrasi")), ByRegistrationDate);
        assert_eq!(FilterMode::for_report(ReportKind::RawatJalan, Some(" TGL_BAYAR ")), ByPaymentDate);
        assert_eq!(FilterMode::for_report(ReportKind::RawatJalan, Some("tgl_masuk")), Both);
        assert_eq!(FilterMode::for_report(ReportKind::RawatJalan, Some("nonsense")), Both);

        assert_eq!(Both.param_count(), 4);
        assert_eq!(ByExitDate.param_count(), 2);
        assert!(!ByEntryDate.is_valid_for(ReportKind::RawatJalan));
        assert_eq!(ByEntryDate.to_string(), "BY_ENTRY_DATE");
    }

    #[test]
    fn test_report_kind() {
        assert_eq!(ReportKind::RawatInap.to_string(), "rawat_inap");
        assert_eq!(ReportKind::from_str("penerimaan_obat").unwrap(), ReportKind::PenerimaanObat);
        assert_eq!(ReportKind::RawatJalan.visit_status(), Some("Ralan"));
        assert!(!ReportKind::PenjualanObat.has_receivables());
    }

    #[test]
    fn test_billing_record_json_shapes() {
        let row = RawRow::new()
            .with("no_rawat", RawValue::Text("2024/03/01/000001".into()))
            .with("no_rkm_medis", RawValue::Text("000123".into()))
            .with("nm_pasien", RawValue::Text("BUDI".into()))
            .with("tgl_masuk", RawValue::Date(d(2024, 3, 1)))
            .with("tgl_keluar", RawValue::Null)
            .with("no_nota", RawValue::Null)
            .with("besar_bayar", RawValue::Text("250000.00".into()));

        let inpatient = serde_json::to_value(BillingRecord::from_row(ReportKind::RawatInap, &row)).unwrap();
        assert_eq!(inpatient["no_rawat"], "2024/03/01/000001");
        assert_eq!(inpatient["tgl_masuk"], "2024-03-01");
        assert!(inpatient["tgl_keluar"].is_null());
        assert!(inpatient["no_nota"].is_null());
        assert_eq!(inpatient["besar_bayar"], 250000.0);
        assert!(inpatient.get("tgl_registrasi").is_none());

        let outpatient = serde_json::to_value(BillingRecord::from_row(ReportKind::RawatJalan, &row)).unwrap();
        assert!(outpatient.get("tgl_masuk").is_none());
        assert!(outpatient.get("tgl_registrasi").is_some());
        assert!(outpatient.get("nm_poli").is_some());
    }

    #[test]
    fn test_receivable_record_coerces_bytes() {
        let row = RawRow::new()
            .with("no_rawat", RawValue::Text("2024/03/02/000004".into()))
            .with("png_jawab", RawValue::Text("BPJS".into()))
            .with("nama_bayar", RawValue::Text("PIUTANG BPJS".into()))
            .with("totalpiutang", RawValue::Bytes(b"125000.5".to_vec()));
        let rec = ReceivableRecord::from_row(&row);
        assert!((rec.outstanding_amount - 125000.5).abs() < 1e-6);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["nama_bayar"], "PIUTANG BPJS");
        assert_eq!(json["totalpiutang"], 125000.5);
    }
}
