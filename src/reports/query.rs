// src/reports/query.rs - Fixed report templates and parameter binding
use chrono::NaiveDate;
use strum::{AsRefStr, Display};

use super::{DateRange, FilterMode, ReportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum QueryKind {
    Billing,
    Receivables,
    CombinedTotals,
    FreeSale,
    Receiving,
}

/// A template together with the parameters it must be bound with, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub kind: QueryKind,
    pub sql: String,
    pub params: Vec<NaiveDate>,
}

impl BoundQuery {
    fn new(kind: QueryKind, sql: String, params: Vec<NaiveDate>) -> Self {
        debug_assert_eq!(sql.matches('?').count(), params.len());
        Self { kind, sql, params }
    }
}

const INPATIENT_SELECT: &str = r#"
    SELECT
        reg_periksa.no_rawat,
        pasien.no_rkm_medis,
        pasien.nm_pasien,
        kamar_inap.tgl_masuk,
        kamar_inap.tgl_keluar,
        nota_inap.no_nota,
        nota_inap.tanggal,
        COALESCE(SUM(detail_nota_inap.besar_bayar), 0) AS besar_bayar,
        penjab.png_jawab,
        penjab.kd_pj"#;

const INPATIENT_FROM: &str = r#"
    FROM reg_periksa
    INNER JOIN pasien ON reg_periksa.no_rkm_medis = pasien.no_rkm_medis
    INNER JOIN kamar_inap ON kamar_inap.no_rawat = reg_periksa.no_rawat
    INNER JOIN penjab ON penjab.kd_pj = reg_periksa.kd_pj
    LEFT JOIN nota_inap ON nota_inap.no_rawat = reg_periksa.no_rawat
    LEFT JOIN detail_nota_inap ON detail_nota_inap.no_rawat = reg_periksa.no_rawat"#;

const OUTPATIENT_SELECT: &str = r#"
    SELECT
        reg_periksa.no_rawat,
        pasien.no_rkm_medis,
        pasien.nm_pasien,
        reg_periksa.tgl_registrasi,
        poliklinik.nm_poli,
        nota_jalan.no_nota,
        nota_jalan.tanggal AS tgl_bayar,
        COALESCE(SUM(detail_nota_jalan.besar_bayar), 0) AS besar_bayar,
        penjab.png_jawab,
        penjab.kd_pj"#;

const OUTPATIENT_FROM: &str = r#"
    FROM reg_periksa
    INNER JOIN pasien ON reg_periksa.no_rkm_medis = pasien.no_rkm_medis
    INNER JOIN poliklinik ON poliklinik.kd_poli = reg_periksa.kd_poli
    INNER JOIN penjab ON penjab.kd_pj = reg_periksa.kd_pj
    LEFT JOIN nota_jalan ON nota_jalan.no_rawat = reg_periksa.no_rawat
    LEFT JOIN detail_nota_jalan ON detail_nota_jalan.no_rawat = reg_periksa.no_rawat"#;

const INPATIENT_BY_ENTRY: &str = "kamar_inap.tgl_masuk BETWEEN ? AND ?";
const INPATIENT_BY_EXIT: &str = "kamar_inap.tgl_keluar BETWEEN ? AND ?";
const INPATIENT_BOTH: &str =
    "(kamar_inap.tgl_masuk BETWEEN ? AND ?) OR (kamar_inap.tgl_keluar BETWEEN ? AND ?)";

const OUTPATIENT_BY_REGISTRATION: &str =
    "reg_periksa.tgl_registrasi BETWEEN ? AND ? AND reg_periksa.status_lanjut = 'Ralan'";
const OUTPATIENT_BY_PAYMENT: &str =
    "nota_jalan.tanggal BETWEEN ? AND ? AND reg_periksa.status_lanjut = 'Ralan'";
// AND binds tighter than OR: the status check only applies to the payment-date branch.
const OUTPATIENT_BOTH: &str = "(reg_periksa.tgl_registrasi BETWEEN ? AND ?) OR (nota_jalan.tanggal BETWEEN ? AND ?) AND reg_periksa.status_lanjut = 'Ralan'";

const RECEIVABLES: &str = r#"
    SELECT
        piutang_pasien.no_rawat,
        penjab.png_jawab,
        detail_piutang_pasien.nama_bayar,
        detail_piutang_pasien.totalpiutang
    FROM piutang_pasien
    INNER JOIN reg_periksa ON reg_periksa.no_rawat = piutang_pasien.no_rawat
    INNER JOIN penjab ON penjab.kd_pj = reg_periksa.kd_pj
    INNER JOIN detail_piutang_pasien ON detail_piutang_pasien.no_rawat = piutang_pasien.no_rawat
    WHERE piutang_pasien.tgl_piutang BETWEEN ? AND ?
        AND reg_periksa.status_lanjut = '{status}'"#;

const RECEIVABLES_SUM: &str = r#"
        SELECT COALESCE(SUM(detail_piutang_pasien.totalpiutang), 0)
        FROM piutang_pasien
        INNER JOIN reg_periksa ON reg_periksa.no_rawat = piutang_pasien.no_rawat
        INNER JOIN detail_piutang_pasien ON detail_piutang_pasien.no_rawat = piutang_pasien.no_rawat
        WHERE piutang_pasien.tgl_piutang BETWEEN ? AND ?
            AND reg_periksa.status_lanjut = '{status}'"#;

const FREE_SALE: &str = r#"
    SELECT
        penjualan.tgl_jual AS tanggal_penjualan,
        penjualan.nota_jual AS no_penjualan,
        SUM(detailjual.total) AS total
    FROM penjualan
    INNER JOIN detailjual ON detailjual.nota_jual = penjualan.nota_jual
    WHERE penjualan.status = 'Sudah Dibayar'
        AND penjualan.tgl_jual BETWEEN ? AND ?
    GROUP BY penjualan.nota_jual
    ORDER BY penjualan.tgl_jual DESC"#;

const RECEIVING: &str = r#"
    SELECT
        pemesanan.tgl_pesan AS tanggal_penerimaan,
        pemesanan.no_faktur AS no_penerimaan,
        datasuplier.kode_suplier AS kode_supplier,
        datasuplier.nama_suplier AS nama_supplier,
        SUM(detailpesan.jumlah * detailpesan.h_pesan) AS total
    FROM pemesanan
    INNER JOIN detailpesan ON detailpesan.no_faktur = pemesanan.no_faktur
    INNER JOIN datasuplier ON datasuplier.kode_suplier = pemesanan.kode_suplier
    WHERE pemesanan.tgl_pesan BETWEEN ? AND ?
    GROUP BY pemesanan.no_faktur
    ORDER BY pemesanan.tgl_pesan DESC"#;

/// Date predicate for a billing report. Modes that do not belong to the
/// report kind use its "both" predicate.
pub fn predicate(kind: ReportKind, mode: FilterMode) -> &'static str {
    match (kind, mode) {
        (ReportKind::RawatInap, FilterMode::ByEntryDate) => INPATIENT_BY_ENTRY,
        (ReportKind::RawatInap, FilterMode::ByExitDate) => INPATIENT_BY_EXIT,
        (ReportKind::RawatInap, _) => INPATIENT_BOTH,
        (_, FilterMode::ByRegistrationDate) => OUTPATIENT_BY_REGISTRATION,
        (_, FilterMode::ByPaymentDate) => OUTPATIENT_BY_PAYMENT,
        (_, _) => OUTPATIENT_BOTH,
    }
}

fn effective_mode(kind: ReportKind, mode: FilterMode) -> FilterMode {
    if mode.is_valid_for(kind) {
        mode
    } else {
        FilterMode::Both
    }
}

/// `(start, end)` for single-column modes, `(start, end, start, end)` for both.
pub fn mode_params(mode: FilterMode, range: &DateRange) -> Vec<NaiveDate> {
    let mut params = Vec::with_capacity(mode.param_count());
    for _ in 0..mode.param_count() / 2 {
        params.push(range.start);
        params.push(range.end);
    }
    params
}

fn billing_tables(kind: ReportKind) -> (&'static str, &'static str) {
    match kind {
        ReportKind::RawatJalan => (OUTPATIENT_SELECT, OUTPATIENT_FROM),
        _ => (INPATIENT_SELECT, INPATIENT_FROM),
    }
}

fn detail_sum_column(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::RawatJalan => "detail_nota_jalan.besar_bayar",
        _ => "detail_nota_inap.besar_bayar",
    }
}

pub fn billing(kind: ReportKind, mode: FilterMode, range: &DateRange) -> BoundQuery {
    let mode = effective_mode(kind, mode);
    let (select, from) = billing_tables(kind);
    let sql = format!(
        "{}{}\n    WHERE {}\n    GROUP BY reg_periksa.no_rawat",
        select,
        from,
        predicate(kind, mode)
    );
    BoundQuery::new(QueryKind::Billing, sql, mode_params(mode, range))
}

pub fn receivables(kind: ReportKind, range: &DateRange) -> BoundQuery {
    let status = kind.visit_status().unwrap_or("Ranap");
    BoundQuery::new(
        QueryKind::Receivables,
        RECEIVABLES.replace("{status}", status),
        vec![range.start, range.end],
    )
}

/// Both sums in one round trip. Billing parameters come first, then the
/// receivable window.
pub fn combined_totals(kind: ReportKind, mode: FilterMode, range: &DateRange) -> BoundQuery {
    let mode = effective_mode(kind, mode);
    let (_, from) = billing_tables(kind);
    let status = kind.visit_status().unwrap_or("Ranap");

    let sql = format!(
        "SELECT\n    (\n        SELECT COALESCE(SUM({}), 0){}\n        WHERE {}\n    ) AS total_bayar,\n    ({}\n    ) AS total_piutang",
        detail_sum_column(kind),
        from,
        predicate(kind, mode),
        RECEIVABLES_SUM.replace("{status}", status),
    );

    let mut params = mode_params(mode, range);
    params.push(range.start);
    params.push(range.end);
    BoundQuery::new(QueryKind::CombinedTotals, sql, params)
}

pub fn free_sales(range: &DateRange) -> BoundQuery {
    BoundQuery::new(QueryKind::FreeSale, FREE_SALE.to_string(), vec![range.start, range.end])
}

pub fn receiving(range: &DateRange) -> BoundQuery {
    BoundQuery::new(QueryKind::Receiving, RECEIVING.to_string(), vec![range.start, range.end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
    }

    fn placeholders(q: &BoundQuery) -> usize {
        q.sql.matches('?').count()
    }

    #[test]
    fn test_param_count_matches_template() {
        let r = range();
        for (kind, modes) in [
            (ReportKind::RawatInap, [FilterMode::ByEntryDate, FilterMode::ByExitDate, FilterMode::Both]),
            (ReportKind::RawatJalan, [FilterMode::ByRegistrationDate, FilterMode::ByPaymentDate, FilterMode::Both]),
        ] {
            for mode in modes {
                let q = billing(kind, mode, &r);
                assert_eq!(placeholders(&q), q.params.len(), "{} {}", kind, mode);
                assert_eq!(q.params.len(), mode.param_count());

                let c = combined_totals(kind, mode, &r);
                assert_eq!(placeholders(&c), c.params.len());
                assert_eq!(c.params.len(), mode.param_count() + 2);
            }
        }
    }

    #[test]
    fn test_both_mode_binds_range_twice() {
        let r = range();
        let q = billing(ReportKind::RawatInap, FilterMode::Both, &r);
        assert_eq!(q.params, vec![r.start, r.end, r.start, r.end]);
        assert!(q.sql.contains(INPATIENT_BOTH));
        assert!(q.sql.contains("GROUP BY reg_periksa.no_rawat"));
        assert_eq!(q.kind, QueryKind::Billing);
    }

    #[test]
    fn test_single_column_modes() {
        let r = range();
        let q = billing(ReportKind::RawatInap, FilterMode::ByExitDate, &r);
        assert_eq!(q.params, vec![r.start, r.end]);
        assert!(q.sql.contains("WHERE kamar_inap.tgl_keluar BETWEEN ? AND ?"));

        let q = billing(ReportKind::RawatJalan, FilterMode::ByPaymentDate, &r);
        assert!(q.sql.contains("WHERE nota_jalan.tanggal BETWEEN ? AND ? AND reg_periksa.status_lanjut = 'Ralan'"));
    }

    #[test]
    fn test_outpatient_both_keeps_operator_precedence() {
        let q = billing(ReportKind::RawatJalan, FilterMode::Both, &range());
        assert!(q.sql.contains(
            "WHERE (reg_periksa.tgl_registrasi BETWEEN ? AND ?) OR (nota_jalan.tanggal BETWEEN ? AND ?) AND reg_periksa.status_lanjut = 'Ralan'"
        ));
        assert!(!q.sql.contains("((reg_periksa.tgl_registrasi"));
    }

    #[test]
    fn test_foreign_mode_falls_back_to_both() {
        let r = range();
        let q = billing(ReportKind::RawatInap, FilterMode::ByPaymentDate, &r);
        assert!(q.sql.contains(INPATIENT_BOTH));
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn test_receivables_filter_by_visit_status() {
        let r = range();
        let inap = receivables(ReportKind::RawatInap, &r);
        assert!(inap.sql.contains("piutang_pasien.tgl_piutang BETWEEN ? AND ?"));
        assert!(inap.sql.contains("status_lanjut = 'Ranap'"));
        assert_eq!(inap.params, vec![r.start, r.end]);

        let jalan = receivables(ReportKind::RawatJalan, &r);
        assert!(jalan.sql.contains("status_lanjut = 'Ralan'"));
        assert_eq!(jalan.kind, QueryKind::Receivables);
    }

    #[test]
    fn test_combined_totals_param_order() {
        let r = range();
        let q = combined_totals(ReportKind::RawatJalan, FilterMode::ByRegistrationDate, &r);
        assert_eq!(q.params, vec![r.start, r.end, r.start, r.end]);
        assert!(q.sql.contains("AS total_bayar"));
        assert!(q.sql.contains("AS total_piutang"));
        assert!(q.sql.contains("SUM(detail_nota_jalan.besar_bayar)"));
        let billing_pos = q.sql.find("tgl_registrasi BETWEEN").unwrap();
        let receivable_pos = q.sql.find("tgl_piutang BETWEEN").unwrap();
        assert!(billing_pos < receivable_pos);
    }

    #[test]
    fn test_pharmacy_templates() {
        let r = range();
        let sale = free_sales(&r);
        assert!(sale.sql.contains("penjualan.status = 'Sudah Dibayar'"));
        assert!(sale.sql.contains("ORDER BY penjualan.tgl_jual DESC"));
        assert_eq!(sale.params.len(), 2);

        let recv = receiving(&r);
        assert!(recv.sql.contains("SUM(detailpesan.jumlah * detailpesan.h_pesan) AS total"));
        assert!(recv.sql.contains("GROUP BY pemesanan.no_faktur"));
        assert_eq!(recv.kind, QueryKind::Receiving);
    }
}
