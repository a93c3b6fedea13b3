// src/coerce.rs - Driver row decoding and amount coercion
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// A single column value as it came off the wire, before any report-level
/// interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Json(JsonValue),
}

static NULL_VALUE: RawValue = RawValue::Null;

/// Converts any raw value into a monetary amount. Never fails: values that
/// cannot be read as a number become `0.0` and are logged.
pub fn coerce_to_amount(value: &RawValue) -> f64 {
    match value {
        RawValue::Float(v) => *v,
        RawValue::Int(v) => *v as f64,
        RawValue::Text(s) => parse_or_zero(s),
        RawValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => parse_or_zero(s),
            Err(_) => {
                log::warn!("Amount column holds {} non-UTF-8 bytes, using 0", bytes.len());
                0.0
            }
        },
        RawValue::Json(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        RawValue::Json(JsonValue::String(s)) => parse_or_zero(s),
        RawValue::Null => {
            log::warn!("Amount column is NULL, using 0");
            0.0
        }
        other => {
            log::warn!("Unsupported amount value {:?}, using 0", other);
            0.0
        }
    }
}

fn parse_or_zero(s: &str) -> f64 {
    match parse_numeric_prefix(s) {
        Some(v) => v,
        None => {
            log::warn!("Cannot read amount from {:?}, using 0", s);
            0.0
        }
    }
}

/// Reads the longest leading decimal number from `s`, skipping leading
/// whitespace and ignoring whatever follows it. An exponent is only taken
/// when at least one digit follows the `e`.
pub fn parse_numeric_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }

    if digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

/// One decoded result row. Columns keep their select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    columns: Vec<(String, RawValue)>,
}

// Tries each typed decode in turn and returns the first one that succeeds.
macro_rules! first_decoded {
    ($row:expr, $idx:expr; $($ty:ty => $wrap:expr),+ $(,)?) => {
        $(
            if let Ok(v) = $row.try_get::<$ty, _>($idx) {
                return $wrap(v);
            }
        )+
    };
}

macro_rules! fallback_decoded {
    ($row:expr, $idx:expr) => {
        if let Ok(v) = $row.try_get_unchecked::<String, _>($idx) {
            return RawValue::Text(v);
        }
        if let Ok(v) = $row.try_get_unchecked::<Vec<u8>, _>($idx) {
            return RawValue::Bytes(v);
        }
        return RawValue::Null;
    };
}

fn is_temporal(type_name: &str) -> bool {
    matches!(
        type_name.to_ascii_uppercase().as_str(),
        "DATE" | "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "TIME"
    )
}

fn is_json(type_name: &str) -> bool {
    matches!(type_name.to_ascii_uppercase().as_str(), "JSON" | "JSONB")
}

/// `BIGINT UNSIGNED` values past `i64::MAX` become floats instead of wrapping.
fn from_unsigned(v: u64) -> RawValue {
    i64::try_from(v)
        .map(RawValue::Int)
        .unwrap_or(RawValue::Float(v as f64))
}

fn decode_mysql(row: &MySqlRow, idx: usize) -> RawValue {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => raw.type_info().name().to_string(),
        _ => return RawValue::Null,
    };

    if is_json(&type_name) {
        if let Ok(v) = row.try_get::<JsonValue, _>(idx) {
            return RawValue::Json(v);
        }
    }

    first_decoded!(row, idx;
        i64 => RawValue::Int,
        u64 => from_unsigned,
        f64 => RawValue::Float,
        f32 => |v: f32| RawValue::Float(v as f64),
        Decimal => |v: Decimal| RawValue::Text(v.to_string()),
        NaiveDate => RawValue::Date,
        NaiveDateTime => RawValue::DateTime,
    );

    // Zero dates ("0000-00-00") do not decode into chrono types.
    if is_temporal(&type_name) {
        return RawValue::Null;
    }

    fallback_decoded!(row, idx);
}

fn decode_postgres(row: &PgRow, idx: usize) -> RawValue {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => raw.type_info().name().to_string(),
        _ => return RawValue::Null,
    };

    if is_json(&type_name) {
        if let Ok(v) = row.try_get::<JsonValue, _>(idx) {
            return RawValue::Json(v);
        }
    }

    first_decoded!(row, idx;
        i64 => RawValue::Int,
        i32 => |v: i32| RawValue::Int(v as i64),
        i16 => |v: i16| RawValue::Int(v as i64),
        f64 => RawValue::Float,
        f32 => |v: f32| RawValue::Float(v as f64),
        Decimal => |v: Decimal| RawValue::Text(v.to_string()),
        NaiveDate => RawValue::Date,
        NaiveDateTime => RawValue::DateTime,
        bool => |v: bool| RawValue::Int(v as i64),
    );

    if is_temporal(&type_name) {
        return RawValue::Null;
    }

    fallback_decoded!(row, idx);
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by in-memory stores.
    pub fn with(mut self, name: &str, value: RawValue) -> Self {
        self.columns.push((name.to_string(), value));
        self
    }

    pub fn from_mysql(row: &MySqlRow) -> Self {
        let columns = row
            .columns()
            .iter()
            .map(|col| (col.name().to_string(), decode_mysql(row, col.ordinal())))
            .collect();
        Self { columns }
    }

    pub fn from_postgres(row: &PgRow) -> Self {
        let columns = row
            .columns()
            .iter()
            .map(|col| (col.name().to_string(), decode_postgres(row, col.ordinal())))
            .collect();
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Missing columns read as NULL.
    pub fn get(&self, name: &str) -> &RawValue {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, v)| v)
            .unwrap_or(&NULL_VALUE)
    }

    pub fn get_index(&self, idx: usize) -> &RawValue {
        self.columns.get(idx).map(|(_, v)| v).unwrap_or(&NULL_VALUE)
    }

    pub fn opt_text(&self, name: &str) -> Option<String> {
        value_as_text(self.get(name))
    }

    pub fn text(&self, name: &str) -> String {
        self.opt_text(name).unwrap_or_default()
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.get(name) {
            RawValue::Date(d) => Some(*d),
            RawValue::DateTime(dt) => Some(dt.date()),
            RawValue::Text(s) => parse_date_prefix(s),
            RawValue::Bytes(b) => std::str::from_utf8(b).ok().and_then(parse_date_prefix),
            _ => None,
        }
    }

    pub fn amount(&self, name: &str) -> f64 {
        coerce_to_amount(self.get(name))
    }

    pub fn int(&self, name: &str) -> i64 {
        match self.get(name) {
            RawValue::Int(v) => *v,
            RawValue::Float(v) => *v as i64,
            other => coerce_to_amount(other) as i64,
        }
    }
}

pub fn value_as_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Null => None,
        RawValue::Int(v) => Some(v.to_string()),
        RawValue::Float(v) => Some(v.to_string()),
        RawValue::Text(s) => Some(s.clone()),
        RawValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        RawValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        RawValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        RawValue::Json(JsonValue::String(s)) => Some(s.clone()),
        RawValue::Json(v) => Some(v.to_string()),
    }
}

fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    s.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn test_canonical_inputs() {
        assert!(approx(coerce_to_amount(&RawValue::Text("123.45".into())), 123.45));
        assert!(approx(coerce_to_amount(&RawValue::Float(123.45)), 123.45));
        assert!(approx(coerce_to_amount(&RawValue::Bytes(b"123.45".to_vec())), 123.45));
        assert_eq!(coerce_to_amount(&RawValue::Null), 0.0);
    }

    #[test]
    fn test_integers_and_json() {
        assert_eq!(coerce_to_amount(&RawValue::Int(-42)), -42.0);
        assert!(approx(coerce_to_amount(&RawValue::Json(json!(10.5))), 10.5));
        assert_eq!(coerce_to_amount(&RawValue::Json(json!({"a": 1}))), 0.0);
        assert_eq!(coerce_to_amount(&RawValue::Json(json!([1, 2]))), 0.0);
    }

    #[test]
    fn test_unsigned_beyond_i64_stays_positive() {
        assert_eq!(from_unsigned(5), RawValue::Int(5));
        assert_eq!(from_unsigned(i64::MAX as u64), RawValue::Int(i64::MAX));

        let big = from_unsigned(u64::MAX);
        assert!(matches!(big, RawValue::Float(_)));
        assert!(approx(coerce_to_amount(&big), u64::MAX as f64));
    }

    #[test]
    fn test_unrecognized_shapes_are_zero() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(coerce_to_amount(&RawValue::Date(date)), 0.0);
        assert_eq!(coerce_to_amount(&RawValue::Text("abc".into())), 0.0);
        assert_eq!(coerce_to_amount(&RawValue::Text("".into())), 0.0);
        assert_eq!(coerce_to_amount(&RawValue::Bytes(vec![0xff, 0xfe])), 0.0);
    }

    #[test]
    fn test_numeric_prefix_scan() {
        assert_eq!(parse_numeric_prefix("  42"), Some(42.0));
        assert_eq!(parse_numeric_prefix("12.5abc"), Some(12.5));
        assert_eq!(parse_numeric_prefix("-3.25"), Some(-3.25));
        assert_eq!(parse_numeric_prefix("+7"), Some(7.0));
        assert_eq!(parse_numeric_prefix(".5"), Some(0.5));
        assert_eq!(parse_numeric_prefix("5."), Some(5.0));
        assert_eq!(parse_numeric_prefix("1e3"), Some(1000.0));
        assert_eq!(parse_numeric_prefix("2e"), Some(2.0));
        assert_eq!(parse_numeric_prefix("2e+x"), Some(2.0));
        assert_eq!(parse_numeric_prefix("1.5E-1 IDR"), Some(0.15));
        assert_eq!(parse_numeric_prefix("-"), None);
        assert_eq!(parse_numeric_prefix("."), None);
        assert_eq!(parse_numeric_prefix("Rp 100"), None);
    }

    #[test]
    fn test_row_accessors() {
        let row = RawRow::new()
            .with("no_rawat", RawValue::Text("2024/01/05/000001".into()))
            .with("tgl_masuk", RawValue::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()))
            .with("tanggal", RawValue::Text("2024-01-07 10:30:00".into()))
            .with("totalpiutang", RawValue::Bytes(b"1500000.00".to_vec()))
            .with("jumlah", RawValue::Int(3))
            .with("tgl_keluar", RawValue::Null);

        assert_eq!(row.len(), 6);
        assert_eq!(row.text("no_rawat"), "2024/01/05/000001");
        assert_eq!(row.date("tgl_masuk"), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(row.date("tanggal"), NaiveDate::from_ymd_opt(2024, 1, 7));
        assert_eq!(row.date("tgl_keluar"), None);
        assert!(approx(row.amount("totalpiutang"), 1_500_000.0));
        assert_eq!(row.int("jumlah"), 3);
        assert_eq!(row.opt_text("tgl_keluar"), None);
        assert_eq!(row.text("missing"), "");
        assert_eq!(row.get("missing"), &RawValue::Null);
        assert_eq!(row.get_index(0), &RawValue::Text("2024/01/05/000001".into()));
    }

    #[test]
    fn test_value_as_text() {
        assert_eq!(value_as_text(&RawValue::Int(7)), Some("7".into()));
        assert_eq!(value_as_text(&RawValue::Bytes(b"sik".to_vec())), Some("sik".into()));
        assert_eq!(value_as_text(&RawValue::Json(json!("x"))), Some("x".into()));
        assert_eq!(value_as_text(&RawValue::Null), None);
    }
}
