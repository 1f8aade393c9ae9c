//! Calendar helpers. Expense dates are plain `YYYY-MM-DD` days with no
//! timezone attached, so they are handled as `NaiveDate` throughout.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

const MESES: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

pub fn parse_local_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// `es-AR` short form: `17/10/2026`, `1/3/2026`.
pub fn format_local_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.day(), date.month(), date.year())
}

/// Long month label used when grouping by month: `octubre de 2026`.
pub fn month_label(date: NaiveDate) -> String {
    format!("{} de {}", MESES[date.month0() as usize], date.year())
}

pub fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
