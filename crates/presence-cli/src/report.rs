//! Attendance report formatting.

use anyhow::bail;
use chrono::NaiveDate;
use presence_core::ledger::{DATE_FORMAT, TIME_FORMAT};
use presence_core::AttendanceRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// One day's attendance, in time order.
#[derive(Debug, Serialize)]
pub struct DayReport {
    pub date: NaiveDate,
    pub total: usize,
    pub records: Vec<AttendanceRecord>,
}

impl DayReport {
    pub fn new(date: NaiveDate, records: Vec<AttendanceRecord>) -> Self {
        Self { date, total: records.len(), records }
    }
}

/// Days most recent first.
pub fn days_descending(grouped: BTreeMap<NaiveDate, Vec<AttendanceRecord>>) -> Vec<DayReport> {
    grouped
        .into_iter()
        .rev()
        .map(|(date, records)| DayReport::new(date, records))
        .collect()
}

/// Parse a `YYYY-MM-DD` date typed by the user.
pub fn parse_date(input: &str) -> anyhow::Result<NaiveDate> {
    let input = input.trim();
    match NaiveDate::parse_from_str(input, DATE_FORMAT) {
        Ok(date) if input.len() == 10 => Ok(date),
        _ => bail!("invalid date {input:?}; expected YYYY-MM-DD"),
    }
}

pub fn format_day(day: &DayReport) -> String {
    let mut out = format!("Attendance for {}\n", day.date.format(DATE_FORMAT));
    if day.records.is_empty() {
        out.push_str("  No attendance records.\n");
        return out;
    }
    let width = day.records.iter().map(|r| r.name.chars().count()).max().unwrap_or(0).max(4);
    out.push_str(&format!("  {:<width$}  Time\n", "Name"));
    for record in &day.records {
        out.push_str(&format!("  {:<width$}  {}\n", record.name, record.time.format(TIME_FORMAT)));
    }
    out.push_str(&format!("  Total: {}\n", day.total));
    out
}

pub fn format_days(days: &[DayReport]) -> String {
    if days.is_empty() {
        return "No attendance records.\n".to_string();
    }
    days.iter().map(format_day).collect::<Vec<_>>().join("\n")
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
