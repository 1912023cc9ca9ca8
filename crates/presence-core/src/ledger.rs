//! Append-only attendance log.
//!
//! The on-disk format is a CSV file with the header `Name,Date,Time`, dates
//! as `YYYY-MM-DD` and times as 24-hour `HH:MM:SS`. Records are never
//! rewritten. Every dedup decision re-reads the file under an exclusive
//! advisory lock, so several kiosks may share one ledger.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use fs2::FileExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HEADER: [&str; 3] = ["Name", "Date", "Time"];
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    fn from_row(row: &csv::StringRecord) -> Option<Self> {
        let name = row.get(0)?.to_string();
        let date = NaiveDate::parse_from_str(row.get(1)?.trim(), DATE_FORMAT).ok()?;
        let time = NaiveTime::parse_from_str(row.get(2)?.trim(), TIME_FORMAT).ok()?;
        Some(Self { name, date, time })
    }
}

/// Handle to the ledger file. Holds no cached records.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open (and if needed initialize) the ledger at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        ledger.ensure_initialized()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with its header if it is missing or empty.
    /// A no-op for an initialized ledger.
    pub fn ensure_initialized(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        let file = self.open_locked_for_append()?;
        let result = self.write_header_if_empty(&file);
        let _ = file.unlock();
        result
    }

    /// Record `name` as present on the date of `at`.
    ///
    /// Returns `true` if a record was appended, `false` if one already
    /// existed for that name and date. Any read fault aborts without
    /// writing: a surfaced error is preferred over a possible duplicate.
    pub fn mark_present(&self, name: &str, at: NaiveDateTime) -> Result<bool, LedgerError> {
        let date = at.date().format(DATE_FORMAT).to_string();
        let time = at.time().format(TIME_FORMAT).to_string();

        let file = self.open_locked_for_append()?;
        let result = (|| -> Result<bool, LedgerError> {
            self.write_header_if_empty(&file)?;
            (&file).seek(SeekFrom::Start(0)).map_err(|e| self.io(e))?;
            if self.contains(&file, name, &date)? {
                return Ok(false);
            }
            self.terminate_last_row(&file)?;
            self.append(&file, &[name, date.as_str(), time.as_str()])?;
            Ok(true)
        })();
        let _ = file.unlock();

        if let Ok(true) = result {
            tracing::info!(name, %date, %time, "marked attendance");
        }
        result
    }

    /// Records for `date`, earliest first.
    pub fn records_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut records: Vec<_> = self.read_all()?.into_iter().filter(|r| r.date == date).collect();
        records.sort_by_key(|r| r.time);
        Ok(records)
    }

    /// All records keyed by date, each day earliest first. Iterate with
    /// `.iter().rev()` for most-recent-day-first display.
    pub fn all_records_grouped_by_date(
        &self,
    ) -> Result<BTreeMap<NaiveDate, Vec<AttendanceRecord>>, LedgerError> {
        let mut grouped: BTreeMap<NaiveDate, Vec<AttendanceRecord>> = BTreeMap::new();
        for record in self.read_all()? {
            grouped.entry(record.date).or_default().push(record);
        }
        for day in grouped.values_mut() {
            day.sort_by_key(|r| r.time);
        }
        Ok(grouped)
    }

    fn read_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io(e)),
        };
        file.lock_shared().map_err(|e| self.io(e))?;

        let mut records = Vec::new();
        let result = self.scan(&file, |row| {
            match AttendanceRecord::from_row(row) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    path = %self.path.display(),
                    ?row,
                    "skipping malformed ledger row"
                ),
            }
            false
        });
        let _ = file.unlock();
        result.map(|_| records)
    }

    fn contains(&self, file: &File, name: &str, date: &str) -> Result<bool, LedgerError> {
        self.scan(file, |row| {
            row.len() >= 2 && row.get(0) == Some(name) && row.get(1).map(str::trim) == Some(date)
        })
    }

    /// Visit data rows until `visit` returns `true`. Rows that fail to parse
    /// are skipped; I/O faults are returned.
    fn scan(
        &self,
        file: &File,
        mut visit: impl FnMut(&csv::StringRecord) -> bool,
    ) -> Result<bool, LedgerError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        for row in reader.records() {
            match row {
                Ok(row) => {
                    if visit(&row) {
                        return Ok(true);
                    }
                }
                Err(e) if e.is_io_error() => return Err(self.csv(e)),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "skipping unparsable ledger row"
                    );
                }
            }
        }
        Ok(false)
    }

    fn open_locked_for_append(&self) -> Result<File, LedgerError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        file.lock_exclusive().map_err(|e| self.io(e))?;
        Ok(file)
    }

    fn write_header_if_empty(&self, file: &File) -> Result<(), LedgerError> {
        let len = file.metadata().map_err(|e| self.io(e))?.len();
        if len == 0 {
            self.append(file, &HEADER)?;
            tracing::info!(path = %self.path.display(), "created attendance ledger");
        }
        Ok(())
    }

    /// A log edited by hand may end without a line terminator; appending to
    /// it as is would glue the new row onto the last one.
    fn terminate_last_row(&self, mut file: &File) -> Result<(), LedgerError> {
        let len = file.metadata().map_err(|e| self.io(e))?.len();
        if len == 0 {
            return Ok(());
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).map_err(|e| self.io(e))?;
        file.read_exact(&mut last).map_err(|e| self.io(e))?;
        if last[0] != b'\n' {
            file.write_all(b"\r\n").map_err(|e| self.io(e))?;
        }
        Ok(())
    }

    fn append(&self, file: &File, fields: &[&str]) -> Result<(), LedgerError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);
        writer.write_record(fields).map_err(|e| self.csv(e))?;
        writer.flush().map_err(|e| self.io(e))
    }

    fn io(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io { path: self.path.clone(), source }
    }

    fn csv(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv { path: self.path.clone(), source }
    }
}
