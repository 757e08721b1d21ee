//! Attendance ledger: one CSV row per (name, date).
//!
//! Every upsert is a full read-modify-write of the table. The file is
//! replaced atomically (temp file + rename) but not locked: a second process
//! writing the same file concurrently can still lose updates.
//!
//! The table is shared with other tools, so it is handled as raw text.
//! Extra columns and rows whose Date or Time do not parse are written back
//! untouched; only the reports skip them.

use crate::identity::{Identity, NO_ROLL_NUMBER};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Serialize, Serializer};
use std::fs::{self, File, Permissions};
use std::io;
use std::iter;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

const NAME: &str = "Name";
const ROLL_NO: &str = "RollNo";
const DATE: &str = "Date";
const TIME: &str = "Time";

/// Mode for a ledger created from scratch.
const NEW_FILE_MODE: u32 = 0o644;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("attendance file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to replace attendance file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "RollNo")]
    pub roll_no: String,
    #[serde(rename = "Date", serialize_with = "serialize_date")]
    pub date: NaiveDate,
    #[serde(rename = "Time", serialize_with = "serialize_time")]
    pub time: NaiveTime,
}

fn serialize_date<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&date.format(DATE_FORMAT))
}

fn serialize_time<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&time.format(TIME_FORMAT))
}

/// What an upsert did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// The attendance table as text: a header row and the data rows, in file
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn cell(row: &[String], column: usize) -> &str {
    row.get(column).map(|c| c.trim()).unwrap_or("")
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        self.column(name).unwrap_or_else(|| {
            self.headers.push(name.to_string());
            self.headers.len() - 1
        })
    }

    /// Apply the upsert rule.
    ///
    /// Rows are keyed by display name and date, compared as text; a match
    /// only has its time replaced, otherwise a new row is appended with the
    /// extra columns left empty.
    pub fn upsert(&mut self, identity: &Identity, timestamp: NaiveDateTime) -> Upsert {
        let date = timestamp.date().format(DATE_FORMAT).to_string();
        let time = truncate_to_seconds(timestamp.time()).format(TIME_FORMAT).to_string();

        if let (Some(name_col), Some(date_col)) = (self.column(NAME), self.column(DATE)) {
            let matches: Vec<usize> = self
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| cell(row, name_col) == identity.display_name && cell(row, date_col) == date)
                .map(|(i, _)| i)
                .collect();

            if !matches.is_empty() {
                let time_col = self.ensure_column(TIME);
                for i in matches {
                    let row = &mut self.rows[i];
                    if row.len() <= time_col {
                        row.resize(time_col + 1, String::new());
                    }
                    row[time_col] = time.clone();
                }
                return Upsert::Updated;
            }
        }

        let fields = [
            (self.ensure_column(NAME), identity.display_name.clone()),
            (self.ensure_column(ROLL_NO), identity.roll_number.clone()),
            (self.ensure_column(DATE), date),
            (self.ensure_column(TIME), time),
        ];
        let mut row = vec![String::new(); self.headers.len()];
        for (column, value) in fields {
            row[column] = value;
        }
        self.rows.push(row);
        Upsert::Inserted
    }

    /// Rows that carry a valid name, date and time. Anything else is logged
    /// and left out.
    pub fn records(&self) -> Vec<AttendanceRecord> {
        let (Some(name_col), Some(date_col), Some(time_col)) =
            (self.column(NAME), self.column(DATE), self.column(TIME))
        else {
            return Vec::new();
        };
        let roll_col = self.column(ROLL_NO);

        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let date = NaiveDate::parse_from_str(cell(row, date_col), DATE_FORMAT);
                let time = NaiveTime::parse_from_str(cell(row, time_col), TIME_FORMAT);
                let (Ok(date), Ok(time)) = (date, time) else {
                    tracing::warn!(
                        row = i + 1,
                        date = cell(row, date_col),
                        time = cell(row, time_col),
                        "skipping unreadable attendance row"
                    );
                    return None;
                };
                let roll_no = match roll_col.map(|c| cell(row, c)) {
                    Some(roll) if !roll.is_empty() => roll.to_string(),
                    _ => NO_ROLL_NUMBER.to_string(),
                };
                Some(AttendanceRecord {
                    name: cell(row, name_col).to_string(),
                    roll_no,
                    date,
                    time,
                })
            })
            .collect()
    }
}

fn truncate_to_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// CSV-backed attendance table with columns Name, RollNo, Date, Time.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw table. A missing file is an empty table.
    pub fn read_table(&self) -> Result<Table, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Table::default()),
            Err(source) => return Err(self.io_error(source)),
        };

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = reader
            .headers()
            .map_err(|e| self.csv_error(e))?
            .iter()
            .map(str::to_owned)
            .collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_owned).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()
            .map_err(|e| self.csv_error(e))?;

        Ok(Table { headers, rows })
    }

    /// Load every readable row.
    pub fn load(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.read_table()?.records())
    }

    /// Record a sighting of `identity` at `timestamp`.
    pub fn upsert(&self, identity: &Identity, timestamp: NaiveDateTime) -> Result<Upsert, LedgerError> {
        let mut table = self.read_table()?;
        let outcome = table.upsert(identity, timestamp);
        self.persist(&table)?;

        match outcome {
            Upsert::Inserted => {
                tracing::info!(name = %identity.display_name, roll_no = %identity.roll_number, "marked attendance")
            }
            Upsert::Updated => {
                tracing::info!(name = %identity.display_name, roll_no = %identity.roll_number, "updated attendance")
            }
        }
        Ok(outcome)
    }

    /// Rows for one date, in table order.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut rows = self.load()?;
        rows.retain(|r| r.date == date);
        Ok(rows)
    }

    /// Number of people recorded on `date`.
    pub fn count_on(&self, date: NaiveDate) -> Result<usize, LedgerError> {
        Ok(self.records_on(date)?.len())
    }

    /// Every row, newest first by (date, time).
    pub fn newest_first(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut rows = self.load()?;
        rows.sort_by(|a, b| (b.date, b.time).cmp(&(a.date, a.time)));
        Ok(rows)
    }

    /// Permissions the replacement file must carry: those of the current
    /// file, or `NEW_FILE_MODE` when there is none yet.
    fn target_permissions(&self) -> Result<Permissions, LedgerError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.permissions()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Permissions::from_mode(NEW_FILE_MODE)),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Write the whole table, replacing the previous file.
    fn persist(&self, table: &Table) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let permissions = self.target_permissions()?;
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|e| self.io_error(e))?;

        {
            let width = table.headers.len();
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(tmp.as_file());
            writer
                .write_record(&table.headers)
                .map_err(|e| self.csv_error(e))?;
            for row in &table.rows {
                let padding = iter::repeat("").take(width.saturating_sub(row.len()));
                writer
                    .write_record(row.iter().map(String::as_str).chain(padding))
                    .map_err(|e| self.csv_error(e))?;
            }
            writer.flush().map_err(|e| self.io_error(e))?;
        }

        tmp.persist(&self.path).map_err(|source| LedgerError::Persist {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}
