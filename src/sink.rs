// Persistence of cleaned records and the audit trail
// - SqliteSink is the durable store
// - FileSink writes a CSV snapshot and an append-only JSONL audit log
// - AuditSink tries the durable store first and degrades to files

use crate::config::SinkConfig;
use crate::core::hash::fingerprint_record;
use crate::core::record::LocationRecord;
use crate::core::resolver::ResolutionDecision;
use crate::database::repositories::{AuditEntry, AuditRepository, LocationRepository};
use crate::database::{DatabaseError, establish_connection};
use crate::source::DATA_HASH_COLUMN;
use log::{info, warn};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CLEANED_FILE_NAME: &str = "cleaned_locations.csv";
pub const AUDIT_FILE_NAME: &str = "audit_log.jsonl";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Both persistence targets failed (durable: {primary}; fallback: {fallback})")]
    BothTargetsFailed { primary: String, fallback: String },
}

/// Which path a write took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Durable,
    /// The durable store failed with `reason`; the data went to `target`.
    Degraded { reason: String, target: String },
}

impl PersistOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PersistOutcome::Degraded { .. })
    }
}

/// A single persistence target.
pub trait Sink {
    /// Replace the stored record set with `records`.
    fn replace(&mut self, records: &[LocationRecord]) -> Result<(), PersistenceError>;

    fn append_audit(&mut self, decision: &ResolutionDecision) -> Result<(), PersistenceError>;

    /// Replace the records and log `decisions` as one unit. Audit entries are
    /// only written once the records are in place.
    fn commit(
        &mut self,
        records: &[LocationRecord],
        decisions: &[ResolutionDecision],
    ) -> Result<(), PersistenceError> {
        self.replace(records)?;
        for decision in decisions {
            self.append_audit(decision)?;
        }
        Ok(())
    }

    /// Human-readable location, used in logs and degraded outcomes.
    fn target(&self) -> String;
}

pub struct SqliteSink {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSink {
    pub fn open(config: &SinkConfig) -> Result<Self, PersistenceError> {
        let conn = establish_connection(&config.database_path, config.busy_timeout())?;
        Ok(Self {
            conn,
            path: config.database_path.clone(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Sink for SqliteSink {
    fn replace(&mut self, records: &[LocationRecord]) -> Result<(), PersistenceError> {
        let count = LocationRepository::new(&self.conn).replace_all(records)?;
        info!("Replaced database with {} cleaned locations", count);
        Ok(())
    }

    fn append_audit(&mut self, decision: &ResolutionDecision) -> Result<(), PersistenceError> {
        AuditRepository::new(&self.conn).append(&AuditEntry::from_decision(decision))?;
        Ok(())
    }

    /// One SQLite transaction: either the new records and every audit row
    /// are stored, or nothing is.
    fn commit(
        &mut self,
        records: &[LocationRecord],
        decisions: &[ResolutionDecision],
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction().map_err(DatabaseError::from)?;
        let count = LocationRepository::new(&tx).write_snapshot(records)?;
        let audit = AuditRepository::new(&tx);
        for decision in decisions {
            audit.append(&AuditEntry::from_decision(decision))?;
        }
        tx.commit().map_err(DatabaseError::from)?;

        info!(
            "Replaced database with {} cleaned locations ({} audit entries)",
            count,
            decisions.len()
        );
        Ok(())
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// Local flat files under one directory.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join(CLEANED_FILE_NAME)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.join(AUDIT_FILE_NAME)
    }
}

impl Sink for FileSink {
    fn replace(&mut self, records: &[LocationRecord]) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.records_path();
        let tmp = path.with_extension("csv.tmp");

        write_csv(&tmp, records)?;
        fs::rename(&tmp, &path)?;
        info!("Saved {} cleaned locations to {}", records.len(), path.display());
        Ok(())
    }

    fn append_audit(&mut self, decision: &ResolutionDecision) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_path())?;
        let entry = AuditEntry::from_decision(decision);
        writeln!(out, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    fn target(&self) -> String {
        self.dir.display().to_string()
    }
}

/// `id,name,latitude,longitude`, the union of attribute columns in sorted
/// order, then `data_hash`.
pub fn write_csv(path: &Path, records: &[LocationRecord]) -> Result<(), PersistenceError> {
    let attribute_columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.attributes.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["id", "name", "latitude", "longitude"];
    header.extend(attribute_columns.iter().copied());
    header.push(DATA_HASH_COLUMN);
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![
            record.id.to_string(),
            record.name.clone(),
            record.latitude.to_string(),
            record.longitude.to_string(),
        ];
        for column in &attribute_columns {
            row.push(record.attributes.get(*column).cloned().unwrap_or_default());
        }
        row.push(fingerprint_record(record).0);
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read a JSONL audit log, skipping malformed lines.
pub fn read_audit_log(path: &Path) -> Result<Vec<AuditEntry>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!("Skipping malformed audit entry {}: {}", i, err),
        }
    }
    Ok(entries)
}

/// Durable store with a local fallback.
///
/// Every write first goes to the primary. When that fails the same write goes
/// to the fallback and the outcome is [`PersistOutcome::Degraded`]. Only when
/// both fail does the call return an error.
pub struct AuditSink<P = SqliteSink, F = FileSink> {
    primary: Result<P, String>,
    fallback: F,
}

impl AuditSink {
    /// Open the SQLite store named in `config`. A store that cannot be opened
    /// leaves the sink degraded from the start.
    pub fn open(config: &SinkConfig) -> Self {
        let fallback = FileSink::new(&config.fallback_dir);
        match SqliteSink::open(config) {
            Ok(primary) => Self::new(primary, fallback),
            Err(e) => {
                warn!(
                    "No database connection ({}): {}",
                    config.database_path.display(),
                    e
                );
                Self::degraded(e.to_string(), fallback)
            }
        }
    }
}

impl<P: Sink, F: Sink> AuditSink<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary: Ok(primary),
            fallback,
        }
    }

    pub fn degraded(reason: impl Into<String>, fallback: F) -> Self {
        Self {
            primary: Err(reason.into()),
            fallback,
        }
    }

    pub fn primary(&self) -> Option<&P> {
        self.primary.as_ref().ok()
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    pub fn replace(&mut self, records: &[LocationRecord]) -> Result<PersistOutcome, PersistenceError> {
        self.persist(|sink| sink.replace(records))
    }

    pub fn append_audit(
        &mut self,
        decision: &ResolutionDecision,
    ) -> Result<PersistOutcome, PersistenceError> {
        self.persist(|sink| sink.append_audit(decision))
    }

    /// Store the cleaned records and their audit trail on a single target.
    pub fn commit(
        &mut self,
        records: &[LocationRecord],
        decisions: &[ResolutionDecision],
    ) -> Result<PersistOutcome, PersistenceError> {
        self.persist(|sink| sink.commit(records, decisions))
    }

    fn persist<W>(&mut self, mut write: W) -> Result<PersistOutcome, PersistenceError>
    where
        W: FnMut(&mut dyn Sink) -> Result<(), PersistenceError>,
    {
        let reason = match &mut self.primary {
            Ok(primary) => match write(primary) {
                Ok(()) => return Ok(PersistOutcome::Durable),
                Err(e) => e.to_string(),
            },
            Err(reason) => reason.clone(),
        };

        let target = self.fallback.target();
        warn!("Durable store failed ({}), writing to {} instead", reason, target);
        write(&mut self.fallback).map_err(|e| PersistenceError::BothTargetsFailed {
            primary: reason.clone(),
            fallback: e.to_string(),
        })?;

        Ok(PersistOutcome::Degraded { reason, target })
    }
}
