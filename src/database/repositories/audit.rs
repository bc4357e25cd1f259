use super::Repository;
use crate::core::resolver::ResolutionDecision;
use crate::database::DatabaseError;
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

/// A stored resolution decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub removed_id: i64,
    pub survivor_id: i64,
    pub matched_id: i64,
    pub similarity_score: u8,
    pub distance_meters: f64,
    pub action: String,
    pub recorded_at: String,
}

impl AuditEntry {
    pub fn from_decision(decision: &ResolutionDecision) -> Self {
        Self {
            removed_id: decision.removed_id,
            survivor_id: decision.survivor_id,
            matched_id: decision.matched_id,
            similarity_score: decision.similarity_score,
            distance_meters: decision.distance_meters,
            action: String::from(decision.action),
            recorded_at: Utc::now().to_rfc3339(),
        }
    }
}

pub struct AuditRepository<'a> {
    conn: &'a Connection,
}

impl Repository for AuditRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> AuditRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        self.connection().execute(
            "INSERT INTO audit_log
                (removed_id, survivor_id, matched_id, similarity_score, distance_meters, action, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.removed_id,
                entry.survivor_id,
                entry.matched_id,
                entry.similarity_score,
                entry.distance_meters,
                entry.action,
                entry.recorded_at,
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Every entry in insertion order.
    pub fn find_all(&self) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT removed_id, survivor_id, matched_id, similarity_score, distance_meters, action, recorded_at
             FROM audit_log ORDER BY id",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(AuditEntry {
                    removed_id: row.get(0)?,
                    survivor_id: row.get(1)?,
                    matched_id: row.get(2)?,
                    similarity_score: row.get(3)?,
                    distance_meters: row.get(4)?,
                    action: row.get(5)?,
                    recorded_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn find_by_survivor(&self, survivor_id: i64) -> Result<Vec<AuditEntry>, DatabaseError> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|entry| entry.survivor_id == survivor_id)
            .collect())
    }
}
