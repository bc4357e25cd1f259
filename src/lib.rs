//! Duplicate detection and resolution for geotagged location records.

pub mod config;
pub mod core;
pub mod database;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use crate::config::{AppConfig, DetectionConfig, SinkConfig};
pub use crate::core::duplicate::{DuplicateDetector, DuplicatePair};
pub use crate::core::record::{LocationRecord, ValidationError};
pub use crate::core::resolver::{Resolution, ResolutionDecision, Resolver};
pub use crate::sink::{AuditSink, PersistOutcome, PersistenceError, Sink};
pub use crate::source::{CsvSource, RecordSource, SourceBatch, SqliteSource};
