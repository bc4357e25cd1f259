use crate::core::duplicate::{DetectError, DuplicateDetector, DuplicatePair};
use crate::core::record::LocationRecord;
use crate::core::resolver::{ResolveError, Resolution, Resolver};
use crate::sink::{AuditSink, PersistOutcome, PersistenceError, Sink};
use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Plain all-pairs scan.
    #[default]
    Reference,
    /// Latitude-banded parallel scan with identical verdicts.
    Bucketed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cleanup {
    pub pairs: Vec<DuplicatePair>,
    pub resolution: Resolution,
}

/// Detect duplicate pairs in `records` and resolve them.
pub fn detect_and_resolve(
    detector: &DuplicateDetector,
    records: &[LocationRecord],
    mode: ScanMode,
) -> Result<Cleanup, PipelineError> {
    let pairs = match mode {
        ScanMode::Reference => detector.detect(records)?,
        ScanMode::Bucketed => detector.detect_bucketed(records)?,
    };
    let resolution = Resolver::new().resolve(records, &pairs)?;
    Ok(Cleanup { pairs, resolution })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistSummary {
    pub outcome: PersistOutcome,
    pub records: usize,
    pub audit_entries: usize,
}

impl PersistSummary {
    pub fn is_degraded(&self) -> bool {
        self.outcome.is_degraded()
    }
}

/// Swap in the cleaned records together with their audit trail.
pub fn persist<P: Sink, F: Sink>(
    sink: &mut AuditSink<P, F>,
    resolution: &Resolution,
) -> Result<PersistSummary, PipelineError> {
    let outcome = sink.commit(&resolution.cleaned, &resolution.decisions)?;

    let summary = PersistSummary {
        outcome,
        records: resolution.cleaned.len(),
        audit_entries: resolution.decisions.len(),
    };
    if summary.is_degraded() {
        warn!("Persistence degraded: data was written to the local fallback");
    } else {
        info!(
            "Persisted {} locations and {} audit entries",
            summary.records, summary.audit_entries
        );
    }
    Ok(summary)
}
