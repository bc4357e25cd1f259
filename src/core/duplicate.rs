// Duplicate detection over location records
// - every unordered pair is scored on name similarity and haversine distance
// - a pair is a duplicate only when both scores pass their thresholds
// - pairs are reported in scan order (ascending i, then ascending j)

use crate::config::DetectionConfig;
use crate::core::geo::{self, METERS_PER_DEGREE};
use crate::core::record::LocationRecord;
use crate::core::similarity;
use indicatif::ProgressBar;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Relative widening of latitude bands so float error in the haversine
/// result can never move a qualifying pair two bands apart.
const BAND_SLACK: f64 = 1e-4;
const BAND_FLOOR_DEGREES: f64 = 1e-9;
/// Above this band height the blocking no longer prunes anything useful.
const MAX_BAND_DEGREES: f64 = 60.0;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("Detection cancelled")]
    Cancelled,
}

/// Two records judged to describe the same place. `id_a` was scanned first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub id_a: i64,
    pub id_b: i64,
    pub similarity_score: u8,
    /// Rounded to two decimals; the verdict used the exact value.
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub records: usize,
    pub comparisons: usize,
    pub pairs: usize,
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} comparisons, {} duplicate pairs",
            self.records, self.comparisons, self.pairs
        )
    }
}

pub struct DuplicateDetector {
    config: DetectionConfig,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
}

impl DuplicateDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Advance `bar` once per outer record. Purely informational.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// The verdict: both thresholds inclusive, both required.
    pub fn is_duplicate(&self, similarity_score: u8, distance_meters: f64) -> bool {
        similarity_score >= self.config.name_threshold
            && distance_meters <= self.config.distance_threshold_meters
    }

    /// Score one pair and return it if it is a duplicate.
    pub fn compare(&self, a: &LocationRecord, b: &LocationRecord) -> Option<DuplicatePair> {
        let similarity_score = similarity::score(&a.name, &b.name);
        // Skip the trigonometry when the name already disqualifies the pair
        if similarity_score < self.config.name_threshold {
            return None;
        }

        let distance = geo::distance(a.latitude, a.longitude, b.latitude, b.longitude);
        if !self.is_duplicate(similarity_score, distance) {
            return None;
        }

        debug!(
            "Duplicate: {:?} vs {:?} (similarity {}%, distance {:.1}m)",
            a.name, b.name, similarity_score, distance
        );

        Some(DuplicatePair {
            id_a: a.id,
            id_b: b.id,
            similarity_score,
            distance_meters: geo::round_meters(distance),
        })
    }

    /// Reference all-pairs scan: `n * (n - 1) / 2` comparisons.
    pub fn detect(&self, records: &[LocationRecord]) -> Result<Vec<DuplicatePair>, DetectError> {
        let n = records.len();
        let mut stats = ScanStats {
            records: n,
            ..ScanStats::default()
        };
        info!("Checking {} combinations", n * n.saturating_sub(1) / 2);
        self.start_progress(n);

        let mut pairs = Vec::new();
        for i in 0..n {
            if self.is_cancelled() {
                self.abandon_progress();
                return Err(DetectError::Cancelled);
            }
            for j in (i + 1)..n {
                stats.comparisons += 1;
                if let Some(pair) = self.compare(&records[i], &records[j]) {
                    pairs.push(pair);
                }
            }
            self.tick_progress();
        }

        stats.pairs = pairs.len();
        self.finish_progress();
        info!("Detection finished: {}", stats);
        Ok(pairs)
    }

    /// Latitude-banded, parallel scan producing exactly the pairs of
    /// [`detect`](Self::detect), in the same order.
    ///
    /// A pair within the distance threshold can never be more than one band
    /// apart: the great-circle distance is at least the meridian arc between
    /// the two latitudes. Each worker reads the records immutably and returns
    /// pairs tagged with their `(i, j)` scan position; the tags restore the
    /// canonical order after the merge.
    pub fn detect_bucketed(
        &self,
        records: &[LocationRecord],
    ) -> Result<Vec<DuplicatePair>, DetectError> {
        let Some(height) = self.band_height_degrees() else {
            debug!("Band height degenerate, using the reference scan");
            return self.detect(records);
        };

        let n = records.len();
        let band_of: Vec<i64> = records
            .iter()
            .map(|r| (r.latitude / height).floor() as i64)
            .collect();

        // Indices within each band stay ascending
        let mut bands: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, band) in band_of.iter().enumerate() {
            bands.entry(*band).or_default().push(i);
        }

        info!(
            "Checking {} records across {} latitude bands ({:.6}° each)",
            n,
            bands.len(),
            height
        );
        self.start_progress(n);

        let per_record: Vec<(usize, Vec<(usize, usize, DuplicatePair)>)> = (0..n)
            .into_par_iter()
            .map(|i| {
                if self.is_cancelled() {
                    return (0, Vec::new());
                }

                let mut candidates: Vec<usize> = Vec::new();
                for band in (band_of[i] - 1)..=(band_of[i] + 1) {
                    if let Some(members) = bands.get(&band) {
                        let start = members.partition_point(|&j| j <= i);
                        candidates.extend_from_slice(&members[start..]);
                    }
                }
                candidates.sort_unstable();

                let found = candidates
                    .iter()
                    .filter_map(|&j| {
                        self.compare(&records[i], &records[j])
                            .map(|pair| (i, j, pair))
                    })
                    .collect();

                self.tick_progress();
                (candidates.len(), found)
            })
            .collect();

        if self.is_cancelled() {
            self.abandon_progress();
            return Err(DetectError::Cancelled);
        }

        let mut stats = ScanStats {
            records: n,
            ..ScanStats::default()
        };
        let mut tagged = Vec::new();
        for (comparisons, found) in per_record {
            stats.comparisons += comparisons;
            tagged.extend(found);
        }
        tagged.sort_unstable_by_key(|(i, j, _)| (*i, *j));

        let pairs: Vec<DuplicatePair> = tagged.into_iter().map(|(_, _, pair)| pair).collect();
        stats.pairs = pairs.len();
        self.finish_progress();
        info!("Detection finished: {}", stats);
        Ok(pairs)
    }

    fn band_height_degrees(&self) -> Option<f64> {
        let height = self.config.distance_threshold_meters / METERS_PER_DEGREE * (1.0 + BAND_SLACK)
            + BAND_FLOOR_DEGREES;
        (height < MAX_BAND_DEGREES).then_some(height)
    }

    fn start_progress(&self, len: usize) {
        if let Some(bar) = &self.progress {
            bar.set_length(len as u64);
            bar.set_position(0);
        }
    }

    fn tick_progress(&self) {
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
    }

    fn finish_progress(&self) {
        if let Some(bar) = &self.progress {
            bar.finish_with_message("Scan complete");
        }
    }

    fn abandon_progress(&self) {
        if let Some(bar) = &self.progress {
            bar.abandon_with_message("Scan cancelled");
        }
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}
