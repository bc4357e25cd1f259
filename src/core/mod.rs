// Duplicate detection engine
// - name similarity and great-circle distance scoring
// - pairwise duplicate classification
// - earliest-wins resolution of duplicate pairs
// - identity fingerprints for persisted records

pub mod duplicate;
pub mod geo;
pub mod hash;
pub mod record;
pub mod resolver;
pub mod similarity;
