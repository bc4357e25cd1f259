use crate::core::record::LocationRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable external key for a persisted location.
///
/// Only written next to stored records; detection never looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// BLAKE3 over `lowercase(name) + "_" + latitude + "_" + longitude`,
/// rendered as 64 lowercase hex characters.
pub fn fingerprint(name: &str, latitude: f64, longitude: f64) -> Fingerprint {
    let data = format!("{}_{}_{}", name.to_lowercase(), latitude, longitude);
    let hash = blake3::hash(data.as_bytes());
    Fingerprint(hash.to_hex().to_string())
}

pub fn fingerprint_record(record: &LocationRecord) -> Fingerprint {
    fingerprint(&record.name, record.latitude, record.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let hash = fingerprint("Kopi Kenangan Sudirman", -6.2088, 106.8456);

        // 64 hex characters for a 32-byte BLAKE3 digest
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.as_str(), hash.as_str().to_lowercase());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let first = fingerprint("Starbucks Kemang", -6.26, 106.81);
        let second = fingerprint("Starbucks Kemang", -6.26, 106.81);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fingerprint_ignores_name_case() {
        assert_eq!(
            fingerprint("STARBUCKS kemang", -6.26, 106.81),
            fingerprint("starbucks KEMANG", -6.26, 106.81)
        );
    }

    #[test]
    fn test_fingerprint_changes_with_coordinates() {
        let base = fingerprint("Fore Coffee Menteng", -6.2, 106.83);
        assert_ne!(base, fingerprint("Fore Coffee Menteng", -6.2001, 106.83));
        assert_ne!(base, fingerprint("Fore Coffee Menteng", -6.2, 106.8301));
        assert_ne!(base, fingerprint("Fore Coffee - Menteng", -6.2, 106.83));
    }

    #[test]
    fn test_fingerprint_record_matches_fields() {
        let record = LocationRecord::new(9, "Janji Jiwa CBD", -6.195, 106.82);
        assert_eq!(fingerprint_record(&record), fingerprint("janji jiwa cbd", -6.195, 106.82));
    }
}
