use crate::core::record::{LocationRecord, ValidationError, partition_valid};
use crate::database::repositories::LocationRepository;
use crate::database::{DatabaseError, establish_connection};
use log::{info, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Columns with a fixed meaning; every other column is passed through.
const ID_COLUMN: &str = "id";
const NAME_COLUMN: &str = "name";
const LATITUDE_COLUMN: &str = "latitude";
const LONGITUDE_COLUMN: &str = "longitude";
/// Written by the sinks, recomputed on every save.
pub const DATA_HASH_COLUMN: &str = "data_hash";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Valid records in source order plus one error per rejected record.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub records: Vec<LocationRecord>,
    pub rejected: Vec<ValidationError>,
}

impl SourceBatch {
    /// Validate raw records, keeping earlier rejections such as parse failures.
    pub fn from_raw(raw: Vec<LocationRecord>, mut rejected: Vec<ValidationError>) -> Self {
        let (records, invalid) = partition_valid(raw);
        rejected.extend(invalid);
        for error in &rejected {
            warn!("Skipping record: {}", error);
        }
        Self { records, rejected }
    }
}

/// An ordered snapshot of location records.
pub trait RecordSource {
    fn load(&mut self) -> Result<SourceBatch, SourceError>;
}

/// A CSV file with `id,name,latitude,longitude` plus pass-through columns.
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for CsvSource {
    fn load(&mut self) -> Result<SourceBatch, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::FileNotFound(self.path.display().to_string()));
        }
        let file = File::open(&self.path)?;
        let batch = read_csv(BufReader::new(file))?;
        info!(
            "Loaded {} locations from {} ({} rejected)",
            batch.records.len(),
            self.path.display(),
            batch.rejected.len()
        );
        Ok(batch)
    }
}

pub fn read_csv<R: Read>(reader: R) -> Result<SourceBatch, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let column = |name: &str| -> Result<usize, SourceError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SourceError::MissingColumn(name.to_string()))
    };
    let id_idx = column(ID_COLUMN)?;
    let name_idx = column(NAME_COLUMN)?;
    let lat_idx = column(LATITUDE_COLUMN)?;
    let lon_idx = column(LONGITUDE_COLUMN)?;

    let mut raw = Vec::new();
    let mut rejected = Vec::new();

    for (i, result) in reader.records().enumerate() {
        // Header is line 1
        let row = i + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                rejected.push(ValidationError::Malformed {
                    row,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let field = |idx: usize| record.get(idx).unwrap_or("").trim();
        let parsed = (|| -> Result<LocationRecord, String> {
            let id = field(id_idx)
                .parse::<i64>()
                .map_err(|e| format!("invalid id {:?}: {}", field(id_idx), e))?;
            let latitude = field(lat_idx)
                .parse::<f64>()
                .map_err(|e| format!("invalid latitude {:?}: {}", field(lat_idx), e))?;
            let longitude = field(lon_idx)
                .parse::<f64>()
                .map_err(|e| format!("invalid longitude {:?}: {}", field(lon_idx), e))?;
            Ok(LocationRecord::new(id, field(name_idx), latitude, longitude))
        })();

        match parsed {
            Ok(mut location) => {
                for (idx, header) in headers.iter().enumerate() {
                    if [id_idx, name_idx, lat_idx, lon_idx].contains(&idx) || header == DATA_HASH_COLUMN {
                        continue;
                    }
                    // Empty cells mean "no value" for this record
                    if let Some(value) = record.get(idx).filter(|v| !v.is_empty()) {
                        location.attributes.insert(header.clone(), value.to_string());
                    }
                }
                raw.push(location);
            }
            Err(message) => rejected.push(ValidationError::Malformed { row, message }),
        }
    }

    Ok(SourceBatch::from_raw(raw, rejected))
}

/// The `locations` table joined with `prices` and `social_metrics`.
pub struct SqliteSource {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteSource {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }
}

impl RecordSource for SqliteSource {
    fn load(&mut self) -> Result<SourceBatch, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::FileNotFound(self.path.display().to_string()));
        }
        let conn = establish_connection(&self.path, self.busy_timeout)?;
        let raw = LocationRepository::new(&conn).find_all_with_metrics()?;
        info!("Loaded {} locations from {}", raw.len(), self.path.display());
        Ok(SourceBatch::from_raw(raw, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
id,name,latitude,longitude,address,rating,data_hash
1,Kopi Kenangan Sudirman,-6.2088,106.8456,Jl. Sudirman No. 12,4.6,abc
2,Kopi Kenangan - Sudirman,-6.2089,106.8457,Jl. Sudirman No. 14,4.5,def
";

    #[test]
    fn test_read_csv() {
        let batch = read_csv(SAMPLE.as_bytes()).unwrap();

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.records.len(), 2);
        let first = &batch.records[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.name, "Kopi Kenangan Sudirman");
        assert_eq!(first.latitude, -6.2088);
        assert_eq!(first.longitude, 106.8456);
        assert_eq!(first.attributes.get("address").map(String::as_str), Some("Jl. Sudirman No. 12"));
        assert_eq!(first.attributes.get("rating").map(String::as_str), Some("4.6"));
        assert!(!first.attributes.contains_key(DATA_HASH_COLUMN));
    }

    #[test]
    fn test_bad_rows_are_rejected_individually() {
        let content = "\
id,name,latitude,longitude
1,Starbucks Kemang,-6.26,106.81
x,Starbucks Kemang Raya,-6.2601,106.8101
3,,-6.2,106.8
4,Fore Coffee Menteng,-95.0,106.83
5,Anomali Coffee Senayan,-6.22,not-a-number
6,Janji Jiwa CBD,-6.195,106.82
";
        let batch = read_csv(content.as_bytes()).unwrap();

        assert_eq!(batch.records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 6]);
        assert_eq!(batch.rejected.len(), 4);
        assert!(matches!(batch.rejected[0], ValidationError::Malformed { row: 3, .. }));
        assert!(matches!(batch.rejected[1], ValidationError::Malformed { row: 6, .. }));
        assert_eq!(batch.rejected[2], ValidationError::EmptyName { id: 3 });
        assert!(matches!(
            batch.rejected[3],
            ValidationError::LatitudeOutOfRange { id: 4, .. }
        ));
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let content = "id,name,latitude\n1,Starbucks,-6.2\n";
        assert!(matches!(
            read_csv(content.as_bytes()),
            Err(SourceError::MissingColumn(column)) if column == "longitude"
        ));
    }

    #[test]
    fn test_csv_source_reads_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("coffee_shop_data.csv");
        fs::write(&path, SAMPLE).unwrap();

        let batch = CsvSource::new(&path).load().unwrap();
        assert_eq!(batch.records.len(), 2);

        let missing = CsvSource::new(temp_dir.path().join("missing.csv")).load();
        assert!(matches!(missing, Err(SourceError::FileNotFound(_))));
    }

    #[test]
    fn test_sqlite_source_reads_joined_rows() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("locations.db");
        {
            let conn = establish_connection(&db_path, Duration::from_millis(100)).unwrap();
            let repo = LocationRepository::new(&conn);
            repo.replace_all(&[
                LocationRecord::new(2, "Janji Jiwa CBD", -6.195, 106.82),
                LocationRecord::new(1, "Starbucks Kemang", -6.26, 106.81),
            ])
            .unwrap();
            repo.save_prices(1, Some(200000.0), Some(20000000.0)).unwrap();
        }

        let batch = SqliteSource::new(&db_path, Duration::from_millis(100))
            .load()
            .unwrap();
        assert_eq!(batch.records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(batch.records[0].attributes.contains_key("price_per_sqm"));
        assert!(batch.records[1].attributes.is_empty());
    }

    #[test]
    fn test_batch_rejects_repeated_ids() {
        let batch = SourceBatch::from_raw(
            vec![
                LocationRecord::new(1, "Tanamera Coffee", -6.2, 106.8),
                LocationRecord::new(1, "Tanamera Coffee", -6.2, 106.8),
            ],
            Vec::new(),
        );
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.rejected, vec![ValidationError::DuplicateId { id: 1 }]);
    }
}
