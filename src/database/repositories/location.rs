use super::Repository;
use crate::core::hash::fingerprint_record;
use crate::core::record::LocationRecord;
use crate::database::{
    DatabaseError, ENGAGEMENT_RATE, MONTHLY_RENT, PRICE_PER_SQM, SOCIAL_FOLLOWERS,
};
use chrono::Utc;
use rusqlite::{Connection, params};
use std::str::FromStr;

pub struct LocationRepository<'a> {
    conn: &'a Connection,
}

impl Repository for LocationRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> LocationRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Atomically swap the stored locations for `records`.
    pub fn replace_all(&self, records: &[LocationRecord]) -> Result<usize, DatabaseError> {
        let tx = self.connection().unchecked_transaction()?;
        let count = self.write_snapshot(records)?;
        tx.commit()?;
        Ok(count)
    }

    /// Body of [`replace_all`](Self::replace_all); the caller owns the
    /// transaction.
    ///
    /// Every attribute is kept in the `attributes` JSON. Numeric metric
    /// attributes are also mirrored into `prices` and `social_metrics`, which
    /// are rebuilt from `records`.
    pub fn write_snapshot(&self, records: &[LocationRecord]) -> Result<usize, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connection();

        conn.execute("DELETE FROM locations", [])?;
        conn.execute("DELETE FROM prices", [])?;
        conn.execute("DELETE FROM social_metrics", [])?;

        let mut stmt = conn.prepare(
            "INSERT INTO locations (id, name, latitude, longitude, attributes, data_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for record in records {
            stmt.execute(params![
                record.id,
                record.name,
                record.latitude,
                record.longitude,
                serde_json::to_string(&record.attributes)?,
                fingerprint_record(record).as_str(),
                now,
            ])?;

            let price_per_sqm = metric::<f64>(record, PRICE_PER_SQM);
            let monthly_rent = metric::<f64>(record, MONTHLY_RENT);
            if price_per_sqm.is_some() || monthly_rent.is_some() {
                self.save_prices(record.id, price_per_sqm, monthly_rent)?;
            }

            let followers = metric::<i64>(record, SOCIAL_FOLLOWERS);
            let engagement_rate = metric::<f64>(record, ENGAGEMENT_RATE);
            if followers.is_some() || engagement_rate.is_some() {
                self.save_social_metrics(record.id, followers, engagement_rate)?;
            }
        }

        Ok(records.len())
    }

    /// Locations joined with their price and social metrics, ordered by id.
    pub fn find_all_with_metrics(&self) -> Result<Vec<LocationRecord>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT l.id, l.name, l.latitude, l.longitude, l.attributes,
                    p.price_per_sqm, p.monthly_rent, s.followers, s.engagement_rate
             FROM locations l
             LEFT JOIN prices p ON l.id = p.location_id
             LEFT JOIN social_metrics s ON l.id = s.location_id
             ORDER BY l.id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<f64>>(8)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, name, latitude, longitude, attributes, price, rent, followers, engagement) = row?;
            let mut record = LocationRecord::new(id, name, latitude, longitude);
            record.attributes = serde_json::from_str(&attributes)?;

            let joined = [
                (PRICE_PER_SQM, price.map(|v| v.to_string())),
                (MONTHLY_RENT, rent.map(|v| v.to_string())),
                (SOCIAL_FOLLOWERS, followers.map(|v| v.to_string())),
                (ENGAGEMENT_RATE, engagement.map(|v| v.to_string())),
            ];
            // Stored attributes keep their original text
            for (key, value) in joined {
                if let Some(value) = value {
                    record.attributes.entry(key.to_string()).or_insert(value);
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))
            .map_err(DatabaseError::Sqlite)
    }

    pub fn save_prices(
        &self,
        location_id: i64,
        price_per_sqm: Option<f64>,
        monthly_rent: Option<f64>,
    ) -> Result<(), DatabaseError> {
        self.connection().execute(
            "INSERT INTO prices (location_id, price_per_sqm, monthly_rent) VALUES (?1, ?2, ?3)
             ON CONFLICT(location_id) DO UPDATE SET
                price_per_sqm = excluded.price_per_sqm,
                monthly_rent = excluded.monthly_rent",
            params![location_id, price_per_sqm, monthly_rent],
        )?;
        Ok(())
    }

    pub fn save_social_metrics(
        &self,
        location_id: i64,
        followers: Option<i64>,
        engagement_rate: Option<f64>,
    ) -> Result<(), DatabaseError> {
        self.connection().execute(
            "INSERT INTO social_metrics (location_id, followers, engagement_rate) VALUES (?1, ?2, ?3)
             ON CONFLICT(location_id) DO UPDATE SET
                followers = excluded.followers,
                engagement_rate = excluded.engagement_rate",
            params![location_id, followers, engagement_rate],
        )?;
        Ok(())
    }
}

fn metric<T: FromStr>(record: &LocationRecord, key: &str) -> Option<T> {
    record.attributes.get(key)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::fingerprint;
    use crate::database::initialize_schema;

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn
    }

    fn metric_rows(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM prices) + (SELECT COUNT(*) FROM social_metrics)",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_replace_and_load() {
        let conn = setup_test_db();
        let repo = LocationRepository::new(&conn);

        let records = vec![
            LocationRecord::new(1, "Kopi Kenangan Sudirman", -6.2088, 106.8456)
                .with_attribute("address", "Jl. Sudirman No. 12")
                .with_attribute("rating", "4.6"),
            LocationRecord::new(2, "Janji Jiwa CBD", -6.195, 106.82),
        ];
        assert_eq!(repo.replace_all(&records).unwrap(), 2);

        let loaded = repo.find_all_with_metrics().unwrap();
        assert_eq!(loaded, records);
        let data_hash: String = conn
            .query_row("SELECT data_hash FROM locations WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(data_hash, fingerprint("Kopi Kenangan Sudirman", -6.2088, 106.8456).0);
        assert_eq!(metric_rows(&conn), 0);
    }

    #[test]
    fn test_replace_discards_previous_rows() {
        let conn = setup_test_db();
        let repo = LocationRepository::new(&conn);

        repo.replace_all(&[
            LocationRecord::new(1, "Starbucks Kemang", -6.26, 106.81),
            LocationRecord::new(2, "Starbuck Kemang", -6.2601, 106.8101)
                .with_attribute("price_per_sqm", "250000")
                .with_attribute("engagement_rate", "0.04"),
        ])
        .unwrap();
        assert_eq!(metric_rows(&conn), 2);

        repo.replace_all(&[LocationRecord::new(1, "Starbucks Kemang", -6.26, 106.81)])
            .unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(metric_rows(&conn), 0);
    }

    #[test]
    fn test_metric_attributes_survive_and_fill_tables() {
        let conn = setup_test_db();
        let repo = LocationRepository::new(&conn);

        let records = vec![
            LocationRecord::new(1, "Fore Coffee Menteng", -6.2, 106.83)
                .with_attribute("rating", "4.6")
                .with_attribute("price_per_sqm", "250000.50")
                .with_attribute("monthly_rent", "25000000")
                .with_attribute("social_followers", "15000")
                .with_attribute("engagement_rate", "n/a"),
        ];
        repo.replace_all(&records).unwrap();

        assert_eq!(repo.find_all_with_metrics().unwrap(), records);

        let (price, rent): (f64, f64) = conn
            .query_row(
                "SELECT price_per_sqm, monthly_rent FROM prices WHERE location_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((price, rent), (250000.5, 25000000.0));

        // Unparsable values stay in the attributes only
        let (followers, engagement): (Option<i64>, Option<f64>) = conn
            .query_row(
                "SELECT followers, engagement_rate FROM social_metrics WHERE location_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((followers, engagement), (Some(15000), None));
    }

    #[test]
    fn test_metrics_are_joined_as_attributes() {
        let conn = setup_test_db();
        let repo = LocationRepository::new(&conn);

        repo.replace_all(&[LocationRecord::new(1, "Fore Coffee Menteng", -6.2, 106.83)])
            .unwrap();
        repo.save_prices(1, Some(300000.0), Some(30000000.0)).unwrap();
        repo.save_social_metrics(1, Some(15000), Some(0.05)).unwrap();

        let loaded = repo.find_all_with_metrics().unwrap();
        let attributes = &loaded[0].attributes;
        assert_eq!(attributes.get("price_per_sqm").map(String::as_str), Some("300000"));
        assert_eq!(attributes.get("monthly_rent").map(String::as_str), Some("30000000"));
        assert_eq!(attributes.get("social_followers").map(String::as_str), Some("15000"));
        assert_eq!(attributes.get("engagement_rate").map(String::as_str), Some("0.05"));

        // Writing the joined view back keeps both the attributes and the metrics
        repo.replace_all(&loaded).unwrap();
        assert_eq!(repo.find_all_with_metrics().unwrap(), loaded);
        assert_eq!(metric_rows(&conn), 2);
    }
}
