pub mod audit;
pub mod location;

pub use audit::{AuditEntry, AuditRepository};
pub use location::LocationRepository;

use rusqlite::Connection;

pub trait Repository {
    fn connection(&self) -> &Connection;
}
