pub mod manager;
pub mod migrations;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use migrations::run_migrations;
pub use sqlite::*;
