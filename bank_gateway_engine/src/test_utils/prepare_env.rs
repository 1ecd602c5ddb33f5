use log::*;
use tempfile::TempDir;

use crate::SqliteDatabase;

/// A migrated SQLite database in its own temporary directory. The directory is removed on drop.
pub struct TestDatabase {
    pub db: SqliteDatabase,
    pub url: String,
    _dir: TempDir,
}

impl TestDatabase {
    pub async fn new() -> Self {
        prepare_test_env();
        let dir = tempfile::tempdir().expect("Error creating temporary directory");
        let url = format!("sqlite://{}", dir.path().join("bank_gateway_test.db").display());
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        db.migrate().await.expect("Error running DB migrations");
        debug!("🚀️ Test database ready at {url}");
        Self { db, url, _dir: dir }
    }
}

pub fn prepare_test_env() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
}
