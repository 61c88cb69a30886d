// Common test utilities for rockbind integration tests

use rockbind::{Options, ReadOptions, Result, WriteOptions, DB};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test fixture owning a temporary database directory
pub struct DbFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl DbFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("db");
        Self { temp_dir, db_path }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open with `configure` applied on top of `create_if_missing`.
    pub fn open_with(&self, configure: impl FnOnce(&mut Options) -> Result<()>) -> DB {
        let mut opts = create_options();
        configure(&mut opts).expect("Failed to configure options");
        DB::open(&opts, &self.db_path).expect("Failed to open database")
    }

    #[allow(dead_code)]
    pub fn open(&self) -> DB {
        self.open_with(|_| Ok(()))
    }
}

impl Default for DbFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_options() -> Options {
    let mut opts = Options::new();
    opts.set_create_if_missing(true);
    opts
}

/// Put every pair with default write options.
#[allow(dead_code)]
pub fn put_all(db: &DB, pairs: &[(&[u8], &[u8])]) {
    let write = WriteOptions::new();
    for (key, value) in pairs {
        db.put(&write, key, value).expect("put failed");
    }
}

/// Every key in iteration order.
#[allow(dead_code)]
pub fn keys(db: &DB) -> Vec<Vec<u8>> {
    let iter = db.iterator(&ReadOptions::new()).expect("iterator failed");
    iter.entries().into_iter().map(|(k, _)| k).collect()
}

#[allow(dead_code)]
pub fn get(db: &DB, key: &[u8]) -> Option<Vec<u8>> {
    db.get(&ReadOptions::new(), key).expect("get failed")
}
