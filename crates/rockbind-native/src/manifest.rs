//! Manifest - Metadata about the database's column families
//!
//! The manifest records every column family with its id and the name of the
//! comparator it was created with. It is rewritten whole (temporary file plus
//! rename) whenever a column family is created or dropped.

use rockbind_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Manifest file name
pub const MANIFEST_FILE: &str = "CURRENT";

/// Name of the column family every database has
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// Column family entry in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamilyMeta {
    pub id: u32,
    pub name: String,
    /// Comparator name the column family was created with
    pub comparator: String,
}

/// Manifest snapshot (complete state)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Version number for compatibility
    pub version: u32,
    pub next_column_family_id: u32,
    pub column_families: Vec<ColumnFamilyMeta>,
}

impl Manifest {
    /// A fresh manifest holding only the default column family.
    pub fn new(default_comparator: &str) -> Self {
        Self {
            version: 1,
            next_column_family_id: 1,
            column_families: vec![ColumnFamilyMeta {
                id: 0,
                name: DEFAULT_COLUMN_FAMILY_NAME.to_string(),
                comparator: default_comparator.to_string(),
            }],
        }
    }

    /// Load the manifest from `dir`, `None` if the database does not exist.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let mut data = Vec::new();
        BufReader::new(File::open(&path)?).read_to_end(&mut data)?;
        let manifest = bincode::deserialize(&data)
            .map_err(|e| Error::Serialization(format!("Failed to read manifest: {}", e)))?;
        Ok(Some(manifest))
    }

    /// Write the manifest to `dir` atomically.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let data = bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("Failed to write manifest: {}", e)))?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            out.write_all(&data)?;
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ColumnFamilyMeta> {
        self.column_families.iter().find(|cf| cf.name == name)
    }

    /// Register a new column family and return its id.
    pub fn add(&mut self, name: &str, comparator: &str) -> u32 {
        let id = self.next_column_family_id;
        self.next_column_family_id += 1;
        self.column_families.push(ColumnFamilyMeta {
            id,
            name: name.to_string(),
            comparator: comparator.to_string(),
        });
        id
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.column_families.len();
        self.column_families.retain(|cf| cf.id != id);
        before != self.column_families.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.column_families.iter().map(|cf| cf.name.clone()).collect()
    }
}
