use std::fs;
use std::path::{Path, PathBuf};

use intel_platform_core::{PlatformError, BCRYPT_COST};
use serde::Serialize;

pub const DEFAULT_DATA_DIR: &str = "DATA";
pub const DB_FILE_NAME: &str = "intelligence_platform.db";
pub const USERS_FILE_NAME: &str = "users.txt";

/// CSV file name inside the data directory and the table it feeds.
pub const CSV_TABLE_MAP: [(&str, &str); 3] = [
    ("cyber-operations-incidents.csv", "cyber_incidents"),
    ("datasets_metadata.csv", "datasets_metadata"),
    ("it_tickets.csv", "it_tickets"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvSource {
    pub path: PathBuf,
    pub table: String,
}

/// Where the platform keeps its files. Every path is explicit; nothing is
/// read from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub users_file: PathBuf,
    pub bcrypt_cost: u32,
}

impl PlatformConfig {
    /// Config rooted at `data_dir` with the conventional file names.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join(DB_FILE_NAME),
            users_file: data_dir.join(USERS_FILE_NAME),
            data_dir,
            bcrypt_cost: BCRYPT_COST,
        }
    }

    #[must_use]
    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    #[must_use]
    pub fn with_users_file(mut self, users_file: impl Into<PathBuf>) -> Self {
        self.users_file = users_file.into();
        self
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn csv_sources(&self) -> Vec<CsvSource> {
        CSV_TABLE_MAP
            .iter()
            .map(|(file, table)| CsvSource {
                path: self.data_dir.join(file),
                table: (*table).to_string(),
            })
            .collect()
    }

    /// Create the data directory and the database's parent directory.
    ///
    /// # Errors
    /// Returns [`PlatformError::Io`] when a directory cannot be created.
    pub fn ensure_data_dir(&self) -> Result<(), PlatformError> {
        create_dir(&self.data_dir)?;
        if let Some(parent) = self.db_path.parent().filter(|parent| !parent.as_os_str().is_empty())
        {
            create_dir(parent)?;
        }
        Ok(())
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

fn create_dir(path: &Path) -> Result<(), PlatformError> {
    fs::create_dir_all(path).map_err(|err| {
        PlatformError::Io(format!("failed to create directory {}: {err}", path.display()))
    })
}
