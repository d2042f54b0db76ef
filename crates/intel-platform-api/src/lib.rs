use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use intel_platform_core::{
    hash_password, parse_credential_line, verify_password, CredentialRecord, Incident,
    NewIncident, NewUser, PlatformError, StatusCount, TypeCount, User, DEFAULT_ROLE,
};
use intel_platform_store_sqlite::{
    CsvLoadOutcome, InsertOutcome, OnConflict, RowFailure, SchemaStatus, SqliteStore, TableCount,
};
use serde::Serialize;
use tracing::{info, warn};

mod config;

pub use config::{
    CsvSource, PlatformConfig, CSV_TABLE_MAP, DB_FILE_NAME, DEFAULT_DATA_DIR, USERS_FILE_NAME,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub reason: String,
}

/// Accumulated result of one legacy credential migration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub source: PathBuf,
    pub missing_file: bool,
    /// Rows actually inserted by this run.
    pub migrated: usize,
    /// Usernames that already existed and were left untouched.
    pub duplicates: usize,
    pub skipped: Vec<SkippedLine>,
    pub failed: Vec<RowFailure>,
}

impl MigrationReport {
    fn empty(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            missing_file: false,
            migrated: 0,
            duplicates: 0,
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CsvFileStatus {
    Loaded { rows: usize },
    MissingFile,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CsvFileReport {
    pub path: PathBuf,
    pub table: String,
    #[serde(flatten)]
    pub status: CsvFileStatus,
}

impl CsvFileReport {
    #[must_use]
    pub fn rows_loaded(&self) -> usize {
        match self.status {
            CsvFileStatus::Loaded { rows } => rows,
            CsvFileStatus::MissingFile | CsvFileStatus::Failed { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SetupReport {
    pub db_path: PathBuf,
    pub users: MigrationReport,
    pub csv_files: Vec<CsvFileReport>,
    pub table_counts: Vec<TableCount>,
}

/// One open connection to the platform database.
///
/// `close` releases the connection and reports close errors; dropping the
/// session without calling it still closes the connection.
pub struct PlatformSession {
    store: SqliteStore,
    bcrypt_cost: u32,
}

impl PlatformSession {
    /// Open the database named by `config`, creating its directory if needed.
    ///
    /// Tables are not created here; call [`Self::initialize_schema`].
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created or SQLite cannot open the file.
    pub fn open(config: &PlatformConfig) -> Result<Self, PlatformError> {
        config.ensure_data_dir()?;
        let store = SqliteStore::open(&config.db_path).map_err(storage_error)?;
        info!(db_path = %config.db_path.display(), "connected to platform database");
        Ok(Self { store, bcrypt_cost: config.bcrypt_cost })
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when SQLite fails to close the connection.
    pub fn close(self) -> Result<(), PlatformError> {
        self.store.close().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when schema metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus, PlatformError> {
        self.store.schema_status().map_err(storage_error)
    }

    /// Create any missing platform tables.
    ///
    /// # Errors
    /// Returns [`PlatformError::Storage`] when a DDL statement fails.
    pub fn initialize_schema(&mut self) -> Result<(), PlatformError> {
        self.store.migrate().map_err(storage_error)
    }

    /// Register a new user, hashing `password` with a fresh salt.
    ///
    /// A blank `role` falls back to the default role.
    ///
    /// # Errors
    /// - [`PlatformError::InvalidInput`] for a blank username or empty password.
    /// - [`PlatformError::DuplicateUser`] when the username is taken; nothing is written.
    /// - [`PlatformError::Hashing`] or [`PlatformError::Storage`] when hashing or the insert fails.
    pub fn register(
        &mut self,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<User, PlatformError> {
        if username.trim().is_empty() {
            return Err(PlatformError::InvalidInput("username MUST be non-empty".to_string()));
        }
        if password.is_empty() {
            return Err(PlatformError::InvalidInput("password MUST be non-empty".to_string()));
        }

        if self.store.find_user_by_username(username).map_err(storage_error)?.is_some() {
            return Err(PlatformError::DuplicateUser { username: username.to_string() });
        }

        let role = match role.trim() {
            "" => DEFAULT_ROLE,
            trimmed => trimmed,
        };
        let new_user = NewUser {
            username: username.to_string(),
            password_hash: hash_password(password, self.bcrypt_cost)?,
            role: role.to_string(),
        };

        let InsertOutcome::Inserted(id) =
            self.store.insert_user(&new_user, OnConflict::Abort).map_err(storage_error)?
        else {
            return Err(PlatformError::Storage(format!(
                "insert of user {username} was ignored by the store"
            )));
        };

        info!(username, role, "registered user");
        Ok(User {
            id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            role: new_user.role,
        })
    }

    /// Check a username/password pair. Never writes.
    ///
    /// # Errors
    /// - [`PlatformError::UnknownUser`] when no such username exists.
    /// - [`PlatformError::BadCredentials`] when the password does not match,
    ///   including when the stored hash is not a bcrypt hash.
    /// - [`PlatformError::Storage`] when the lookup fails.
    pub fn login(&self, username: &str, password: &str) -> Result<User, PlatformError> {
        let Some(user) = self.store.find_user_by_username(username).map_err(storage_error)? else {
            return Err(PlatformError::UnknownUser);
        };

        match verify_password(password, &user.password_hash) {
            Ok(true) => Ok(user),
            Ok(false) => Err(PlatformError::BadCredentials),
            Err(err) => {
                warn!(username, error = %err, "stored password hash could not be verified");
                Err(PlatformError::BadCredentials)
            }
        }
    }

    /// Copy pre-hashed users from a legacy `username,password_hash,role` file.
    ///
    /// Hashes are stored verbatim. Usernames already present are left
    /// untouched, so running the same file twice migrates nothing the second
    /// time. Malformed lines are skipped and listed in the report.
    ///
    /// # Errors
    /// Returns [`PlatformError::Io`] when the file exists but cannot be read,
    /// and [`PlatformError::Storage`] when the import transaction cannot be
    /// started or committed. A missing file is not an error, but one removed
    /// between the existence check and the open yields [`PlatformError::MissingFile`].
    pub fn migrate_users_from_file(&mut self, path: &Path) -> Result<MigrationReport, PlatformError> {
        let mut report = MigrationReport::empty(path);

        if !path.exists() {
            warn!(path = %path.display(), "user file does not exist; no users migrated");
            report.missing_file = true;
            return Ok(report);
        }

        let (records, skipped) = read_credential_file(path)?;
        report.skipped = skipped;

        let batch = self.store.insert_users_ignoring_conflicts(&records).map_err(storage_error)?;
        report.migrated = batch.inserted;
        report.duplicates = batch.ignored.len();
        report.failed = batch.failed;

        info!(
            path = %path.display(),
            migrated = report.migrated,
            duplicates = report.duplicates,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "migrated users from file"
        );
        Ok(report)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when rows cannot be read.
    pub fn list_users(&self) -> Result<Vec<User>, PlatformError> {
        self.store.list_users().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::InvalidInput`] for an invalid incident and
    /// [`PlatformError::Storage`] when the insert fails.
    pub fn insert_incident(&mut self, incident: &NewIncident) -> Result<i64, PlatformError> {
        self.store.insert_incident(incident).map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when the count query fails.
    pub fn count_incidents(&self) -> Result<i64, PlatformError> {
        self.store.count_incidents().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when rows cannot be read.
    pub fn list_incidents(&self) -> Result<Vec<Incident>, PlatformError> {
        self.store.list_incidents().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when the query fails.
    pub fn incidents_by_type_count(&self) -> Result<Vec<TypeCount>, PlatformError> {
        self.store.incidents_by_type_count().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when the query fails.
    pub fn high_severity_by_status(&self) -> Result<Vec<StatusCount>, PlatformError> {
        self.store.high_severity_by_status().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when the query fails.
    pub fn types_with_many_cases(&self, min_count: i64) -> Result<Vec<TypeCount>, PlatformError> {
        self.store.types_with_many_cases(min_count).map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when a table cannot be counted.
    pub fn table_row_counts(&self) -> Result<Vec<TableCount>, PlatformError> {
        self.store.table_row_counts().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`PlatformError::Storage`] when the file cannot be parsed or loaded.
    pub fn load_csv(&mut self, csv_path: &Path, table: &str) -> Result<CsvFileReport, PlatformError> {
        let outcome = self.store.load_csv_into_table(csv_path, table).map_err(storage_error)?;
        Ok(CsvFileReport {
            path: csv_path.to_path_buf(),
            table: table.to_string(),
            status: match outcome {
                CsvLoadOutcome::Loaded { rows } => CsvFileStatus::Loaded { rows },
                CsvLoadOutcome::MissingFile => CsvFileStatus::MissingFile,
            },
        })
    }

    /// Load every configured CSV file. A file that is missing or fails to
    /// load is recorded and the next file is still processed.
    #[must_use]
    pub fn load_all_csv_data(&mut self, config: &PlatformConfig) -> Vec<CsvFileReport> {
        config
            .csv_sources()
            .into_iter()
            .map(|source| {
                self.load_csv(&source.path, &source.table).unwrap_or_else(|err| {
                    warn!(path = %source.path.display(), table = %source.table, error = %err, "csv load failed");
                    CsvFileReport {
                        path: source.path,
                        table: source.table,
                        status: CsvFileStatus::Failed { error: err.to_string() },
                    }
                })
            })
            .collect()
    }

    /// Full bootstrap: data directory, tables, legacy users, CSV datasets,
    /// then a row count of every table.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, tables cannot be
    /// created, the user import transaction fails, or the final counts fail.
    pub fn setup_complete(config: &PlatformConfig) -> Result<SetupReport, PlatformError> {
        let mut session = Self::open(config)?;
        session.initialize_schema()?;
        let users = session.migrate_users_from_file(&config.users_file)?;
        let csv_files = session.load_all_csv_data(config);
        let table_counts = session.table_row_counts()?;
        session.close()?;

        Ok(SetupReport { db_path: config.db_path.clone(), users, csv_files, table_counts })
    }
}

/// Surface a domain error raised inside the store as itself; anything else is a storage failure.
fn storage_error(err: anyhow::Error) -> PlatformError {
    match err.downcast::<PlatformError>() {
        Ok(platform) => platform,
        Err(err) => PlatformError::Storage(format!("{err:#}")),
    }
}

fn read_credential_file(
    path: &Path,
) -> Result<(Vec<CredentialRecord>, Vec<SkippedLine>), PlatformError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => PlatformError::MissingFile { path: path.to_path_buf() },
        _ => PlatformError::Io(format!("failed to open user file {}: {err}", path.display())),
    })?;

    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for (index, raw) in BufReader::new(file).split(b'\n').enumerate() {
        let line_number = index + 1;
        let raw = raw.map_err(|err| {
            PlatformError::Io(format!("failed to read user file {}: {err}", path.display()))
        })?;

        let Ok(line) = String::from_utf8(raw) else {
            warn!(line = line_number, "skipping user line that is not valid UTF-8");
            skipped.push(SkippedLine {
                line_number,
                reason: "line is not valid UTF-8".to_string(),
            });
            continue;
        };

        match parse_credential_line(line_number, &line) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(PlatformError::MalformedRecord { line, reason }) => {
                warn!(line, reason = %reason, "skipping malformed user line");
                skipped.push(SkippedLine { line_number: line, reason });
            }
            Err(other) => return Err(other),
        }
    }

    Ok((records, skipped))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use intel_platform_core::{AuthOutcome, Severity};
    use tempfile::TempDir;

    use super::*;

    const TEST_COST: u32 = 4;

    fn test_config(dir: &TempDir) -> PlatformConfig {
        PlatformConfig::new(dir.path().join("DATA")).with_bcrypt_cost(TEST_COST)
    }

    fn open_session(config: &PlatformConfig) -> Result<PlatformSession> {
        let mut session = PlatformSession::open(config)?;
        session.initialize_schema()?;
        Ok(session)
    }

    fn write_users_file(config: &PlatformConfig, body: &str) -> Result<()> {
        config.ensure_data_dir()?;
        fs::write(&config.users_file, body)?;
        Ok(())
    }

    fn sample_incident(incident_type: &str, severity: Severity, status: &str) -> NewIncident {
        NewIncident {
            date: "2024-11-05".to_string(),
            incident_type: incident_type.to_string(),
            severity,
            status: status.to_string(),
            description: "Suspicious email detected".to_string(),
            reported_by: Some("alice".to_string()),
        }
    }

    #[test]
    fn register_then_login_succeeds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = open_session(&test_config(&dir))?;

        let registered = session.register("alice", "SecurePass123!", "analyst")?;
        assert_eq!(registered.role, "analyst");
        assert_ne!(registered.password_hash, "SecurePass123!");

        let outcome = AuthOutcome::logged_in(&session.login("alice", "SecurePass123!"));
        assert!(outcome.success);
        assert_eq!(outcome.message, "Login successful!");

        session.close()?;
        Ok(())
    }

    #[test]
    fn duplicate_registration_leaves_original_row() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = open_session(&test_config(&dir))?;

        session.register("alice", "first-password", "analyst")?;
        let second = session.register("alice", "second-password", "admin");
        assert_eq!(
            second,
            Err(PlatformError::DuplicateUser { username: "alice".to_string() })
        );
        assert_eq!(
            AuthOutcome::registered(&second).message,
            "Username 'alice' already exists."
        );

        let users = session.list_users()?;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, "analyst");
        assert!(session.login("alice", "first-password").is_ok());
        Ok(())
    }

    #[test]
    fn register_rejects_blank_input_and_defaults_role() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = open_session(&test_config(&dir))?;

        assert!(matches!(
            session.register("   ", "pw", "user"),
            Err(PlatformError::InvalidInput(_))
        ));
        assert!(matches!(session.register("bob", "", "user"), Err(PlatformError::InvalidInput(_))));

        let bob = session.register("bob", "pw", "  ")?;
        assert_eq!(bob.role, DEFAULT_ROLE);
        Ok(())
    }

    #[test]
    fn login_distinguishes_unknown_user_from_bad_password() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = open_session(&test_config(&dir))?;
        session.register("alice", "SecurePass123!", "analyst")?;

        let unknown = session.login("mallory", "whatever");
        assert_eq!(unknown, Err(PlatformError::UnknownUser));
        assert_eq!(AuthOutcome::logged_in(&unknown).message, "User not found.");

        let wrong = session.login("alice", "securepass123!");
        assert_eq!(wrong, Err(PlatformError::BadCredentials));
        assert_eq!(AuthOutcome::logged_in(&wrong).message, "Incorrect password.");

        // Usernames are matched exactly.
        assert_eq!(session.login("Alice", "SecurePass123!"), Err(PlatformError::UnknownUser));
        Ok(())
    }

    #[test]
    fn migration_of_missing_file_reports_zero() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        let mut session = open_session(&config)?;

        let report = session.migrate_users_from_file(&config.users_file)?;
        assert!(report.missing_file);
        assert_eq!(report.migrated, 0);
        assert!(session.list_users()?.is_empty());
        Ok(())
    }

    #[test]
    fn migration_is_idempotent_and_skips_malformed_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        let legacy_hash = hash_password("legacy-pass", TEST_COST)?;
        write_users_file(
            &config,
            &format!(
                "u1,{legacy_hash},user\n\
                 \n\
                 only-two,fields\n\
                 u2 , {legacy_hash} , admin \n\
                 u3,,user\n"
            ),
        )?;
        let mut session = open_session(&config)?;

        let first = session.migrate_users_from_file(&config.users_file)?;
        assert!(!first.missing_file);
        assert_eq!(first.migrated, 2);
        assert_eq!(first.duplicates, 0);
        assert_eq!(
            first.skipped.iter().map(|line| line.line_number).collect::<Vec<_>>(),
            vec![3, 5]
        );
        assert!(first.failed.is_empty());

        let second = session.migrate_users_from_file(&config.users_file)?;
        assert_eq!(second.migrated, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(session.list_users()?.len(), 2);

        // Hashes are carried over verbatim, so the legacy password still works.
        let u2 = session.login("u2", "legacy-pass")?;
        assert_eq!(u2.role, "admin");
        Ok(())
    }

    #[test]
    fn migration_does_not_overwrite_registered_user() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        let mut session = open_session(&config)?;
        session.register("alice", "SecurePass123!", "analyst")?;

        let other_hash = hash_password("other", TEST_COST)?;
        write_users_file(&config, &format!("alice,{other_hash},admin\n"))?;

        let report = session.migrate_users_from_file(&config.users_file)?;
        assert_eq!(report.migrated, 0);
        assert_eq!(report.duplicates, 1);

        let alice = session.login("alice", "SecurePass123!")?;
        assert_eq!(alice.role, "analyst");
        Ok(())
    }

    #[test]
    fn migrated_non_bcrypt_hash_cannot_log_in() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        write_users_file(&config, "legacy,plaintext-password,user\n")?;
        let mut session = open_session(&config)?;

        assert_eq!(session.migrate_users_from_file(&config.users_file)?.migrated, 1);
        assert_eq!(
            session.login("legacy", "plaintext-password"),
            Err(PlatformError::BadCredentials)
        );
        Ok(())
    }

    #[test]
    fn invalid_utf8_line_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        config.ensure_data_dir()?;
        let mut body = b"u1,hash1,user\n".to_vec();
        body.extend_from_slice(&[0xff, 0xfe, b',', b'x', b',', b'y', b'\n']);
        body.extend_from_slice(b"u2,hash2,user\n");
        fs::write(&config.users_file, body)?;

        let mut session = open_session(&config)?;
        let report = session.migrate_users_from_file(&config.users_file)?;
        assert_eq!(report.migrated, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line_number, 2);
        Ok(())
    }

    #[test]
    fn analytics_follow_inserted_incidents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = open_session(&test_config(&dir))?;

        assert!(session.incidents_by_type_count()?.is_empty());
        assert!(session.high_severity_by_status()?.is_empty());
        assert!(session.types_with_many_cases(intel_platform_core::DEFAULT_MIN_CASES)?.is_empty());

        for _ in 0..6 {
            session.insert_incident(&sample_incident("Phishing", Severity::High, "Open"))?;
        }
        session.insert_incident(&sample_incident("Malware", Severity::Critical, "Resolved"))?;
        session.insert_incident(&sample_incident("Malware", Severity::Low, "Open"))?;

        let by_type = session.incidents_by_type_count()?;
        assert_eq!(by_type[0], TypeCount { incident_type: "Phishing".to_string(), count: 6 });
        assert_eq!(by_type[1], TypeCount { incident_type: "Malware".to_string(), count: 2 });

        let by_status = session.high_severity_by_status()?;
        assert_eq!(by_status[0], StatusCount { status: "Open".to_string(), count: 6 });
        assert_eq!(by_status[1], StatusCount { status: "Resolved".to_string(), count: 1 });

        let many = session.types_with_many_cases(5)?;
        assert_eq!(many.len(), 1);
        assert_eq!(many[0].incident_type, "Phishing");
        assert!(session.types_with_many_cases(6)?.is_empty());
        assert_eq!(session.list_incidents()?.len(), 8);
        Ok(())
    }

    #[test]
    fn invalid_incident_is_rejected_before_storage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = open_session(&test_config(&dir))?;
        let mut incident = sample_incident("Phishing", Severity::High, "Open");
        incident.date = "05/11/2024".to_string();

        assert!(matches!(session.insert_incident(&incident), Err(PlatformError::InvalidInput(_))));
        assert!(session.list_incidents()?.is_empty());
        Ok(())
    }

    #[test]
    fn load_all_csv_data_records_each_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        config.ensure_data_dir()?;
        fs::write(
            config.data_dir.join("cyber-operations-incidents.csv"),
            "date,incident_type,severity,status,description,reported_by\n\
             2024-02-01,DDoS,High,Open,Edge saturation,ops\n",
        )?;
        fs::write(config.data_dir.join("it_tickets.csv"), "ticket_id,priority\nT-1,High\nT-1,Low\n")?;

        let mut session = open_session(&config)?;
        let reports = session.load_all_csv_data(&config);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].status, CsvFileStatus::Loaded { rows: 1 });
        assert_eq!(reports[1].status, CsvFileStatus::MissingFile);
        assert!(matches!(reports[2].status, CsvFileStatus::Failed { .. }));
        assert_eq!(reports.iter().map(CsvFileReport::rows_loaded).sum::<usize>(), 1);
        assert_eq!(session.list_incidents()?.len(), 1);
        Ok(())
    }

    #[test]
    fn loaded_rows_without_severity_still_list_and_count() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        config.ensure_data_dir()?;
        let csv_path = config.data_dir.join("incidents.csv");
        fs::write(
            &csv_path,
            "date,incident_type,severity,status\n2024-01-02,Phishing,,Open\n",
        )?;

        let mut session = open_session(&config)?;
        session.load_csv(&csv_path, "cyber_incidents")?;
        session.insert_incident(&sample_incident("Phishing", Severity::High, "Open"))?;

        assert_eq!(session.count_incidents()?, 2);
        let incidents = session.list_incidents()?;
        assert_eq!(incidents[0].severity, None);
        assert_eq!(incidents[1].severity, Some(Severity::High));
        assert_eq!(session.incidents_by_type_count()?[0].count, 2);
        Ok(())
    }

    #[test]
    fn setup_complete_bootstraps_everything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        write_users_file(&config, "u1,hash1,user\nu2,hash2,admin\n")?;
        fs::write(
            config.data_dir.join("datasets_metadata.csv"),
            "dataset_name,category,source\nThreat feed,security,vendor\n",
        )?;

        let report = PlatformSession::setup_complete(&config)?;
        assert_eq!(report.db_path, config.db_path);
        assert_eq!(report.users.migrated, 2);
        assert!(config.db_path.exists());

        let counts = report
            .table_counts
            .iter()
            .map(|count| (count.table.as_str(), count.rows))
            .collect::<Vec<_>>();
        assert_eq!(
            counts,
            vec![("users", 2), ("cyber_incidents", 0), ("datasets_metadata", 1), ("it_tickets", 0)]
        );

        // A second run must not duplicate users.
        let again = PlatformSession::setup_complete(&config)?;
        assert_eq!(again.users.migrated, 0);
        assert_eq!(again.users.duplicates, 2);
        Ok(())
    }

    #[test]
    fn data_survives_close_and_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);

        let mut session = open_session(&config)?;
        session.register("alice", "SecurePass123!", "analyst")?;
        session.close()?;

        let session = PlatformSession::open(&config)?;
        assert!(session.schema_status()?.pending_versions.is_empty());
        assert_eq!(session.login("alice", "SecurePass123!")?.username, "alice");
        session.close()?;
        Ok(())
    }
}
