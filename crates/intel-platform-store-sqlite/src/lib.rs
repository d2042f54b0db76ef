use std::path::Path;

use anyhow::{anyhow, Context, Result};
use intel_platform_core::{
    CredentialRecord, Incident, NewIncident, NewUser, Severity, StatusCount, TypeCount, User,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

mod csv_load;

pub use csv_load::CsvLoadOutcome;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Tables created by schema version 1, in the order they are reported.
pub const DOMAIN_TABLES: [&str; 4] = ["users", "cyber_incidents", "datasets_metadata", "it_tickets"];

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  role TEXT NOT NULL DEFAULT 'user',
  created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS cyber_incidents (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date TEXT,
  incident_type TEXT,
  severity TEXT,
  status TEXT,
  description TEXT,
  reported_by TEXT,
  created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS datasets_metadata (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  dataset_name TEXT NOT NULL,
  category TEXT,
  source TEXT,
  last_updated TEXT,
  record_count INTEGER,
  file_size_mb REAL,
  created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS it_tickets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ticket_id TEXT UNIQUE,
  priority TEXT,
  status TEXT,
  category TEXT,
  subject TEXT,
  description TEXT,
  created_date TEXT,
  resolved_date TEXT,
  assigned_to TEXT,
  created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_cyber_incidents_type ON cyber_incidents(incident_type);
CREATE INDEX IF NOT EXISTS idx_cyber_incidents_severity ON cyber_incidents(severity);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

/// What to do when an insert collides with the unique `username` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Surface the constraint violation as an error.
    Abort,
    /// Leave the existing row untouched and report [`InsertOutcome::Ignored`].
    Ignore,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted(i64),
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowFailure {
    pub line_number: usize,
    pub username: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchInsertReport {
    pub inserted: usize,
    pub ignored: Vec<String>,
    pub failed: Vec<RowFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

impl SqliteStore {
    /// Open a SQLite-backed platform store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        debug!(path = %path.display(), "opened sqlite store");
        Ok(Self { conn })
    }

    /// Close the underlying connection, reporting any error SQLite raises on close.
    ///
    /// # Errors
    /// Returns an error when SQLite refuses to close the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err).context("failed to close sqlite connection")
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Create every platform table that does not exist yet.
    ///
    /// Safe to call on an already-initialized database, including one whose
    /// tables were created before `schema_migrations` existed.
    ///
    /// # Errors
    /// Returns an error when any DDL statement or the version bookkeeping fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        if current_schema_version(&self.conn)? < 1 {
            self.apply_migration_1()?;
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let legacy = table_exists(&self.conn, "users")?;
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;

        if legacy {
            info!("recorded schema version 1 over pre-existing tables");
        } else {
            info!("created platform tables");
        }
        Ok(())
    }

    /// Exact, case-sensitive lookup of one user.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username, password_hash, role FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        role: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to look up user {username}"))
    }

    /// Append one user row under the given conflict policy.
    ///
    /// # Errors
    /// Returns an error when the write fails, including a unique-key collision
    /// under [`OnConflict::Abort`].
    pub fn insert_user(&mut self, user: &NewUser, on_conflict: OnConflict) -> Result<InsertOutcome> {
        insert_user_row(&self.conn, user, on_conflict)
    }

    /// Insert pre-hashed credential records in one transaction, ignoring
    /// usernames that already exist.
    ///
    /// A row the engine rejects is recorded in the report and the batch goes
    /// on; the transaction commits once after the last row.
    ///
    /// # Errors
    /// Returns an error when the transaction cannot be started or committed.
    /// Nothing from the batch is kept in that case.
    pub fn insert_users_ignoring_conflicts(
        &mut self,
        records: &[CredentialRecord],
    ) -> Result<BatchInsertReport> {
        let tx = self.conn.transaction().context("failed to start user import transaction")?;
        let mut report = BatchInsertReport::default();

        for record in records {
            match insert_user_row(&tx, &record.to_new_user(), OnConflict::Ignore) {
                Ok(InsertOutcome::Inserted(_)) => report.inserted += 1,
                Ok(InsertOutcome::Ignored) => {
                    debug!(username = %record.username, "user already exists; skipped");
                    report.ignored.push(record.username.clone());
                }
                Err(err) => {
                    warn!(
                        line = record.line_number,
                        username = %record.username,
                        error = %format!("{err:#}"),
                        "failed to insert user"
                    );
                    report.failed.push(RowFailure {
                        line_number: record.line_number,
                        username: record.username.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        tx.commit().context("failed to commit user import transaction")?;
        Ok(report)
    }

    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username, password_hash, role FROM users ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
                role: row.get(3)?,
            })
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_users(&self) -> Result<i64> {
        count_rows(&self.conn, "users")
    }

    /// Insert one incident and return its assigned id.
    ///
    /// # Errors
    /// Returns an error when the insert fails, or an [`intel_platform_core::PlatformError`] wrapped in
    /// the error when validation rejects the incident.
    pub fn insert_incident(&mut self, incident: &NewIncident) -> Result<i64> {
        incident.validate()?;

        self.conn
            .execute(
                "INSERT INTO cyber_incidents(
                    date, incident_type, severity, status, description, reported_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    incident.date.trim(),
                    incident.incident_type,
                    incident.severity.as_str(),
                    incident.status,
                    incident.description,
                    incident.reported_by,
                ],
            )
            .context("failed to insert incident")?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Load every incident ordered by id.
    ///
    /// A missing or unrecognised severity is read as `None`.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_incidents(&self) -> Result<Vec<Incident>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, incident_type, severity, status, description, reported_by
             FROM cyber_incidents
             ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut incidents = Vec::new();

        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let severity_raw: Option<String> = row.get(3)?;
            let severity = severity_raw.as_deref().and_then(|raw| {
                let parsed = Severity::parse(raw);
                if parsed.is_none() && !raw.trim().is_empty() {
                    warn!(id, severity = raw, "incident has an unknown severity");
                }
                parsed
            });

            incidents.push(Incident {
                id,
                date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                incident_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                severity,
                status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                reported_by: row.get(6)?,
            });
        }

        Ok(incidents)
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_incidents(&self) -> Result<i64> {
        count_rows(&self.conn, "cyber_incidents")
    }

    /// Incident counts per type, largest first.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn incidents_by_type_count(&self) -> Result<Vec<TypeCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT incident_type, COUNT(*) AS count
             FROM cyber_incidents
             WHERE incident_type IS NOT NULL
             GROUP BY incident_type
             ORDER BY count DESC, incident_type ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TypeCount { incident_type: row.get(0)?, count: row.get(1)? })
        })?;
        collect_rows(rows)
    }

    /// Counts per status among `High` and `Critical` incidents.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn high_severity_by_status(&self) -> Result<Vec<StatusCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) AS count
             FROM cyber_incidents
             WHERE severity COLLATE NOCASE IN (?1, ?2) AND status IS NOT NULL
             GROUP BY status
             ORDER BY count DESC, status ASC",
        )?;
        let rows = stmt.query_map(
            params![Severity::High.as_str(), Severity::Critical.as_str()],
            |row| Ok(StatusCount { status: row.get(0)?, count: row.get(1)? }),
        )?;
        collect_rows(rows)
    }

    /// Types with strictly more than `min_count` incidents.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn types_with_many_cases(&self, min_count: i64) -> Result<Vec<TypeCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT incident_type, COUNT(*) AS count
             FROM cyber_incidents
             WHERE incident_type IS NOT NULL
             GROUP BY incident_type
             HAVING COUNT(*) > ?1
             ORDER BY count DESC, incident_type ASC",
        )?;
        let rows = stmt.query_map(params![min_count], |row| {
            Ok(TypeCount { incident_type: row.get(0)?, count: row.get(1)? })
        })?;
        collect_rows(rows)
    }

    /// Row counts for every platform table.
    ///
    /// # Errors
    /// Returns an error when a table is missing or cannot be counted.
    pub fn table_row_counts(&self) -> Result<Vec<TableCount>> {
        DOMAIN_TABLES
            .iter()
            .map(|table| {
                Ok(TableCount { table: (*table).to_string(), rows: count_rows(&self.conn, table)? })
            })
            .collect()
    }
}

fn insert_user_row(
    conn: &Connection,
    user: &NewUser,
    on_conflict: OnConflict,
) -> Result<InsertOutcome> {
    let sql = match on_conflict {
        OnConflict::Abort => {
            "INSERT INTO users(username, password_hash, role) VALUES (?1, ?2, ?3)"
        }
        OnConflict::Ignore => {
            "INSERT OR IGNORE INTO users(username, password_hash, role) VALUES (?1, ?2, ?3)"
        }
    };

    let changed = conn
        .execute(sql, params![user.username, user.password_hash, user.role])
        .with_context(|| format!("failed to insert user {}", user.username))?;

    if changed == 0 {
        return Ok(InsertOutcome::Ignored);
    }
    Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
}

fn collect_rows<T, F>(rows: rusqlite::MappedRows<'_, F>) -> Result<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
        .with_context(|| format!("failed to count rows in {table}"))
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    for table in DOMAIN_TABLES {
        if !table_exists(conn, table)? {
            return Ok((0, false));
        }
    }

    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
