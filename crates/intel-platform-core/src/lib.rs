use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

mod password;

pub use password::{hash_password, verify_password, BCRYPT_COST};

pub const DEFAULT_ROLE: &str = "user";
pub const DEFAULT_MIN_CASES: i64 = 5;
pub const LEGACY_FIELD_COUNT: usize = 3;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PlatformError {
    #[error("Username '{username}' already exists.")]
    DuplicateUser { username: String },
    #[error("User not found.")]
    UnknownUser,
    #[error("Incorrect password.")]
    BadCredentials,
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("file does not exist: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl PlatformError {
    /// Whether the caller can carry on after this failure without touching state.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Hashing(_) | Self::Io(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    /// Case-insensitive parse; surrounding whitespace is ignored.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|severity| severity.as_str().eq_ignore_ascii_case(value))
    }

    #[must_use]
    pub fn is_high(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

/// One `username,password_hash,role` line from a legacy credential file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub line_number: usize,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

impl CredentialRecord {
    #[must_use]
    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            username: self.username.clone(),
            password_hash: self.password_hash.clone(),
            role: self.role.clone(),
        }
    }
}

/// Parse one legacy credential line.
///
/// Returns `Ok(None)` for blank lines. Fields are trimmed and the hash is
/// taken verbatim.
///
/// # Errors
/// Returns [`PlatformError::MalformedRecord`] when the line does not have
/// exactly three fields or any field is empty.
pub fn parse_credential_line(
    line_number: usize,
    line: &str,
) -> Result<Option<CredentialRecord>, PlatformError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
    if fields.len() != LEGACY_FIELD_COUNT {
        return Err(PlatformError::MalformedRecord {
            line: line_number,
            reason: format!("expected {LEGACY_FIELD_COUNT} fields, found {}", fields.len()),
        });
    }

    for (name, value) in ["username", "password_hash", "role"].iter().zip(&fields) {
        if value.is_empty() {
            return Err(PlatformError::MalformedRecord {
                line: line_number,
                reason: format!("{name} is empty"),
            });
        }
    }

    Ok(Some(CredentialRecord {
        line_number,
        username: fields[0].to_string(),
        password_hash: fields[1].to_string(),
        role: fields[2].to_string(),
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub id: i64,
    pub date: String,
    pub incident_type: String,
    /// `None` when the stored value is missing or not a known level, which
    /// bulk-loaded rows may carry.
    pub severity: Option<Severity>,
    pub status: String,
    pub description: String,
    pub reported_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewIncident {
    pub date: String,
    pub incident_type: String,
    pub severity: Severity,
    pub status: String,
    pub description: String,
    pub reported_by: Option<String>,
}

impl NewIncident {
    /// # Errors
    /// Returns [`PlatformError::InvalidInput`] when the date is not `YYYY-MM-DD`
    /// or the type/status fields are blank.
    pub fn validate(&self) -> Result<(), PlatformError> {
        parse_iso_date(&self.date)?;
        if self.incident_type.trim().is_empty() {
            return Err(PlatformError::InvalidInput("incident type MUST be non-empty".to_string()));
        }
        if self.status.trim().is_empty() {
            return Err(PlatformError::InvalidInput("status MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

/// # Errors
/// Returns [`PlatformError::InvalidInput`] when `value` is not a calendar date
/// in `YYYY-MM-DD` form.
pub fn parse_iso_date(value: &str) -> Result<Date, PlatformError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| PlatformError::InvalidInput(format!("invalid ISO date '{value}': {err}")))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeCount {
    pub incident_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Console-facing `(success, message)` pair for an auth call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub message: String,
}

impl AuthOutcome {
    #[must_use]
    pub fn registered(result: &Result<User, PlatformError>) -> Self {
        match result {
            Ok(user) => Self {
                success: true,
                message: format!("User '{}' registered successfully.", user.username),
            },
            Err(err) => Self { success: false, message: err.to_string() },
        }
    }

    #[must_use]
    pub fn logged_in(result: &Result<User, PlatformError>) -> Self {
        match result {
            Ok(_) => Self { success: true, message: "Login successful!".to_string() },
            Err(err) => Self { success: false, message: err.to_string() },
        }
    }
}
