//! Bulk CSV loading into platform tables.
//!
//! A file's header row names the target columns. Rows are appended inside a
//! single transaction; a table that does not exist yet is created with one
//! `TEXT` column per header.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{table_exists, SqliteStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CsvLoadOutcome {
    Loaded { rows: usize },
    MissingFile,
}

impl SqliteStore {
    /// Append every data row of `csv_path` to `table`.
    ///
    /// A missing file is reported as [`CsvLoadOutcome::MissingFile`] rather
    /// than an error. Empty cells are stored as `NULL`.
    ///
    /// # Errors
    /// Returns an error when `table` or a header is not a usable identifier,
    /// the file cannot be parsed, a record has the wrong field count, or any
    /// insert fails. No rows from the file are kept in that case.
    pub fn load_csv_into_table(&mut self, csv_path: &Path, table: &str) -> Result<CsvLoadOutcome> {
        if !is_plain_identifier(table) {
            return Err(anyhow!("invalid table name: {table:?}"));
        }

        if !csv_path.exists() {
            warn!(path = %csv_path.display(), "csv file not found");
            return Ok(CsvLoadOutcome::MissingFile);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(csv_path)
            .with_context(|| format!("failed to open csv file {}", csv_path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("failed to read csv header of {}", csv_path.display()))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if headers.is_empty() {
            return Err(anyhow!("csv file {} has no header row", csv_path.display()));
        }
        if let Some(blank) = headers.iter().position(String::is_empty) {
            return Err(anyhow!(
                "csv file {} has an empty header in column {}",
                csv_path.display(),
                blank + 1
            ));
        }

        let quoted_table = quote_identifier(table);
        let columns = headers.iter().map(|header| quote_identifier(header)).collect::<Vec<_>>();

        let tx = self.conn.transaction().context("failed to start csv load transaction")?;

        if !table_exists(&tx, table)? {
            let definitions =
                columns.iter().map(|column| format!("{column} TEXT")).collect::<Vec<_>>();
            tx.execute_batch(&format!(
                "CREATE TABLE {quoted_table} ({});",
                definitions.join(", ")
            ))
            .with_context(|| format!("failed to create table {table} from csv header"))?;
            info!(table, columns = columns.len(), "created table from csv header");
        }

        let placeholders =
            (1..=columns.len()).map(|index| format!("?{index}")).collect::<Vec<_>>();
        let insert = format!(
            "INSERT INTO {quoted_table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut rows = 0_usize;
        {
            let mut stmt = tx
                .prepare(&insert)
                .with_context(|| format!("failed to prepare insert into {table}"))?;

            for (index, record) in reader.records().enumerate() {
                let record = record.with_context(|| {
                    format!("failed to read record {} of {}", index + 1, csv_path.display())
                })?;
                let values = record.iter().map(|value| (!value.is_empty()).then_some(value));
                stmt.execute(params_from_iter(values)).with_context(|| {
                    format!("failed to insert record {} into {table}", index + 1)
                })?;
                rows += 1;
            }
        }

        tx.commit().context("failed to commit csv load transaction")?;
        info!(path = %csv_path.display(), table, rows, "loaded csv file");
        Ok(CsvLoadOutcome::Loaded { rows })
    }
}

fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
