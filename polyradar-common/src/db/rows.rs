//! Column decoding helpers
//!
//! UUIDs and timestamps are stored as TEXT, structured columns as JSON TEXT.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use crate::{time, Error, Result};

pub(crate) fn uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.try_get(column)?;
    Uuid::parse_str(&value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}

pub(crate) fn opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|v| Uuid::parse_str(&v))
        .transpose()
        .map_err(|e| Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    time::from_db(&value)
}

pub(crate) fn opt_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value.as_deref().map(time::from_db).transpose()
}

pub(crate) fn parsed<T: FromStr<Err = Error>>(row: &SqliteRow, column: &str) -> Result<T> {
    let value: String = row.try_get(column)?;
    value.parse()
}

pub(crate) fn opt_parsed<T: FromStr<Err = Error>>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<T>> {
    let value: Option<String> = row.try_get(column)?;
    value.as_deref().map(|v| v.parse::<T>()).transpose()
}

pub(crate) fn json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let value: String = row.try_get(column)?;
    Ok(serde_json::from_str(&value)?)
}

pub(crate) fn opt_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(Error::from)
}

/// Encode an optional value as a JSON column (None stays NULL)
pub(crate) fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Error::from)
}
