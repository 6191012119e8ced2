use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::errors::{DomainError, DomainResult};

/// Date layout used whenever a customer date is rendered as text.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A customer row as read from the `customer` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub customer_id: i64,
    pub name: String,
    pub email: String,
    pub mobile_number: String,
    pub created_at: Option<NaiveDate>,
    pub created_by: String,
    pub updated_at: Option<NaiveDate>,
    pub updated_by: Option<String>,
}

impl Customer {
    /// Maps a row by column name. NULL text columns become empty strings and
    /// NULL dates become `None`; a missing `customer_id` is a malformed row.
    pub fn from_row(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Self> {
        let customer_id: Option<i64> = row.try_get("customer_id")?;
        let customer_id = customer_id
            .ok_or_else(|| DomainError::MalformedRow("customer_id is NULL".to_string()))?;

        Ok(Self {
            customer_id,
            name: text_column(row, "name")?,
            email: text_column(row, "email")?,
            mobile_number: text_column(row, "mobile_number")?,
            created_at: date_column(row, "created_at")?,
            created_by: text_column(row, "created_by")?,
            updated_at: date_column(row, "updated_at")?,
            updated_by: row.try_get("updated_by")?,
        })
    }

    pub fn created_at_display(&self) -> String {
        format_date(self.created_at)
    }

    pub fn updated_at_display(&self) -> String {
        format_date(self.updated_at)
    }
}

/// Renders an optional date as `yyyy-MM-dd`, or an empty string when absent.
pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

fn text_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> DomainResult<String> {
    let value: Option<String> = row.try_get(column)?;
    Ok(value.unwrap_or_default())
}

/// Parses the leading `yyyy-MM-dd` of a stored date, dropping any time of day
/// (`2024-01-15 10:30:00`, `2024-01-15T10:30:00Z`).
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = value.get(..10)?;
    let rest = &value[10..];
    if !rest.is_empty() && !rest.starts_with([' ', 'T']) {
        return None;
    }
    NaiveDate::parse_from_str(day, DATE_FORMAT).ok()
}

fn date_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> DomainResult<Option<NaiveDate>> {
    let value: Option<String> = row
        .try_get(column)
        .map_err(|e| DomainError::MalformedRow(format!("{}: {}", column, e)))?;
    value
        .map(|v| {
            parse_date(&v).ok_or_else(|| {
                DomainError::MalformedRow(format!("{}: unparseable date '{}'", column, v))
            })
        })
        .transpose()
}
