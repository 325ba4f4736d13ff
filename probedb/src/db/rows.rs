//! Column decoding shared by the readers

use std::net::IpAddr;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::models::normalize_ip;
use crate::error::DbContext;
use crate::{Error, Result};

pub(crate) fn text(row: &SqliteRow, index: usize) -> Result<String> {
    row.try_get(index).db_context("failed to read text column")
}

pub(crate) fn bytes(row: &SqliteRow, index: usize) -> Result<Vec<u8>> {
    row.try_get(index).db_context("failed to read blob column")
}

pub(crate) fn ip(row: &SqliteRow, index: usize) -> Result<IpAddr> {
    let value = text(row, index)?;
    value
        .parse::<IpAddr>()
        .map(normalize_ip)
        .map_err(|_| Error::CorruptRow(format!("invalid IP address {:?}", value)))
}

pub(crate) fn uint<T>(row: &SqliteRow, index: usize) -> Result<T>
where
    T: TryFrom<i64>,
{
    let value: i64 = row.try_get(index).db_context("failed to read integer column")?;
    T::try_from(value).map_err(|_| {
        Error::CorruptRow(format!("integer {} out of range in column {}", value, index))
    })
}

/// Median results come back as REAL; round to nearest, ties to even
pub(crate) fn rounded_uint(row: &SqliteRow, index: usize) -> Result<u32> {
    let value: f64 = row.try_get(index).db_context("failed to read real column")?;
    let rounded = value.round_ties_even();
    if !(0.0..=f64::from(u32::MAX)).contains(&rounded) {
        return Err(Error::CorruptRow(format!(
            "value {} out of range in column {}",
            value, index
        )));
    }
    Ok(rounded as u32)
}
