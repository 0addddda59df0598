//! Column encoding shared by the table modules.

use chrono::{DateTime, SecondsFormat, Utc};
use postbox_shared::UserRef;
use rusqlite::types::Type;
use uuid::Uuid;

/// Fixed-width RFC-3339 (`2024-01-01T00:00:00.000000Z`); sorts lexically.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn ts_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn opt_uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn user_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<UserRef> {
    let raw: String = row.get(idx)?;
    UserRef::new(raw).map_err(|e| conversion_failure(idx, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_timestamps_sort_chronologically() {
        let early = DateTime::from_timestamp_micros(1_000_000).unwrap();
        let late = DateTime::from_timestamp_micros(10_000_001).unwrap();
        let (a, b) = (encode_ts(&early), encode_ts(&late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }
}
