// History query - Range parsing and filtering of completed cycles
use crate::domain::cycle::CycleRecord;
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use thiserror::Error;

/// Structured query failure, returned to the caller instead of raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct HistoryError {
    pub status: u16,
    pub message: String,
}

impl HistoryError {
    pub fn bad_request(message: String) -> Self {
        Self {
            status: 400,
            message,
        }
    }
}

/// Parse a range bound: epoch milliseconds, RFC 3339, RFC 2822 or a bare
/// `YYYY-MM-DD` date (midnight UTC).
pub fn parse_time(input: &str) -> Result<i64, HistoryError> {
    let s = input.trim();

    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(ms) = s.parse::<f64>() {
        if ms.is_finite() {
            return Ok(ms as i64);
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.timestamp_millis());
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return Ok(t.timestamp_millis());
    }
    if let Some(t) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc().timestamp_millis());
    }

    Err(HistoryError::bad_request(format!(
        "Can't parse {} as date/time",
        input
    )))
}

/// Cycles that started within `[start, end]`, oldest first.
///
/// `start` defaults to the epoch and `end` to `now_ms`. Records are assumed
/// to be in start order, so iteration stops at the first one past `end`.
pub fn query_history<'a>(
    records: impl IntoIterator<Item = &'a CycleRecord>,
    start: Option<&str>,
    end: Option<&str>,
    now_ms: i64,
) -> Result<Vec<CycleRecord>, HistoryError> {
    let start_ms = start.map(parse_time).transpose()?.unwrap_or(0);
    let end_ms = end.map(parse_time).transpose()?.unwrap_or(now_ms);

    let mut result = Vec::new();
    for record in records {
        if record.start_ms > end_ms {
            break;
        }
        if record.start_ms >= start_ms {
            result.push(*record);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;
    const NOW: i64 = 1_700_000_000_000;

    fn hourly(n: i64) -> Vec<CycleRecord> {
        let first = NOW - n * HOUR_MS;
        (0..n)
            .map(|i| CycleRecord::new(first + i * HOUR_MS, i as f64))
            .collect()
    }

    #[test]
    fn test_rejects_unparsable_bounds() {
        let records = hourly(5);

        let err = query_history(&records, Some("foo"), None, NOW).unwrap_err();
        assert_eq!(err.status, 400);
        assert!(err.message.contains("Can't parse"));

        let err = query_history(&records, Some("0"), Some("bar"), NOW).unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(err.message, "Can't parse bar as date/time");
    }

    #[test]
    fn test_defaults_return_everything() {
        let records = hourly(19);
        assert_eq!(query_history(&records, None, None, NOW).unwrap(), records);
    }

    #[test]
    fn test_default_end_is_now() {
        let records = hourly(3);
        let before_last = records[2].start_ms - 1;
        assert_eq!(
            query_history(&records, None, None, before_last).unwrap(),
            records[..2].to_vec()
        );
    }

    #[test]
    fn test_enforces_both_limits() {
        let records = hourly(19);
        let start = (records[3].start_ms - 30_000).to_string();
        let end = (records[6].start_ms + 20_000).to_string();

        let result = query_history(&records, Some(&start), Some(&end), NOW).unwrap();
        assert_eq!(result, records[3..7].to_vec());
    }

    #[test]
    fn test_accepts_date_strings() {
        assert_eq!(parse_time("1970-01-01T00:00:01Z").unwrap(), 1_000);
        assert_eq!(
            parse_time("Thu, 01 Jan 1970 00:00:02 +0000").unwrap(),
            2_000
        );
        assert_eq!(parse_time("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(parse_time(" 1500 ").unwrap(), 1_500);

        let err = parse_time("Thu, 01 Jan 1970 25:00:02 +0000").unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_string_and_numeric_bounds_agree() {
        let records = hourly(4);
        let as_rfc3339 = DateTime::from_timestamp_millis(records[1].start_ms)
            .unwrap()
            .to_rfc3339();

        let by_string = query_history(&records, Some(&as_rfc3339), None, NOW).unwrap();
        let by_number =
            query_history(&records, Some(&records[1].start_ms.to_string()), None, NOW).unwrap();
        assert_eq!(by_string, by_number);
        assert_eq!(by_string.len(), 3);
    }
}
