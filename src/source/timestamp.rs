use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("failed to parse timestamp '{value}' with format '{format}': {source}")]
    ParseError {
        value: String,
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
}

impl TimestampFormat {
    /// One of: strptime format string, 'iso8601', 'epoch', 'epoch_ms'
    pub fn new(format: &str) -> Self {
        match format {
            "iso8601" => TimestampFormat::Iso8601,
            "epoch" => TimestampFormat::Epoch,
            "epoch_ms" => TimestampFormat::EpochMs,
            other => TimestampFormat::Strptime(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TimestampFormat::Strptime(fmt) => fmt,
            TimestampFormat::Iso8601 => "iso8601",
            TimestampFormat::Epoch => "epoch",
            TimestampFormat::EpochMs => "epoch_ms",
        }
    }

    /// Parse one field value. Timezone-naive values are taken as UTC.
    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        let value = value.trim();
        match self {
            TimestampFormat::Iso8601 => DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| parse_error(value, "iso8601", e)),
            TimestampFormat::Epoch => {
                let seconds: i64 = value.parse().map_err(|e| parse_error(value, "epoch", e))?;
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| out_of_range(value, "epoch"))
            }
            TimestampFormat::EpochMs => {
                let millis: i64 = value
                    .parse()
                    .map_err(|e| parse_error(value, "epoch_ms", e))?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| out_of_range(value, "epoch_ms"))
            }
            TimestampFormat::Strptime(fmt) => parse_strptime(value, fmt),
        }
    }
}

fn parse_strptime(value: &str, format: &str) -> Result<DateTime<Utc>, TimestampError> {
    if format.contains("%z") || format.contains("%Z") || format.contains("%:z") {
        return DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| parse_error(value, format, e));
    }

    match NaiveDateTime::parse_from_str(value, format) {
        Ok(ndt) => Ok(Utc.from_utc_datetime(&ndt)),
        // Date-only formats have no time fields for NaiveDateTime to fill.
        Err(datetime_err) => NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .ok_or_else(|| parse_error(value, format, datetime_err)),
    }
}

fn parse_error<E>(value: &str, format: &str, source: E) -> TimestampError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TimestampError::ParseError {
        value: value.to_string(),
        format: format.to_string(),
        source: Box::new(source),
    }
}

fn out_of_range(value: &str, format: &str) -> TimestampError {
    parse_error(
        value,
        format,
        std::io::Error::new(std::io::ErrorKind::InvalidData, "timestamp out of range"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_with_offset() {
        let result = TimestampFormat::new("iso8601")
            .parse("2025-12-04T02:42:11+05:30")
            .unwrap();
        assert_eq!(result.to_rfc3339(), "2025-12-03T21:12:11+00:00");
    }

    #[test]
    fn test_epoch_seconds() {
        let result = TimestampFormat::new("epoch").parse("1733280131").unwrap();
        assert_eq!(result.timestamp(), 1733280131);
    }

    #[test]
    fn test_epoch_milliseconds() {
        let result = TimestampFormat::new("epoch_ms")
            .parse("1733280131011")
            .unwrap();
        assert_eq!(result.timestamp(), 1733280131);
        assert_eq!(result.timestamp_subsec_millis(), 11);
    }

    #[test]
    fn test_default_strptime_format() {
        let result = TimestampFormat::new("%Y-%m-%d %H:%M:%S")
            .parse("2025-12-04 02:42:11")
            .unwrap();
        assert_eq!(result.to_rfc3339(), "2025-12-04T02:42:11+00:00");
    }

    #[test]
    fn test_timezone_aware_strptime() {
        let result = TimestampFormat::new("%Y-%m-%d %H:%M:%S %z")
            .parse("2025-12-04 02:42:11 +0530")
            .unwrap();
        assert_eq!(result.to_rfc3339(), "2025-12-03T21:12:11+00:00");
    }

    #[test]
    fn test_date_only_format_is_midnight() {
        let result = TimestampFormat::new("%Y-%m-%d").parse("2025-12-04").unwrap();
        assert_eq!(result.to_rfc3339(), "2025-12-04T00:00:00+00:00");
    }

    #[test]
    fn test_unparseable_timestamp() {
        let result = TimestampFormat::new("epoch").parse("not_a_number");
        assert!(matches!(result, Err(TimestampError::ParseError { .. })));
    }
}
