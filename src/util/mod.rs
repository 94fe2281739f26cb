//! Small shared utilities.

pub mod retry;

use std::time::Duration;

use crate::error::{LeibnizError, Result};

/// Parse a human-friendly duration string.
///
/// Accepts a bare number (seconds) or a number with an `ms`, `s`, `m`, or `h`
/// suffix, e.g. `"90s"`, `"2m"`, `"120"`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LeibnizError::InvalidArgument("empty duration".into()));
    }

    let (digits, unit) = match trimmed.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, "s"),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| LeibnizError::InvalidArgument(format!("invalid duration '{trimmed}'")))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" | "" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(LeibnizError::InvalidArgument(format!(
            "unknown duration unit '{other}' in '{trimmed}'"
        ))),
    }
}

/// Format a duration the way definition files write it.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else if duration.subsec_millis() != 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_numbers_parse_as_seconds() {
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn suffixed_durations_parse() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn garbage_durations_are_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10 parsecs").is_err());
    }

    #[test]
    fn formatting_round_trips() {
        for input in ["45s", "2m", "500ms"] {
            let parsed = parse_duration(input).unwrap();
            assert_eq!(format_duration(parsed), input);
        }
    }
}
