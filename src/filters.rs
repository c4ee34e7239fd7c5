use chrono::DateTime;

/// "2026-08-06T14:30:00+00:00" -> "06 Aug 2026 14:30". Values that fail to
/// parse render as stored.
pub fn dt(value: &str) -> askama::Result<String> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.format("%d %b %Y %H:%M").to_string())
        .unwrap_or_else(|_| value.to_string()))
}

/// Status values read better without their underscores.
pub fn status(value: &str) -> askama::Result<String> {
    Ok(match value {
        "no_show" => "no show".to_string(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_rfc3339_and_passes_garbage_through() {
        assert_eq!(dt("2026-08-06T14:30:00+00:00").unwrap(), "06 Aug 2026 14:30");
        assert_eq!(dt("tomorrow-ish").unwrap(), "tomorrow-ish");
    }

    #[test]
    fn humanizes_status_values() {
        assert_eq!(status("no_show").unwrap(), "no show");
        assert_eq!(status("pending").unwrap(), "pending");
    }
}
