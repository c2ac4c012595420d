use chrono::{DateTime, Utc};

/// Coarse "time ago" wording for upload timestamps, without the suffix.
///
/// Returns `None` when `timestamp` is not RFC 3339.
pub fn distance_to_now(timestamp: &str, now: DateTime<Utc>) -> Option<String> {
    let then = DateTime::parse_from_rfc3339(timestamp).ok()?;
    let seconds = (now - then.with_timezone(&Utc)).num_seconds().max(0);
    let minutes = (seconds + 30) / 60;

    let text = match minutes {
        0 => "less than a minute".to_string(),
        1 => "1 minute".to_string(),
        2..=44 => format!("{} minutes", minutes),
        45..=89 => "about 1 hour".to_string(),
        90..=1439 => format!("about {} hours", (minutes + 30) / 60),
        1440..=2519 => "1 day".to_string(),
        2520..=43199 => format!("{} days", (minutes + 720) / 1440),
        43200..=86399 => "about 1 month".to_string(),
        86400..=525599 => format!("{} months", (minutes + 21600) / 43200),
        _ => {
            let years = minutes / 525600;
            if years == 1 {
                "about 1 year".to_string()
            } else {
                format!("about {} years", years)
            }
        }
    };
    Some(text)
}
