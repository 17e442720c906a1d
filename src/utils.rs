use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const OUTPUT_FILE_PREFIX: &str = "Places";

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

/// Parses `input` and accepts only http and https URLs.
pub fn validate_url(input: &str) -> Option<Url> {
    let parsed = Url::parse(input).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Some(parsed),
        _ => None,
    }
}

/// `<dir>/Places-YYYY-MM-DD-HH-MM-SS.csv` for the given start time.
pub fn timestamped_output_path<Tz>(dir: &Path, started_at: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    dir.join(format!(
        "{}-{}.csv",
        OUTPUT_FILE_PREFIX,
        started_at.format("%Y-%m-%d-%H-%M-%S")
    ))
}

/// Drops a leading UTF-8 byte order mark, if present.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, Utc};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.google.com/maps/place/x").is_some());
        assert!(validate_url("http://example.com").is_some());
        assert!(validate_url("ftp://example.com").is_none());
        assert!(validate_url("not a url").is_none());
        assert!(validate_url("").is_none());
    }

    #[test]
    fn test_timestamped_output_path() {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let path = timestamped_output_path(Path::new("./outputs"), &started_at);
        assert_eq!(path, PathBuf::from("./outputs/Places-2024-03-07-09-05-02.csv"));

        let local = timestamped_output_path(Path::new("out"), &Local::now());
        assert!(local.to_string_lossy().starts_with("out/Places-"));
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFid,name"), b"id,name");
        assert_eq!(strip_bom(b"id,name"), b"id,name");
        assert_eq!(strip_bom(b""), b"");
    }
}
