//! Destination paths for event documents.
//!
//! Documents land at
//! `<base>/<Event type>/<YYYY-MM-DD> - <title> - <document id>.<extension>`.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use url::Url;

use crate::models::{DocumentReference, Event};

/// Extension used when the URL does not reveal one.
pub const DEFAULT_EXTENSION: &str = "pdf";

/// Compute where a document of `event` is stored under `base`.
///
/// The date comes from the document's own `dd.mm.yyyy` date, falling back to
/// the event's timestamp when that is missing or unparsable.
pub fn document_path(base: &Path, event: &Event, document: &DocumentReference) -> PathBuf {
    let date = document
        .date
        .as_deref()
        .and_then(parse_document_date)
        .unwrap_or_else(|| event.timestamp.date_naive());
    let extension =
        extension_from_url(&document.url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    let mut folder = event.event_type.capitalized();
    if folder.is_empty() {
        folder = "Other".to_string();
    }

    let name = format!(
        "{} - {} - {}.{}",
        date.format("%Y-%m-%d"),
        sanitize_component(&document.title),
        sanitize_component(&document.id),
        extension
    );
    base.join(sanitize_component(&folder)).join(name)
}

/// Parse a `dd.mm.yyyy` document date.
pub fn parse_document_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%d.%m.%Y").ok()
}

/// Extension of the last path segment of `url`, lowercase, without the dot.
///
/// The query string and fragment are ignored.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let last_segment = path.rsplit('/').next()?;
    let (stem, extension) = last_segment.rsplit_once('.')?;
    if stem.is_empty()
        || extension.is_empty()
        || extension.len() > 8
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Make `value` safe as a single path component.
///
/// Separators and characters rejected by common file systems become `_`.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => "_".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(event_type: &str) -> Event {
        serde_json::from_value(serde_json::json!({
            "id": "evt-1",
            "timestamp": Utc.with_ymd_and_hms(2023, 5, 17, 9, 30, 0).unwrap().to_rfc3339(),
            "title": "Apple",
            "eventType": event_type,
        }))
        .unwrap()
    }

    fn document(url: &str, date: Option<&str>) -> DocumentReference {
        DocumentReference {
            url: url.to_string(),
            title: "Abrechnung".to_string(),
            id: "doc-1".to_string(),
            date: date.map(String::from),
        }
    }

    #[test]
    fn test_path_uses_document_date() {
        let path = document_path(
            Path::new("/base"),
            &event("ORDER_EXECUTED"),
            &document("https://example.com/abc.pdf?sig=1", Some("01.03.2023")),
        );
        assert_eq!(
            path,
            Path::new("/base/Order_executed/2023-03-01 - Abrechnung - doc-1.pdf")
        );
    }

    #[test]
    fn test_unparsable_date_falls_back_to_event_timestamp() {
        let path = document_path(
            Path::new("/base"),
            &event("ORDER_EXECUTED"),
            &document("https://example.com/abc.pdf", Some("soon")),
        );
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "2023-05-17 - Abrechnung - doc-1.pdf"
        );

        let path = document_path(
            Path::new("/base"),
            &event("ORDER_EXECUTED"),
            &document("https://example.com/abc.pdf", None),
        );
        assert!(path.to_str().unwrap().contains("2023-05-17 - "));
    }

    #[test]
    fn test_extension_defaults_to_pdf() {
        let path = document_path(
            Path::new("/base"),
            &event("ORDER_EXECUTED"),
            &document("https://example.com/documents/abcdef", None),
        );
        assert_eq!(path.extension().unwrap(), "pdf");
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://x.com/a/b.PDF"), Some("pdf".to_string()));
        assert_eq!(extension_from_url("https://x.com/a/b.csv?x=1.zip"), Some("csv".to_string()));
        assert_eq!(extension_from_url("https://x.com/a/b?x=1.zip"), None);
        assert_eq!(extension_from_url("https://x.com/a.dir/b"), None);
        assert_eq!(extension_from_url("https://x.com/a/.hidden"), None);
        assert_eq!(extension_from_url("/relative/file.html"), Some("html".to_string()));
    }

    #[test]
    fn test_title_cannot_escape_folder() {
        let mut doc = document("https://example.com/a.pdf", None);
        doc.title = "../../etc/passwd".to_string();
        let path = document_path(Path::new("/base"), &event("ORDER_EXECUTED"), &doc);
        assert_eq!(path.parent().unwrap(), Path::new("/base/Order_executed"));
    }

    #[test]
    fn test_empty_event_type_folder() {
        let path = document_path(
            Path::new("/base"),
            &event(""),
            &document("https://example.com/a.pdf", None),
        );
        assert!(path.starts_with("/base/Other"));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Kauf: Apple / AAPL"), "Kauf_ Apple _ AAPL");
        assert_eq!(sanitize_component("  "), "_");
        assert_eq!(sanitize_component(".."), "_");
    }
}
