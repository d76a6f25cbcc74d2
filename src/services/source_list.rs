use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client as HttpClient;

use crate::{
    error::{AppError, AppResult},
    models::{DroppedRow, MediaKind, SourceEntry},
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Accepted names for the identifier column, in order of preference
const ID_COLUMNS: &[&str] = &["const", "imdb_id", "imdbid", "id"];
const TITLE_COLUMNS: &[&str] = &["title", "original title"];
const KIND_COLUMNS: &[&str] = &["title type", "titletype", "type"];

static IMDB_TITLE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tt\d+$").expect("valid regex"));

/// Parsed source list plus what was discarded along the way
#[derive(Debug, Clone, Default)]
pub struct ParsedSourceList {
    /// Unique entries in row order
    pub entries: Vec<SourceEntry>,
    /// Data rows seen, excluding the header
    pub total_rows: usize,
    pub dropped: Vec<DroppedRow>,
    /// Rows whose id had already been seen
    pub duplicate_rows: usize,
}

/// Reads the IMDb list export from an http(s) URL or a local path
pub async fn fetch_source_list(location: &str) -> AppResult<Vec<u8>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        tracing::debug!(url = %location, "Fetching remote source list");

        let client = HttpClient::builder().timeout(FETCH_TIMEOUT).build()?;
        let response = client
            .get(location)
            .send()
            .await
            .map_err(|e| AppError::SourceUnavailable(format!("Failed to fetch source list: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::SourceUnavailable(format!(
                "Source list returned status {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::SourceUnavailable(format!("Failed to read source list: {}", e)))?;
        Ok(body.to_vec())
    } else {
        tracing::debug!(path = %location, "Reading local source list");
        tokio::fs::read(location)
            .await
            .map_err(|e| AppError::SourceUnavailable(format!("Failed to read {}: {}", location, e)))
    }
}

fn find_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|candidate| headers.iter().position(|h| h == candidate))
}

/// Parses a CSV export into unique source entries
///
/// Only a missing identifier column is fatal. Rows without a usable id are
/// dropped and recorded; repeated ids keep their first occurrence.
pub fn parse_source_list(data: &[u8]) -> AppResult<ParsedSourceList> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);

    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::MalformedInput("source list is empty".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::MalformedInput(format!("Failed to read CSV headers: {}", e)))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let id_column = find_column(&headers, ID_COLUMNS).ok_or_else(|| {
        AppError::MalformedInput(format!(
            "no identifier column (expected one of {:?}, found {:?})",
            ID_COLUMNS, headers
        ))
    })?;
    let title_column = find_column(&headers, TITLE_COLUMNS);
    let kind_column = find_column(&headers, KIND_COLUMNS);

    let mut parsed = ParsedSourceList::default();
    let mut seen = HashSet::new();

    for (idx, result) in reader.records().enumerate() {
        parsed.total_rows += 1;
        let fallback_line = idx + 2;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                parsed.dropped.push(DroppedRow {
                    line,
                    reason: format!("unreadable row: {}", e),
                });
                continue;
            }
        };
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);

        let external_id = record.get(id_column).unwrap_or("");
        if external_id.is_empty() {
            parsed.dropped.push(DroppedRow {
                line,
                reason: "missing identifier".to_string(),
            });
            continue;
        }
        if !IMDB_TITLE_ID.is_match(external_id) {
            parsed.dropped.push(DroppedRow {
                line,
                reason: format!("invalid identifier '{}'", external_id),
            });
            continue;
        }

        if !seen.insert(external_id.to_string()) {
            tracing::debug!(imdb_id = %external_id, line, "Duplicate row in source list");
            parsed.duplicate_rows += 1;
            continue;
        }

        let title = title_column
            .and_then(|c| record.get(c))
            .unwrap_or("")
            .to_string();
        let media_kind = kind_column
            .and_then(|c| record.get(c))
            .map(MediaKind::from_imdb_title_type)
            .unwrap_or(MediaKind::Unknown);

        parsed
            .entries
            .push(SourceEntry::new(external_id, title, media_kind));
    }

    if !parsed.dropped.is_empty() {
        tracing::warn!(dropped = parsed.dropped.len(), "Dropped unusable source rows");
    }
    tracing::info!(
        rows = parsed.total_rows,
        entries = parsed.entries.len(),
        duplicates = parsed.duplicate_rows,
        "Parsed source list"
    );

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const IMDB_EXPORT: &str = "\
Position,Const,Created,Modified,Description,Title,URL,Title Type,IMDb Rating
1,tt0133093,2024-01-01,2024-01-01,,The Matrix,https://www.imdb.com/title/tt0133093/,Movie,8.7
2,tt0903747,2024-01-02,2024-01-02,,Breaking Bad,https://www.imdb.com/title/tt0903747/,TV Series,9.5
";

    #[test]
    fn test_parse_imdb_export() {
        let parsed = parse_source_list(IMDB_EXPORT.as_bytes()).unwrap();
        assert_eq!(parsed.total_rows, 2);
        assert_eq!(
            parsed.entries,
            vec![
                SourceEntry::new("tt0133093", "The Matrix", MediaKind::Movie),
                SourceEntry::new("tt0903747", "Breaking Bad", MediaKind::Show),
            ]
        );
    }

    #[test]
    fn test_parse_maps_compact_title_types() {
        let csv = "Const,Title,Title Type\ntt1,A,tvSeries\ntt2,B,tvMovie\n";
        let parsed = parse_source_list(csv.as_bytes()).unwrap();
        assert_eq!(parsed.entries[0].media_kind, MediaKind::Show);
        assert_eq!(parsed.entries[1].media_kind, MediaKind::Movie);
    }

    #[test]
    fn test_duplicate_ids_collapse_to_first_occurrence() {
        let csv = "Const,Title\ntt1,First\ntt1,Second\ntt2,Other\n";
        let parsed = parse_source_list(csv.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].title, "First");
        assert_eq!(parsed.duplicate_rows, 1);
    }

    #[test]
    fn test_rows_without_usable_id_are_dropped() {
        let csv = "Const,Title\ntt1,Good\n,Missing\nnm0000206,Person\ntt2,Also good\n";
        let parsed = parse_source_list(csv.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.dropped.len(), 2);
        assert_eq!(parsed.dropped[0].line, 3);
        assert_eq!(parsed.dropped[0].reason, "missing identifier");
        assert!(parsed.dropped[1].reason.contains("nm0000206"));
    }

    #[test]
    fn test_ragged_rows_are_tolerated() {
        let csv = "Const,Title,Title Type\ntt1\ntt2,Two,movie,extra\n";
        let parsed = parse_source_list(csv.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].title, "");
        assert_eq!(parsed.entries[0].media_kind, MediaKind::Unknown);
    }

    #[test]
    fn test_bom_and_header_case_are_ignored() {
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(b" CONST ,TITLE\ntt42,Answer\n");
        let parsed = parse_source_list(&data).unwrap();
        assert_eq!(parsed.entries, vec![SourceEntry::new("tt42", "Answer", MediaKind::Unknown)]);
    }

    #[test]
    fn test_missing_identifier_column_is_malformed() {
        let csv = "Title,Year\nThe Matrix,1999\n";
        let result = parse_source_list(csv.as_bytes());
        assert!(matches!(result, Err(AppError::MalformedInput(_))));
    }

    #[test]
    fn test_empty_input_is_malformed() {
        assert!(matches!(parse_source_list(b""), Err(AppError::MalformedInput(_))));
        assert!(matches!(parse_source_list(b" \n"), Err(AppError::MalformedInput(_))));
    }

    #[test]
    fn test_header_only_yields_no_entries() {
        let parsed = parse_source_list(b"Const,Title\n").unwrap();
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.total_rows, 0);
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(IMDB_EXPORT.as_bytes()).unwrap();

        let data = fetch_source_list(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(data, IMDB_EXPORT.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_source_unavailable() {
        let result = fetch_source_list("/nonexistent/watchlist.csv").await;
        assert!(matches!(result, Err(AppError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_fetch_remote_list() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export"))
            .respond_with(ResponseTemplate::new(200).set_body_string(IMDB_EXPORT))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let data = fetch_source_list(&format!("{}/export", server.uri()))
            .await
            .unwrap();
        assert_eq!(parse_source_list(&data).unwrap().entries.len(), 2);

        let missing = fetch_source_list(&format!("{}/missing", server.uri())).await;
        assert!(matches!(missing, Err(AppError::SourceUnavailable(_))));
    }
}
