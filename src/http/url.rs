//! URL helpers.

use super::HttpError;

/// Joins URL segments with exactly one `/` between them.
///
/// Leading and trailing slashes of every segment are dropped and empty
/// segments are skipped, so `["https://h/", "/svc/", "api/v1"]` becomes
/// `https://h/svc/api/v1`.
pub fn join_url_segments(segments: &[&str]) -> Result<String, HttpError> {
    let joined = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if joined.is_empty() {
        return Err(HttpError::InvalidUrl(
            "cannot build a URL from empty segments".to_string(),
        ));
    }
    Ok(joined)
}
