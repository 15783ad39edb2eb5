//! Import of cookies exported by browser extensions (a JSON array of objects
//! with `name, value, domain, path, secure, httpOnly, expirationDate, session,
//! sameSite`). Lets an operator crawl a site as a logged-in user.

use crate::render::{BrowserCookie, SameSite};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CookieImportError {
    #[error("Cookie file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read cookie file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in cookie file: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Cookie entry {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedCookie {
    name: Option<String>,
    value: Option<String>,
    domain: Option<String>,
    path: Option<String>,
    secure: Option<bool>,
    http_only: Option<bool>,
    expiration_date: Option<f64>,
    session: Option<bool>,
    same_site: Option<String>,
}

pub fn load_cookie_file(path: &Path) -> Result<Vec<BrowserCookie>, CookieImportError> {
    if !path.exists() {
        return Err(CookieImportError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| CookieImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_cookie_export(&content)
}

/// Any malformed entry rejects the whole file.
pub fn parse_cookie_export(json: &str) -> Result<Vec<BrowserCookie>, CookieImportError> {
    let exported: Vec<ExportedCookie> = serde_json::from_str(json)?;

    exported
        .into_iter()
        .enumerate()
        .map(|(index, cookie)| -> Result<BrowserCookie, CookieImportError> {
            let required = |value: Option<String>, field: &'static str| {
                value.ok_or(CookieImportError::MissingField { index, field })
            };

            let expires = match (cookie.expiration_date, cookie.session.unwrap_or(false)) {
                (Some(ts), false) if ts != 0.0 => Some(ts.trunc()),
                _ => None,
            };

            Ok(BrowserCookie {
                name: required(cookie.name, "name")?,
                value: required(cookie.value, "value")?,
                domain: required(cookie.domain, "domain")?,
                path: cookie.path.unwrap_or_else(|| "/".to_string()),
                secure: cookie.secure.unwrap_or(false),
                http_only: cookie.http_only.unwrap_or(false),
                expires,
                same_site: cookie.same_site.as_deref().and_then(map_same_site),
            })
        })
        .collect()
}

/// Extension exports use `no_restriction`/`lax`/`strict`/`unspecified`.
fn map_same_site(value: &str) -> Option<SameSite> {
    match value {
        "no_restriction" => Some(SameSite::None),
        "strict" => Some(SameSite::Strict),
        "lax" => Some(SameSite::Lax),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_maps_fields() {
        let json = r#"[
            {"name": "sid", "value": "abc", "domain": ".example.com", "path": "/", "secure": true,
             "httpOnly": true, "expirationDate": 1900000000.75, "session": false, "sameSite": "no_restriction"},
            {"name": "pref", "value": "1", "domain": "example.com", "session": true,
             "expirationDate": 1900000000, "sameSite": "lax"},
            {"name": "x", "value": "", "domain": "example.com", "sameSite": "unspecified"}
        ]"#;
        let cookies = parse_cookie_export(json).unwrap();
        assert_eq!(cookies.len(), 3);

        assert_eq!(cookies[0].expires, Some(1_900_000_000.0));
        assert_eq!(cookies[0].same_site, Some(SameSite::None));
        assert!(cookies[0].secure && cookies[0].http_only);

        assert_eq!(cookies[1].expires, None);
        assert_eq!(cookies[1].path, "/");
        assert_eq!(cookies[1].same_site, Some(SameSite::Lax));

        assert_eq!(cookies[2].same_site, None);
        assert!(!cookies[2].secure);
    }

    #[test]
    fn test_missing_required_field_rejects_file() {
        let json = r#"[{"name": "ok", "value": "1", "domain": "a.com"}, {"name": "bad", "value": "1"}]"#;
        match parse_cookie_export(json) {
            Err(CookieImportError::MissingField { index, field }) => {
                assert_eq!(index, 1);
                assert_eq!(field, "domain");
            }
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse_cookie_export("{not json"), Err(CookieImportError::InvalidJson(_))));
        assert!(matches!(parse_cookie_export(r#"{"name": "x"}"#), Err(CookieImportError::InvalidJson(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_cookie_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, CookieImportError::NotFound(_)));
    }
}
