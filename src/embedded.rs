//! Fast path for sites that ship their own domain list inside an inline script,
//! as a `"__map": [["domain", n], ...]` JSON fragment.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

static MAP_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r#""__map"\s*:\s*"#).unwrap());

static SCRIPT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("script").unwrap());

/// Domains listed in every embedded domain map found in inline scripts.
/// Sorted and deduplicated; empty when the page carries no map.
pub fn extract(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut found = BTreeSet::new();

    for script in document.select(&SCRIPT_SELECTOR) {
        if script.value().attr("src").is_some() {
            continue;
        }
        let body: String = script.text().collect();
        if body.is_empty() {
            continue;
        }
        found.extend(extract_from_script(&body));
    }

    found.into_iter().collect()
}

/// Parses each `"__map"` occurrence in a single script body. The array after the
/// marker is read with a streaming JSON reader so trailing script text is ignored.
pub fn extract_from_script(body: &str) -> Vec<String> {
    let mut domains = Vec::new();

    for marker in MAP_MARKER.find_iter(body) {
        let rest = &body[marker.end()..];
        if !rest.starts_with('[') {
            continue;
        }

        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Array(entries))) => {
                for entry in entries {
                    if let Some(domain) = entry_domain(&entry) {
                        domains.push(domain);
                    }
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => debug!("Embedded domain map is not valid JSON: {}", e),
            None => {}
        }
    }

    domains
}

fn entry_domain(entry: &Value) -> Option<String> {
    let first = entry.as_array()?.first()?.as_str()?;
    let looks_like_domain = !first.is_empty()
        && first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    looks_like_domain.then(|| first.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_all_entries_of_map() {
        let html = r#"<html><head><script>
            window.___r = {"config":{"__map": [["reddit.com", 1], ["redditmedia.com", 2], ["redd.it", 3]], "other": true}};
        </script></head><body></body></html>"#;
        assert_eq!(extract(html), vec!["redd.it", "reddit.com", "redditmedia.com"]);
    }

    #[test]
    fn test_no_map_returns_empty() {
        let html = "<html><script>var x = {\"map\": [[\"a.com\", 1]]};</script></html>";
        assert!(extract(html).is_empty());
    }

    #[test]
    fn test_external_scripts_ignored() {
        let html = r#"<script src="/app.js"></script><script>{"__map":[["cdn.example.com",0]]}</script>"#;
        assert_eq!(extract(html), vec!["cdn.example.com"]);
    }

    #[test]
    fn test_malformed_map_is_skipped() {
        let body = r#"{"__map": [["a.example.com", 1], ["b.example"#;
        assert!(extract_from_script(body).is_empty());
    }

    #[test]
    fn test_non_domain_entries_skipped() {
        let body = r#"{"__map": [["ok.example.com", 1], [42, 1], "flat", ["has space.com", 2], []]}"#;
        assert_eq!(extract_from_script(body), vec!["ok.example.com"]);
    }

    #[test]
    fn test_multiple_scripts_merge_and_dedup() {
        let html = r#"
            <script>a = {"__map":[["x.example.com",1],["y.example.com",2]]}</script>
            <script>b = {"__map" : [["y.example.com",3],["Z.example.com",4]]}</script>
        "#;
        assert_eq!(extract(html), vec!["x.example.com", "y.example.com", "z.example.com"]);
    }
}
