//! URL canonicalization and near-duplicate detection used by the crawler.
//!
//! Two URLs are "practically the same page" when they share a host and differ
//! only by locale prefix, by a small edit in the path, or by presentation-only
//! query parameters (`?sort=new` vs `?sort=top`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// Default ratio at or above which two paths count as the same page.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Query keys that only change how a page is presented, not what it links to.
pub const VARIATION_PARAMS: [&str; 6] = ["feed", "view", "feedviewtype", "sort", "time", "layout"];

static LOCALE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/[a-z]{2}-[a-z]{2}(/.*)?$").unwrap());

static LOCALE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/[a-z]{2}-[a-z]{2}").unwrap());

/// Scores how alike two lowercase paths are, in `[0, 1]`.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;

    fn name(&self) -> &'static str;
}

/// Levenshtein distance normalized by the longer input.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditDistance;

/// Fraction of identical characters at identical positions over the longer input.
///
/// Never scores higher than [`EditDistance`] for the same pair: every mismatched
/// position and every trailing character costs at most one edit. Using it as the
/// gate can only let more URLs through to the frontier, never fewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Positional;

impl SimilarityScorer for EditDistance {
    fn score(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        let max_len = a_chars.len().max(b_chars.len());
        if max_len == 0 {
            return 1.0;
        }
        let distance = levenshtein_distance(&a_chars, &b_chars);
        1.0 - (distance as f64 / max_len as f64)
    }

    fn name(&self) -> &'static str {
        "edit-distance"
    }
}

impl SimilarityScorer for Positional {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        let max_len = a_chars.len().max(b_chars.len());
        if max_len == 0 {
            return 1.0;
        }
        let matches = a_chars
            .iter()
            .zip(b_chars.iter())
            .filter(|(x, y)| x == y)
            .count();
        matches as f64 / max_len as f64
    }

    fn name(&self) -> &'static str {
        "positional"
    }
}

fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row variant of the full matrix.
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Which scorer gates path similarity. Chosen once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityStrategy {
    #[default]
    EditDistance,
    Positional,
}

impl SimilarityStrategy {
    pub fn scorer(self) -> &'static dyn SimilarityScorer {
        match self {
            SimilarityStrategy::EditDistance => &EditDistance,
            SimilarityStrategy::Positional => &Positional,
        }
    }
}

impl std::str::FromStr for SimilarityStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edit-distance" | "levenshtein" => Ok(SimilarityStrategy::EditDistance),
            "positional" => Ok(SimilarityStrategy::Positional),
            other => Err(format!("unknown similarity strategy '{}'", other)),
        }
    }
}

/// Near-duplicate check bound to one scorer and threshold.
#[derive(Clone, Copy)]
pub struct UrlMatcher {
    scorer: &'static dyn SimilarityScorer,
    threshold: f64,
}

impl std::fmt::Debug for UrlMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlMatcher")
            .field("scorer", &self.scorer.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Default for UrlMatcher {
    fn default() -> Self {
        Self::new(SimilarityStrategy::EditDistance, DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl UrlMatcher {
    pub fn new(strategy: SimilarityStrategy, threshold: f64) -> Self {
        Self {
            scorer: strategy.scorer(),
            threshold,
        }
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// True when `a` and `b` should be treated as the same page.
    /// URLs on different hosts are never similar.
    pub fn similar(&self, a: &str, b: &str) -> bool {
        let (Ok(ua), Ok(ub)) = (Url::parse(a), Url::parse(b)) else {
            return false;
        };

        if authority(&ua).to_lowercase() != authority(&ub).to_lowercase() {
            return false;
        }

        let path_a = canonical_path(&ua);
        let path_b = canonical_path(&ub);

        if LOCALE_PATH.is_match(&path_a) && LOCALE_PATH.is_match(&path_b) {
            let rest_a = LOCALE_PREFIX.replace(&path_a, "");
            let rest_b = LOCALE_PREFIX.replace(&path_b, "");
            if rest_a == rest_b {
                return true;
            }
        }

        if !path_a.is_empty() && !path_b.is_empty() && self.scorer.score(&path_a, &path_b) >= self.threshold {
            return true;
        }

        if path_a == path_b {
            let params_a = grouped_params(&ua);
            let params_b = grouped_params(&ub);
            let has_variation = params_a
                .keys()
                .chain(params_b.keys())
                .any(|k| is_variation_param(k));
            if has_variation && without_variations(params_a) == without_variations(params_b) {
                return true;
            }
        }

        false
    }
}

/// Convenience wrapper over the default edit-distance matcher.
pub fn similar(a: &str, b: &str, threshold: f64) -> bool {
    UrlMatcher::new(SimilarityStrategy::EditDistance, threshold).similar(a, b)
}

/// Canonical form used for exact dedup: lowercase host without leading `www.`,
/// lowercase path without trailing slash, first non-blank value per lowercased
/// query key, keys sorted.
pub fn normalize(raw: &str) -> String {
    let parsed = match Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(_) => return raw.trim().to_lowercase(),
    };

    let authority = authority(&parsed).to_lowercase();
    let host = authority.strip_prefix("www.").unwrap_or(&authority);
    let path = canonical_path(&parsed);

    let mut first_values: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in parsed.query_pairs() {
        if value.is_empty() {
            continue;
        }
        first_values
            .entry(key.to_lowercase())
            .or_insert_with(|| value.to_lowercase());
    }

    let mut normalized = format!("{}://{}{}", parsed.scheme(), host, path);
    if !first_values.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(first_values.iter())
            .finish();
        normalized.push('?');
        normalized.push_str(&query);
    }
    normalized
}

fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

fn canonical_path(url: &Url) -> String {
    url.path().trim_end_matches('/').to_lowercase()
}

fn is_variation_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    VARIATION_PARAMS.contains(&lower.as_str())
}

fn grouped_params(url: &Url) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        if value.is_empty() {
            continue;
        }
        params.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    params
}

fn without_variations(params: BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    params
        .into_iter()
        .filter(|(k, _)| !is_variation_param(k))
        .collect()
}
