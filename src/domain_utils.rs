use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use url::Url;

/// Suffixes that, appended to the organization's leading label, usually name
/// infrastructure the organization runs under a different brand domain.
const BRAND_SUFFIXES: [&str; 8] = ["media", "static", "cdn", "inc", "blog", "help", "api", "assets"];

/// Leading-label length above which the four-letter short form is also tried.
const SHORT_FORM_MIN_LEN: usize = 4;

static FQDN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// Host with any leading `www.` removed, lowercased.
pub fn base_domain(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Lowercased host component of an absolute URL.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Organization base domain for a seed URL (`https://www.reddit.com/` -> `reddit.com`).
pub fn base_domain_of_url(url: &str) -> Option<String> {
    host_of(url).map(|h| base_domain(&h))
}

/// True when `host` is `base` itself or a proper subdomain of it.
/// `notexample.com` is not a subdomain of `example.com`.
pub fn is_same_or_subdomain(host: &str, base: &str) -> bool {
    let host = host.to_lowercase();
    let base = base.to_lowercase();
    host == base || host.ends_with(&format!(".{}", base))
}

/// Syntax check applied to every domain read back from a registry file.
pub fn is_valid_fqdn(domain: &str) -> bool {
    FQDN_REGEX.is_match(domain)
}

/// Brand-name variations derived from a base domain's leading label.
#[derive(Debug, Clone)]
pub struct OrgNameHints {
    base_name: String,
    variations: Vec<String>,
    short_form: Option<String>,
}

impl OrgNameHints {
    pub fn from_base_domain(base: &str) -> Self {
        let base_name = base
            .split('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        let mut variations = vec![base_name.clone()];
        variations.extend(BRAND_SUFFIXES.iter().map(|s| format!("{}{}", base_name, s)));

        let short_form = if base_name.chars().count() > SHORT_FORM_MIN_LEN {
            let short: String = base_name.chars().take(SHORT_FORM_MIN_LEN).collect();
            variations.push(short.clone());
            Some(short)
        } else {
            None
        };

        Self {
            base_name,
            variations,
            short_form,
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn variations(&self) -> &[String] {
        &self.variations
    }

    /// Related-domain heuristic: a variation appears in the domain, or the
    /// domain's second-level label and the short form contain one another
    /// (`redd.it` for `reddit.com`).
    pub fn is_related(&self, domain: &str) -> bool {
        let lower = domain.to_lowercase();
        if self.variations.iter().any(|v| lower.contains(v.as_str())) {
            return true;
        }

        if let Some(short) = &self.short_form {
            let labels: Vec<&str> = lower.split('.').collect();
            if labels.len() >= 2 {
                let second_level = labels[labels.len() - 2];
                if second_level.contains(short.as_str()) || short.contains(second_level) {
                    return true;
                }
            }
        }

        false
    }
}

/// Outcome of classifying a site's external domains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categorization {
    /// External domains judged to belong to the organization, plus accepted parents.
    pub related: Vec<String>,
    pub third_party: Vec<String>,
    /// Parent domains of subdomains/related domains that passed the brand heuristic.
    pub parents: Vec<String>,
}

/// Split external domains into related and third-party, then derive parent
/// domains from subdomains and related domains only.
pub fn categorize(base: &str, subdomains: &[String], external_domains: &[String]) -> Categorization {
    let hints = OrgNameHints::from_base_domain(base);

    let mut related: BTreeSet<String> = BTreeSet::new();
    let mut third_party: BTreeSet<String> = BTreeSet::new();

    for domain in external_domains {
        if hints.is_related(domain) {
            related.insert(domain.clone());
        } else {
            third_party.insert(domain.clone());
        }
    }

    let organization_domains: Vec<String> = subdomains
        .iter()
        .chain(related.iter())
        .cloned()
        .collect();

    let parents: Vec<String> = extract_parent_domains(&organization_domains)
        .into_iter()
        .filter(|parent| hints.is_related(parent))
        .collect();

    related.extend(parents.iter().cloned());

    Categorization {
        related: related.into_iter().collect(),
        third_party: third_party.into_iter().collect(),
        parents,
    }
}

/// Every proper parent with at least two labels, for each input domain with
/// three or more labels. Sorted, deduplicated, never contains an input itself
/// unless another input is its subdomain.
pub fn extract_parent_domains(domains: &[String]) -> Vec<String> {
    let mut parents = BTreeSet::new();

    for domain in domains {
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 3 {
            continue;
        }
        for i in 1..=labels.len() - 2 {
            let parent = labels[i..].join(".");
            if parent != *domain {
                parents.insert(parent);
            }
        }
    }

    parents.into_iter().collect()
}
