//! Bounded breadth-first crawl of one site.
//!
//! Every in-scope link is checked against the visited set, the frontier and
//! the near-duplicate matcher before it is queued, so paginated and localized
//! copies of the same page are fetched once. Out-of-scope hosts are only
//! recorded.

use crate::domain_utils::{base_domain_of_url, is_same_or_subdomain};
use crate::logger::SiteLogger;
use crate::rate_limit::RequestThrottle;
use crate::render::{NavigationError, PageSession};
use crate::url_match::{normalize, UrlMatcher};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Duration;
use url::Url;

/// Path fragments of pages that need a logged-in user.
const AUTH_GATED_SEGMENTS: [&str; 6] = ["/submit", "/notifications", "/settings", "/account", "/login", "/register"];

/// Links ending in these are never queued (their hosts still count).
const ASSET_EXTENSIONS: [&str; 9] = [".png", ".jpg", ".css", ".js", ".ico", ".svg", ".xml", ".pdf", ".zip"];

const IGNORED_SCHEMES: [&str; 4] = ["mailto:", "tel:", "javascript:", "#"];

const REDIRECT_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

static HREF_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href], link[href]").unwrap());
static SRC_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("script[src], img[src]").unwrap());

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: usize,
    pub throttle: RequestThrottle,
    pub nav_timeout: Duration,
    pub matcher: UrlMatcher,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: 10,
            throttle: RequestThrottle::from_secs_f64(2.0),
            nav_timeout: Duration::from_secs(30),
            matcher: UrlMatcher::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlResult {
    /// Sorted, without the base domain itself.
    pub subdomains: Vec<String>,
    /// Sorted hosts outside the base domain.
    pub external_domains: Vec<String>,
    pub pages_visited: usize,
    pub skipped_similar: usize,
}

/// Frontier and visited set owned by a single crawl.
///
/// `queued`, `visited_set` and `gated` hold [`normalize`]d keys, so URLs
/// naming the same resource (`/` vs no path, `www.` vs bare host) are one entry.
#[derive(Debug)]
pub struct CrawlState {
    base_domain: String,
    frontier: VecDeque<String>,
    queued: HashSet<String>,
    visited: Vec<String>,
    visited_set: HashSet<String>,
    gated: HashSet<String>,
    subdomains: BTreeSet<String>,
    external_domains: BTreeSet<String>,
    skipped_similar: usize,
}

/// Outcome of scanning one page's links.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageLinks {
    pub links: usize,
    pub new_internal: usize,
    pub new_external: usize,
}

impl CrawlState {
    pub fn new(start_url: &str, base_domain: impl Into<String>) -> Self {
        let mut state = Self {
            base_domain: base_domain.into(),
            frontier: VecDeque::new(),
            queued: HashSet::new(),
            visited: Vec::new(),
            visited_set: HashSet::new(),
            gated: HashSet::new(),
            subdomains: BTreeSet::new(),
            external_domains: BTreeSet::new(),
            skipped_similar: 0,
        };
        state.queued.insert(normalize(start_url));
        state.frontier.push_back(start_url.to_string());
        state
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    pub fn pages_visited(&self) -> usize {
        self.visited.len()
    }

    /// Next URL not yet visited, or `None` when the frontier is empty.
    fn next_url(&mut self) -> Option<String> {
        while let Some(url) = self.frontier.pop_front() {
            let key = normalize(&url);
            self.queued.remove(&key);
            if !self.visited_set.contains(&key) {
                return Some(url);
            }
        }
        None
    }

    fn mark_visited(&mut self, url: &str) {
        if self.visited_set.insert(normalize(url)) {
            self.visited.push(url.to_string());
        }
    }

    fn mark_gated(&mut self, url: &str) {
        self.gated.insert(normalize(url));
    }

    fn is_known(&self, url: &str) -> bool {
        let key = normalize(url);
        self.visited_set.contains(&key) || self.queued.contains(&key) || self.gated.contains(&key)
    }

    fn is_near_duplicate(&self, url: &str, matcher: &UrlMatcher) -> bool {
        self.visited
            .iter()
            .chain(self.frontier.iter())
            .any(|seen| matcher.similar(url, seen))
    }

    /// Records hosts and queues in-scope links found on one page.
    pub fn absorb_links(&mut self, links: &[String], matcher: &UrlMatcher) -> PageLinks {
        let mut outcome = PageLinks::default();

        for link in links {
            let Some(host) = Url::parse(link).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
                continue;
            };
            outcome.links += 1;

            if !is_same_or_subdomain(&host, &self.base_domain) {
                if self.external_domains.insert(host) {
                    outcome.new_external += 1;
                }
                continue;
            }

            if host != self.base_domain {
                self.subdomains.insert(host);
            }

            if self.is_known(link) || is_asset(link) {
                continue;
            }
            if self.is_near_duplicate(link, matcher) {
                self.skipped_similar += 1;
                continue;
            }
            self.queued.insert(normalize(link));
            self.frontier.push_back(link.clone());
            outcome.new_internal += 1;
        }

        outcome
    }

    pub fn into_result(self) -> CrawlResult {
        CrawlResult {
            subdomains: self.subdomains.into_iter().collect(),
            external_domains: self.external_domains.into_iter().collect(),
            pages_visited: self.visited.len(),
            skipped_similar: self.skipped_similar,
        }
    }
}

fn is_asset(url: &str) -> bool {
    let lower = url.to_lowercase();
    ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// True for pages that need credentials and are not worth fetching anonymously.
pub fn is_auth_gated(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_lowercase(),
        Err(_) => url.to_lowercase(),
    };
    AUTH_GATED_SEGMENTS.iter().any(|segment| path.contains(segment))
}

/// Absolute URLs of every `a`/`link` href and `script`/`img` src on the page.
pub fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let hrefs = document
        .select(&HREF_SELECTOR)
        .filter_map(|el| el.value().attr("href"));
    let srcs = document
        .select(&SRC_SELECTOR)
        .filter_map(|el| el.value().attr("src"));

    hrefs
        .chain(srcs)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .filter(|raw| {
            let lower = raw.to_lowercase();
            !IGNORED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
        })
        .filter_map(|raw| base.join(raw).ok())
        .filter(|url| url.host_str().is_some())
        .map(String::from)
        .collect()
}

/// Loads `url` and returns the HTML and the URL it ended up at, or `None` when
/// the page should be skipped.
async fn fetch_page(
    url: &str,
    options: &CrawlOptions,
    session: &mut dyn PageSession,
    log: &SiteLogger,
) -> Option<(String, String)> {
    log.debug(&format!("Navigating to {} (timeout: {:?})", url, options.nav_timeout));

    match session.navigate(url, options.nav_timeout).await {
        Ok(response) => {
            log.debug(&format!("Response status: {}", response.status));
            if response.is_error() {
                log.warn(&format!("Failed to load page {} (status: {})", url, response.status));
                return None;
            }
            if !response.is_html() {
                log.debug(&format!(
                    "Skipping non-HTML content: {} (content-type: {})",
                    url,
                    response.content_type()
                ));
                return None;
            }
            options.throttle.wait().await;
            match session.content().await {
                Ok(html) => Some((html, response.url)),
                Err(e) => {
                    log.error(&format!("Failed to read content of {}: {:#}", url, e));
                    None
                }
            }
        }
        Err(NavigationError::NameNotResolved(_)) => {
            log.warn(&format!("DNS resolution failed for {} (subdomain may not exist)", url));
            None
        }
        Err(NavigationError::RedirectInterrupted(_)) => {
            log.warn(&format!("Navigation interrupted by redirect for {}", url));
            follow_redirect(url, session, log).await
        }
        Err(e) => {
            log.error(&format!("Navigation failed for {}: {}", url, e));
            None
        }
    }
}

async fn follow_redirect(url: &str, session: &mut dyn PageSession, log: &SiteLogger) -> Option<(String, String)> {
    let settled = async {
        session.wait_for_load(REDIRECT_SETTLE_TIMEOUT).await?;
        let current = session.current_url().await?;
        if current == url || current.starts_with("chrome-error://") {
            return Ok(None);
        }
        let html = session.content().await?;
        anyhow::Ok(Some((html, current)))
    };

    match settled.await {
        Ok(Some((html, current))) => {
            log.info(&format!("Redirected to: {}", current));
            Some((html, current))
        }
        Ok(None) => {
            log.warn("Redirect failed or led to error page");
            None
        }
        Err(e) => {
            log.error(&format!("Failed to handle redirect for {}: {:#}", url, e));
            None
        }
    }
}

/// Crawls from `start_url` until the frontier is empty or `max_pages` pages
/// have been visited. Navigation failures skip the page; they never end the crawl.
pub async fn crawl(
    start_url: &str,
    options: &CrawlOptions,
    session: &mut dyn PageSession,
    log: &SiteLogger,
) -> CrawlResult {
    let base = base_domain_of_url(start_url).unwrap_or_default();
    let mut state = CrawlState::new(start_url, base);

    log.info(&format!(
        "Starting crawl - Target: {} pages, Rate limit: {:?}",
        options.max_pages,
        options.throttle.delay()
    ));

    while state.pages_visited() < options.max_pages {
        let Some(url) = state.next_url() else { break };

        if is_auth_gated(&url) {
            log.debug(&format!("Skipping authentication-required page: {}", url));
            state.mark_gated(&url);
            continue;
        }

        let page_num = state.pages_visited() + 1;
        log.info(&format!("Crawling page {}/{}: {}", page_num, options.max_pages, url));
        state.mark_visited(&url);

        options.throttle.wait().await;
        let Some((html, page_url)) = fetch_page(&url, options, session, log).await else {
            continue;
        };

        let links = extract_links(&html, &page_url);
        let outcome = state.absorb_links(&links, &options.matcher);
        log.info(&format!(
            "Page {} processed: {} links, {} new internal, {} new external domains",
            page_num, outcome.links, outcome.new_internal, outcome.new_external
        ));
    }

    let result = state.into_result();
    if result.skipped_similar > 0 {
        log.info(&format!(
            "Crawling efficiency: Skipped {} similar/duplicate URLs",
            result.skipped_similar
        ));
    }
    log.info(&format!(
        "Crawl completed: {} pages crawled, {} subdomains, {} external domains",
        result.pages_visited,
        result.subdomains.len(),
        result.external_domains.len()
    ));
    result
}
