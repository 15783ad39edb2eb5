//! In-memory renderer and resolver for driving the pipeline without a
//! browser or a network.

use anyhow::{bail, Result};
use async_trait::async_trait;
use fqdnfinder::dns::{LookupFailure, RecordKind, RecordLookup};
use fqdnfinder::render::{
    BrowserCookie, IpVersion, NavigationError, NavigationResponse, PageSession, Renderer, SessionOptions,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FakePage {
    pub status: u16,
    pub content_type: String,
    pub html: String,
}

impl FakePage {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            html: body.to_string(),
        }
    }
}

/// Calls observed across every session a renderer opened.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub sessions: Vec<Option<IpVersion>>,
    pub navigations: Vec<String>,
    pub cookies_added: Vec<BrowserCookie>,
}

/// Serves pages from a map. Pages registered for one address family
/// override the shared ones in sessions pinned to that family.
#[derive(Clone, Default)]
pub struct ScriptedRenderer {
    pages: HashMap<String, FakePage>,
    family_pages: HashMap<(IpVersion, String), FakePage>,
    unresolvable: HashSet<String>,
    redirects: HashMap<String, String>,
    failing_families: HashSet<IpVersion>,
    server_cookies: Vec<BrowserCookie>,
    log: Arc<Mutex<SessionLog>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), FakePage::html(html));
        self
    }

    pub fn raw_page(mut self, url: &str, page: FakePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn family_page(mut self, family: IpVersion, url: &str, html: &str) -> Self {
        self.family_pages.insert((family, url.to_string()), FakePage::html(html));
        self
    }

    /// Navigating to `url` fails as if its host had no DNS records.
    pub fn unresolvable(mut self, url: &str) -> Self {
        self.unresolvable.insert(url.to_string());
        self
    }

    /// Navigating to `from` is interrupted and the session settles on `to`.
    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    /// Sessions pinned to `family` cannot be opened.
    pub fn fail_family(mut self, family: IpVersion) -> Self {
        self.failing_families.insert(family);
        self
    }

    /// Cookie every session reports as set by the site.
    pub fn server_cookie(mut self, cookie: BrowserCookie) -> Self {
        self.server_cookies.push(cookie);
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SessionLog> {
        self.log.lock().unwrap()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.log().navigations.clone()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn PageSession>> {
        self.log().sessions.push(options.ip_version);
        if let Some(family) = options.ip_version {
            if self.failing_families.contains(&family) {
                bail!("{} connectivity unavailable", family);
            }
        }

        let mut pages = self.pages.clone();
        if let Some(family) = options.ip_version {
            for ((f, url), page) in &self.family_pages {
                if *f == family {
                    pages.insert(url.clone(), page.clone());
                }
            }
        }

        Ok(Box::new(ScriptedSession {
            pages,
            unresolvable: self.unresolvable.clone(),
            redirects: self.redirects.clone(),
            current: "about:blank".to_string(),
            cookies: self.server_cookies.clone(),
            log: self.log.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedSession {
    pages: HashMap<String, FakePage>,
    unresolvable: HashSet<String>,
    redirects: HashMap<String, String>,
    current: String,
    cookies: Vec<BrowserCookie>,
    log: Arc<Mutex<SessionLog>>,
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<NavigationResponse, NavigationError> {
        self.log.lock().unwrap().navigations.push(url.to_string());

        if self.unresolvable.contains(url) {
            return Err(NavigationError::NameNotResolved(url.to_string()));
        }
        if let Some(target) = self.redirects.get(url) {
            self.current = target.clone();
            return Err(NavigationError::RedirectInterrupted(url.to_string()));
        }

        self.current = url.to_string();
        let (status, content_type) = match self.pages.get(url) {
            Some(page) => (page.status, page.content_type.clone()),
            None => (404, "text/html".to_string()),
        };
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type);
        Ok(NavigationResponse {
            status,
            headers,
            url: url.to_string(),
        })
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self
            .pages
            .get(&self.current)
            .map(|p| p.html.clone())
            .unwrap_or_default())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.current.clone())
    }

    async fn wait_for_load(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn add_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<()> {
        self.log.lock().unwrap().cookies_added.extend(cookies.iter().cloned());
        self.cookies.extend(cookies.iter().cloned());
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        Ok(self.cookies.clone())
    }
}

/// Resolver answering from a fixed table. Unknown names are NXDOMAIN.
#[derive(Default)]
pub struct ScriptedLookup {
    live: HashSet<String>,
    inconclusive: HashSet<String>,
    /// Domain -> number of NXDOMAIN answers before it starts resolving.
    recovering: HashMap<String, usize>,
    queries: Mutex<Vec<(String, RecordKind)>>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(mut self, domains: &[&str]) -> Self {
        self.live.extend(domains.iter().map(|d| d.to_string()));
        self
    }

    pub fn inconclusive(mut self, domains: &[&str]) -> Self {
        self.inconclusive.extend(domains.iter().map(|d| d.to_string()));
        self
    }

    pub fn recovering(mut self, domain: &str, failures: usize) -> Self {
        self.recovering.insert(domain.to_string(), failures);
        self
    }

    pub fn queries(&self) -> Vec<(String, RecordKind)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordLookup for ScriptedLookup {
    async fn lookup(&self, domain: &str, kind: RecordKind) -> Result<usize, LookupFailure> {
        let earlier = {
            let mut queries = self.queries.lock().unwrap();
            let earlier = queries.iter().filter(|(d, _)| d == domain).count();
            queries.push((domain.to_string(), kind));
            earlier
        };
        if let Some(&failures) = self.recovering.get(domain) {
            return match (earlier >= failures, kind) {
                (true, RecordKind::A) => Ok(1),
                _ => Err(LookupFailure::NotFound(kind)),
            };
        }
        if self.inconclusive.contains(domain) {
            return Err(LookupFailure::Inconclusive("SERVFAIL".to_string()));
        }
        match (self.live.contains(domain), kind) {
            (true, RecordKind::A) => Ok(1),
            _ => Err(LookupFailure::NotFound(kind)),
        }
    }
}

pub fn cookie(name: &str, domain: &str) -> BrowserCookie {
    BrowserCookie {
        name: name.to_string(),
        value: "v".to_string(),
        domain: domain.to_string(),
        path: "/".to_string(),
        secure: true,
        http_only: false,
        expires: None,
        same_site: None,
    }
}
