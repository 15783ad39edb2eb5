//! Page-rendering collaborator.
//!
//! Everything the crawler needs from a browser goes through [`PageSession`]:
//! navigate with a timeout, read the resulting HTML and URL, and move cookies
//! in and out. Two implementations ship with the crate: headless Chrome
//! ([`chrome::ChromeRenderer`]) and a plain HTTP fetcher that does not run
//! scripts ([`http::HttpRenderer`]).

pub mod chrome;
pub mod http;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Address family a session is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `None` lets the platform pick the address family.
    pub ip_version: Option<IpVersion>,
    pub headless: bool,
    pub user_agent: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ip_version: None,
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// HTTP-like view of the main document response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    /// URL of the document after redirects.
    pub url: String,
}

impl NavigationResponse {
    pub fn content_type(&self) -> &str {
        self.headers.get("content-type").map(String::as_str).unwrap_or("")
    }

    pub fn is_html(&self) -> bool {
        self.content_type().to_lowercase().contains("text/html")
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

#[derive(Debug, Error)]
pub enum NavigationError {
    /// The host does not resolve; for a crawled link this usually means the
    /// subdomain is gone.
    #[error("DNS resolution failed for {0}")]
    NameNotResolved(String),

    /// A redirect started a new navigation before the requested one finished.
    #[error("navigation to {0} interrupted by another navigation")]
    RedirectInterrupted(String),

    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("navigation to {url} failed: {reason}")]
    Other { url: String, reason: String },
}

impl NavigationError {
    /// Maps a renderer's error text onto the navigation error taxonomy.
    pub fn from_message(url: &str, message: &str, timeout: Duration) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("err_name_not_resolved")
            || lower.contains("failed to lookup address")
            || lower.contains("dns error")
            || lower.contains("name or service not known")
        {
            NavigationError::NameNotResolved(url.to_string())
        } else if lower.contains("interrupted by another navigation") || lower.contains("err_aborted") {
            NavigationError::RedirectInterrupted(url.to_string())
        } else if lower.contains("timed out") || lower.contains("timeout") || lower.contains("never came") {
            NavigationError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else {
            NavigationError::Other {
                url: url.to_string(),
                reason: message.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl FromStr for SameSite {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" | "no_restriction" => Ok(SameSite::None),
            _ => Err(()),
        }
    }
}

/// Renderer-neutral cookie, also the on-disk storage-state shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since the unix epoch; `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Persisted browser state for one site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<BrowserCookie>,
}

impl StorageState {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read storage state {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse storage state {}", path.display()))
    }

    /// Temp file then rename, so a crash never leaves half a state file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// One rendering context (a browser tab or an HTTP client with a cookie jar).
#[async_trait]
pub trait PageSession: Send {
    /// Loads `url` and returns the main document response once the DOM is ready.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResponse, NavigationError>;

    /// HTML of the current document, after script execution where supported.
    async fn content(&mut self) -> Result<String>;

    async fn current_url(&mut self) -> Result<String>;

    /// Waits for an in-flight navigation (e.g. a redirect) to settle.
    async fn wait_for_load(&mut self, timeout: Duration) -> Result<()>;

    async fn add_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<()>;

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>>;
}

/// Factory for page sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn PageSession>>;

    fn name(&self) -> &'static str;
}

/// Restores cookies from a storage-state file into a fresh session.
/// Returns the number of cookies loaded; a missing file loads nothing.
pub async fn load_storage_state(session: &mut dyn PageSession, path: &Path) -> Result<usize> {
    if !path.exists() {
        debug!("No stored browser data at {}", path.display());
        return Ok(0);
    }
    let state = StorageState::load(path)?;
    session.add_cookies(&state.cookies).await?;
    debug!("Loaded {} cookies from {}", state.cookies.len(), path.display());
    Ok(state.cookies.len())
}

/// Writes the session's current cookies to a storage-state file.
pub async fn save_storage_state(session: &mut dyn PageSession, path: &Path) -> Result<usize> {
    let cookies = session.cookies().await?;
    let count = cookies.len();
    StorageState { cookies }.save(path)?;
    debug!("Saved {} cookies to {}", count, path.display());
    Ok(count)
}
