//! Headless Chrome renderer.
//!
//! headless_chrome is a blocking API, so every tab operation runs inside
//! `tokio::task::spawn_blocking`. One browser process per session; the
//! orchestrator's semaphore bounds how many exist at once.

use super::{BrowserCookie, IpVersion, NavigationError, NavigationResponse, PageSession, Renderer, SameSite, SessionOptions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Network::{CookieParam, GetResponseBodyReturnObject};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const RESPONSE_HANDLER: &str = "fqdnfinder_document_responses";

/// Flags that make automation less conspicuous and the browser quieter.
const BASE_ARGS: [&str; 7] = [
    "--disable-blink-features=AutomationControlled",
    "--disable-extensions",
    "--disable-web-security",
    "--disable-features=VizDisplayCompositor",
    "--no-first-run",
    "--disable-infobars",
    "--disable-notifications",
];

/// Chrome flags for a session pinned to one address family.
pub fn launch_args(ip_version: Option<IpVersion>) -> Vec<&'static str> {
    let mut args = BASE_ARGS.to_vec();
    match ip_version {
        Some(IpVersion::V4) => args.extend(["--disable-ipv6", "--force-ipv4-only"]),
        Some(IpVersion::V6) => args.extend(["--disable-ipv4", "--force-ipv6-only"]),
        None => {}
    }
    args
}

/// Sandbox must be off inside containers (detected via /.dockerenv or FQDNFINDER_CONTAINER).
fn is_container() -> bool {
    std::env::var("FQDNFINDER_CONTAINER").is_ok() || std::path::Path::new("/.dockerenv").exists()
}

/// Chrome binary from CHROME_PATH, otherwise auto-detected by headless_chrome.
fn chrome_path() -> Option<PathBuf> {
    std::env::var("CHROME_PATH").ok().map(PathBuf::from)
}

#[derive(Debug, Clone, Default)]
pub struct ChromeRenderer;

impl ChromeRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn PageSession>> {
        let options = options.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&options))
            .await
            .map_err(|e| anyhow!("Browser task panicked: {}", e))??;
        Ok(Box::new(session))
    }

    fn name(&self) -> &'static str {
        "chrome"
    }
}

#[derive(Debug, Clone)]
struct CapturedResponse {
    url: String,
    status: u16,
    mime_type: String,
}

pub struct ChromeSession {
    // Kept alive for the tab; dropping it kills the Chrome process.
    _browser: Browser,
    tab: Arc<Tab>,
    responses: Arc<Mutex<Vec<CapturedResponse>>>,
}

impl ChromeSession {
    fn launch(options: &SessionOptions) -> Result<Self> {
        let args = launch_args(options.ip_version);
        let os_args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

        let launch = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(!is_container())
            .path(chrome_path())
            .window_size(Some((1366, 768)))
            .args(os_args)
            .build()
            .map_err(|e| anyhow!("Failed to build Chrome launch options: {}", e))?;

        debug!("Launching Chrome with {} extra arguments", args.len());
        let browser = Browser::new(launch).map_err(|e| anyhow!("Failed to launch headless Chrome: {}", e))?;
        let tab = browser
            .new_tab()
            .map_err(|e| anyhow!("Failed to create tab: {}", e))?;
        tab.set_user_agent(&options.user_agent, None, None)
            .map_err(|e| anyhow!("Failed to set user agent: {}", e))?;

        let responses: Arc<Mutex<Vec<CapturedResponse>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = responses.clone();
        tab.register_response_handling(
            RESPONSE_HANDLER,
            Box::new(
                move |event_params: ResponseReceivedEventParams,
                      _fetch_body: &dyn Fn() -> Result<GetResponseBodyReturnObject>| {
                    let resp = &event_params.response;
                    if let Ok(mut list) = captured.lock() {
                        list.push(CapturedResponse {
                            url: resp.url.clone(),
                            status: u16::try_from(resp.status).unwrap_or(0),
                            mime_type: resp.mime_type.clone(),
                        });
                    }
                },
            ),
        )
        .map_err(|e| anyhow!("Failed to register response handler: {}", e))?;

        Ok(Self {
            _browser: browser,
            tab,
            responses,
        })
    }

    /// Runs a blocking tab operation off the async scheduler.
    async fn with_tab<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || op(tab))
            .await
            .map_err(|e| anyhow!("Browser task panicked: {}", e))?
    }

    fn document_response(&self, requested: &str, final_url: &str) -> Option<CapturedResponse> {
        let list = self.responses.lock().ok()?;
        list.iter()
            .rev()
            .find(|r| r.url == final_url)
            .or_else(|| list.iter().find(|r| r.url == requested))
            .cloned()
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResponse, NavigationError> {
        if let Ok(mut list) = self.responses.lock() {
            list.clear();
        }

        let target = url.to_string();
        let final_url = self
            .with_tab(move |tab| {
                tab.set_default_timeout(timeout);
                tab.navigate_to(&target)?;
                tab.wait_until_navigated()?;
                Ok(tab.get_url())
            })
            .await
            .map_err(|e| NavigationError::from_message(url, &format!("{:#}", e), timeout))?;

        let captured = self.document_response(url, &final_url);
        let (status, mime_type) = match captured {
            Some(resp) => (resp.status, resp.mime_type),
            None => {
                debug!("No document response captured for {}, assuming a cached HTML page", url);
                (200, "text/html".to_string())
            }
        };

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), mime_type);
        Ok(NavigationResponse {
            status,
            headers,
            url: final_url,
        })
    }

    async fn content(&mut self) -> Result<String> {
        self.with_tab(|tab| tab.get_content()).await
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> Result<()> {
        self.with_tab(move |tab| {
            tab.set_default_timeout(timeout);
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn add_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<CookieParam>>>()?;
        self.with_tab(move |tab| tab.set_cookies(params)).await
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        let raw = self.with_tab(|tab| tab.get_cookies()).await?;
        let mut cookies = Vec::with_capacity(raw.len());
        for cookie in raw {
            cookies.push(from_cdp_cookie(serde_json::to_value(cookie)?));
        }
        Ok(cookies)
    }
}

/// CDP field sets differ between protocol revisions, so cookies cross the
/// boundary as JSON rather than struct literals.
fn to_cookie_param(cookie: &BrowserCookie) -> Result<CookieParam> {
    let mut value = json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "secure": cookie.secure,
        "httpOnly": cookie.http_only,
    });
    if let Some(expires) = cookie.expires {
        value["expires"] = json!(expires);
    }
    if let Some(same_site) = cookie.same_site {
        value["sameSite"] = json!(same_site);
    }
    Ok(serde_json::from_value(value)?)
}

fn from_cdp_cookie(value: Value) -> BrowserCookie {
    let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let flag = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);
    let session = flag("session");
    BrowserCookie {
        name: text("name"),
        value: text("value"),
        domain: text("domain"),
        path: value
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string(),
        secure: flag("secure"),
        http_only: flag("httpOnly"),
        expires: if session {
            None
        } else {
            value.get("expires").and_then(Value::as_f64).filter(|e| *e > 0.0)
        },
        same_site: value
            .get("sameSite")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<SameSite>().ok()),
    }
}
