//! Plain HTTP renderer. Fetches documents with reqwest and never runs scripts,
//! so it only sees links present in the served HTML. Useful where Chrome is
//! unavailable and for exercising the crawler against local servers.

use super::{BrowserCookie, IpVersion, NavigationError, NavigationResponse, PageSession, Renderer, SameSite, SessionOptions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use std::collections::HashMap;
use std::error::Error as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct HttpRenderer;

impl HttpRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(HttpSession::new(options)?))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

pub struct HttpSession {
    client: reqwest::Client,
    jar: Arc<Jar>,
    cookies: Vec<BrowserCookie>,
    current_url: String,
    body: String,
}

impl HttpSession {
    pub fn new(options: &SessionOptions) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let mut builder = reqwest::Client::builder()
            .user_agent(&options.user_agent)
            .cookie_provider(jar.clone())
            .danger_accept_invalid_certs(true);

        builder = match options.ip_version {
            Some(IpVersion::V4) => builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Some(IpVersion::V6) => builder.local_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            None => builder,
        };

        let client = builder
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            jar,
            cookies: Vec::new(),
            current_url: "about:blank".to_string(),
            body: String::new(),
        })
    }

    fn remember_cookie(&mut self, cookie: BrowserCookie) {
        self.cookies
            .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
        self.cookies.push(cookie);
    }
}

/// Full error chain as one string; reqwest keeps the resolver message in a source.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[async_trait]
impl PageSession for HttpSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResponse, NavigationError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NavigationError::Timeout {
                        url: url.to_string(),
                        timeout,
                    }
                } else {
                    NavigationError::from_message(url, &error_chain(&e), timeout)
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_lowercase(), v.to_string());
            }
        }

        let host = response.url().host_str().unwrap_or_default().to_string();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        for raw in set_cookies {
            if let Some(cookie) = parse_set_cookie(&raw, &host) {
                self.remember_cookie(cookie);
            }
        }

        let body = response.text().await.map_err(|e| NavigationError::Other {
            url: url.to_string(),
            reason: format!("failed to read body: {}", e),
        })?;

        debug!("Fetched {} ({} bytes, status {})", final_url, body.len(), status);
        self.current_url = final_url.clone();
        self.body = body;

        Ok(NavigationResponse {
            status,
            headers,
            url: final_url,
        })
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.body.clone())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.current_url.clone())
    }

    async fn wait_for_load(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn add_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<()> {
        for cookie in cookies {
            let host = cookie.domain.trim_start_matches('.');
            let origin = Url::parse(&format!("https://{}/", host))
                .map_err(|e| anyhow!("Invalid cookie domain '{}': {}", cookie.domain, e))?;
            let mut header = format!("{}={}; Domain={}; Path={}", cookie.name, cookie.value, host, cookie.path);
            if cookie.secure {
                header.push_str("; Secure");
            }
            if cookie.http_only {
                header.push_str("; HttpOnly");
            }
            self.jar.add_cookie_str(&header, &origin);
            self.remember_cookie(cookie.clone());
        }
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        Ok(self.cookies.clone())
    }
}

/// Minimal `Set-Cookie` reader for storage-state persistence. Expiry
/// attributes are not interpreted; such cookies are stored as session cookies.
pub fn parse_set_cookie(raw: &str, default_domain: &str) -> Option<BrowserCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = BrowserCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: default_domain.to_string(),
        path: "/".to_string(),
        secure: false,
        http_only: false,
        expires: None,
        same_site: None,
    };

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((k, v)) => (k.trim().to_lowercase(), v.trim()),
            None => (attribute.trim().to_lowercase(), ""),
        };
        match key.as_str() {
            "domain" if !val.is_empty() => cookie.domain = val.to_string(),
            "path" if !val.is_empty() => cookie.path = val.to_string(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" => cookie.same_site = val.parse::<SameSite>().ok(),
            _ => {}
        }
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_cookie() {
        let cookie = parse_set_cookie("sid=abc; Domain=.example.com; Path=/app; Secure; HttpOnly; SameSite=Strict", "www.example.com").unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain, ".example.com");
        assert_eq!(cookie.path, "/app");
        assert!(cookie.secure && cookie.http_only);
        assert_eq!(cookie.same_site, Some(SameSite::Strict));
    }

    #[test]
    fn test_parse_set_cookie_defaults() {
        let cookie = parse_set_cookie("theme=dark", "example.com").unwrap();
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/");
        assert!(parse_set_cookie("garbage", "example.com").is_none());
    }
}
