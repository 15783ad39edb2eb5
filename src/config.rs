//! Configuration management for fqdnfinder
//!
//! Settings come from `./config/fqdnfinder.toml` (or `--config`). When no file
//! exists the embedded template is used, so a bare checkout still runs.
//! Command-line flags are merged over the file into an immutable [`RunConfig`].

use crate::cli::Cli;
use crate::crawler::CrawlOptions;
use crate::dns::DnsPolicy;
use crate::rate_limit::RequestThrottle;
use crate::registry::{OutputMode, RunMetadata};
use crate::render::{IpVersion, SessionOptions};
use crate::url_match::{SimilarityStrategy, UrlMatcher};
use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/fqdnfinder.toml";

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = include_str!("../config/fqdnfinder.toml");

/// Upper bound on sites processed at once; each one holds a browser.
pub const MAX_CONCURRENCY: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {value} (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid address in '{field}': {address} (expected ip:port format)")]
    InvalidAddress { field: String, address: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },
}

/// Which [`crate::render::Renderer`] drives page loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RendererKind {
    #[default]
    Chrome,
    Http,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub crawl: CrawlConfig,
    pub browser: BrowserConfig,
    pub dns: DnsConfig,
    pub run: RunSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    pub max_pages: usize,
    pub rate_limit_secs: f64,
    pub navigation_timeout_secs: u64,
    pub similarity_threshold: f64,
    #[serde(default)]
    pub similarity_strategy: SimilarityStrategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub renderer: RendererKind,
    pub headless: bool,
    pub persist_storage: bool,
    pub storage_dir: PathBuf,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub conservative: bool,
    pub revalidation_concurrency: usize,
    pub discovery_concurrency: usize,
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_query_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    pub concurrency: usize,
    #[serde(default)]
    pub output_mode: OutputMode,
}

impl AppConfig {
    /// Load from the default path, falling back to the embedded template.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Path::new(CONFIG_PATH);
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::embedded()
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawl.max_pages == 0 {
            return Err(invalid("crawl.max_pages", self.crawl.max_pages, "a positive page count"));
        }
        if !self.crawl.rate_limit_secs.is_finite() || self.crawl.rate_limit_secs < 0.0 {
            return Err(invalid("crawl.rate_limit_secs", self.crawl.rate_limit_secs, "zero or more seconds"));
        }
        if self.crawl.navigation_timeout_secs == 0 {
            return Err(invalid(
                "crawl.navigation_timeout_secs",
                self.crawl.navigation_timeout_secs,
                "a positive number of seconds",
            ));
        }
        let threshold = self.crawl.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(invalid("crawl.similarity_threshold", threshold, "a value in (0, 1]"));
        }

        if self.browser.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "browser.user_agent".to_string(),
            });
        }
        if self.browser.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "browser.storage_dir".to_string(),
            });
        }

        if self.dns.max_retries == 0 {
            return Err(invalid("dns.max_retries", self.dns.max_retries, "at least one attempt"));
        }
        if self.dns.revalidation_concurrency == 0 {
            return Err(invalid("dns.revalidation_concurrency", 0, "a positive limit"));
        }
        if self.dns.discovery_concurrency == 0 {
            return Err(invalid("dns.discovery_concurrency", 0, "a positive limit"));
        }
        if self.dns.query_timeout_secs == 0 {
            return Err(invalid("dns.query_timeout_secs", 0, "a positive number of seconds"));
        }
        self.nameserver_addrs()?;

        Ok(())
    }

    /// Parsed `dns.nameservers`; empty means "use the system resolver".
    pub fn nameserver_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.dns
            .nameservers
            .iter()
            .enumerate()
            .map(|(i, address)| {
                address.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidAddress {
                    field: format!("dns.nameservers[{}]", i),
                    address: address.clone(),
                })
            })
            .collect()
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        Self::write_default_config(Path::new(CONFIG_PATH))
    }

    pub fn write_default_config(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }
}

fn invalid(field: &str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    }
}

/// Effective settings for one run. Built once, then shared read-only.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_pages: usize,
    pub throttle: RequestThrottle,
    pub nav_timeout: Duration,
    pub matcher: UrlMatcher,

    pub renderer: RendererKind,
    pub headless: bool,
    pub persist_storage: bool,
    pub clear_storage: bool,
    pub storage_dir: PathBuf,
    pub user_agent: String,
    pub cookie_file: Option<PathBuf>,
    pub manual_login: bool,
    pub dual_stack: bool,

    pub dns_policy: DnsPolicy,
    pub revalidation_concurrency: usize,
    pub discovery_concurrency: usize,
    pub nameservers: Vec<SocketAddr>,
    pub dns_timeout: Duration,

    /// Already clamped to `1..=MAX_CONCURRENCY`.
    pub concurrency: usize,
    pub output: Option<PathBuf>,
    pub output_mode: OutputMode,
    pub print_fqdn_list: bool,
    pub url_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl RunConfig {
    /// Command-line values win over the file.
    pub fn merge(cli: &Cli, file: &AppConfig) -> Result<Self, ConfigError> {
        let max_pages = cli.pages.unwrap_or(file.crawl.max_pages);
        if max_pages == 0 {
            return Err(invalid("--pages", 0, "a positive page count"));
        }
        let nav_timeout_secs = cli.navigation_timeout.unwrap_or(file.crawl.navigation_timeout_secs);
        if nav_timeout_secs == 0 {
            return Err(invalid("--navigation-timeout", 0, "a positive number of seconds"));
        }

        let output_mode = if cli.fqdn_list {
            OutputMode::FqdnList
        } else {
            file.run.output_mode
        };

        Ok(Self {
            max_pages,
            throttle: RequestThrottle::from_secs_f64(cli.rate_limit.unwrap_or(file.crawl.rate_limit_secs)),
            nav_timeout: Duration::from_secs(nav_timeout_secs),
            matcher: UrlMatcher::new(file.crawl.similarity_strategy, file.crawl.similarity_threshold),

            renderer: cli.renderer.unwrap_or(file.browser.renderer),
            headless: cli.headless_override().unwrap_or(file.browser.headless),
            persist_storage: file.browser.persist_storage && !cli.no_persist_cookies,
            clear_storage: cli.clear_cookies,
            storage_dir: file.browser.storage_dir.clone(),
            user_agent: file.browser.user_agent.clone(),
            cookie_file: cli.cookies.clone(),
            manual_login: cli.manual_login,
            dual_stack: cli.dual_stack,

            dns_policy: DnsPolicy {
                max_retries: file.dns.max_retries,
                retry_delay: Duration::from_millis(file.dns.retry_delay_ms),
                conservative: cli.conservative_dns_override().unwrap_or(file.dns.conservative),
            },
            revalidation_concurrency: file.dns.revalidation_concurrency,
            discovery_concurrency: file.dns.discovery_concurrency,
            nameservers: file.nameserver_addrs()?,
            dns_timeout: Duration::from_secs(file.dns.query_timeout_secs),

            concurrency: cli
                .concurrency
                .unwrap_or(file.run.concurrency)
                .clamp(1, MAX_CONCURRENCY),
            output: cli.output.clone(),
            output_mode,
            print_fqdn_list: cli.fqdn_list,
            url_file: cli.url_file.clone(),
            log_file: cli.log_file.clone(),
        })
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            max_pages: self.max_pages,
            throttle: self.throttle,
            nav_timeout: self.nav_timeout,
            matcher: self.matcher,
        }
    }

    pub fn session_options(&self, ip_version: Option<IpVersion>) -> SessionOptions {
        SessionOptions {
            ip_version,
            headless: self.headless,
            user_agent: self.user_agent.clone(),
        }
    }

    /// `<storage_dir>/<domain>_storage.json`
    pub fn storage_path(&self, domain: &str) -> PathBuf {
        self.storage_dir.join(format!("{}_storage.json", domain))
    }

    pub fn run_metadata(&self, input_sources: &[String]) -> RunMetadata {
        RunMetadata {
            input_sources: input_sources.to_vec(),
            concurrency: self.concurrency,
            max_pages: self.max_pages,
            headless: self.headless,
            persist_cookies: self.persist_storage,
            dual_stack: self.dual_stack,
            url_file: self.url_file.clone(),
            cookie_file: self.cookie_file.clone(),
            log_file: self.log_file.clone(),
        }
    }
}
