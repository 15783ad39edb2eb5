use crate::config::RendererKind;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fqdnfinder")]
#[command(about = "Discovers the domains an organization owns by crawling its websites and validating them in DNS")]
#[command(version)]
pub struct Cli {
    /// Seed URL to start from (ignored when --url-file is given)
    #[arg(value_name = "START_URL")]
    pub start_url: Option<String>,

    /// Maximum pages to crawl per site
    #[arg(short, long, value_name = "N")]
    pub pages: Option<usize>,

    /// Registry file to update with the organization FQDNs
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Run the browser headless (default)
    #[arg(long, conflicts_with = "no_headless")]
    pub headless: bool,

    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,

    /// Crawl every seed twice, IPv4-only and IPv6-only, and merge the results
    #[arg(long)]
    pub dual_stack: bool,

    /// Do not load or save per-site browser storage
    #[arg(long)]
    pub no_persist_cookies: bool,

    /// Delete stored browser data for each site before crawling it
    #[arg(long)]
    pub clear_cookies: bool,

    /// Cookie export (JSON array) to import into the first site's session
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Write the registry as a flat FQDN list and print the consolidated list
    #[arg(long)]
    pub fqdn_list: bool,

    /// File with one seed URL per line ('#' comments and blank lines ignored)
    #[arg(long, value_name = "FILE")]
    pub url_file: Option<PathBuf>,

    /// Number of sites processed at once (clamped to 1..=10)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Also write every log line to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Keep domains whose DNS status cannot be determined (default)
    #[arg(long, conflicts_with = "no_conservative_dns")]
    pub conservative_dns: bool,

    /// Drop domains whose DNS status cannot be determined
    #[arg(long)]
    pub no_conservative_dns: bool,

    /// Page navigation timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub navigation_timeout: Option<u64>,

    /// Delay before each navigation and before reading each page, in seconds
    #[arg(long, value_name = "SECS")]
    pub rate_limit: Option<f64>,

    /// Page renderer: 'chrome' runs scripts, 'http' fetches raw HTML
    #[arg(long, value_enum)]
    pub renderer: Option<RendererKind>,

    /// Pause after the first page loads so you can log in (needs --no-headless)
    #[arg(long)]
    pub manual_login: bool,

    /// Configuration file (default: ./config/fqdnfinder.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Create default configuration file at ./config/fqdnfinder.toml
    #[arg(long)]
    pub init: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Verbose logging (use -v for warnings and page progress, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// `Some` only when one of the paired flags was given.
    pub fn headless_override(&self) -> Option<bool> {
        flag_pair(self.headless, self.no_headless)
    }

    pub fn conservative_dns_override(&self) -> Option<bool> {
        flag_pair(self.conservative_dns, self.no_conservative_dns)
    }
}

fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}
