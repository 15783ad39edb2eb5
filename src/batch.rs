//! Seed input handling for a run over one or many sites
//!
//! Supports:
//! - A single start URL from the command line
//! - A URL file with one seed per line (`#` comments and blank lines ignored)
//! - Per-seed outcome tracking for the final summary

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Adds `https://` to seeds given without a scheme.
pub fn normalize_seed(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Parse seed URLs from file content, one per line
pub fn parse_seed_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_seed_file(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        bail!("URL file not found: {}", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    Ok(parse_seed_list(&content))
}

/// Seeds for this run. A URL file takes precedence over a start URL.
/// Having neither, or an empty file, is a configuration error.
pub fn resolve_seeds(start_url: Option<&str>, url_file: Option<&Path>) -> Result<Vec<String>> {
    let seeds = match (url_file, start_url) {
        (Some(path), start) => {
            if start.is_some() {
                warn!("Both a start URL and --url-file were given; using the URL file");
            }
            let seeds = load_seed_file(path)?;
            if seeds.is_empty() {
                bail!("No URLs found in {}", path.display());
            }
            seeds
        }
        (None, Some(url)) if !url.trim().is_empty() => vec![url.trim().to_string()],
        _ => bail!("Either a start URL or --url-file must be provided"),
    };
    Ok(seeds)
}

/// Outcome of processing one seed URL
#[derive(Debug, Clone)]
pub struct SeedOutcome {
    pub url: String,
    pub success: bool,
    pub error: Option<String>,
    pub subdomains: usize,
    pub external_domains: usize,
    pub organization_fqdns: usize,
    pub duration_secs: f64,
}

/// Summary of a batch run over all seeds
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total_seeds: usize,
    pub skipped: Vec<String>,
    pub successful: usize,
    pub failed: usize,
    pub seed_results: Vec<SeedOutcome>,
    pub started_at: String,
    pub completed_at: String,
}

impl BatchSummary {
    pub fn new(total_seeds: usize) -> Self {
        Self {
            total_seeds,
            skipped: Vec::new(),
            successful: 0,
            failed: 0,
            seed_results: Vec::new(),
            started_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            completed_at: String::new(),
        }
    }

    pub fn record_skip(&mut self, url: impl Into<String>) {
        self.skipped.push(url.into());
    }

    pub fn record(&mut self, outcome: SeedOutcome) {
        self.seed_results.push(outcome);
    }

    /// Finalize counts and end time
    pub fn finalize(&mut self) {
        self.completed_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        self.successful = self.seed_results.iter().filter(|r| r.success).count();
        self.failed = self.seed_results.iter().filter(|r| !r.success).count();
    }

    pub fn all_skipped(&self) -> bool {
        self.total_seeds > 0 && self.skipped.len() == self.total_seeds
    }
}
