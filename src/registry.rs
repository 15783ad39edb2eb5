//! Persisted registry of organization FQDNs.
//!
//! The registry file is plain text, either a flat FQDN list or a Markdown-ish
//! report, both re-readable by [`load_registry`]. [`reconcile`] replaces it at
//! the end of a run: backup copy, write to `<output>.tmp`, fsync, rename. If
//! anything fails after the backup exists, the backup is copied back so the
//! registry is never left half-written.

use crate::domain_utils::{base_domain, host_of, is_valid_fqdn};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const HEADER_RULE: &str = "# ================================================";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        /// Backup the output matches after the failure, if any.
        restored_from: Option<PathBuf>,
    },
}

/// Layout of the registry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Commented header followed by one domain per line.
    FqdnList,
    /// Summary section followed by the domain list.
    #[default]
    Report,
}

/// Run facts echoed into the registry header.
#[derive(Debug, Clone, Default)]
pub struct RunMetadata {
    pub input_sources: Vec<String>,
    pub concurrency: usize,
    pub max_pages: usize,
    pub headless: bool,
    pub persist_cookies: bool,
    pub dual_stack: bool,
    pub url_file: Option<PathBuf>,
    pub cookie_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

/// What a successful reconcile did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub output: PathBuf,
    pub domains: BTreeSet<String>,
    pub added: usize,
    pub removed: usize,
    pub backup: Option<PathBuf>,
    pub updated_at: String,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.domains.len()
    }
}

/// Loads the domains of an existing registry. A missing file is an empty registry.
pub fn load_registry(path: &Path) -> Result<BTreeSet<String>, RegistryError> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let domains = parse_registry(&content);
    info!("Loaded {} existing domains from {}", domains.len(), path.display());
    Ok(domains)
}

/// Accepts list items (`- x`, `  - x`) and bare lines containing a dot;
/// comments, blanks and `##` headings are ignored.
pub fn parse_registry(content: &str) -> BTreeSet<String> {
    let mut domains = BTreeSet::new();

    for (index, raw) in content.lines().enumerate() {
        let Some(domain) = registry_candidate(raw) else { continue };
        if is_valid_fqdn(domain) {
            domains.insert(domain.to_lowercase());
        } else {
            warn!("Invalid domain format on line {}: {}", index + 1, domain);
        }
    }

    domains
}

/// The text of a line that should hold a domain. Summary items such as
/// `- Last updated: ...` are labelled with a colon and are not candidates.
fn registry_candidate(raw: &str) -> Option<&str> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let item = raw.strip_prefix("  - ").or_else(|| line.strip_prefix("- "));
    match item {
        Some(rest) if rest.contains(':') => None,
        Some(rest) => Some(rest.trim()),
        None if line.contains('.') && !line.starts_with("##") => Some(line),
        None => None,
    }
}

/// Seeds are skipped when their host is already registered, directly or as a
/// subdomain of an entry. Dual-stack runs never skip. Returns the reason.
pub fn should_skip_seed(url: &str, existing: &BTreeSet<String>, dual_stack: bool) -> Option<String> {
    if dual_stack {
        return None;
    }
    let host = base_domain(&host_of(url)?);

    if existing.contains(&host) {
        return Some(format!("main domain {} already in existing domains", host));
    }
    existing
        .iter()
        .find(|known| host.ends_with(&format!(".{}", known)))
        .map(|known| format!("subdomain of known domain {}", known))
}

/// `<output>.backup_<YYYYMMDD_HHMMSS>`.
pub fn backup_path(output: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    suffixed(output, &format!(".backup_{}", stamp))
}

pub fn temp_path(output: &Path) -> PathBuf {
    suffixed(output, ".tmp")
}

/// Staging file used when putting a backup back.
pub fn restore_path(output: &Path) -> PathBuf {
    suffixed(output, ".restore")
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Best effort: a failed backup is logged and the write proceeds without one.
pub fn create_backup(output: &Path) -> Option<PathBuf> {
    if !output.exists() {
        return None;
    }
    let backup = backup_path(output);
    match fs::copy(output, &backup) {
        Ok(_) => {
            info!("Created backup: {}", backup.display());
            Some(backup)
        }
        Err(e) => {
            warn!("Could not create backup of {}: {}", output.display(), e);
            None
        }
    }
}

pub struct RenderInput<'a> {
    pub domains: &'a BTreeSet<String>,
    pub added: usize,
    pub removed: usize,
    pub metadata: &'a RunMetadata,
    pub backup: Option<&'a Path>,
    pub updated_at: &'a str,
}

pub fn render(mode: OutputMode, input: &RenderInput<'_>) -> String {
    match mode {
        OutputMode::FqdnList => render_fqdn_list(input),
        OutputMode::Report => render_report(input),
    }
}

fn write_sources(out: &mut String, metadata: &RunMetadata) {
    let _ = writeln!(out, "# Input Sources:");
    if metadata.input_sources.is_empty() {
        let _ = writeln!(out, "#   1. Unknown");
    }
    for (i, source) in metadata.input_sources.iter().enumerate() {
        let _ = writeln!(out, "#   {}. {}", i + 1, source);
    }
    let _ = writeln!(out, "#");
}

fn render_fqdn_list(input: &RenderInput<'_>) -> String {
    let m = input.metadata;
    let mut out = String::new();
    let _ = writeln!(out, "# Organization FQDN List");
    let _ = writeln!(out, "# Generated by fqdnfinder - excludes third-party domains");
    let _ = writeln!(out, "# Last updated: {}", input.updated_at);
    let _ = writeln!(out, "#");
    write_sources(&mut out, m);

    let _ = writeln!(out, "# Statistics:");
    let _ = writeln!(out, "#   Total organization domains: {}", input.domains.len());
    let _ = writeln!(out, "#   New domains added this run: {}", input.added);
    let _ = writeln!(out, "#   Dead domains removed this run: {}", input.removed);
    let _ = writeln!(out, "#   Concurrency level: {}", m.concurrency);
    let _ = writeln!(out, "#   Max pages per site: {}", m.max_pages);
    let _ = writeln!(out, "#");

    let _ = writeln!(out, "# Configuration:");
    let _ = writeln!(out, "#   Headless mode: {}", m.headless);
    let _ = writeln!(out, "#   Cookie persistence: {}", m.persist_cookies);
    let _ = writeln!(out, "#   Dual-stack mode: {}", m.dual_stack);
    if let Some(path) = &m.url_file {
        let _ = writeln!(out, "#   URL file: {}", path.display());
    }
    if let Some(path) = &m.cookie_file {
        let _ = writeln!(out, "#   Cookie file: {}", path.display());
    }
    if let Some(path) = &m.log_file {
        let _ = writeln!(out, "#   Log file: {}", path.display());
    }
    if let Some(path) = input.backup {
        let _ = writeln!(out, "#   Backup file: {}", path.display());
    }
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "# Format: One domain per line (FQDN format)");
    let _ = writeln!(out, "{}\n", HEADER_RULE);

    for domain in input.domains {
        let _ = writeln!(out, "{}", domain);
    }
    out
}

fn render_report(input: &RenderInput<'_>) -> String {
    let m = input.metadata;
    let mut out = String::new();
    let _ = writeln!(out, "# Domain Analysis Report");
    let _ = writeln!(out, "# Generated by fqdnfinder");
    let _ = writeln!(out, "# Last updated: {}", input.updated_at);
    let _ = writeln!(out, "#");
    write_sources(&mut out, m);

    let _ = writeln!(out, "# Configuration:");
    let _ = writeln!(out, "#   Concurrency level: {}", m.concurrency);
    let _ = writeln!(out, "#   Max pages per site: {}", m.max_pages);
    let _ = writeln!(out, "#   Headless mode: {}", m.headless);
    let _ = writeln!(out, "#   Cookie persistence: {}", m.persist_cookies);
    let _ = writeln!(out, "#   Dual-stack mode: {}", m.dual_stack);
    if let Some(path) = input.backup {
        let _ = writeln!(out, "#   Backup file: {}", path.display());
    }
    let _ = writeln!(out, "{}\n", HEADER_RULE);

    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "- Last updated: {}", input.updated_at);
    let _ = writeln!(out, "- Total organization domains: {}", input.domains.len());
    let _ = writeln!(out, "- New domains added this run: {}", input.added);
    let _ = writeln!(out, "- Dead domains removed this run: {}\n", input.removed);

    let _ = writeln!(out, "## Organization FQDN List");
    for domain in input.domains {
        let _ = writeln!(out, "{}", domain);
    }
    out
}

/// Write to a sibling temp file, fsync, then rename over `output`.
pub fn write_atomically(output: &Path, content: &str) -> std::io::Result<()> {
    replace_via(&temp_path(output), output, content.as_bytes())
}

/// `output` is only ever replaced by rename, never truncated. A staging file
/// left behind by a failed write is removed.
fn replace_via(staging: &Path, output: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let result = (|| {
        let mut file = fs::File::create(staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(staging, output)
    })();
    if result.is_err() && staging.is_file() {
        if let Err(e) = fs::remove_file(staging) {
            warn!("Could not remove temporary file {}: {}", staging.display(), e);
        }
    }
    result
}

/// Puts `backup` back at `output`. Nothing is written when `output` already
/// holds the backup's bytes, which is the usual case after a failed write.
pub fn restore_from_backup(backup: &Path, output: &Path) -> std::io::Result<()> {
    let saved = fs::read(backup)?;
    if fs::read(output).is_ok_and(|current| current == saved) {
        return Ok(());
    }
    replace_via(&restore_path(output), output, &saved)
}

/// Replaces the registry with `(existing - dead) | new`.
///
/// On failure the temp file is removed and the output is checked against the
/// backup, restored by rename if it differs; the error says whether the
/// output ended up matching the backup.
pub fn reconcile(
    output: &Path,
    new_domains: &BTreeSet<String>,
    existing: &BTreeSet<String>,
    dead: &BTreeSet<String>,
    metadata: &RunMetadata,
    mode: OutputMode,
) -> Result<ReconcileReport, RegistryError> {
    let backup = create_backup(output);

    let domains: BTreeSet<String> = existing
        .difference(dead)
        .cloned()
        .chain(new_domains.iter().cloned())
        .collect();
    let updated_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let content = render(
        mode,
        &RenderInput {
            domains: &domains,
            added: new_domains.len(),
            removed: dead.len(),
            metadata,
            backup: backup.as_deref(),
            updated_at: &updated_at,
        },
    );

    if let Err(source) = write_atomically(output, &content) {
        let restored_from = backup.filter(|b| match restore_from_backup(b, output) {
            Ok(()) => {
                info!("Restored {} from backup {}", output.display(), b.display());
                true
            }
            Err(e) => {
                warn!("Could not restore from backup {}: {}", b.display(), e);
                false
            }
        });
        return Err(RegistryError::Write {
            path: output.to_path_buf(),
            source,
            restored_from,
        });
    }

    info!(
        "Updated {}: {} added, {} removed, {} total",
        output.display(),
        new_domains.len(),
        dead.len(),
        domains.len()
    );

    Ok(ReconcileReport {
        output: output.to_path_buf(),
        added: new_domains.len(),
        removed: dead.len(),
        domains,
        backup,
        updated_at,
    })
}
