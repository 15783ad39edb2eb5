//! Run orchestration: seeds in, registry out.
//!
//! Each seed is processed by its own task that owns its page session and crawl
//! state and returns an immutable [`ProcessingResult`]. Results are unioned only
//! after every task has finished; the registry is written once, at the end.

use crate::batch::{normalize_seed, BatchSummary, SeedOutcome};
use crate::config::RunConfig;
use crate::cookies::load_cookie_file;
use crate::crawler::crawl;
use crate::dns::DnsValidator;
use crate::domain_utils::{base_domain_of_url, categorize, Categorization};
use crate::embedded;
use crate::logger::{RunLogger, SiteLogger};
use crate::registry::{self, ReconcileReport, RegistryError};
use crate::render::{load_storage_state, save_storage_state, IpVersion, PageSession, Renderer};
use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Shared, read-only context handed to every task.
#[derive(Clone)]
pub struct RunContext {
    pub config: Arc<RunConfig>,
    pub logger: RunLogger,
}

impl RunContext {
    pub fn new(config: RunConfig, logger: RunLogger) -> Self {
        Self {
            config: Arc::new(config),
            logger,
        }
    }
}

/// Everything one seed contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    pub url: String,
    pub subdomains: BTreeSet<String>,
    pub external_domains: BTreeSet<String>,
    pub related_domains: BTreeSet<String>,
    pub parent_domains: BTreeSet<String>,
    /// Subdomains, parents, related domains and the base domain.
    pub consolidated: BTreeSet<String>,
}

impl ProcessingResult {
    /// Set union of two results for the same seed.
    pub fn merge(mut self, other: ProcessingResult) -> Self {
        self.subdomains.extend(other.subdomains);
        self.external_domains.extend(other.external_domains);
        self.related_domains.extend(other.related_domains);
        self.parent_domains.extend(other.parent_domains);
        self.consolidated.extend(other.consolidated);
        self
    }
}

/// Outcome of the registry write, when `-o` was given.
#[derive(Debug)]
pub enum RegistryUpdate {
    Written(ReconcileReport),
    Failed(RegistryError),
}

/// What a run produced, for printing and for tests.
#[derive(Debug)]
pub struct RunReport {
    pub seeds: Vec<String>,
    pub summary: BatchSummary,
    /// Validated subdomains across all seeds.
    pub subdomains: Vec<String>,
    /// External domains that survived validation.
    pub external_domains: Vec<String>,
    /// Organization FQDNs that passed DNS validation.
    pub organization_fqdns: Vec<String>,
    /// Discovered domains dropped by DNS validation.
    pub excluded: Vec<String>,
    pub existing: BTreeSet<String>,
    pub dead: BTreeSet<String>,
    pub registry: Option<RegistryUpdate>,
}

impl RunReport {
    /// Domain lists for stdout.
    pub fn print(&self, include_fqdn_list: bool) {
        println!("\nAll Discovered Subdomains:");
        print_list(&self.subdomains);

        println!("\nAll Related Organization Domains:");
        print_list(&self.external_domains);

        if include_fqdn_list {
            println!("\nCONSOLIDATED ORGANIZATION FQDN LIST");
            println!("{}", "=".repeat(50));
            println!("# All domains associated with the target organizations");
            println!("# (Excludes third-party domains)");
            for domain in &self.organization_fqdns {
                println!("{}", domain);
            }
        }
    }
}

fn print_list(domains: &[String]) {
    if domains.is_empty() {
        println!("  None found.");
    }
    for domain in domains {
        println!("  - {}", domain);
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    ctx: RunContext,
    renderer: Arc<dyn Renderer>,
    validator: DnsValidator,
}

impl Orchestrator {
    pub fn new(ctx: RunContext, renderer: Arc<dyn Renderer>, validator: DnsValidator) -> Self {
        Self {
            ctx,
            renderer,
            validator,
        }
    }

    fn config(&self) -> &RunConfig {
        &self.ctx.config
    }

    fn logger(&self) -> &RunLogger {
        &self.ctx.logger
    }

    /// Runs every seed and reconciles the registry. Per-seed failures are
    /// recorded in the summary; only an empty seed list is an error.
    pub async fn run(&self, seeds: Vec<String>) -> Result<RunReport> {
        if seeds.is_empty() {
            bail!("No seed URLs to process");
        }
        let log = self.logger().clone();
        log.mark_started();
        log.record(|m| {
            m.urls_total = seeds.len();
            m.output_file = self.config().output.clone();
        });

        let (existing, dead) = match &self.config().output {
            Some(output) => self.revalidate_registry(output).await,
            None => (BTreeSet::new(), BTreeSet::new()),
        };
        let validated_existing: BTreeSet<String> = existing.difference(&dead).cloned().collect();

        let mut summary = BatchSummary::new(seeds.len());
        let mut pending = Vec::new();
        for seed in &seeds {
            let url = normalize_seed(seed);
            match registry::should_skip_seed(&url, &validated_existing, self.config().dual_stack) {
                Some(reason) => {
                    log.info(&format!("Skipping {}: {}", url, reason));
                    summary.record_skip(url);
                }
                None => pending.push(url),
            }
        }
        if !summary.skipped.is_empty() {
            log.info(&format!("Efficiency: Skipped {} URLs with known domains", summary.skipped.len()));
        }
        log.record(|m| m.urls_skipped = summary.skipped.len());

        if summary.all_skipped() {
            log.info("All URLs skipped - domains already known and validated");
            summary.finalize();
            let registry = match &self.config().output {
                Some(output) if !dead.is_empty() => {
                    Some(self.write_registry(output, &BTreeSet::new(), &existing, &dead, &seeds))
                }
                _ => None,
            };
            return Ok(RunReport {
                seeds,
                summary,
                subdomains: Vec::new(),
                external_domains: Vec::new(),
                organization_fqdns: Vec::new(),
                excluded: Vec::new(),
                existing,
                dead,
                registry,
            });
        }

        if pending.len() > 1 {
            pending.shuffle(&mut rand::thread_rng());
            log.info(&format!(
                "Randomized processing order for {} URLs to avoid detection patterns",
                pending.len()
            ));
        }

        let results = self.process_all(&pending, &mut summary).await;
        summary.finalize();
        log.record(|m| {
            m.urls_succeeded = summary.successful;
            m.urls_failed = summary.failed;
        });

        let combined = results
            .into_iter()
            .fold(ProcessingResult::default(), ProcessingResult::merge);

        let discovered: Vec<String> = combined.consolidated.iter().cloned().collect();
        let (valid, excluded) = if discovered.is_empty() {
            (BTreeSet::new(), Vec::new())
        } else {
            log.info(&format!("Validating {} discovered domains via DNS...", discovered.len()));
            let batch = self
                .validator
                .validate_all(&discovered, self.config().discovery_concurrency)
                .await;
            for domain in &batch.dead {
                log.info(&format!("Excluded invalid domain: {}", domain));
            }
            if !batch.dead.is_empty() {
                log.info(&format!("Excluded {} domains that don't resolve in DNS", batch.dead.len()));
            }
            log.info(&format!("Validated {} domains and ready for output", batch.valid.len()));
            (batch.valid, batch.dead.into_iter().collect())
        };

        let subdomains: Vec<String> = combined.subdomains.iter().filter(|d| valid.contains(*d)).cloned().collect();
        let external_domains: Vec<String> = combined
            .external_domains
            .iter()
            .filter(|d| valid.contains(*d))
            .cloned()
            .collect();
        log.record(|m| {
            m.subdomains = subdomains.len();
            m.external_domains = external_domains.len();
            m.organization_fqdns = valid.len();
            m.dns_excluded = excluded.len();
        });

        let registry = match &self.config().output {
            Some(output) => {
                let new_domains: BTreeSet<String> = valid.difference(&validated_existing).cloned().collect();
                Some(self.write_registry(output, &new_domains, &existing, &dead, &seeds))
            }
            None => None,
        };

        Ok(RunReport {
            seeds,
            summary,
            subdomains,
            external_domains,
            organization_fqdns: valid.into_iter().collect(),
            excluded,
            existing,
            dead,
            registry,
        })
    }

    /// Loads the registry and re-checks every entry. Returns `(existing, dead)`.
    async fn revalidate_registry(&self, output: &Path) -> (BTreeSet<String>, BTreeSet<String>) {
        let log = self.logger();
        log.info("Loading existing domains from output file...");
        let existing = match registry::load_registry(output) {
            Ok(domains) => domains,
            Err(e) => {
                log.error(&format!("Could not load existing domains: {}", e));
                BTreeSet::new()
            }
        };
        if existing.is_empty() {
            return (existing, BTreeSet::new());
        }

        log.info(&format!("Validating {} existing domains via DNS...", existing.len()));
        let domains: Vec<String> = existing.iter().cloned().collect();
        let batch = self
            .validator
            .validate_all(&domains, self.config().revalidation_concurrency)
            .await;
        for domain in &batch.dead {
            log.info(&format!("Dead domain removed: {}", domain));
        }
        log.info(&format!("Validated {} domains as active", batch.valid.len()));
        (existing, batch.dead)
    }

    fn write_registry(
        &self,
        output: &Path,
        new_domains: &BTreeSet<String>,
        existing: &BTreeSet<String>,
        dead: &BTreeSet<String>,
        seeds: &[String],
    ) -> RegistryUpdate {
        let log = self.logger();
        let metadata = self.config().run_metadata(seeds);

        match registry::reconcile(output, new_domains, existing, dead, &metadata, self.config().output_mode) {
            Ok(report) => {
                log.info(&format!(
                    "Updated {}: added {} new domains, removed {} dead domains, {} total",
                    output.display(),
                    report.added,
                    report.removed,
                    report.total()
                ));
                log.record(|m| {
                    m.registry_new = report.added;
                    m.registry_dead = report.removed;
                    m.registry_total = Some(report.total());
                    m.backup_file = report.backup.clone();
                });
                RegistryUpdate::Written(report)
            }
            Err(e) => {
                log.error(&format!("Error updating output file: {}", e));
                if let RegistryError::Write {
                    restored_from: Some(backup),
                    ..
                } = &e
                {
                    log.info(&format!("Restored from backup: {}", backup.display()));
                    log.record(|m| m.restored_from = Some(backup.clone()));
                }
                RegistryUpdate::Failed(e)
            }
        }
    }

    /// Concurrent when there is more than one seed and concurrency allows it.
    async fn process_all(&self, seeds: &[String], summary: &mut BatchSummary) -> Vec<ProcessingResult> {
        let log = self.logger().clone();
        let total = seeds.len();
        let concurrency = self.config().concurrency;
        log.start_progress(total as u64).await;

        let outcomes: Vec<(SeedOutcome, Option<ProcessingResult>)> = if total > 1 && concurrency > 1 {
            log.info(&format!("Concurrent processing enabled: {} browser instances", concurrency));
            let gate = Arc::new(Semaphore::new(concurrency));

            let handles: Vec<_> = seeds
                .iter()
                .enumerate()
                .map(|(index, url)| {
                    let this = self.clone();
                    let gate = gate.clone();
                    let url = url.clone();
                    tokio::spawn(async move {
                        let _permit = gate.acquire().await;
                        this.process_tracked(&url, index, total).await
                    })
                })
                .collect();

            join_all(handles)
                .await
                .into_iter()
                .zip(seeds)
                .map(|(joined, url)| {
                    joined.unwrap_or_else(|e| {
                        log.error(&format!("Task for {} failed: {}", url, e));
                        (failed_outcome(url, e.to_string(), 0.0), None)
                    })
                })
                .collect()
        } else {
            let mut outcomes = Vec::with_capacity(total);
            for (index, url) in seeds.iter().enumerate() {
                log.info(&format!("PROCESSING URL {}/{}", index + 1, total));
                outcomes.push(self.process_tracked(url, index, total).await);
            }
            outcomes
        };

        let mut results = Vec::new();
        for (outcome, result) in outcomes {
            summary.record(outcome);
            results.extend(result);
        }
        log.finish_progress(&format!(
            "Processing completed: {}/{} URLs processed successfully",
            results.len(),
            total
        ))
        .await;
        results
    }

    async fn process_tracked(&self, url: &str, index: usize, total: usize) -> (SeedOutcome, Option<ProcessingResult>) {
        let started = Instant::now();
        self.logger().update_progress(url).await;
        let result = self.process_seed(url, index, total).await;
        let duration = started.elapsed().as_secs_f64();
        self.logger().advance_progress(1).await;

        match result {
            Some(r) => {
                let outcome = SeedOutcome {
                    url: url.to_string(),
                    success: true,
                    error: None,
                    subdomains: r.subdomains.len(),
                    external_domains: r.external_domains.len(),
                    organization_fqdns: r.consolidated.len(),
                    duration_secs: duration,
                };
                (outcome, Some(r))
            }
            None => (failed_outcome(url, "no result".to_string(), duration), None),
        }
    }

    /// One seed, both address families in dual-stack mode. `None` when
    /// nothing usable came back; the reason has already been logged.
    pub async fn process_seed(&self, url: &str, index: usize, total: usize) -> Option<ProcessingResult> {
        let url = normalize_seed(url);
        let site = self.site_logger(&url);
        site.info(&format!("Starting processing [{}/{}]", index + 1, total));

        if !self.config().dual_stack {
            return self.process_with_ip(&url, index, None, &site).await;
        }

        site.info("Dual-stack mode: Crawling both IPv4 and IPv6");
        let v4 = self.process_with_ip(&url, index, Some(IpVersion::V4), &site).await;
        let v6 = self.process_with_ip(&url, index, Some(IpVersion::V6), &site).await;

        match (v4, v6) {
            (Some(v4), Some(v6)) => {
                let (v4_count, v6_count) = (v4.consolidated.len(), v6.consolidated.len());
                let merged = v4.merge(v6);
                site.info(&format!(
                    "Combined Results: IPv4 domains: {}, IPv6 domains: {}, total unique: {}",
                    v4_count,
                    v6_count,
                    merged.consolidated.len()
                ));
                Some(merged)
            }
            (Some(v4), None) => {
                site.warn("IPv6 failed, using IPv4 results only");
                Some(v4)
            }
            (None, Some(v6)) => {
                site.warn("IPv4 failed, using IPv6 results only");
                Some(v6)
            }
            (None, None) => {
                site.error("Both IPv4 and IPv6 failed");
                None
            }
        }
    }

    fn site_logger(&self, url: &str) -> SiteLogger {
        let site = base_domain_of_url(url).unwrap_or_else(|| url.to_string());
        self.logger().for_site(site)
    }

    async fn process_with_ip(
        &self,
        url: &str,
        index: usize,
        ip_version: Option<IpVersion>,
        site: &SiteLogger,
    ) -> Option<ProcessingResult> {
        match self.try_process(url, index, ip_version, site).await {
            Ok(result) => Some(result),
            Err(e) => {
                site.error(&format!("Error during processing: {:#}", e));
                None
            }
        }
    }

    async fn try_process(
        &self,
        url: &str,
        index: usize,
        ip_version: Option<IpVersion>,
        site: &SiteLogger,
    ) -> Result<ProcessingResult> {
        let config = self.config();
        let domain = base_domain_of_url(url).ok_or_else(|| anyhow!("Invalid seed URL: {}", url))?;
        let ip_label = ip_version.map(|v| format!(" ({})", v)).unwrap_or_default();
        site.info(&format!("Connecting to {}{}...", url, ip_label));

        let storage = if config.persist_storage {
            Some(self.prepare_storage(&domain, site))
        } else {
            None
        };

        let mut session = self
            .renderer
            .open_session(&config.session_options(ip_version))
            .await
            .with_context(|| format!("Failed to open {} session", self.renderer.name()))?;

        if let Some(path) = &storage {
            if let Err(e) = load_storage_state(session.as_mut(), path).await {
                site.warn(&format!("Could not load browser data: {:#}", e));
            }
        }

        let result = self
            .extract_domains(url, &domain, index, session.as_mut(), storage.as_deref(), site)
            .await;

        if let Some(path) = &storage {
            match save_storage_state(session.as_mut(), path).await {
                Ok(_) => site.debug(&format!("Browser data saved to {}", path.display())),
                Err(e) => site.warn(&format!("Could not save browser data: {:#}", e)),
            }
        }

        let result = result?;
        site.info(&format!(
            "Results Summary{}: {} subdomains, {} related domains, {} organization FQDNs",
            ip_label,
            result.subdomains.len(),
            result.related_domains.len(),
            result.consolidated.len()
        ));
        Ok(result)
    }

    /// Storage-state path for `domain`, cleared first when requested.
    fn prepare_storage(&self, domain: &str, site: &SiteLogger) -> PathBuf {
        let path = self.config().storage_path(domain);
        if self.config().clear_storage && path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => site.info(&format!("Cleared existing browser data for {}", domain)),
                Err(e) => site.warn(&format!("Could not clear browser data {}: {}", path.display(), e)),
            }
        }
        path
    }

    async fn extract_domains(
        &self,
        url: &str,
        base: &str,
        index: usize,
        session: &mut dyn PageSession,
        storage: Option<&Path>,
        site: &SiteLogger,
    ) -> Result<ProcessingResult> {
        let config = self.config();

        if let (Some(cookie_file), 0) = (&config.cookie_file, index) {
            site.info(&format!("Loading cookies from {}...", cookie_file.display()));
            let cookies = load_cookie_file(cookie_file)?;
            session.add_cookies(&cookies).await.context("Failed to import cookies")?;
            site.info(&format!("Successfully imported {} cookies", cookies.len()));
            if let Some(path) = storage {
                if let Err(e) = save_storage_state(session, path).await {
                    site.warn(&format!("Could not save imported cookies: {:#}", e));
                }
            }
        }

        site.info("Phase 1: Loading initial page...");
        let response = session
            .navigate(url, config.nav_timeout)
            .await
            .with_context(|| format!("Failed to load {}", url))?;
        site.info(&format!("Initial page loaded - Status: {}", response.status));
        if response.is_error() {
            bail!("Failed to load {} - Status: {}", url, response.status);
        }

        if config.manual_login {
            self.wait_for_manual_login(site).await;
        }

        site.info("Phase 2: Checking for embedded domain configuration...");
        let html = session.content().await.context("Failed to read page content")?;
        let embedded_domains = embedded::extract(&html);

        let (subdomains, external_domains) = if embedded_domains.is_empty() {
            site.info("Phase 3: No embedded config found, starting crawler...");
            let crawled = crawl(url, &config.crawl_options(), session, site).await;
            (crawled.subdomains, crawled.external_domains)
        } else {
            site.info(&format!(
                "Success! Found embedded domain config with {} domains",
                embedded_domains.len()
            ));
            (embedded_domains, Vec::new())
        };

        let categories = if external_domains.is_empty() {
            Categorization::default()
        } else {
            site.info("Phase 4: Categorizing discovered domains...");
            let categories = categorize(base, &subdomains, &external_domains);
            site.debug(&format!(
                "Categorization complete: {} related, {} third-party, {} parent",
                categories.related.len(),
                categories.third_party.len(),
                categories.parents.len()
            ));
            categories
        };

        let mut consolidated: BTreeSet<String> = subdomains.iter().cloned().collect();
        consolidated.extend(categories.parents.iter().cloned());
        consolidated.extend(categories.related.iter().cloned());
        consolidated.insert(base.to_string());

        Ok(ProcessingResult {
            url: url.to_string(),
            subdomains: subdomains.into_iter().collect(),
            external_domains: external_domains.into_iter().collect(),
            related_domains: categories.related.into_iter().collect(),
            parent_domains: categories.parents.into_iter().collect(),
            consolidated,
        })
    }

    async fn wait_for_manual_login(&self, site: &SiteLogger) {
        if self.config().headless {
            site.warn("--manual-login has no effect in headless mode");
            return;
        }
        site.info("Manual login: log in using the browser window, then press Enter to continue...");
        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| ())
        })
        .await;
        if !matches!(read, Ok(Ok(()))) {
            site.warn("Could not read from stdin; continuing without waiting");
        }
    }
}

fn failed_outcome(url: &str, error: String, duration_secs: f64) -> SeedOutcome {
    SeedOutcome {
        url: url.to_string(),
        success: false,
        error: Some(error),
        subdomains: 0,
        external_domains: 0,
        organization_fqdns: 0,
        duration_secs,
    }
}
