use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,   // Only progress bar, errors and final summary
    Summary = 1,  // Per-site phases and results (default)
    Detailed = 2, // Warnings and per-page crawl progress
    Debug = 3,    // Everything, including skipped links and DNS retries
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }
}

/// Counters collected during a run and printed in the final summary.
#[derive(Default, Clone, Debug)]
pub struct RunMetrics {
    pub urls_total: usize,
    pub urls_skipped: usize,
    pub urls_succeeded: usize,
    pub urls_failed: usize,
    pub subdomains: usize,
    pub external_domains: usize,
    pub organization_fqdns: usize,
    pub dns_excluded: usize,
    pub registry_new: usize,
    pub registry_dead: usize,
    pub registry_total: Option<usize>,
    pub backup_file: Option<PathBuf>,
    pub restored_from: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
}

/// Process-wide, user-facing log sink. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
    metrics: Arc<Mutex<RunMetrics>>,
    started: Arc<Mutex<Option<Instant>>>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<PathBuf>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(RwLock::new(None)),
            metrics: Arc::new(Mutex::new(RunMetrics::default())),
            started: Arc::new(Mutex::new(None)),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: impl Into<PathBuf>) -> Self {
        Self {
            log_file_path: Some(log_file_path.into()),
            ..Self::new(verbosity)
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    /// Handle that prefixes every message with `[site]`.
    pub fn for_site(&self, site: impl Into<String>) -> SiteLogger {
        SiteLogger {
            run: self.clone(),
            site: site.into(),
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    /// Errors are shown at every verbosity.
    pub fn error(&self, message: &str) {
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let plain = format!("[{}] {}: {}", timestamp, level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(plain);
            }
        }

        let tag = match level {
            "ERROR" => level.red().bold(),
            "WARN" => level.yellow(),
            "DEBUG" => level.cyan(),
            _ => level.green(),
        };
        let line = format!("[{}] {}: {}", timestamp, tag, message);

        // Route through the progress bar so it stays pinned at the bottom.
        if let Ok(guard) = self.progress_bar.try_read() {
            if let Some(pb) = guard.as_ref() {
                pb.println(line);
                return;
            }
        }

        eprintln!("{}", line);
    }

    pub async fn start_progress(&self, total_steps: u64) {
        let pb = ProgressBar::new(total_steps);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sites {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message("starting");

        *self.progress_bar.write().await = Some(pb);
        self.mark_started();
    }

    pub async fn update_progress(&self, message: &str) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.set_message(message.to_string());
        }
    }

    pub async fn advance_progress(&self, steps: u64) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.inc(steps);
        }
    }

    pub async fn finish_progress(&self, final_message: &str) {
        if let Some(pb) = self.progress_bar.write().await.take() {
            pb.finish_and_clear();
        }
        self.info(final_message);
    }

    pub fn mark_started(&self) {
        if let Ok(mut started) = self.started.lock() {
            started.get_or_insert_with(Instant::now);
        }
    }

    /// Applies `update` to the shared run counters.
    pub fn record(&self, update: impl FnOnce(&mut RunMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            update(&mut metrics);
        }
    }

    pub fn metrics(&self) -> RunMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Printed to stdout at every verbosity.
    pub fn print_final_summary(&self) {
        let metrics = self.metrics();
        let duration = self
            .started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed().as_secs_f64());

        print!("\x1b[2K\r");
        let _ = io::stdout().flush();

        println!("\n=== RUN SUMMARY ===");
        if let Some(secs) = duration {
            println!("Duration: {:.2}s", secs);
        }
        println!("URLs: {} total, {} processed, {} failed, {} skipped (already known)",
            metrics.urls_total, metrics.urls_succeeded, metrics.urls_failed, metrics.urls_skipped);
        println!("Unique subdomains: {}", metrics.subdomains);
        println!("Unique external domains: {}", metrics.external_domains);
        println!("Organization FQDNs: {}", metrics.organization_fqdns);
        println!("Excluded (no DNS records): {}", metrics.dns_excluded);

        if let Some(output) = &metrics.output_file {
            println!("Registry: {}", output.display());
            println!("  New domains added: {}", metrics.registry_new);
            println!("  Dead domains removed: {}", metrics.registry_dead);
            if let Some(total) = metrics.registry_total {
                println!("  Total domains: {}", total);
            }
            if let Some(backup) = &metrics.backup_file {
                println!("  Backup created: {}", backup.display());
            }
            if let Some(restored) = &metrics.restored_from {
                println!("  Restored from backup: {}", restored.display());
            }
        }
        println!("===================\n");
    }

    /// Writes every buffered log line to the `--log-file` path, if one was given.
    pub fn export_logs(&self) -> Result<()> {
        let Some(path) = &self.log_file_path else {
            return Ok(());
        };
        write_log_file(path, &self.buffered_lines())
    }

    pub fn is_log_export_enabled(&self) -> bool {
        self.log_file_path.is_some()
    }

    pub fn buffered_lines(&self) -> Vec<String> {
        self.log_buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

fn write_log_file(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.flush()?;
    Ok(())
}

/// Per-site view of the run logger.
#[derive(Clone)]
pub struct SiteLogger {
    run: RunLogger,
    site: String,
}

impl SiteLogger {
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn run(&self) -> &RunLogger {
        &self.run
    }

    pub fn info(&self, message: &str) {
        self.run.info(&self.prefixed(message));
    }

    pub fn warn(&self, message: &str) {
        self.run.warn(&self.prefixed(message));
    }

    pub fn error(&self, message: &str) {
        self.run.error(&self.prefixed(message));
    }

    pub fn debug(&self, message: &str) {
        self.run.debug(&self.prefixed(message));
    }

    fn prefixed(&self, message: &str) -> String {
        format!("[{}] {}", self.site, message)
    }
}
