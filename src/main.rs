use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fqdnfinder::batch::resolve_seeds;
use fqdnfinder::cli::Cli;
use fqdnfinder::config::{AppConfig, RendererKind, RunConfig};
use fqdnfinder::dns::{DnsValidator, HickoryLookup, RecordLookup};
use fqdnfinder::logger::{RunLogger, VerbosityLevel};
use fqdnfinder::orchestrator::{Orchestrator, RunContext};
use fqdnfinder::render::chrome::ChromeRenderer;
use fqdnfinder::render::http::HttpRenderer;
use fqdnfinder::render::Renderer;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,fqdnfinder={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
    init_tracing(cli.verbose);

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run fqdnfinder again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    let app_config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    };
    let app_config = match app_config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            eprintln!("   Run with --init to create a default configuration file.");
            std::process::exit(1);
        }
    };

    let run_config = match RunConfig::merge(&cli, &app_config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let seeds = match resolve_seeds(cli.start_url.as_deref(), run_config.url_file.as_deref()) {
        Ok(seeds) => seeds,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            eprintln!("   Usage: fqdnfinder <START_URL> or fqdnfinder --url-file <FILE>");
            std::process::exit(1);
        }
    };

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    let logger = match &run_config.log_file {
        Some(path) => RunLogger::with_log_file(verbosity, path),
        None => RunLogger::new(verbosity),
    };

    let lookup: Arc<dyn RecordLookup> = if run_config.nameservers.is_empty() {
        match HickoryLookup::from_system_conf(run_config.dns_timeout) {
            Ok(lookup) => Arc::new(lookup),
            Err(e) => {
                eprintln!("❌ {:#}", e);
                eprintln!("   Set dns.nameservers in the configuration file to use explicit resolvers.");
                std::process::exit(1);
            }
        }
    } else {
        Arc::new(HickoryLookup::with_nameservers(&run_config.nameservers, run_config.dns_timeout))
    };
    let validator = DnsValidator::new(lookup, run_config.dns_policy);

    let renderer: Arc<dyn Renderer> = match run_config.renderer {
        RendererKind::Chrome => Arc::new(ChromeRenderer::new()),
        RendererKind::Http => Arc::new(HttpRenderer::new()),
    };

    if seeds.len() == 1 {
        logger.info(&format!("Single URL analysis: {}", seeds[0]));
    } else {
        logger.info(&format!("Batch processing {} URLs", seeds.len()));
    }
    logger.debug(&format!("Configuration: {:?}", run_config));

    let print_fqdn_list = run_config.print_fqdn_list;
    let orchestrator = Orchestrator::new(RunContext::new(run_config, logger.clone()), renderer, validator);
    let report = orchestrator.run(seeds).await?;

    report.print(print_fqdn_list);
    logger.print_final_summary();

    if let Err(e) = logger.export_logs() {
        eprintln!("⚠️  Failed to write log file: {}", e);
    }

    Ok(())
}
