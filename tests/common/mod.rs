#![allow(dead_code)]

pub mod fakes;
pub mod wiremock_helpers;

use fqdnfinder::cli::Cli;
use fqdnfinder::config::{AppConfig, RunConfig};
use std::path::Path;

/// Run configuration with throttling off and storage under `dir`.
pub fn test_run_config(cli: Cli, dir: &Path) -> RunConfig {
    let cli = Cli {
        rate_limit: Some(0.0),
        ..cli
    };
    let mut config = RunConfig::merge(&cli, &AppConfig::embedded().unwrap()).unwrap();
    config.storage_dir = dir.join(".browser_data");
    config.dns_policy.retry_delay = std::time::Duration::ZERO;
    config
}
