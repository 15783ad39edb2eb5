//! Organization FQDN discovery.
//!
//! Crawls an organization's websites, classifies the domains they reference,
//! keeps the ones that resolve in DNS and maintains a registry file of them
//! across runs.

pub mod batch;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod crawler;
pub mod dns;
pub mod domain_utils;
pub mod embedded;
pub mod logger;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod render;
pub mod url_match;

pub use config::{AppConfig, RunConfig};
pub use orchestrator::{Orchestrator, ProcessingResult, RunContext, RunReport};
