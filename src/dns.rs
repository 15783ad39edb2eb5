use async_trait::async_trait;
use futures::future::join_all;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Address record families probed for existence, A first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::A => write!(f, "A"),
            RecordKind::Aaaa => write!(f, "AAAA"),
        }
    }
}

/// Why a single lookup produced no records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupFailure {
    /// NXDOMAIN or an empty answer: the resolver is sure the record does not exist.
    #[error("no {0} records")]
    NotFound(RecordKind),

    /// Timeout, SERVFAIL, malformed response, transport error.
    #[error("inconclusive lookup: {0}")]
    Inconclusive(String),
}

/// One existence query against a resolver.
#[async_trait]
pub trait RecordLookup: Send + Sync {
    /// Number of records found. Zero records must be reported as `NotFound`.
    async fn lookup(&self, domain: &str, kind: RecordKind) -> Result<usize, LookupFailure>;
}

/// Resolver-backed lookup built on hickory's tokio resolver.
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    /// Uses the host's resolver configuration (`/etc/resolv.conf` on unix).
    pub fn from_system_conf(timeout: Duration) -> anyhow::Result<Self> {
        let (config, opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| anyhow::anyhow!("Failed to read system DNS configuration: {}", e))?;
        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, Self::tune(opts, timeout)),
        })
    }

    /// Uses an explicit list of plain DNS servers (UDP with TCP fallback).
    pub fn with_nameservers(nameservers: &[SocketAddr], timeout: Duration) -> Self {
        let mut config = ResolverConfig::new();
        for addr in nameservers {
            let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
            for server in group.iter().cloned() {
                config.add_name_server(server);
            }
        }
        Self {
            resolver: TokioAsyncResolver::tokio(config, Self::tune(ResolverOpts::default(), timeout)),
        }
    }

    fn tune(mut opts: ResolverOpts, timeout: Duration) -> ResolverOpts {
        opts.timeout = timeout;
        // Retries are driven by DnsValidator.
        opts.attempts = 1;
        opts.use_hosts_file = false;
        // A cached NXDOMAIN would make every retry a no-op.
        opts.negative_max_ttl = Some(Duration::ZERO);
        opts
    }
}

#[async_trait]
impl RecordLookup for HickoryLookup {
    async fn lookup(&self, domain: &str, kind: RecordKind) -> Result<usize, LookupFailure> {
        let count = match kind {
            RecordKind::A => self
                .resolver
                .ipv4_lookup(domain)
                .await
                .map(|l| l.iter().count())
                .map_err(|e| classify(&e, kind))?,
            RecordKind::Aaaa => self
                .resolver
                .ipv6_lookup(domain)
                .await
                .map(|l| l.iter().count())
                .map_err(|e| classify(&e, kind))?,
        };
        if count == 0 {
            return Err(LookupFailure::NotFound(kind));
        }
        Ok(count)
    }
}

fn classify(err: &ResolveError, kind: RecordKind) -> LookupFailure {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if matches!(*response_code, ResponseCode::NXDomain | ResponseCode::NoError) =>
        {
            LookupFailure::NotFound(kind)
        }
        _ => LookupFailure::Inconclusive(err.to_string()),
    }
}

/// Existence verdict for one domain after all retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsVerdict {
    Valid,
    /// Every attempt ended in a definitive not-found for both A and AAAA.
    Dead,
    /// At least the last attempt failed for a reason other than not-found.
    Inconclusive,
}

impl DnsVerdict {
    /// Whether a domain with this verdict stays in the registry.
    pub fn keep(self, conservative: bool) -> bool {
        match self {
            DnsVerdict::Valid => true,
            DnsVerdict::Dead => false,
            DnsVerdict::Inconclusive => conservative,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub domain: String,
    pub verdict: DnsVerdict,
}

/// Partition of a batch of domains into kept and excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchValidation {
    pub valid: BTreeSet<String>,
    pub dead: BTreeSet<String>,
    /// Domains kept or dropped on policy rather than evidence.
    pub inconclusive: BTreeSet<String>,
}

/// Retry and failure policy for existence checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DnsPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Keep domains whose lookups are inconclusive.
    pub conservative: bool,
}

impl Default for DnsPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            conservative: true,
        }
    }
}

#[derive(Clone)]
pub struct DnsValidator {
    lookup: Arc<dyn RecordLookup>,
    policy: DnsPolicy,
}

impl DnsValidator {
    pub fn new(lookup: Arc<dyn RecordLookup>, policy: DnsPolicy) -> Self {
        Self { lookup, policy }
    }

    pub fn policy(&self) -> DnsPolicy {
        self.policy
    }

    /// A lookup, then AAAA when A is definitively absent. The two-step check is
    /// repeated up to `max_retries` times with `retry_delay` between attempts.
    pub async fn check(&self, domain: &str) -> DnsVerdict {
        let attempts = self.policy.max_retries.max(1);
        let mut last_failure = LookupFailure::NotFound(RecordKind::A);

        for attempt in 1..=attempts {
            match self.probe(domain).await {
                Ok(kind) => {
                    debug!("DNS validation successful for {} ({} record)", domain, kind);
                    return DnsVerdict::Valid;
                }
                Err(failure) => {
                    if attempt < attempts {
                        debug!(
                            "DNS validation failed for {} ({}), attempt {}/{}, retrying in {:?}",
                            domain, failure, attempt, attempts, self.policy.retry_delay
                        );
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                    last_failure = failure;
                }
            }
        }

        match last_failure {
            LookupFailure::NotFound(_) => {
                debug!("DNS validation failed for {}: domain does not exist", domain);
                DnsVerdict::Dead
            }
            LookupFailure::Inconclusive(reason) => {
                warn!("DNS validation inconclusive for {}: {}", domain, reason);
                DnsVerdict::Inconclusive
            }
        }
    }

    /// Existence check reduced to keep/drop under the configured policy.
    pub async fn validate(&self, domain: &str) -> bool {
        self.check(domain).await.keep(self.policy.conservative)
    }

    async fn probe(&self, domain: &str) -> Result<RecordKind, LookupFailure> {
        match self.lookup.lookup(domain, RecordKind::A).await {
            Ok(_) => Ok(RecordKind::A),
            Err(LookupFailure::NotFound(_)) => self
                .lookup
                .lookup(domain, RecordKind::Aaaa)
                .await
                .map(|_| RecordKind::Aaaa),
            Err(other) => Err(other),
        }
    }

    /// Validates every domain with at most `concurrency` checks in flight.
    pub async fn check_all(&self, domains: &[String], concurrency: usize) -> Vec<ValidationResult> {
        let gate = Arc::new(Semaphore::new(concurrency.max(1)));

        let checks = domains.iter().map(|domain| {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await;
                ValidationResult {
                    domain: domain.clone(),
                    verdict: self.check(domain).await,
                }
            }
        });

        join_all(checks).await
    }

    /// Batch validation partitioned by the conservative policy.
    pub async fn validate_all(&self, domains: &[String], concurrency: usize) -> BatchValidation {
        let mut batch = BatchValidation::default();
        for result in self.check_all(domains, concurrency).await {
            if result.verdict == DnsVerdict::Inconclusive {
                batch.inconclusive.insert(result.domain.clone());
            }
            if result.verdict.keep(self.policy.conservative) {
                batch.valid.insert(result.domain);
            } else {
                batch.dead.insert(result.domain);
            }
        }
        batch
    }
}
