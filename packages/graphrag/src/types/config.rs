//! Configuration types for graph construction.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Entity types used when the collection does not configure its own.
pub const DEFAULT_ENTITY_TYPES: &[&str] = &["organization", "person", "geo", "event", "category"];

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRagConfig {
    /// Ceiling on concurrently building documents.
    ///
    /// Default: 4.
    pub max_parallel_docs: usize,

    /// Output language hint passed to the extraction client.
    pub language: String,

    /// Allowed entity types; empty = unrestricted.
    #[serde(default)]
    pub entity_types: Vec<String>,

    /// Chunks are packed into extraction batches up to this many
    /// estimated tokens. Default: 4096.
    pub chunk_token_budget: usize,

    /// Descriptions larger than this (estimated tokens) are condensed by
    /// the LLM while building a fragment. Default: 512.
    pub description_summary_threshold: usize,

    #[serde(default)]
    pub deadlines: DeadlinePolicy,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub pagerank: PageRankConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub community: CommunityConfig,
}

impl Default for GraphRagConfig {
    fn default() -> Self {
        Self {
            max_parallel_docs: 4,
            language: "English".to_string(),
            entity_types: DEFAULT_ENTITY_TYPES.iter().map(|s| s.to_string()).collect(),
            chunk_token_budget: 4096,
            description_summary_threshold: 512,
            deadlines: DeadlinePolicy::default(),
            lock: LockConfig::default(),
            pagerank: PageRankConfig::default(),
            resolution: ResolutionConfig::default(),
            community: CommunityConfig::default(),
        }
    }
}

impl GraphRagConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Some(enforce) = env_parse::<bool>("GRAPHRAG_ENFORCE_DEADLINES")? {
            config.deadlines.enforce = enforce;
        }
        if let Some(n) = env_parse::<usize>("GRAPHRAG_MAX_PARALLEL_DOCS")? {
            config.max_parallel_docs = n;
        }
        if let Ok(language) = env::var("GRAPHRAG_LANGUAGE") {
            config.language = language;
        }
        if let Ok(types) = env::var("GRAPHRAG_ENTITY_TYPES") {
            config.entity_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secs) = env_parse::<u64>("GRAPHRAG_LOCK_WAIT_SECS")? {
            config.lock.acquire_wait_ms = secs * 1000;
        }
        if let Some(secs) = env_parse::<u64>("GRAPHRAG_LOCK_LEASE_SECS")? {
            config.lock.lease_secs = secs;
        }
        if let Some(radius) = env_parse::<usize>("GRAPHRAG_RESOLUTION_RADIUS")? {
            config.resolution.neighborhood_radius = radius;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_docs == 0 {
            return Err(GraphError::Config("max_parallel_docs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.pagerank.damping) {
            return Err(GraphError::Config("pagerank damping must be within 0..=1".into()));
        }
        if self.resolution.batch_size == 0 || self.resolution.max_concurrency == 0 {
            return Err(GraphError::Config(
                "resolution batch size and concurrency must be > 0".into(),
            ));
        }
        if self.community.max_concurrency == 0 {
            return Err(GraphError::Config("community concurrency must be > 0".into()));
        }
        // a lease that can expire mid-phase lets a second worker in
        if let Some(longest) = self.deadlines.longest_locked_phase() {
            if self.lock.lease() <= longest {
                return Err(GraphError::Config(format!(
                    "lock lease {:?} must outlast the longest locked phase deadline {longest:?}",
                    self.lock.lease()
                )));
            }
        }
        Ok(())
    }

    /// Set document concurrency.
    pub fn with_max_parallel_docs(mut self, n: usize) -> Self {
        self.max_parallel_docs = n;
        self
    }

    /// Set language hint.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set allowed entity types (empty = unrestricted).
    pub fn with_entity_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set deadline policy.
    pub fn with_deadlines(mut self, deadlines: DeadlinePolicy) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// Set lock configuration.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Set resolution configuration.
    pub fn with_resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set community configuration.
    pub fn with_community(mut self, community: CommunityConfig) -> Self {
        self.community = community;
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| GraphError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Deadlines for every externally facing phase.
///
/// Enforced deadlines scale with input size (production). With enforcement
/// off (manual testing) every deadline is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlinePolicy {
    pub enforce: bool,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::production()
    }
}

impl DeadlinePolicy {
    pub fn production() -> Self {
        Self { enforce: true }
    }

    pub fn manual_testing() -> Self {
        Self { enforce: false }
    }

    fn bounded(&self, secs: u64) -> Option<Duration> {
        self.enforce.then(|| Duration::from_secs(secs))
    }

    /// Building one document: ten minutes per chunk batch, at least two minutes.
    pub fn document_build(&self, chunks: usize) -> Option<Duration> {
        self.bounded((chunks as u64 * 600).max(120))
    }

    pub fn merge(&self) -> Option<Duration> {
        self.bounded(180)
    }

    pub fn resolution_pass(&self) -> Option<Duration> {
        self.bounded(1800)
    }

    pub fn resolution_batch(&self) -> Option<Duration> {
        self.bounded(280)
    }

    pub fn community_pass(&self) -> Option<Duration> {
        self.bounded(1800)
    }

    pub fn community_summary(&self) -> Option<Duration> {
        self.bounded(280)
    }

    /// The longest deadline of any phase that runs under the collection lock.
    pub fn longest_locked_phase(&self) -> Option<Duration> {
        [self.merge(), self.resolution_pass(), self.community_pass()]
            .into_iter()
            .flatten()
            .max()
    }
}

/// Collection lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock key prefix; the collection id is appended.
    pub key_prefix: String,

    /// Lease length; a crashed holder's lock expires after this. Must
    /// outlast every enforced locked-phase deadline.
    pub lease_secs: u64,

    /// How long to poll before giving up with a lock timeout.
    pub acquire_wait_ms: u64,

    /// Delay between acquisition attempts.
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "graphrag_task_".to_string(),
            lease_secs: 3600,
            acquire_wait_ms: 600_000,
            poll_interval_ms: 200,
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn acquire_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lock key for a collection.
    pub fn key_for(&self, collection_id: &str) -> String {
        format!("{}{}", self.key_prefix, collection_id)
    }

    pub fn with_acquire_wait(mut self, wait: Duration) -> Self {
        self.acquire_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease_secs = lease.as_secs().max(1);
        self
    }
}

/// PageRank settings for centrality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankConfig {
    pub damping: f64,
    pub iterations: usize,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            iterations: 30,
        }
    }
}

/// Entity resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Pairs per LLM judgment call.
    pub batch_size: usize,

    /// Concurrent judgment calls.
    pub max_concurrency: usize,

    /// Hops around recently touched nodes that are also rescanned.
    ///
    /// Default: 1 (touched nodes plus direct neighbors).
    pub neighborhood_radius: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 5,
            neighborhood_radius: 1,
        }
    }
}

/// Community detection and reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Maximum hierarchy depth.
    pub max_levels: usize,

    /// Communities smaller than this are not reported.
    pub min_size: usize,

    /// Modularity resolution (higher = more, smaller communities).
    pub resolution: f64,

    /// Concurrent summary calls.
    pub max_concurrency: usize,

    /// Most central members included in one summary prompt.
    pub max_members_per_prompt: usize,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            max_levels: 3,
            min_size: 2,
            resolution: 1.0,
            max_concurrency: 4,
            max_members_per_prompt: 64,
        }
    }
}
