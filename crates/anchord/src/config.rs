//! anchord.toml configuration.
//!
//! Layered: built-in defaults, then an optional TOML file, then CLI flags
//! and `ANCHOR_*` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};

use anchor_placement::ScoringWeights;
use anchor_scheduler::ControllerConfig;
use anchor_state::BackoffPolicy;

/// File name of the redb database inside `data_dir`.
pub const DB_FILE: &str = "anchor.redb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub scheduler: SchedulerSection,
    pub scoring: ScoringWeights,
    pub informer: InformerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub concurrency: usize,
    pub lease_secs: u64,
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub backoff_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InformerSection {
    /// Per-subscriber buffer of the node update bus.
    pub channel_capacity: usize,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("/var/lib/anchor"),
            scheduler: SchedulerSection::default(),
            scoring: ScoringWeights::default(),
            informer: InformerSection::default(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            concurrency: 10,
            lease_secs: 60,
            max_attempts: 5,
            backoff_ms: 1000,
            poll_interval_ms: 250,
        }
    }
}

impl Default for InformerSection {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Command-line / environment overrides. Unset values keep the file or
/// default setting.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// API listen address.
    #[arg(long, env = "ANCHOR_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Data directory for persistent state.
    #[arg(long, env = "ANCHOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Maximum scheduling jobs processed at once.
    #[arg(long, env = "ANCHOR_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Job lease duration in seconds.
    #[arg(long, env = "ANCHOR_LEASE_SECS")]
    pub lease_secs: Option<u64>,

    /// Attempts per scheduling job.
    #[arg(long, env = "ANCHOR_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Base retry backoff in milliseconds.
    #[arg(long, env = "ANCHOR_BACKOFF_MS")]
    pub backoff_ms: Option<u64>,

    /// Idle queue poll period in milliseconds.
    #[arg(long, env = "ANCHOR_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,
}

impl AnchorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AnchorConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the effective configuration and validate it.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(dir) = &overrides.data_dir {
            self.data_dir = dir.clone();
        }
        let s = &mut self.scheduler;
        if let Some(v) = overrides.concurrency {
            s.concurrency = v;
        }
        if let Some(v) = overrides.lease_secs {
            s.lease_secs = v;
        }
        if let Some(v) = overrides.max_attempts {
            s.max_attempts = v;
        }
        if let Some(v) = overrides.backoff_ms {
            s.backoff_ms = v;
        }
        if let Some(v) = overrides.poll_interval_ms {
            s.poll_interval_ms = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.scheduler;
        ensure!(s.concurrency >= 1, "scheduler.concurrency must be at least 1");
        ensure!(s.lease_secs > 0, "scheduler.lease_secs must be greater than 0");
        ensure!(s.max_attempts >= 1, "scheduler.max_attempts must be at least 1");
        ensure!(s.poll_interval_ms > 0, "scheduler.poll_interval_ms must be greater than 0");
        ensure!(self.informer.channel_capacity >= 1, "informer.channel_capacity must be at least 1");
        self.scoring.validate().context("invalid scoring weights")?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let s = &self.scheduler;
        ControllerConfig {
            concurrency: s.concurrency,
            lease: Duration::from_secs(s.lease_secs),
            max_attempts: s.max_attempts,
            backoff: BackoffPolicy::Exponential { delay_ms: s.backoff_ms },
            poll_interval: Duration::from_millis(s.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AnchorConfig::default();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/anchor/anchor.redb"));

        let ctl = config.controller_config();
        assert_eq!(ctl, ControllerConfig::default());
        assert_eq!(config.scoring.data_locality, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
listen = "127.0.0.1:9090"

[scheduler]
concurrency = 4

[scoring]
image_locality = 1.5
"#;
        let config: AnchorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.lease_secs, 60);
        assert_eq!(config.scoring.image_locality, 1.5);
        assert_eq!(config.scoring.resource_fit, 1.0);
        assert_eq!(config.informer.channel_capacity, 1024);
    }

    #[test]
    fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchord.toml");
        std::fs::write(&path, "[scheduler]\nconcurrency = 4\nmax_attempts = 3\n").unwrap();

        let overrides = Overrides {
            concurrency: Some(16),
            data_dir: Some(PathBuf::from("/tmp/anchor")),
            ..Overrides::default()
        };
        let config = AnchorConfig::load(Some(&path), &overrides).unwrap();
        assert_eq!(config.scheduler.concurrency, 16);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/anchor"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AnchorConfig::default();
        config.scheduler.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AnchorConfig::default();
        config.scheduler.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AnchorConfig::default();
        config.scoring.node_affinity = -2.0;
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("NodeAffinity"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AnchorConfig::load(Some(Path::new("/nonexistent/anchord.toml")), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
