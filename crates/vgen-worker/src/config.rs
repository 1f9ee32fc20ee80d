//! Worker configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use vgen_models::Stage;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker loops, i.e. maximum concurrently running jobs
    pub max_concurrent_jobs: usize,
    /// Idle wait between claim attempts when nothing signals new work
    pub poll_interval: Duration,
    /// Attempts and backoff for transient stage failures
    pub retry: RetryPolicy,
    /// Wall-clock limit of a single stage attempt
    pub stage_timeouts: HashMap<Stage, Duration>,
    /// Interval for refreshing job liveness while a stage runs
    pub job_heartbeat_interval: Duration,
    /// How often the liveness sweep runs
    pub sweep_interval: Duration,
    /// Silence after which a running job is considered lost
    pub liveness_threshold: Duration,
    /// Requeues allowed before a lost job is failed
    pub max_requeues: u32,
    /// Retention of terminal records
    pub job_ttl: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for intermediate files
    pub work_dir: PathBuf,
    /// Font used for scene text; fontconfig default when unset
    pub scene_font_file: Option<PathBuf>,
}

fn default_stage_timeout(stage: Stage) -> Duration {
    match stage {
        Stage::Script => Duration::from_secs(120),
        Stage::Audio => Duration::from_secs(300),
        Stage::Visuals => Duration::from_secs(900),
        Stage::Assembly => Duration::from_secs(600),
        Stage::Publish => Duration::from_secs(300),
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_interval: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            stage_timeouts: Stage::ALL
                .iter()
                .map(|s| (*s, default_stage_timeout(*s)))
                .collect(),
            job_heartbeat_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(30),
            liveness_threshold: Duration::from_secs(120),
            max_requeues: 2,
            job_ttl: Duration::from_secs(24 * 3600),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/vgen"),
            scene_font_file: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: env_parse("STAGE_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry.max_attempts)
                .max(1),
            base_delay: env_parse("STAGE_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: env_parse("STAGE_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        };

        let stage_timeouts = Stage::ALL
            .iter()
            .map(|stage| {
                let key = format!("STAGE_TIMEOUT_{}_SECS", stage.as_str().to_uppercase());
                let timeout = env_parse(&key)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| default_stage_timeout(*stage));
                (*stage, timeout)
            })
            .collect();

        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            retry,
            stage_timeouts,
            job_heartbeat_interval: env_parse("WORKER_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_heartbeat_interval),
            sweep_interval: env_parse("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            liveness_threshold: env_parse("WORKER_LIVENESS_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.liveness_threshold),
            max_requeues: env_parse("MAX_REQUEUES").unwrap_or(defaults.max_requeues),
            job_ttl: env_parse("JOB_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_ttl),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            scene_font_file: std::env::var("SCENE_FONT_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        self.stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or_else(|| default_stage_timeout(stage))
    }

    /// Heartbeats must land well inside the liveness threshold.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("WORKER_HEARTBEAT_SECS", self.job_heartbeat_interval),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval),
            ("WORKER_LIVENESS_SECS", self.liveness_threshold),
        ] {
            if value.is_zero() {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        if self.job_heartbeat_interval >= self.liveness_threshold {
            return Err(format!(
                "heartbeat interval {:?} must be shorter than liveness threshold {:?}",
                self.job_heartbeat_interval, self.liveness_threshold
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.job_ttl, Duration::from_secs(86_400));
        assert_eq!(config.stage_timeout(Stage::Script), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_beat_liveness() {
        let config = WorkerConfig {
            job_heartbeat_interval: Duration::from_secs(60),
            liveness_threshold: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_heartbeat_is_rejected() {
        let config = WorkerConfig {
            job_heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("WORKER_HEARTBEAT_SECS"));
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let config = WorkerConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("SWEEP_INTERVAL_SECS"));
    }

    #[test]
    fn test_zero_liveness_threshold_is_rejected() {
        let config = WorkerConfig {
            liveness_threshold: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("WORKER_LIVENESS_SECS"));
    }
}
