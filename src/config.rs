//! Application-level configuration loading: scoring, fallback, flow and channel tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scoring pipeline tuning.
    pub scoring: ScoringConfig,
    /// Durable-store fallback tuning.
    pub fallback: FallbackConfig,
    /// Answer buffer tuning.
    pub answer_buffer: AnswerBufferConfig,
    /// FFI bookkeeping.
    pub ffi: FfiConfig,
    /// Session flow timings.
    pub flow: FlowConfig,
    /// Broadcast channel sizing.
    pub channels: ChannelsConfig,
    /// System metrics poller.
    pub metrics: MetricsConfig,
    /// Optional JSON file of quizzes upserted at startup.
    pub seed_quizzes_path: Option<PathBuf>,
}

/// What to do with an answer whose question is no longer open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateSubmissionPolicy {
    /// Score whenever the notification is processed.
    #[default]
    Accept,
    /// Drop answers for a question that is no longer active.
    Reject,
}

/// Scoring pipeline and persistence batching.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Records per durable batch flush.
    pub batch_size: usize,
    /// Maximum time between two batch flushes.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub flush_interval: Duration,
    /// Late-answer handling.
    pub late_submissions: LateSubmissionPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(1_000),
            late_submissions: LateSubmissionPolicy::Accept,
        }
    }
}

/// Durable-store fallback guard.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Lifetime of the "durable unavailable" flag.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub unavailable_ttl: Duration,
    /// Lifetime of fallback document snapshots.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub snapshot_ttl: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            unavailable_ttl: Duration::from_secs(300),
            snapshot_ttl: Duration::from_secs(3_600),
        }
    }
}

/// Answer buffer lifetimes.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnswerBufferConfig {
    /// Extra lifetime added to the question time limit.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub margin: Duration,
    /// Scan the list-shaped legacy queue on a hash miss.
    pub legacy_queue_scan: bool,
}

impl Default for AnswerBufferConfig {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(60),
            legacy_queue_scan: false,
        }
    }
}

/// Fastest-finger-first bookkeeping.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FfiConfig {
    /// Lifetime of per-question submission order sets.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub order_ttl: Duration,
}

impl Default for FfiConfig {
    fn default() -> Self {
        Self {
            order_ttl: Duration::from_secs(3_600),
        }
    }
}

/// Session flow timing.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Pause between reveal and the next question when auto-advancing.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reveal_delay: Duration,
    /// Upper bound for a session state transition.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transition_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            reveal_delay: Duration::from_millis(5_000),
            transition_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Broadcast channel sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Events buffered per subscriber before it lags.
    pub capacity: usize,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// System metrics poller.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Period of `system_metrics` events.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        batch_size = config.scoring.batch_size,
                        late_submissions = ?config.scoring.late_submissions,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"scoring": {"late_submissions": "reject", "flush_interval": 250},
                "fallback": {"unavailable_ttl": 60}}"#,
        )
        .unwrap();

        assert_eq!(config.scoring.late_submissions, LateSubmissionPolicy::Reject);
        assert_eq!(config.scoring.flush_interval, Duration::from_millis(250));
        assert_eq!(config.scoring.batch_size, 100);
        assert_eq!(config.fallback.unavailable_ttl, Duration::from_secs(60));
        assert_eq!(config.fallback.snapshot_ttl, Duration::from_secs(3_600));
        assert!(!config.answer_buffer.legacy_queue_scan);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.flow.reveal_delay, Duration::from_secs(5));
        assert_eq!(config.channels.capacity, 64);
        assert_eq!(config.ffi.order_ttl, Duration::from_secs(3_600));
        assert!(config.seed_quizzes_path.is_none());
    }
}
