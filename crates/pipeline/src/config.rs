use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use genflow_core::error::GenerationError;
use genflow_core::health::ContentPolicyScoring;

use crate::poller::PollSchedule;

/// Default proxy origin.
pub const DEFAULT_PROXY_URL: &str = "http://localhost:3001";

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults suitable for a desktop install talking to the
/// bundled proxy on localhost.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Base URL of the local proxy fronting every provider.
    pub proxy_url: String,
    pub poll: PollSchedule,
    /// Consecutive transport errors tolerated while polling one job.
    pub poll_error_tolerance: u32,
    /// Task-group worker-pool size (at least 1).
    pub group_concurrency: usize,
    pub content_policy_scoring: ContentPolicyScoring,
    /// Try the next candidate model when a submission fails.
    pub fallback_on_submit_error: bool,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// JSON state file; `None` keeps state in memory only.
    pub state_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            poll: PollSchedule::default(),
            poll_error_tolerance: 3,
            group_concurrency: 3,
            content_policy_scoring: ContentPolicyScoring::default(),
            fallback_on_submit_error: false,
            request_timeout: Duration::from_secs(60),
            state_file: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default                 |
    /// |------------------------------------|-------------------------|
    /// | `GENFLOW_PROXY_URL`                | `http://localhost:3001` |
    /// | `GENFLOW_POLL_INTERVAL_MS`         | `3000`                  |
    /// | `GENFLOW_POLL_MAX_INTERVAL_MS`     | `15000`                 |
    /// | `GENFLOW_POLL_BACKOFF`             | `1.5`                   |
    /// | `GENFLOW_POLL_ERROR_TOLERANCE`     | `3`                     |
    /// | `GENFLOW_GROUP_CONCURRENCY`        | `3`                     |
    /// | `GENFLOW_CONTENT_POLICY_SCORING`   | `ignore`                |
    /// | `GENFLOW_FALLBACK_ON_SUBMIT_ERROR` | `false`                 |
    /// | `GENFLOW_REQUEST_TIMEOUT_SECS`     | `60`                    |
    /// | `GENFLOW_STATE_FILE`               | unset (in-memory)       |
    pub fn from_env() -> Result<Self, GenerationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GenerationError> {
        let defaults = Self::default();

        let proxy_url = lookup("GENFLOW_PROXY_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.proxy_url);
        if !(proxy_url.starts_with("http://") || proxy_url.starts_with("https://")) {
            return Err(invalid("GENFLOW_PROXY_URL", "must be an http(s) URL"));
        }

        let initial_ms: u64 = parse_var(&lookup, "GENFLOW_POLL_INTERVAL_MS", 3_000)?;
        let max_ms: u64 = parse_var(&lookup, "GENFLOW_POLL_MAX_INTERVAL_MS", 15_000)?;
        let multiplier: f64 = parse_var(&lookup, "GENFLOW_POLL_BACKOFF", 1.5)?;
        if initial_ms == 0 {
            return Err(invalid("GENFLOW_POLL_INTERVAL_MS", "must be positive"));
        }
        if max_ms < initial_ms {
            return Err(invalid(
                "GENFLOW_POLL_MAX_INTERVAL_MS",
                "must not be below GENFLOW_POLL_INTERVAL_MS",
            ));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(invalid("GENFLOW_POLL_BACKOFF", "must be a number >= 1.0"));
        }

        let group_concurrency: usize = parse_var(&lookup, "GENFLOW_GROUP_CONCURRENCY", 3)?;
        if group_concurrency == 0 {
            return Err(invalid("GENFLOW_GROUP_CONCURRENCY", "must be at least 1"));
        }

        let content_policy_scoring = match lookup("GENFLOW_CONTENT_POLICY_SCORING") {
            Some(raw) => ContentPolicyScoring::parse(&raw)
                .map_err(|e| invalid("GENFLOW_CONTENT_POLICY_SCORING", &e.to_string()))?,
            None => defaults.content_policy_scoring,
        };

        let request_timeout_secs: u64 = parse_var(&lookup, "GENFLOW_REQUEST_TIMEOUT_SECS", 60)?;
        if request_timeout_secs == 0 {
            return Err(invalid("GENFLOW_REQUEST_TIMEOUT_SECS", "must be positive"));
        }

        Ok(Self {
            proxy_url,
            poll: PollSchedule {
                initial_interval: Duration::from_millis(initial_ms),
                max_interval: Duration::from_millis(max_ms),
                multiplier,
            },
            poll_error_tolerance: parse_var(&lookup, "GENFLOW_POLL_ERROR_TOLERANCE", 3)?,
            group_concurrency,
            content_policy_scoring,
            fallback_on_submit_error: parse_var(&lookup, "GENFLOW_FALLBACK_ON_SUBMIT_ERROR", false)?,
            request_timeout: Duration::from_secs(request_timeout_secs),
            state_file: lookup("GENFLOW_STATE_FILE")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, GenerationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, &e.to_string())),
        _ => Ok(default),
    }
}

fn invalid(name: &str, reason: &str) -> GenerationError {
    GenerationError::Configuration(format!("{name} is invalid: {reason}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, GenerationError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(load(&[]).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("GENFLOW_PROXY_URL", "http://127.0.0.1:9000/"),
            ("GENFLOW_POLL_INTERVAL_MS", "500"),
            ("GENFLOW_POLL_MAX_INTERVAL_MS", "500"),
            ("GENFLOW_POLL_BACKOFF", "1"),
            ("GENFLOW_GROUP_CONCURRENCY", "8"),
            ("GENFLOW_CONTENT_POLICY_SCORING", "count"),
            ("GENFLOW_FALLBACK_ON_SUBMIT_ERROR", "true"),
            ("GENFLOW_STATE_FILE", "/tmp/genflow.json"),
        ])
        .unwrap();
        assert_eq!(config.proxy_url, "http://127.0.0.1:9000/");
        assert_eq!(config.poll.initial_interval, Duration::from_millis(500));
        assert_eq!(config.poll.multiplier, 1.0);
        assert_eq!(config.group_concurrency, 8);
        assert_eq!(config.content_policy_scoring, ContentPolicyScoring::Count);
        assert!(config.fallback_on_submit_error);
        assert_eq!(config.state_file, Some(PathBuf::from("/tmp/genflow.json")));
    }

    #[test]
    fn non_numeric_value_names_the_variable() {
        let err = load(&[("GENFLOW_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert_matches!(err, GenerationError::Configuration(ref msg) if msg.contains("GENFLOW_POLL_INTERVAL_MS"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        assert_matches!(
            load(&[("GENFLOW_GROUP_CONCURRENCY", "0")]),
            Err(GenerationError::Configuration(_))
        );
    }

    #[test]
    fn shrinking_backoff_rejected() {
        assert_matches!(
            load(&[("GENFLOW_POLL_BACKOFF", "0.5")]),
            Err(GenerationError::Configuration(_))
        );
    }

    #[test]
    fn max_interval_below_initial_rejected() {
        assert_matches!(
            load(&[
                ("GENFLOW_POLL_INTERVAL_MS", "5000"),
                ("GENFLOW_POLL_MAX_INTERVAL_MS", "1000"),
            ]),
            Err(GenerationError::Configuration(_))
        );
    }

    #[test]
    fn unknown_scoring_policy_rejected() {
        assert_matches!(
            load(&[("GENFLOW_CONTENT_POLICY_SCORING", "sometimes")]),
            Err(GenerationError::Configuration(_))
        );
    }
}
