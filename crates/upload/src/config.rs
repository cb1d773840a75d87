//! Transfer configuration.
//!
//! Values come from [`TransferConfig::default`], optionally overlaid by a
//! JSON file (durations in milliseconds, missing keys keep their defaults).

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chunkwise_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_MAX_RETRIES,
};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Delay before re-attempting a chunk after a retryable failure.
#[derive(Clone)]
pub enum RetryBackoff {
    /// Re-enqueue immediately.
    None,
    Fixed(Duration),
    /// `initial_delay * backoff_factor^(retry-1)`, capped at `max_delay`,
    /// optionally with ±25% jitter.
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter: bool,
    },
    /// Caller-supplied policy, given the 1-based retry number.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryBackoff {
    /// Returns the delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                backoff_factor,
                jitter,
            } => {
                let exp = retry.saturating_sub(1).min(63) as i32;
                let secs = initial_delay.as_secs_f64() * backoff_factor.powi(exp);
                let capped = secs.min(max_delay.as_secs_f64());
                if !jitter {
                    return Duration::from_secs_f64(capped.max(0.0));
                }
                let offset = (std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as f64
                    / 1_000_000_000.0)
                    * 2.0
                    - 1.0; // [-1.0, 1.0)
                Duration::from_secs_f64((capped + capped * 0.25 * offset).max(0.0))
            }
            Self::Custom(policy) => policy(retry),
        }
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl fmt::Debug for RetryBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Exponential {
                initial_delay,
                max_delay,
                backoff_factor,
                jitter,
            } => f
                .debug_struct("Exponential")
                .field("initial_delay", initial_delay)
                .field("max_delay", max_delay)
                .field("backoff_factor", backoff_factor)
                .field("jitter", jitter)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Tunables for one upload session.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes per chunk (the last chunk may be shorter).
    pub chunk_size: u64,
    /// Maximum chunk attempts in flight per session.
    pub concurrency_limit: usize,
    /// Re-attempts after the first try; a chunk is tried at most
    /// `1 + max_retries` times.
    pub max_retries: u32,
    pub retry_backoff: RetryBackoff,
    /// Minimum spacing between two dispatches. Zero disables throttling.
    pub inter_batch_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: RetryBackoff::default(),
            inter_batch_delay: Duration::ZERO,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfiguration(
                "chunk size must be at least 1 byte".into(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(UploadError::InvalidConfiguration(
                "concurrency limit must be at least 1".into(),
            ));
        }
        if let RetryBackoff::Exponential { backoff_factor, .. } = &self.retry_backoff {
            if !backoff_factor.is_finite() || *backoff_factor < 1.0 {
                return Err(UploadError::InvalidConfiguration(format!(
                    "backoff factor must be >= 1.0, got {backoff_factor}"
                )));
            }
        }
        Ok(())
    }

    /// Loads a JSON config file and validates the result.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, UploadError> {
        let file: TransferConfigFile = serde_json::from_str(raw)?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }
}

/// On-disk representation of [`TransferConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferConfigFile {
    pub chunk_size: u64,
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub retry_backoff: BackoffFile,
    pub inter_batch_delay_ms: u64,
}

impl Default for TransferConfigFile {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: BackoffFile::default(),
            inter_batch_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackoffFile {
    None,
    #[serde(rename_all = "camelCase")]
    Fixed { delay_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_factor: f64,
        #[serde(default = "default_jitter")]
        jitter: bool,
    },
}

fn default_jitter() -> bool {
    true
}

impl Default for BackoffFile {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl From<BackoffFile> for RetryBackoff {
    fn from(file: BackoffFile) -> Self {
        match file {
            BackoffFile::None => Self::None,
            BackoffFile::Fixed { delay_ms } => Self::Fixed(Duration::from_millis(delay_ms)),
            BackoffFile::Exponential {
                initial_delay_ms,
                max_delay_ms,
                backoff_factor,
                jitter,
            } => Self::Exponential {
                initial_delay: Duration::from_millis(initial_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                backoff_factor,
                jitter,
            },
        }
    }
}

impl From<TransferConfigFile> for TransferConfig {
    fn from(file: TransferConfigFile) -> Self {
        Self {
            chunk_size: file.chunk_size,
            concurrency_limit: file.concurrency_limit,
            max_retries: file.max_retries,
            retry_backoff: file.retry_backoff.into(),
            inter_batch_delay: Duration::from_millis(file.inter_batch_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 20 * 1024 * 1024);
        assert_eq!(config.concurrency_limit, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.inter_batch_delay, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let config = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidConfiguration(_))
        ));

        let config = TransferConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let backoff = RetryBackoff::Exponential {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter: false,
        };
        assert_eq!(backoff.delay_for_retry(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_retry(3), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_retry(10), Duration::from_secs(1));
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let backoff = RetryBackoff::default();
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 10.0, 10.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = backoff.delay_for_retry((i + 1) as u32).as_secs_f64();
            assert!(
                secs >= base * 0.74 && secs <= base * 1.26,
                "retry {}: {secs}s outside [{}, {}]",
                i + 1,
                base * 0.74,
                base * 1.26
            );
        }
    }

    #[test]
    fn custom_backoff_receives_retry_number() {
        let backoff = RetryBackoff::Custom(Arc::new(|retry: u32| {
            Duration::from_millis(retry as u64 * 7)
        }));
        assert_eq!(backoff.delay_for_retry(3), Duration::from_millis(21));
        assert_eq!(format!("{backoff:?}"), "Custom(..)");
    }

    #[test]
    fn from_json_overlays_defaults() {
        let config = TransferConfig::from_json(
            r#"{"chunkSize":1024,"retryBackoff":{"kind":"fixed","delayMs":40},"interBatchDelayMs":5}"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.concurrency_limit, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.inter_batch_delay, Duration::from_millis(5));
        assert_eq!(
            config.retry_backoff.delay_for_retry(2),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn from_json_validates() {
        let err = TransferConfig::from_json(r#"{"concurrencyLimit":0}"#).unwrap_err();
        assert!(matches!(err, UploadError::InvalidConfiguration(_)));

        let err = TransferConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, UploadError::Json(_)));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.json");
        tokio::fs::write(&path, r#"{"maxRetries":7,"retryBackoff":{"kind":"none"}}"#)
            .await
            .unwrap();

        let config = TransferConfig::load(&path).await.unwrap();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retry_backoff.delay_for_retry(1), Duration::ZERO);

        let missing = TransferConfig::load(dir.path().join("absent.json")).await;
        assert!(matches!(missing, Err(UploadError::Io(_))));
    }
}
