//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Default hard size limit of one remote document (1 MiB).
pub const DEFAULT_DOCUMENT_LIMIT: usize = 1024 * 1024;

/// Bytes reserved in every chunk document for its non-payload fields.
pub const CHUNK_DOCUMENT_OVERHEAD: usize = 1024;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owner of the backup; also the backup document key.
    pub owner_id: String,
    /// Remote collection holding backup metadata documents.
    pub collection: String,
    /// Collection whose size is reported as `studentCount`.
    pub student_collection: String,
    /// Retry configuration for remote calls.
    pub retry: RetryConfig,
    /// Chunking configuration.
    pub chunk: ChunkConfig,
    /// Timeout applied to every individual remote call.
    pub request_timeout: Duration,
    /// Push an explicitly unencrypted envelope if sealing fails.
    pub allow_plaintext_fallback: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration for `owner_id`.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            collection: "backups".to_string(),
            student_collection: "students".to_string(),
            retry: RetryConfig::default(),
            chunk: ChunkConfig::default(),
            request_timeout: Duration::from_secs(30),
            allow_plaintext_fallback: false,
        }
    }

    /// Sets the remote collection.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the chunking configuration.
    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows the unencrypted last-resort push.
    #[must_use]
    pub fn with_plaintext_fallback(mut self, allow: bool) -> Self {
        self.allow_plaintext_fallback = allow;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// How large payloads are split across remote documents.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    /// Hard size limit of one remote document, in bytes.
    pub document_limit: usize,
    /// Fraction of `document_limit` above which a payload is chunked.
    pub chunk_threshold: f64,
    /// Payload bytes per chunk.
    pub chunk_size: usize,
    /// Maximum number of chunks per backup.
    pub max_chunks: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            document_limit: DEFAULT_DOCUMENT_LIMIT,
            chunk_threshold: 0.9,
            chunk_size: 900 * 1024,
            max_chunks: 64,
        }
    }
}

impl ChunkConfig {
    /// Creates the default chunking configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document limit.
    #[must_use]
    pub const fn with_document_limit(mut self, limit: usize) -> Self {
        self.document_limit = limit;
        self
    }

    /// Sets the chunking threshold as a fraction of the document limit.
    #[must_use]
    pub fn with_chunk_threshold(mut self, threshold: f64) -> Self {
        self.chunk_threshold = threshold;
        self
    }

    /// Sets the chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the maximum chunk count.
    #[must_use]
    pub const fn with_max_chunks(mut self, max: u32) -> Self {
        self.max_chunks = max;
        self
    }

    /// Payload size above which chunking kicks in.
    #[must_use]
    pub fn threshold_bytes(&self) -> usize {
        (self.document_limit as f64 * self.chunk_threshold.clamp(0.0, 1.0)) as usize
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% extra.
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Trigger timing for [`SyncScheduler`](crate::SyncScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period after the last data change before a sync fires.
    pub debounce: Duration,
    /// Interval of unconditional full cycles.
    pub periodic_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(8),
            periodic_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl SchedulerConfig {
    /// Creates the default scheduler configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the debounce period.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the periodic interval.
    #[must_use]
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("owner-1")
            .with_collection("schools")
            .with_request_timeout(Duration::from_secs(5))
            .with_plaintext_fallback(true);

        assert_eq!(config.owner_id, "owner-1");
        assert_eq!(config.collection, "schools");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.allow_plaintext_fallback);
    }

    #[test]
    fn chunk_defaults() {
        let config = ChunkConfig::default();
        assert_eq!(config.document_limit, 1_048_576);
        assert_eq!(config.threshold_bytes(), 943_718);
        assert!(config.chunk_size + CHUNK_DOCUMENT_OVERHEAD <= config.document_limit);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(4));
    }
}
