use crate::queue::DEFAULT_CAPACITY;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("capacity must be at least 1")]
    ZeroCapacity,
    #[error("poll timeout must be between 1ms and {max}ms, got {got}ms")]
    PollTimeout { got: u128, max: u128 },
}

/// What the poller does with a byte that arrives while the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Reject the incoming byte.
    #[default]
    DropNewest,
    /// Evict the oldest queued byte to make room.
    DropOldest,
}

/// How the consumer loop waits when the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WaitStrategy {
    /// Yield and re-poll immediately. Lowest latency, burns a core.
    #[default]
    Spin,
    /// Sleep on the queue's condition variable for up to one poll interval.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub capacity: usize,
    pub poll_timeout: Duration,
    pub overflow: OverflowPolicy,
    pub wait: WaitStrategy,
    /// Log every dropped event at `warn` instead of only counting it.
    pub report_drops: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            overflow: OverflowPolicy::default(),
            wait: WaitStrategy::default(),
            report_drops: false,
        }
    }
}

impl CaptureConfig {
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let max = i32::MAX as u128;
        let got = self.poll_timeout.as_millis();
        if got == 0 || got > max {
            return Err(ConfigError::PollTimeout { got, max });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.config.poll_timeout = poll_timeout;
        self
    }

    pub fn poll_timeout_ms(self, ms: u64) -> Self {
        self.poll_timeout(Duration::from_millis(ms))
    }

    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.config.overflow = overflow;
        self
    }

    pub fn wait(mut self, wait: WaitStrategy) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn report_drops(mut self, report_drops: bool) -> Self {
        self.config.report_drops = report_drops;
        self
    }

    pub fn build(self) -> Result<CaptureConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
