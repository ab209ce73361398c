//! Runtime tunables for the stream, materializer and query layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_STREAM_PREFIX: &str = "poker:events:";
pub const DEFAULT_MATERIALIZER_GROUP: &str = "hand-materializer";
pub const DEFAULT_MATERIALIZER_CONSUMER: &str = "hand-materializer-1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub stream: StreamConfig,
    pub materializer: MaterializerConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub prefix: String,
    pub block_ms: u64,
    pub batch_size: usize,
    pub retry_delay_ms: u64,
    /// Events buffered between a subscription reader and its consumer.
    pub sink_capacity: usize,
}

impl StreamConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_STREAM_PREFIX.to_string(),
            block_ms: 5_000,
            batch_size: 10,
            retry_delay_ms: 1_000,
            sink_capacity: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    pub group: String,
    pub consumer: String,
    pub block_ms: u64,
    pub batch_size: usize,
    pub retry_delay_ms: u64,
    /// Upper bound on events loaded when rebuilding one hand.
    pub hand_event_limit: u64,
}

impl MaterializerConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MATERIALIZER_GROUP.to_string(),
            consumer: DEFAULT_MATERIALIZER_CONSUMER.to_string(),
            block_ms: 5_000,
            batch_size: 1,
            retry_delay_ms: 1_000,
            hand_event_limit: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl QueryConfig {
    /// Clamp a caller supplied page size into `1..=max_limit`.
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"stream":{"prefix":"x:"},"query":{"max_limit":10}}"#)
                .unwrap();
        assert_eq!(config.stream.prefix, "x:");
        assert_eq!(config.stream.sink_capacity, 1);
        assert_eq!(config.materializer.group, "hand-materializer");
        assert_eq!(config.query.default_limit, 50);
        assert_eq!(config.query.page_size(Some(99)), 10);
        assert_eq!(config.query.page_size(Some(0)), 1);
    }
}
