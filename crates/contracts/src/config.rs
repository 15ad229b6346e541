//! GatewayConfig - Config Loader output
//!
//! Every section has defaults so an empty file yields a runnable gateway.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub framing: FramingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub tp: TpConfig,

    #[serde(default)]
    #[validate(nested)]
    pub backpressure: BackpressureConfig,

    #[serde(default)]
    #[validate(nested)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    #[validate(nested)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub dictionaries: DictionariesConfig,

    /// Output routing
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

/// TCP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    pub port: u16,

    /// Per-read timeout; a timeout only re-arms the read
    #[validate(range(min = 1))]
    pub read_timeout_ms: u64,

    /// Silence after which a connection is closed
    #[validate(range(min = 1))]
    pub idle_timeout_ms: u64,

    #[validate(range(min = 1))]
    pub read_buffer_size: usize,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5221,
            read_timeout_ms: 5_000,
            idle_timeout_ms: 900_000,
            read_buffer_size: 4096,
        }
    }
}

/// Stream framing limits
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FramingConfig {
    /// Largest frame accepted, markers included
    #[validate(range(min = 8))]
    pub max_frame_size: usize,

    /// Largest unresolved buffer kept between reads
    #[validate(range(min = 8))]
    pub max_buffer_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 4096,
            max_buffer_size: 16 * 1024,
        }
    }
}

/// J1939 transport protocol reassembly
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TpConfig {
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    #[validate(range(min = 1))]
    pub max_sessions: usize,

    #[validate(range(min = 1))]
    pub sweep_interval_ms: u64,
}

impl TpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for TpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            max_sessions: 1000,
            sweep_interval_ms: 10_000,
        }
    }
}

/// Bounded stream queues between ingestion and batch writers
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackpressureConfig {
    #[validate(range(min = 1))]
    pub max_queue_size: usize,

    /// Fraction of capacity at which low priority traffic is shed
    #[validate(range(min = 0.0, max = 1.0))]
    pub drop_threshold_ratio: f64,

    /// How long a high priority put may wait on a full queue
    pub high_priority_wait_ms: u64,

    /// Force persist-only mode regardless of load
    #[serde(default)]
    pub persist_only: bool,
}

impl BackpressureConfig {
    pub fn high_priority_wait(&self) -> Duration {
        Duration::from_millis(self.high_priority_wait_ms)
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            drop_threshold_ratio: 0.8,
            high_priority_wait_ms: 100,
            persist_only: false,
        }
    }
}

/// Per-device frame rate limit
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    #[validate(range(min = 1))]
    pub max_frames_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_frames_per_minute: 1000,
        }
    }
}

/// Batch writer settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BatchConfig {
    #[validate(range(min = 1))]
    pub batch_size: usize,

    #[validate(range(min = 1))]
    pub flush_interval_ms: u64,

    #[validate(range(min = 1, max = 64))]
    pub workers_per_stream: usize,
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 1_000,
            workers_per_stream: 1,
        }
    }
}

/// Decoding switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Emit `can_raw` records
    pub can_raw_enable: bool,

    /// Run the signal decoder
    pub can_decode_enable: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            can_raw_enable: true,
            can_decode_enable: true,
        }
    }
}

/// Dictionary files; built-in tables are used for unset slots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictionariesConfig {
    #[serde(default)]
    pub j1939: Option<PathBuf>,

    #[serde(default)]
    pub obd2: Option<PathBuf>,

    /// Brand packs in match order
    #[serde(default)]
    pub brand_packs: Vec<BrandPackConfig>,
}

/// Named brand pack file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandPackConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink name
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Batches the sink worker may buffer
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log summary through tracing
    Log,
    /// JSON lines per stream
    File,
}
