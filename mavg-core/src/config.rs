use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

pub const DEFAULT_WINDOW_SIZE: usize = 10;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub queue_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SinkConfig {
    /// Folder receiving `events_<timestamp>.json`; stdout when unset.
    #[serde(default)]
    pub output_folder: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: i32,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial: String, // e.g., "1s"
    #[serde(default = "default_backoff_max")]
    pub backoff_max: String,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_max_messages() -> i32 {
    1
}
fn default_wait_time_seconds() -> i32 {
    15
}
fn default_backoff_initial() -> String {
    "1s".into()
}
fn default_backoff_max() -> String {
    "30s".into()
}
fn default_dedup_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            wait_time_seconds: default_wait_time_seconds(),
            endpoint_url: None,
            backoff_initial: default_backoff_initial(),
            backoff_max: default_backoff_max(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_window_size")]
    pub window_size: i64,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_window_size() -> i64 {
    DEFAULT_WINDOW_SIZE as i64
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            source: SourceConfig::default(),
            sink: SinkConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// The single input a run reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    Queue(String),
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Window size to build the aggregator with. Values below 1 fall back to the default.
    pub fn normalized_window_size(&self) -> NonZeroUsize {
        match usize::try_from(self.window_size).ok().and_then(NonZeroUsize::new) {
            Some(n) => n,
            None => {
                warn!(
                    window_size = self.window_size,
                    "window size cannot be < 1, using default value of {}", DEFAULT_WINDOW_SIZE
                );
                NonZeroUsize::new(DEFAULT_WINDOW_SIZE).unwrap_or(NonZeroUsize::MIN)
            }
        }
    }

    /// Resolve the mutually exclusive input. Blank values count as unset.
    pub fn input(&self) -> Result<InputSource> {
        let file = self
            .source
            .input_file
            .as_ref()
            .map(|p| p.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty());
        let queue = self
            .source
            .queue_url
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        match (file, queue) {
            (Some(f), None) => Ok(InputSource::File(PathBuf::from(f))),
            (None, Some(q)) => Ok(InputSource::Queue(q)),
            (None, None) => Err(Error::Config(
                "must provide either input file or queue URL".into(),
            )),
            (Some(_), Some(_)) => Err(Error::Config(
                "cannot provide both input file and queue URL".into(),
            )),
        }
    }

    pub fn output_folder(&self) -> Option<PathBuf> {
        self.sink
            .output_folder
            .as_ref()
            .map(|p| p.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    pub fn validate(&self) -> Result<()> {
        self.input()?;
        if self.queue.max_messages < 1 || self.queue.max_messages > 10 {
            return Err(Error::Config(format!(
                "queue.max_messages must be within 1..=10, got {}",
                self.queue.max_messages
            )));
        }
        if !(0..=20).contains(&self.queue.wait_time_seconds) {
            return Err(Error::Config(format!(
                "queue.wait_time_seconds must be within 0..=20, got {}",
                self.queue.wait_time_seconds
            )));
        }
        let initial = parse_duration_ms(&self.queue.backoff_initial)?;
        let max = parse_duration_ms(&self.queue.backoff_max)?;
        if initial > max {
            return Err(Error::Config(format!(
                "queue.backoff_initial ({}) exceeds queue.backoff_max ({})",
                self.queue.backoff_initial, self.queue.backoff_max
            )));
        }
        Ok(())
    }
}

pub fn parse_duration_ms(s: &str) -> Result<u64> {
    // small parser for values like "10s", "500ms", "2m"
    let s = s.trim();
    let bad = |_| Error::Config(format!("invalid duration: {s:?}"));
    if let Some(num) = s.strip_suffix("ms") {
        return num.trim().parse::<u64>().map_err(bad);
    }
    if let Some(num) = s.strip_suffix('s') {
        return num.trim().parse::<u64>().map(|n| n * 1_000).map_err(bad);
    }
    if let Some(num) = s.strip_suffix('m') {
        return num.trim().parse::<u64>().map(|n| n * 60_000).map_err(bad);
    }
    if let Some(num) = s.strip_suffix('h') {
        return num.trim().parse::<u64>().map(|n| n * 3_600_000).map_err(bad);
    }
    // default assume seconds
    s.parse::<u64>().map(|n| n * 1_000).map_err(bad)
}
