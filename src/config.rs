//! Runtime configuration

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Network frames per second.
    pub tick_rate_hz: u32,
    /// Frames between sending an input and it taking effect.
    pub input_delay_frames: u32,
    /// Players broadcast a snapshot every this many frames.
    pub snapshot_interval: u32,
    /// Frames of history kept for rollback. 0 keeps the whole match.
    pub max_rollback_frames: u32,
    #[serde(with = "millis")]
    pub ping_interval: Duration,
    #[serde(with = "millis")]
    pub ping_report_interval: Duration,
    /// Peers not heard from for this long are shown as offline.
    #[serde(with = "millis")]
    pub offline_timeout: Duration,
    /// Capacity of the UI event channel.
    pub event_buffer: usize,
    pub display_name: String,
    /// Where iroh keeps keys and documents. A temp dir if unset.
    pub store_path: Option<PathBuf>,
    /// `tracing` filter directive used by binaries.
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        let ping_report_interval = Duration::from_millis(4000);
        Self {
            tick_rate_hz: 30,
            input_delay_frames: 4,
            snapshot_interval: 30,
            max_rollback_frames: 300,
            ping_interval: Duration::from_millis(800),
            ping_report_interval,
            offline_timeout: ping_report_interval * 3,
            event_buffer: 64,
            display_name: "Anonymous".to_string(),
            store_path: None,
            log: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SKIRMISH_*` environment variables.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = parse_var("SKIRMISH_TICK_RATE")? {
            self.tick_rate_hz = v;
        }
        if let Some(v) = parse_var("SKIRMISH_INPUT_DELAY")? {
            self.input_delay_frames = v;
        }
        if let Some(v) = parse_var("SKIRMISH_SNAPSHOT_INTERVAL")? {
            self.snapshot_interval = v;
        }
        if let Some(v) = parse_var("SKIRMISH_MAX_ROLLBACK")? {
            self.max_rollback_frames = v;
        }
        if let Ok(name) = env::var("SKIRMISH_NAME") {
            self.display_name = name;
        }
        if let Ok(log) = env::var("SKIRMISH_LOG") {
            self.log = log;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid("tick_rate_hz must be at least 1"));
        }
        if self.snapshot_interval == 0 {
            return Err(ConfigError::Invalid("snapshot_interval must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1"));
        }
        if self.max_rollback_frames != 0 && self.max_rollback_frames <= self.input_delay_frames {
            return Err(ConfigError::Invalid(
                "max_rollback_frames must be larger than input_delay_frames",
            ));
        }
        Ok(())
    }

    /// Wall clock time of one network frame.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadVar { name, value }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {name} has an invalid value '{value}'")]
    BadVar { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
