//! Store configuration.
//!
//! Defines where containers and uploaded logs live, the optional remote
//! mirrors, and the tuning knobs for the import pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::UtcOffset;

use crate::{Error, Result};

pub const DEFAULT_CACHE_ROWS: usize = 1000;
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 4;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;
/// The logger clock runs on UTC-05:00.
pub const DEFAULT_LOGGER_OFFSET_MINUTES: i32 = -300;

/// Configuration for a container store and its import pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding finished containers.
    /// Default: `data/runs`
    pub data_dir: PathBuf,

    /// Directory holding uploaded raw logs, named `{run_id}.csv`.
    /// Default: `data/uploads`
    pub upload_dir: PathBuf,

    /// Remote mirror for containers. Consulted when a container is missing
    /// locally, and pushed to after every import.
    pub data_remote: Option<PathBuf>,

    /// Remote mirror for uploaded raw logs.
    pub upload_remote: Option<PathBuf>,

    /// Schema catalog (`.dbc` or `.json`).
    pub schema_path: Option<PathBuf>,

    /// Fixed offset of the logger clock from UTC, in minutes.
    /// Default: -300
    pub logger_utc_offset_minutes: i32,

    /// Rows held by the writer's in-memory window; also the on-disk chunk height.
    /// Default: 1000
    pub cache_rows: usize,

    /// Deflate level applied to the `data` and `timestamps` datasets (1-9).
    /// Default: 4
    pub compression_level: u8,

    /// Messages processed between progress reports.
    /// Default: 1000
    pub progress_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data").join("runs"),
            upload_dir: PathBuf::from("data").join("uploads"),
            data_remote: None,
            upload_remote: None,
            schema_path: None,
            logger_utc_offset_minutes: DEFAULT_LOGGER_OFFSET_MINUTES,
            cache_rows: DEFAULT_CACHE_ROWS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl StoreConfig {
    /// Load a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: StoreConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `DATA_FOLDER`, `UPLOAD_FOLDER`, `DATA_BUCKET`,
    /// `UPLOAD_BUCKET` and `DBC` from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var_os(key).map(PathBuf::from));
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<PathBuf>) {
        if let Some(dir) = lookup("DATA_FOLDER") {
            self.data_dir = dir;
        }
        if let Some(dir) = lookup("UPLOAD_FOLDER") {
            self.upload_dir = dir;
        }
        if let Some(remote) = lookup("DATA_BUCKET") {
            self.data_remote = Some(remote);
        }
        if let Some(remote) = lookup("UPLOAD_BUCKET") {
            self.upload_remote = Some(remote);
        }
        if let Some(schema) = lookup("DBC") {
            self.schema_path = Some(schema);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_rows == 0 {
            return Err(Error::Format("cache_rows must be > 0".to_string()));
        }
        if !(1..=9).contains(&self.compression_level) {
            return Err(Error::Format(format!(
                "compression_level {} outside 1..=9",
                self.compression_level
            )));
        }
        self.logger_offset()?;
        Ok(())
    }

    pub fn logger_offset(&self) -> Result<UtcOffset> {
        let minutes = self.logger_utc_offset_minutes;
        let out_of_range =
            || Error::Format(format!("logger offset {minutes} minutes out of range"));
        if minutes.abs() > 18 * 60 {
            return Err(out_of_range());
        }
        UtcOffset::from_whole_seconds(minutes * 60).map_err(|_| out_of_range())
    }
}
