use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::merger::ConflictPolicy;
use super::metadata::{MetaValue, Metadata};
use super::position::{Instrument, WaferGrid};

/// Structure representing a compilation job. Contains the container path, the sample
/// description and the raw files of each instrument.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub container_path: PathBuf,
    /// Only used when the container does not exist yet
    #[serde(default)]
    pub sample: Metadata,
    #[serde(default)]
    pub policy: ConflictPolicy,
    #[serde(default = "default_write_reports")]
    pub write_reports: bool,
    /// Geometry of EDX mappings, used to store the wafer position of each scan
    #[serde(default)]
    pub grid: WaferGrid,
    /// Files are compiled in the order listed
    #[serde(default)]
    pub instruments: BTreeMap<Instrument, Vec<PathBuf>>,
}

fn default_write_reports() -> bool {
    true
}

impl Default for Config {
    /// Generate a template Config. The container path is invalid and every instrument
    /// has an empty file list.
    fn default() -> Self {
        let mut sample = Metadata::new();
        sample.insert(String::from("sample_name"), MetaValue::from(""));
        let instruments = [Instrument::Edx, Instrument::Xrd, Instrument::Moke]
            .into_iter()
            .map(|i| (i, vec![]))
            .collect();
        Self {
            container_path: PathBuf::from("None"),
            sample,
            policy: ConflictPolicy::Skip,
            write_reports: default_write_reports(),
            grid: WaferGrid::default(),
            instruments,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check that the config names a container
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_path.as_os_str().is_empty() || self.container_path == Path::new("None")
        {
            return Err(ConfigError::NoContainerPath);
        }
        Ok(())
    }

    pub fn container_exists(&self) -> bool {
        self.container_path.exists()
    }

    /// Get the path of the run report for an instrument, next to the container
    pub fn get_report_path(&self, instrument: &Instrument) -> PathBuf {
        let stem = self
            .container_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = self.container_path.parent().unwrap_or(Path::new(""));
        parent.join(format!("{stem}_{}_report.yml", instrument.name()))
    }

    pub fn total_files(&self) -> usize {
        self.instruments.values().map(|files| files.len()).sum()
    }
}
