//! Configuration for an attribution run
//!
//! One explicit value object, built once (defaults, then an optional TOML
//! file, then flags/environment) and passed by reference into every stage.

use crate::error::ConfigError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How timestamps of different sources are put on one clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TimeBase {
    /// Rebase every source to its own first record. The measurement passes
    /// run one after another, so only elapsed time is comparable.
    #[default]
    Elapsed,
    /// Join on raw POSIX seconds
    Absolute,
}

/// Tunables shared by the loader, aligner and engine
///
/// # Example
/// ```
/// use wattrib::config::AttributionConfig;
///
/// let config = AttributionConfig::default();
/// assert_eq!(config.align_tolerance_sec, 0.40);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Maximum age of a same-or-earlier record joined onto an anchor sample
    pub align_tolerance_sec: f64,

    /// Looser window used only to classify a source as live or stale in logs
    pub stale_tolerance_sec: f64,

    /// Slack allowed before an invariant counts as violated
    pub epsilon: f64,

    /// pcm-power sampling interval; rows with unreadable Date/Time get
    /// `previous + interval`
    pub power_interval_sec: f64,

    /// pqos sampling interval (diagnostic only)
    pub mbm_interval_sec: f64,

    /// turbostat interval; used when a block has no time-of-day column
    pub cpu_interval_sec: f64,

    /// Frequency that counts as a fully busy CPU. Defaults to the highest
    /// busy frequency seen in the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_max_mhz: Option<f64>,

    /// Cores the workload is pinned to
    pub workload_cpus: Vec<u32>,

    /// Leading pcm-memory rows discarded as counter warm-up
    pub mem_warmup_rows: usize,

    pub time_base: TimeBase,

    /// Live-coverage ratio below which a source gets a warning
    pub coverage_warn_ratio: f64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            align_tolerance_sec: 0.40,
            stale_tolerance_sec: 1.0,
            epsilon: 1e-9,
            power_interval_sec: 0.5,
            mbm_interval_sec: 0.5,
            cpu_interval_sec: 0.5,
            reference_max_mhz: None,
            workload_cpus: vec![0],
            mem_warmup_rows: 2,
            time_base: TimeBase::Elapsed,
            coverage_warn_ratio: 0.95,
        }
    }
}

impl AttributionConfig {
    /// Load a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// First workload CPU, used to pick the turbostat row
    pub fn workload_cpu(&self) -> u32 {
        self.workload_cpus.first().copied().unwrap_or(0)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("align_tolerance_sec", self.align_tolerance_sec),
            ("stale_tolerance_sec", self.stale_tolerance_sec),
            ("power_interval_sec", self.power_interval_sec),
            ("mbm_interval_sec", self.mbm_interval_sec),
            ("cpu_interval_sec", self.cpu_interval_sec),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }

        if self.stale_tolerance_sec < self.align_tolerance_sec {
            return Err(ConfigError::Invalid(format!(
                "stale_tolerance_sec ({}) must not be tighter than align_tolerance_sec ({})",
                self.stale_tolerance_sec, self.align_tolerance_sec
            )));
        }

        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "epsilon must be non-negative, got {}",
                self.epsilon
            )));
        }

        if let Some(mhz) = self.reference_max_mhz {
            if !mhz.is_finite() || mhz <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "reference_max_mhz must be positive, got {mhz}"
                )));
            }
        }

        if self.workload_cpus.is_empty() {
            return Err(ConfigError::Invalid(
                "workload_cpus must name at least one core".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.coverage_warn_ratio) {
            return Err(ConfigError::Invalid(format!(
                "coverage_warn_ratio must be in [0, 1], got {}",
                self.coverage_warn_ratio
            )));
        }

        Ok(())
    }
}

/// Input and output files of one measurement pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePaths {
    /// pcm-power table; rewritten in place
    pub power: PathBuf,
    pub mem_bandwidth: Option<PathBuf>,
    pub cpu_util: Option<PathBuf>,
    pub mbm: Option<PathBuf>,
    /// Per-sample attribution table
    pub attrib_out: PathBuf,
}

impl SourcePaths {
    /// Derive the conventional file names from a result prefix such as
    /// `results/id_1`
    pub fn from_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = prefix.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            power: with_suffix("_pcm_power.csv"),
            mem_bandwidth: Some(with_suffix("_pcm_memory_dram.csv")),
            cpu_util: Some(with_suffix("_turbostat.txt")),
            mbm: Some(with_suffix("_pqos.csv")),
            attrib_out: with_suffix("_attrib.csv"),
        }
    }
}
