//! CLI argument parsing for wattrib

use crate::config::{AttributionConfig, SourcePaths, TimeBase};
use crate::error::ConfigError;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "wattrib")]
#[command(version)]
#[command(about = "Attribute package and DRAM power to a pinned workload", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attribute one measurement pass and rewrite its power table in place
    Run(RunArgs),
    /// Print the effective configuration as TOML
    CheckConfig(ConfigArgs),
}

/// Configuration layers: defaults, then `--config`, then flags/environment
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// TOML configuration file
    #[arg(long, value_name = "FILE", env = "WATTRIB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum age of a joined record (seconds)
    #[arg(long, value_name = "SECONDS", env = "WATTRIB_ALIGN_TOLERANCE_SEC")]
    pub align_tolerance_sec: Option<f64>,

    /// Live/stale classification window (seconds, diagnostics only)
    #[arg(long, value_name = "SECONDS", env = "WATTRIB_STALE_TOLERANCE_SEC")]
    pub stale_tolerance_sec: Option<f64>,

    /// Slack before an invariant counts as violated
    #[arg(long, value_name = "EPS", env = "WATTRIB_EPSILON")]
    pub epsilon: Option<f64>,

    #[arg(long, value_name = "SECONDS", env = "WATTRIB_POWER_INTERVAL_SEC")]
    pub power_interval_sec: Option<f64>,

    #[arg(long, value_name = "SECONDS", env = "WATTRIB_MBM_INTERVAL_SEC")]
    pub mbm_interval_sec: Option<f64>,

    #[arg(long, value_name = "SECONDS", env = "WATTRIB_CPU_INTERVAL_SEC")]
    pub cpu_interval_sec: Option<f64>,

    /// Frequency of a fully busy CPU (default: highest observed)
    #[arg(long, value_name = "MHZ", env = "WATTRIB_REFERENCE_MAX_MHZ")]
    pub reference_max_mhz: Option<f64>,

    /// Cores the workload is pinned to (e.g. 0 or 2,3)
    #[arg(long, value_name = "CPUS", value_delimiter = ',', env = "WATTRIB_WORKLOAD_CPUS")]
    pub workload_cpus: Vec<u32>,

    /// Leading pcm-memory rows to drop
    #[arg(long, value_name = "ROWS", env = "WATTRIB_MEM_WARMUP_ROWS")]
    pub mem_warmup_rows: Option<usize>,

    /// Clock used to join sources
    #[arg(long, value_enum, env = "WATTRIB_TIME_BASE")]
    pub time_base: Option<TimeBase>,

    /// Live-coverage ratio below which a source is reported
    #[arg(long, value_name = "RATIO", env = "WATTRIB_COVERAGE_WARN_RATIO")]
    pub coverage_warn_ratio: Option<f64>,
}

impl ConfigArgs {
    /// Build and validate the effective configuration
    pub fn resolve(&self) -> Result<AttributionConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => AttributionConfig::from_toml_file(path)?,
            None => AttributionConfig::default(),
        };

        let overrides = [
            (&mut config.align_tolerance_sec, self.align_tolerance_sec),
            (&mut config.stale_tolerance_sec, self.stale_tolerance_sec),
            (&mut config.epsilon, self.epsilon),
            (&mut config.power_interval_sec, self.power_interval_sec),
            (&mut config.mbm_interval_sec, self.mbm_interval_sec),
            (&mut config.cpu_interval_sec, self.cpu_interval_sec),
            (&mut config.coverage_warn_ratio, self.coverage_warn_ratio),
        ];
        for (slot, value) in overrides {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if self.reference_max_mhz.is_some() {
            config.reference_max_mhz = self.reference_max_mhz;
        }
        if !self.workload_cpus.is_empty() {
            config.workload_cpus = self.workload_cpus.clone();
        }
        if let Some(rows) = self.mem_warmup_rows {
            config.mem_warmup_rows = rows;
        }
        if let Some(time_base) = self.time_base {
            config.time_base = time_base;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Result prefix; derives <PREFIX>_pcm_power.csv, _pcm_memory_dram.csv,
    /// _turbostat.txt, _pqos.csv and _attrib.csv
    #[arg(long, value_name = "PREFIX", required_unless_present = "power")]
    pub prefix: Option<PathBuf>,

    /// pcm-power table (rewritten in place)
    #[arg(long, value_name = "FILE", conflicts_with = "prefix")]
    pub power: Option<PathBuf>,

    /// pcm-memory table
    #[arg(long, value_name = "FILE")]
    pub mem_bandwidth: Option<PathBuf>,

    /// turbostat log
    #[arg(long, value_name = "FILE")]
    pub cpu_util: Option<PathBuf>,

    /// pqos MBM table
    #[arg(long, value_name = "FILE")]
    pub mbm: Option<PathBuf>,

    /// Attribution table to write
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Also write the run report as JSON
    #[arg(long, value_name = "FILE")]
    pub report_json: Option<PathBuf>,
}

/// `<dir>/<tag>_pcm_power.csv` -> `<dir>/<tag>_attrib.csv`, otherwise
/// `<stem>_attrib.csv` next to the power table
pub fn default_attrib_path(power: &Path) -> PathBuf {
    let name = power
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tag = name
        .strip_suffix("_pcm_power.csv")
        .map(str::to_string)
        .unwrap_or_else(|| {
            power
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "power".to_string())
        });
    power.with_file_name(format!("{tag}_attrib.csv"))
}

impl RunArgs {
    /// Resolve input and output paths; explicit flags override the prefix
    pub fn paths(&self) -> Result<SourcePaths, ConfigError> {
        let mut paths = match (&self.prefix, &self.power) {
            (Some(prefix), _) => SourcePaths::from_prefix(prefix),
            (None, Some(power)) => SourcePaths {
                power: power.clone(),
                mem_bandwidth: None,
                cpu_util: None,
                mbm: None,
                attrib_out: default_attrib_path(power),
            },
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "either --prefix or --power is required".to_string(),
                ))
            }
        };

        if self.mem_bandwidth.is_some() {
            paths.mem_bandwidth = self.mem_bandwidth.clone();
        }
        if self.cpu_util.is_some() {
            paths.cpu_util = self.cpu_util.clone();
        }
        if self.mbm.is_some() {
            paths.mbm = self.mbm.clone();
        }
        if let Some(out) = &self.out {
            paths.attrib_out = out.clone();
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["wattrib", "run"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_run_with_prefix() {
        let args = run_args(&["--prefix", "/data/id_1"]);
        let paths = args.paths().unwrap();
        assert_eq!(paths.power, PathBuf::from("/data/id_1_pcm_power.csv"));
        assert_eq!(paths.attrib_out, PathBuf::from("/data/id_1_attrib.csv"));
        assert!(paths.cpu_util.is_some());
    }

    #[test]
    fn test_cli_run_with_explicit_files() {
        let args = run_args(&["--power", "/d/x_pcm_power.csv", "--mbm", "/d/q.csv"]);
        let paths = args.paths().unwrap();
        assert_eq!(paths.attrib_out, PathBuf::from("/d/x_attrib.csv"));
        assert_eq!(paths.mbm, Some(PathBuf::from("/d/q.csv")));
        assert_eq!(paths.mem_bandwidth, None);
    }

    #[test]
    fn test_cli_prefix_and_power_conflict() {
        let result =
            Cli::try_parse_from(["wattrib", "run", "--prefix", "a", "--power", "b.csv"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_run_requires_input() {
        assert!(Cli::try_parse_from(["wattrib", "run"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config_values() {
        let args = run_args(&[
            "--power",
            "p.csv",
            "--align-tolerance-sec",
            "0.25",
            "--workload-cpus",
            "2,3",
            "--time-base",
            "absolute",
        ]);
        let config = args.config.resolve().unwrap();
        assert_eq!(config.align_tolerance_sec, 0.25);
        assert_eq!(config.workload_cpus, vec![2, 3]);
        assert_eq!(config.time_base, TimeBase::Absolute);
        assert_eq!(config.stale_tolerance_sec, 1.0);
    }

    #[test]
    fn test_cli_invalid_override_rejected() {
        let args = run_args(&["--power", "p.csv", "--epsilon=-1"]);
        assert!(args.config.resolve().is_err());
    }

    #[test]
    fn test_cli_debug_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["wattrib", "--debug", "--quiet", "check-config"]).is_err());
    }

    #[test]
    fn test_default_attrib_path_for_other_names() {
        assert_eq!(
            default_attrib_path(Path::new("/tmp/power.csv")),
            PathBuf::from("/tmp/power_attrib.csv")
        );
    }
}
