use super::sanity::{enforce, RawShares};
use crate::config::AttributionConfig;
use crate::error::SanityWarning;
use crate::sample::{AlignedSample, AttributedSample, Field};
use serde::Serialize;

/// Inputs of one sample after fallback mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionInputs {
    pub pkg_watts: f64,
    pub dram_watts: f64,
    pub cpu_share: f64,
    /// Workload group bandwidth (W)
    pub workload_mbps: f64,
    /// All-cores MBM bandwidth (A)
    pub allcores_mbps: f64,
    /// System-wide memory-controller bandwidth (S); NaN when unavailable
    pub system_mbps: f64,
}

/// Intermediate and final values of the attribution formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribution {
    pub total_mbps: f64,
    pub system_mbps: f64,
    pub gray_mbps: f64,
    /// `W / A` before clamping, 0 when A is (near) zero
    pub mbm_share_raw: f64,
    pub mbm_share: f64,
    pub attrib_bw_mbps: f64,
    pub non_dram_watts: f64,
    pub pkg_attr_watts: f64,
    pub dram_attr_watts: f64,
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Attribute one sample
///
/// # Example
/// ```
/// use wattrib::attribution::{attribute, AttributionInputs};
///
/// let inputs = AttributionInputs {
///     pkg_watts: 40.0,
///     dram_watts: 8.0,
///     cpu_share: 0.5,
///     workload_mbps: 100.0,
///     allcores_mbps: 400.0,
///     system_mbps: 500.0,
/// };
/// let out = attribute(&inputs, 1e-9);
/// assert!((out.dram_attr_watts - 2.0).abs() < 1e-12);
/// assert!((out.pkg_attr_watts - 16.0).abs() < 1e-12);
/// ```
pub fn attribute(inputs: &AttributionInputs, eps: f64) -> Attribution {
    let workload = inputs.workload_mbps.max(0.0);
    let total_mbps = inputs.allcores_mbps.max(0.0);
    let system_mbps = if inputs.system_mbps.is_finite() {
        inputs.system_mbps.max(0.0)
    } else {
        total_mbps
    };
    let gray_mbps = (system_mbps - total_mbps).max(0.0);

    let mbm_share_raw = if total_mbps > eps {
        workload / total_mbps
    } else {
        0.0
    };
    let mbm_share = clamp01(mbm_share_raw);
    let attrib_bw_mbps = workload + mbm_share * gray_mbps;

    let dram = inputs.dram_watts;
    let dram_attr = if system_mbps > eps {
        dram * (attrib_bw_mbps / system_mbps)
    } else {
        dram * mbm_share
    };
    let dram_attr_watts = dram_attr.clamp(0.0, dram.max(0.0));

    let non_dram_watts = (inputs.pkg_watts - dram).max(0.0);
    let pkg_attr_watts = (non_dram_watts * clamp01(inputs.cpu_share)).clamp(0.0, non_dram_watts);

    Attribution {
        total_mbps,
        system_mbps,
        gray_mbps,
        mbm_share_raw,
        mbm_share,
        attrib_bw_mbps,
        non_dram_watts,
        pkg_attr_watts,
        dram_attr_watts,
    }
}

/// How many samples used the fallback value of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackReport {
    pub field: Field,
    pub samples: usize,
}

/// Engine output
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionOutcome {
    pub samples: Vec<AttributedSample>,
    pub warnings: Vec<SanityWarning>,
    pub fallbacks: Vec<FallbackReport>,
    /// Mean-level bound violations (logged, never clamped)
    pub mean_warnings: Vec<String>,
}

/// Turns gap-filled aligned samples into attributed samples
#[derive(Debug, Clone)]
pub struct AttributionEngine<'a> {
    config: &'a AttributionConfig,
}

impl<'a> AttributionEngine<'a> {
    pub fn new(config: &'a AttributionConfig) -> Self {
        Self { config }
    }

    /// Attribute every sample
    ///
    /// Still-missing inputs map to 0, except the system-wide bandwidth which
    /// maps to NaN so the all-cores total stands in for it.
    pub fn run(&self, samples: Vec<AlignedSample>) -> AttributionOutcome {
        let eps = self.config.epsilon;
        let fallbacks = Self::log_fallbacks(&samples);

        let mut attributed = Vec::with_capacity(samples.len());
        let mut warnings = Vec::new();
        for aligned in samples {
            let value = |field: Field| aligned.get(field).unwrap_or(0.0);
            let inputs = AttributionInputs {
                pkg_watts: value(Field::PkgWattsTotal),
                dram_watts: value(Field::DramWattsTotal),
                cpu_share: value(Field::CpuShare),
                workload_mbps: value(Field::MbmWorkload),
                allcores_mbps: value(Field::MbmAllcores),
                system_mbps: aligned.get(Field::ImcBwTotal).unwrap_or(f64::NAN),
            };
            let out = attribute(&inputs, eps);

            let mut sample = AttributedSample {
                index: aligned.index,
                timestamp: aligned.timestamp,
                pkg_watts_total: inputs.pkg_watts,
                dram_watts_total: inputs.dram_watts,
                imc_bw_mbps_total: out.system_mbps,
                mbm_workload_mbps: inputs.workload_mbps,
                mbm_allcores_mbps: inputs.allcores_mbps,
                cpu_share: inputs.cpu_share,
                mbm_share: out.mbm_share,
                gray_bw_mbps: out.gray_mbps,
                workload_attrib_bw_mbps: out.attrib_bw_mbps,
                pkg_attr_watts: out.pkg_attr_watts,
                dram_attr_watts: out.dram_attr_watts,
            };
            let raw = RawShares {
                cpu_share: inputs.cpu_share,
                mbm_share: out.mbm_share_raw,
            };
            warnings.extend(enforce(&mut sample, raw, eps));
            attributed.push(sample);
        }

        if !warnings.is_empty() {
            tracing::warn!("{} invariant clamp(s) applied", warnings.len());
        }
        let mean_warnings = check_means(&attributed, eps);

        AttributionOutcome {
            samples: attributed,
            warnings,
            fallbacks,
            mean_warnings,
        }
    }

    fn log_fallbacks(samples: &[AlignedSample]) -> Vec<FallbackReport> {
        let total = samples.len();
        Field::ALIGNED
            .iter()
            .filter_map(|&field| {
                let missing = samples.iter().filter(|s| s.is_missing(field)).count();
                if missing == 0 {
                    return None;
                }
                let replacement = if field == Field::ImcBwTotal {
                    "all-cores MBM total"
                } else {
                    "0"
                };
                tracing::info!(
                    "fallback {field}: {missing}/{total} sample(s) use {replacement} (source {})",
                    field.source()
                );
                Some(FallbackReport {
                    field,
                    samples: missing,
                })
            })
            .collect()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Check run-level bounds on the mean attributed power
pub fn check_means(samples: &[AttributedSample], eps: f64) -> Vec<String> {
    let pkg_total = mean(samples.iter().map(|s| s.pkg_watts_total));
    let dram_total = mean(samples.iter().map(|s| s.dram_watts_total));
    let non_dram = mean(samples.iter().map(AttributedSample::non_dram_watts));
    let pkg_attr = mean(samples.iter().map(|s| s.pkg_attr_watts));
    let dram_attr = mean(samples.iter().map(|s| s.dram_attr_watts));

    let mut violations = Vec::new();
    if pkg_attr > pkg_total + eps {
        violations.push(format!(
            "mean pkg_attr ({pkg_attr:.3}) exceeds mean package power ({pkg_total:.3})"
        ));
    }
    if pkg_attr > non_dram + eps {
        violations.push(format!(
            "mean pkg_attr ({pkg_attr:.3}) exceeds mean non-DRAM power ({non_dram:.3})"
        ));
    }
    if dram_attr > dram_total + eps {
        violations.push(format!(
            "mean dram_attr ({dram_attr:.3}) exceeds mean DRAM power ({dram_total:.3})"
        ));
    }
    for violation in &violations {
        tracing::warn!("{violation}");
    }
    violations
}
