//! Sample types flowing through the attribution pipeline
//!
//! Loader produces [`RawSample`]s, the aligner turns the anchor series into
//! [`AlignedSample`]s and the engine finally emits [`AttributedSample`]s.
//! Each stage owns its output vector until it hands it to the next one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Measurement source a record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Package/DRAM power table (pcm-power). Anchor of the sample axis.
    PkgPower,
    /// System-wide memory-controller bandwidth table (pcm-memory)
    MemBandwidth,
    /// CPU busy/frequency log (turbostat)
    CpuUtil,
    /// Per-group memory bandwidth monitoring table (pqos)
    Mbm,
}

impl SourceKind {
    /// All sources, anchor first
    pub const ALL: [SourceKind; 4] = [
        SourceKind::PkgPower,
        SourceKind::MemBandwidth,
        SourceKind::CpuUtil,
        SourceKind::Mbm,
    ];

    /// Short label used in log lines
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::PkgPower => "pcm-power",
            SourceKind::MemBandwidth => "pcm-memory",
            SourceKind::CpuUtil => "turbostat",
            SourceKind::Mbm => "pqos",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical field names shared by every source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    PkgWattsTotal,
    DramWattsTotal,
    ImcBwTotal,
    MbmWorkload,
    MbmAllcores,
    CpuShare,
    /// Raw busy percentage of the workload CPU; not carried past alignment
    BusyPercent,
    /// Raw busy frequency of the workload CPU; not carried past alignment
    FrequencyMhz,
}

/// Number of fields an [`AlignedSample`] carries
pub const ALIGNED_FIELD_COUNT: usize = 6;

impl Field {
    /// Fields present on the common sample axis, in attribution-table order
    pub const ALIGNED: [Field; ALIGNED_FIELD_COUNT] = [
        Field::PkgWattsTotal,
        Field::DramWattsTotal,
        Field::ImcBwTotal,
        Field::MbmWorkload,
        Field::MbmAllcores,
        Field::CpuShare,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::PkgWattsTotal => "pkg_watts_total",
            Field::DramWattsTotal => "dram_watts_total",
            Field::ImcBwTotal => "imc_bw_MBps_total",
            Field::MbmWorkload => "mbm_workload_MBps",
            Field::MbmAllcores => "mbm_allcores_MBps",
            Field::CpuShare => "cpu_share",
            Field::BusyPercent => "busy_percent",
            Field::FrequencyMhz => "frequency_MHz",
        }
    }

    /// Source that produces this field
    pub fn source(self) -> SourceKind {
        match self {
            Field::PkgWattsTotal | Field::DramWattsTotal => SourceKind::PkgPower,
            Field::ImcBwTotal => SourceKind::MemBandwidth,
            Field::MbmWorkload | Field::MbmAllcores => SourceKind::Mbm,
            Field::CpuShare | Field::BusyPercent | Field::FrequencyMhz => SourceKind::CpuUtil,
        }
    }

    /// Slot on the aligned axis, `None` for raw-only fields
    pub fn slot(self) -> Option<usize> {
        Field::ALIGNED.iter().position(|f| *f == self)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One parsed record from one source
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub source: SourceKind,
    /// Fractional POSIX seconds
    pub timestamp: f64,
    pub fields: BTreeMap<Field, f64>,
}

impl RawSample {
    pub fn new(source: SourceKind, timestamp: f64) -> Self {
        Self {
            source,
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.fields.insert(field, value);
        self
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.fields.get(&field).copied()
    }
}

/// One row of the common sample axis
///
/// Absent values are `None` ("missing"), never zero, until the gap filler
/// and the engine's fallback mapping have run.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSample {
    pub index: usize,
    pub timestamp: f64,
    values: [Option<f64>; ALIGNED_FIELD_COUNT],
}

impl AlignedSample {
    pub fn new(index: usize, timestamp: f64) -> Self {
        Self {
            index,
            timestamp,
            values: [None; ALIGNED_FIELD_COUNT],
        }
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        field.slot().and_then(|slot| self.values[slot])
    }

    /// Set a field; raw-only fields are ignored
    pub fn set(&mut self, field: Field, value: Option<f64>) {
        if let Some(slot) = field.slot() {
            self.values[slot] = value;
        }
    }

    pub fn is_missing(&self, field: Field) -> bool {
        self.get(field).is_none()
    }
}

/// Aligned sample plus everything the engine derives from it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributedSample {
    pub index: usize,
    pub timestamp: f64,
    pub pkg_watts_total: f64,
    pub dram_watts_total: f64,
    /// System-wide bandwidth actually used (falls back to the all-cores total)
    pub imc_bw_mbps_total: f64,
    pub mbm_workload_mbps: f64,
    pub mbm_allcores_mbps: f64,
    pub cpu_share: f64,
    pub mbm_share: f64,
    pub gray_bw_mbps: f64,
    pub workload_attrib_bw_mbps: f64,
    pub pkg_attr_watts: f64,
    pub dram_attr_watts: f64,
}

impl AttributedSample {
    /// Package power not spent in DRAM
    pub fn non_dram_watts(&self) -> f64 {
        (self.pkg_watts_total - self.dram_watts_total).max(0.0)
    }
}
