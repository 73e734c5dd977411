//! Error taxonomy for the attribution pipeline
//!
//! Per-source problems ([`ParseError`]) are absorbed into fallbacks. Only an
//! unusable anchor ([`AlignmentError`]) or a failed output ([`WriteError`])
//! stops a run. Invariant clamps are reported as [`SanityWarning`]s.

use crate::sample::SourceKind;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A source file could not be turned into a series (recoverable)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{kind} file not found: {}", path.display())]
    Missing { kind: SourceKind, path: PathBuf },

    #[error("{kind} file is empty: {}", path.display())]
    Empty { kind: SourceKind, path: PathBuf },

    #[error("{kind} header mismatch in {}: {reason}", path.display())]
    Schema {
        kind: SourceKind,
        path: PathBuf,
        reason: String,
    },

    #[error("{kind} read failed for {}: {message}", path.display())]
    Io {
        kind: SourceKind,
        path: PathBuf,
        message: String,
    },

    #[error("{kind} source not configured")]
    NotConfigured { kind: SourceKind },

    #[error("{0} loader panicked")]
    LoaderPanicked(SourceKind),
}

impl ParseError {
    pub fn kind(&self) -> SourceKind {
        match self {
            ParseError::Missing { kind, .. }
            | ParseError::Empty { kind, .. }
            | ParseError::Schema { kind, .. }
            | ParseError::Io { kind, .. }
            | ParseError::NotConfigured { kind } => *kind,
            ParseError::LoaderPanicked(kind) => *kind,
        }
    }
}

/// The sample axis could not be built (fatal)
#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("anchor power series is empty; nothing to attribute")]
    EmptyAnchor,

    #[error("anchor power table unusable: {0}")]
    AnchorUnusable(#[source] ParseError),
}

/// An output could not be written atomically (fatal)
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("cannot create temporary file in {}: {source}", dir.display())]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write temporary file for {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("temporary file for {} is empty", path.display())]
    EmptyTemp { path: PathBuf },

    #[error("failed to rename temporary file over {}: {source}", path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration could not be read or is inconsistent
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Fatal outcome of a pipeline run
#[derive(Error, Debug)]
pub enum AttribError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Invariant that had to be enforced by clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    CpuShareRange,
    MbmShareRange,
    GrayNonNegative,
    PkgAttrBound,
    DramAttrBound,
    TotalAttrBound,
}

impl Invariant {
    pub fn describe(self) -> &'static str {
        match self {
            Invariant::CpuShareRange => "0 <= cpu_share <= 1",
            Invariant::MbmShareRange => "0 <= mbm_share <= 1",
            Invariant::GrayNonNegative => "gray_bw_MBps >= 0",
            Invariant::PkgAttrBound => "0 <= pkg_attr_watts <= max(pkg - dram, 0)",
            Invariant::DramAttrBound => "0 <= dram_attr_watts <= dram_watts_total",
            Invariant::TotalAttrBound => "pkg_attr + dram_attr <= pkg_watts_total",
        }
    }
}

/// Non-fatal record of a clamped invariant violation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanityWarning {
    pub index: usize,
    pub invariant: Invariant,
    pub raw: f64,
    pub clamped: f64,
}

impl fmt::Display for SanityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sample {}: {} violated (raw={:.6}, clamped={:.6})",
            self.index,
            self.invariant.describe(),
            self.raw,
            self.clamped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_reports_kind() {
        let err = ParseError::Missing {
            kind: SourceKind::Mbm,
            path: PathBuf::from("/tmp/x_pqos.csv"),
        };
        assert_eq!(err.kind(), SourceKind::Mbm);
        assert_eq!(err.to_string(), "pqos file not found: /tmp/x_pqos.csv");
    }

    #[test]
    fn test_sanity_warning_display() {
        let warning = SanityWarning {
            index: 7,
            invariant: Invariant::CpuShareRange,
            raw: 1.25,
            clamped: 1.0,
        };
        let text = warning.to_string();
        assert!(text.contains("sample 7"));
        assert!(text.contains("raw=1.250000"));
        assert!(text.contains("clamped=1.000000"));
    }

    #[test]
    fn test_alignment_error_wraps_parse_error() {
        let err = AlignmentError::AnchorUnusable(ParseError::Empty {
            kind: SourceKind::PkgPower,
            path: PathBuf::from("p.csv"),
        });
        assert!(err.to_string().contains("pcm-power file is empty"));
    }
}
