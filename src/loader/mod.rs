//! Time-series loaders for the four measurement sources
//!
//! Each loader turns one closed tool output file into an ordered list of
//! [`RawSample`]s. Optional sources never fail a run: a missing, empty or
//! malformed file yields an empty series plus the [`ParseError`] explaining
//! why, and the engine applies its documented fallback.

mod cpu_util;
mod mbm;
mod mem_bandwidth;
mod power;
mod timestamp;

pub use cpu_util::CpuUtilLoader;
pub use mbm::{parse_core_set, MbmLoader};
pub use mem_bandwidth::MemBandwidthLoader;
pub use power::{
    negotiate_schema, PowerSchema, PowerTable, PowerTableLoader, ACTUAL_DRAM_WATTS, ACTUAL_WATTS,
};
pub use timestamp::{has_subseconds, parse_datetime};

use crate::error::ParseError;
use crate::sample::{RawSample, SourceKind};
use std::path::Path;

/// Loaded series of one source, possibly empty
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub kind: SourceKind,
    pub samples: Vec<RawSample>,
    /// Why the series is empty (or degraded), if anything went wrong
    pub error: Option<ParseError>,
    /// Rows or blocks discarded while parsing
    pub skipped: usize,
}

impl LoadOutcome {
    pub fn empty(kind: SourceKind, error: ParseError) -> Self {
        Self {
            kind,
            samples: Vec::new(),
            error: Some(error),
            skipped: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.samples.is_empty()
    }
}

/// Parsed records plus the number of discarded rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parsed {
    pub samples: Vec<RawSample>,
    pub skipped: usize,
}

/// A parser for one optional source
pub trait SourceLoader: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Parse the full file contents
    fn parse(&self, text: &str, path: &Path) -> Result<Parsed, ParseError>;

    /// Read and parse `path`; never fails, errors are folded into the outcome
    fn load(&self, path: Option<&Path>) -> LoadOutcome {
        let kind = self.kind();
        let Some(path) = path else {
            tracing::info!("{kind}: source not configured; fallback applies");
            return LoadOutcome::empty(kind, ParseError::NotConfigured { kind });
        };

        let parsed = read_source(kind, path).and_then(|text| self.parse(&text, path));
        match parsed {
            Ok(parsed) => {
                tracing::info!(
                    "{kind}: parsed {} samples from {} (skipped={})",
                    parsed.samples.len(),
                    path.display(),
                    parsed.skipped
                );
                LoadOutcome {
                    kind,
                    samples: parsed.samples,
                    error: None,
                    skipped: parsed.skipped,
                }
            }
            Err(err) => {
                tracing::warn!("{err}; continuing without {kind}");
                LoadOutcome::empty(kind, err)
            }
        }
    }
}

/// Read a source file, mapping absence and emptiness to [`ParseError`]
pub fn read_source(kind: SourceKind, path: &Path) -> Result<String, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ParseError::Missing {
                kind,
                path: path.to_path_buf(),
            }
        } else {
            ParseError::Io {
                kind,
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    })?;

    if text.trim().is_empty() {
        return Err(ParseError::Empty {
            kind,
            path: path.to_path_buf(),
        });
    }
    Ok(text)
}

/// Read a CSV source into rows; malformed CSV is a schema problem
pub fn read_records(
    kind: SourceKind,
    text: &str,
    path: &Path,
) -> Result<Vec<Vec<String>>, ParseError> {
    crate::csv_row::read_table(text).map_err(|err| ParseError::Schema {
        kind,
        path: path.to_path_buf(),
        reason: format!("malformed CSV: {err}"),
    })
}

/// Canonical column name from a two-row header cell pair
///
/// Non-empty parts are joined with one space. `System ...` names lose a
/// trailing parenthesised unit so `System Memory (MB/s)` matches `System Memory`.
pub fn flatten_header(top: &str, bottom: &str) -> String {
    let collapsed = top
        .split_whitespace()
        .chain(bottom.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    if !collapsed.to_ascii_lowercase().starts_with("system ") || !collapsed.ends_with(')') {
        return collapsed;
    }
    match collapsed.rfind('(') {
        Some(open) => collapsed[..open].trim_end().to_string(),
        None => collapsed,
    }
}

/// Flatten two header rows of possibly different widths
pub fn flatten_headers(top: &[String], bottom: &[String]) -> Vec<String> {
    let width = top.len().max(bottom.len());
    (0..width)
        .map(|i| {
            flatten_header(
                top.get(i).map(String::as_str).unwrap_or(""),
                bottom.get(i).map(String::as_str).unwrap_or(""),
            )
        })
        .collect()
}

/// Shift timestamps so the first record sits at zero
pub fn rebase_to_elapsed(samples: &mut [RawSample]) {
    if let Some(origin) = samples.first().map(|s| s.timestamp) {
        for sample in samples.iter_mut() {
            sample.timestamp -= origin;
        }
    }
}

/// Stable sort by timestamp
pub fn sort_by_time(samples: &mut [RawSample]) {
    samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_flatten_header_joins_parts() {
        assert_eq!(flatten_header("S0", "DRAM Watts"), "S0 DRAM Watts");
        assert_eq!(flatten_header("", "Date"), "Date");
        assert_eq!(flatten_header("  ", "  "), "");
    }

    #[test]
    fn test_flatten_header_strips_system_unit() {
        assert_eq!(flatten_header("System", "Memory (MB/s)"), "System Memory");
        assert_eq!(flatten_header("SKT0", "Memory (MB/s)"), "SKT0 Memory (MB/s)");
    }

    #[test]
    fn test_flatten_header_collapses_whitespace() {
        assert_eq!(flatten_header("S1", "Memory   Read"), "S1 Memory Read");
    }

    #[test]
    fn test_flatten_headers_uneven_width() {
        let top = vec!["a".to_string()];
        let bottom = vec!["x".to_string(), "y".to_string(), "".to_string()];
        assert_eq!(flatten_headers(&top, &bottom), vec!["a x", "y", ""]);
    }

    #[test]
    fn test_read_source_missing() {
        let err = read_source(SourceKind::Mbm, Path::new("/nonexistent/x.csv")).unwrap_err();
        assert!(matches!(err, ParseError::Missing { .. }));
    }

    #[test]
    fn test_read_source_whitespace_only_is_empty() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "   ").unwrap();
        let err = read_source(SourceKind::CpuUtil, file.path()).unwrap_err();
        assert!(matches!(err, ParseError::Empty { .. }));
    }

    #[test]
    fn test_rebase_to_elapsed() {
        let mut samples = vec![
            RawSample::new(SourceKind::Mbm, 100.0),
            RawSample::new(SourceKind::Mbm, 100.5),
        ];
        rebase_to_elapsed(&mut samples);
        assert_eq!(samples[0].timestamp, 0.0);
        assert_eq!(samples[1].timestamp, 0.5);
    }
}
