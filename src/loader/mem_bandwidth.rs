// pcm-memory table: system-wide memory-controller bandwidth

use super::timestamp::parse_date_time;
use super::{flatten_headers, read_records, sort_by_time, Parsed, SourceLoader};
use crate::config::AttributionConfig;
use crate::csv_row::parse_measurement;
use crate::error::ParseError;
use crate::sample::{Field, RawSample, SourceKind};
use std::path::Path;

/// Loader for the pcm-memory sidecar table
#[derive(Debug, Clone)]
pub struct MemBandwidthLoader {
    warmup_rows: usize,
}

impl MemBandwidthLoader {
    pub fn new(config: &AttributionConfig) -> Self {
        Self {
            warmup_rows: config.mem_warmup_rows,
        }
    }
}

fn is_header_row(row: &[String]) -> bool {
    row.iter().any(|cell| {
        let lowered = cell.trim().to_ascii_lowercase();
        lowered == "date" || lowered == "time" || lowered.contains("memory")
    })
}

fn find_system_column(names: &[String]) -> Option<usize> {
    names
        .iter()
        .position(|n| n.trim().eq_ignore_ascii_case("system memory"))
        .or_else(|| {
            names.iter().position(|n| {
                let lowered = n.trim().to_ascii_lowercase();
                lowered.contains("system") && lowered.contains("memory") && !lowered.contains("skt")
            })
        })
}

impl SourceLoader for MemBandwidthLoader {
    fn kind(&self) -> SourceKind {
        SourceKind::MemBandwidth
    }

    fn parse(&self, text: &str, path: &Path) -> Result<Parsed, ParseError> {
        let schema_error = |reason: &str| ParseError::Schema {
            kind: SourceKind::MemBandwidth,
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let table = read_records(SourceKind::MemBandwidth, text, path)?;
        let Some(first) = table.first() else {
            return Err(schema_error("no header row"));
        };
        let (names, data_start) = match table.get(1) {
            Some(second) if is_header_row(second) => (flatten_headers(first, second), 2),
            _ => (flatten_headers(first, &[]), 1),
        };

        let system_idx = find_system_column(&names)
            .ok_or_else(|| schema_error("System Memory column not found"))?;
        let date_idx = names.iter().position(|n| n.eq_ignore_ascii_case("date"));
        let time_idx = names.iter().position(|n| n.eq_ignore_ascii_case("time"));
        let (Some(date_idx), Some(time_idx)) = (date_idx, time_idx) else {
            return Err(schema_error("Date/Time columns not found"));
        };
        if data_start == 2 {
            tracing::debug!(
                "pcm-memory: multi-row header detected; using '{}'",
                names[system_idx]
            );
        }

        let data = table.get(data_start..).unwrap_or_default();
        let warmup = self.warmup_rows.min(data.len());
        if warmup > 0 {
            tracing::info!("pcm-memory: dropping {warmup} warm-up row(s)");
        }

        let mut samples = Vec::with_capacity(data.len() - warmup);
        let mut skipped = 0;
        for row in &data[warmup..] {
            let value = row.get(system_idx).and_then(|c| parse_measurement(c));
            let timestamp = match (row.get(date_idx), row.get(time_idx)) {
                (Some(d), Some(t)) => parse_date_time(d, t),
                _ => None,
            };
            match (value, timestamp) {
                (Some(value), Some(timestamp)) => samples.push(
                    RawSample::new(SourceKind::MemBandwidth, timestamp)
                        .with(Field::ImcBwTotal, value),
                ),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::info!("pcm-memory: filtered {skipped} row(s) with invalid bandwidth or time");
        }

        sort_by_time(&mut samples);
        Ok(Parsed { samples, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(warmup_rows: usize) -> MemBandwidthLoader {
        MemBandwidthLoader { warmup_rows }
    }

    const TWO_ROW: &str = "\
,,SKT0,SKT0,System,System
Date,Time,Mem Read (MB/s),Memory (MB/s),Read,Memory (MB/s)
2024-03-05,10:00:00.000,1.0,900000.0,1.0,900000.0
2024-03-05,10:00:00.500,1.0,500.0,1.0,510.0
2024-03-05,10:00:01.000,1.0,-5.0,1.0,-5.0
2024-03-05,10:00:01.500,1.0,500.0,1.0,nan
2024-03-05,10:00:02.000,1.0,500.0,1.0,530.0
";

    #[test]
    fn test_two_row_header_system_column() {
        let parsed = loader(1).parse(TWO_ROW, Path::new("m.csv")).unwrap();
        let values: Vec<f64> = parsed
            .samples
            .iter()
            .map(|s| s.get(Field::ImcBwTotal).unwrap())
            .collect();
        assert_eq!(values, vec![510.0, 530.0]);
        assert_eq!(parsed.skipped, 2);
    }

    #[test]
    fn test_warmup_dropped_unconditionally() {
        let parsed = loader(2).parse(TWO_ROW, Path::new("m.csv")).unwrap();
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].get(Field::ImcBwTotal), Some(530.0));
    }

    #[test]
    fn test_single_header_row() {
        let text = "\
Date,Time,System Memory (MB/s)
2024-03-05,10:00:00,100
2024-03-05,10:00:01,200
";
        let parsed = loader(0).parse(text, Path::new("m.csv")).unwrap();
        assert_eq!(parsed.samples.len(), 2);
        assert!((parsed.samples[1].timestamp - parsed.samples[0].timestamp - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_system_column_is_schema_error() {
        let text = "Date,Time,SKT0 Memory\n2024-03-05,10:00:00,1\n";
        let err = loader(0).parse(text, Path::new("m.csv")).unwrap_err();
        assert!(matches!(err, ParseError::Schema { .. }));
    }

    #[test]
    fn test_warmup_larger_than_table() {
        let text = "Date,Time,System Memory\n2024-03-05,10:00:00,1\n";
        let parsed = loader(5).parse(text, Path::new("m.csv")).unwrap();
        assert!(parsed.samples.is_empty());
    }
}
