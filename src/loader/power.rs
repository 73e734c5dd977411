// pcm-power table: the anchor of the sample axis
//
// The table has two header rows: a group row (`System`, `S0`, `S1`, ...) and
// a metric row (`Date`, `Time`, `Watts`, `DRAM Watts`, ...). pcm ends every
// line with a delimiter, which shows up as a nameless, empty "ghost" column.

use super::timestamp::parse_date_time;
use super::{flatten_header, read_records, read_source};
use crate::config::AttributionConfig;
use crate::csv_row::{blank_lines, parse_measurement};
use crate::error::ParseError;
use crate::sample::{Field, RawSample, SourceKind};
use std::path::{Path, PathBuf};

/// Metric label of the appended package attribution column
pub const ACTUAL_WATTS: &str = "Actual Watts";
/// Metric label of the appended DRAM attribution column
pub const ACTUAL_DRAM_WATTS: &str = "Actual DRAM Watts";

const PKG_WATTS_LABEL: &str = "Watts";
const DRAM_WATTS_LABEL: &str = "DRAM Watts";

/// Share of empty data cells that marks a nameless column as a ghost
const GHOST_EMPTY_RATIO: f64 = 0.95;

/// Column layout of the power table after schema negotiation
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSchema {
    /// Canonical name of every kept column (empty for nameless data columns)
    pub names: Vec<String>,
    /// Positions in the original header that were kept, in order
    pub kept: Vec<usize>,
    pub pkg_watts: usize,
    pub dram_watts: Option<usize>,
    pub date: Option<usize>,
    pub time: Option<usize>,
    /// Ghost columns dropped from the table
    pub ghost_columns: usize,
    /// Previously appended attribution columns dropped before re-appending
    pub replaced_columns: usize,
}

impl PowerSchema {
    /// Position of a canonical column name among the kept columns
    pub fn column(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Named columns only; nameless data columns never enter the schema
    pub fn fields(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(i, name)| (i, name.as_str()))
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

/// Build the schema from both header rows
///
/// Pass one names every column. Pass two drops, by name, nameless columns
/// whose data is (almost) all empty and any attribution columns left by an
/// earlier run, then resolves the columns the engine needs.
pub fn negotiate_schema(
    top: &[String],
    bottom: &[String],
    rows: &[Vec<String>],
) -> Result<PowerSchema, String> {
    let width = top.len().max(bottom.len());
    let names: Vec<String> = (0..width)
        .map(|i| flatten_header(cell(top, i), cell(bottom, i)))
        .collect();

    let mut kept = Vec::with_capacity(width);
    let mut ghost_columns = 0;
    let mut replaced_columns = 0;
    for (i, name) in names.iter().enumerate() {
        let label = cell(bottom, i).trim();
        if label == ACTUAL_WATTS || label == ACTUAL_DRAM_WATTS {
            replaced_columns += 1;
            continue;
        }
        if name.is_empty() {
            let empty = rows.iter().filter(|r| cell(r, i).trim().is_empty()).count();
            let ratio = if rows.is_empty() {
                1.0
            } else {
                empty as f64 / rows.len() as f64
            };
            if ratio >= GHOST_EMPTY_RATIO {
                ghost_columns += 1;
                continue;
            }
        }
        kept.push(i);
    }

    let labels: Vec<&str> = kept.iter().map(|&i| cell(bottom, i).trim()).collect();
    let last_labelled = |wanted: &str| labels.iter().rposition(|l| *l == wanted);
    let first_labelled = |wanted: &str| labels.iter().position(|l| *l == wanted);

    let pkg_watts = last_labelled(PKG_WATTS_LABEL)
        .ok_or_else(|| format!("no `{PKG_WATTS_LABEL}` column in metric header row"))?;

    Ok(PowerSchema {
        names: kept.iter().map(|&i| names[i].clone()).collect(),
        pkg_watts,
        dram_watts: last_labelled(DRAM_WATTS_LABEL),
        date: first_labelled("Date"),
        time: first_labelled("Time"),
        kept,
        ghost_columns,
        replaced_columns,
    })
}

/// The power table as read from disk, normalized for rewriting
#[derive(Debug, Clone, PartialEq)]
pub struct PowerTable {
    pub path: PathBuf,
    pub header_top: Vec<String>,
    pub header_bottom: Vec<String>,
    /// Data rows restricted to the kept columns, padded to header width
    pub rows: Vec<Vec<String>>,
    pub schema: PowerSchema,
}

impl PowerTable {
    /// Parse the table text
    pub fn parse(text: &str, path: &Path) -> Result<Self, ParseError> {
        let mut table = read_records(SourceKind::PkgPower, text, path)?;
        let blanks = blank_lines(text);
        if blanks > 0 {
            tracing::warn!(
                "pcm-power: {blanks} blank line(s) in {}; they are not carried into the rewrite",
                path.display()
            );
        }
        if table.len() < 2 {
            return Err(ParseError::Schema {
                kind: SourceKind::PkgPower,
                path: path.to_path_buf(),
                reason: format!("expected two header rows, found {} line(s)", table.len()),
            });
        }
        let data = table.split_off(2);
        let bottom = table.pop().unwrap_or_default();
        let top = table.pop().unwrap_or_default();

        let schema = negotiate_schema(&top, &bottom, &data).map_err(|reason| ParseError::Schema {
            kind: SourceKind::PkgPower,
            path: path.to_path_buf(),
            reason,
        })?;

        let project = |row: &[String]| -> Vec<String> {
            schema.kept.iter().map(|&i| cell(row, i).to_string()).collect()
        };
        let header_top = project(&top);
        let header_bottom = project(&bottom);
        let rows = data.iter().map(|row| project(row)).collect();

        tracing::debug!(
            "pcm-power schema: columns={}, pkg_idx={}, dram_idx={:?}, ghost_dropped={}, replaced={}",
            schema.names.len(),
            schema.pkg_watts,
            schema.dram_watts,
            schema.ghost_columns,
            schema.replaced_columns
        );

        Ok(Self {
            path: path.to_path_buf(),
            header_top,
            header_bottom,
            rows,
            schema,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Group label (header row one) of the package watts column
    pub fn pkg_group_label(&self) -> &str {
        cell(&self.header_top, self.schema.pkg_watts).trim()
    }

    /// One anchor sample per data row
    ///
    /// Rows whose Date/Time cannot be parsed get a timestamp one interval
    /// after the previous row (or before the first parsed row).
    pub fn samples(&self, interval_sec: f64) -> Vec<RawSample> {
        let parsed: Vec<Option<f64>> = self
            .rows
            .iter()
            .map(|row| match (self.schema.date, self.schema.time) {
                (Some(d), Some(t)) => parse_date_time(cell(row, d), cell(row, t)),
                _ => None,
            })
            .collect();
        let timestamps = fill_timestamps(&parsed, interval_sec);
        let synthesized = parsed.iter().filter(|t| t.is_none()).count();
        if synthesized > 0 {
            tracing::info!("pcm-power timestamp fallbacks applied={synthesized}");
        }

        self.rows
            .iter()
            .zip(timestamps)
            .map(|(row, timestamp)| {
                let mut sample = RawSample::new(SourceKind::PkgPower, timestamp);
                if let Some(watts) = parse_measurement(cell(row, self.schema.pkg_watts)) {
                    sample.fields.insert(Field::PkgWattsTotal, watts);
                }
                if let Some(dram) = self
                    .schema
                    .dram_watts
                    .and_then(|i| parse_measurement(cell(row, i)))
                {
                    sample.fields.insert(Field::DramWattsTotal, dram);
                }
                sample
            })
            .collect()
    }
}

fn fill_timestamps(parsed: &[Option<f64>], interval: f64) -> Vec<f64> {
    let Some((first_idx, first_ts)) = parsed
        .iter()
        .enumerate()
        .find_map(|(i, t)| t.map(|t| (i, t)))
    else {
        return (0..parsed.len()).map(|i| i as f64 * interval).collect();
    };

    let mut out = Vec::with_capacity(parsed.len());
    for i in 0..first_idx {
        out.push(first_ts - (first_idx - i) as f64 * interval);
    }
    let mut previous = first_ts;
    for value in &parsed[first_idx..] {
        let ts = value.unwrap_or(previous + interval);
        out.push(ts);
        previous = ts;
    }
    out
}

/// Loader for the anchor table
#[derive(Debug, Clone)]
pub struct PowerTableLoader {
    interval_sec: f64,
}

impl PowerTableLoader {
    pub fn new(config: &AttributionConfig) -> Self {
        Self {
            interval_sec: config.power_interval_sec,
        }
    }

    /// Read the table and its anchor samples
    pub fn load(&self, path: &Path) -> Result<(PowerTable, Vec<RawSample>), ParseError> {
        let text = read_source(SourceKind::PkgPower, path)?;
        let table = PowerTable::parse(&text, path)?;
        if table.schema.dram_watts.is_none() {
            tracing::warn!("pcm-power: no `DRAM Watts` column; DRAM attribution falls back to 0");
        }
        let samples = table.samples(self.interval_sec);
        tracing::info!(
            "pcm-power: parsed {} samples from {}",
            samples.len(),
            path.display()
        );
        Ok((table, samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
System,System,S0,S0,S0,
Date,Time,Frequency,Watts,DRAM Watts,
2024-03-05,10:00:00.000,2400,40.0,8.0,
2024-03-05,10:00:00.500,2400,42.0,9.0,
2024-03-05,10:00:01.000,2400,41.0,7.5,
";

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ghost_column_dropped() {
        let table = PowerTable::parse(TABLE, Path::new("p.csv")).unwrap();
        assert_eq!(table.schema.ghost_columns, 1);
        assert_eq!(table.header_bottom.len(), 5);
        assert!(table.rows.iter().all(|r| r.len() == 5));
        assert_eq!(table.schema.column("S0 Watts"), Some(3));
        assert_eq!(table.schema.column("S0 DRAM Watts"), Some(4));
        assert_eq!(table.schema.column("System Date"), Some(0));
    }

    #[test]
    fn test_samples_carry_power_fields() {
        let table = PowerTable::parse(TABLE, Path::new("p.csv")).unwrap();
        let samples = table.samples(0.5);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[1].get(Field::PkgWattsTotal), Some(42.0));
        assert_eq!(samples[2].get(Field::DramWattsTotal), Some(7.5));
        assert!((samples[1].timestamp - samples[0].timestamp - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_previous_attribution_columns_replaced() {
        let text = "\
System,System,S0,S0,S0,S0
Date,Time,Watts,DRAM Watts,Actual Watts,Actual DRAM Watts
2024-03-05,10:00:00,40,8,16.000000,2.000000
";
        let table = PowerTable::parse(text, Path::new("p.csv")).unwrap();
        assert_eq!(table.schema.replaced_columns, 2);
        assert_eq!(table.header_bottom, strings(&["Date", "Time", "Watts", "DRAM Watts"]));
        assert_eq!(table.rows[0], strings(&["2024-03-05", "10:00:00", "40", "8"]));
    }

    #[test]
    fn test_nameless_data_column_kept_but_not_in_schema() {
        let top = strings(&["", "S0", ""]);
        let bottom = strings(&["", "Watts", ""]);
        let rows = vec![strings(&["x", "40", ""]), strings(&["y", "41", ""])];
        let schema = negotiate_schema(&top, &bottom, &rows).unwrap();
        assert_eq!(schema.kept, vec![0, 1]);
        assert_eq!(schema.ghost_columns, 1);
        assert_eq!(schema.fields().collect::<Vec<_>>(), vec![(1, "S0 Watts")]);
    }

    #[test]
    fn test_last_watts_column_wins() {
        let top = strings(&["S0", "S1"]);
        let bottom = strings(&["Watts", "Watts"]);
        let schema = negotiate_schema(&top, &bottom, &[]).unwrap();
        assert_eq!(schema.pkg_watts, 1);
        assert_eq!(schema.dram_watts, None);
    }

    #[test]
    fn test_missing_watts_is_schema_error() {
        let err = PowerTable::parse("a,b\nDate,Time\n", Path::new("p.csv")).unwrap_err();
        assert!(matches!(err, ParseError::Schema { .. }));
    }

    #[test]
    fn test_single_line_is_schema_error() {
        let err = PowerTable::parse("Date,Time,Watts\n", Path::new("p.csv")).unwrap_err();
        assert!(matches!(err, ParseError::Schema { .. }));
    }

    #[test]
    fn test_unparseable_timestamps_synthesized() {
        let parsed = vec![None, Some(100.0), None, Some(101.2), None];
        assert_eq!(
            fill_timestamps(&parsed, 0.5),
            vec![99.5, 100.0, 100.5, 101.2, 101.7]
        );
        assert_eq!(fill_timestamps(&[None, None], 0.25), vec![0.0, 0.25]);
    }

    #[test]
    fn test_blank_and_quoted_lines() {
        let text = "\
System,System,S0
Date,Time,\"Watts\"

2024-03-05,10:00:00.000,40.0
\"2024-03-05\",\"10:00:00.500\",\"41.5\"
";
        let table = PowerTable::parse(text, Path::new("p.csv")).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], strings(&["2024-03-05", "10:00:00.500", "41.5"]));
        let samples = table.samples(0.5);
        assert_eq!(samples[1].get(Field::PkgWattsTotal), Some(41.5));
    }

    #[test]
    fn test_negative_watts_left_missing() {
        let text = "S0,S0\nWatts,DRAM Watts\n-3,abc\n";
        let table = PowerTable::parse(text, Path::new("p.csv")).unwrap();
        let samples = table.samples(0.5);
        assert_eq!(samples[0].get(Field::PkgWattsTotal), None);
        assert_eq!(samples[0].get(Field::DramWattsTotal), None);
        assert_eq!(samples[0].timestamp, 0.0);
    }
}
