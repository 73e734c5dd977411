// pqos monitoring table: per core-group memory bandwidth
//
// pqos writes one row per monitored group and interval:
//   Time,Core,IPC,LLC Misses,LLC[KB],MBL[MB/s],MBR[MB/s],MBT[MB/s]
// Older builds only print whole seconds, so several intervals can share a
// timestamp; some builds also emit the same group twice per interval.

use super::timestamp::{has_subseconds, parse_datetime};
use super::{read_records, sort_by_time, Parsed, SourceLoader};
use crate::config::AttributionConfig;
use crate::csv_row::parse_number;
use crate::error::ParseError;
use crate::sample::{Field, RawSample, SourceKind};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

type CoreSet = BTreeSet<u32>;

/// Parse a pqos core list such as `"[0,2-3]"` or `"1:4-5"`
pub fn parse_core_set(text: &str) -> CoreSet {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '"' | '[' | ']' | '{' | '}'))
        .collect();
    let mut cores = CoreSet::new();
    for part in cleaned.split(',') {
        let part = part.trim();
        let part = match part.split_once(':') {
            Some((_, rest)) => rest.trim(),
            None => part,
        };
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
                {
                    cores.extend(start.min(end)..=start.max(end));
                }
            }
            None => {
                if let Ok(core) = part.parse::<u32>() {
                    cores.insert(core);
                }
            }
        }
    }
    cores
}

#[derive(Debug, Clone, PartialEq)]
struct GroupRow {
    time: String,
    cores: CoreSet,
    mbps: f64,
}

/// Rows of one monitoring interval
#[derive(Debug, Clone, PartialEq)]
struct Interval {
    time: String,
    groups: Vec<(CoreSet, f64)>,
}

impl Interval {
    fn new(time: &str) -> Self {
        Self {
            time: time.to_string(),
            groups: Vec::new(),
        }
    }

    fn has_group(&self, cores: &CoreSet) -> bool {
        self.groups.iter().any(|(c, _)| c == cores)
    }

    /// Insert a group, keeping the maximum on duplicates. Returns true for
    /// a duplicate.
    fn merge(&mut self, cores: CoreSet, mbps: f64) -> bool {
        match self.groups.iter_mut().find(|(c, _)| *c == cores) {
            Some((_, value)) => {
                *value = value.max(mbps);
                true
            }
            None => {
                self.groups.push((cores, mbps));
                false
            }
        }
    }
}

/// Group rows into monitoring intervals
///
/// Sub-second timestamps identify an interval exactly, so a repeated group
/// under one timestamp is a duplicate emission. Whole-second timestamps are
/// ambiguous; there a repeated group starts the next interval.
fn group_intervals(rows: Vec<GroupRow>, subsecond: bool) -> (Vec<Interval>, usize) {
    let mut intervals: Vec<Interval> = Vec::new();
    let mut duplicates = 0;
    for row in rows {
        let start_new = match intervals.last() {
            None => true,
            Some(last) if last.time != row.time => true,
            Some(last) => !subsecond && last.has_group(&row.cores),
        };
        if start_new {
            intervals.push(Interval::new(&row.time));
        }
        if let Some(current) = intervals.last_mut() {
            if current.merge(row.cores, row.mbps) {
                duplicates += 1;
            }
        }
    }
    (intervals, duplicates)
}

/// Fractional offset of each interval within its whole second: k/n for the
/// k-th of n intervals sharing a timestamp string
fn subsecond_offsets(intervals: &[Interval]) -> Vec<f64> {
    let mut offsets = vec![0.0; intervals.len()];
    let mut start = 0;
    while start < intervals.len() {
        let mut end = start + 1;
        while end < intervals.len() && intervals[end].time == intervals[start].time {
            end += 1;
        }
        let n = (end - start) as f64;
        for (k, offset) in offsets[start..end].iter_mut().enumerate() {
            *offset = k as f64 / n;
        }
        start = end;
    }
    offsets
}

fn bandwidth_patterns() -> Result<&'static [Regex; 2], &'static regex::Error> {
    static PATTERNS: OnceLock<Result<[Regex; 2], regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| Ok([Regex::new(r"(?i)mbt.*mb/s")?, Regex::new(r"(?i)mbl.*mb/s")?]))
        .as_ref()
}

/// Loader for pqos CSV output
#[derive(Debug, Clone)]
pub struct MbmLoader {
    workload: CoreSet,
}

impl MbmLoader {
    pub fn new(config: &AttributionConfig) -> Self {
        Self {
            workload: config.workload_cpus.iter().copied().collect(),
        }
    }

    /// Pick the bandwidth column: transactions (MBT) first, then local (MBL).
    /// Remote (MBR) is part of MBT and never used on its own.
    fn bandwidth_column(header: &[String]) -> Result<Option<usize>, &'static regex::Error> {
        Ok(bandwidth_patterns()?
            .iter()
            .find_map(|re| header.iter().position(|name| re.is_match(name))))
    }
}

impl SourceLoader for MbmLoader {
    fn kind(&self) -> SourceKind {
        SourceKind::Mbm
    }

    fn parse(&self, text: &str, path: &Path) -> Result<Parsed, ParseError> {
        let schema_error = |reason: String| ParseError::Schema {
            kind: SourceKind::Mbm,
            path: path.to_path_buf(),
            reason,
        };

        let mut table = read_records(SourceKind::Mbm, text, path)?.into_iter();
        let header: Vec<String> = table
            .next()
            .ok_or_else(|| schema_error("no header row".to_string()))?
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();
        let column = |name: &str| header.iter().position(|c| c.eq_ignore_ascii_case(name));
        let (Some(time_idx), Some(core_idx)) = (column("Time"), column("Core")) else {
            return Err(schema_error("Time/Core columns not found".to_string()));
        };
        let bw_idx = Self::bandwidth_column(&header)
            .map_err(|err| schema_error(format!("bandwidth column pattern: {err}")))?
            .ok_or_else(|| schema_error("no MBT[MB/s] or MBL[MB/s] column".to_string()))?;
        tracing::info!("pqos bandwidth column selected: {}", header[bw_idx]);

        let mut skipped = 0;
        let mut rows = Vec::new();
        for record in table {
            let time = record.get(time_idx).map(|t| t.trim()).unwrap_or("");
            let cores = record
                .get(core_idx)
                .map(|c| parse_core_set(c))
                .unwrap_or_default();
            let mbps = record
                .get(bw_idx)
                .and_then(|c| parse_number(c))
                .filter(|v| v.is_finite());
            match mbps {
                Some(mbps) if !time.is_empty() && !cores.is_empty() => rows.push(GroupRow {
                    time: time.to_string(),
                    cores,
                    mbps: mbps.max(0.0),
                }),
                _ => skipped += 1,
            }
        }

        let subsecond = rows.iter().any(|r| has_subseconds(&r.time));
        let (intervals, duplicates) = group_intervals(rows, subsecond);
        if duplicates > 0 {
            tracing::info!("pqos: merged {duplicates} duplicate group row(s) keeping the maximum");
        }
        let offsets = if subsecond {
            vec![0.0; intervals.len()]
        } else {
            subsecond_offsets(&intervals)
        };

        let mut samples = Vec::with_capacity(intervals.len());
        for (interval, offset) in intervals.iter().zip(offsets) {
            let Some(base) = parse_datetime(&interval.time) else {
                skipped += 1;
                continue;
            };
            let workload: f64 = interval
                .groups
                .iter()
                .filter(|(cores, _)| *cores == self.workload)
                .map(|(_, v)| *v)
                .sum();
            let allcores: f64 = interval.groups.iter().map(|(_, v)| *v).sum();
            samples.push(
                RawSample::new(SourceKind::Mbm, base + offset)
                    .with(Field::MbmWorkload, workload)
                    .with(Field::MbmAllcores, allcores),
            );
        }

        sort_by_time(&mut samples);
        Ok(Parsed { samples, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(cores: &[u32]) -> MbmLoader {
        MbmLoader {
            workload: cores.iter().copied().collect(),
        }
    }

    fn set(cores: &[u32]) -> CoreSet {
        cores.iter().copied().collect()
    }

    #[test]
    fn test_parse_core_set_forms() {
        assert_eq!(parse_core_set("0"), set(&[0]));
        assert_eq!(parse_core_set("\"[1,3-5]\""), set(&[1, 3, 4, 5]));
        assert_eq!(parse_core_set("{7-6}"), set(&[6, 7]));
        assert_eq!(parse_core_set("2:8-9"), set(&[8, 9]));
        assert!(parse_core_set("abc").is_empty());
    }

    #[test]
    fn test_bandwidth_patterns_compiled_once() {
        let first = bandwidth_patterns().unwrap();
        let second = bandwidth_patterns().unwrap();
        assert!(std::ptr::eq(first, second));

        let header: Vec<String> = ["Time", "Core", "mbl[MB/s]", "MBT[MB/s]"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(MbmLoader::bandwidth_column(&header).unwrap(), Some(3));
        assert_eq!(MbmLoader::bandwidth_column(&header[..3]).unwrap(), Some(2));
        assert_eq!(MbmLoader::bandwidth_column(&header[..2]).unwrap(), None);
    }

    #[test]
    fn test_quoted_core_lists_with_commas() {
        let text = "\
Time,Core,MBT[MB/s]
2024-03-05 10:00:00.000,\"0,2\",100.0
2024-03-05 10:00:00.000,\"1,3\",300.0
";
        let parsed = loader(&[0, 2]).parse(text, Path::new("q.csv")).unwrap();
        assert_eq!(parsed.samples[0].get(Field::MbmWorkload), Some(100.0));
        assert_eq!(parsed.samples[0].get(Field::MbmAllcores), Some(400.0));
    }

    #[test]
    fn test_prefers_transactions_column() {
        let text = "\
Time,Core,IPC,MBL[MB/s],MBR[MB/s],MBT[MB/s]
2024-03-05 10:00:00.000,0,1.0,80.0,20.0,100.0
2024-03-05 10:00:00.000,1-3,1.0,250.0,50.0,300.0
";
        let parsed = loader(&[0]).parse(text, Path::new("q.csv")).unwrap();
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].get(Field::MbmWorkload), Some(100.0));
        assert_eq!(parsed.samples[0].get(Field::MbmAllcores), Some(400.0));
    }

    #[test]
    fn test_falls_back_to_local_column() {
        let text = "\
Time,Core,MBL[MB/s],MBR[MB/s]
2024-03-05 10:00:00.000,0,80.0,20.0
2024-03-05 10:00:00.000,1,120.0,30.0
";
        let parsed = loader(&[0]).parse(text, Path::new("q.csv")).unwrap();
        assert_eq!(parsed.samples[0].get(Field::MbmWorkload), Some(80.0));
        assert_eq!(parsed.samples[0].get(Field::MbmAllcores), Some(200.0));
    }

    #[test]
    fn test_remote_only_is_schema_error() {
        let text = "Time,Core,MBR[MB/s]\n2024-03-05 10:00:00,0,1.0\n";
        let err = loader(&[0]).parse(text, Path::new("q.csv")).unwrap_err();
        assert!(matches!(err, ParseError::Schema { .. }));
    }

    #[test]
    fn test_whole_second_intervals_get_fractional_offsets() {
        let text = "\
Time,Core,MBT[MB/s]
2024-03-05 10:00:00,0,10
2024-03-05 10:00:00,1,20
2024-03-05 10:00:00,0,30
2024-03-05 10:00:00,1,40
2024-03-05 10:00:01,0,50
2024-03-05 10:00:01,1,60
";
        let parsed = loader(&[0]).parse(text, Path::new("q.csv")).unwrap();
        assert_eq!(parsed.samples.len(), 3);
        let t0 = parsed.samples[0].timestamp;
        assert!((parsed.samples[1].timestamp - t0 - 0.5).abs() < 1e-6);
        assert!((parsed.samples[2].timestamp - t0 - 1.0).abs() < 1e-6);
        assert_eq!(parsed.samples[1].get(Field::MbmWorkload), Some(30.0));
        assert_eq!(parsed.samples[1].get(Field::MbmAllcores), Some(70.0));
    }

    #[test]
    fn test_subsecond_duplicates_keep_maximum() {
        let text = "\
Time,Core,MBT[MB/s]
2024-03-05 10:00:00.500,0,10
2024-03-05 10:00:00.500,0,12
2024-03-05 10:00:00.500,1,20
";
        let parsed = loader(&[0]).parse(text, Path::new("q.csv")).unwrap();
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].get(Field::MbmWorkload), Some(12.0));
        assert_eq!(parsed.samples[0].get(Field::MbmAllcores), Some(32.0));
    }

    #[test]
    fn test_workload_group_absent_counts_zero() {
        let text = "\
Time,Core,MBT[MB/s]
2024-03-05 10:00:00.000,1,20
";
        let parsed = loader(&[0]).parse(text, Path::new("q.csv")).unwrap();
        assert_eq!(parsed.samples[0].get(Field::MbmWorkload), Some(0.0));
    }

    #[test]
    fn test_bad_rows_skipped() {
        let text = "\
Time,Core,MBT[MB/s]
2024-03-05 10:00:00.000,0,nan
,0,5
2024-03-05 10:00:00.000,,5
garbage,0,5
";
        let parsed = loader(&[0]).parse(text, Path::new("q.csv")).unwrap();
        assert!(parsed.samples.is_empty());
        assert_eq!(parsed.skipped, 4);
    }
}
