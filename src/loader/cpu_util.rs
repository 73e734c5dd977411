// turbostat log: CPU busy percentage and busy frequency
//
// turbostat prints one table per interval. Each table starts with a header
// line naming its columns (`Time_Of_Day_Seconds CPU Busy% Bzy_MHz ...`),
// followed by a `-` summary row and one row per CPU.

use super::{Parsed, SourceLoader};
use crate::config::AttributionConfig;
use crate::csv_row::{parse_number, split_record};
use crate::error::ParseError;
use crate::sample::{Field, RawSample, SourceKind};
use std::collections::HashSet;
use std::path::Path;

const BUSY_COLUMN: &str = "Busy%";
const MHZ_COLUMN: &str = "Bzy_MHz";
const CPU_COLUMN: &str = "CPU";
const TIME_COLUMN: &str = "Time_Of_Day_Seconds";
const SUMMARY_CPU: &str = "-";

/// Column positions of one turbostat header line
#[derive(Debug, Clone, PartialEq)]
struct BlockHeader {
    comma_separated: bool,
    width: usize,
    busy: usize,
    mhz: usize,
    cpu: Option<usize>,
    time: Option<usize>,
}

impl BlockHeader {
    fn detect(line: &str) -> Option<Self> {
        let comma_separated = line.contains(',');
        let cells = split_cells(line, comma_separated);
        let find = |name: &str| cells.iter().position(|c| c == name);
        Some(Self {
            comma_separated,
            width: cells.len(),
            busy: find(BUSY_COLUMN)?,
            mhz: find(MHZ_COLUMN)?,
            cpu: find(CPU_COLUMN),
            time: find(TIME_COLUMN),
        })
    }
}

fn split_cells(line: &str, comma_separated: bool) -> Vec<String> {
    if comma_separated {
        match split_record(line) {
            Ok(cells) => cells.into_iter().map(|c| c.trim().to_string()).collect(),
            Err(err) => {
                tracing::debug!("turbostat: unreadable line skipped: {err}");
                Vec::new()
            }
        }
    } else {
        line.split_whitespace().map(str::to_string).collect()
    }
}

#[derive(Debug, Default)]
struct Block {
    rows: Vec<Vec<String>>,
    cpus: HashSet<String>,
}

/// One interval's measurement for the workload CPU
#[derive(Debug, Clone, Copy, PartialEq)]
struct BlockReading {
    busy_percent: f64,
    frequency_mhz: f64,
    time_of_day: Option<f64>,
}

/// Loader for turbostat text output
#[derive(Debug, Clone)]
pub struct CpuUtilLoader {
    workload_cpu: u32,
    reference_max_mhz: Option<f64>,
    interval_sec: f64,
}

impl CpuUtilLoader {
    pub fn new(config: &AttributionConfig) -> Self {
        Self {
            workload_cpu: config.workload_cpu(),
            reference_max_mhz: config.reference_max_mhz,
            interval_sec: config.cpu_interval_sec,
        }
    }

    /// Split the log into (header, block) pairs
    ///
    /// A block ends at the next header line, or when a CPU id repeats (logs
    /// written with a single header).
    fn blocks(text: &str) -> Vec<(BlockHeader, Block)> {
        let mut blocks = Vec::new();
        let mut current: Option<(BlockHeader, Block)> = None;

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(header) = BlockHeader::detect(line) {
                if let Some(done) = current.take() {
                    blocks.push(done);
                }
                current = Some((header, Block::default()));
                continue;
            }
            let Some((header, block)) = current.as_mut() else {
                continue;
            };
            let cells = split_cells(line, header.comma_separated);
            if cells.len() < header.width {
                continue;
            }
            if let Some(cpu_idx) = header.cpu {
                let cpu = cells[cpu_idx].clone();
                if block.cpus.contains(&cpu) {
                    let header = header.clone();
                    if let Some(done) = current.take() {
                        blocks.push(done);
                    }
                    let mut fresh = Block::default();
                    fresh.cpus.insert(cpu);
                    fresh.rows.push(cells);
                    current = Some((header, fresh));
                    continue;
                }
                block.cpus.insert(cpu);
            }
            block.rows.push(cells);
        }
        if let Some(done) = current {
            blocks.push(done);
        }
        blocks
    }

    /// Highest busy frequency over every row of every block, summary rows
    /// included
    fn max_observed_mhz(blocks: &[(BlockHeader, Block)]) -> f64 {
        blocks
            .iter()
            .flat_map(|(header, block)| {
                block
                    .rows
                    .iter()
                    .filter_map(move |row| parse_number(&row[header.mhz]))
            })
            .filter(|mhz| mhz.is_finite())
            .fold(0.0, f64::max)
    }

    fn reading(&self, header: &BlockHeader, block: &Block) -> Option<BlockReading> {
        let row = match header.cpu {
            Some(cpu_idx) => {
                let wanted = self.workload_cpu.to_string();
                block
                    .rows
                    .iter()
                    .find(|r| r[cpu_idx] == wanted)
                    .or_else(|| block.rows.iter().find(|r| r[cpu_idx] == SUMMARY_CPU))?
            }
            None => block.rows.first()?,
        };
        let busy_percent = parse_number(&row[header.busy]).filter(|v| v.is_finite())?;
        let frequency_mhz = parse_number(&row[header.mhz]).filter(|v| v.is_finite())?;
        let time_of_day = header
            .time
            .and_then(|i| parse_number(&row[i]))
            .filter(|v| v.is_finite());
        Some(BlockReading {
            busy_percent,
            frequency_mhz,
            time_of_day,
        })
    }
}

impl SourceLoader for CpuUtilLoader {
    fn kind(&self) -> SourceKind {
        SourceKind::CpuUtil
    }

    fn parse(&self, text: &str, path: &Path) -> Result<Parsed, ParseError> {
        let blocks = Self::blocks(text);
        if blocks.is_empty() {
            return Err(ParseError::Schema {
                kind: SourceKind::CpuUtil,
                path: path.to_path_buf(),
                reason: format!("no header line with `{BUSY_COLUMN}` and `{MHZ_COLUMN}`"),
            });
        }

        let readings: Vec<(usize, Option<BlockReading>)> = blocks
            .iter()
            .enumerate()
            .map(|(i, (header, block))| (i, self.reading(header, block)))
            .collect();
        let skipped = readings.iter().filter(|(_, r)| r.is_none()).count();

        let reference = self
            .reference_max_mhz
            .unwrap_or_else(|| Self::max_observed_mhz(&blocks));
        if reference <= 0.0 {
            tracing::warn!("turbostat: no positive reference frequency; cpu_share will be 0");
        } else {
            tracing::debug!("turbostat: reference frequency {reference:.1} MHz");
        }

        let origin = readings
            .iter()
            .find_map(|(_, r)| r.and_then(|r| r.time_of_day))
            .unwrap_or(0.0);
        let samples = readings
            .into_iter()
            .filter_map(|(block_idx, reading)| {
                let reading = reading?;
                let timestamp = reading
                    .time_of_day
                    .unwrap_or(origin + block_idx as f64 * self.interval_sec);
                let cpu_share = if reference > 0.0 {
                    (reading.busy_percent / 100.0) * (reading.frequency_mhz / reference)
                } else {
                    0.0
                };
                Some(
                    RawSample::new(SourceKind::CpuUtil, timestamp)
                        .with(Field::BusyPercent, reading.busy_percent)
                        .with(Field::FrequencyMhz, reading.frequency_mhz)
                        .with(Field::CpuShare, cpu_share),
                )
            })
            .collect();

        if skipped > 0 {
            tracing::info!("turbostat: {skipped} block(s) without a usable workload row");
        }
        Ok(Parsed { samples, skipped })
    }
}
