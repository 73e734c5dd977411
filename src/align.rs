//! Alignment of independently sampled sources onto the power-table axis
//!
//! The anchor (pcm-power) defines one [`AlignedSample`] per row. For every
//! other source the latest same-or-earlier record within
//! `align_tolerance_sec` is joined; otherwise its fields stay missing.
//! A looser `stale_tolerance_sec` only feeds the live/stale diagnostics.

use crate::config::{AttributionConfig, TimeBase};
use crate::error::AlignmentError;
use crate::loader::rebase_to_elapsed;
use crate::sample::{AlignedSample, Field, RawSample, SourceKind};
use serde::Serialize;

/// Slack for floating-point noise in timestamp differences
const TIME_SLACK_SEC: f64 = 1e-9;

/// Per-source join statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCoverage {
    pub kind: SourceKind,
    /// Records available for joining
    pub records: usize,
    /// Anchor samples that received a record
    pub joined: usize,
    /// Anchor samples with a record within the staleness window
    pub live: usize,
    /// Anchor samples with no record within the staleness window
    pub stale: usize,
    /// Anchor samples whose fields stay missing for this source
    pub absent: usize,
}

impl SourceCoverage {
    pub fn live_ratio(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.live as f64 / total as f64
        }
    }
}

/// Output of the aligner
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub samples: Vec<AlignedSample>,
    pub coverage: Vec<SourceCoverage>,
}

/// Joins non-anchor series onto the anchor axis
#[derive(Debug, Clone)]
pub struct Aligner<'a> {
    config: &'a AttributionConfig,
}

impl<'a> Aligner<'a> {
    pub fn new(config: &'a AttributionConfig) -> Self {
        Self { config }
    }

    /// Build the sample axis
    ///
    /// `others` holds one series per non-anchor source; an empty series is
    /// a normal condition and leaves that source's fields missing.
    pub fn align(
        &self,
        mut anchor: Vec<RawSample>,
        others: Vec<(SourceKind, Vec<RawSample>)>,
    ) -> Result<Alignment, AlignmentError> {
        if anchor.is_empty() {
            return Err(AlignmentError::EmptyAnchor);
        }
        if self.config.time_base == TimeBase::Elapsed {
            rebase_to_elapsed(&mut anchor);
        }

        let mut samples = Vec::with_capacity(anchor.len());
        let mut previous = f64::NEG_INFINITY;
        let mut reordered = 0;
        for (index, raw) in anchor.iter().enumerate() {
            let mut timestamp = raw.timestamp;
            if timestamp < previous {
                reordered += 1;
                timestamp = previous;
            }
            previous = timestamp;

            let mut sample = AlignedSample::new(index, timestamp);
            for field in Field::ALIGNED {
                if let Some(value) = raw.get(field) {
                    sample.set(field, Some(value));
                }
            }
            samples.push(sample);
        }
        if reordered > 0 {
            tracing::warn!(
                "pcm-power: {reordered} timestamp(s) went backwards; held at previous value"
            );
        }

        let mut coverage = Vec::with_capacity(others.len());
        for (kind, mut series) in others {
            series.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            if self.config.time_base == TimeBase::Elapsed {
                rebase_to_elapsed(&mut series);
            }
            let stats = self.join(kind, &series, &mut samples);
            self.log_coverage(&stats, samples.len());
            coverage.push(stats);
        }

        Ok(Alignment { samples, coverage })
    }

    fn join(
        &self,
        kind: SourceKind,
        series: &[RawSample],
        samples: &mut [AlignedSample],
    ) -> SourceCoverage {
        let times: Vec<f64> = series.iter().map(|s| s.timestamp).collect();
        let mut stats = SourceCoverage {
            kind,
            records: series.len(),
            joined: 0,
            live: 0,
            stale: 0,
            absent: 0,
        };

        for sample in samples.iter_mut() {
            let t = sample.timestamp;
            // first record strictly after t
            let after = times.partition_point(|&x| x <= t);

            if let Some(at_or_before) = after.checked_sub(1) {
                if t - times[at_or_before] <= self.config.align_tolerance_sec + TIME_SLACK_SEC {
                    stats.joined += 1;
                    for (&field, &value) in &series[at_or_before].fields {
                        sample.set(field, Some(value));
                    }
                }
            }

            let nearest = [after.checked_sub(1), Some(after)]
                .into_iter()
                .flatten()
                .filter_map(|i| times.get(i))
                .map(|&x| (x - t).abs())
                .fold(f64::INFINITY, f64::min);
            if nearest <= self.config.stale_tolerance_sec + TIME_SLACK_SEC {
                stats.live += 1;
            } else {
                stats.stale += 1;
            }
        }
        stats.absent = samples.len() - stats.joined;
        stats
    }

    fn log_coverage(&self, stats: &SourceCoverage, total: usize) {
        tracing::info!(
            "alignment {}: records={}, joined={}, live={}, stale={}, absent={}",
            stats.kind,
            stats.records,
            stats.joined,
            stats.live,
            stats.stale,
            stats.absent
        );
        if stats.records == 0 {
            return;
        }
        let ratio = stats.live_ratio(total);
        if ratio < self.config.coverage_warn_ratio {
            tracing::warn!(
                "{} live coverage = {}/{} = {:.1}% (<{:.0}%)",
                stats.kind,
                stats.live,
                total,
                ratio * 100.0,
                self.config.coverage_warn_ratio * 100.0
            );
        }
    }
}
