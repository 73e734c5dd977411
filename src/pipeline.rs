//! End-to-end attribution run
//!
//! Loaders run in parallel (fork-join), then the aligner, gap filler, engine
//! and writer run in sequence, each taking ownership of the previous stage's
//! output.

use crate::align::{Aligner, SourceCoverage};
use crate::attribution::{AttributionEngine, AttributionOutcome, FallbackReport};
use crate::config::{AttributionConfig, SourcePaths};
use crate::error::{AlignmentError, AttribError, ParseError, SanityWarning};
use crate::gap_fill::{GapFillReport, GapFiller};
use crate::loader::{
    CpuUtilLoader, LoadOutcome, MbmLoader, MemBandwidthLoader, PowerTable, PowerTableLoader,
    SourceLoader,
};
use crate::sample::{RawSample, SourceKind};
use crate::writer::{write_outputs, AuditReport, Summary};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything the loaders produced
#[derive(Debug)]
pub struct LoadedSources {
    pub power: Result<(PowerTable, Vec<RawSample>), ParseError>,
    /// Optional sources in the order pcm-memory, turbostat, pqos
    pub others: Vec<LoadOutcome>,
}

const OPTIONAL_SOURCES: [SourceKind; 3] = [SourceKind::MemBandwidth, SourceKind::CpuUtil, SourceKind::Mbm];

impl LoadedSources {
    fn panicked() -> Self {
        Self {
            power: Err(ParseError::LoaderPanicked(SourceKind::PkgPower)),
            others: OPTIONAL_SOURCES
                .iter()
                .map(|&kind| LoadOutcome::empty(kind, ParseError::LoaderPanicked(kind)))
                .collect(),
        }
    }
}

/// Load all four sources concurrently and join before returning
pub fn load_all(config: &AttributionConfig, paths: &SourcePaths) -> LoadedSources {
    let power_loader = PowerTableLoader::new(config);
    let mem_bandwidth = MemBandwidthLoader::new(config);
    let cpu_util = CpuUtilLoader::new(config);
    let mbm = MbmLoader::new(config);
    let optional: [(&dyn SourceLoader, Option<&Path>); 3] = [
        (&mem_bandwidth, paths.mem_bandwidth.as_deref()),
        (&cpu_util, paths.cpu_util.as_deref()),
        (&mbm, paths.mbm.as_deref()),
    ];

    let joined = crossbeam::thread::scope(|scope| {
        let power = scope.spawn(|_| power_loader.load(&paths.power));
        let handles: Vec<_> = optional
            .iter()
            .map(|&(loader, path)| (loader.kind(), scope.spawn(move |_| loader.load(path))))
            .collect();

        let power = power.join().unwrap_or_else(|_| {
            tracing::error!("pcm-power loader panicked");
            Err(ParseError::LoaderPanicked(SourceKind::PkgPower))
        });
        let others = handles
            .into_iter()
            .map(|(kind, handle)| {
                handle.join().unwrap_or_else(|_| {
                    tracing::error!("{kind} loader panicked; continuing without it");
                    LoadOutcome::empty(kind, ParseError::LoaderPanicked(kind))
                })
            })
            .collect();
        LoadedSources { power, others }
    });
    joined.unwrap_or_else(|_| LoadedSources::panicked())
}

/// Output of align + fill + attribute, before anything is written
#[derive(Debug, Clone)]
pub struct Attributed {
    pub coverage: Vec<SourceCoverage>,
    pub gap_fill: Vec<GapFillReport>,
    pub outcome: AttributionOutcome,
}

/// Align, gap-fill and attribute already loaded series
pub fn attribute_series(
    config: &AttributionConfig,
    anchor: Vec<RawSample>,
    others: Vec<(SourceKind, Vec<RawSample>)>,
) -> Result<Attributed, AlignmentError> {
    let alignment = Aligner::new(config).align(anchor, others)?;
    let mut samples = alignment.samples;
    let gap_fill = GapFiller::new().fill(&mut samples);
    let outcome = AttributionEngine::new(config).run(samples);
    Ok(Attributed {
        coverage: alignment.coverage,
        gap_fill,
        outcome,
    })
}

/// Per-source load result as reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub records: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    fn from_outcome(outcome: &LoadOutcome, path: Option<&Path>) -> Self {
        Self {
            kind: outcome.kind,
            path: path.map(Path::to_path_buf),
            records: outcome.samples.len(),
            skipped: outcome.skipped,
            error: outcome.error.as_ref().map(ToString::to_string),
        }
    }
}

/// What a successful run did, for logs and `--report-json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub power_table: PathBuf,
    pub attrib_out: PathBuf,
    pub samples: usize,
    pub sources: Vec<SourceReport>,
    pub coverage: Vec<SourceCoverage>,
    pub gap_fill: Vec<GapFillReport>,
    pub fallbacks: Vec<FallbackReport>,
    pub warnings: Vec<SanityWarning>,
    pub mean_warnings: Vec<String>,
    pub summary: Summary,
    pub summary_line: String,
    pub audit: AuditReport,
}

/// Run the whole pipeline
///
/// Fails only on invalid configuration, an unusable anchor or a failed
/// write; nothing is written unless attribution succeeded.
pub fn run(config: &AttributionConfig, paths: &SourcePaths) -> Result<RunReport, AttribError> {
    config.validate()?;

    let loaded = load_all(config, paths);
    let (table, anchor) = loaded.power.map_err(AlignmentError::AnchorUnusable)?;

    let optional_paths = [
        paths.mem_bandwidth.as_deref(),
        paths.cpu_util.as_deref(),
        paths.mbm.as_deref(),
    ];
    let mut sources = vec![SourceReport {
        kind: SourceKind::PkgPower,
        path: Some(paths.power.clone()),
        records: anchor.len(),
        skipped: 0,
        error: None,
    }];
    sources.extend(
        loaded
            .others
            .iter()
            .zip(optional_paths)
            .map(|(outcome, path)| SourceReport::from_outcome(outcome, path)),
    );

    let others = loaded
        .others
        .into_iter()
        .map(|outcome| (outcome.kind, outcome.samples))
        .collect();
    let attributed = attribute_series(config, anchor, others)?;
    let outcome = attributed.outcome;

    let summary = Summary::from_samples(&outcome.samples);
    let summary_line = summary.to_string();
    tracing::info!("{summary_line}");

    let audit = write_outputs(&table, &outcome.samples, &paths.attrib_out)?;

    Ok(RunReport {
        power_table: paths.power.clone(),
        attrib_out: paths.attrib_out.clone(),
        samples: outcome.samples.len(),
        sources,
        coverage: attributed.coverage,
        gap_fill: attributed.gap_fill,
        fallbacks: outcome.fallbacks,
        warnings: outcome.warnings,
        mean_warnings: outcome.mean_warnings,
        summary,
        summary_line,
        audit,
    })
}
