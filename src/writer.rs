//! Output stage: attribution table, in-place power-table rewrite, summary
//!
//! Every file is written to a temporary sibling, synced and renamed over the
//! target, so a failed run leaves the previous contents in place.

use crate::csv_row::{format_row, parse_number, read_table};
use crate::error::WriteError;
use crate::loader::{PowerTable, ACTUAL_DRAM_WATTS, ACTUAL_WATTS};
use crate::sample::AttributedSample;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column order of the attribution table
pub const ATTRIB_HEADER: [&str; 12] = [
    "sample",
    "pkg_watts_total",
    "dram_watts_total",
    "imc_bw_MBps_total",
    "mbm_workload_MBps",
    "mbm_allcores_MBps",
    "cpu_share",
    "mbm_share",
    "gray_bw_MBps",
    "workload_attrib_bw_MBps",
    "pkg_attr_watts",
    "dram_attr_watts",
];

/// Share of rows that must carry numeric attribution cells after a rewrite
const AUDIT_NUMERIC_RATIO: f64 = 0.99;

fn watts(value: f64) -> String {
    format!("{value:.6}")
}

/// Render the attribution table, one row per sample
pub fn format_attribution_csv(samples: &[AttributedSample]) -> String {
    let mut out = String::new();
    out.push_str(&format_row(&ATTRIB_HEADER));
    out.push('\n');
    for s in samples {
        let mut cells = Vec::with_capacity(ATTRIB_HEADER.len());
        cells.push(s.index.to_string());
        cells.extend(
            [
                s.pkg_watts_total,
                s.dram_watts_total,
                s.imc_bw_mbps_total,
                s.mbm_workload_mbps,
                s.mbm_allcores_mbps,
                s.cpu_share,
                s.mbm_share,
                s.gray_bw_mbps,
                s.workload_attrib_bw_mbps,
                s.pkg_attr_watts,
                s.dram_attr_watts,
            ]
            .into_iter()
            .map(watts),
        );
        out.push_str(&format_row(&cells));
        out.push('\n');
    }
    out
}

/// Render the power table with the two attribution columns appended
///
/// Group labels of the new columns repeat the package column's group.
pub fn render_power_table(table: &PowerTable, samples: &[AttributedSample]) -> String {
    let group = table.pkg_group_label().to_string();
    let width = table.header_bottom.len();

    let mut top = table.header_top.clone();
    top.resize(width, String::new());
    top.extend([group.clone(), group]);
    let mut bottom = table.header_bottom.clone();
    bottom.extend([ACTUAL_WATTS.to_string(), ACTUAL_DRAM_WATTS.to_string()]);

    let mut out = String::new();
    for header in [&top, &bottom] {
        out.push_str(&format_row(header));
        out.push('\n');
    }
    for (i, row) in table.rows.iter().enumerate() {
        let mut cells = row.clone();
        cells.resize(width, String::new());
        let (pkg, dram) = samples
            .get(i)
            .map_or((0.0, 0.0), |s| (s.pkg_attr_watts, s.dram_attr_watts));
        cells.push(watts(pkg));
        cells.push(watts(dram));
        out.push_str(&format_row(&cells));
        out.push('\n');
    }

    tracing::debug!(
        "writeback: pre_shape={}x{}, post_shape={}x{}, ghost_dropped={}, replaced={}",
        table.rows.len(),
        width,
        table.rows.len(),
        bottom.len(),
        table.schema.ghost_columns,
        table.schema.replaced_columns
    );
    out
}

/// A synced temporary sibling of `target`, ready to be renamed over it
///
/// Dropping it without [`StagedFile::commit`] removes the temporary file and
/// leaves `target` untouched.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    tmp: tempfile::NamedTempFile,
    bytes: u64,
}

impl StagedFile {
    /// Write `contents` next to `path`, sync it and copy over the target's
    /// mode bits (and, as root, its owner) when the target exists
    pub fn stage(path: &Path, contents: &[u8]) -> Result<Self, WriteError> {
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|source| WriteError::TempFile {
                dir: parent.to_path_buf(),
                source,
            })?;

        let write_err = |source| WriteError::Write {
            path: path.to_path_buf(),
            source,
        };
        tmp.write_all(contents).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        let bytes = tmp.as_file().metadata().map_err(write_err)?.len();
        if bytes == 0 {
            return Err(WriteError::EmptyTemp {
                path: path.to_path_buf(),
            });
        }

        match std::fs::metadata(path) {
            Ok(original) => restore_ownership(tmp.path(), &original),
            Err(_) => set_new_file_mode(tmp.path()),
        }
        Ok(Self {
            target: path.to_path_buf(),
            tmp,
            bytes,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temporary file over the target
    pub fn commit(self) -> Result<(), WriteError> {
        let Self { target, tmp, bytes } = self;
        tmp.persist(&target).map_err(|err| WriteError::Rename {
            path: target.clone(),
            source: err.error,
        })?;
        tracing::debug!("wrote {} ({bytes} bytes)", target.display());
        Ok(())
    }
}

/// Replace `path` with `contents` via a synced temporary file in the same
/// directory
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), WriteError> {
    StagedFile::stage(path, contents)?.commit()
}

#[cfg(unix)]
fn restore_ownership(tmp: &Path, original: &std::fs::Metadata) {
    use nix::unistd::{chown, geteuid, Gid, Uid};
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let mode = original.mode() & 0o777;
    if let Err(err) = std::fs::set_permissions(tmp, std::fs::Permissions::from_mode(mode)) {
        tracing::warn!("failed to restore permissions {mode:o}: {err}");
    }
    if geteuid().is_root() {
        let owner = Some(Uid::from_raw(original.uid()));
        let group = Some(Gid::from_raw(original.gid()));
        if let Err(err) = chown(tmp, owner, group) {
            tracing::warn!("failed to restore ownership: {err}");
        }
    }
}

/// Temporary files are created 0600; a brand-new output gets 0644
#[cfg(unix)]
fn set_new_file_mode(tmp: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = std::fs::set_permissions(tmp, std::fs::Permissions::from_mode(0o644)) {
        tracing::warn!("failed to set permissions on new output: {err}");
    }
}

#[cfg(not(unix))]
fn set_new_file_mode(_tmp: &Path) {}

#[cfg(not(unix))]
fn restore_ownership(tmp: &Path, original: &std::fs::Metadata) {
    if let Err(err) = std::fs::set_permissions(tmp, original.permissions()) {
        tracing::warn!("failed to restore permissions: {err}");
    }
}

/// Result of re-reading the rewritten power table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub passed: bool,
    pub rows: usize,
    pub numeric_rows: usize,
    /// Why the audit failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Check that the rewritten table ends in the attribution columns and that
/// they hold numbers
pub fn audit_power_table(path: &Path) -> AuditReport {
    let failed = |detail: String, rows: usize, numeric_rows: usize| {
        tracing::error!("write-back audit failed: {detail}");
        AuditReport {
            passed: false,
            rows,
            numeric_rows,
            detail: Some(detail),
        }
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => return failed(format!("cannot re-read {}: {err}", path.display()), 0, 0),
    };
    let mut table = match read_table(&text) {
        Ok(table) => table,
        Err(err) => return failed(format!("cannot parse {}: {err}", path.display()), 0, 0),
    };
    if table.len() < 2 {
        return failed("insufficient header rows".to_string(), 0, 0);
    }
    let data = table.split_off(2);
    let mut bottom = table.pop().unwrap_or_default();
    let mut top = table.pop().unwrap_or_default();
    let mut width = bottom.len();
    while width > 0
        && bottom.last().is_some_and(|c| c.is_empty())
        && top.last().map_or(true, |c| c.is_empty())
    {
        bottom.pop();
        top.pop();
        width -= 1;
    }

    let tail: Vec<&str> = bottom.iter().rev().take(2).rev().map(String::as_str).collect();
    if tail != [ACTUAL_WATTS, ACTUAL_DRAM_WATTS] {
        return failed(format!("tail(header2)={tail:?}"), data.len(), 0);
    }

    let numeric = |row: &[String], idx: usize| {
        row.get(idx)
            .and_then(|c| parse_number(c))
            .is_some_and(f64::is_finite)
    };
    let numeric_rows = data
        .iter()
        .filter(|row| numeric(row, width - 2) && numeric(row, width - 1))
        .count();
    let ratio = if data.is_empty() {
        1.0
    } else {
        numeric_rows as f64 / data.len() as f64
    };
    if ratio < AUDIT_NUMERIC_RATIO {
        return failed(
            format!("non-numeric cells found (count={})", data.len() - numeric_rows),
            data.len(),
            numeric_rows,
        );
    }

    tracing::info!(
        "appended columns: {ACTUAL_WATTS}, {ACTUAL_DRAM_WATTS} (rows={}, cols={width})",
        data.len()
    );
    AuditReport {
        passed: true,
        rows: data.len(),
        numeric_rows,
        detail: None,
    }
}

/// Arithmetic means of the numeric attribution columns
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub pkg_total: f64,
    pub dram_total: f64,
    pub pkg_attr: f64,
    pub dram_attr: f64,
    pub gray_mbps: f64,
    pub imc_mbps: f64,
    pub mbm_workload_mbps: f64,
    pub mbm_allcores_mbps: f64,
}

impl Summary {
    pub fn from_samples(samples: &[AttributedSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = |f: fn(&AttributedSample) -> f64| samples.iter().map(f).sum::<f64>() / n;
        Self {
            pkg_total: mean(|s| s.pkg_watts_total),
            dram_total: mean(|s| s.dram_watts_total),
            pkg_attr: mean(|s| s.pkg_attr_watts),
            dram_attr: mean(|s| s.dram_attr_watts),
            gray_mbps: mean(|s| s.gray_bw_mbps),
            imc_mbps: mean(|s| s.imc_bw_mbps_total),
            mbm_workload_mbps: mean(|s| s.mbm_workload_mbps),
            mbm_allcores_mbps: mean(|s| s.mbm_allcores_mbps),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ATTRIB mean: pkg_total={:.3}, dram_total={:.3}, pkg_attr={:.3}, dram_attr={:.3}, \
             gray_MBps={:.3}, imc_MBps={:.3}, mbm_workload_MBps={:.3}, mbm_allcores_MBps={:.3}",
            self.pkg_total,
            self.dram_total,
            self.pkg_attr,
            self.dram_attr,
            self.gray_mbps,
            self.imc_mbps,
            self.mbm_workload_mbps,
            self.mbm_allcores_mbps
        )
    }
}

/// Write both outputs, then audit the rewrite
///
/// Both files are staged before either target is replaced, so a failure
/// while preparing one leaves the previous contents of both in place.
pub fn write_outputs(
    table: &PowerTable,
    samples: &[AttributedSample],
    attrib_out: &Path,
) -> Result<AuditReport, WriteError> {
    let attribution = StagedFile::stage(attrib_out, format_attribution_csv(samples).as_bytes())?;
    let rewritten = StagedFile::stage(&table.path, render_power_table(table, samples).as_bytes())?;

    attribution.commit()?;
    tracing::info!(
        "wrote attribution summary: rows={} path={}",
        samples.len(),
        attrib_out.display()
    );
    rewritten.commit()?;
    Ok(audit_power_table(&table.path))
}
