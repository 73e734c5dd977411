//! Single-sample gap filling on the aligned axis
//!
//! A lone missing sample between two present ones becomes the mean of its
//! neighbours; at either end of the axis it repeats its only neighbour.
//! Runs of two or more missing samples stay missing so no trend is invented
//! from sparse data; the engine later maps them to its fallbacks.

use crate::sample::{AlignedSample, Field};
use serde::Serialize;

/// What the filler did to one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapFillReport {
    pub field: Field,
    /// Single-sample gaps filled
    pub filled: usize,
    /// Samples still missing afterwards
    pub unresolved: usize,
}

/// Fill single-sample gaps in place; returns `(filled, unresolved)`
///
/// Decisions are made against the unfilled input, so a filled value never
/// serves as the neighbour of another gap.
pub fn fill_series(values: &mut [Option<f64>]) -> (usize, usize) {
    let original: Vec<Option<f64>> = values.to_vec();
    let n = original.len();
    let mut filled = 0;
    let mut unresolved = 0;

    for i in 0..n {
        if original[i].is_some() {
            continue;
        }
        let left = if i > 0 { Some(original[i - 1]) } else { None };
        let right = original.get(i + 1).copied();
        let value = match (left, right) {
            (Some(Some(l)), Some(Some(r))) => Some(0.5 * (l + r)),
            (None, Some(Some(r))) => Some(r),
            (Some(Some(l)), None) => Some(l),
            _ => None,
        };
        match value {
            Some(v) => {
                values[i] = Some(v);
                filled += 1;
            }
            None => unresolved += 1,
        }
    }
    (filled, unresolved)
}

/// Applies [`fill_series`] to every aligned field
#[derive(Debug, Clone, Default)]
pub struct GapFiller;

impl GapFiller {
    pub fn new() -> Self {
        Self
    }

    /// Fill every field once, before attribution
    pub fn fill(&self, samples: &mut [AlignedSample]) -> Vec<GapFillReport> {
        Field::ALIGNED
            .iter()
            .map(|&field| {
                let mut column: Vec<Option<f64>> = samples.iter().map(|s| s.get(field)).collect();
                let (filled, unresolved) = fill_series(&mut column);
                for (sample, value) in samples.iter_mut().zip(&column) {
                    sample.set(field, *value);
                }

                let preview = |values: &mut dyn Iterator<Item = &Option<f64>>| -> Vec<String> {
                    values
                        .take(3)
                        .map(|v| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}")))
                        .collect()
                };
                tracing::debug!(
                    "fill {field}: interpolated={filled}, unresolved={unresolved}, first3={:?}, last3={:?}",
                    preview(&mut column.iter()),
                    preview(&mut column.iter().rev())
                );
                if unresolved > 0 {
                    tracing::info!(
                        "fill {field}: {unresolved} sample(s) in multi-sample gaps left missing"
                    );
                }
                GapFillReport {
                    field,
                    filled,
                    unresolved,
                }
            })
            .collect()
    }
}
