// Workload attribution of package and DRAM power
//
// Package (non-DRAM) power follows the workload's CPU busy x frequency share.
// DRAM power follows its share of memory bandwidth, where bandwidth the
// system-wide meter sees but MBM misses ("gray") is apportioned in the same
// proportion as the workload's monitored share.

mod engine;
mod sanity;

pub use engine::{
    attribute, check_means, Attribution, AttributionEngine, AttributionInputs, AttributionOutcome,
    FallbackReport,
};
pub use sanity::{enforce, RawShares};
