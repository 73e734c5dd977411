//! wattrib - workload attribution of package and DRAM power
//!
//! This library joins independently sampled measurement logs (pcm-power,
//! pcm-memory, turbostat and pqos MBM) onto the power table's sample axis,
//! fills single-sample gaps and apportions package and DRAM power to the
//! workload. Results are written back atomically: two columns appended to
//! the power table plus a per-sample attribution table.

pub mod align;
pub mod attribution;
pub mod cli;
pub mod config;
pub mod csv_row;
pub mod error;
pub mod gap_fill;
pub mod loader;
pub mod pipeline;
pub mod sample;
pub mod writer;
