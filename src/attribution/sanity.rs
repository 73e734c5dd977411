// Post-attribution invariant re-check
//
// Every invariant is re-checked on the finished sample. Values are always
// clamped into range; only violations larger than epsilon become warnings.

use crate::error::{Invariant, SanityWarning};
use crate::sample::AttributedSample;

/// Share values as computed, before any clamping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawShares {
    pub cpu_share: f64,
    pub mbm_share: f64,
}

struct Checker {
    index: usize,
    eps: f64,
    warnings: Vec<SanityWarning>,
}

impl Checker {
    fn bound(&mut self, invariant: Invariant, raw: f64, value: &mut f64, lo: f64, hi: f64) {
        let clamped = if raw.is_nan() { lo } else { raw.clamp(lo, hi) };
        if raw.is_nan() || raw < lo - self.eps || raw > hi + self.eps {
            self.report(invariant, raw, clamped);
        }
        *value = clamped;
    }

    fn report(&mut self, invariant: Invariant, raw: f64, clamped: f64) {
        let warning = SanityWarning {
            index: self.index,
            invariant,
            raw,
            clamped,
        };
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Clamp every invariant of `sample` in place and return the violations
pub fn enforce(sample: &mut AttributedSample, raw: RawShares, eps: f64) -> Vec<SanityWarning> {
    let mut checker = Checker {
        index: sample.index,
        eps,
        warnings: Vec::new(),
    };

    checker.bound(
        Invariant::CpuShareRange,
        raw.cpu_share,
        &mut sample.cpu_share,
        0.0,
        1.0,
    );
    checker.bound(
        Invariant::MbmShareRange,
        raw.mbm_share,
        &mut sample.mbm_share,
        0.0,
        1.0,
    );

    let gray = sample.gray_bw_mbps;
    checker.bound(
        Invariant::GrayNonNegative,
        gray,
        &mut sample.gray_bw_mbps,
        0.0,
        f64::INFINITY,
    );

    let non_dram = sample.non_dram_watts();
    let pkg_attr = sample.pkg_attr_watts;
    checker.bound(
        Invariant::PkgAttrBound,
        pkg_attr,
        &mut sample.pkg_attr_watts,
        0.0,
        non_dram,
    );

    let dram_cap = sample.dram_watts_total.max(0.0);
    let dram_attr = sample.dram_attr_watts;
    checker.bound(
        Invariant::DramAttrBound,
        dram_attr,
        &mut sample.dram_attr_watts,
        0.0,
        dram_cap,
    );

    // only reachable when the DRAM reading exceeds the package reading
    let total = sample.pkg_attr_watts + sample.dram_attr_watts;
    if total > sample.pkg_watts_total + eps {
        let dram_attr = (sample.pkg_watts_total - sample.pkg_attr_watts).max(0.0);
        checker.report(
            Invariant::TotalAttrBound,
            total,
            sample.pkg_attr_watts + dram_attr,
        );
        sample.dram_attr_watts = dram_attr;
    }

    checker.warnings
}
