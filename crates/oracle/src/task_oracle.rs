//! Pieces shared by the map and reduce oracles.

use mrwhatif_profile::{CostKind, ExecutionProfile, PhaseKind, StatKind, TaskProfile};

use crate::{
    configuration::{Configuration, TaskSettings},
    error::WhatIfError,
    merge_simulator::{first_pass_factor, Combiner, MergeResult, Segment},
};

const NANOS_PER_MILLI: f64 = 1e6;

/// Compression ratio assumed when compression is switched on for data which was never compressed.
pub const DEFAULT_COMPRESS_RATIO: f64 = 0.3;
/// Compression CPU cost (ns per uncompressed byte) assumed when it was never measured.
pub const DEFAULT_COMPRESS_CPU_COST: f64 = 40.0;
/// Decompression CPU cost (ns per uncompressed byte) assumed when it was never measured.
pub const DEFAULT_UNCOMPRESS_CPU_COST: f64 = 10.0;

/// Predicts the profile of a task from a measured baseline.
pub trait TaskProfileOracle {
    type Specs;
    type Profile;

    /// Predicts the profile of the tasks described by `specs` when running with `settings`.
    fn predict(&self, settings: &TaskSettings, specs: &Self::Specs) -> Result<Self::Profile, WhatIfError>;

    /// Same as [predict](TaskProfileOracle::predict), reading the settings from `conf`.
    fn whatif(&self, conf: &Configuration, specs: &Self::Specs) -> Result<Self::Profile, WhatIfError> {
        self.predict(&TaskSettings::from_conf(conf)?, specs)
    }
}

/// Number of spills merged by the first merge pass.
pub fn num_spills_first_pass(num_spills: u64, factor: u64) -> u64 {
    first_pass_factor(num_spills as usize, factor as usize) as u64
}

/// Number of spills read by all intermediate merge passes.
///
/// Exact for equally sized spills when `num_spills <= factor^2`: every pass after the first one then merges
/// original spills only.
pub fn num_spills_interm_merge(num_spills: u64, factor: u64) -> u64 {
    if num_spills <= factor {
        return 0;
    }
    let first = num_spills_first_pass(num_spills, factor);
    first + factor * later_interm_passes(num_spills, factor)
}

/// Number of merge passes including the final one, valid for `num_spills <= factor^2`.
pub fn num_merge_passes(num_spills: u64, factor: u64) -> u32 {
    if num_spills <= 1 {
        0
    } else if num_spills <= factor {
        1
    } else {
        2 + later_interm_passes(num_spills, factor) as u32
    }
}

/// Intermediate passes after the first one. Each merges `factor` segments into one, leaving exactly `factor`.
fn later_interm_passes(num_spills: u64, factor: u64) -> u64 {
    let after_first = num_spills - num_spills_first_pass(num_spills, factor) + 1;
    (after_first - factor) / (factor - 1)
}

/// Whether the closed-form merge formulas are exact for this number of spills.
pub fn closed_form_applies(num_spills: u64, factor: u64) -> bool {
    num_spills <= factor.saturating_mul(factor)
}

/// Merge of `num_spills` equal spills computed without simulation, see [closed_form_applies].
pub fn closed_form_merge(num_spills: u64, spill: Segment, factor: u64, combiner: Option<Combiner>) -> MergeResult {
    let total = spill.times(num_spills);
    if num_spills <= 1 {
        return MergeResult {
            output: total,
            remaining_segments: num_spills as usize,
            ..Default::default()
        };
    }
    let interm = spill.times(num_spills_interm_merge(num_spills, factor));
    let final_segments = num_spills.min(factor);
    let largest = if num_spills <= factor {
        spill
    } else if later_interm_passes(num_spills, factor) > 0 {
        spill.times(factor)
    } else {
        spill.times(num_spills_first_pass(num_spills, factor))
    };
    let mut result = MergeResult {
        num_merge_passes: num_merge_passes(num_spills, factor),
        merged_records: total.num_records + interm.num_records,
        remaining_segments: 1,
        ..Default::default()
    };
    let output = match combiner {
        Some(combiner) if combiner.applies(final_segments as usize) => {
            let output = combiner.combine(total, largest);
            result.combine_in_records = total.num_records;
            result.combine_out_records = output.num_records;
            output
        }
        _ => total,
    };
    result.bytes_read = interm.size_bytes + total.size_bytes;
    result.bytes_written = interm.size_bytes + output.size_bytes;
    result.spilled_records = interm.num_records + output.num_records;
    result.output = output;
    result
}

/// Milliseconds spent processing `volume` units at `cost` nanoseconds per unit.
pub fn time_ms(volume: f64, cost: f64) -> f64 {
    volume * cost / NANOS_PER_MILLI
}

/// Unit cost of the profile, zero when it was never measured.
pub fn cost(profile: &ExecutionProfile, kind: CostKind) -> f64 {
    profile.cost_factor(kind, 0.0)
}

/// Copies a phase timing from the baseline if it was measured.
pub fn copy_timing(baseline: &TaskProfile, target: &mut TaskProfile, phase: PhaseKind) {
    if let Some(&millis) = baseline.timings().get(&phase) {
        target.set_timing(phase, millis);
    }
}

/// Sets a cost factor to `default` unless the baseline measured it.
pub fn default_cost(baseline: &ExecutionProfile, target: &mut ExecutionProfile, kind: CostKind, default: f64) {
    if !baseline.contains_cost_factor(kind) {
        target.set_cost_factor(kind, default);
    }
}

/// Compression ratio of intermediate data, 1 when it is not compressed.
pub fn interm_ratio(profile: &ExecutionProfile, settings: &TaskSettings) -> f64 {
    if settings.compress_map_output {
        profile.statistic(StatKind::IntermCompressRatio, 1.0).max(f64::EPSILON)
    } else {
        1.0
    }
}

/// Sets statistic `kind` to `numerator / denominator` unless it is known or the counters are missing.
pub fn derive_ratio(target: &mut ExecutionProfile, kind: StatKind, numerator: i64, denominator: i64) {
    if target.contains_statistic(kind) {
        return;
    }
    if numerator >= 0 && denominator > 0 {
        target.set_statistic(kind, numerator as f64 / denominator as f64);
    }
}

/// Keeps a measured compression ratio while compression stays on, assumes the default one when compression is
/// newly switched on and forgets it when compression is off.
pub fn toggle_ratio(target: &mut ExecutionProfile, kind: StatKind, enabled: bool) {
    if !enabled {
        target.remove_statistic(kind);
    } else if !target.contains_statistic(kind) {
        target.set_statistic(kind, DEFAULT_COMPRESS_RATIO);
    }
}

/// Rounds a derived volume, never going below 1.
pub fn at_least_one(volume: f64) -> u64 {
    if volume.is_finite() && volume > 1.0 {
        volume.round() as u64
    } else {
        1
    }
}

pub fn virtual_map_task_id(job_id: &str, input_index: usize) -> String {
    format!("{job_id}_m_whatif_{input_index}")
}

pub fn virtual_reduce_task_id(job_id: &str, group: usize) -> String {
    format!("{job_id}_r_whatif_{group}")
}
