//! Prediction of map task profiles.

use log::debug;
use mrwhatif_profile::{CostKind, CounterKind, MapProfile, PhaseKind, StatKind};

use crate::{
    configuration::TaskSettings,
    error::WhatIfError,
    merge_simulator::{Combiner, MergeResult, MergeSimulator, Segment},
    specs::MapInputSpecs,
    task_oracle::{
        at_least_one, closed_form_applies, closed_form_merge, copy_timing, cost, default_cost, derive_ratio,
        interm_ratio, time_ms, toggle_ratio, virtual_map_task_id, TaskProfileOracle, DEFAULT_COMPRESS_CPU_COST,
        DEFAULT_UNCOMPRESS_CPU_COST,
    },
};

/// Bytes of sort-buffer accounting space per record.
const ACCOUNTING_BYTES_PER_RECORD: f64 = 16.0;
/// Lower bound of records per reducer in the spill sort cost, keeps the logarithm positive.
const MIN_SORT_RECORDS: f64 = 10.0;

/// Settings and input of one prediction.
struct MapContext<'a> {
    settings: &'a TaskSettings,
    specs: &'a MapInputSpecs,
}

/// Volumes derived for one virtual map task, consumed by the timing formulas.
#[derive(Debug, Default)]
struct MapDataFlow {
    hdfs_bytes_read: u64,
    input_bytes: u64,
    input_records: u64,
    output_bytes: u64,
    output_records: u64,
    hdfs_bytes_written: u64,
    num_spills: u64,
    buffer_spill_records: u64,
    /// Uncompressed bytes of one spill file.
    spill_raw_bytes: u64,
    spill: Segment,
    merge: MergeResult,
}

/// Predicts profiles of map tasks reading one job input.
#[derive(Clone, Debug)]
pub struct MapProfileOracle {
    job_id: String,
    baseline: MapProfile,
}

impl MapProfileOracle {
    /// Creates new oracle. Fails if the baseline profile is empty.
    pub fn new(job_id: impl Into<String>, baseline: MapProfile) -> Result<Self, WhatIfError> {
        if baseline.is_empty() {
            return Err(WhatIfError::EmptyProfile(baseline.task_id().to_string()));
        }
        Ok(MapProfileOracle {
            job_id: job_id.into(),
            baseline,
        })
    }

    pub fn baseline(&self) -> &MapProfile {
        &self.baseline
    }

    fn derive_statistics(&self, ctx: &MapContext, virt: &mut MapProfile) -> Result<(), WhatIfError> {
        let base = &self.baseline;
        for (&kind, &value) in base.statistics().iter() {
            virt.set_statistic(kind, value);
        }

        if !base.contains_statistic(StatKind::InputPairWidth) {
            let records = base.counter(CounterKind::MapInputRecords, 0);
            if records <= 0 {
                return Err(WhatIfError::MissingCounter {
                    profile: base.task_id().to_string(),
                    counter: CounterKind::MapInputRecords,
                });
            }
            let bytes = base.counter(CounterKind::MapInputBytes, 0).max(1);
            virt.set_statistic(StatKind::InputPairWidth, bytes as f64 / records as f64);
        }
        derive_ratio(
            virt,
            StatKind::MapSizeSel,
            base.counter(CounterKind::MapOutputBytes, -1),
            base.counter(CounterKind::MapInputBytes, -1),
        );
        derive_ratio(
            virt,
            StatKind::MapPairsSel,
            base.counter(CounterKind::MapOutputRecords, -1),
            base.counter(CounterKind::MapInputRecords, -1),
        );
        if ctx.settings.use_combiner {
            derive_ratio(
                virt,
                StatKind::CombinePairsSel,
                base.counter(CounterKind::CombineOutputRecords, -1),
                base.counter(CounterKind::CombineInputRecords, -1),
            );
            if !virt.contains_statistic(StatKind::CombineSizeSel) {
                let pairs_sel = virt.statistic(StatKind::CombinePairsSel, 1.0);
                virt.set_statistic(StatKind::CombineSizeSel, pairs_sel);
            }
        }

        toggle_ratio(virt, StatKind::InputCompressRatio, ctx.specs.is_compressed);
        toggle_ratio(
            virt,
            StatKind::IntermCompressRatio,
            ctx.settings.compress_map_output && !ctx.settings.is_map_only(),
        );
        toggle_ratio(
            virt,
            StatKind::OutCompressRatio,
            ctx.settings.compress_output && ctx.settings.is_map_only(),
        );
        Ok(())
    }

    fn derive_counters(&self, ctx: &MapContext, virt: &mut MapProfile) -> MapDataFlow {
        let settings = ctx.settings;
        let mut flow = MapDataFlow {
            hdfs_bytes_read: ctx.specs.split_bytes(),
            ..Default::default()
        };
        flow.input_bytes = if ctx.specs.is_compressed {
            at_least_one(flow.hdfs_bytes_read as f64 / virt.statistic(StatKind::InputCompressRatio, 1.0))
        } else {
            flow.hdfs_bytes_read
        };
        flow.input_records =
            at_least_one(flow.input_bytes as f64 / virt.statistic(StatKind::InputPairWidth, 1.0).max(f64::EPSILON));
        flow.output_records = at_least_one(flow.input_records as f64 * virt.statistic(StatKind::MapPairsSel, 1.0));
        flow.output_bytes = at_least_one(flow.input_bytes as f64 * virt.statistic(StatKind::MapSizeSel, 1.0));

        virt.set_counter(CounterKind::HdfsBytesRead, flow.hdfs_bytes_read as i64);
        virt.set_counter(CounterKind::MapInputBytes, flow.input_bytes as i64);
        virt.set_counter(CounterKind::MapInputRecords, flow.input_records as i64);
        virt.set_counter(CounterKind::MapOutputBytes, flow.output_bytes as i64);
        virt.set_counter(CounterKind::MapOutputRecords, flow.output_records as i64);

        if settings.is_map_only() {
            flow.hdfs_bytes_written = if settings.compress_output {
                at_least_one(flow.output_bytes as f64 * virt.statistic(StatKind::OutCompressRatio, 1.0))
            } else {
                flow.output_bytes
            };
            virt.set_counter(CounterKind::HdfsBytesWritten, flow.hdfs_bytes_written as i64);
            virt.set_counter(CounterKind::SpilledRecords, 0);
            return flow;
        }

        let pair_width = flow.output_bytes as f64 / flow.output_records as f64;
        let buffer = settings.sort_buffer_bytes as f64;
        let max_serialized =
            (buffer * (1.0 - settings.sort_record_percent) * settings.sort_spill_percent / pair_width).floor();
        let max_accounted =
            (buffer * settings.sort_record_percent * settings.sort_spill_percent / ACCOUNTING_BYTES_PER_RECORD).floor();
        flow.buffer_spill_records = (max_serialized.min(max_accounted) as u64)
            .min(flow.output_records)
            .max(1);
        flow.num_spills = flow.output_records.div_ceil(flow.buffer_spill_records);
        let buffer_spill_bytes = at_least_one(flow.buffer_spill_records as f64 * pair_width);

        let (spill_records, spill_raw_bytes) = if settings.use_combiner {
            (
                at_least_one(flow.buffer_spill_records as f64 * virt.statistic(StatKind::CombinePairsSel, 1.0)),
                at_least_one(buffer_spill_bytes as f64 * virt.statistic(StatKind::CombineSizeSel, 1.0)),
            )
        } else {
            (flow.buffer_spill_records, buffer_spill_bytes)
        };
        flow.spill_raw_bytes = spill_raw_bytes;
        flow.spill = Segment::new(
            at_least_one(spill_raw_bytes as f64 * interm_ratio(virt, settings)),
            spill_records,
        );

        let combiner = settings.use_combiner.then(|| self.merge_combiner(settings, &*virt));
        let factor = settings.sort_factor as u64;
        flow.merge = if closed_form_applies(flow.num_spills, factor) {
            closed_form_merge(flow.num_spills, flow.spill, factor, combiner)
        } else {
            debug!(
                "{} spills exceed the closed-form bound for fan-in {}, simulating merge",
                flow.num_spills, factor
            );
            let mut simulator = MergeSimulator::new(settings.sort_factor);
            simulator.add_segments(flow.num_spills, flow.spill);
            simulator.set_combiner(combiner);
            simulator.simulate()
        };

        let spilled = flow.spill.times(flow.num_spills);
        virt.set_counter(CounterKind::MapNumSpills, flow.num_spills as i64);
        virt.set_counter(CounterKind::MapRecsPerBuffSpill, flow.buffer_spill_records as i64);
        virt.set_counter(CounterKind::MapBuffSpillSize, buffer_spill_bytes as i64);
        virt.set_counter(CounterKind::MapRecordsPerSpill, flow.spill.num_records as i64);
        virt.set_counter(CounterKind::MapSpillSize, flow.spill.size_bytes as i64);
        virt.set_counter(CounterKind::MapNumSpillMerges, flow.merge.num_merge_passes as i64);
        virt.set_counter(
            CounterKind::SpilledRecords,
            (spilled.num_records + flow.merge.spilled_records) as i64,
        );
        virt.set_counter(
            CounterKind::MapOutputMaterializedBytes,
            flow.merge.output.size_bytes as i64,
        );
        virt.set_counter(
            CounterKind::MapOutputMaterializedRecords,
            flow.merge.output.num_records as i64,
        );
        virt.set_counter(
            CounterKind::FileBytesWritten,
            (spilled.size_bytes + flow.merge.bytes_written) as i64,
        );
        virt.set_counter(CounterKind::FileBytesRead, flow.merge.bytes_read as i64);
        if settings.use_combiner {
            virt.set_counter(
                CounterKind::CombineInputRecords,
                (flow.output_records + flow.merge.combine_in_records) as i64,
            );
            virt.set_counter(
                CounterKind::CombineOutputRecords,
                (spilled.num_records + flow.merge.combine_out_records) as i64,
            );
        }
        flow
    }

    /// Combiner of the final merge, calibrated on the volume the baseline map task spilled.
    fn merge_combiner(&self, settings: &TaskSettings, virt: &MapProfile) -> Combiner {
        let base = &self.baseline;
        let spills = base.counter(CounterKind::MapNumSpills, 1).max(1);
        let observed_bytes = base.counter(CounterKind::MapSpillSize, 0).max(0) * spills;
        let observed_records = base.counter(CounterKind::MapRecordsPerSpill, 0).max(0) * spills;
        Combiner::calibrated(
            settings.spills_for_combine,
            virt.statistic(StatKind::CombineSizeSel, 1.0),
            virt.statistic(StatKind::CombinePairsSel, 1.0),
            observed_bytes as u64,
            observed_records as u64,
        )
    }

    fn derive_cost_factors(&self, ctx: &MapContext, virt: &mut MapProfile) {
        let base = &self.baseline;
        for (&kind, &value) in base.cost_factors().iter() {
            virt.set_cost_factor(kind, value);
        }
        let settings = ctx.settings;
        if ctx.specs.is_compressed {
            default_cost(base, virt, CostKind::InputUncompressCpuCost, DEFAULT_UNCOMPRESS_CPU_COST);
        }
        if settings.compress_map_output && !settings.is_map_only() {
            default_cost(base, virt, CostKind::IntermCompressCpuCost, DEFAULT_COMPRESS_CPU_COST);
            default_cost(base, virt, CostKind::IntermUncompressCpuCost, DEFAULT_UNCOMPRESS_CPU_COST);
        }
        if settings.compress_output && settings.is_map_only() {
            default_cost(base, virt, CostKind::OutputCompressCpuCost, DEFAULT_COMPRESS_CPU_COST);
        }
    }

    fn derive_timings(&self, ctx: &MapContext, flow: &MapDataFlow, virt: &mut MapProfile) {
        copy_timing(&self.baseline, virt, PhaseKind::Setup);
        copy_timing(&self.baseline, virt, PhaseKind::Cleanup);
        for (phase, millis) in phase_timings(ctx, flow, virt) {
            virt.set_timing(phase, millis);
        }
    }
}

/// Timings of the data phases of a virtual map task.
fn phase_timings(ctx: &MapContext, flow: &MapDataFlow, virt: &MapProfile) -> Vec<(PhaseKind, f64)> {
    let settings = ctx.settings;
    let c = |kind| cost(virt, kind);
    let mut timings = Vec::new();

    let mut read = time_ms(flow.hdfs_bytes_read as f64, c(CostKind::ReadHdfsIoCost));
    if ctx.specs.is_compressed {
        read += time_ms(flow.input_bytes as f64, c(CostKind::InputUncompressCpuCost));
    }
    if ctx.specs.locality.is_remote() {
        read += time_ms(flow.hdfs_bytes_read as f64, c(CostKind::NetworkCost));
    }
    timings.push((PhaseKind::Read, read));
    timings.push((PhaseKind::Map, time_ms(flow.input_records as f64, c(CostKind::MapCpuCost))));

    if settings.is_map_only() {
        let mut write = time_ms(flow.hdfs_bytes_written as f64, c(CostKind::WriteHdfsIoCost));
        if settings.compress_output {
            write += time_ms(flow.output_bytes as f64, c(CostKind::OutputCompressCpuCost));
        }
        timings.push((PhaseKind::Write, write));
        return timings;
    }

    timings.push((
        PhaseKind::Collect,
        time_ms(
            flow.output_records as f64,
            c(CostKind::PartitionCpuCost) + c(CostKind::SerdeCpuCost),
        ),
    ));

    let records = flow.buffer_spill_records as f64;
    let per_reducer = records / settings.num_reducers.max(1) as f64;
    let mut spill = time_ms(records * per_reducer.max(MIN_SORT_RECORDS).ln(), c(CostKind::SortCpuCost));
    if settings.use_combiner {
        spill += time_ms(records, c(CostKind::CombineCpuCost));
    }
    if settings.compress_map_output {
        spill += time_ms(flow.spill_raw_bytes as f64, c(CostKind::IntermCompressCpuCost));
    }
    spill += time_ms(flow.spill.size_bytes as f64, c(CostKind::WriteLocalIoCost));
    timings.push((PhaseKind::Spill, spill * flow.num_spills as f64));

    let merge = &flow.merge;
    let ratio = interm_ratio(virt, settings);
    let mut merge_time = time_ms(merge.merged_records as f64, c(CostKind::MergeCpuCost))
        + time_ms(merge.bytes_read as f64, c(CostKind::ReadLocalIoCost))
        + time_ms(merge.bytes_written as f64, c(CostKind::WriteLocalIoCost));
    if settings.compress_map_output {
        merge_time += time_ms(merge.bytes_read as f64 / ratio, c(CostKind::IntermUncompressCpuCost))
            + time_ms(merge.bytes_written as f64 / ratio, c(CostKind::IntermCompressCpuCost));
    }
    if settings.use_combiner {
        merge_time += time_ms(merge.combine_in_records as f64, c(CostKind::CombineCpuCost));
    }
    timings.push((PhaseKind::Merge, merge_time));
    timings
}

impl TaskProfileOracle for MapProfileOracle {
    type Specs = MapInputSpecs;
    type Profile = MapProfile;

    fn predict(&self, settings: &TaskSettings, specs: &MapInputSpecs) -> Result<MapProfile, WhatIfError> {
        specs.validate()?;
        let ctx = MapContext { settings, specs };
        let mut virt = MapProfile::new(virtual_map_task_id(&self.job_id, specs.input_index), specs.input_index);
        virt.set_num_tasks(specs.num_splits);

        self.derive_statistics(&ctx, &mut virt)?;
        let flow = self.derive_counters(&ctx, &mut virt);
        self.derive_cost_factors(&ctx, &mut virt);
        self.derive_timings(&ctx, &flow, &mut virt);

        debug!(
            "predicted map {}: {} splits of {} bytes, {} spills, {} merge passes, {:.3}ms per task",
            virt.task_id(),
            specs.num_splits,
            flow.hdfs_bytes_read,
            flow.num_spills,
            flow.merge.num_merge_passes,
            virt.total_time()
        );
        Ok(virt)
    }
}
