//! Prediction of reduce task profiles.
//!
//! A reducer fetches one segment per map task. Small segments are kept in the shuffle buffer and merged into
//! shuffle files once the buffer fills, large ones go to disk directly. Too many shuffle files are merged while
//! the shuffle is still running. The sort phase spills the segments left in memory unless they fit the reduce
//! input buffer, then merges everything down to at most `sort_factor` segments, which the reduce phase streams
//! through its final merge.

use std::{cmp::Reverse, collections::BinaryHeap};

use log::debug;
use mrwhatif_profile::{CostKind, CounterKind, PhaseKind, ReduceProfile, StatKind};

use crate::{
    configuration::TaskSettings,
    error::WhatIfError,
    merge_simulator::{Combiner, MergeResult, MergeSimulator, Segment},
    specs::ReduceShuffleSpecs,
    task_oracle::{
        at_least_one, copy_timing, cost, default_cost, derive_ratio, interm_ratio, time_ms, toggle_ratio,
        virtual_reduce_task_id, TaskProfileOracle, DEFAULT_COMPRESS_CPU_COST, DEFAULT_UNCOMPRESS_CPU_COST,
    },
};

/// Settings and input of one prediction.
struct ReduceContext<'a> {
    settings: &'a TaskSettings,
    specs: &'a ReduceShuffleSpecs,
    group: usize,
}

/// Volumes moved by the shuffle phase of one reducer.
#[derive(Debug, Default)]
struct ShuffleFlow {
    /// Fetched bytes as stored by the map tasks.
    fetched: Segment,
    /// Fetched bytes after decompression.
    fetched_raw_bytes: u64,
    segments_on_disk: bool,
    segments_per_file: u64,
    inmem_merges: u64,
    /// Records read by in-memory merges.
    inmem_merged_records: u64,
    combine_in_records: u64,
    combine_out_records: u64,
    /// Shuffle files left on disk when the shuffle completes.
    files: Vec<Segment>,
    /// Segments still held in memory when the shuffle completes.
    in_memory: Vec<Segment>,
    /// Bytes written by the shuffle, fetched segments and merged files alike.
    bytes_written: u64,
    /// Uncompressed bytes written by in-memory merges.
    inmem_written_raw_bytes: u64,
    spilled_records: u64,
    disk_merges: u32,
    disk_merge_bytes_read: u64,
    disk_merge_records: u64,
}

/// Volumes derived for one virtual reduce task, consumed by the timing formulas.
#[derive(Debug, Default)]
struct ReduceDataFlow {
    shuffle: ShuffleFlow,
    /// In-memory segments the sort phase spilled into one file.
    evicted: Segment,
    sort: MergeResult,
    /// Bytes the reduce phase reads back from local disk.
    reduce_disk_bytes: u64,
    input_bytes: u64,
    input_records: u64,
    output_bytes: u64,
    output_records: u64,
    hdfs_bytes_written: u64,
}

/// Predicts profiles of reduce tasks.
#[derive(Clone, Debug)]
pub struct ReduceProfileOracle {
    job_id: String,
    baseline: ReduceProfile,
}

impl ReduceProfileOracle {
    /// Creates new oracle. Fails if the baseline profile is empty.
    pub fn new(job_id: impl Into<String>, baseline: ReduceProfile) -> Result<Self, WhatIfError> {
        if baseline.is_empty() {
            return Err(WhatIfError::EmptyProfile(baseline.task_id().to_string()));
        }
        Ok(ReduceProfileOracle {
            job_id: job_id.into(),
            baseline,
        })
    }

    pub fn baseline(&self) -> &ReduceProfile {
        &self.baseline
    }

    /// Predicts the profile of a group of reducers, `group` distinguishes the ids of several groups.
    pub fn predict_group(
        &self,
        settings: &TaskSettings,
        specs: &ReduceShuffleSpecs,
        group: usize,
    ) -> Result<ReduceProfile, WhatIfError> {
        specs.validate()?;
        let ctx = ReduceContext {
            settings,
            specs,
            group,
        };
        let mut virt = ReduceProfile::new(virtual_reduce_task_id(&self.job_id, ctx.group));
        virt.set_num_tasks(specs.num_reducers);

        self.derive_statistics(&ctx, &mut virt);
        let flow = self.derive_counters(&ctx, &mut virt);
        self.derive_cost_factors(&ctx, &mut virt);
        copy_timing(&self.baseline, &mut virt, PhaseKind::Setup);
        copy_timing(&self.baseline, &mut virt, PhaseKind::Cleanup);
        for (phase, millis) in phase_timings(&ctx, &flow, &virt) {
            virt.set_timing(phase, millis);
        }

        debug!(
            "predicted reduce {}: {} reducers, {} shuffled segments of {} bytes, {} shuffle files, {} sort passes, \
             {:.3}ms per task",
            virt.task_id(),
            specs.num_reducers,
            specs.num_shuffles,
            specs.segment_bytes,
            flow.shuffle.files.len(),
            flow.sort.num_merge_passes,
            virt.total_time()
        );
        Ok(virt)
    }

    fn derive_statistics(&self, ctx: &ReduceContext, virt: &mut ReduceProfile) {
        let base = &self.baseline;
        for (&kind, &value) in base.statistics().iter() {
            virt.set_statistic(kind, value);
        }
        derive_ratio(
            virt,
            StatKind::ReduceSizeSel,
            base.counter(CounterKind::ReduceOutputBytes, -1),
            base.counter(CounterKind::ReduceInputBytes, -1),
        );
        derive_ratio(
            virt,
            StatKind::ReducePairsSel,
            base.counter(CounterKind::ReduceOutputRecords, -1),
            base.counter(CounterKind::ReduceInputRecords, -1),
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
        toggle_ratio(virt, StatKind::IntermCompressRatio, ctx.settings.compress_map_output);
        toggle_ratio(virt, StatKind::OutCompressRatio, ctx.settings.compress_output);
    }

    /// Combiner of the in-memory shuffle merges, calibrated on the volume the baseline reducer combined.
    fn shuffle_combiner(&self, virt: &ReduceProfile) -> Combiner {
        let base = &self.baseline;
        let observed_records = base.counter(CounterKind::CombineInputRecords, 0).max(0) as u64;
        let ratio = base.statistic(StatKind::IntermCompressRatio, 1.0).max(f64::EPSILON);
        let observed_bytes = (base.counter(CounterKind::ReduceShuffleBytes, 0).max(0) as f64 / ratio) as u64;
        // In-memory merges combine whatever they merge, so the threshold never blocks them.
        Combiner::calibrated(
            1,
            virt.statistic(StatKind::CombineSizeSel, 1.0),
            virt.statistic(StatKind::CombinePairsSel, 1.0),
            observed_bytes,
            observed_records,
        )
    }

    fn simulate_shuffle(&self, ctx: &ReduceContext, virt: &ReduceProfile) -> ShuffleFlow {
        let settings = ctx.settings;
        let specs = ctx.specs;
        let ratio = interm_ratio(virt, settings);
        let num_shuffles = specs.num_shuffles as u64;
        let segment = Segment::new(specs.segment_bytes, specs.segment_records);
        let raw_segment_bytes = at_least_one(specs.segment_bytes as f64 / ratio);

        let mut flow = ShuffleFlow {
            fetched: segment.times(num_shuffles),
            fetched_raw_bytes: raw_segment_bytes * num_shuffles,
            ..Default::default()
        };
        let buffer = settings.task_memory as f64 * settings.shuffle_input_buffer_percent;
        let mut files = ShuffleFiles::new(settings.sort_factor);

        flow.segments_on_disk = raw_segment_bytes as f64 >= settings.shuffle_segment_disk_fraction * buffer;
        if flow.segments_on_disk {
            flow.segments_per_file = 1;
            for _ in 0..num_shuffles {
                files.add(segment);
            }
            flow.bytes_written += flow.fetched.size_bytes;
            flow.spilled_records += flow.fetched.num_records;
        } else {
            let per_file = (settings.shuffle_merge_percent * buffer / raw_segment_bytes as f64).ceil() as u64;
            flow.segments_per_file = match settings.inmem_merge_threshold {
                0 => per_file,
                threshold => per_file.min(threshold as u64),
            }
            .max(1);
            flow.inmem_merges = num_shuffles / flow.segments_per_file;
            let combiner = settings.use_combiner.then(|| self.shuffle_combiner(virt));

            let merged = Segment::new(raw_segment_bytes, specs.segment_records).times(flow.segments_per_file);
            let combined = match combiner {
                Some(combiner) => combiner.combine(merged, Segment::new(raw_segment_bytes, specs.segment_records)),
                None => merged,
            };
            let file = Segment::new(at_least_one(combined.size_bytes as f64 * ratio), combined.num_records);
            for _ in 0..flow.inmem_merges {
                files.add(file);
            }
            flow.inmem_merged_records = merged.num_records * flow.inmem_merges;
            if combiner.is_some() {
                flow.combine_in_records = flow.inmem_merged_records;
                flow.combine_out_records = combined.num_records * flow.inmem_merges;
            }
            flow.inmem_written_raw_bytes = combined.size_bytes * flow.inmem_merges;
            flow.bytes_written += file.size_bytes * flow.inmem_merges;
            flow.spilled_records += file.num_records * flow.inmem_merges;

            let leftover = num_shuffles - flow.inmem_merges * flow.segments_per_file;
            flow.in_memory = vec![segment; leftover as usize];
        }

        flow.disk_merges = files.merges;
        flow.disk_merge_bytes_read = files.merged.size_bytes;
        flow.disk_merge_records = files.merged.num_records;
        flow.bytes_written += files.merged.size_bytes;
        flow.spilled_records += files.merged.num_records;
        flow.files = files.into_segments();
        flow
    }

    fn derive_counters(&self, ctx: &ReduceContext, virt: &mut ReduceProfile) -> ReduceDataFlow {
        let settings = ctx.settings;
        let shuffle = self.simulate_shuffle(ctx, virt);
        let ratio = interm_ratio(virt, settings);

        let held = shuffle.in_memory.iter().copied().sum::<Segment>();
        let retain_limit = settings.task_memory as f64 * settings.reduce_input_buffer_percent;
        let evict = !shuffle.in_memory.is_empty() && held.size_bytes as f64 / ratio > retain_limit;
        let evicted = if evict { held } else { Segment::default() };

        let mut simulator = MergeSimulator::new(settings.sort_factor);
        for &file in shuffle.files.iter() {
            simulator.add_segment(file);
        }
        if evict {
            // Held segments over the reduce input buffer are written out as one file before the merge.
            simulator.add_segment(evicted);
        } else {
            for &segment in shuffle.in_memory.iter() {
                simulator.add_in_memory_segment(segment);
            }
        }
        simulator.set_skip_final_merge(true);
        let sort = simulator.simulate();

        let mut flow = ReduceDataFlow {
            evicted,
            reduce_disk_bytes: sort.output.size_bytes - sort.output_in_memory.size_bytes,
            input_records: sort.output.num_records,
            input_bytes: (sort.output.size_bytes as f64 / ratio).round() as u64,
            ..Default::default()
        };
        flow.output_records = at_least_one(flow.input_records as f64 * virt.statistic(StatKind::ReducePairsSel, 1.0));
        flow.output_bytes = at_least_one(flow.input_bytes as f64 * virt.statistic(StatKind::ReduceSizeSel, 1.0));
        flow.hdfs_bytes_written = if settings.compress_output {
            at_least_one(flow.output_bytes as f64 * virt.statistic(StatKind::OutCompressRatio, 1.0))
        } else {
            flow.output_bytes
        };

        let base = &self.baseline;
        let base_groups = base.counter(CounterKind::ReduceInputGroups, -1);
        let base_records = base.counter(CounterKind::ReduceInputRecords, -1);
        let input_groups = if base_groups >= 0 && base_records > 0 {
            (flow.input_records as f64 * base_groups as f64 / base_records as f64).round() as u64
        } else {
            flow.input_records
        };

        virt.set_counter(CounterKind::ReduceShuffleBytes, shuffle.fetched.size_bytes as i64);
        virt.set_counter(CounterKind::ReduceShuffleFiles, shuffle.files.len() as i64);
        virt.set_counter(CounterKind::ReduceShuffleMerges, shuffle.disk_merges as i64);
        virt.set_counter(CounterKind::ReduceSortMerges, sort.num_merge_passes as i64);
        virt.set_counter(CounterKind::ReduceInputGroups, input_groups as i64);
        virt.set_counter(CounterKind::ReduceInputRecords, flow.input_records as i64);
        virt.set_counter(CounterKind::ReduceInputBytes, flow.input_bytes as i64);
        virt.set_counter(CounterKind::ReduceOutputRecords, flow.output_records as i64);
        virt.set_counter(CounterKind::ReduceOutputBytes, flow.output_bytes as i64);
        virt.set_counter(CounterKind::HdfsBytesWritten, flow.hdfs_bytes_written as i64);
        virt.set_counter(
            CounterKind::FileBytesWritten,
            (shuffle.bytes_written + evicted.size_bytes + sort.bytes_written) as i64,
        );
        virt.set_counter(
            CounterKind::FileBytesRead,
            (shuffle.disk_merge_bytes_read + sort.bytes_read + flow.reduce_disk_bytes) as i64,
        );
        virt.set_counter(
            CounterKind::SpilledRecords,
            (shuffle.spilled_records + evicted.num_records + sort.spilled_records) as i64,
        );
        if settings.use_combiner {
            virt.set_counter(CounterKind::CombineInputRecords, shuffle.combine_in_records as i64);
            virt.set_counter(CounterKind::CombineOutputRecords, shuffle.combine_out_records as i64);
        }

        flow.shuffle = shuffle;
        flow.sort = sort;
        flow
    }

    fn derive_cost_factors(&self, ctx: &ReduceContext, virt: &mut ReduceProfile) {
        let base = &self.baseline;
        for (&kind, &value) in base.cost_factors().iter() {
            virt.set_cost_factor(kind, value);
        }
        if ctx.settings.compress_map_output {
            default_cost(base, virt, CostKind::IntermUncompressCpuCost, DEFAULT_UNCOMPRESS_CPU_COST);
            default_cost(base, virt, CostKind::IntermCompressCpuCost, DEFAULT_COMPRESS_CPU_COST);
        }
        if ctx.settings.compress_output {
            default_cost(base, virt, CostKind::OutputCompressCpuCost, DEFAULT_COMPRESS_CPU_COST);
        }
    }
}

impl TaskProfileOracle for ReduceProfileOracle {
    type Specs = ReduceShuffleSpecs;
    type Profile = ReduceProfile;

    fn predict(&self, settings: &TaskSettings, specs: &ReduceShuffleSpecs) -> Result<ReduceProfile, WhatIfError> {
        self.predict_group(settings, specs, 0)
    }
}

/// On-disk shuffle files. Once `2 * factor - 1` files exist, the `factor` smallest are merged into one.
struct ShuffleFiles {
    factor: usize,
    files: BinaryHeap<Reverse<Segment>>,
    merges: u32,
    /// Total volume read and written by the merges.
    merged: Segment,
}

impl ShuffleFiles {
    fn new(factor: usize) -> Self {
        ShuffleFiles {
            factor: factor.max(2),
            files: BinaryHeap::new(),
            merges: 0,
            merged: Segment::default(),
        }
    }

    fn add(&mut self, file: Segment) {
        self.files.push(Reverse(file));
        while self.files.len() >= 2 * self.factor - 1 {
            let mut output = Segment::default();
            for _ in 0..self.factor {
                if let Some(Reverse(file)) = self.files.pop() {
                    output = output + file;
                }
            }
            self.merges += 1;
            self.merged = self.merged + output;
            self.files.push(Reverse(output));
        }
    }

    fn into_segments(self) -> Vec<Segment> {
        self.files.into_iter().map(|f| f.0).collect()
    }
}

/// Timings of the data phases of a virtual reduce task.
fn phase_timings(ctx: &ReduceContext, flow: &ReduceDataFlow, virt: &ReduceProfile) -> Vec<(PhaseKind, f64)> {
    let settings = ctx.settings;
    let c = |kind| cost(virt, kind);
    let shuffle = &flow.shuffle;
    let sort = &flow.sort;
    let ratio = interm_ratio(virt, settings);
    let compressed = settings.compress_map_output;

    let mut shuffle_time = time_ms(shuffle.fetched.size_bytes as f64, c(CostKind::NetworkCost))
        + time_ms(shuffle.inmem_merged_records as f64, c(CostKind::MergeCpuCost))
        + time_ms(shuffle.combine_in_records as f64, c(CostKind::CombineCpuCost))
        + time_ms(shuffle.disk_merge_records as f64, c(CostKind::MergeCpuCost))
        + time_ms(shuffle.bytes_written as f64, c(CostKind::WriteLocalIoCost))
        + time_ms(shuffle.disk_merge_bytes_read as f64, c(CostKind::ReadLocalIoCost));
    if compressed {
        let reencoded = shuffle.disk_merge_bytes_read as f64 / ratio;
        shuffle_time += time_ms(
            shuffle.fetched_raw_bytes as f64 + reencoded,
            c(CostKind::IntermUncompressCpuCost),
        ) + time_ms(
            shuffle.inmem_written_raw_bytes as f64 + reencoded,
            c(CostKind::IntermCompressCpuCost),
        );
    }

    let sort_written = sort.bytes_written + flow.evicted.size_bytes;
    let mut sort_time = time_ms(
        (sort.merged_records + flow.evicted.num_records) as f64,
        c(CostKind::MergeCpuCost),
    ) + time_ms(sort.bytes_read as f64, c(CostKind::ReadLocalIoCost))
        + time_ms(sort_written as f64, c(CostKind::WriteLocalIoCost));
    if compressed {
        sort_time += time_ms(sort.bytes_read as f64 / ratio, c(CostKind::IntermUncompressCpuCost))
            + time_ms(sort_written as f64 / ratio, c(CostKind::IntermCompressCpuCost));
    }

    let mut reduce_time = time_ms(flow.reduce_disk_bytes as f64, c(CostKind::ReadLocalIoCost))
        + time_ms(flow.input_records as f64, c(CostKind::ReduceCpuCost));
    if compressed {
        reduce_time += time_ms(flow.reduce_disk_bytes as f64 / ratio, c(CostKind::IntermUncompressCpuCost));
    }

    let mut write_time = time_ms(flow.hdfs_bytes_written as f64, c(CostKind::WriteHdfsIoCost));
    if settings.compress_output {
        write_time += time_ms(flow.output_bytes as f64, c(CostKind::OutputCompressCpuCost));
    }

    vec![
        (PhaseKind::Shuffle, shuffle_time),
        (PhaseKind::Sort, sort_time),
        (PhaseKind::Reduce, reduce_time),
        (PhaseKind::Write, write_time),
    ]
}
