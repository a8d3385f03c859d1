use std::sync::Arc;

use mrwhatif::{
    batch::grid_from_yaml_str,
    configuration::keys,
    task_oracle::{closed_form_merge, num_merge_passes, num_spills_first_pass, num_spills_interm_merge},
    Combiner, Configuration, DataLocality, DataSetModel, InputDataSet, JobProfileOracle, MapInputSpecs,
    MapProfileOracle, MergeResult, MergeSimulator, ReduceProfileOracle, ReduceShuffleSpecs, Segment, TaskProfileOracle,
    TaskSettings, UniformDataSetModel, WhatIfBatch, WhatIfError,
};
use mrwhatif_profile::{CostKind, CounterKind, JobProfile, MapProfile, PhaseKind, ReduceProfile, StatKind};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const MB: u64 = 1 << 20;

fn simulate(num_segments: u64, segment: Segment, factor: usize, combiner: Option<Combiner>) -> MergeResult {
    let mut simulator = MergeSimulator::new(factor);
    simulator.add_segments(num_segments, segment);
    simulator.set_combiner(combiner);
    simulator.simulate()
}

fn baseline_map() -> MapProfile {
    let mut profile = MapProfile::new("job_m_avg_0", 0);
    profile.set_counter(CounterKind::MapInputRecords, 100_000);
    profile.set_counter(CounterKind::MapInputBytes, 10_000_000);
    profile.set_counter(CounterKind::MapOutputRecords, 100_000);
    profile.set_counter(CounterKind::MapOutputBytes, 10_000_000);
    profile.set_counter(CounterKind::MapNumSpills, 1);
    profile.set_counter(CounterKind::MapRecordsPerSpill, 100_000);
    profile.set_counter(CounterKind::MapSpillSize, 10_000_000);
    profile.set_counter(CounterKind::MapOutputMaterializedBytes, 10_000_000);
    profile.set_counter(CounterKind::MapOutputMaterializedRecords, 100_000);
    profile.set_statistic(StatKind::InputPairWidth, 100.0);
    profile.set_statistic(StatKind::MapSizeSel, 1.0);
    profile.set_statistic(StatKind::MapPairsSel, 1.0);
    for (kind, value) in [
        (CostKind::ReadHdfsIoCost, 20.0),
        (CostKind::WriteHdfsIoCost, 30.0),
        (CostKind::ReadLocalIoCost, 10.0),
        (CostKind::WriteLocalIoCost, 10.0),
        (CostKind::NetworkCost, 5.0),
        (CostKind::MapCpuCost, 1000.0),
        (CostKind::PartitionCpuCost, 50.0),
        (CostKind::SerdeCpuCost, 50.0),
        (CostKind::SortCpuCost, 20.0),
        (CostKind::MergeCpuCost, 30.0),
        (CostKind::CombineCpuCost, 100.0),
    ] {
        profile.set_cost_factor(kind, value);
    }
    profile.set_timing(PhaseKind::Setup, 100.0);
    profile.set_timing(PhaseKind::Cleanup, 50.0);
    profile
}

fn baseline_reduce() -> ReduceProfile {
    let mut profile = ReduceProfile::new("job_r_avg");
    profile.set_counter(CounterKind::ReduceShuffleBytes, 100_000_000);
    profile.set_counter(CounterKind::ReduceInputRecords, 1_000_000);
    profile.set_counter(CounterKind::ReduceInputGroups, 100_000);
    profile.set_counter(CounterKind::ReduceInputBytes, 100_000_000);
    profile.set_counter(CounterKind::ReduceOutputRecords, 100_000);
    profile.set_counter(CounterKind::ReduceOutputBytes, 10_000_000);
    for (kind, value) in [
        (CostKind::NetworkCost, 5.0),
        (CostKind::ReadLocalIoCost, 10.0),
        (CostKind::WriteLocalIoCost, 10.0),
        (CostKind::WriteHdfsIoCost, 30.0),
        (CostKind::MergeCpuCost, 30.0),
        (CostKind::ReduceCpuCost, 500.0),
    ] {
        profile.set_cost_factor(kind, value);
    }
    profile.set_timing(PhaseKind::Setup, 100.0);
    profile.set_timing(PhaseKind::Cleanup, 50.0);
    profile
}

fn baseline_job(with_reduce: bool) -> JobProfile {
    let mut job = JobProfile::new("job");
    job.set_job_inputs(vec!["/data/input".to_string()]);
    job.add_map_profile(baseline_map());
    if with_reduce {
        job.add_reduce_profile(baseline_reduce());
    }
    job.update_profile();
    job
}

fn map_specs(total_bytes: u64, num_splits: u32) -> MapInputSpecs {
    MapInputSpecs {
        input_index: 0,
        num_splits,
        total_bytes,
        is_compressed: false,
        locality: DataLocality::DataLocal,
    }
}

fn settings(conf: &Configuration) -> TaskSettings {
    TaskSettings::from_conf(conf).unwrap()
}

// Merge simulator

#[test]
fn merge_with_combiner() {
    // Selectivities 4 and 2 produce the documented 72 records and 7880 bytes. Half the logarithms of the merged
    // volumes would give 95 records instead.
    let combiner = Combiner::new(3, 4.0, 2.0);
    let result = simulate(19, Segment::new(1024, 10), 5, Some(combiner));
    assert_eq!(result.num_merge_passes, 5);
    assert_eq!(result.spilled_records, 252);
    assert_eq!(result.bytes_read, 37888);
    assert_eq!(result.bytes_written, 26312);
    assert_eq!(result.combine_in_records, 190);
    assert_eq!(result.combine_out_records, 72);
    assert_eq!(result.output, Segment::new(7880, 72));
}

#[test]
fn merge_without_combiner() {
    let result = simulate(26, Segment::new(1024, 10), 5, None);
    assert_eq!(result.num_merge_passes, 7);
    assert_eq!(result.spilled_records, 540);
    assert_eq!(result.merged_records, 540);
    assert_eq!(result.bytes_read, 55296);
    assert_eq!(result.bytes_written, 55296);
    assert_eq!(result.output, Segment::new(26624, 260));
    assert_eq!(result.remaining_segments, 1);
}

#[test]
fn merge_of_single_segment_is_free() {
    for num_segments in 0..=1 {
        let result = simulate(num_segments, Segment::new(1024, 10), 5, None);
        assert_eq!(result.num_merge_passes, 0);
        assert_eq!(result.bytes_read, 0);
        assert_eq!(result.bytes_written, 0);
        assert_eq!(result.spilled_records, 0);
        assert_eq!(result.merged_records, 0);
        assert_eq!(result.output, Segment::new(1024, 10).times(num_segments));
    }
}

#[test]
fn merge_folds_memory_into_first_pass() {
    let mut simulator = MergeSimulator::new(3);
    simulator.add_segments(4, Segment::new(100, 1));
    simulator.add_in_memory_segments(2, Segment::new(50, 1));
    let result = simulator.simulate();
    // 6 segments with fan-in 3: the first pass merges 2 segments, both taken from memory
    assert_eq!(result.num_merge_passes, 3);
    assert_eq!(result.bytes_read, 300 + 500);
    assert_eq!(result.bytes_written, 100 + 300 + 500);
    assert_eq!(result.output, Segment::new(500, 6));
}

#[test]
fn merge_skipping_final_pass() {
    let mut simulator = MergeSimulator::new(5);
    simulator.add_segments(26, Segment::new(1024, 10));
    simulator.set_skip_final_merge(true);
    let result = simulator.simulate();
    assert_eq!(result.num_merge_passes, 6);
    assert_eq!(result.bytes_read, 28672);
    assert_eq!(result.bytes_written, 28672);
    assert_eq!(result.spilled_records, 280);
    // The reader of the remaining segments still merges all 260 input records
    assert_eq!(result.merged_records, 540);
    assert_eq!(result.remaining_segments, 5);
    assert_eq!(result.output, Segment::new(26624, 260));

    let mut simulator = MergeSimulator::new(5);
    simulator.add_segments(3, Segment::new(1024, 10));
    simulator.add_in_memory_segment(Segment::new(10, 1));
    simulator.set_skip_final_merge(true);
    let result = simulator.simulate();
    assert_eq!(result.num_merge_passes, 0);
    assert_eq!(result.merged_records, 31);
    assert_eq!(result.remaining_segments, 4);
    assert_eq!(result.output_in_memory, Segment::new(10, 1));
}

#[test]
fn merge_conserves_data_without_combiner() {
    let mut rng = Pcg64::seed_from_u64(123);
    for _ in 0..200 {
        let factor = rng.gen_range(2..12);
        let mut simulator = MergeSimulator::new(factor);
        let mut total = Segment::default();
        for _ in 0..rng.gen_range(2..150) {
            let segment = Segment::new(rng.gen_range(1..10_000), rng.gen_range(1..100));
            total = total + segment;
            simulator.add_segment(segment);
        }
        let result = simulator.simulate();
        assert_eq!(result.output, total);
        assert_eq!(result.bytes_read, result.bytes_written);
        assert!(result.bytes_written >= total.size_bytes);
        assert!(result.spilled_records >= total.num_records);
    }
}

#[test]
fn spilled_records_grow_with_segments() {
    let segment = Segment::new(1024, 10);
    let mut previous = 0;
    for num_segments in 2..=49 {
        let spilled = simulate(num_segments, segment, 7, None).spilled_records;
        assert!(spilled > previous);
        previous = spilled;
    }
}

#[test]
fn combiner_never_grows_output() {
    let segment = Segment::new(4096, 64);
    for num_segments in 1..60 {
        let plain = simulate(num_segments, segment, 10, None);
        let strong = simulate(num_segments, segment, 10, Some(Combiner::new(3, 1.0, 1.0)));
        let weak = simulate(num_segments, segment, 10, Some(Combiner::new(3, 4.0, 4.0)));
        assert!(strong.output.size_bytes <= weak.output.size_bytes);
        assert!(strong.output.num_records <= weak.output.num_records);
        assert!(weak.output.size_bytes <= plain.output.size_bytes);
        assert!(weak.output.num_records <= plain.output.num_records);
        assert!(strong.spilled_records <= plain.spilled_records);
    }
}

#[test]
fn combiner_below_threshold_is_skipped() {
    let result = simulate(2, Segment::new(1024, 10), 10, Some(Combiner::new(3, 1.0, 1.0)));
    assert_eq!(result.combine_in_records, 0);
    assert_eq!(result.output, Segment::new(2048, 20));
}

#[test]
fn calibrated_combiner_reproduces_observed_ratio() {
    let combiner = Combiner::calibrated(1, 0.25, 0.5, 1_000_000, 10_000);
    let output = combiner.combine(Segment::new(1_000_000, 10_000), Segment::new(1, 1));
    assert!(output.size_bytes.abs_diff(250_000) <= 1);
    assert!(output.num_records.abs_diff(5_000) <= 1);
}

// Merge pass formulas

#[test]
fn pass_formulas() {
    assert_eq!(num_spills_first_pass(26, 5), 2);
    assert_eq!(num_spills_first_pass(19, 5), 3);
    assert_eq!(num_spills_first_pass(17, 5), 5);
    assert_eq!(num_spills_first_pass(4, 5), 4);
    assert_eq!(num_spills_interm_merge(19, 5), 18);
    assert_eq!(num_spills_interm_merge(5, 5), 0);
    assert_eq!(num_merge_passes(19, 5), 5);
    assert_eq!(num_merge_passes(25, 5), 6);
    assert_eq!(num_merge_passes(5, 5), 1);
    assert_eq!(num_merge_passes(1, 5), 0);
}

#[test]
fn closed_form_matches_simulation() {
    let spill = Segment::new(1000, 37);
    for factor in 2..=10u64 {
        for num_spills in 0..=factor * factor {
            let combiners = [None, Some(Combiner::new(3, 2.0, 3.0)), Some(Combiner::new(1, 0.5, 0.5))];
            for combiner in combiners {
                assert_eq!(
                    closed_form_merge(num_spills, spill, factor, combiner),
                    simulate(num_spills, spill, factor as usize, combiner),
                    "{num_spills} spills, factor {factor}, combiner {combiner:?}"
                );
            }
        }
    }
}

#[test]
fn closed_form_matches_simulation_on_random_spills() {
    let mut rng = Pcg64::seed_from_u64(456);
    for _ in 0..500 {
        let factor = rng.gen_range(2..=30u64);
        let num_spills = rng.gen_range(0..=factor * factor);
        let spill = Segment::new(rng.gen_range(1..1 << 24), rng.gen_range(1..1 << 16));
        let combiner = rng.gen_bool(0.5).then(|| {
            Combiner::new(
                rng.gen_range(1..6),
                rng.gen_range(0.1..10.0),
                rng.gen_range(0.1..10.0),
            )
        });
        assert_eq!(
            closed_form_merge(num_spills, spill, factor, combiner),
            simulate(num_spills, spill, factor as usize, combiner),
            "{num_spills} spills of {spill:?}, factor {factor}, combiner {combiner:?}"
        );
    }
}

// Configuration

#[test]
fn configuration_defaults() {
    let settings = settings(&Configuration::new());
    assert_eq!(settings.num_reducers, 1);
    assert!(!settings.use_combiner);
    assert!(!settings.compress_map_output);
    assert_eq!(settings.sort_buffer_bytes, 100 * MB);
    assert_eq!(settings.sort_record_percent, 0.05);
    assert_eq!(settings.sort_spill_percent, 0.8);
    assert_eq!(settings.sort_factor, 10);
    assert_eq!(settings.spills_for_combine, 3);
    assert_eq!(settings.task_memory, 200 * MB);
    assert_eq!(settings.shuffle_input_buffer_percent, 0.70);
    assert_eq!(settings.shuffle_merge_percent, 0.66);
    assert_eq!(settings.inmem_merge_threshold, 1000);
    assert_eq!(settings.reduce_input_buffer_percent, 0.0);
    assert_eq!(settings.shuffle_segment_disk_fraction, 0.25);
}

#[test]
fn configuration_task_memory() {
    let conf = Configuration::new().with(keys::CHILD_JAVA_OPTS, "-server -Xmx1g -Djava.net.preferIPv4Stack=true");
    assert_eq!(conf.task_memory().unwrap(), 1 << 30);
    let conf = Configuration::new().with(keys::CHILD_JAVA_OPTS, "-Xmx512m");
    assert_eq!(conf.task_memory().unwrap(), 512 * MB);
    let conf = Configuration::new().with(keys::CHILD_JAVA_OPTS, "-verbose:gc");
    assert_eq!(conf.task_memory().unwrap(), 200 * MB);
    let conf = Configuration::new().with(keys::CHILD_JAVA_OPTS, "-Xmxlots");
    assert!(matches!(conf.task_memory(), Err(WhatIfError::InvalidConfig { .. })));
}

#[test]
fn configuration_rejects_malformed_values() {
    for (key, value) in [
        (keys::SORT_MB, "a lot"),
        (keys::SORT_FACTOR, "1"),
        (keys::SORT_SPILL_PERCENT, "1.5"),
        (keys::COMPRESS_MAP_OUTPUT, "maybe"),
        (keys::NUM_REDUCERS, "-1"),
        (keys::SORT_MB, "0"),
        (keys::SORT_RECORD_PERCENT, "0"),
        (keys::SORT_RECORD_PERCENT, "1"),
        (keys::SORT_SPILL_PERCENT, "0"),
    ] {
        let conf = Configuration::new().with(key, value);
        assert!(
            matches!(TaskSettings::from_conf(&conf), Err(WhatIfError::InvalidConfig { .. })),
            "{key}={value}"
        );
    }
}

#[test]
fn configuration_from_yaml() {
    let conf = Configuration::from_yaml_str(
        r#"
mapred.reduce.tasks: 8
mapred.compress.map.output: true
io.sort.spill.percent: 0.9
mapreduce.combine.class: org.example.SumCombiner
mapred.output.compress: ~
"#,
    )
    .unwrap();
    assert_eq!(conf.get(keys::NUM_REDUCERS), Some("8"));
    assert!(!conf.contains(keys::COMPRESS_OUTPUT));
    let settings = settings(&conf);
    assert_eq!(settings.num_reducers, 8);
    assert!(settings.compress_map_output);
    assert!(settings.use_combiner);
    assert_eq!(settings.sort_spill_percent, 0.9);

    assert!(Configuration::from_yaml_str("io.sort.mb: [1, 2]").is_err());
}

// Map oracle

#[test]
fn map_oracle_rejects_empty_baseline() {
    let result = MapProfileOracle::new("job", MapProfile::new("empty", 0));
    assert!(matches!(result, Err(WhatIfError::EmptyProfile(_))));
}

#[test]
fn map_oracle_needs_pair_width() {
    let mut baseline = MapProfile::new("job_m_avg_0", 0);
    baseline.set_cost_factor(CostKind::MapCpuCost, 1000.0);
    let oracle = MapProfileOracle::new("job", baseline).unwrap();
    let result = oracle.whatif(&Configuration::new(), &map_specs(MB, 1));
    assert!(matches!(
        result,
        Err(WhatIfError::MissingCounter {
            counter: CounterKind::MapInputRecords,
            ..
        })
    ));
}

#[test]
fn map_oracle_spills() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let conf = Configuration::new().with(keys::SORT_MB, 1);
    let profile = oracle.whatif(&conf, &map_specs(20 * MB, 2)).unwrap();

    assert_eq!(profile.task_id(), "job_m_whatif_0");
    assert_eq!(profile.num_tasks(), 2);
    assert_eq!(profile.counter(CounterKind::HdfsBytesRead, 0), (10 * MB) as i64);
    assert_eq!(profile.counter(CounterKind::MapInputRecords, 0), 104_858);
    assert_eq!(profile.counter(CounterKind::MapOutputRecords, 0), 104_858);
    // The accounting area of 1MB * 0.05 * 0.8 holds 2621 records
    assert_eq!(profile.counter(CounterKind::MapRecsPerBuffSpill, 0), 2621);
    assert_eq!(profile.counter(CounterKind::MapNumSpills, 0), 41);
    assert_eq!(profile.counter(CounterKind::MapNumSpillMerges, 0), 5);
    assert_eq!(profile.counter(CounterKind::MapOutputMaterializedRecords, 0), 41 * 2621);
    assert!(profile.counter(CounterKind::SpilledRecords, 0) > 2 * 104_858);
    assert_eq!(profile.timing(PhaseKind::Setup, 0.0), 100.0);
    assert_eq!(profile.timing(PhaseKind::Cleanup, 0.0), 50.0);
    for phase in [PhaseKind::Read, PhaseKind::Map, PhaseKind::Collect, PhaseKind::Spill, PhaseKind::Merge] {
        assert!(profile.timing(phase, 0.0) > 0.0, "{phase}");
    }
    assert!(!profile.contains_timing(PhaseKind::Write));
}

#[test]
fn map_oracle_single_spill_skips_merge() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let profile = oracle.whatif(&Configuration::new(), &map_specs(10 * MB, 1)).unwrap();
    assert_eq!(profile.counter(CounterKind::MapNumSpills, 0), 1);
    assert_eq!(profile.counter(CounterKind::MapNumSpillMerges, 0), 0);
    assert_eq!(profile.counter(CounterKind::SpilledRecords, 0), 104_858);
    assert_eq!(
        profile.counter(CounterKind::MapOutputMaterializedBytes, 0),
        profile.counter(CounterKind::MapSpillSize, 0)
    );
    assert_eq!(profile.timing(PhaseKind::Merge, -1.0), 0.0);
}

#[test]
fn map_oracle_map_only() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let conf = Configuration::new()
        .with(keys::NUM_REDUCERS, 0)
        .with(keys::COMPRESS_OUTPUT, true);
    let profile = oracle.whatif(&conf, &map_specs(10 * MB, 1)).unwrap();
    let output_bytes = profile.counter(CounterKind::MapOutputBytes, 0);
    assert_eq!(profile.statistic(StatKind::OutCompressRatio, 0.0), 0.3);
    assert_eq!(
        profile.counter(CounterKind::HdfsBytesWritten, 0),
        (output_bytes as f64 * 0.3).round() as i64
    );
    assert!(!profile.contains_counter(CounterKind::MapNumSpills));
    assert!(profile.timing(PhaseKind::Write, 0.0) > 0.0);
    assert!(!profile.contains_timing(PhaseKind::Spill));
    assert_eq!(profile.cost_factor(CostKind::OutputCompressCpuCost, 0.0), 40.0);
}

#[test]
fn map_oracle_compression_toggles() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let plain = oracle.whatif(&Configuration::new(), &map_specs(10 * MB, 1)).unwrap();
    let conf = Configuration::new().with(keys::COMPRESS_MAP_OUTPUT, true);
    let compressed = oracle.whatif(&conf, &map_specs(10 * MB, 1)).unwrap();

    assert!(!plain.contains_statistic(StatKind::IntermCompressRatio));
    assert_eq!(compressed.statistic(StatKind::IntermCompressRatio, 0.0), 0.3);
    assert!(
        compressed.counter(CounterKind::MapOutputMaterializedBytes, 0)
            < plain.counter(CounterKind::MapOutputMaterializedBytes, 0)
    );
    assert_eq!(compressed.cost_factor(CostKind::IntermCompressCpuCost, 0.0), 40.0);

    // Switching compression off again forgets the ratio
    let mut baseline = baseline_map();
    baseline.set_statistic(StatKind::IntermCompressRatio, 0.5);
    let oracle = MapProfileOracle::new("job", baseline).unwrap();
    let profile = oracle.whatif(&Configuration::new(), &map_specs(10 * MB, 1)).unwrap();
    assert!(!profile.contains_statistic(StatKind::IntermCompressRatio));
    let profile = oracle.whatif(&conf, &map_specs(10 * MB, 1)).unwrap();
    assert_eq!(profile.statistic(StatKind::IntermCompressRatio, 0.0), 0.5);
}

#[test]
fn map_oracle_combiner() {
    let mut baseline = baseline_map();
    baseline.set_counter(CounterKind::CombineInputRecords, 100_000);
    baseline.set_counter(CounterKind::CombineOutputRecords, 10_000);
    let oracle = MapProfileOracle::new("job", baseline).unwrap();
    let conf = Configuration::new()
        .with(keys::SORT_MB, 1)
        .with(keys::COMBINER_CLASS, "org.example.SumCombiner");
    let combined = oracle.whatif(&conf, &map_specs(10 * MB, 1)).unwrap();
    let plain = oracle.whatif(&Configuration::new().with(keys::SORT_MB, 1), &map_specs(10 * MB, 1)).unwrap();

    assert_eq!(combined.statistic(StatKind::CombinePairsSel, 0.0), 0.1);
    assert_eq!(combined.counter(CounterKind::MapRecordsPerSpill, 0), 262);
    assert!(combined.counter(CounterKind::CombineInputRecords, 0) >= 104_858);
    assert!(
        combined.counter(CounterKind::MapOutputMaterializedRecords, 0)
            < plain.counter(CounterKind::MapOutputMaterializedRecords, 0)
    );
    assert!(combined.counter(CounterKind::SpilledRecords, 0) < plain.counter(CounterKind::SpilledRecords, 0));
}

#[test]
fn map_oracle_remote_reads_cost_more() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let local = oracle.whatif(&Configuration::new(), &map_specs(10 * MB, 1)).unwrap();
    let mut specs = map_specs(10 * MB, 1);
    specs.locality = DataLocality::RackLocal;
    let remote = oracle.whatif(&Configuration::new(), &specs).unwrap();
    let network = (10 * MB) as f64 * 5.0 / 1e6;
    assert!((remote.timing(PhaseKind::Read, 0.0) - local.timing(PhaseKind::Read, 0.0) - network).abs() < 1e-9);
}

#[test]
fn map_oracle_scales_with_input() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let conf = Configuration::new().with(keys::SORT_MB, 4);
    let mut previous: Option<MapProfile> = None;
    for split_mb in [1, 8, 32, 64, 256, 1024] {
        let profile = oracle.whatif(&conf, &map_specs(split_mb * MB, 1)).unwrap();
        if let Some(previous) = previous {
            for counter in [
                CounterKind::MapInputRecords,
                CounterKind::MapOutputBytes,
                CounterKind::MapNumSpills,
                CounterKind::SpilledRecords,
                CounterKind::FileBytesWritten,
            ] {
                assert!(profile.counter(counter, 0) >= previous.counter(counter, 0), "{counter:?}");
            }
            assert!(profile.total_time() > previous.total_time());
        }
        previous = Some(profile);
    }
}

#[test]
fn map_oracle_rejects_zero_splits() {
    let oracle = MapProfileOracle::new("job", baseline_map()).unwrap();
    let result = oracle.whatif(&Configuration::new(), &map_specs(MB, 0));
    assert!(matches!(result, Err(WhatIfError::InvalidSpec(_))));
}

// Reduce oracle

fn shuffle_specs(num_shuffles: u32, segment_bytes: u64, segment_records: u64) -> ReduceShuffleSpecs {
    ReduceShuffleSpecs {
        num_reducers: 2,
        num_shuffles,
        segment_bytes,
        segment_records,
    }
}

#[test]
fn reduce_oracle_rejects_empty_baseline() {
    let result = ReduceProfileOracle::new("job", ReduceProfile::new("empty"));
    assert!(matches!(result, Err(WhatIfError::EmptyProfile(_))));
}

#[test]
fn reduce_oracle_large_segments_go_to_disk() {
    let oracle = ReduceProfileOracle::new("job", baseline_reduce()).unwrap();
    let profile = oracle
        .whatif(&Configuration::new(), &shuffle_specs(5, 100 * MB, 1_000_000))
        .unwrap();
    assert_eq!(profile.task_id(), "job_r_whatif_0");
    assert_eq!(profile.num_tasks(), 2);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleBytes, 0), (500 * MB) as i64);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 5);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 0);
    assert_eq!(profile.counter(CounterKind::ReduceSortMerges, 0), 0);
    assert_eq!(profile.counter(CounterKind::ReduceInputRecords, 0), 5_000_000);
    assert_eq!(profile.counter(CounterKind::ReduceInputGroups, 0), 500_000);
    assert_eq!(profile.counter(CounterKind::ReduceOutputRecords, 0), 500_000);
    assert_eq!(profile.counter(CounterKind::ReduceOutputBytes, 0), (50 * MB) as i64);
    assert_eq!(profile.counter(CounterKind::SpilledRecords, 0), 5_000_000);
    assert_eq!(profile.counter(CounterKind::FileBytesWritten, 0), (500 * MB) as i64);
    assert_eq!(profile.counter(CounterKind::FileBytesRead, 0), (500 * MB) as i64);
    assert_eq!(profile.timing(PhaseKind::Setup, 0.0), 100.0);
    // No sort pass, the merge CPU of the streamed final merge is still charged to sort
    assert!((profile.timing(PhaseKind::Sort, 0.0) - 5_000_000.0 * 30.0 / 1e6).abs() < 1e-9);
    // Reading the files back and reducing the records
    let reduce = (500 * MB) as f64 * 10.0 / 1e6 + 5_000_000.0 * 500.0 / 1e6;
    assert!((profile.timing(PhaseKind::Reduce, 0.0) - reduce).abs() < 1e-6);
    for phase in [PhaseKind::Shuffle, PhaseKind::Write] {
        assert!(profile.timing(phase, 0.0) > 0.0, "{phase}");
    }
}

#[test]
fn reduce_oracle_merges_shuffle_files() {
    let oracle = ReduceProfileOracle::new("job", baseline_reduce()).unwrap();
    let profile = oracle
        .whatif(&Configuration::new(), &shuffle_specs(30, 100 * MB, 1_000_000))
        .unwrap();
    // Files are merged 10 at a time whenever 19 of them exist
    assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 2);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 12);
    assert_eq!(profile.counter(CounterKind::ReduceSortMerges, 0), 1);
    assert_eq!(profile.counter(CounterKind::ReduceInputRecords, 0), 30_000_000);
    assert!(profile.timing(PhaseKind::Sort, 0.0) > 0.0);
}

#[test]
fn reduce_oracle_small_segments_merge_in_memory() {
    let oracle = ReduceProfileOracle::new("job", baseline_reduce()).unwrap();
    let profile = oracle
        .whatif(&Configuration::new(), &shuffle_specs(100, MB, 10_000))
        .unwrap();
    // 93 segments fill the merge threshold of the buffer, the remaining 7 are spilled by the sort
    assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 1);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 0);
    assert_eq!(profile.counter(CounterKind::ReduceSortMerges, 0), 0);
    assert_eq!(profile.counter(CounterKind::ReduceInputRecords, 0), 1_000_000);
    assert_eq!(profile.counter(CounterKind::FileBytesWritten, 0), (100 * MB) as i64);
    assert_eq!(profile.counter(CounterKind::FileBytesRead, 0), (100 * MB) as i64);

    // Keeping the leftover in memory saves writing it
    let conf = Configuration::new().with(keys::REDUCE_INPUT_BUFFER_PERCENT, 0.5);
    let retained = oracle.whatif(&conf, &shuffle_specs(100, MB, 10_000)).unwrap();
    assert_eq!(retained.counter(CounterKind::ReduceShuffleFiles, 0), 1);
    assert_eq!(retained.counter(CounterKind::FileBytesWritten, 0), (93 * MB) as i64);
    assert_eq!(retained.counter(CounterKind::FileBytesRead, 0), (93 * MB) as i64);
    assert_eq!(retained.counter(CounterKind::ReduceInputRecords, 0), 1_000_000);
    assert_eq!(
        retained.timing(PhaseKind::Shuffle, 0.0),
        profile.timing(PhaseKind::Shuffle, 0.0)
    );
    // Writing the 7 evicted segments and merging their records
    let eviction = (7 * MB) as f64 * 10.0 / 1e6 + 70_000.0 * 30.0 / 1e6;
    let sort_difference = profile.timing(PhaseKind::Sort, 0.0) - retained.timing(PhaseKind::Sort, 0.0);
    assert!((sort_difference - eviction).abs() < 1e-6);
}

#[test]
fn reduce_oracle_evicts_in_sort_phase() {
    let oracle = ReduceProfileOracle::new("job", baseline_reduce()).unwrap();
    // 18 in-memory merges of 93 segments each, 5 segments left in memory
    let specs = shuffle_specs(93 * 18 + 5, MB, 10_000);
    let evicted = oracle.whatif(&Configuration::new(), &specs).unwrap();
    let conf = Configuration::new().with(keys::REDUCE_INPUT_BUFFER_PERCENT, 0.5);
    let retained = oracle.whatif(&conf, &specs).unwrap();

    for profile in [&evicted, &retained] {
        assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 18);
        assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 0);
        assert_eq!(profile.counter(CounterKind::ReduceInputRecords, 0), (93 * 18 + 5) * 10_000);
        assert!(profile.timing(PhaseKind::Sort, 0.0) > 0.0);
    }
    assert_eq!(evicted.timing(PhaseKind::Shuffle, 0.0), retained.timing(PhaseKind::Shuffle, 0.0));
    // The evicted file joins the first sort pass, the held segments need a pass of their own
    assert_eq!(evicted.counter(CounterKind::ReduceSortMerges, 0), 1);
    assert_eq!(retained.counter(CounterKind::ReduceSortMerges, 0), 2);
    assert_eq!(
        evicted.counter(CounterKind::SpilledRecords, 0),
        retained.counter(CounterKind::SpilledRecords, 0)
    );
    assert!(evicted.timing(PhaseKind::Sort, 0.0) > retained.timing(PhaseKind::Sort, 0.0));
}

#[test]
fn reduce_oracle_inmem_threshold_zero_removes_cap() {
    let oracle = ReduceProfileOracle::new("job", baseline_reduce()).unwrap();
    let specs = shuffle_specs(50, 1024, 10);
    for threshold in ["0", "-1"] {
        let conf = Configuration::new().with(keys::INMEM_MERGE_THRESHOLD, threshold);
        assert_eq!(settings(&conf).inmem_merge_threshold, 0);
        let profile = oracle.whatif(&conf, &specs).unwrap();
        assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 0, "{threshold}");
        assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 0, "{threshold}");
        assert_eq!(profile.counter(CounterKind::ReduceInputRecords, 0), 500, "{threshold}");
    }

    // One segment per merge: every 19th file triggers a merge of 10
    let conf = Configuration::new().with(keys::INMEM_MERGE_THRESHOLD, 1);
    let profile = oracle.whatif(&conf, &specs).unwrap();
    assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 14);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 4);
}

#[test]
fn reduce_oracle_segment_fraction_is_configurable() {
    let oracle = ReduceProfileOracle::new("job", baseline_reduce()).unwrap();
    let conf = Configuration::new().with(keys::SHUFFLE_SEGMENT_DISK_FRACTION, 0.001);
    let profile = oracle.whatif(&conf, &shuffle_specs(100, MB, 10_000)).unwrap();
    assert_eq!(profile.counter(CounterKind::ReduceShuffleFiles, 0), 10);
    assert_eq!(profile.counter(CounterKind::ReduceShuffleMerges, 0), 10);
}

#[test]
fn reduce_oracle_combines_in_memory_merges() {
    let mut baseline = baseline_reduce();
    baseline.set_counter(CounterKind::CombineInputRecords, 1_000_000);
    baseline.set_counter(CounterKind::CombineOutputRecords, 250_000);
    let oracle = ReduceProfileOracle::new("job", baseline).unwrap();
    let conf = Configuration::new().with(keys::COMBINER_CLASS, "org.example.SumCombiner");
    let profile = oracle.whatif(&conf, &shuffle_specs(100, MB, 10_000)).unwrap();
    assert_eq!(profile.counter(CounterKind::CombineInputRecords, 0), 930_000);
    let combined = profile.counter(CounterKind::CombineOutputRecords, 0);
    assert!(combined < 930_000 && combined >= 10_000);
    assert_eq!(profile.counter(CounterKind::ReduceInputRecords, 0), combined + 70_000);
}

// Job oracle

#[test]
fn job_oracle_rejects_empty_baseline() {
    let result = JobProfileOracle::new(&JobProfile::new("job"));
    assert!(matches!(result, Err(WhatIfError::EmptyProfile(_))));
}

#[test]
fn job_oracle_whatif() {
    let baseline = baseline_job(true);
    let oracle = JobProfileOracle::new(&baseline).unwrap();
    let model = UniformDataSetModel::new(vec![InputDataSet {
        total_bytes: 256 * MB,
        is_compressed: false,
        locality: DataLocality::DataLocal,
    }]);
    let conf = Configuration::new().with(keys::NUM_REDUCERS, 4);
    let job = oracle.whatif(&conf, &model).unwrap();

    assert_eq!(job.job_id(), "job");
    assert_eq!(job.job_inputs(), baseline.job_inputs());
    assert_eq!(job.counter(CounterKind::MapTasks, 0), 4);
    assert_eq!(job.counter(CounterKind::ReduceTasks, 0), 4);
    assert_eq!(job.avg_map_profiles().len(), 1);
    assert_eq!(job.avg_map_profiles()[0].num_tasks(), 4);
    let reduce = job.avg_reduce_profile().unwrap();
    assert_eq!(reduce.num_tasks(), 4);
    assert!(reduce.contains_counter(CounterKind::ReduceShuffleFiles));

    // Every reducer fetches a quarter of every map output
    let map = &job.map_profiles()[0];
    let materialized = map.counter(CounterKind::MapOutputMaterializedBytes, 0);
    assert_eq!(
        reduce.counter(CounterKind::ReduceShuffleBytes, 0),
        4 * ((materialized + 3) / 4)
    );
}

#[test]
fn job_oracle_map_only_and_ignored_reducers() {
    let model = UniformDataSetModel::new(vec![InputDataSet {
        total_bytes: 100 * MB,
        is_compressed: false,
        locality: DataLocality::DataLocal,
    }]);

    let oracle = JobProfileOracle::new(&baseline_job(false)).unwrap();
    let conf = Configuration::new().with(keys::NUM_REDUCERS, 0);
    let job = oracle.whatif(&conf, &model).unwrap();
    assert_eq!(job.counter(CounterKind::MapTasks, 0), 2);
    assert_eq!(job.counter(CounterKind::ReduceTasks, -1), 0);
    assert!(job.avg_reduce_profile().is_none());

    let result = oracle.whatif(&Configuration::new(), &model);
    assert!(matches!(result, Err(WhatIfError::EmptyProfile(_))));

    let oracle = oracle.with_ignore_reducers(true);
    let job = oracle.whatif(&Configuration::new(), &model).unwrap();
    assert!(job.reduce_profiles().is_empty());
    assert!(job.avg_map_profiles()[0].contains_counter(CounterKind::MapNumSpills));
}

#[test]
fn job_oracle_rejects_unknown_input() {
    let oracle = JobProfileOracle::new(&baseline_job(true)).unwrap();
    let model = UniformDataSetModel::new(vec![
        InputDataSet {
            total_bytes: MB,
            is_compressed: false,
            locality: DataLocality::DataLocal,
        },
        InputDataSet {
            total_bytes: MB,
            is_compressed: true,
            locality: DataLocality::NonLocal,
        },
    ]);
    let result = oracle.whatif(&Configuration::new(), &model);
    assert!(matches!(result, Err(WhatIfError::InvalidSpec(_))));
}

#[test]
fn job_oracle_validates_against_itself() {
    let oracle = JobProfileOracle::new(&baseline_job(true)).unwrap();
    let model = UniformDataSetModel::new(vec![InputDataSet {
        total_bytes: 128 * MB,
        is_compressed: false,
        locality: DataLocality::DataLocal,
    }]);
    let conf = Configuration::new().with(keys::NUM_REDUCERS, 2);
    let measured = oracle.whatif(&conf, &model).unwrap();
    let comparison = oracle.validate(&conf, &model, &measured).unwrap();
    assert_eq!(comparison.max_total_relative_error(), 0.0);

    let map_only = oracle
        .whatif(&Configuration::new().with(keys::NUM_REDUCERS, 0), &model)
        .unwrap();
    let result = oracle.validate(&conf, &model, &map_only);
    assert!(matches!(result, Err(WhatIfError::Profile(_))));
}

// Data set model

#[test]
fn uniform_model_splits_inputs() {
    let model = UniformDataSetModel::from_yaml_str(
        r#"
- total_bytes: 200000000
  is_compressed: true
  locality: RackLocal
- total_bytes: 0
- total_bytes: 1
"#,
    )
    .unwrap();
    let specs = model.map_input_specs(&Configuration::new()).unwrap();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].num_splits, 3);
    assert!(specs[0].is_compressed);
    assert_eq!(specs[0].locality, DataLocality::RackLocal);
    assert_eq!(specs[1].input_index, 2);
    assert_eq!(specs[1].num_splits, 1);

    let conf = Configuration::new().with(keys::MIN_SPLIT_SIZE, 128 * MB);
    assert_eq!(model.map_input_specs(&conf).unwrap()[0].num_splits, 2);
    let conf = Configuration::new().with(keys::BLOCK_SIZE, 32 * MB);
    assert_eq!(model.map_input_specs(&conf).unwrap()[0].num_splits, 6);
}

#[test]
fn uniform_model_partitions_shuffle() {
    let model = UniformDataSetModel::default();
    let mut map = MapProfile::new("m", 0);
    map.set_num_tasks(3);
    map.set_counter(CounterKind::MapOutputMaterializedBytes, 1000);
    map.set_counter(CounterKind::MapOutputMaterializedRecords, 40);
    let conf = Configuration::new().with(keys::NUM_REDUCERS, 4);
    let specs = model.reduce_shuffle_specs(&conf, &[map]).unwrap();
    assert_eq!(
        specs,
        vec![ReduceShuffleSpecs {
            num_reducers: 4,
            num_shuffles: 3,
            segment_bytes: 250,
            segment_records: 10,
        }]
    );
    let conf = Configuration::new().with(keys::NUM_REDUCERS, 0);
    assert!(model.reduce_shuffle_specs(&conf, &[]).unwrap().is_empty());
}

// Batch evaluation

#[test]
fn batch_evaluates_grid() {
    let oracle = Arc::new(JobProfileOracle::new(&baseline_job(true)).unwrap());
    let model: Arc<dyn DataSetModel> = Arc::new(UniformDataSetModel::new(vec![InputDataSet {
        total_bytes: 128 * MB,
        is_compressed: false,
        locality: DataLocality::DataLocal,
    }]));
    let grid = grid_from_yaml_str(
        r#"
io.sort.mb: [50, 100]
mapred.reduce.tasks: [1, 2, oops]
"#,
    )
    .unwrap();
    let results = WhatIfBatch::new(oracle, model, Configuration::new(), grid).run(3);

    let names = results.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "io.sort.mb=100,mapred.reduce.tasks=1",
            "io.sort.mb=100,mapred.reduce.tasks=2",
            "io.sort.mb=100,mapred.reduce.tasks=oops",
            "io.sort.mb=50,mapred.reduce.tasks=1",
            "io.sort.mb=50,mapred.reduce.tasks=2",
            "io.sort.mb=50,mapred.reduce.tasks=oops",
        ]
    );
    for result in results.iter() {
        if result.name.ends_with("oops") {
            assert!(result.profile.is_none());
            assert!(result.error.is_some());
        } else {
            let profile = result.profile.as_ref().unwrap();
            assert_eq!(
                profile.counter(CounterKind::ReduceTasks, 0).to_string(),
                result.conf.get(keys::NUM_REDUCERS).unwrap()
            );
        }
    }
}

#[test]
fn batch_without_grid_runs_base() {
    let oracle = Arc::new(JobProfileOracle::new(&baseline_job(true)).unwrap());
    let model: Arc<dyn DataSetModel> = Arc::new(UniformDataSetModel::new(vec![InputDataSet {
        total_bytes: MB,
        is_compressed: false,
        locality: DataLocality::DataLocal,
    }]));
    let results = WhatIfBatch::new(oracle, model, Configuration::new(), Default::default()).run(1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "base");
    assert!(results[0].profile.is_some());
}

#[test]
fn grid_rejects_non_scalar_values() {
    assert!(matches!(
        grid_from_yaml_str("io.sort.mb: [50, ~]"),
        Err(WhatIfError::InvalidConfig { .. })
    ));
    assert!(matches!(
        grid_from_yaml_str("io.sort.mb: [[50]]"),
        Err(WhatIfError::InvalidConfig { .. })
    ));
    let grid = grid_from_yaml_str("mapred.compress.map.output: [true, false]").unwrap();
    assert_eq!(grid["mapred.compress.map.output"], vec!["true", "false"]);
}
