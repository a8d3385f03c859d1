//! Closed vocabularies of the metrics stored in a profile.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer volumes measured or predicted for a task or a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterKind {
    /// Number of map tasks of a job. Cardinality, never averaged.
    MapTasks,
    /// Number of reduce tasks of a job. Cardinality, never averaged.
    ReduceTasks,
    MapInputRecords,
    /// Uncompressed bytes consumed by the map function.
    MapInputBytes,
    MapOutputRecords,
    /// Serialized bytes emitted by the map function.
    MapOutputBytes,
    /// Records in the final map output file served to reducers.
    MapOutputMaterializedRecords,
    /// On-disk bytes of the final map output file served to reducers.
    MapOutputMaterializedBytes,
    CombineInputRecords,
    CombineOutputRecords,
    /// Records written to local disk by spills and merges.
    SpilledRecords,
    MapNumSpills,
    MapNumSpillMerges,
    /// Records in the sort buffer when it spills.
    MapRecsPerBuffSpill,
    /// Bytes in the sort buffer when it spills.
    MapBuffSpillSize,
    /// Records in one spill file.
    MapRecordsPerSpill,
    /// On-disk bytes of one spill file.
    MapSpillSize,
    ReduceShuffleBytes,
    ReduceInputGroups,
    ReduceInputRecords,
    ReduceInputBytes,
    ReduceOutputRecords,
    ReduceOutputBytes,
    /// Files written to local disk while shuffling.
    ReduceShuffleFiles,
    /// Merge rounds over on-disk files while shuffling.
    ReduceShuffleMerges,
    /// Intermediate merge passes of the sort phase.
    ReduceSortMerges,
    FileBytesRead,
    FileBytesWritten,
    HdfsBytesRead,
    HdfsBytesWritten,
}

/// Dimensionless ratios describing the data flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatKind {
    /// Average bytes per input record.
    InputPairWidth,
    MapSizeSel,
    MapPairsSel,
    ReduceSizeSel,
    ReducePairsSel,
    CombineSizeSel,
    CombinePairsSel,
    /// Compressed size over uncompressed size of the job input.
    InputCompressRatio,
    /// Compressed size over uncompressed size of the intermediate data.
    IntermCompressRatio,
    /// Compressed size over uncompressed size of the job output.
    OutCompressRatio,
    MapMemPerRecord,
    ReduceMemPerRecord,
}

/// Calibrated unit costs, in nanoseconds per byte or per record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostKind {
    ReadHdfsIoCost,
    WriteHdfsIoCost,
    ReadLocalIoCost,
    WriteLocalIoCost,
    /// Aggregate transfer cost of one byte between hosts.
    NetworkCost,
    MapCpuCost,
    ReduceCpuCost,
    CombineCpuCost,
    PartitionCpuCost,
    SerdeCpuCost,
    SortCpuCost,
    MergeCpuCost,
    InputUncompressCpuCost,
    IntermUncompressCpuCost,
    IntermCompressCpuCost,
    OutputCompressCpuCost,
}

/// Named phases of the task pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseKind {
    Setup,
    Read,
    Map,
    Collect,
    Spill,
    Merge,
    Shuffle,
    Sort,
    Reduce,
    Write,
    Cleanup,
}

impl PhaseKind {
    /// Phases of a map task in pipeline order.
    pub const MAP_PHASES: [PhaseKind; 8] = [
        PhaseKind::Setup,
        PhaseKind::Read,
        PhaseKind::Map,
        PhaseKind::Collect,
        PhaseKind::Spill,
        PhaseKind::Merge,
        PhaseKind::Write,
        PhaseKind::Cleanup,
    ];

    /// Phases of a reduce task in pipeline order.
    pub const REDUCE_PHASES: [PhaseKind; 6] = [
        PhaseKind::Setup,
        PhaseKind::Shuffle,
        PhaseKind::Sort,
        PhaseKind::Reduce,
        PhaseKind::Write,
        PhaseKind::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PhaseKind::Setup => "SETUP",
            PhaseKind::Read => "READ",
            PhaseKind::Map => "MAP",
            PhaseKind::Collect => "COLLECT",
            PhaseKind::Spill => "SPILL",
            PhaseKind::Merge => "MERGE",
            PhaseKind::Shuffle => "SHUFFLE",
            PhaseKind::Sort => "SORT",
            PhaseKind::Reduce => "REDUCE",
            PhaseKind::Write => "WRITE",
            PhaseKind::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
