//! Translation of a configuration into the data every virtual task works on.

use std::path::Path;

use mrwhatif_profile::{CounterKind, MapProfile};
use serde::{Deserialize, Serialize};

use crate::{
    configuration::{keys, Configuration},
    error::WhatIfError,
    specs::{DataLocality, MapInputSpecs, ReduceShuffleSpecs},
};

pub const DEFAULT_BLOCK_SIZE: u64 = 64 << 20;

/// Source of task inputs for a what-if run.
pub trait DataSetModel: Send + Sync {
    /// Input of map tasks, one entry per job input.
    fn map_input_specs(&self, conf: &Configuration) -> Result<Vec<MapInputSpecs>, WhatIfError>;

    /// Data shuffled to reducers, given the virtual map profiles just predicted.
    fn reduce_shuffle_specs(
        &self,
        conf: &Configuration,
        map_profiles: &[MapProfile],
    ) -> Result<Vec<ReduceShuffleSpecs>, WhatIfError>;
}

/// One input of a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDataSet {
    pub total_bytes: u64,
    #[serde(default)]
    pub is_compressed: bool,
    #[serde(default)]
    pub locality: DataLocality,
}

/// Inputs split into equal blocks, map output partitioned evenly over the reducers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniformDataSetModel {
    inputs: Vec<InputDataSet>,
}

impl UniformDataSetModel {
    pub fn new(inputs: Vec<InputDataSet>) -> Self {
        UniformDataSetModel { inputs }
    }

    /// Reads a YAML list of inputs. Position in the list is the input index.
    pub fn from_yaml<P: AsRef<Path>>(file: P) -> Result<Self, WhatIfError> {
        let content = std::fs::read_to_string(&file)
            .map_err(|e| WhatIfError::Parse(format!("can't read file {}: {e}", file.as_ref().display())))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, WhatIfError> {
        serde_yaml::from_str(content).map_err(|e| WhatIfError::Parse(e.to_string()))
    }

    pub fn inputs(&self) -> &[InputDataSet] {
        &self.inputs
    }

    /// Bytes of one split: the block size, raised to the minimum split size.
    pub fn split_size(conf: &Configuration) -> Result<u64, WhatIfError> {
        let block_size = conf.get_parsed(keys::BLOCK_SIZE, DEFAULT_BLOCK_SIZE)?;
        let min_split = conf.get_parsed(keys::MIN_SPLIT_SIZE, 0u64)?;
        Ok(block_size.max(min_split).max(1))
    }
}

impl DataSetModel for UniformDataSetModel {
    fn map_input_specs(&self, conf: &Configuration) -> Result<Vec<MapInputSpecs>, WhatIfError> {
        let split_size = Self::split_size(conf)?;
        let mut specs = Vec::new();
        for (input_index, input) in self.inputs.iter().enumerate() {
            if input.total_bytes == 0 {
                continue;
            }
            let num_splits = u32::try_from(input.total_bytes.div_ceil(split_size))
                .map_err(|_| WhatIfError::InvalidSpec(format!("too many splits for input {input_index}")))?;
            specs.push(MapInputSpecs {
                input_index,
                num_splits,
                total_bytes: input.total_bytes,
                is_compressed: input.is_compressed,
                locality: input.locality,
            });
        }
        Ok(specs)
    }

    fn reduce_shuffle_specs(
        &self,
        conf: &Configuration,
        map_profiles: &[MapProfile],
    ) -> Result<Vec<ReduceShuffleSpecs>, WhatIfError> {
        let num_reducers: u32 = conf.get_parsed(keys::NUM_REDUCERS, 1)?;
        let num_maps: u64 = map_profiles.iter().map(|p| p.num_tasks() as u64).sum();
        if num_reducers == 0 || num_maps == 0 {
            return Ok(Vec::new());
        }
        let (bytes, records) = map_profiles.iter().fold((0u64, 0u64), |(bytes, records), p| {
            let tasks = p.num_tasks() as u64;
            (
                bytes + p.counter(CounterKind::MapOutputMaterializedBytes, 0).max(0) as u64 * tasks,
                records + p.counter(CounterKind::MapOutputMaterializedRecords, 0).max(0) as u64 * tasks,
            )
        });
        let per_segment = (num_maps * num_reducers as u64).max(1);
        Ok(vec![ReduceShuffleSpecs {
            num_reducers,
            num_shuffles: u32::try_from(num_maps)
                .map_err(|_| WhatIfError::InvalidSpec(format!("too many map tasks: {num_maps}")))?,
            segment_bytes: bytes.div_ceil(per_segment),
            segment_records: records.div_ceil(per_segment),
        }])
    }
}
