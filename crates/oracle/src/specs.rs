//! Descriptions of the data a virtual task works on.

use serde::{Deserialize, Serialize};

use crate::error::WhatIfError;

/// Where the split of a map task is located relative to the task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLocality {
    #[default]
    DataLocal,
    RackLocal,
    NonLocal,
}

impl DataLocality {
    pub fn is_remote(&self) -> bool {
        !matches!(self, DataLocality::DataLocal)
    }
}

/// Input of a group of map tasks reading the same job input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapInputSpecs {
    /// Index of the job input, selects the baseline profile to derive from.
    pub input_index: usize,
    /// Number of map tasks, one per split.
    pub num_splits: u32,
    /// Total stored bytes of all splits.
    pub total_bytes: u64,
    pub is_compressed: bool,
    #[serde(default)]
    pub locality: DataLocality,
}

impl MapInputSpecs {
    /// Stored bytes of one split, at least 1.
    pub fn split_bytes(&self) -> u64 {
        self.total_bytes.div_ceil(self.num_splits.max(1) as u64).max(1)
    }

    pub fn validate(&self) -> Result<(), WhatIfError> {
        if self.num_splits == 0 {
            return Err(WhatIfError::InvalidSpec(format!(
                "no splits for input {}",
                self.input_index
            )));
        }
        Ok(())
    }
}

/// Data shuffled to a group of reduce tasks.
///
/// Every reducer of the group fetches `num_shuffles` segments of the same size, one per map task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReduceShuffleSpecs {
    pub num_reducers: u32,
    /// Number of fetched segments per reducer.
    pub num_shuffles: u32,
    /// On-disk (possibly compressed) bytes of one segment.
    pub segment_bytes: u64,
    pub segment_records: u64,
}

impl ReduceShuffleSpecs {
    pub fn validate(&self) -> Result<(), WhatIfError> {
        if self.num_reducers == 0 {
            return Err(WhatIfError::InvalidSpec("shuffle specs for zero reducers".to_string()));
        }
        Ok(())
    }
}
