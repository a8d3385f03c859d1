//! Analytical what-if engine for map/shuffle/reduce jobs.
//!
//! Given the measured profile of a job and a new configuration, [JobProfileOracle] derives the profile the job
//! would have if it ran again with that configuration, without running it.

pub mod batch;
pub mod configuration;
pub mod data_set_model;
pub mod error;
pub mod job_oracle;
pub mod map_oracle;
pub mod merge_simulator;
pub mod reduce_oracle;
pub mod specs;
pub mod task_oracle;

pub use batch::{BatchResult, ConfigurationGrid, WhatIfBatch};
pub use configuration::{Configuration, TaskSettings};
pub use data_set_model::{DataSetModel, InputDataSet, UniformDataSetModel};
pub use error::WhatIfError;
pub use job_oracle::JobProfileOracle;
pub use map_oracle::MapProfileOracle;
pub use merge_simulator::{Combiner, MergeResult, MergeSimulator, Segment};
pub use reduce_oracle::ReduceProfileOracle;
pub use specs::{DataLocality, MapInputSpecs, ReduceShuffleSpecs};
pub use task_oracle::TaskProfileOracle;
