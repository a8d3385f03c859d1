//! Profile model of map/shuffle/reduce jobs.
//!
//! A profile is a sparse set of counters, statistics, cost factors and phase timings. Measured and predicted
//! profiles share this schema, so consumers can not tell them apart.

pub mod compare;
pub mod error;
pub mod execution_profile;
pub mod job_profile;
pub mod metrics;
pub mod task_profile;

pub use error::ProfileError;
pub use execution_profile::ExecutionProfile;
pub use job_profile::JobProfile;
pub use metrics::{CostKind, CounterKind, PhaseKind, StatKind};
pub use task_profile::{MapProfile, ReduceProfile, TaskProfile};
