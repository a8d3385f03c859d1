//! Profile of a whole job.

use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    metrics::CounterKind,
    task_profile::{MapProfile, ReduceProfile},
    ExecutionProfile,
};

/// Profile of a job together with the profiles of its tasks.
///
/// The job-level metrics and the averaged task profiles are derived data, they are recomputed from
/// [map_profiles](JobProfile::map_profiles) and [reduce_profiles](JobProfile::reduce_profiles) by
/// [update_profile](JobProfile::update_profile).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobProfile {
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cluster_name: Option<String>,
    #[serde(default)]
    job_inputs: Vec<String>,
    #[serde(default)]
    map_profiles: Vec<MapProfile>,
    #[serde(default)]
    reduce_profiles: Vec<ReduceProfile>,
    #[serde(default)]
    avg_map_profiles: Vec<MapProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avg_reduce_profile: Option<ReduceProfile>,
    #[serde(flatten)]
    profile: ExecutionProfile,
}

impl JobProfile {
    /// Creates new empty job profile.
    pub fn new(job_id: impl Into<String>) -> Self {
        JobProfile {
            job_id: job_id.into(),
            cluster_name: None,
            job_inputs: Vec::new(),
            map_profiles: Vec::new(),
            reduce_profiles: Vec::new(),
            avg_map_profiles: Vec::new(),
            avg_reduce_profile: None,
            profile: ExecutionProfile::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    pub fn set_cluster_name(&mut self, cluster_name: Option<String>) {
        self.cluster_name = cluster_name;
    }

    /// Paths of the declared job inputs. [MapProfile::input_index] points into this list.
    pub fn job_inputs(&self) -> &[String] {
        &self.job_inputs
    }

    pub fn set_job_inputs(&mut self, job_inputs: Vec<String>) {
        self.job_inputs = job_inputs;
    }

    pub fn map_profiles(&self) -> &[MapProfile] {
        &self.map_profiles
    }

    pub fn reduce_profiles(&self) -> &[ReduceProfile] {
        &self.reduce_profiles
    }

    pub fn add_map_profile(&mut self, profile: MapProfile) {
        self.map_profiles.push(profile);
    }

    pub fn add_reduce_profile(&mut self, profile: ReduceProfile) {
        self.reduce_profiles.push(profile);
    }

    /// Averaged map profiles, one per distinct input index, ordered by the index.
    pub fn avg_map_profiles(&self) -> &[MapProfile] {
        &self.avg_map_profiles
    }

    pub fn avg_reduce_profile(&self) -> Option<&ReduceProfile> {
        self.avg_reduce_profile.as_ref()
    }

    /// Returns true if the job has no tasks and no job-level metrics.
    pub fn is_empty(&self) -> bool {
        self.profile.is_empty()
            && self.map_profiles.is_empty()
            && self.reduce_profiles.is_empty()
            && self.avg_map_profiles.is_empty()
            && self.avg_reduce_profile.is_none()
    }

    /// Total number of map attempts represented by the map profiles.
    pub fn total_map_tasks(&self) -> u32 {
        self.map_profiles.iter().map(|p| p.num_tasks()).sum()
    }

    /// Total number of reduce attempts represented by the reduce profiles.
    pub fn total_reduce_tasks(&self) -> u32 {
        self.reduce_profiles.iter().map(|p| p.num_tasks()).sum()
    }

    /// Recomputes job-level metrics and the averaged task profiles.
    ///
    /// Counters [MapTasks](CounterKind::MapTasks) and [ReduceTasks](CounterKind::ReduceTasks) hold cardinalities
    /// and survive the recomputation. If they were never set they are initialized from the task profiles.
    pub fn update_profile(&mut self) {
        let map_tasks = self
            .profile
            .counter(CounterKind::MapTasks, self.total_map_tasks() as i64);
        let reduce_tasks = self
            .profile
            .counter(CounterKind::ReduceTasks, self.total_reduce_tasks() as i64);

        self.profile = ExecutionProfile::weighted_average(
            self.map_profiles
                .iter()
                .map(|p| (p.execution(), p.num_tasks()))
                .chain(self.reduce_profiles.iter().map(|p| (p.execution(), p.num_tasks()))),
        );

        let mut by_input: BTreeMap<usize, Vec<&MapProfile>> = BTreeMap::new();
        for profile in self.map_profiles.iter() {
            by_input.entry(profile.input_index()).or_default().push(profile);
        }
        self.avg_map_profiles = by_input
            .into_iter()
            .map(|(input_index, profiles)| {
                MapProfile::average(
                    format!("{}_m_avg_{}", self.job_id, input_index),
                    input_index,
                    profiles,
                )
            })
            .collect();

        self.avg_reduce_profile = if self.reduce_profiles.is_empty() {
            None
        } else {
            Some(ReduceProfile::average(
                format!("{}_r_avg", self.job_id),
                self.reduce_profiles.iter(),
            ))
        };

        self.profile.set_counter(CounterKind::MapTasks, map_tasks);
        self.profile.set_counter(CounterKind::ReduceTasks, reduce_tasks);
        debug!(
            "updated profile of job {}: {} map groups, {} map tasks, {} reduce tasks",
            self.job_id,
            self.avg_map_profiles.len(),
            map_tasks,
            reduce_tasks
        );
    }
}

impl Deref for JobProfile {
    type Target = ExecutionProfile;

    fn deref(&self) -> &Self::Target {
        &self.profile
    }
}

impl DerefMut for JobProfile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.profile
    }
}
