//! Profiles of map and reduce tasks.

use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize};

use crate::{execution_profile::weighted_average_map, metrics::PhaseKind, ExecutionProfile};

fn one() -> u32 {
    1
}

/// Profile of one task attempt or the task-weighted average of several attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskProfile {
    task_id: String,
    /// Number of attempts this profile represents, at least 1.
    #[serde(default = "one")]
    num_tasks: u32,
    /// Phase durations in milliseconds.
    #[serde(default)]
    timings: BTreeMap<PhaseKind, f64>,
    #[serde(flatten)]
    profile: ExecutionProfile,
}

impl TaskProfile {
    /// Creates new empty profile of a single attempt.
    pub fn new(task_id: impl Into<String>) -> Self {
        TaskProfile {
            task_id: task_id.into(),
            num_tasks: 1,
            timings: BTreeMap::new(),
            profile: ExecutionProfile::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn set_task_id(&mut self, task_id: impl Into<String>) {
        self.task_id = task_id.into();
    }

    pub fn num_tasks(&self) -> u32 {
        self.num_tasks.max(1)
    }

    /// Sets the number of attempts, values below 1 are stored as 1.
    pub fn set_num_tasks(&mut self, num_tasks: u32) {
        self.num_tasks = num_tasks.max(1);
    }

    pub fn execution(&self) -> &ExecutionProfile {
        &self.profile
    }

    /// Returns true if neither metrics nor timings are known.
    pub fn is_empty(&self) -> bool {
        self.profile.is_empty() && self.timings.is_empty()
    }

    pub fn timing(&self, phase: PhaseKind, default: f64) -> f64 {
        self.timings.get(&phase).copied().unwrap_or(default)
    }

    pub fn contains_timing(&self, phase: PhaseKind) -> bool {
        self.timings.contains_key(&phase)
    }

    pub fn set_timing(&mut self, phase: PhaseKind, millis: f64) {
        self.timings.insert(phase, millis);
    }

    pub fn timings(&self) -> &BTreeMap<PhaseKind, f64> {
        &self.timings
    }

    /// Sum of all known phase durations.
    pub fn total_time(&self) -> f64 {
        self.timings.values().sum()
    }

    /// Task-weighted average of the given profiles, timings included.
    ///
    /// The result represents the sum of `num_tasks` of all averaged profiles.
    pub fn average<'a>(task_id: impl Into<String>, profiles: impl IntoIterator<Item = &'a TaskProfile>) -> Self {
        let profiles = profiles.into_iter().collect::<Vec<_>>();
        let num_tasks = profiles.iter().map(|p| p.num_tasks()).sum::<u32>();
        TaskProfile {
            task_id: task_id.into(),
            num_tasks: num_tasks.max(1),
            timings: weighted_average_map(profiles.iter().map(|p| (&p.timings, p.num_tasks())), |v| v),
            profile: ExecutionProfile::weighted_average(profiles.iter().map(|p| (&p.profile, p.num_tasks()))),
        }
    }
}

impl Deref for TaskProfile {
    type Target = ExecutionProfile;

    fn deref(&self) -> &Self::Target {
        &self.profile
    }
}

impl DerefMut for TaskProfile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.profile
    }
}

/// Profile of map attempts which consumed the same job input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapProfile {
    #[serde(flatten)]
    task: TaskProfile,
    /// Index of the declared job input this map read from.
    #[serde(default)]
    input_index: usize,
}

impl MapProfile {
    pub fn new(task_id: impl Into<String>, input_index: usize) -> Self {
        MapProfile {
            task: TaskProfile::new(task_id),
            input_index,
        }
    }

    pub fn input_index(&self) -> usize {
        self.input_index
    }

    pub fn set_input_index(&mut self, input_index: usize) {
        self.input_index = input_index;
    }

    pub fn task(&self) -> &TaskProfile {
        &self.task
    }

    /// Task-weighted average of map profiles, all assumed to read the input `input_index`.
    pub fn average<'a>(
        task_id: impl Into<String>,
        input_index: usize,
        profiles: impl IntoIterator<Item = &'a MapProfile>,
    ) -> Self {
        MapProfile {
            task: TaskProfile::average(task_id, profiles.into_iter().map(|p| &p.task)),
            input_index,
        }
    }
}

impl Deref for MapProfile {
    type Target = TaskProfile;

    fn deref(&self) -> &Self::Target {
        &self.task
    }
}

impl DerefMut for MapProfile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.task
    }
}

/// Profile of reduce attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReduceProfile {
    #[serde(flatten)]
    task: TaskProfile,
}

impl ReduceProfile {
    pub fn new(task_id: impl Into<String>) -> Self {
        ReduceProfile {
            task: TaskProfile::new(task_id),
        }
    }

    pub fn task(&self) -> &TaskProfile {
        &self.task
    }

    pub fn average<'a>(task_id: impl Into<String>, profiles: impl IntoIterator<Item = &'a ReduceProfile>) -> Self {
        ReduceProfile {
            task: TaskProfile::average(task_id, profiles.into_iter().map(|p| &p.task)),
        }
    }
}

impl Deref for ReduceProfile {
    type Target = TaskProfile;

    fn deref(&self) -> &Self::Target {
        &self.task
    }
}

impl DerefMut for ReduceProfile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.task
    }
}
