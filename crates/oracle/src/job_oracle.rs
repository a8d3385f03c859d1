//! Prediction of whole job profiles.

use std::collections::BTreeMap;

use log::{debug, info};
use mrwhatif_profile::{
    compare::{compare_job_profiles, ProfileComparison},
    CounterKind, JobProfile,
};

use crate::{
    configuration::{Configuration, TaskSettings},
    data_set_model::DataSetModel,
    error::WhatIfError,
    map_oracle::MapProfileOracle,
    reduce_oracle::ReduceProfileOracle,
    task_oracle::TaskProfileOracle,
};

/// Predicts the profile of a job from its measured profile.
///
/// Holds one map oracle per job input and one reduce oracle, built from the averaged task profiles of the
/// baseline. Immutable after construction, so one oracle can serve many configurations concurrently.
#[derive(Clone, Debug)]
pub struct JobProfileOracle {
    job_id: String,
    cluster_name: Option<String>,
    job_inputs: Vec<String>,
    map_oracles: BTreeMap<usize, MapProfileOracle>,
    reduce_oracle: Option<ReduceProfileOracle>,
    ignore_reducers: bool,
}

impl JobProfileOracle {
    /// Creates new oracle. The baseline must have averaged map profiles, see [JobProfile::update_profile].
    pub fn new(baseline: &JobProfile) -> Result<Self, WhatIfError> {
        let job_id = baseline.job_id().to_string();
        if baseline.avg_map_profiles().is_empty() {
            return Err(WhatIfError::EmptyProfile(job_id));
        }
        let mut map_oracles = BTreeMap::new();
        for profile in baseline.avg_map_profiles() {
            map_oracles.insert(
                profile.input_index(),
                MapProfileOracle::new(job_id.clone(), profile.clone())?,
            );
        }
        let reduce_oracle = baseline
            .avg_reduce_profile()
            .map(|profile| ReduceProfileOracle::new(job_id.clone(), profile.clone()))
            .transpose()?;
        Ok(JobProfileOracle {
            job_id,
            cluster_name: baseline.cluster_name().map(|s| s.to_string()),
            job_inputs: baseline.job_inputs().to_vec(),
            map_oracles,
            reduce_oracle,
            ignore_reducers: false,
        })
    }

    /// Predicts map tasks only, as if the job had no reducers.
    pub fn with_ignore_reducers(mut self, ignore_reducers: bool) -> Self {
        self.ignore_reducers = ignore_reducers;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn map_oracle(&self, input_index: usize) -> Option<&MapProfileOracle> {
        self.map_oracles.get(&input_index)
    }

    pub fn reduce_oracle(&self) -> Option<&ReduceProfileOracle> {
        self.reduce_oracle.as_ref()
    }

    /// Predicts the profile of the job running with `conf` on the data described by `model`.
    pub fn whatif(&self, conf: &Configuration, model: &dyn DataSetModel) -> Result<JobProfile, WhatIfError> {
        let settings = TaskSettings::from_conf(conf)?;
        let mut job = JobProfile::new(self.job_id.clone());
        job.set_cluster_name(self.cluster_name.clone());
        job.set_job_inputs(self.job_inputs.clone());

        for specs in model.map_input_specs(conf)? {
            let oracle = self.map_oracles.get(&specs.input_index).ok_or_else(|| {
                WhatIfError::InvalidSpec(format!(
                    "job {} has no baseline for input {}",
                    self.job_id, specs.input_index
                ))
            })?;
            job.add_map_profile(oracle.predict(&settings, &specs)?);
        }

        if !self.ignore_reducers && !settings.is_map_only() {
            let reduce_oracle = self
                .reduce_oracle
                .as_ref()
                .ok_or_else(|| WhatIfError::EmptyProfile(format!("{}: reduce profile", self.job_id)))?;
            let shuffle_specs = model.reduce_shuffle_specs(conf, job.map_profiles())?;
            for (group, specs) in shuffle_specs.iter().enumerate() {
                job.add_reduce_profile(reduce_oracle.predict_group(&settings, specs, group)?);
            }
        } else {
            debug!("job {}: reducers not predicted", self.job_id);
        }

        let map_tasks = job.total_map_tasks();
        let reduce_tasks = job.total_reduce_tasks();
        job.set_counter(CounterKind::MapTasks, map_tasks as i64);
        job.set_counter(CounterKind::ReduceTasks, reduce_tasks as i64);
        job.update_profile();

        info!(
            "what-if for job {}: {} map tasks in {} groups, {} reduce tasks",
            self.job_id,
            map_tasks,
            job.map_profiles().len(),
            reduce_tasks
        );
        Ok(job)
    }

    /// Predicts the job for `conf` and compares the prediction with a measured run of that configuration.
    pub fn validate(
        &self,
        conf: &Configuration,
        model: &dyn DataSetModel,
        measured: &JobProfile,
    ) -> Result<ProfileComparison, WhatIfError> {
        let predicted = self.whatif(conf, model)?;
        let comparison = compare_job_profiles(&predicted, measured)?;
        info!(
            "job {}: largest relative error of predicted task time is {:.3}",
            self.job_id,
            comparison.max_total_relative_error()
        );
        Ok(comparison)
    }
}
