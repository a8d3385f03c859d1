//! Evaluation of a grid of configurations against one job oracle.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::info;
use mrwhatif_profile::JobProfile;
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;

use crate::{
    configuration::{yaml_scalar, Configuration},
    data_set_model::DataSetModel,
    error::WhatIfError,
    job_oracle::JobProfileOracle,
};

/// Values to try for each configuration key.
pub type ConfigurationGrid = BTreeMap<String, Vec<String>>;

/// Reads a grid from a YAML mapping of keys to lists of scalar values.
pub fn grid_from_yaml_str(content: &str) -> Result<ConfigurationGrid, WhatIfError> {
    let raw: BTreeMap<String, Vec<serde_yaml::Value>> =
        serde_yaml::from_str(content).map_err(|e| WhatIfError::Parse(e.to_string()))?;
    let mut grid = ConfigurationGrid::new();
    for (key, values) in raw.into_iter() {
        let mut parsed = Vec::with_capacity(values.len());
        for value in values.into_iter() {
            let value = yaml_scalar(&key, value)?.ok_or_else(|| WhatIfError::InvalidConfig {
                key: key.clone(),
                value: "~".to_string(),
            })?;
            parsed.push(value);
        }
        grid.insert(key, parsed);
    }
    Ok(grid)
}

pub fn grid_from_yaml<P: AsRef<Path>>(file: P) -> Result<ConfigurationGrid, WhatIfError> {
    let content = std::fs::read_to_string(&file)
        .map_err(|e| WhatIfError::Parse(format!("can't read file {}: {e}", file.as_ref().display())))?;
    grid_from_yaml_str(&content)
}

/// Outcome of one configuration of the grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchResult {
    /// `key=value` pairs of the grid point, or `base` for an empty grid.
    pub name: String,
    pub conf: Configuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<JobProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Run {
    name: String,
    conf: Configuration,
}

/// Runs [JobProfileOracle::whatif] for every point of a configuration grid.
pub struct WhatIfBatch {
    oracle: Arc<JobProfileOracle>,
    model: Arc<dyn DataSetModel>,
    base_conf: Configuration,
    grid: ConfigurationGrid,
}

impl WhatIfBatch {
    pub fn new(
        oracle: Arc<JobProfileOracle>,
        model: Arc<dyn DataSetModel>,
        base_conf: Configuration,
        grid: ConfigurationGrid,
    ) -> Self {
        Self {
            oracle,
            model,
            base_conf,
            grid,
        }
    }

    fn runs(&self) -> Vec<Run> {
        if self.grid.is_empty() {
            return vec![Run {
                name: "base".to_string(),
                conf: self.base_conf.clone(),
            }];
        }
        self.grid
            .iter()
            .map(|(key, values)| values.iter().map(move |value| (key, value)))
            .multi_cartesian_product()
            .map(|point| {
                let mut conf = self.base_conf.clone();
                for &(key, value) in point.iter() {
                    conf.set(key.clone(), value);
                }
                Run {
                    name: point.iter().map(|(key, value)| format!("{key}={value}")).join(","),
                    conf,
                }
            })
            .collect()
    }

    /// Evaluates all grid points on `threads` workers. Results are sorted by name.
    pub fn run(self, threads: usize) -> Vec<BatchResult> {
        let runs = self.runs();
        let total_runs = runs.len();

        let finished_run_atomic = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = mpsc::channel();

        let pool = ThreadPool::new(threads.max(1));
        let start_time = Instant::now();
        for run in runs.into_iter() {
            let finished_run_atomic = finished_run_atomic.clone();
            let sender = sender.clone();
            let oracle = self.oracle.clone();
            let model = self.model.clone();
            pool.execute(move || {
                let (profile, error) = match oracle.whatif(&run.conf, model.as_ref()) {
                    Ok(profile) => (Some(profile), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                // The receiver lives until all workers are joined.
                let _ = sender.send(BatchResult {
                    name: run.name,
                    conf: run.conf,
                    profile,
                    error,
                });

                let finished_runs = finished_run_atomic.fetch_add(1, Ordering::SeqCst) + 1;
                let elapsed = start_time.elapsed();
                let remaining = Duration::from_secs_f64(
                    elapsed.as_secs_f64() / finished_runs as f64 * (total_runs - finished_runs) as f64,
                );
                info!(
                    "Finished {}/{} [{}%] runs in {:.2?}, remaining time: {:.2?}",
                    finished_runs,
                    total_runs,
                    (finished_runs as f64 * 100. / total_runs as f64).round() as i32,
                    elapsed,
                    remaining
                );
            });
        }
        drop(sender);

        pool.join();
        info!("Finished {} runs in {:.2?}", total_runs, start_time.elapsed());

        let mut results = receiver.into_iter().collect::<Vec<_>>();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }
}
