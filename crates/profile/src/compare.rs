//! Comparison of a predicted job profile against a measured one.

use serde::{Deserialize, Serialize};

use crate::{metrics::PhaseKind, JobProfile, ProfileError, TaskProfile};

/// Predicted and measured duration of one phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseComparison {
    pub phase: PhaseKind,
    pub predicted: f64,
    pub measured: f64,
    /// `|predicted - measured| / max(measured, 1ms)`.
    pub relative_error: f64,
}

/// Phase-by-phase comparison of two averaged task profiles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskComparison {
    pub task_id: String,
    pub phases: Vec<PhaseComparison>,
    pub total_predicted: f64,
    pub total_measured: f64,
}

impl TaskComparison {
    fn new(predicted: &TaskProfile, measured: &TaskProfile) -> Self {
        let mut phases = predicted
            .timings()
            .keys()
            .chain(measured.timings().keys())
            .copied()
            .collect::<Vec<_>>();
        phases.sort();
        phases.dedup();
        TaskComparison {
            task_id: measured.task_id().to_string(),
            phases: phases
                .into_iter()
                .map(|phase| {
                    let predicted = predicted.timing(phase, 0.0);
                    let measured = measured.timing(phase, 0.0);
                    PhaseComparison {
                        phase,
                        predicted,
                        measured,
                        relative_error: relative_error(predicted, measured),
                    }
                })
                .collect(),
            total_predicted: predicted.total_time(),
            total_measured: measured.total_time(),
        }
    }

    /// Relative error of the total task duration.
    pub fn total_relative_error(&self) -> f64 {
        relative_error(self.total_predicted, self.total_measured)
    }
}

/// Comparison of averaged map profiles (one per job input) and of the averaged reduce profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileComparison {
    pub maps: Vec<TaskComparison>,
    pub reduce: Option<TaskComparison>,
}

impl ProfileComparison {
    /// Largest relative error of a total task duration.
    pub fn max_total_relative_error(&self) -> f64 {
        self.maps
            .iter()
            .chain(self.reduce.iter())
            .map(|c| c.total_relative_error())
            .fold(0.0, f64::max)
    }
}

fn relative_error(predicted: f64, measured: f64) -> f64 {
    (predicted - measured).abs() / measured.abs().max(1.0)
}

/// Compares averaged task profiles of two jobs with the same shape.
///
/// Both jobs must have the same number of averaged map profiles with the same input indices, and either both
/// or none must have an averaged reduce profile.
pub fn compare_job_profiles(predicted: &JobProfile, measured: &JobProfile) -> Result<ProfileComparison, ProfileError> {
    if predicted.avg_map_profiles().len() != measured.avg_map_profiles().len() {
        return Err(ProfileError::Inconsistent(format!(
            "{} averaged map profiles in {} but {} in {}",
            predicted.avg_map_profiles().len(),
            predicted.job_id(),
            measured.avg_map_profiles().len(),
            measured.job_id()
        )));
    }
    let maps = predicted
        .avg_map_profiles()
        .iter()
        .zip(measured.avg_map_profiles())
        .map(|(p, m)| {
            if p.input_index() != m.input_index() {
                return Err(ProfileError::Inconsistent(format!(
                    "map profile for input {} compared with map profile for input {}",
                    p.input_index(),
                    m.input_index()
                )));
            }
            Ok(TaskComparison::new(p, m))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let reduce = match (predicted.avg_reduce_profile(), measured.avg_reduce_profile()) {
        (Some(p), Some(m)) => Some(TaskComparison::new(p, m)),
        (None, None) => None,
        _ => {
            return Err(ProfileError::Inconsistent(
                "reduce profile is present in only one of the jobs".to_string(),
            ))
        }
    };
    Ok(ProfileComparison { maps, reduce })
}
