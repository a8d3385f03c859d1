//! Sparse containers of counters, statistics and cost factors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::{CostKind, CounterKind, StatKind};

/// Counters, statistics and cost factors of one execution.
///
/// All maps start empty. A missing key means the metric is unknown, which is different from a stored zero,
/// so every read takes the value to use when the metric is absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    #[serde(default)]
    counters: BTreeMap<CounterKind, i64>,
    #[serde(default)]
    statistics: BTreeMap<StatKind, f64>,
    #[serde(default)]
    cost_factors: BTreeMap<CostKind, f64>,
}

impl ExecutionProfile {
    /// Creates new empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no metric is known.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.statistics.is_empty() && self.cost_factors.is_empty()
    }

    /// Forgets all metrics.
    pub fn clear(&mut self) {
        self.counters.clear();
        self.statistics.clear();
        self.cost_factors.clear();
    }

    pub fn counter(&self, kind: CounterKind, default: i64) -> i64 {
        self.counters.get(&kind).copied().unwrap_or(default)
    }

    pub fn contains_counter(&self, kind: CounterKind) -> bool {
        self.counters.contains_key(&kind)
    }

    pub fn set_counter(&mut self, kind: CounterKind, value: i64) {
        self.counters.insert(kind, value);
    }

    /// Adds `delta` to a counter, treating a missing counter as zero.
    pub fn add_counter(&mut self, kind: CounterKind, delta: i64) {
        *self.counters.entry(kind).or_insert(0) += delta;
    }

    pub fn remove_counter(&mut self, kind: CounterKind) -> Option<i64> {
        self.counters.remove(&kind)
    }

    pub fn counters(&self) -> &BTreeMap<CounterKind, i64> {
        &self.counters
    }

    pub fn statistic(&self, kind: StatKind, default: f64) -> f64 {
        self.statistics.get(&kind).copied().unwrap_or(default)
    }

    pub fn contains_statistic(&self, kind: StatKind) -> bool {
        self.statistics.contains_key(&kind)
    }

    pub fn set_statistic(&mut self, kind: StatKind, value: f64) {
        self.statistics.insert(kind, value);
    }

    pub fn remove_statistic(&mut self, kind: StatKind) -> Option<f64> {
        self.statistics.remove(&kind)
    }

    pub fn statistics(&self) -> &BTreeMap<StatKind, f64> {
        &self.statistics
    }

    pub fn cost_factor(&self, kind: CostKind, default: f64) -> f64 {
        self.cost_factors.get(&kind).copied().unwrap_or(default)
    }

    pub fn contains_cost_factor(&self, kind: CostKind) -> bool {
        self.cost_factors.contains_key(&kind)
    }

    pub fn set_cost_factor(&mut self, kind: CostKind, value: f64) {
        self.cost_factors.insert(kind, value);
    }

    pub fn remove_cost_factor(&mut self, kind: CostKind) -> Option<f64> {
        self.cost_factors.remove(&kind)
    }

    pub fn cost_factors(&self) -> &BTreeMap<CostKind, f64> {
        &self.cost_factors
    }

    /// Task-weighted average of profiles given as pairs `(profile, weight)`.
    ///
    /// Each key is averaged only over the profiles which define it. Counters are rounded to the nearest integer.
    pub fn weighted_average<'a>(profiles: impl IntoIterator<Item = (&'a ExecutionProfile, u32)>) -> Self {
        let profiles = profiles.into_iter().collect::<Vec<_>>();
        ExecutionProfile {
            counters: weighted_average_map(profiles.iter().map(|(p, w)| (&p.counters, *w)), |v| v as f64)
                .into_iter()
                .map(|(k, v)| (k, v.round() as i64))
                .collect(),
            statistics: weighted_average_map(profiles.iter().map(|(p, w)| (&p.statistics, *w)), |v| v),
            cost_factors: weighted_average_map(profiles.iter().map(|(p, w)| (&p.cost_factors, *w)), |v| v),
        }
    }
}

/// Averages sparse maps per key, weighting each map by the given number of tasks.
pub(crate) fn weighted_average_map<'a, K, V>(
    maps: impl IntoIterator<Item = (&'a BTreeMap<K, V>, u32)>,
    to_f64: impl Fn(V) -> f64,
) -> BTreeMap<K, f64>
where
    K: Ord + Copy + 'a,
    V: Copy + 'a,
{
    let mut sums: BTreeMap<K, (f64, u64)> = BTreeMap::new();
    for (map, weight) in maps {
        for (&key, &value) in map.iter() {
            let entry = sums.entry(key).or_insert((0.0, 0));
            entry.0 += to_f64(value) * weight as f64;
            entry.1 += weight as u64;
        }
    }
    sums.into_iter()
        .filter(|(_, (_, weight))| *weight > 0)
        .map(|(key, (sum, weight))| (key, sum / weight as f64))
        .collect()
}
