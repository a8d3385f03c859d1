//! Flat job configuration and the settings the engine reads from it.

use std::{collections::BTreeMap, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::WhatIfError;

/// Configuration keys recognized by the engine.
pub mod keys {
    pub const NUM_REDUCERS: &str = "mapred.reduce.tasks";
    pub const COMBINER_CLASS: &str = "mapreduce.combine.class";
    pub const COMPRESS_MAP_OUTPUT: &str = "mapred.compress.map.output";
    pub const COMPRESS_OUTPUT: &str = "mapred.output.compress";
    pub const SORT_MB: &str = "io.sort.mb";
    pub const SORT_RECORD_PERCENT: &str = "io.sort.record.percent";
    pub const SORT_SPILL_PERCENT: &str = "io.sort.spill.percent";
    pub const SORT_FACTOR: &str = "io.sort.factor";
    pub const SPILLS_FOR_COMBINE: &str = "min.num.spills.for.combine";
    pub const CHILD_JAVA_OPTS: &str = "mapred.child.java.opts";
    pub const SHUFFLE_INPUT_BUFFER_PERCENT: &str = "mapred.job.shuffle.input.buffer.percent";
    pub const SHUFFLE_MERGE_PERCENT: &str = "mapred.job.shuffle.merge.percent";
    pub const INMEM_MERGE_THRESHOLD: &str = "mapred.inmem.merge.threshold";
    pub const REDUCE_INPUT_BUFFER_PERCENT: &str = "mapred.job.reduce.input.buffer.percent";
    pub const BLOCK_SIZE: &str = "dfs.block.size";
    pub const MIN_SPLIT_SIZE: &str = "mapred.min.split.size";
    /// Fraction of the shuffle buffer above which a fetched segment goes straight to disk.
    pub const SHUFFLE_SEGMENT_DISK_FRACTION: &str = "whatif.shuffle.segment.disk.fraction";
}

const MB: u64 = 1 << 20;

/// Flat string-keyed job configuration.
///
/// Any key may be absent, typed getters take the value to use in that case. A present but malformed value
/// is an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    /// Creates new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from a YAML mapping of keys to scalar values.
    pub fn from_yaml<P: AsRef<Path>>(file: P) -> Result<Self, WhatIfError> {
        let content = std::fs::read_to_string(&file)
            .map_err(|e| WhatIfError::Parse(format!("can't read file {}: {e}", file.as_ref().display())))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, WhatIfError> {
        let raw: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(content).map_err(|e| WhatIfError::Parse(e.to_string()))?;
        let mut conf = Configuration::new();
        for (key, value) in raw.into_iter() {
            if let Some(value) = yaml_scalar(&key, value)? {
                conf.set(key, value);
            }
        }
        Ok(conf)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Builder-style [set](Configuration::set).
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns parsed value of `key` or `default` if the key is absent.
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, WhatIfError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| WhatIfError::InvalidConfig {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, WhatIfError> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) if v == "false" || v == "0" => Ok(false),
            Some(v) => Err(WhatIfError::InvalidConfig {
                key: key.to_string(),
                value: v,
            }),
        }
    }

    /// Reads a fraction in `[0, 1]`.
    pub fn get_fraction(&self, key: &str, default: f64) -> Result<f64, WhatIfError> {
        let value: f64 = self.get_parsed(key, default)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(WhatIfError::InvalidConfig {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    /// Heap size of a task in bytes, taken from the `-Xmx` option of [CHILD_JAVA_OPTS](keys::CHILD_JAVA_OPTS).
    pub fn task_memory(&self) -> Result<u64, WhatIfError> {
        let default = 200 * MB;
        let Some(opts) = self.get(keys::CHILD_JAVA_OPTS) else {
            return Ok(default);
        };
        let Some(xmx) = opts.split_whitespace().filter_map(|opt| opt.strip_prefix("-Xmx")).last() else {
            return Ok(default);
        };
        parse_memory(xmx).ok_or_else(|| WhatIfError::InvalidConfig {
            key: keys::CHILD_JAVA_OPTS.to_string(),
            value: opts.to_string(),
        })
    }
}

/// String form of a YAML scalar, `None` for null. Sequences and mappings are rejected.
pub(crate) fn yaml_scalar(key: &str, value: serde_yaml::Value) -> Result<Option<String>, WhatIfError> {
    match value {
        serde_yaml::Value::String(s) => Ok(Some(s)),
        serde_yaml::Value::Bool(b) => Ok(Some(b.to_string())),
        serde_yaml::Value::Number(n) => Ok(Some(n.to_string())),
        serde_yaml::Value::Null => Ok(None),
        other => Err(WhatIfError::InvalidConfig {
            key: key.to_string(),
            value: format!("{other:?}"),
        }),
    }
}

fn parse_memory(value: &str) -> Option<u64> {
    let (digits, multiplier) = match value.chars().last()?.to_ascii_lowercase() {
        'k' => (&value[..value.len() - 1], 1 << 10),
        'm' => (&value[..value.len() - 1], MB),
        'g' => (&value[..value.len() - 1], 1 << 30),
        _ => (value, 1),
    };
    digits.parse::<u64>().ok().map(|v| v * multiplier)
}

/// Typed view of the settings which drive the task oracles.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskSettings {
    pub num_reducers: usize,
    pub use_combiner: bool,
    pub compress_map_output: bool,
    pub compress_output: bool,
    /// Size of the map-side sort buffer in bytes.
    pub sort_buffer_bytes: u64,
    pub sort_record_percent: f64,
    pub sort_spill_percent: f64,
    /// Merge fan-in, at least 2.
    pub sort_factor: usize,
    pub spills_for_combine: usize,
    /// Task heap size in bytes.
    pub task_memory: u64,
    pub shuffle_input_buffer_percent: f64,
    pub shuffle_merge_percent: f64,
    /// Segments per in-memory shuffle merge at most, 0 removes the cap.
    pub inmem_merge_threshold: usize,
    pub reduce_input_buffer_percent: f64,
    pub shuffle_segment_disk_fraction: f64,
}

impl TaskSettings {
    pub fn from_conf(conf: &Configuration) -> Result<Self, WhatIfError> {
        let sort_factor = conf.get_parsed(keys::SORT_FACTOR, 10usize)?;
        if sort_factor < 2 {
            return Err(WhatIfError::InvalidConfig {
                key: keys::SORT_FACTOR.to_string(),
                value: sort_factor.to_string(),
            });
        }
        let sort_mb = conf.get_parsed(keys::SORT_MB, 100u64)?;
        if sort_mb == 0 {
            return Err(WhatIfError::InvalidConfig {
                key: keys::SORT_MB.to_string(),
                value: sort_mb.to_string(),
            });
        }
        let sort_record_percent = open_fraction(conf, keys::SORT_RECORD_PERCENT, 0.05)?;
        let sort_spill_percent = conf.get_fraction(keys::SORT_SPILL_PERCENT, 0.8)?;
        if sort_spill_percent == 0.0 {
            return Err(WhatIfError::InvalidConfig {
                key: keys::SORT_SPILL_PERCENT.to_string(),
                value: sort_spill_percent.to_string(),
            });
        }
        Ok(TaskSettings {
            num_reducers: conf.get_parsed(keys::NUM_REDUCERS, 1usize)?,
            use_combiner: conf.get(keys::COMBINER_CLASS).is_some_and(|c| !c.trim().is_empty()),
            compress_map_output: conf.get_bool(keys::COMPRESS_MAP_OUTPUT, false)?,
            compress_output: conf.get_bool(keys::COMPRESS_OUTPUT, false)?,
            sort_buffer_bytes: sort_mb * MB,
            sort_record_percent,
            sort_spill_percent,
            sort_factor,
            spills_for_combine: conf.get_parsed(keys::SPILLS_FOR_COMBINE, 3usize)?,
            task_memory: conf.task_memory()?,
            shuffle_input_buffer_percent: conf.get_fraction(keys::SHUFFLE_INPUT_BUFFER_PERCENT, 0.70)?,
            shuffle_merge_percent: conf.get_fraction(keys::SHUFFLE_MERGE_PERCENT, 0.66)?,
            inmem_merge_threshold: conf.get_parsed(keys::INMEM_MERGE_THRESHOLD, 1000i64)?.max(0) as usize,
            reduce_input_buffer_percent: conf.get_fraction(keys::REDUCE_INPUT_BUFFER_PERCENT, 0.0)?,
            shuffle_segment_disk_fraction: conf.get_fraction(keys::SHUFFLE_SEGMENT_DISK_FRACTION, 0.25)?,
        })
    }

    pub fn is_map_only(&self) -> bool {
        self.num_reducers == 0
    }
}

/// Reads a fraction strictly between 0 and 1.
fn open_fraction(conf: &Configuration, key: &str, default: f64) -> Result<f64, WhatIfError> {
    let value = conf.get_fraction(key, default)?;
    if value == 0.0 || value == 1.0 {
        return Err(WhatIfError::InvalidConfig {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value)
}
