//! Discrete simulation of a k-way external merge with an optional combiner.

use std::{cmp::Reverse, collections::BinaryHeap, iter::Sum, ops::Add};

use serde::{Deserialize, Serialize};

/// Sorted run of records waiting to be merged.
///
/// Segments are ordered by size first, so the smallest segment is merged first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub size_bytes: u64,
    pub num_records: u64,
}

impl Segment {
    pub fn new(size_bytes: u64, num_records: u64) -> Self {
        Segment {
            size_bytes,
            num_records,
        }
    }

    /// `count` copies of this segment concatenated.
    pub fn times(&self, count: u64) -> Segment {
        Segment::new(self.size_bytes * count, self.num_records * count)
    }
}

impl Add for Segment {
    type Output = Segment;

    fn add(self, rhs: Segment) -> Segment {
        Segment::new(self.size_bytes + rhs.size_bytes, self.num_records + rhs.num_records)
    }
}

impl Sum for Segment {
    fn sum<I: Iterator<Item = Segment>>(iter: I) -> Segment {
        iter.fold(Segment::default(), |acc, s| acc + s)
    }
}

/// Natural logarithm of a volume, never below 1.
pub fn log_volume(volume: u64) -> f64 {
    (volume as f64).ln().max(1.0)
}

/// Combiner applied during the final merge pass.
///
/// The effect of a combiner shrinks as the merged volume grows: `out = volume * selectivity / ln(volume)`.
/// A selectivity measured as the plain ratio `s` at volume `v` is therefore `s * ln(v)`, see
/// [calibrated](Combiner::calibrated).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Combiner {
    /// Minimum number of segments entering the final pass for the combiner to run.
    pub threshold_spills: usize,
    pub size_selectivity: f64,
    pub record_selectivity: f64,
}

impl Combiner {
    pub fn new(threshold_spills: usize, size_selectivity: f64, record_selectivity: f64) -> Self {
        Combiner {
            threshold_spills,
            size_selectivity,
            record_selectivity,
        }
    }

    /// Combiner reproducing plain selectivities `size_sel` and `records_sel` observed at the given volumes.
    pub fn calibrated(
        threshold_spills: usize,
        size_sel: f64,
        records_sel: f64,
        observed_bytes: u64,
        observed_records: u64,
    ) -> Self {
        Combiner::new(
            threshold_spills,
            size_sel * log_volume(observed_bytes),
            records_sel * log_volume(observed_records),
        )
    }

    /// Whether the combiner runs for a pass merging `segments` segments.
    pub fn applies(&self, segments: usize) -> bool {
        segments >= self.threshold_spills
    }

    /// Combines merged volume `input`. The output never exceeds the input and is never below `min_unique`,
    /// the largest segment entering the pass.
    pub fn combine(&self, input: Segment, min_unique: Segment) -> Segment {
        Segment::new(
            shrink(input.size_bytes, self.size_selectivity).max(min_unique.size_bytes),
            shrink(input.num_records, self.record_selectivity).max(min_unique.num_records),
        )
    }
}

fn shrink(volume: u64, selectivity: f64) -> u64 {
    ((volume as f64 * selectivity / log_volume(volume)) as u64).min(volume)
}

/// Volumes moved by a merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Intermediate passes plus the final pass, if performed.
    pub num_merge_passes: u32,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub spilled_records: u64,
    /// Records which flowed through any merge step, drives the merge CPU cost. A skipped final merge is still
    /// counted, its reader streams every record through the merge.
    pub merged_records: u64,
    pub combine_in_records: u64,
    pub combine_out_records: u64,
    /// Total volume left after the merge: the final output, or all remaining segments when the final merge
    /// is skipped.
    pub output: Segment,
    /// Part of [output](MergeResult::output) still held in memory.
    pub output_in_memory: Segment,
    pub remaining_segments: usize,
}

/// Single-use simulator of a Hadoop-style external merge.
///
/// Segments are added first, then [simulate](MergeSimulator::simulate) consumes the simulator.
#[derive(Clone, Debug)]
pub struct MergeSimulator {
    sort_factor: usize,
    segments: BinaryHeap<Reverse<Segment>>,
    in_memory: Vec<Segment>,
    combiner: Option<Combiner>,
    skip_final_merge: bool,
}

impl MergeSimulator {
    /// Creates new simulator with merge fan-in `sort_factor` (at least 2).
    pub fn new(sort_factor: usize) -> Self {
        MergeSimulator {
            sort_factor: sort_factor.max(2),
            segments: BinaryHeap::new(),
            in_memory: Vec::new(),
            combiner: None,
            skip_final_merge: false,
        }
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(Reverse(segment));
    }

    pub fn add_segments(&mut self, count: u64, segment: Segment) {
        for _ in 0..count {
            self.add_segment(segment);
        }
    }

    /// Adds a segment already resident in memory. It is folded into the first pass without read cost.
    pub fn add_in_memory_segment(&mut self, segment: Segment) {
        self.in_memory.push(segment);
    }

    pub fn add_in_memory_segments(&mut self, count: u64, segment: Segment) {
        for _ in 0..count {
            self.add_in_memory_segment(segment);
        }
    }

    pub fn set_combiner(&mut self, combiner: Option<Combiner>) {
        self.combiner = combiner;
    }

    /// Stops after the last intermediate pass, leaving at most `sort_factor` segments.
    pub fn set_skip_final_merge(&mut self, skip_final_merge: bool) {
        self.skip_final_merge = skip_final_merge;
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len() + self.in_memory.len()
    }

    /// Runs the merge.
    pub fn simulate(mut self) -> MergeResult {
        let input = self.segments.iter().map(|s| s.0).chain(self.in_memory.iter().copied()).sum::<Segment>();
        let mut result = MergeResult::default();
        let mut num_segments = self.num_segments();
        if num_segments <= 1 {
            result.output = input;
            result.output_in_memory = self.in_memory.iter().copied().sum();
            result.remaining_segments = num_segments;
            return result;
        }

        let factor = self.sort_factor;
        let mut first_pass = true;
        while num_segments > factor {
            let to_merge = if first_pass {
                first_pass_factor(num_segments, factor)
            } else {
                factor
            };
            let mut merged = Segment::default();
            let mut taken = 0;
            if first_pass {
                taken += self.in_memory.len();
                merged = self.in_memory.drain(..).sum();
            }
            let mut read = 0;
            while taken < to_merge {
                let Some(Reverse(segment)) = self.segments.pop() else {
                    break;
                };
                read += segment.size_bytes;
                merged = merged + segment;
                taken += 1;
            }
            result.bytes_read += read;
            result.bytes_written += merged.size_bytes;
            result.spilled_records += merged.num_records;
            result.num_merge_passes += 1;
            self.segments.push(Reverse(merged));
            num_segments = num_segments + 1 - taken;
            first_pass = false;
        }

        result.merged_records = input.num_records + result.spilled_records;
        if self.skip_final_merge {
            result.output = input;
            result.output_in_memory = self.in_memory.iter().copied().sum();
            result.remaining_segments = num_segments;
            return result;
        }

        let on_disk = self.segments.iter().map(|s| s.0).sum::<Segment>();
        let in_memory = self.in_memory.iter().copied().sum::<Segment>();
        let merged = on_disk + in_memory;
        let largest = self
            .segments
            .iter()
            .map(|s| s.0)
            .chain(self.in_memory.iter().copied())
            .max()
            .unwrap_or_default();
        let output = match self.combiner {
            Some(combiner) if combiner.applies(num_segments) => {
                let output = combiner.combine(merged, largest);
                result.combine_in_records = merged.num_records;
                result.combine_out_records = output.num_records;
                output
            }
            _ => merged,
        };
        result.bytes_read += on_disk.size_bytes;
        result.bytes_written += output.size_bytes;
        result.spilled_records += output.num_records;
        result.num_merge_passes += 1;
        result.output = output;
        result.remaining_segments = 1;
        result
    }
}

/// Number of segments merged by the first pass when `num_segments` exceed the fan-in.
///
/// Merging `(n - 1) mod (f - 1) + 1` segments first makes every later pass merge exactly `f` segments.
pub fn first_pass_factor(num_segments: usize, factor: usize) -> usize {
    if num_segments <= factor {
        return num_segments;
    }
    let rem = (num_segments - 1) % (factor - 1);
    if rem == 0 {
        factor
    } else {
        rem + 1
    }
}
