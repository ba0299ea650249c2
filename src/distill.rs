//! The profile distiller: observation log in, limited-value map out.
//!
//! One pass over the log counts how often each distinct value was observed
//! per `(site, variable)`. Values seen fewer than `min_occurrence` times are
//! dropped; of the survivors, the `max_values` most frequent are kept,
//! ordered by descending count with ties broken by ascending value, so the
//! output is a deterministic function of the input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use hashbrown::HashMap;
use log::warn;

use crate::map::{LimitedValueMap, ValueProperty};
use crate::value_log::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistillConfig {
    /// Cardinality cap per `(site, variable)`.
    pub max_values: usize,

    /// Minimum occurrence count for a value to survive.
    pub min_occurrence: u64,

    /// Additionally emit branch-merged `loc:<N>` entries, with occurrence
    /// counts summed across both branches of a site.
    pub branchless: bool,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            max_values: 5,
            min_occurrence: 3,
            branchless: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DistillSummary {
    pub lines: u64,
    pub records: u64,
    pub malformed: u64,

    /// Records carrying the function-entry sentinel; they are not decision
    /// points and do not contribute to the map.
    pub entry_skipped: u64,

    pub sites: usize,
}

type ValueCounts = HashMap<i32, u64>;

/// Distills log lines read from `reader`. Read failures end the pass early
/// with a warning; everything read so far is still distilled.
pub fn distill<R: BufRead>(reader: R, config: &DistillConfig) -> (LimitedValueMap, DistillSummary) {
    let mut summary = DistillSummary::default();
    let mut counts = HashMap::<(u32, i32, String), ValueCounts>::new();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,

            Err(e) => {
                warn!("stopping early: failed to read from the observation log: {e}");
                break;
            }
        };

        summary.lines += 1;

        if line.is_empty() {
            continue;
        }

        let record = match line.parse::<Record>() {
            Ok(record) => record,

            Err(e) => {
                warn!("skipping malformed observation line {}: {e}", summary.lines);
                summary.malformed += 1;
                continue;
            }
        };

        if record.is_entry() {
            summary.entry_skipped += 1;
            continue;
        }

        summary.records += 1;
        *counts
            .entry((record.loc, record.branch, record.var))
            .or_default()
            .entry(record.value)
            .or_default() += 1;
    }

    let mut map = LimitedValueMap::default();

    for ((loc, branch, var), value_counts) in &counts {
        let values = select_values(value_counts, config);

        if values.is_empty() {
            continue;
        }

        map.sites
            .entry(format!("loc:{loc}:branch:{branch}"))
            .or_default()
            .insert(var.clone(), values);
    }

    if config.branchless {
        let mut merged = HashMap::<(u32, String), ValueCounts>::new();

        for ((loc, _, var), value_counts) in &counts {
            let slot = merged.entry((*loc, var.clone())).or_default();

            for (&value, &count) in value_counts {
                *slot.entry(value).or_default() += count;
            }
        }

        for ((loc, var), value_counts) in &merged {
            let values = select_values(value_counts, config);

            if values.is_empty() {
                continue;
            }

            map.sites
                .entry(format!("loc:{loc}"))
                .or_default()
                .insert(var.clone(), values);
        }
    }

    summary.sites = map.len();

    (map, summary)
}

/// Distills `path`, treating an absent or unreadable log as empty.
pub fn distill_file(path: &Path, config: &DistillConfig) -> (LimitedValueMap, DistillSummary) {
    match File::open(path) {
        Ok(file) => distill(BufReader::new(file), config),

        Err(e) => {
            warn!(
                "observation log {} is unreadable ({e}); producing an empty map",
                path.display()
            );

            (LimitedValueMap::default(), DistillSummary::default())
        }
    }
}

fn select_values(counts: &ValueCounts, config: &DistillConfig) -> Vec<ValueProperty> {
    let mut survivors = counts
        .iter()
        .filter(|&(_, &count)| count >= config.min_occurrence)
        .map(|(&value, &count)| (value, count))
        .collect::<Vec<_>>();

    survivors.sort_unstable_by(|&(lhs_value, lhs_count), &(rhs_value, rhs_count)| {
        rhs_count.cmp(&lhs_count).then(lhs_value.cmp(&rhs_value))
    });
    survivors.truncate(config.max_values);

    survivors
        .into_iter()
        .map(|(value, _)| ValueProperty::int(value as i64))
        .collect()
}
