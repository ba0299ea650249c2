use std::path::PathBuf;

use clap::Parser;

/// Distills an observation log into a limited-value map.
#[derive(Parser, Debug)]
pub struct Args {
    /// Observation log produced by instrumented runs.
    #[arg(long, default_value = "vase_value_log.txt")]
    pub log: PathBuf,

    /// Output map file.
    #[arg(long, default_value = "limitedValuedMap.json")]
    pub out: PathBuf,

    /// Max distinct values kept per variable at a site.
    #[arg(long, default_value_t = 5)]
    pub max_values: usize,

    /// Minimum times a value must be observed to be kept.
    #[arg(long, default_value_t = 3)]
    pub min_occurrence: u64,

    /// Also emit branch-merged loc:<N> entries.
    #[arg(long)]
    pub branchless: bool,
}
