mod args;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::Diagnostic;
use thiserror::Error;

use vase::distill::{distill_file, DistillConfig};

use crate::args::Args;

#[derive(Diagnostic, Error, Debug)]
enum CliError {
    #[error("failed to write the map to {}", .path.display())]
    Write {
        path: PathBuf,

        #[source]
        source: io::Error,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = DistillConfig {
        max_values: args.max_values,
        min_occurrence: args.min_occurrence,
        branchless: args.branchless,
    };

    let (map, summary) = distill_file(&args.log, &config);

    if let Err(source) = fs::write(&args.out, map.to_json()) {
        let e = miette::Report::new(CliError::Write {
            path: args.out,
            source,
        });
        eprintln!("{:?}", e);

        return ExitCode::FAILURE;
    }

    println!(
        "{}: {} sites from {} records ({} lines; {} malformed, {} entry records skipped)",
        args.out.display(),
        summary.sites,
        summary.records,
        summary.lines,
        summary.malformed,
        summary.entry_skipped,
    );

    ExitCode::SUCCESS
}
