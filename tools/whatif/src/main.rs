use std::{fs::File, io::Write, path::PathBuf, sync::Arc};

use clap::Parser;
use env_logger::Builder;
use log::info;
use mrwhatif::{
    batch::{grid_from_yaml, BatchResult, ConfigurationGrid, WhatIfBatch},
    Configuration, DataSetModel, JobProfileOracle, UniformDataSetModel,
};
use mrwhatif_profile::{JobProfile, MapProfile, PhaseKind, ReduceProfile};

/// Predicts job profiles for new configurations from one measured profile.
#[derive(Parser, Debug)]
struct Args {
    /// Path to measured job profile (YAML).
    #[arg(short, long)]
    profile: PathBuf,

    /// Path to base configuration (YAML mapping of keys to values).
    #[arg(short, long, default_value = None)]
    conf: Option<PathBuf>,

    /// Path to job inputs (YAML list of data sets).
    #[arg(short, long)]
    inputs: PathBuf,

    /// Path to grid of configuration values to evaluate (YAML mapping of keys to lists of values).
    #[arg(short, long, default_value = None)]
    grid: Option<PathBuf>,

    /// Predict map tasks only.
    #[arg(long)]
    ignore_reducers: bool,

    /// Path to file with predicted profiles (JSON).
    #[arg(short, long, default_value = None)]
    output: Option<PathBuf>,

    /// Number of threads.
    #[arg(long, default_value_t = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))]
    threads: usize,
}

/// Columns of the result table: phase timings of an average map and an average reduce task.
fn columns() -> Vec<(String, Box<dyn Fn(&JobProfile) -> f64>)> {
    let mut columns: Vec<(String, Box<dyn Fn(&JobProfile) -> f64>)> = Vec::new();
    for phase in PhaseKind::MAP_PHASES {
        columns.push((
            format!("map {}", phase.name().to_lowercase()),
            Box::new(move |job: &JobProfile| average_map(job).timing(phase, 0.0)),
        ));
    }
    for phase in PhaseKind::REDUCE_PHASES {
        columns.push((
            format!("reduce {}", phase.name().to_lowercase()),
            Box::new(move |job: &JobProfile| {
                job.avg_reduce_profile()
                    .map(|reduce: &ReduceProfile| reduce.timing(phase, 0.0))
                    .unwrap_or(0.0)
            }),
        ));
    }
    columns
}

fn average_map(job: &JobProfile) -> MapProfile {
    MapProfile::average("map", 0, job.avg_map_profiles())
}

fn print_table(results: &[BatchResult]) {
    let columns = columns();
    let width = results.iter().map(|x| x.name.len()).max().unwrap_or(0).max("configuration".len());
    print!("| {: <width$} |", "configuration", width = width);
    for (name, _) in columns.iter() {
        print!(" {: >12} |", name);
    }
    println!();
    print!("|-{:-<width$}-|", "", width = width);
    for _ in columns.iter() {
        print!("--------------|");
    }
    println!();
    for result in results.iter() {
        print!("| {: <width$} |", result.name, width = width);
        match &result.profile {
            Some(job) => {
                for (_, value) in columns.iter() {
                    print!(" {: >12.3} |", value(job));
                }
                println!();
            }
            None => println!(" {} |", result.error.as_deref().unwrap_or("failed")),
        }
    }
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let mut baseline: JobProfile =
        serde_yaml::from_str(&std::fs::read_to_string(args.profile).expect("Can't read profile file"))
            .expect("Can't parse profile file");
    if baseline.avg_map_profiles().is_empty() {
        baseline.update_profile();
    }
    let conf = match args.conf {
        Some(path) => Configuration::from_yaml(path).expect("Can't read configuration"),
        None => Configuration::new(),
    };
    let model: Arc<dyn DataSetModel> =
        Arc::new(UniformDataSetModel::from_yaml(args.inputs).expect("Can't read job inputs"));
    let grid = match args.grid {
        Some(path) => grid_from_yaml(path).expect("Can't read configuration grid"),
        None => ConfigurationGrid::new(),
    };

    let oracle = JobProfileOracle::new(&baseline)
        .expect("Can't build oracle from profile")
        .with_ignore_reducers(args.ignore_reducers);
    info!("Evaluating job {}", oracle.job_id());
    let results = WhatIfBatch::new(Arc::new(oracle), model, conf, grid).run(args.threads);

    if let Some(output) = args.output {
        File::create(output)
            .expect("Can't create output file")
            .write_all(
                serde_json::to_string_pretty(&results)
                    .expect("Can't serialize results")
                    .as_bytes(),
            )
            .expect("Can't write to output file");
    }
    print_table(&results);
}
