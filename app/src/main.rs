mod error;
mod inputs;
mod options;
mod pipeline;

use std::{error::Error as _, io::Write as _, path::PathBuf};

use chrono::Local;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use pcd_exporter::GeoTiffWriter;

use crate::{error::PipelineError, options::DemOptions};

#[derive(Parser, Debug)]
#[command(
    name = "point2dem",
    about = "A tool for converting point clouds into DEMs, orthoimages and error images",
    author = "MIERUNE Inc.",
    version = "0.0.1"
)]
struct Cli {
    /// JSON file with the run options; inputs given on the command line are added to it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    options: DemOptions,
}

fn resolve_options(cli: Cli) -> Result<DemOptions, PipelineError> {
    match cli.config {
        Some(path) => {
            let mut options = DemOptions::from_json_file(&path)?;
            options.inputs.extend(cli.options.inputs);
            Ok(options)
        }
        None => Ok(cli.options),
    }
}

fn main() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .init();

    let options = match resolve_options(Cli::parse()) {
        Ok(options) => options,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let threads = if options.threads > 0 {
        options.threads
    } else {
        num_cpus::get()
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        log::warn!("could not configure the thread pool: {}", e);
    }

    log::info!("input files: {:?}", options.inputs);
    log::info!("output prefix: {}", options.output_prefix);
    log::info!("threads: {}", threads);

    let start = std::time::Instant::now();
    log::info!("start processing...");

    let mut writer = GeoTiffWriter::default();
    match pipeline::run(&options, &mut writer) {
        Ok(report) => {
            for path in &report.outputs {
                log::info!("wrote {}", path.display());
            }
            log::info!("spacings: {:?}", report.spacings);
            log::info!("valid points: {}", report.num_points);
            log::info!("Elapsed: {:?}", start.elapsed());
        }
        Err(e) => {
            log::error!("{}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                log::error!("caused by: {}", cause);
                source = cause.source();
            }
            std::process::exit(1);
        }
    }
}
