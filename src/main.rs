use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::mpsc,
};

use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};

use groundflow::{
    error::{FlowError, Result},
    export::{self, ResultExporter, VtuExporter},
    mesher::{self, MesherKind},
    model::ModelParameters,
    pipeline::Pipeline,
    progress::{BarObserver, ProgressObserver},
    report::Report,
    solver::SolverKind,
    worker::{self, Job, JobOutput},
};

#[derive(Parser, Debug)]
#[command(name = "groundflow", version, about = "Groundwater flow under a dividing wall")]
struct Cli {
    /// Mesh generator
    #[arg(long, value_enum, default_value_t = MesherKind::Structured, global = true)]
    mesher: MesherKind,

    /// Path of the gmsh executable, used with `--mesher gmsh`
    #[arg(long, global = true)]
    gmsh: Option<PathBuf>,

    /// Linear solver
    #[arg(long, value_enum, default_value_t = SolverKind::Cholesky, global = true)]
    solver: SolverKind,

    /// Log level, overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the standard model to a file
    New { path: PathBuf },
    /// Solve a model once
    Solve {
        model: PathBuf,
        /// Write a text report to this file, `-` for stdout
        #[arg(long)]
        report: Option<PathBuf>,
        /// Write `<prefix>nodes.csv` and `<prefix>elements.csv`
        #[arg(long)]
        csv: Option<String>,
        /// Write the result as a .vtu file with this identifier
        #[arg(long)]
        vtu: Option<String>,
    },
    /// Run the parameter study configured in a model
    Sweep {
        model: PathBuf,
        /// Prefix of the per-step .vtu files and the summary csv
        #[arg(long, short)]
        output: String,
    },
}

fn init_logging(level: Option<&str>) {
    let log_level = level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .or_else(|| std::env::var("RUST_LOG").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(LevelFilter::Info);

    env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:5}] {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .init();
}

/// Runs a job on the worker thread while drawing its progress
fn run_with_progress(pipeline: Pipeline, job: Job) -> Result<JobOutput> {
    let (sender, receiver) = mpsc::channel();
    let handle = worker::spawn(pipeline, job, Some(sender));

    let bar = BarObserver::new();
    for (percent, label) in receiver {
        bar.set(percent, &label);
    }
    bar.finish();

    match handle.join() {
        Ok(output) => output,
        Err(_) => Err(FlowError::Solver("worker thread panicked".to_owned())),
    }
}

fn write_report(path: &Path, report: &Report) -> Result<()> {
    if path == Path::new("-") {
        println!("{report}");
        return Ok(());
    }

    std::fs::write(path, report.to_string()).map_err(|err| {
        FlowError::Export(format!("The file {} could not be written: {err}", path.display()))
    })?;
    info!("wrote report to {}", path.display());
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let pipeline = Pipeline::new(mesher::from_kind(cli.mesher, cli.gmsh), cli.solver);

    match cli.command {
        Command::New { path } => ModelParameters::default().save(&path),
        Command::Solve {
            model,
            report,
            csv,
            vtu,
        } => {
            let model = ModelParameters::from_file(&model)?;
            let JobOutput::Solved { model, solved } =
                run_with_progress(pipeline, Job::Solve(model))?
            else {
                return Err(FlowError::Solver("unexpected worker output".to_owned()));
            };

            println!("max effective flux: {:.4}", solved.result.max_flux());

            // export failures are reported after every output has been tried
            let mut failure = None;

            if let Some(path) = report {
                if let Err(err) = write_report(&path, &Report::new(&model, &solved)) {
                    error!("{err}");
                    failure = Some(err);
                }
            }
            if let Some(prefix) = csv {
                let nodes = PathBuf::from(format!("{prefix}nodes.csv"));
                let elements = PathBuf::from(format!("{prefix}elements.csv"));
                if let Err(err) = export::csv_output(&solved, &nodes, &elements) {
                    error!("{err}");
                    failure = Some(err);
                }
            }
            if let Some(identifier) = vtu {
                match VtuExporter.export(&identifier, &solved) {
                    Ok(path) => info!("wrote {}", path.display()),
                    Err(err) => {
                        error!("{err}");
                        failure = Some(err);
                    }
                }
            }

            match failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        Command::Sweep { model, output } => {
            let model = ModelParameters::from_file(&model)?;
            let job = Job::Sweep {
                model,
                exporter: Box::new(VtuExporter),
                base: output.clone(),
            };
            let JobOutput::Swept { result, .. } = run_with_progress(pipeline, job)? else {
                return Err(FlowError::Solver("unexpected worker output".to_owned()));
            };

            for (value, flux) in result.range.iter().zip(&result.max_flux) {
                println!("{} = {value:.2}: max effective flux {flux:.4}", result.axis.letter());
            }
            for (step, message) in &result.failed_exports {
                warn!("step {step} was not exported: {message}");
            }

            export::write_sweep_summary(&result, &PathBuf::from(format!("{output}_summary.csv")))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1)
    }
}
