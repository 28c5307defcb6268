use std::{
    sync::mpsc::Sender,
    thread::{self, JoinHandle},
};

use log::debug;

use crate::{
    datatypes::{SolvedModel, SweepResult},
    error::Result,
    export::ResultExporter,
    model::ModelParameters,
    pipeline::Pipeline,
    progress::ProgressObserver,
    sweep,
};

/// Progress message sent from a worker: percentage and label
pub type ProgressMessage = (u8, String);

/// Work handed to a background thread
pub enum Job {
    Solve(ModelParameters),
    Sweep {
        model: ModelParameters,
        exporter: Box<dyn ResultExporter + Send>,
        base: String,
    },
}

/// Result of a finished job. The model comes back with its swept fields
/// restored.
#[derive(Debug)]
pub enum JobOutput {
    Solved {
        model: ModelParameters,
        solved: SolvedModel,
    },
    Swept {
        model: ModelParameters,
        result: SweepResult,
    },
}

/// Forwards progress notifications over a channel
pub struct ChannelObserver {
    sender: Sender<ProgressMessage>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<ProgressMessage>) -> ChannelObserver {
        ChannelObserver { sender }
    }
}

impl ProgressObserver for ChannelObserver {
    fn set(&self, percent: u8, label: &str) {
        // receiver may already be gone
        let _ = self.sender.send((percent, label.to_owned()));
    }
}

fn run_job(pipeline: &Pipeline, job: Job, progress: Option<&dyn ProgressObserver>) -> Result<JobOutput> {
    match job {
        Job::Solve(model) => {
            let solved = pipeline.execute(&model, progress)?;
            Ok(JobOutput::Solved { model, solved })
        }
        Job::Sweep {
            mut model,
            exporter,
            base,
        } => {
            let result = sweep::run_sweep(pipeline, &mut model, exporter.as_ref(), &base, progress)?;
            Ok(JobOutput::Swept { model, result })
        }
    }
}

/// Runs a job on its own thread
///
/// # Arguments
/// * `pipeline` - The pipeline to run the job with, moved into the thread
/// * `job` - The solve or sweep to run
/// * `sender` - Optional channel receiving progress notifications
pub fn spawn(
    pipeline: Pipeline,
    job: Job,
    sender: Option<Sender<ProgressMessage>>,
) -> JoinHandle<Result<JobOutput>> {
    thread::spawn(move || {
        debug!("worker thread started");

        let observer = sender.map(ChannelObserver::new);
        let progress = observer.as_ref().map(|o| o as &dyn ProgressObserver);

        let output = run_job(&pipeline, job, progress);
        debug!("worker thread finished");
        output
    })
}
