use log::{error, info};

use crate::{
    datatypes::{SweepAxis, SweepResult},
    error::Result,
    export::ResultExporter,
    model::ModelParameters,
    pipeline::Pipeline,
    progress::{notify, ProgressObserver},
};

/// `steps` evenly spaced values from `start` to `end`, both included.
/// A single step yields only `start`.
pub fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..steps)
            .map(|i| {
                if i == steps - 1 {
                    end
                } else {
                    start + (end - start) * i as f64 / (steps - 1) as f64
                }
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Next step to execute, 1-based
    Running { step: usize },
    Done,
}

/// Drives a parameter study one step at a time.
///
/// The swept field of the borrowed model is overwritten while running and
/// restored once the controller reaches [`SweepState::Done`] or is dropped.
pub struct SweepController<'a> {
    model: &'a mut ModelParameters,
    base: String,
    values: Vec<f64>,
    snapshot: (f64, f64),
    state: SweepState,
    result: SweepResult,
}

impl<'a> SweepController<'a> {
    /// Validates the model and sweep, then snapshots the swept parameters
    ///
    /// # Arguments
    /// * `model` - The model to sweep, restored afterwards
    /// * `base` - Prefix of the per-step export identifiers
    pub fn new(model: &'a mut ModelParameters, base: &str) -> Result<SweepController<'a>> {
        model.validate_sweep()?;

        let axis = model.sweep.axis;
        let values = match axis {
            SweepAxis::Depth => linspace(model.d, model.sweep.d_end, model.sweep.steps),
            SweepAxis::Thickness => linspace(model.t, model.sweep.t_end, model.sweep.steps),
        };

        Ok(SweepController {
            snapshot: (model.d, model.t),
            result: SweepResult::new(axis, values.len()),
            state: SweepState::Running { step: 1 },
            base: base.to_owned(),
            values,
            model,
        })
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn result(&self) -> &SweepResult {
        &self.result
    }

    /// Export identifier of a step, e.g. `base_d007`
    pub fn identifier(&self, step: usize) -> String {
        format!("{}_{}{:03}", self.base, self.result.axis.letter(), step)
    }

    /// Runs the current step and moves to the next state. A solve failure
    /// aborts the sweep; an export failure is recorded and the sweep goes on.
    pub fn advance(
        &mut self,
        pipeline: &Pipeline,
        exporter: &dyn ResultExporter,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<SweepState> {
        let step = match self.state {
            SweepState::Running { step } => step,
            SweepState::Done => return Ok(SweepState::Done),
        };

        let steps = self.values.len();
        let value = self.values[step - 1];
        let letter = self.result.axis.letter();

        info!("executing for {letter} = {value}...");
        let percent = ((step - 1) * 100 / steps) as u8;
        notify(
            progress,
            percent,
            &format!("Executing for {letter} = {value:.2}..."),
        );

        match self.result.axis {
            SweepAxis::Depth => self.model.d = value,
            SweepAxis::Thickness => self.model.t = value,
        }

        let solved = match pipeline.execute(self.model, None) {
            Ok(s) => s,
            Err(err) => {
                error!("parameter study aborted at step {step}: {err}");
                self.finish_state();
                return Err(err);
            }
        };

        self.result.range.push(value);
        self.result.max_flux.push(solved.result.max_flux());

        let identifier = self.identifier(step);
        match exporter.export(&identifier, &solved) {
            Ok(path) => self.result.exports.push(path),
            Err(err) => {
                error!("export of step {step} failed: {err}");
                self.result.failed_exports.push((step, err.to_string()));
            }
        }

        if step == steps {
            self.finish_state();
            info!("parameter study is done");
            notify(progress, 100, "Parameter study is done.");
        } else {
            self.state = SweepState::Running { step: step + 1 };
        }

        Ok(self.state)
    }

    fn finish_state(&mut self) {
        self.state = SweepState::Done;
        self.restore();
    }

    fn restore(&mut self) {
        (self.model.d, self.model.t) = self.snapshot;
    }

    /// Restores the model and hands out the collected result
    pub fn finish(mut self) -> SweepResult {
        self.finish_state();
        let axis = self.result.axis;
        std::mem::replace(&mut self.result, SweepResult::new(axis, 0))
    }
}

impl Drop for SweepController<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Runs a complete parameter study over the axis selected in the model
///
/// # Arguments
/// * `pipeline` - The single-solve pipeline used for every step
/// * `model` - The model to sweep; its `d` and `t` are restored afterwards
/// * `exporter` - Receives the result of every step
/// * `base` - Prefix of the per-step export identifiers
/// * `progress` - Optional observer notified before each step
pub fn run_sweep(
    pipeline: &Pipeline,
    model: &mut ModelParameters,
    exporter: &dyn ResultExporter,
    base: &str,
    progress: Option<&dyn ProgressObserver>,
) -> Result<SweepResult> {
    let mut controller = SweepController::new(model, base)?;

    while let SweepState::Running { .. } = controller.state() {
        controller.advance(pipeline, exporter, progress)?;
    }

    Ok(controller.finish())
}
