use std::time::Instant;

use log::{debug, info};

use crate::{
    datatypes::SolvedModel,
    error::Result,
    geometry::Geometry,
    mesher::{Mesher, StructuredMesher},
    model::ModelParameters,
    post_processor,
    progress::{notify, ProgressObserver},
    solver::{self, LinearSystem, SolverKind},
};

/// Logs how long each stage of a solve took
struct StageTimer {
    start: Instant,
    stages: Vec<(&'static str, f64)>,
}

impl StageTimer {
    fn new() -> StageTimer {
        StageTimer {
            start: Instant::now(),
            stages: Vec::new(),
        }
    }

    fn lap(&mut self, stage: &'static str) {
        let now = Instant::now();
        self.stages
            .push((stage, (now - self.start).as_secs_f64()));
        self.start = now;
    }

    fn log(&self, num_elements: usize) {
        let total: f64 = self.stages.iter().map(|(_, s)| s).sum();
        debug!("stage timings for {num_elements} elements:");
        for (stage, seconds) in &self.stages {
            let share = if total > 0.0 { seconds / total * 100.0 } else { 0.0 };
            debug!("  {stage:<28} {seconds:>8.4}s {share:>6.2}%");
        }
    }
}

/// Single-solve pipeline: geometry, mesh, assembly, constraints, linear
/// solve, and element flux
pub struct Pipeline {
    pub mesher: Box<dyn Mesher>,
    pub solver: SolverKind,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline {
            mesher: Box::new(StructuredMesher),
            solver: SolverKind::default(),
        }
    }
}

impl Pipeline {
    pub fn new(mesher: Box<dyn Mesher>, solver: SolverKind) -> Pipeline {
        Pipeline { mesher, solver }
    }

    /// Solves the flow problem for one set of parameters
    ///
    /// # Arguments
    /// * `model` - Validated or unvalidated model parameters
    /// * `progress` - Optional observer notified at each stage
    pub fn execute(
        &self,
        model: &ModelParameters,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<SolvedModel> {
        info!("solver is being executed...");
        notify(progress, 1, "Starting solver...");
        model.validate()?;
        let thickness = model.thickness()?;

        let mut timer = StageTimer::new();

        notify(progress, 3, "Generating mesh...");
        let geometry = Geometry::from_model(model);
        let mesh = self.mesher.mesh(&geometry, model.el_size_factor)?;
        timer.lap("mesh");

        notify(progress, 18, "Preparing additional variables...");
        debug!("{} dofs in {} elements", mesh.ndof(), mesh.elements.len());

        notify(progress, 20, "Assembling stiffness matrix...");
        let (matrix, load) = solver::assemble(&mesh, model.kx, model.ky, thickness)?;
        timer.lap("assembly");

        notify(progress, 66, "Assembling force vector...");
        notify(progress, 67, "Assembling boundary conditions...");
        let constraints = solver::boundary_constraints(&mesh, model.p)?;
        timer.lap("boundary conditions");

        notify(progress, 70, "Solving equation system...");
        let system = LinearSystem {
            matrix,
            load,
            constraints,
        };
        let solution = solver::solve(&system, self.solver)?;
        timer.lap("solve");

        notify(progress, 80, "Computing element variables...");
        notify(progress, 97, "Calculating effective flux...");
        let result = post_processor::run(&mesh, solution, model.kx, model.ky);
        timer.lap("element flux");

        notify(progress, 99, "Exporting data...");
        timer.log(mesh.elements.len());

        info!("solver is done, max effective flux {:.4}", result.max_flux());
        notify(progress, 100, "Solver is done.");

        Ok(SolvedModel { mesh, result })
    }
}
