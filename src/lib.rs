//! Steady-state groundwater flow under a dividing wall, solved with linear
//! triangle finite elements. Single solves and parameter sweeps over the wall
//! depth or thickness.

pub mod datatypes;
pub mod error;
pub mod export;
pub mod geometry;
pub mod mesher;
pub mod model;
pub mod pipeline;
pub mod post_processor;
pub mod progress;
pub mod report;
pub mod solver;
pub mod sweep;
pub mod worker;

pub use datatypes::{Marker, Mesh, SolutionResult, SolvedModel, SweepAxis, SweepResult};
pub use error::{FlowError, Result};
pub use model::{ModelParameters, SweepSpec};
pub use pipeline::Pipeline;
