use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// A linear triangle, nodes ordered counter-clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub nodes: [usize; 3],
}

/// Tag on a boundary segment used to select the nodes that get a fixed
/// potential
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Marker {
    /// Ground surface downstream of the wall, potential fixed to zero
    OpenSide,
    /// Ground surface upstream of the wall, potential fixed to the head
    DamSide,
}

impl Marker {
    /// Numeric tag used in exported geometry files
    pub fn tag(&self) -> u32 {
        match self {
            Marker::OpenSide => 20,
            Marker::DamSide => 30,
        }
    }
}

/// Parameter varied by a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAxis {
    Depth,
    Thickness,
}

impl SweepAxis {
    /// Single letter used in export identifiers, e.g. `_d007`
    pub fn letter(&self) -> char {
        match self {
            SweepAxis::Depth => 'd',
            SweepAxis::Thickness => 't',
        }
    }
}

/// Triangulated domain. Node index is also the DOF index since every node
/// carries exactly one unknown.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Vertex>,
    pub elements: Vec<Element>,
    pub boundary: BTreeMap<Marker, BTreeSet<usize>>,
}

impl Mesh {
    pub fn ndof(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes tagged with `marker`, empty if the marker is absent
    pub fn marked_nodes(&self, marker: Marker) -> impl Iterator<Item = usize> + '_ {
        self.boundary
            .get(&marker)
            .into_iter()
            .flat_map(|nodes| nodes.iter().copied())
    }

    /// Coordinates of the three corners of an element
    pub fn element_vertices(&self, element: &Element) -> [Vertex; 3] {
        element.nodes.map(|i| self.nodes[i])
    }
}

/// Fixed potential on a single node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub node: usize,
    pub value: f64,
}

/// Nodal and elemental results of one solve
#[derive(Debug, Clone, Default)]
pub struct SolutionResult {
    /// Nodal piezometric head
    pub a: Vec<f64>,
    /// Nodal reaction flux
    pub r: Vec<f64>,
    /// Elemental hydraulic gradient
    pub gradients: Vec<[f64; 2]>,
    /// Elemental flux vector
    pub qs: Vec<[f64; 2]>,
    /// Elemental flux magnitude
    pub eff_flux: Vec<f64>,
}

impl SolutionResult {
    /// Largest elemental flux magnitude, zero for an empty result
    pub fn max_flux(&self) -> f64 {
        self.eff_flux.iter().copied().fold(0.0, f64::max)
    }
}

/// A mesh paired with the solution computed on it
#[derive(Debug, Clone)]
pub struct SolvedModel {
    pub mesh: Mesh,
    pub result: SolutionResult,
}

/// Summary of a parameter sweep
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub axis: SweepAxis,
    /// Swept parameter value per step
    pub range: Vec<f64>,
    /// Maximum effective flux per step
    pub max_flux: Vec<f64>,
    pub exports: Vec<PathBuf>,
    /// Step index (1-based) and message of every export that failed
    pub failed_exports: Vec<(usize, String)>,
}

impl SweepResult {
    pub fn new(axis: SweepAxis, steps: usize) -> SweepResult {
        SweepResult {
            axis,
            range: Vec::with_capacity(steps),
            max_flux: Vec::with_capacity(steps),
            exports: Vec::with_capacity(steps),
            failed_exports: Vec::new(),
        }
    }
}
