use std::collections::BTreeMap;

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};
use log::{debug, info, trace};
use nalgebra::{matrix, DMatrix, DVector, SMatrix};
use nalgebra_sparse::{factorization::CscCholesky, CooMatrix, CscMatrix, CsrMatrix};

use crate::{
    datatypes::{Constraint, Element, Marker, Mesh, Vertex},
    error::{FlowError, Result},
    mesher::signed_area,
};

/// Degrees of freedom per node: the piezometric head
pub const DOF: usize = 1;
pub const MAX_CG_ITER_FACTOR: u64 = 10;
/// Relative residual the conjugate gradient iterates towards
pub const TARGET_CG_RESIDUAL: f64 = 1e-10;
/// Relative residual above which a conjugate gradient result is rejected
pub const ACCEPT_CG_RESIDUAL: f64 = 1e-6;

/// Elements with an area below this fraction of the mean element area are
/// considered degenerate
const DEGENERATE_AREA: f64 = 1e-12;

/// Linear solver strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SolverKind {
    /// Sparse Cholesky factorization
    #[default]
    Cholesky,
    /// Iterative conjugate gradient
    ConjugateGradient,
}

/// Global conductivity system of one solve
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub matrix: CsrMatrix<f64>,
    pub load: DVector<f64>,
    pub constraints: Vec<Constraint>,
}

/// Nodal potential and reaction flux returned by the linear solve
#[derive(Debug, Clone)]
pub struct NodalSolution {
    pub a: DVector<f64>,
    pub r: DVector<f64>,
}

/// Calculates the area of the element
///
/// # Arguments
/// * `vertices` - Corner coordinates of the element
///
/// # Returns
/// The signed area, positive for counter-clockwise corners
pub fn compute_element_area(vertices: &[Vertex; 3]) -> f64 {
    signed_area(vertices[0], vertices[1], vertices[2])
}

/// Calculates the gradient matrix of a linear triangle. Multiplied with the
/// nodal potentials it gives the hydraulic gradient `(dphi/dx, dphi/dy)`.
///
/// # Arguments
/// * `vertices` - Corner coordinates of the element
/// * `element_area` - The signed area of the element
///
/// # Returns
/// A 2x3 gradient matrix
pub fn compute_gradient_matrix(vertices: &[Vertex; 3], element_area: f64) -> SMatrix<f64, 2, 3> {
    let [v0, v1, v2] = vertices;

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut gradient_mat: SMatrix<f64, 2, 3> = matrix![
        beta_1, beta_2, beta_3;
        gamma_1, gamma_2, gamma_3;
    ];

    gradient_mat /= 2.0 * element_area;

    gradient_mat
}

/// Builds the constitutive matrix of an orthotropic soil
///
/// # Arguments
/// * `kx` - Permeability in x-direction
/// * `ky` - Permeability in y-direction
///
/// # Returns
/// A 2x2 diagonal permeability matrix
pub fn compute_permeability_matrix(kx: f64, ky: f64) -> SMatrix<f64, 2, 2> {
    matrix![
        kx, 0.0;
        0.0, ky;
    ]
}

/// Computes the conductivity matrix for a given element
///
/// # Arguments
/// * `vertices` - Corner coordinates of the element
/// * `permeability` - The 2x2 permeability matrix
/// * `thickness` - The element thickness
///
/// # Returns
/// A 3x3 conductivity matrix for the element
pub fn compute_element_conductivity_matrix(
    vertices: &[Vertex; 3],
    permeability: &SMatrix<f64, 2, 2>,
    thickness: f64,
) -> SMatrix<f64, 3, 3> {
    let element_area = compute_element_area(vertices);
    let gradient_mat = compute_gradient_matrix(vertices, element_area);

    (gradient_mat.transpose() * permeability) * gradient_mat * element_area * thickness
}

/// Compiles element conductivity matrices into the global system
///
/// # Arguments
/// * `mesh` - The triangulated domain
/// * `kx`, `ky` - Permeabilities
/// * `thickness` - The element thickness
///
/// # Returns
/// The sparse global matrix and the zero load vector
pub fn assemble(
    mesh: &Mesh,
    kx: f64,
    ky: f64,
    thickness: f64,
) -> Result<(CsrMatrix<f64>, DVector<f64>)> {
    let ndof = DOF * mesh.ndof();
    let permeability = compute_permeability_matrix(kx, ky);

    let areas: Vec<f64> = mesh
        .elements
        .iter()
        .map(|e| compute_element_area(&mesh.element_vertices(e)))
        .collect();
    let mean_area = areas.iter().map(|a| a.abs()).sum::<f64>() / areas.len().max(1) as f64;

    let mut triplets: CooMatrix<f64> = CooMatrix::new(ndof, ndof);

    for (i, (element, area)) in std::iter::zip(&mesh.elements, &areas).enumerate() {
        if *area <= DEGENERATE_AREA * mean_area {
            return Err(FlowError::Solver(format!(
                "Element {i} with nodes {:?} is degenerate or clockwise (area {area})",
                element.nodes
            )));
        }

        let vertices = mesh.element_vertices(element);
        let conductivity_mat =
            compute_element_conductivity_matrix(&vertices, &permeability, thickness);

        scatter_add(&mut triplets, element, &conductivity_mat);
    }

    let matrix = CsrMatrix::from(&triplets);
    debug!(
        "assembled global matrix {ndof}x{ndof} with {} non-zeros",
        matrix.nnz()
    );

    Ok((matrix, DVector::zeros(ndof)))
}

fn scatter_add(triplets: &mut CooMatrix<f64>, element: &Element, local: &SMatrix<f64, 3, 3>) {
    for (local_row, node_row) in element.nodes.iter().enumerate() {
        for (local_col, node_col) in element.nodes.iter().enumerate() {
            triplets.push(*node_row, *node_col, local[(local_row, local_col)]);
        }
    }
}

/// Converts the marked boundary node sets into fixed potentials: zero on the
/// open side and `head` on the dam side.
pub fn boundary_constraints(mesh: &Mesh, head: f64) -> Result<Vec<Constraint>> {
    let mut fixed: BTreeMap<usize, (Marker, f64)> = BTreeMap::new();

    for (marker, value) in [(Marker::OpenSide, 0.0), (Marker::DamSide, head)] {
        for node in mesh.marked_nodes(marker) {
            if let Some((other, _)) = fixed.insert(node, (marker, value)) {
                return Err(FlowError::Solver(format!(
                    "Node {node} is tagged both {other:?} and {marker:?}"
                )));
            }
        }
    }

    Ok(fixed
        .into_iter()
        .map(|(node, (_, value))| Constraint { node, value })
        .collect())
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        Ok(csr_mul(self.a, x))
    }
}

fn csr_mul(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(j, v)| v * x[*j])
                .sum()
        })
        .collect()
}

/// Logs conjugate gradient progress
struct ConjugateGradientLogger;

impl<I> Observe<I> for ConjugateGradientLogger
where
    I: State,
{
    fn observe_init(&mut self, name: &str, _state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        trace!("starting {name}");
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        trace!(
            "cg iteration {}: residual {:?}",
            state.get_iter(),
            state.get_cost()
        );
        Ok(())
    }

    fn observe_final(&mut self, state: &I) -> std::result::Result<(), Error> {
        trace!("cg finished after {} iterations", state.get_iter());
        Ok(())
    }
}

/// Solves `Ax=b` for a symmetric positive definite `a` with the conjugate
/// gradient method.
fn run_conjugate_gradient(a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok(DVector::zeros(b.nrows()));
    }

    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };

    let res = match Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(MAX_CG_ITER_FACTOR * b.nrows() as u64)
                .target_cost(TARGET_CG_RESIDUAL * b_norm)
        })
        .add_observer(ConjugateGradientLogger, ObserverMode::Always)
        .run()
    {
        Ok(r) => r,
        Err(err) => {
            return Err(FlowError::Solver(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let best_param = match &res.state().best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(FlowError::Solver(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    let residual = DVector::from_vec(csr_mul(a, best_param.as_slice())) - b;
    let relative = residual.norm() / b_norm;
    if !(relative <= ACCEPT_CG_RESIDUAL) {
        return Err(FlowError::Solver(format!(
            "Conjugate Gradient did not converge, relative residual {relative:e} after {} iterations",
            res.state().get_iter()
        )));
    }

    Ok(best_param)
}

/// Solves `Ax=b` through a sparse Cholesky factorization
fn run_cholesky(a: &CscMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let factorization = CscCholesky::factor(a).map_err(|err| {
        FlowError::Solver(format!(
            "Conductivity matrix is singular or not positive definite: {err:?}"
        ))
    })?;

    let rhs = DMatrix::from_column_slice(b.nrows(), 1, b.as_slice());
    let solution = factorization.solve(&rhs);

    Ok(DVector::from_column_slice(solution.as_slice()))
}

/// Solves the constrained system. Constrained DOFs are set to their fixed
/// value, the free DOFs solve `K_ff a_f = f_f - K_fc a_c`, and reactions
/// are `r = K a - f`.
///
/// # Arguments
/// * `system` - The assembled system with its constraints
/// * `kind` - The linear solver to use on the reduced system
pub fn solve(system: &LinearSystem, kind: SolverKind) -> Result<NodalSolution> {
    let ndof = system.matrix.nrows();

    if system.constraints.is_empty() {
        return Err(FlowError::Solver(
            "System has no fixed values and is singular".to_owned(),
        ));
    }

    // Known values, None for unknowns
    let mut known: Vec<Option<f64>> = vec![None; ndof];
    for constraint in &system.constraints {
        let slot = known.get_mut(constraint.node).ok_or_else(|| {
            FlowError::Solver(format!(
                "Constraint on node {} outside system of size {ndof}",
                constraint.node
            ))
        })?;
        if let Some(v) = *slot {
            if v != constraint.value {
                return Err(FlowError::Solver(format!(
                    "Conflicting fixed values {} and {} on node {}",
                    v, constraint.value, constraint.node
                )));
            }
        }
        *slot = Some(constraint.value);
    }

    // Map global DOFs to the rows of the reduced system
    let mut free_index: Vec<Option<usize>> = vec![None; ndof];
    let mut num_free = 0;
    for (dof, value) in known.iter().enumerate() {
        if value.is_none() {
            free_index[dof] = Some(num_free);
            num_free += 1;
        }
    }

    info!(
        "solving system with {num_free} unknowns and {} fixed values",
        ndof - num_free
    );

    let mut reduced: CooMatrix<f64> = CooMatrix::new(num_free, num_free);
    let mut rhs: DVector<f64> = DVector::zeros(num_free);
    for (dof, free) in free_index.iter().enumerate() {
        if let Some(row) = free {
            rhs[*row] = system.load[dof];
        }
    }
    for (row, col, value) in system.matrix.triplet_iter() {
        let Some(reduced_row) = free_index[row] else {
            continue;
        };
        match (free_index[col], known[col]) {
            (Some(reduced_col), _) => reduced.push(reduced_row, reduced_col, *value),
            (None, Some(fixed)) => rhs[reduced_row] -= value * fixed,
            (None, None) => unreachable!("dof {col} is neither free nor fixed"),
        }
    }

    // a free DOF without positive self-conductivity is not connected to the
    // rest of the domain
    let mut diagonal = vec![0.0; num_free];
    for (row, col, value) in reduced.triplet_iter() {
        if row == col {
            diagonal[row] += value;
        }
    }
    if let Some(dof) = diagonal.iter().position(|d| !(*d > 0.0)) {
        return Err(FlowError::Solver(format!(
            "Conductivity matrix is singular, unknown {dof} has no positive diagonal entry"
        )));
    }

    let start = std::time::Instant::now();

    let free_solution = if num_free == 0 {
        DVector::zeros(0)
    } else {
        match kind {
            SolverKind::Cholesky => run_cholesky(&CscMatrix::from(&reduced), &rhs)?,
            SolverKind::ConjugateGradient => {
                run_conjugate_gradient(&CsrMatrix::from(&reduced), &rhs)?
            }
        }
    };

    let elapsed = start.elapsed().as_secs_f32();
    debug!("solved system in {:.3} seconds", elapsed);

    if free_solution.iter().any(|v| !v.is_finite()) {
        return Err(FlowError::Solver(
            "Solution contains non-finite values".to_owned(),
        ));
    }

    let a: DVector<f64> = DVector::from_iterator(
        ndof,
        known.iter().zip(&free_index).map(|(fixed, free)| match (fixed, free) {
            (Some(v), _) => *v,
            (None, Some(i)) => free_solution[*i],
            (None, None) => unreachable!("dof is neither free nor fixed"),
        }),
    );

    let r = DVector::from_vec(csr_mul(&system.matrix, a.as_slice())) - &system.load;

    Ok(NodalSolution { a, r })
}
