use nalgebra::{DVector, SMatrix};

use crate::{
    datatypes::{Mesh, SolutionResult},
    solver::{
        compute_element_area, compute_gradient_matrix, compute_permeability_matrix,
        NodalSolution,
    },
};

/// Flux of a single element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementFlux {
    /// Hydraulic gradient `(dphi/dx, dphi/dy)`
    pub gradient: [f64; 2],
    /// Volume flux `-D * gradient`
    pub flux: [f64; 2],
    pub magnitude: f64,
}

/// Calculates the flux in an element from its nodal potentials
///
/// # Arguments
/// * `mesh` - The triangulated domain
/// * `element_index` - The element to target
/// * `a` - Nodal potentials
/// * `permeability` - The 2x2 permeability matrix
pub fn compute_element_flux(
    mesh: &Mesh,
    element_index: usize,
    a: &DVector<f64>,
    permeability: &SMatrix<f64, 2, 2>,
) -> ElementFlux {
    let element = &mesh.elements[element_index];
    let vertices = mesh.element_vertices(element);

    let nodal_potentials: SMatrix<f64, 3, 1> = SMatrix::from(element.nodes.map(|i| a[i]));

    let gradient =
        compute_gradient_matrix(&vertices, compute_element_area(&vertices)) * nodal_potentials;
    let flux = -(permeability * gradient);

    ElementFlux {
        gradient: [gradient[0], gradient[1]],
        flux: [flux[0], flux[1]],
        magnitude: f64::sqrt(f64::powi(flux[0], 2) + f64::powi(flux[1], 2)),
    }
}

/// Derives per-element flux from the nodal solution and collects everything
/// into a [`SolutionResult`]
pub fn run(mesh: &Mesh, solution: NodalSolution, kx: f64, ky: f64) -> SolutionResult {
    let permeability = compute_permeability_matrix(kx, ky);

    let mut result = SolutionResult {
        gradients: Vec::with_capacity(mesh.elements.len()),
        qs: Vec::with_capacity(mesh.elements.len()),
        eff_flux: Vec::with_capacity(mesh.elements.len()),
        ..Default::default()
    };

    for i in 0..mesh.elements.len() {
        let element_flux = compute_element_flux(mesh, i, &solution.a, &permeability);

        result.gradients.push(element_flux.gradient);
        result.qs.push(element_flux.flux);
        result.eff_flux.push(element_flux.magnitude);
    }

    result.a = solution.a.as_slice().to_vec();
    result.r = solution.r.as_slice().to_vec();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Element, Vertex};

    fn strip_mesh() -> Mesh {
        Mesh {
            nodes: vec![
                Vertex { x: 0.0, y: 0.0 },
                Vertex { x: 2.0, y: 0.0 },
                Vertex { x: 2.0, y: 1.0 },
                Vertex { x: 0.0, y: 1.0 },
            ],
            elements: vec![
                Element { nodes: [0, 1, 2] },
                Element { nodes: [0, 2, 3] },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn uniform_gradient_gives_uniform_flux() {
        let mesh = strip_mesh();
        // phi = 4 - x
        let a = DVector::from_vec(mesh.nodes.iter().map(|v| 4.0 - v.x).collect());
        let solution = NodalSolution {
            r: DVector::zeros(4),
            a,
        };

        let result = run(&mesh, solution, 3.0, 7.0);

        assert_eq!(result.qs.len(), 2);
        for (qs, grad) in result.qs.iter().zip(&result.gradients) {
            assert!((grad[0] + 1.0).abs() < 1e-12);
            assert!(grad[1].abs() < 1e-12);
            assert!((qs[0] - 3.0).abs() < 1e-12);
            assert!(qs[1].abs() < 1e-12);
        }
        assert!((result.max_flux() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn magnitude_matches_flux_vector() {
        let mesh = strip_mesh();
        let a = DVector::from_vec(vec![1.0, -2.0, 0.5, 3.0]);
        let result = run(
            &mesh,
            NodalSolution {
                r: DVector::zeros(4),
                a,
            },
            2.0,
            5.0,
        );

        for (qs, eff) in result.qs.iter().zip(&result.eff_flux) {
            assert!((eff - f64::hypot(qs[0], qs[1])).abs() < 1e-12);
        }
        assert_eq!(result.a, vec![1.0, -2.0, 0.5, 3.0]);
    }
}
