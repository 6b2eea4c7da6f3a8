use nalgebra::{Matrix2, Vector2};

use crate::{
    datatypes::Node,
    element::{self, REFERENCE_EDGE_MIDPOINTS},
    error::ElasticaError,
    mesher::Triangulation,
    solver::cell_displacements,
};

/// Computes the per-cell gradient jump error indicators
///
/// Each interior edge adds `diam(K) / 24 * |e| * |[du/dn]|^2` to both of its
/// cells, with the normal derivative taken at the edge midpoint. Boundary
/// edges add nothing.
///
/// # Arguments
/// * `tri` - The mesh
/// * `nodes` - The solved nodes
///
/// # Returns
/// One non-negative indicator per cell
pub fn estimate(tri: &Triangulation, nodes: &[Node]) -> Result<Vec<f64>, ElasticaError> {
    let mut gradients: Vec<[Matrix2<f64>; 4]> = Vec::with_capacity(tri.n_active_cells());
    for (cell_idx, cell) in tri.cells().iter().enumerate() {
        let corners = tri.cell_vertices(cell_idx);
        let displacements = cell_displacements(&cell.vertices, nodes)?;

        let mut edge_gradients = [Matrix2::zeros(); 4];
        for (gradient, (xi, eta)) in edge_gradients.iter_mut().zip(REFERENCE_EDGE_MIDPOINTS) {
            *gradient = element::compute_displacement_gradient(&corners, &displacements, xi, eta)?;
        }
        gradients.push(edge_gradients);
    }

    let mut squared = vec![0.0; tri.n_active_cells()];

    for (edge, owners) in tri.edges() {
        let (first, second) = match owners.as_slice() {
            [first, second] => (*first, *second),
            _ => continue,
        };

        let (a, b) = edge.vertices();
        let va = tri.vertices()[a];
        let vb = tri.vertices()[b];
        let length = va.distance(&vb);
        let normal = Vector2::new(vb.y - va.y, va.x - vb.x) / length;

        let jump = (gradients[first.0][first.1] - gradients[second.0][second.1]) * normal;
        let face_integral = length * jump.norm_squared();

        for (cell_idx, _) in [first, second] {
            squared[cell_idx] += tri.cell_diameter(cell_idx) / 24.0 * face_integral;
        }
    }

    Ok(squared.into_iter().map(f64::sqrt).collect())
}

/// Combines per-cell indicators into a global estimate
pub fn global_estimate(indicators: &[f64]) -> f64 {
    indicators.iter().map(|eta| eta * eta).sum::<f64>().sqrt()
}
