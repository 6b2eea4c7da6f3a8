use crate::{
    datatypes::{Element, ModelMetadata, Node},
    element::{self, DOF, DOFS_PER_CELL},
    error::ElasticaError,
    mesher::Triangulation,
    rhs::RightHandSide,
};
use indicatif::ProgressBar;
use nalgebra::{DVector, SVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::{debug, info, trace, Level};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

/// Outcome of a linear solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub iterations: u64,
    pub residual: f64,
}

/// Creates a progress bar that only draws when info level logging is on
fn progress_bar(len: u64) -> ProgressBar {
    if tracing::enabled!(Level::INFO) {
        ProgressBar::new(len)
    } else {
        ProgressBar::hidden()
    }
}

/// Sparse matrix-vector product `A x`
pub fn sparse_mat_vec(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(col, value)| value * x[*col])
                .sum::<f64>()
        })
        .collect()
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(sparse_mat_vec(self.a, x))
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    initial_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: progress_bar(1000),
            initial_mag: None,
            final_mag: target_cost.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = state.get_cost();
        trace!(iteration = state.get_iter(), residual = cost.sqrt(), "cg iteration");

        if !cost.is_finite() || cost <= 0.0 {
            return Ok(());
        }

        // progress is the fraction of residual decades already gained
        let cost_mag = cost.log10();
        let initial_mag = *self.initial_mag.get_or_insert(cost_mag);
        let span = initial_mag - self.final_mag;
        if span > 0.0 {
            let fraction = ((initial_mag - cost_mag) / span).clamp(0.0, 1.0);
            self.bar.set_position((1000.0 * fraction) as u64);
        }

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`. argmin tracks the
/// squared residual `r·r` as the cost, so the target cost is `tolerance²`.
///
/// # Arguments
/// * `a` - A square symmetric positive definite sparse matrix
/// * `b` - The right hand side of the system
/// * `max_iters` - Iteration cap
/// * `tolerance` - Target residual norm `||b - Ax||`
///
/// # Returns
/// `x` from the system along with the iteration count and final residual norm
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    max_iters: u64,
    tolerance: f64,
) -> Result<(DVector<f64>, SolveStats), ElasticaError> {
    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };
    let target_cost = tolerance * tolerance;
    let observer = ConjugateGradientObserverBar::new(target_cost);

    // Run solver
    let res = match Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(max_iters)
                .target_cost(target_cost)
        })
        .add_observer(observer, ObserverMode::NewBest)
        .run()
    {
        Ok(r) => r,
        Err(err) => {
            return Err(ElasticaError::Solver(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let state = res.state();
    let best_cost = state.get_best_cost();
    let stats = SolveStats {
        iterations: state.get_iter(),
        residual: best_cost.sqrt(),
    };

    if !(best_cost <= target_cost) {
        return Err(ElasticaError::Solver(format!(
            "Conjugate Gradient did not converge: residual {:e} after {} iterations (target {:e})",
            stats.residual, stats.iterations, tolerance
        )));
    }

    let best_param = match &state.best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(ElasticaError::Solver(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    Ok((best_param, stats))
}

/// Global degree of freedom indices of a cell, interleaved per node
pub fn cell_dof_indices(vertices: &[usize; 4]) -> [usize; DOFS_PER_CELL] {
    let mut dofs = [0usize; DOFS_PER_CELL];
    for (i, vertex) in vertices.iter().enumerate() {
        dofs[DOF * i] = DOF * vertex;
        dofs[DOF * i + 1] = DOF * vertex + 1;
    }
    dofs
}

/// Gathers the nodal displacements of a cell from the node list
pub fn cell_displacements(
    vertices: &[usize; 4],
    nodes: &[Node],
) -> Result<SVector<f64, DOFS_PER_CELL>, ElasticaError> {
    let mut displacements = SVector::<f64, DOFS_PER_CELL>::zeros();
    for (i, vertex) in vertices.iter().enumerate() {
        let node = &nodes[*vertex];
        match (node.ux, node.uy) {
            (Some(ux), Some(uy)) => {
                displacements[DOF * i] = ux;
                displacements[DOF * i + 1] = uy;
            }
            _ => {
                return Err(ElasticaError::Solver(format!(
                    "Unknown displacement at node {vertex} after solve"
                )))
            }
        }
    }
    Ok(displacements)
}

/// Assembles the cell stiffness matrices into a total stiffness matrix
///
/// # Arguments
/// * `tri` - The mesh
/// * `model_metadata` - The material parameters
///
/// # Returns
/// A sparse matrix of size `2 * n_vertices` squared
pub fn build_total_stiffness_matrix(
    tri: &Triangulation,
    model_metadata: &ModelMetadata,
) -> Result<CsrMatrix<f64>, ElasticaError> {
    let n_dofs = DOF * tri.n_vertices();
    let mut total_stiffness_matrix = CooMatrix::new(n_dofs, n_dofs);

    let bar = progress_bar(tri.n_active_cells() as u64);
    for (cell_idx, cell) in tri.cells().iter().enumerate() {
        let stiffness_mat = element::compute_cell_stiffness_matrix(
            &tri.cell_vertices(cell_idx),
            model_metadata.lambda,
            model_metadata.mu,
        )?;

        let dofs = cell_dof_indices(&cell.vertices);
        for (local_row, global_row) in dofs.iter().enumerate() {
            for (local_col, global_col) in dofs.iter().enumerate() {
                total_stiffness_matrix.push(
                    *global_row,
                    *global_col,
                    stiffness_mat[(local_row, local_col)],
                );
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!(
        "built total stiffness matrix with {} dofs from {} cells",
        n_dofs,
        tri.n_active_cells()
    );

    Ok(CsrMatrix::from(&total_stiffness_matrix))
}

/// Assembles the global load vector
///
/// # Arguments
/// * `tri` - The mesh
/// * `rhs` - The body force
pub fn build_load_vector<R>(tri: &Triangulation, rhs: &R) -> Result<DVector<f64>, ElasticaError>
where
    R: RightHandSide + ?Sized,
{
    let mut load = DVector::zeros(DOF * tri.n_vertices());

    for (cell_idx, cell) in tri.cells().iter().enumerate() {
        let cell_load = element::compute_cell_load_vector(&tri.cell_vertices(cell_idx), rhs)?;
        for (local, global) in cell_dof_indices(&cell.vertices).iter().enumerate() {
            load[*global] += cell_load[local];
        }
    }

    Ok(load)
}

/// Creates the node list for a solve with the boundary clamped
///
/// # Arguments
/// * `tri` - The mesh
/// * `load` - The global load vector
///
/// # Returns
/// Nodes on the boundary have zero displacement and unknown force, all other
/// nodes carry their assembled load and unknown displacement
pub fn build_nodes(tri: &Triangulation, load: &DVector<f64>) -> Vec<Node> {
    let on_boundary = tri.boundary_vertices();

    tri.vertices()
        .iter()
        .zip(on_boundary)
        .enumerate()
        .map(|(i, (vertex, clamped))| {
            if clamped {
                Node {
                    vertex: *vertex,
                    ux: Some(0.0),
                    uy: Some(0.0),
                    fx: None,
                    fy: None,
                }
            } else {
                Node {
                    vertex: *vertex,
                    ux: None,
                    uy: None,
                    fx: Some(load[DOF * i]),
                    fy: Some(load[DOF * i + 1]),
                }
            }
        })
        .collect()
}

/// Creates nodal forces and nodal displacement column vectors
///
/// # Arguments
/// * `nodes` - The list of nodes
///
/// # Returns
/// The nodal forces and nodal displacements column vectors, in that order
fn build_col_vecs(nodes: &[Node]) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut nodal_forces: Vec<Option<f64>> = Vec::with_capacity(nodes.len() * DOF);
    let mut nodal_displacements: Vec<Option<f64>> = Vec::with_capacity(nodes.len() * DOF);

    for node in nodes {
        nodal_forces.push(node.fx);
        nodal_forces.push(node.fy);
        nodal_displacements.push(node.ux);
        nodal_displacements.push(node.uy);
    }

    (nodal_forces, nodal_displacements)
}

/// Builds the reduced system over the unknown displacements
///
/// Known displacements are moved to the right hand side.
///
/// # Arguments
/// * `nodal_forces` - The nodal forces column vector
/// * `nodal_displacements` - The nodal displacements column vector
/// * `total_stiffness_matrix` - The total stiffness matrix of the model
///
/// # Returns
/// The reduced matrix and right hand side, in that order
fn build_known_unknown_system(
    nodal_forces: &[Option<f64>],
    nodal_displacements: &[Option<f64>],
    total_stiffness_matrix: &CsrMatrix<f64>,
) -> Result<(CsrMatrix<f64>, DVector<f64>), ElasticaError> {
    let mut unknown_index: Vec<Option<usize>> = vec![None; nodal_displacements.len()];
    let mut num_unknown_displacements = 0;
    for (dof, displacement) in nodal_displacements.iter().enumerate() {
        if displacement.is_none() {
            unknown_index[dof] = Some(num_unknown_displacements);
            num_unknown_displacements += 1;
        }
    }

    let mut unknown_matrix = CooMatrix::new(num_unknown_displacements, num_unknown_displacements);
    let mut known_vector: DVector<f64> = DVector::zeros(num_unknown_displacements);

    for (row, col, value) in total_stiffness_matrix.triplet_iter() {
        let local_row = match unknown_index[row] {
            Some(r) => r,
            None => continue,
        };

        match (unknown_index[col], nodal_displacements[col]) {
            (Some(local_col), _) => unknown_matrix.push(local_row, local_col, *value),
            (None, Some(displacement)) => known_vector[local_row] -= value * displacement,
            (None, None) => {}
        }
    }

    for (dof, local_row) in unknown_index.iter().enumerate() {
        if let Some(local_row) = local_row {
            match nodal_forces[dof] {
                Some(force) => known_vector[*local_row] += force,
                None => {
                    return Err(ElasticaError::Solver(format!(
                        "Degree of freedom {dof} has neither a known displacement nor a known force"
                    )))
                }
            }
        }
    }

    Ok((CsrMatrix::from(&unknown_matrix), known_vector))
}

/// Solves for the displacements in the nodes. Loads the results into the node
/// objects
///
/// # Arguments
/// * `nodes` - The vector of nodes
/// * `total_stiffness_matrix` - The total stiffness matrix of the model
/// * `model_metadata` - Solver controls
pub fn solve(
    nodes: &mut [Node],
    total_stiffness_matrix: &CsrMatrix<f64>,
    model_metadata: &ModelMetadata,
) -> Result<SolveStats, ElasticaError> {
    debug!("setting up reduced system...");

    // Assemble column Matrixes
    let (mut nodal_forces, mut nodal_displacements) = build_col_vecs(nodes);

    // Setup equation for unknown displacements
    let (unknown_matrix, known_vector) =
        build_known_unknown_system(&nodal_forces, &nodal_displacements, total_stiffness_matrix)?;

    let start = std::time::Instant::now();

    let (displacement_solution, stats) = if known_vector.nrows() == 0 || known_vector.norm() == 0.0
    {
        debug!("right hand side vanishes, skipping iteration");
        (
            DVector::zeros(known_vector.nrows()),
            SolveStats {
                iterations: 0,
                residual: 0.0,
            },
        )
    } else {
        run_conjugate_gradient(
            &unknown_matrix,
            &known_vector,
            model_metadata.cg_max_iterations,
            model_metadata.cg_tolerance,
        )?
    };

    let elapsed = start.elapsed().as_secs_f32();
    info!(
        "solved system of {} unknowns in {:.3} seconds ({} CG iterations, residual {:e})",
        known_vector.nrows(),
        elapsed,
        stats.iterations,
        stats.residual
    );

    // Load displacement solution into nodal_displacement vector
    let mut solution_cursor = 0;
    for u in nodal_displacements.iter_mut() {
        if u.is_none() {
            *u = Some(displacement_solution[solution_cursor]);
            solution_cursor += 1;
        }
    }
    let nodal_displacements: Vec<f64> = nodal_displacements
        .iter()
        .map(|u| u.unwrap_or_default())
        .collect();

    // Solve for forces
    let total_forces = sparse_mat_vec(total_stiffness_matrix, &nodal_displacements);
    for (f, solved_force) in nodal_forces.iter_mut().zip(total_forces) {
        if f.is_none() {
            *f = Some(solved_force);
        }
    }

    // Load results into nodes
    for (i, node) in nodes.iter_mut().enumerate() {
        node.ux = Some(nodal_displacements[DOF * i]);
        node.uy = Some(nodal_displacements[DOF * i + 1]);

        node.fx = nodal_forces[DOF * i];
        node.fy = nodal_forces[DOF * i + 1];
    }

    Ok(stats)
}

/// Calculates the von Mises stress at the centre of every element
///
/// # Arguments
/// * `elements` - A mutable reference to the vector of elements
/// * `nodes` - The solved nodes
/// * `tri` - The mesh
/// * `model_metadata` - The material parameters
pub fn compute_stress(
    elements: &mut [Element],
    nodes: &[Node],
    tri: &Triangulation,
    model_metadata: &ModelMetadata,
) -> Result<(), ElasticaError> {
    for (cell_idx, element) in elements.iter_mut().enumerate() {
        let displacements = cell_displacements(&element.nodes, nodes)?;

        let stress = element::compute_stress(
            &tri.cell_vertices(cell_idx),
            &displacements,
            model_metadata.lambda,
            model_metadata.mu,
            0.0,
            0.0,
        )?;

        element.stress = Some(element::von_mises(&stress));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{datatypes::Vertex, mesher::hyper_cube, rhs::TwoCircleForcing};
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn square(refinements: usize) -> Triangulation {
        let mut tri = Triangulation::new();
        hyper_cube(&mut tri, -1.0, 1.0).unwrap();
        tri.refine_global(refinements);
        tri
    }

    fn find_node(nodes: &[Node], x: f64, y: f64) -> &Node {
        nodes
            .iter()
            .find(|n| (n.vertex.x - x).abs() < 1e-12 && (n.vertex.y - y).abs() < 1e-12)
            .unwrap()
    }

    #[test]
    fn test_sparse_mat_vec() {
        let mut coo = CooMatrix::new(2, 3);
        coo.push(0, 0, 2.0);
        coo.push(0, 2, 1.0);
        coo.push(1, 1, -1.0);
        coo.push(1, 1, 4.0);
        let csr = CsrMatrix::from(&coo);
        assert_eq!(sparse_mat_vec(&csr, &[1.0, 2.0, 3.0]), vec![5.0, 6.0]);
    }

    #[test]
    fn test_total_stiffness_is_singular_without_constraints() {
        let tri = square(2);
        let k = build_total_stiffness_matrix(&tri, &ModelMetadata::default()).unwrap();
        assert_eq!(k.nrows(), 2 * tri.n_vertices());

        let translation: Vec<f64> = (0..tri.n_vertices()).flat_map(|_| [1.0, 0.0]).collect();
        let forces = sparse_mat_vec(&k, &translation);
        assert!(forces.iter().all(|f| f.abs() < 1e-12));
    }

    #[test]
    fn test_total_load_matches_integral() {
        let tri = square(3);
        let load = build_load_vector(&tri, &|_: &Vertex| Vector2::new(0.5, 1.0)).unwrap();
        let fx: f64 = load.iter().step_by(2).sum();
        let fy: f64 = load.iter().skip(1).step_by(2).sum();
        assert_relative_eq!(fx, 2.0, epsilon = 1e-12);
        assert_relative_eq!(fy, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_load_gives_zero_displacement() {
        let tri = square(2);
        let metadata = ModelMetadata::default();
        let k = build_total_stiffness_matrix(&tri, &metadata).unwrap();
        let load = build_load_vector(&tri, &|_: &Vertex| Vector2::zeros()).unwrap();
        let mut nodes = build_nodes(&tri, &load);

        let stats = solve(&mut nodes, &k, &metadata).unwrap();
        assert_eq!(stats.iterations, 0);
        assert!(nodes.iter().all(|n| n.ux == Some(0.0) && n.uy == Some(0.0)));
        assert!(nodes.iter().all(|n| n.fx.is_some() && n.fy.is_some()));
    }

    #[test]
    fn test_symmetric_forcing_gives_symmetric_displacement() {
        let tri = square(3);
        let metadata = ModelMetadata::default();
        let k = build_total_stiffness_matrix(&tri, &metadata).unwrap();
        let load = build_load_vector(&tri, &TwoCircleForcing::default()).unwrap();
        let mut nodes = build_nodes(&tri, &load);

        let stats = solve(&mut nodes, &k, &metadata).unwrap();
        assert!(stats.iterations > 0);
        assert!(stats.residual <= metadata.cg_tolerance);

        let right = find_node(&nodes, 0.5, 0.0);
        let left = find_node(&nodes, -0.5, 0.0);
        let center = find_node(&nodes, 0.0, 0.0);
        let rx = right.ux.unwrap();
        assert!(rx > 0.0);
        assert_relative_eq!(rx, left.ux.unwrap(), epsilon = 1e-9);
        assert!(center.uy.unwrap() > 0.0);

        let corner = find_node(&nodes, 1.0, 1.0);
        assert_eq!(corner.ux, Some(0.0));
        assert!(corner.fx.is_some());
    }

    #[test]
    fn test_tolerance_bounds_true_residual_norm() {
        let tri = square(4);
        let metadata = ModelMetadata::default();
        let k = build_total_stiffness_matrix(&tri, &metadata).unwrap();
        let load = build_load_vector(&tri, &TwoCircleForcing::default()).unwrap();
        let nodes = build_nodes(&tri, &load);
        let (nodal_forces, nodal_displacements) = build_col_vecs(&nodes);
        let (a, b) =
            build_known_unknown_system(&nodal_forces, &nodal_displacements, &k).unwrap();

        let tolerance = 1e-10;
        let (x, stats) = run_conjugate_gradient(&a, &b, 10000, tolerance).unwrap();

        let ax = sparse_mat_vec(&a, x.as_slice());
        let true_residual = b
            .iter()
            .zip(&ax)
            .map(|(bi, axi)| (bi - axi).powi(2))
            .sum::<f64>()
            .sqrt();
        assert!(b.norm() > 1e3 * tolerance);
        assert!(true_residual <= tolerance, "||b - Ax|| = {true_residual:e}");
        assert!(stats.residual <= tolerance);
        assert_relative_eq!(stats.residual, true_residual, max_relative = 1e-2);
    }

    #[test]
    fn test_equilibrium_of_reactions() {
        let tri = square(2);
        let metadata = ModelMetadata::default();
        let k = build_total_stiffness_matrix(&tri, &metadata).unwrap();
        let load = build_load_vector(&tri, &|_: &Vertex| Vector2::new(1.0, 0.0)).unwrap();
        let mut nodes = build_nodes(&tri, &load);
        let on_boundary = tri.boundary_vertices();

        solve(&mut nodes, &k, &metadata).unwrap();

        // K u over the whole mesh sums to zero because translations are in
        // the kernel of K, so boundary forces balance the interior loads
        let interior: f64 = nodes
            .iter()
            .zip(&on_boundary)
            .filter(|(_, b)| !**b)
            .map(|(n, _)| n.fx.unwrap())
            .sum();
        let boundary: f64 = nodes
            .iter()
            .zip(&on_boundary)
            .filter(|(_, b)| **b)
            .map(|(n, _)| n.fx.unwrap())
            .sum();
        assert!(interior > 0.0);
        assert_relative_eq!(interior + boundary, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_non_convergence_is_reported() {
        let tri = square(3);
        let metadata = ModelMetadata {
            cg_max_iterations: 2,
            ..ModelMetadata::default()
        };
        let k = build_total_stiffness_matrix(&tri, &metadata).unwrap();
        let load = build_load_vector(&tri, &TwoCircleForcing::default()).unwrap();
        let mut nodes = build_nodes(&tri, &load);

        let err = solve(&mut nodes, &k, &metadata).unwrap_err();
        assert!(matches!(err, ElasticaError::Solver(_)));
    }
}
