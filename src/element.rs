use nalgebra::{matrix, Matrix2, SMatrix, SVector, Vector2, Vector3};

use crate::{datatypes::Vertex, error::ElasticaError, rhs::RightHandSide};

pub const DOF: usize = 2;
pub const NODES_PER_CELL: usize = 4;
pub const DOFS_PER_CELL: usize = DOF * NODES_PER_CELL;

/// Reference coordinates of the local vertices
pub const REFERENCE_CORNERS: [(f64, f64); NODES_PER_CELL] =
    [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

/// Reference coordinates of the local edge midpoints
pub const REFERENCE_EDGE_MIDPOINTS: [(f64, f64); NODES_PER_CELL] =
    [(0.0, -1.0), (1.0, 0.0), (0.0, 1.0), (-1.0, 0.0)];

/// 2x2 Gauss-Legendre rule on the reference square
///
/// # Returns
/// The quadrature points as `(xi, eta, weight)` triples
pub fn gauss_points() -> [(f64, f64, f64); 4] {
    let p = 1.0 / f64::sqrt(3.0);
    [(-p, -p, 1.0), (p, -p, 1.0), (p, p, 1.0), (-p, p, 1.0)]
}

pub fn shape_values(xi: f64, eta: f64) -> [f64; NODES_PER_CELL] {
    REFERENCE_CORNERS.map(|(xi_i, eta_i)| 0.25 * (1.0 + xi * xi_i) * (1.0 + eta * eta_i))
}

/// Shape function derivatives with respect to the reference coordinates.
/// Row 0 holds d/dxi, row 1 holds d/deta.
pub fn reference_shape_gradients(xi: f64, eta: f64) -> SMatrix<f64, 2, NODES_PER_CELL> {
    let mut grads = SMatrix::<f64, 2, NODES_PER_CELL>::zeros();
    for (i, (xi_i, eta_i)) in REFERENCE_CORNERS.iter().enumerate() {
        grads[(0, i)] = 0.25 * xi_i * (1.0 + eta * eta_i);
        grads[(1, i)] = 0.25 * eta_i * (1.0 + xi * xi_i);
    }
    grads
}

/// Maps a reference point into the physical cell
pub fn map_to_physical(corners: &[Vertex; NODES_PER_CELL], xi: f64, eta: f64) -> Vertex {
    let n = shape_values(xi, eta);
    let mut point = Vertex::new(0.0, 0.0);
    for (corner, n_i) in corners.iter().zip(n) {
        point.x += n_i * corner.x;
        point.y += n_i * corner.y;
    }
    point
}

/// Calculates the Jacobian of the geometry map
///
/// # Returns
/// `[[dx/dxi, dx/deta], [dy/dxi, dy/deta]]`
pub fn compute_jacobian(corners: &[Vertex; NODES_PER_CELL], xi: f64, eta: f64) -> Matrix2<f64> {
    let grads = reference_shape_gradients(xi, eta);
    let mut jacobian = Matrix2::zeros();
    for (i, corner) in corners.iter().enumerate() {
        jacobian[(0, 0)] += grads[(0, i)] * corner.x;
        jacobian[(0, 1)] += grads[(1, i)] * corner.x;
        jacobian[(1, 0)] += grads[(0, i)] * corner.y;
        jacobian[(1, 1)] += grads[(1, i)] * corner.y;
    }
    jacobian
}

/// Calculates the shape function gradients in physical coordinates
///
/// # Arguments
/// * `corners` - The cell corners in local order
/// * `xi`, `eta` - The reference point to evaluate at
///
/// # Returns
/// The 2x4 gradient matrix (row 0 d/dx, row 1 d/dy) and the Jacobian
/// determinant. Fails if the cell is inverted or degenerate at that point.
pub fn compute_physical_gradients(
    corners: &[Vertex; NODES_PER_CELL],
    xi: f64,
    eta: f64,
) -> Result<(SMatrix<f64, 2, NODES_PER_CELL>, f64), ElasticaError> {
    let jacobian = compute_jacobian(corners, xi, eta);
    let det = jacobian.determinant();

    if !(det > 0.0) {
        return Err(ElasticaError::Mesher(format!(
            "Degenerate or inverted cell with corners {:?} (det J = {det})",
            corners
        )));
    }

    let inverse_transpose = match jacobian.try_inverse() {
        Some(inv) => inv.transpose(),
        None => {
            return Err(ElasticaError::Mesher(format!(
                "Singular Jacobian in cell with corners {:?}",
                corners
            )))
        }
    };

    Ok((inverse_transpose * reference_shape_gradients(xi, eta), det))
}

/// Builds the strain-displacement matrix from physical gradients
///
/// # Returns
/// A 3x8 matrix mapping nodal displacements to
/// `[eps_xx, eps_yy, gamma_xy]`
pub fn compute_strain_displacement_matrix(
    grads: &SMatrix<f64, 2, NODES_PER_CELL>,
) -> SMatrix<f64, 3, DOFS_PER_CELL> {
    let mut strain_displacement_mat = SMatrix::<f64, 3, DOFS_PER_CELL>::zeros();
    for i in 0..NODES_PER_CELL {
        let dn_dx = grads[(0, i)];
        let dn_dy = grads[(1, i)];

        strain_displacement_mat[(0, DOF * i)] = dn_dx;
        strain_displacement_mat[(1, DOF * i + 1)] = dn_dy;
        strain_displacement_mat[(2, DOF * i)] = dn_dy;
        strain_displacement_mat[(2, DOF * i + 1)] = dn_dx;
    }
    strain_displacement_mat
}

/// Calculates the isotropic stress-strain matrix
///
/// # Arguments
/// * `lambda` - First Lamé parameter
/// * `mu` - Shear modulus
///
/// # Returns
/// A 3x3 stress-strain matrix
pub fn compute_stress_strain_matrix(lambda: f64, mu: f64) -> SMatrix<f64, 3, 3> {
    matrix![
        lambda + 2.0 * mu, lambda, 0.0;
        lambda, lambda + 2.0 * mu, 0.0;
        0.0, 0.0, mu;
    ]
}

/// Computes the stiffness matrix of a cell
///
/// # Arguments
/// * `corners` - The cell corners in local order
/// * `lambda` - First Lamé parameter
/// * `mu` - Shear modulus
///
/// # Returns
/// An 8x8 stiffness matrix
pub fn compute_cell_stiffness_matrix(
    corners: &[Vertex; NODES_PER_CELL],
    lambda: f64,
    mu: f64,
) -> Result<SMatrix<f64, DOFS_PER_CELL, DOFS_PER_CELL>, ElasticaError> {
    let stress_strain_mat = compute_stress_strain_matrix(lambda, mu);
    let mut stiffness = SMatrix::<f64, DOFS_PER_CELL, DOFS_PER_CELL>::zeros();

    for (xi, eta, weight) in gauss_points() {
        let (grads, det) = compute_physical_gradients(corners, xi, eta)?;
        let strain_displacement_mat = compute_strain_displacement_matrix(&grads);
        stiffness += strain_displacement_mat.transpose()
            * stress_strain_mat
            * strain_displacement_mat
            * (det * weight);
    }

    Ok(stiffness)
}

/// Computes the consistent load vector of a cell
///
/// # Arguments
/// * `corners` - The cell corners in local order
/// * `rhs` - The body force
///
/// # Returns
/// An 8-vector of nodal loads, interleaved `(fx, fy)` per node
pub fn compute_cell_load_vector<R>(
    corners: &[Vertex; NODES_PER_CELL],
    rhs: &R,
) -> Result<SVector<f64, DOFS_PER_CELL>, ElasticaError>
where
    R: RightHandSide + ?Sized,
{
    let mut load = SVector::<f64, DOFS_PER_CELL>::zeros();

    for (xi, eta, weight) in gauss_points() {
        let det = compute_jacobian(corners, xi, eta).determinant();
        if !(det > 0.0) {
            return Err(ElasticaError::Mesher(format!(
                "Degenerate or inverted cell with corners {:?} (det J = {det})",
                corners
            )));
        }

        let force = rhs.vector_value(&map_to_physical(corners, xi, eta));
        for (i, n_i) in shape_values(xi, eta).iter().enumerate() {
            load[DOF * i] += n_i * force.x * det * weight;
            load[DOF * i + 1] += n_i * force.y * det * weight;
        }
    }

    Ok(load)
}

/// Evaluates the displacement gradient at a reference point
///
/// # Returns
/// A 2x2 matrix where row `c` is the gradient of displacement component `c`
pub fn compute_displacement_gradient(
    corners: &[Vertex; NODES_PER_CELL],
    displacements: &SVector<f64, DOFS_PER_CELL>,
    xi: f64,
    eta: f64,
) -> Result<Matrix2<f64>, ElasticaError> {
    let (grads, _) = compute_physical_gradients(corners, xi, eta)?;
    let mut gradient = Matrix2::zeros();
    for i in 0..NODES_PER_CELL {
        let dn = Vector2::new(grads[(0, i)], grads[(1, i)]);
        for component in 0..DOF {
            let u = displacements[DOF * i + component];
            gradient[(component, 0)] += u * dn.x;
            gradient[(component, 1)] += u * dn.y;
        }
    }
    Ok(gradient)
}

/// Evaluates `[sigma_xx, sigma_yy, tau_xy]` at a reference point
pub fn compute_stress(
    corners: &[Vertex; NODES_PER_CELL],
    displacements: &SVector<f64, DOFS_PER_CELL>,
    lambda: f64,
    mu: f64,
    xi: f64,
    eta: f64,
) -> Result<Vector3<f64>, ElasticaError> {
    let (grads, _) = compute_physical_gradients(corners, xi, eta)?;
    Ok(compute_stress_strain_matrix(lambda, mu)
        * compute_strain_displacement_matrix(&grads)
        * displacements)
}

/// In-plane von Mises equivalent stress
pub fn von_mises(stress: &Vector3<f64>) -> f64 {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    f64::sqrt(sx * sx - sx * sy + sy * sy + 3.0 * txy * txy)
}
