use std::collections::HashMap;

use tracing::debug;

use crate::{datatypes::Vertex, error::ElasticaError};

/// A counter-clockwise quadrilateral cell.
///
/// Local vertex `i` sits on reference corner `i` of the square
/// `(-1,-1), (1,-1), (1,1), (-1,1)`. Local edge `i` joins local vertices
/// `i` and `(i + 1) % 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub vertices: [usize; 4],
}

impl Cell {
    pub fn edge(&self, local_edge: usize) -> (usize, usize) {
        (
            self.vertices[local_edge],
            self.vertices[(local_edge + 1) % 4],
        )
    }
}

/// Undirected edge between two vertices. Always build with `EdgeKey::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(usize, usize);

impl EdgeKey {
    pub fn new(a: usize, b: usize) -> EdgeKey {
        if a < b {
            EdgeKey(a, b)
        } else {
            EdgeKey(b, a)
        }
    }

    pub fn vertices(&self) -> (usize, usize) {
        (self.0, self.1)
    }
}

/// A 2D quadrilateral mesh.
#[derive(Debug, Default, Clone)]
pub struct Triangulation {
    vertices: Vec<Vertex>,
    cells: Vec<Cell>,
}

impl Triangulation {
    pub fn new() -> Triangulation {
        Triangulation::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn n_active_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// The four corner coordinates of a cell, in local order
    pub fn cell_vertices(&self, cell: usize) -> [Vertex; 4] {
        self.cells[cell].vertices.map(|v| self.vertices[v])
    }

    /// Length of the longer diagonal of a cell
    pub fn cell_diameter(&self, cell: usize) -> f64 {
        let [v0, v1, v2, v3] = self.cell_vertices(cell);
        f64::max(v0.distance(&v2), v1.distance(&v3))
    }

    /// Builds the edge incidence of the mesh
    ///
    /// # Returns
    /// A map from every edge to the `(cell, local_edge)` pairs that contain
    /// it. Interior edges have two entries, boundary edges one.
    pub fn edges(&self) -> HashMap<EdgeKey, Vec<(usize, usize)>> {
        let mut edges: HashMap<EdgeKey, Vec<(usize, usize)>> =
            HashMap::with_capacity(2 * self.cells.len() + 2);

        for (cell_idx, cell) in self.cells.iter().enumerate() {
            for local_edge in 0..4 {
                let (a, b) = cell.edge(local_edge);
                edges
                    .entry(EdgeKey::new(a, b))
                    .or_default()
                    .push((cell_idx, local_edge));
            }
        }

        edges
    }

    /// Flags every vertex that lies on the domain boundary
    ///
    /// # Returns
    /// A vector with one flag per vertex
    pub fn boundary_vertices(&self) -> Vec<bool> {
        let mut on_boundary = vec![false; self.vertices.len()];

        for (edge, owners) in self.edges() {
            if owners.len() == 1 {
                let (a, b) = edge.vertices();
                on_boundary[a] = true;
                on_boundary[b] = true;
            }
        }

        on_boundary
    }

    /// Splits every cell into four children, `times` times over
    ///
    /// # Arguments
    /// * `times` - The number of refinement passes
    pub fn refine_global(&mut self, times: usize) {
        for _ in 0..times {
            self.refine_once();
        }
    }

    fn refine_once(&mut self) {
        let mut midpoints: HashMap<EdgeKey, usize> = HashMap::with_capacity(2 * self.cells.len());
        let mut children: Vec<Cell> = Vec::with_capacity(4 * self.cells.len());

        let cells = std::mem::take(&mut self.cells);
        for cell in &cells {
            let mut edge_mid = [0usize; 4];
            for (local_edge, mid) in edge_mid.iter_mut().enumerate() {
                let (a, b) = cell.edge(local_edge);
                *mid = *midpoints.entry(EdgeKey::new(a, b)).or_insert_with(|| {
                    let midpoint = self.vertices[a].midpoint(&self.vertices[b]);
                    self.vertices.push(midpoint);
                    self.vertices.len() - 1
                });
            }

            let [v0, v1, v2, v3] = cell.vertices;
            let [m01, m12, m23, m30] = edge_mid;

            let corners = cell.vertices.map(|v| self.vertices[v]);
            let center = Vertex {
                x: 0.25 * corners.iter().map(|c| c.x).sum::<f64>(),
                y: 0.25 * corners.iter().map(|c| c.y).sum::<f64>(),
            };
            self.vertices.push(center);
            let c = self.vertices.len() - 1;

            children.push(Cell { vertices: [v0, m01, c, m30] });
            children.push(Cell { vertices: [m01, v1, m12, c] });
            children.push(Cell { vertices: [c, m12, v2, m23] });
            children.push(Cell { vertices: [m30, c, m23, v3] });
        }

        self.cells = children;

        debug!(
            "refined mesh to {} cells and {} vertices",
            self.cells.len(),
            self.vertices.len()
        );
    }
}

/// Fills an empty triangulation with the square `[left, right]^2` as a
/// single cell
///
/// # Arguments
/// * `tri` - The triangulation to populate. Must be empty.
/// * `left` - The lower bound along every axis
/// * `right` - The upper bound along every axis
pub fn hyper_cube(tri: &mut Triangulation, left: f64, right: f64) -> Result<(), ElasticaError> {
    if !tri.is_empty() {
        return Err(ElasticaError::Mesher(format!(
            "Cannot build a hyper cube into a triangulation that already has {} cells",
            tri.n_active_cells()
        )));
    }
    if !left.is_finite() || !right.is_finite() {
        return Err(ElasticaError::Mesher(format!(
            "Hyper cube bounds must be finite, got [{left}, {right}]"
        )));
    }
    if left >= right {
        return Err(ElasticaError::Mesher(format!(
            "Hyper cube requires left < right, got [{left}, {right}]"
        )));
    }

    tri.vertices = vec![
        Vertex::new(left, left),
        Vertex::new(right, left),
        Vertex::new(right, right),
        Vertex::new(left, right),
    ];
    tri.cells = vec![Cell {
        vertices: [0, 1, 2, 3],
    }];

    debug!("built hyper cube on [{left}, {right}]^2");

    Ok(())
}
