#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }

    pub fn midpoint(&self, other: &Vertex) -> Vertex {
        Vertex {
            x: 0.5 * (self.x + other.x),
            y: 0.5 * (self.y + other.y),
        }
    }

    pub fn distance_squared(&self, other: &Vertex) -> f64 {
        f64::powi(self.x - other.x, 2) + f64::powi(self.y - other.y, 2)
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A mesh vertex with its displacement and force state.
///
/// Before the solve, exactly one of `ux`/`fx` and one of `uy`/`fy` is known.
/// After the solve all four are populated.
#[derive(Debug, Clone)]
pub struct Node {
    pub vertex: Vertex,
    pub ux: Option<f64>,
    pub uy: Option<f64>,
    pub fx: Option<f64>,
    pub fy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub nodes: [usize; 4],
    pub stress: Option<f64>,
    pub error_indicator: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub lambda: f64,
    pub mu: f64,
    pub initial_refinement: usize,
    pub cycles: usize,
    pub cg_max_iterations: u64,
    pub cg_tolerance: f64,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        ModelMetadata {
            lambda: 1.0,
            mu: 1.0,
            initial_refinement: 4,
            cycles: 4,
            cg_max_iterations: 10_000,
            cg_tolerance: 1e-12,
        }
    }
}

/// What a single refinement cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub cycle: usize,
    pub n_active_cells: usize,
    pub n_dofs: usize,
    pub cg_iterations: u64,
    pub residual: f64,
    pub estimated_error: f64,
}
