use nalgebra_sparse::CsrMatrix;
use tracing::{info, warn};

use crate::{
    datatypes::{CycleSummary, Element, ModelMetadata, Node},
    element::DOF,
    error::ElasticaError,
    estimator,
    mesher::Triangulation,
    post_processor::{self, OutputSettings},
    rhs::RightHandSide,
    solver,
};

/// A linear elasticity problem on a borrowed mesh and body force.
///
/// Every cycle refines the mesh globally, assembles and solves the clamped
/// system, then post-processes the displacement field. The per-cell error
/// indicators are diagnostic only: they are written out and summed into the
/// cycle's estimate but never select cells for refinement.
pub struct ElasticProblem<'a, R: RightHandSide + ?Sized> {
    triangulation: &'a mut Triangulation,
    rhs: &'a R,
    model_metadata: ModelMetadata,
    output: OutputSettings,

    stiffness: Option<CsrMatrix<f64>>,
    nodes: Vec<Node>,
    elements: Vec<Element>,
}

impl<'a, R: RightHandSide + ?Sized> ElasticProblem<'a, R> {
    pub fn new(
        triangulation: &'a mut Triangulation,
        rhs: &'a R,
        model_metadata: ModelMetadata,
        output: OutputSettings,
    ) -> ElasticProblem<'a, R> {
        ElasticProblem {
            triangulation,
            rhs,
            model_metadata,
            output,
            stiffness: None,
            nodes: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn triangulation(&self) -> &Triangulation {
        &*self.triangulation
    }

    /// Solved nodes of the latest cycle
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Post-processed cells of the latest cycle
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    fn n_dofs(&self) -> usize {
        DOF * self.triangulation.n_vertices()
    }

    fn refine_grid(&mut self, cycle: usize) {
        let times = if cycle == 0 {
            self.model_metadata.initial_refinement
        } else {
            1
        };
        self.triangulation.refine_global(times);
    }

    fn setup_system(&mut self) {
        self.stiffness = None;
        self.nodes.clear();
        self.elements = self
            .triangulation
            .cells()
            .iter()
            .map(|cell| Element {
                nodes: cell.vertices,
                stress: None,
                error_indicator: None,
            })
            .collect();
    }

    fn assemble_system(&mut self) -> Result<(), ElasticaError> {
        let stiffness =
            solver::build_total_stiffness_matrix(&*self.triangulation, &self.model_metadata)?;
        let load = solver::build_load_vector(&*self.triangulation, self.rhs)?;

        self.nodes = solver::build_nodes(&*self.triangulation, &load);
        self.stiffness = Some(stiffness);

        Ok(())
    }

    fn solve(&mut self) -> Result<solver::SolveStats, ElasticaError> {
        let stiffness = match &self.stiffness {
            Some(k) => k,
            None => {
                return Err(ElasticaError::Solver(
                    "System must be assembled before solving".to_owned(),
                ))
            }
        };
        solver::solve(&mut self.nodes, stiffness, &self.model_metadata)
    }

    fn postprocess(&mut self) -> Result<f64, ElasticaError> {
        solver::compute_stress(
            &mut self.elements,
            &self.nodes,
            &*self.triangulation,
            &self.model_metadata,
        )?;

        let indicators = estimator::estimate(&*self.triangulation, &self.nodes)?;
        let estimated_error = estimator::global_estimate(&indicators);
        for (element, eta) in self.elements.iter_mut().zip(indicators) {
            element.error_indicator = Some(eta);
        }

        Ok(estimated_error)
    }

    /// Runs every refinement cycle
    ///
    /// # Returns
    /// One summary per cycle, in order
    pub fn run(&mut self) -> Result<Vec<CycleSummary>, ElasticaError> {
        if self.triangulation.is_empty() {
            return Err(ElasticaError::Mesher(
                "Cannot run on an empty triangulation".to_owned(),
            ));
        }
        self.model_metadata.validate()?;

        let mut summaries = Vec::with_capacity(self.model_metadata.cycles);

        for cycle in 0..self.model_metadata.cycles {
            println!("Cycle {cycle}:");

            self.refine_grid(cycle);
            println!(
                "   Number of active cells:       {}",
                self.triangulation.n_active_cells()
            );

            self.setup_system();
            println!("   Number of degrees of freedom: {}", self.n_dofs());

            self.assemble_system()?;
            let stats = self.solve()?;
            let estimated_error = self.postprocess()?;

            info!("cycle {cycle}: estimated error {:e}", estimated_error);

            post_processor::write_cycle(&self.output, cycle, &self.elements, &self.nodes)?;

            summaries.push(CycleSummary {
                cycle,
                n_active_cells: self.triangulation.n_active_cells(),
                n_dofs: self.n_dofs(),
                cg_iterations: stats.iterations,
                residual: stats.residual,
                estimated_error,
            });
        }

        if summaries.len() > 1 {
            let first = summaries[0].estimated_error;
            let last = summaries[summaries.len() - 1].estimated_error;
            if last > first {
                warn!("estimated error grew from {:e} to {:e} under refinement", first, last);
            }
        }

        post_processor::write_summary(&self.output, &summaries)?;

        Ok(summaries)
    }
}
