use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use tracing::info;

use crate::{
    datatypes::{CycleSummary, Element, Node},
    error::ElasticaError,
};

/// File format written for every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Vtk,
    Csv,
}

/// Where and how to write results
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub format: OutputFormat,
    pub enabled: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            directory: PathBuf::from("."),
            format: OutputFormat::Vtk,
            enabled: true,
        }
    }
}

fn create_file(path: &Path) -> Result<BufWriter<File>, ElasticaError> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(ElasticaError::PostProcessor(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

fn known(value: Option<f64>, what: &str) -> Result<f64, ElasticaError> {
    value.ok_or_else(|| ElasticaError::PostProcessor(format!("Missing {what} in solved model")))
}

/// Writes the results of one cycle to two CSV files
///
/// # Arguments
/// * `elements` - A reference to the vector of post-solve elements
/// * `nodes` - A reference to the vector of post-solve nodes
/// * `nodes_output` - The path of the output nodes csv
/// * `elements_output` - The path of the output elements csv
pub fn csv_output(
    elements: &[Element],
    nodes: &[Node],
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<(), ElasticaError> {
    let mut nodes_file = create_file(nodes_output)?;
    let mut elements_file = create_file(elements_output)?;

    // Write nodes
    writeln!(nodes_file, "x,y,ux,uy,fx,fy")?;
    for node in nodes {
        writeln!(
            nodes_file,
            "{x},{y},{ux},{uy},{fx},{fy}",
            x = node.vertex.x,
            y = node.vertex.y,
            ux = known(node.ux, "ux")?,
            uy = known(node.uy, "uy")?,
            fx = known(node.fx, "fx")?,
            fy = known(node.fy, "fy")?,
        )?;
    }
    nodes_file.flush()?;

    // Write cells
    writeln!(elements_file, "n0,n1,n2,n3,stress,error_indicator")?;
    for element in elements {
        writeln!(
            elements_file,
            "{n0},{n1},{n2},{n3},{stress},{eta}",
            n0 = element.nodes[0],
            n1 = element.nodes[1],
            n2 = element.nodes[2],
            n3 = element.nodes[3],
            stress = known(element.stress, "stress")?,
            eta = known(element.error_indicator, "error indicator")?,
        )?;
    }
    elements_file.flush()?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

/// Writes the results of one cycle as a legacy ASCII VTK unstructured grid
///
/// # Arguments
/// * `elements` - A reference to the vector of post-solve elements
/// * `nodes` - A reference to the vector of post-solve nodes
/// * `output` - The path of the output file
pub fn vtk_output(elements: &[Element], nodes: &[Node], output: &Path) -> Result<(), ElasticaError> {
    let mut file = create_file(output)?;

    writeln!(file, "# vtk DataFile Version 3.0")?;
    writeln!(file, "elastica displacement solution")?;
    writeln!(file, "ASCII")?;
    writeln!(file, "DATASET UNSTRUCTURED_GRID")?;

    writeln!(file, "POINTS {} double", nodes.len())?;
    for node in nodes {
        writeln!(file, "{} {} 0", node.vertex.x, node.vertex.y)?;
    }

    writeln!(file, "CELLS {} {}", elements.len(), 5 * elements.len())?;
    for element in elements {
        let [n0, n1, n2, n3] = element.nodes;
        writeln!(file, "4 {n0} {n1} {n2} {n3}")?;
    }

    // 9 is VTK_QUAD
    writeln!(file, "CELL_TYPES {}", elements.len())?;
    for _ in elements {
        writeln!(file, "9")?;
    }

    writeln!(file, "POINT_DATA {}", nodes.len())?;
    writeln!(file, "SCALARS x_displacement double 1")?;
    writeln!(file, "LOOKUP_TABLE default")?;
    for node in nodes {
        writeln!(file, "{}", known(node.ux, "ux")?)?;
    }
    writeln!(file, "SCALARS y_displacement double 1")?;
    writeln!(file, "LOOKUP_TABLE default")?;
    for node in nodes {
        writeln!(file, "{}", known(node.uy, "uy")?)?;
    }

    writeln!(file, "CELL_DATA {}", elements.len())?;
    writeln!(file, "SCALARS von_mises_stress double 1")?;
    writeln!(file, "LOOKUP_TABLE default")?;
    for element in elements {
        writeln!(file, "{}", known(element.stress, "stress")?)?;
    }
    writeln!(file, "SCALARS error_indicator double 1")?;
    writeln!(file, "LOOKUP_TABLE default")?;
    for element in elements {
        writeln!(file, "{}", known(element.error_indicator, "error indicator")?)?;
    }
    file.flush()?;

    info!("wrote output to {}", output.display());

    Ok(())
}

/// Writes the results of a cycle in the configured format
///
/// # Returns
/// The files that were written
pub fn write_cycle(
    settings: &OutputSettings,
    cycle: usize,
    elements: &[Element],
    nodes: &[Node],
) -> Result<Vec<PathBuf>, ElasticaError> {
    if !settings.enabled {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(&settings.directory)?;

    match settings.format {
        OutputFormat::Vtk => {
            let output = settings.directory.join(format!("solution-{cycle}.vtk"));
            vtk_output(elements, nodes, &output)?;
            Ok(vec![output])
        }
        OutputFormat::Csv => {
            let nodes_output = settings.directory.join(format!("nodes-{cycle}.csv"));
            let elements_output = settings.directory.join(format!("elements-{cycle}.csv"));
            csv_output(elements, nodes, &nodes_output, &elements_output)?;
            Ok(vec![nodes_output, elements_output])
        }
    }
}

/// Writes `summary.json` with one entry per cycle
pub fn write_summary(
    settings: &OutputSettings,
    summaries: &[CycleSummary],
) -> Result<Option<PathBuf>, ElasticaError> {
    if !settings.enabled {
        return Ok(None);
    }
    std::fs::create_dir_all(&settings.directory)?;

    let mut cycles = json::JsonValue::new_array();
    for summary in summaries {
        let entry = json::object! {
            cycle: summary.cycle,
            active_cells: summary.n_active_cells,
            degrees_of_freedom: summary.n_dofs,
            cg_iterations: summary.cg_iterations,
            residual: summary.residual,
            estimated_error: summary.estimated_error,
        };
        if let Err(err) = cycles.push(entry) {
            return Err(ElasticaError::PostProcessor(format!(
                "Failed to build summary: {err}"
            )));
        }
    }

    let output = settings.directory.join("summary.json");
    let mut file = create_file(&output)?;
    writeln!(file, "{}", json::stringify_pretty(json::object! { cycles: cycles }, 2))?;
    file.flush()?;

    info!("wrote run summary to {}", output.display());

    Ok(Some(output))
}
