use std::path::{Path, PathBuf};

use clap::Parser;
use json::JsonValue;
use tracing::level_filters::LevelFilter;

use crate::{
    datatypes::ModelMetadata,
    error::ElasticaError,
    post_processor::{OutputFormat, OutputSettings},
};

/// Linear elasticity on the square [-1, 1]^2 with Q1 elements
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// JSON parameter file with a "metadata" section
    #[arg(long)]
    pub parameters: Option<PathBuf>,

    /// Global refinements applied before the first cycle
    #[arg(long)]
    pub initial_refinement: Option<usize>,

    /// Number of refinement cycles to solve
    #[arg(long)]
    pub cycles: Option<usize>,

    /// First Lamé parameter
    #[arg(long)]
    pub lambda: Option<f64>,

    /// Shear modulus
    #[arg(long)]
    pub mu: Option<f64>,

    /// Iteration cap of the conjugate gradient solver
    #[arg(long)]
    pub cg_max_iterations: Option<u64>,

    /// Residual norm the conjugate gradient solver must reach
    #[arg(long)]
    pub cg_tolerance: Option<f64>,

    /// Directory that receives per-cycle results
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Per-cycle output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Vtk)]
    pub format: OutputFormat,

    /// Skip writing results
    #[arg(long)]
    pub no_output: bool,

    /// Console diagnostics: 0 warnings only, 1 info, 2 debug, 3 trace
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub verbosity: u8,
}

/// Everything a run needs, merged from defaults, file and flags
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub model: ModelMetadata,
    pub output: OutputSettings,
}

/// Maps the verbosity flag onto a log level
pub fn level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Deepest global refinement level the final cycle may reach. Level `n` has
/// `4^n` cells, so level 9 is 262144 cells and 526338 degrees of freedom.
pub const MAX_REFINEMENT_LEVEL: usize = 9;

impl ModelMetadata {
    /// Refinement level of the mesh in the last cycle
    pub fn final_refinement_level(&self) -> usize {
        self.initial_refinement
            .saturating_add(self.cycles.saturating_sub(1))
    }

    /// Checks that the parameters describe a solvable problem
    pub fn validate(&self) -> Result<(), ElasticaError> {
        if !(self.mu > 0.0) || !self.mu.is_finite() {
            return Err(ElasticaError::Input(format!(
                "Shear modulus mu must be positive, got {}",
                self.mu
            )));
        }
        if !(self.lambda + self.mu > 0.0) || !self.lambda.is_finite() {
            return Err(ElasticaError::Input(format!(
                "lambda + mu must be positive, got lambda = {} and mu = {}",
                self.lambda, self.mu
            )));
        }
        if self.cycles == 0 {
            return Err(ElasticaError::Input(
                "At least one cycle is required".to_owned(),
            ));
        }
        if self.final_refinement_level() > MAX_REFINEMENT_LEVEL {
            return Err(ElasticaError::Input(format!(
                "initial_refinement + cycles - 1 must not exceed {MAX_REFINEMENT_LEVEL}, got {} + {} - 1",
                self.initial_refinement, self.cycles
            )));
        }
        if self.cg_max_iterations == 0 {
            return Err(ElasticaError::Input(
                "cg_max_iterations must be at least 1".to_owned(),
            ));
        }
        if !(self.cg_tolerance > 0.0) || !self.cg_tolerance.is_finite() {
            return Err(ElasticaError::Input(format!(
                "cg_tolerance must be positive, got {}",
                self.cg_tolerance
            )));
        }
        Ok(())
    }
}

/// Parses the parameter file into a JsonValue object
///
/// # Arguments
/// * `input_file` - The path to the parameter file
///
/// # Returns
/// A JsonValue object
fn load_input_file(input_file: &Path) -> Result<JsonValue, ElasticaError> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(f) => f,
        Err(err) => {
            return Err(ElasticaError::Input(format!(
                "Unable to open parameter file {}: {err}",
                input_file.display()
            )))
        }
    };

    let input_file_json = match json::parse(&file_string) {
        Ok(f) => f,
        Err(err) => {
            return Err(ElasticaError::Input(format!(
                "Error in parameter file json: {err}"
            )))
        }
    };

    if !input_file_json.is_object() {
        return Err(ElasticaError::Input(
            "Parameter file must contain a json object".to_string(),
        ));
    }

    Ok(input_file_json)
}

fn read_f64(metadata: &JsonValue, key: &str) -> Result<Option<f64>, ElasticaError> {
    if metadata[key].is_null() {
        return Ok(None);
    }
    match metadata[key].as_f64() {
        Some(v) => Ok(Some(v)),
        None => Err(ElasticaError::Input(format!(
            "Bad value for {key} in metadata section"
        ))),
    }
}

fn read_u64(metadata: &JsonValue, key: &str) -> Result<Option<u64>, ElasticaError> {
    if metadata[key].is_null() {
        return Ok(None);
    }
    match metadata[key].as_u64() {
        Some(v) => Ok(Some(v)),
        None => Err(ElasticaError::Input(format!(
            "Bad value for {key} in metadata section, expected a non-negative integer"
        ))),
    }
}

fn to_usize(value: Option<u64>, key: &str) -> Result<Option<usize>, ElasticaError> {
    match value {
        Some(v) => match usize::try_from(v) {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(ElasticaError::Input(format!("Value for {key} is too large"))),
        },
        None => Ok(None),
    }
}

/// Applies the "metadata" section of the parameter file over `model`
///
/// # Arguments
/// * `input_json` - The parameter file as a JsonValue object
/// * `model` - The parameters to update
fn apply_input_metadata(
    input_json: &JsonValue,
    model: &mut ModelMetadata,
) -> Result<(), ElasticaError> {
    let metadata = &input_json["metadata"];
    if metadata.is_null() {
        return Ok(());
    }
    if !metadata.is_object() {
        return Err(ElasticaError::Input(
            "metadata section of the parameter file must be an object".to_string(),
        ));
    }

    for (key, _) in metadata.entries() {
        if ![
            "lambda",
            "mu",
            "initial_refinement",
            "cycles",
            "cg_max_iterations",
            "cg_tolerance",
        ]
        .contains(&key)
        {
            tracing::warn!("ignoring unknown parameter {key} in metadata section");
        }
    }

    if let Some(v) = read_f64(metadata, "lambda")? {
        model.lambda = v;
    }
    if let Some(v) = read_f64(metadata, "mu")? {
        model.mu = v;
    }
    if let Some(v) = to_usize(read_u64(metadata, "initial_refinement")?, "initial_refinement")? {
        model.initial_refinement = v;
    }
    if let Some(v) = to_usize(read_u64(metadata, "cycles")?, "cycles")? {
        model.cycles = v;
    }
    if let Some(v) = read_u64(metadata, "cg_max_iterations")? {
        model.cg_max_iterations = v;
    }
    if let Some(v) = read_f64(metadata, "cg_tolerance")? {
        model.cg_tolerance = v;
    }

    Ok(())
}

/// Builds the run configuration
///
/// Defaults are overridden by the parameter file, which is overridden by
/// command line flags.
///
/// # Arguments
/// * `args` - The parsed command line
///
/// # Returns
/// A validated RunConfig
pub fn resolve(args: &Args) -> Result<RunConfig, ElasticaError> {
    let mut model = ModelMetadata::default();

    if let Some(path) = &args.parameters {
        let input_json = load_input_file(path)?;
        apply_input_metadata(&input_json, &mut model)?;
    }

    if let Some(v) = args.lambda {
        model.lambda = v;
    }
    if let Some(v) = args.mu {
        model.mu = v;
    }
    if let Some(v) = args.initial_refinement {
        model.initial_refinement = v;
    }
    if let Some(v) = args.cycles {
        model.cycles = v;
    }
    if let Some(v) = args.cg_max_iterations {
        model.cg_max_iterations = v;
    }
    if let Some(v) = args.cg_tolerance {
        model.cg_tolerance = v;
    }

    model.validate()?;

    Ok(RunConfig {
        model,
        output: OutputSettings {
            directory: args.output_dir.clone(),
            format: args.format,
            enabled: !args.no_output,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("elastica").chain(args.iter().copied())).unwrap()
    }

    fn parameter_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "elastica-config-{name}-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&parse(&[])).unwrap();
        assert_eq!(config.model, ModelMetadata::default());
        assert_eq!(config.output, OutputSettings::default());
        assert_eq!(level_filter(parse(&[]).verbosity), LevelFilter::WARN);
    }

    #[test]
    fn test_flags_override_file() {
        let path = parameter_file(
            "override",
            r#"{ "metadata": { "lambda": 2.5, "mu": 0.5, "cycles": 2 } }"#,
        );
        let args = parse(&[
            "--parameters",
            path.to_str().unwrap(),
            "--mu",
            "3",
            "--format",
            "csv",
            "--no-output",
            "-v",
            "2",
        ]);
        let config = resolve(&args).unwrap();

        assert_eq!(config.model.lambda, 2.5);
        assert_eq!(config.model.mu, 3.0);
        assert_eq!(config.model.cycles, 2);
        assert_eq!(config.model.initial_refinement, 4);
        assert_eq!(config.output.format, OutputFormat::Csv);
        assert!(!config.output.enabled);
        assert_eq!(level_filter(args.verbosity), LevelFilter::DEBUG);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_bad_file_values() {
        let path = parameter_file("badvalue", r#"{ "metadata": { "cycles": "many" } }"#);
        let err = resolve(&parse(&["--parameters", path.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ElasticaError::Input(_)));
        std::fs::remove_file(path).unwrap();

        let path = parameter_file("badjson", "{ metadata: ");
        let err = resolve(&parse(&["--parameters", path.to_str().unwrap()])).unwrap_err();
        assert!(err.to_string().contains("Error in parameter file json"));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = resolve(&parse(&["--parameters", "/nonexistent/elastica.json"])).unwrap_err();
        assert!(err.to_string().starts_with("Input error: Unable to open parameter file"));
    }

    #[test]
    fn test_validation() {
        assert!(resolve(&parse(&["--mu", "0"])).is_err());
        assert!(resolve(&parse(&["--lambda=-2", "--mu", "1"])).is_err());
        assert!(resolve(&parse(&["--cycles", "0"])).is_err());
        assert!(resolve(&parse(&["--cg-tolerance", "0"])).is_err());
        assert!(resolve(&parse(&["--lambda=-0.5", "--mu", "1"])).is_ok());
    }

    #[test]
    fn test_refinement_level_is_capped() {
        assert!(resolve(&parse(&["--initial-refinement", "6", "--cycles", "4"])).is_ok());
        let err = resolve(&parse(&["--initial-refinement", "7", "--cycles", "4"])).unwrap_err();
        assert!(matches!(err, ElasticaError::Input(_)));
        assert!(err.to_string().contains("must not exceed 9"));

        let err = resolve(&parse(&["--initial-refinement", "30"])).unwrap_err();
        assert!(matches!(err, ElasticaError::Input(_)));

        let model = ModelMetadata {
            initial_refinement: usize::MAX,
            cycles: usize::MAX,
            ..ModelMetadata::default()
        };
        assert_eq!(model.final_refinement_level(), usize::MAX);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_verbosity_range() {
        assert!(Args::try_parse_from(["elastica", "-v", "4"]).is_err());
        assert_eq!(level_filter(3), LevelFilter::TRACE);
    }
}
