use std::{
    io::Write,
    panic::{self, AssertUnwindSafe},
};

use tracing::debug;

use crate::{
    config::RunConfig,
    datatypes::CycleSummary,
    error::ElasticaError,
    mesher::{self, Triangulation},
    problem::ElasticProblem,
    rhs::TwoCircleForcing,
};

pub const SEPARATOR: &str = "----------------------------------------------------";

/// Lower and upper bound of the square domain along both axes
pub const DOMAIN_BOUNDS: (f64, f64) = (-1.0, 1.0);

/// Why a job did not complete
#[derive(Debug)]
pub enum Failure {
    /// A typed error carrying its message
    Error(ElasticaError),
    /// Anything else, such as a panic
    Unknown,
}

impl Failure {
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Writes the abort banner for a failure
///
/// # Arguments
/// * `out` - The stream to report to, normally stderr
/// * `failure` - What went wrong
pub fn report(out: &mut impl Write, failure: &Failure) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out)?;
    writeln!(out, "{SEPARATOR}")?;
    match failure {
        Failure::Error(err) => {
            writeln!(out, "Exception on processing: ")?;
            writeln!(out, "{err}")?;
        }
        Failure::Unknown => {
            writeln!(out, "Unknown exception!")?;
        }
    }
    writeln!(out, "Aborting!")?;
    writeln!(out, "{SEPARATOR}")?;
    out.flush()
}

/// Runs a job, converting typed errors and panics into a `Failure`
pub fn catch<T, F>(job: F) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, ElasticaError>,
{
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Failure::Error(err)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned());
            debug!("job panicked: {}", message.as_deref().unwrap_or("<non-string payload>"));
            Err(Failure::Unknown)
        }
    }
}

/// Runs a job and reports its failure, if any, to `out`
///
/// # Returns
/// Exit code 0 on success, 1 on any failure
pub fn execute<T, F>(out: &mut impl Write, job: F) -> u8
where
    F: FnOnce() -> Result<T, ElasticaError>,
{
    match catch(job) {
        Ok(_) => 0,
        Err(failure) => {
            // nothing left to report to if the error stream itself fails
            let _ = report(out, &failure);
            failure.exit_code()
        }
    }
}

/// Replaces the panic hook so a panic only shows up as the abort banner.
/// The panic message goes to the debug log.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        debug!("panic: {info}");
    }));
}

/// Builds the square domain, the forcing term and the problem, then runs
/// every cycle
///
/// # Arguments
/// * `config` - The resolved run configuration
pub fn simulate(config: &RunConfig) -> Result<Vec<CycleSummary>, ElasticaError> {
    let mut triangulation = Triangulation::new();
    mesher::hyper_cube(&mut triangulation, DOMAIN_BOUNDS.0, DOMAIN_BOUNDS.1)?;

    let rhs = TwoCircleForcing::default();

    let mut elastic_problem_2d = ElasticProblem::new(
        &mut triangulation,
        &rhs,
        config.model.clone(),
        config.output.clone(),
    );
    elastic_problem_2d.run()
}
