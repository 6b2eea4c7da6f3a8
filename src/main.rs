use std::process::ExitCode;

use clap::Parser;
use elastica::{config, driver};

fn main() -> ExitCode {
    let args = config::Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(config::level_filter(args.verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    driver::install_panic_hook();

    let code = driver::execute(&mut std::io::stderr(), || {
        let config = config::resolve(&args)?;
        driver::simulate(&config)
    });

    ExitCode::from(code)
}
