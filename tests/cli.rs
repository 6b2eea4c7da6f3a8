use std::{
    path::PathBuf,
    process::{Command, Output},
};

const SEPARATOR: &str = "----------------------------------------------------";

fn elastica(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_elastica"))
        .args(args)
        .output()
        .expect("failed to launch elastica")
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("elastica-cli-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn test_successful_run_exits_cleanly() {
    let dir = scratch_dir("success");
    let output = elastica(&[
        "--initial-refinement",
        "2",
        "--cycles",
        "2",
        "--output-dir",
        dir.to_str().unwrap(),
    ]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(0), "stderr: {stderr}");
    assert!(!stderr.contains(SEPARATOR));
    assert!(!stderr.contains("Aborting!"));
    assert!(stdout.contains("Cycle 0:\n   Number of active cells:       16\n"));
    assert!(stdout.contains("Cycle 1:\n   Number of active cells:       64\n"));
    assert!(stdout.contains("   Number of degrees of freedom: 162\n"));

    assert!(dir.join("solution-0.vtk").is_file());
    assert!(dir.join("solution-1.vtk").is_file());
    let summary = std::fs::read_to_string(dir.join("summary.json")).unwrap();
    assert!(summary.contains("\"active_cells\": 64"));

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_csv_output_without_banner() {
    let dir = scratch_dir("csv");
    let output = elastica(&[
        "--initial-refinement",
        "1",
        "--cycles",
        "1",
        "--format",
        "csv",
        "--output-dir",
        dir.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(0));
    let nodes = std::fs::read_to_string(dir.join("nodes-0.csv")).unwrap();
    assert_eq!(nodes.lines().count(), 1 + 9);
    let elements = std::fs::read_to_string(dir.join("elements-0.csv")).unwrap();
    assert_eq!(elements.lines().count(), 1 + 4);

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_typed_failure_prints_banner_and_exits_one() {
    let output = elastica(&["--parameters", "/nonexistent/elastica-parameters.json"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let expected_head = format!(
        "\n\n{SEPARATOR}\nException on processing: \nInput error: Unable to open parameter file /nonexistent/elastica-parameters.json"
    );
    assert!(stderr.starts_with(&expected_head), "stderr: {stderr}");
    assert!(stderr.ends_with(&format!("\nAborting!\n{SEPARATOR}\n")));
    assert_eq!(stderr.matches(SEPARATOR).count(), 2);
    assert!(output.stdout.is_empty());
}

#[test]
fn test_solver_failure_is_reported() {
    let output = elastica(&[
        "--initial-refinement",
        "3",
        "--cycles",
        "1",
        "--cg-max-iterations",
        "1",
        "--no-output",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!(
        "{SEPARATOR}\nException on processing: \nSolver error: Conjugate Gradient did not converge"
    )));
    assert!(!stderr.contains("Unknown exception!"));
}

#[test]
fn test_invalid_material_from_parameter_file() {
    let dir = scratch_dir("params");
    std::fs::create_dir_all(&dir).unwrap();
    let params = dir.join("params.json");
    std::fs::write(&params, r#"{ "metadata": { "mu": 0.0 } }"#).unwrap();

    let output = elastica(&["--parameters", params.to_str().unwrap(), "--no-output"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Input error: Shear modulus mu must be positive"));

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_excessive_refinement_is_an_input_error() {
    let output = elastica(&["--initial-refinement", "30", "--no-output"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with(&format!(
        "\n\n{SEPARATOR}\nException on processing: \nInput error: initial_refinement + cycles - 1 must not exceed"
    )), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}
