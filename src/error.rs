use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElasticaError {
    #[error("Input error: {0}")]
    Input(String),
    #[error("Mesher error: {0}")]
    Mesher(String),
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Post Processor error: {0}")]
    PostProcessor(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
