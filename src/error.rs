use thiserror::Error;

/// Errors raised by the groundwater flow pipeline, grouped by the stage that
/// produced them.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Model or sweep parameters violate their invariants
    #[error("Input error: {0}")]
    Input(String),
    /// Model file could not be read, parsed, or written
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Mesher error: {0}")]
    Mesher(String),
    /// Assembly, constraint, or linear solve failure
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Export error: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_stage() {
        let err = FlowError::Solver("matrix is singular".to_owned());
        assert_eq!(err.to_string(), "Solver error: matrix is singular");

        let err = FlowError::Persistence("bad version".to_owned());
        assert_eq!(err.to_string(), "Persistence error: bad version");
    }
}
