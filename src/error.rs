use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReweightError {
    #[error("invalid bracket set: {0}")]
    InvalidBracketSet(String),

    #[error("interpolation domain error: {0}")]
    InterpolationDomain(String),

    #[error("bracket {index} has zero width (bound {bound})")]
    DivisionByZeroBracket { index: usize, bound: f64 },

    #[error("shape mismatch: expected {expected} columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ReweightError>;
