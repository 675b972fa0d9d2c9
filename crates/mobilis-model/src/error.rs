//! Error types for mobilis-model.

use thiserror::Error;

use crate::state::Stage;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MobilizerError {
    #[error("mobilizer implementation reports {found} mobilities, node was built for {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid angle count {0}: expected 0..=4")]
    InvalidAngleCount(usize),

    #[error("{nq} position coordinates cannot hold {num_angles} angle coordinates")]
    InvalidCoordinateCount { nq: usize, num_angles: usize },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("{operation} is not implemented for {mobilizer} mobilizers")]
    NotImplemented {
        mobilizer: &'static str,
        operation: &'static str,
    },

    #[error("stage {required:?} required but state is only realized through {current:?}")]
    StageViolation { required: Stage, current: Stage },
}

pub type Result<T> = std::result::Result<T, MobilizerError>;
