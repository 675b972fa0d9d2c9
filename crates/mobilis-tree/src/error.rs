//! Error types for mobilis-tree.

use mobilis_model::{BodyIndex, MobilizerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("parent body {parent} does not exist (tree has {num_bodies} bodies)")]
    InvalidParent { parent: BodyIndex, num_bodies: usize },

    #[error("topology is frozen: end_construction was already called")]
    AlreadyConstructed,

    #[error("end_construction must be called first")]
    NotConstructed,

    #[error("body {0} has no mobilizer in this tree")]
    BodyOutOfRange(BodyIndex),

    #[error("coordinate {index} out of range for body {body} ({count} in use)")]
    CoordinateOutOfRange {
        body: BodyIndex,
        index: usize,
        count: usize,
    },

    #[error("custom mobilizers support 1 to 6 mobilities, got {0}")]
    UnsupportedDof(usize),

    #[error(transparent)]
    Mobilizer(#[from] MobilizerError),

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TreeError>;
