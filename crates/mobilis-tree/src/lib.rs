//! Multibody tree facade for mobilis.
//!
//! A [`MatterTree`] owns one mobilizer node per body, hands out slot ranges
//! in the shared `q`, `u` and `u²` arrays, and drives the per-node realize
//! hooks stage by stage, followed by the recursive kinematics passes.

pub mod config;
pub mod error;
pub mod joint;
pub mod kinematics;
pub mod tree;

pub use config::TreeConfig;
pub use error::{Result, TreeError};
pub use joint::{Joint, Mobilizer};
pub use tree::{MatterTree, MatterTreeBuilder};
