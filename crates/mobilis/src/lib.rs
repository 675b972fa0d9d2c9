//! mobilis: joint kinematics for articulated rigid-body trees.
//!
//! This is the umbrella crate. It re-exports the spatial algebra from
//! [`mobilis_math`], the per-joint machinery from [`mobilis_model`] and the
//! [`MatterTree`] facade from [`mobilis_tree`].
//!
//! ```ignore
//! use mobilis::{BodyIndex, MatterTree, Mobilizer, Stage};
//! use mobilis::mobilis_math::{SpatialInertia, SpatialTransform};
//!
//! let mut tree = MatterTree::new();
//! let arm = tree.add_rigid_body(
//!     SpatialInertia::sphere(1.0, 0.1),
//!     SpatialTransform::identity(),
//!     BodyIndex::GROUND,
//!     SpatialTransform::identity(),
//!     Mobilizer::Pin,
//! )?;
//! tree.end_construction()?;
//! let mut state = tree.default_state()?;
//! tree.set_joint_q(&mut state, arm, 0, 0.3)?;
//! tree.realize(&mut state, Stage::Position)?;
//! let x_gb = tree.body_configuration(&state, arm)?;
//! ```

pub use mobilis_math::{self, Quat, SpatialInertia, SpatialTransform, SpatialVec};
pub use mobilis_model::{
    self, BodyIndex, BuiltinKind, CustomContext, CustomImplementation, MobilizerError,
    MobilizerNode, ModelVars, Stage, State,
};
pub use mobilis_tree::{
    self, Joint, MatterTree, MatterTreeBuilder, Mobilizer, TreeConfig, TreeError,
};
