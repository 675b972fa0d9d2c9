//! Joint descriptions accepted by [`crate::MatterTree::add_rigid_body`].

use std::sync::Arc;

use mobilis_model::CustomImplementation;

/// What kind of relative motion a mobilizer permits.
#[derive(Debug, Clone)]
pub enum Mobilizer {
    /// Rotation about the shared z axis.
    Pin,
    /// Translation along the shared x axis.
    Slider,
    /// Rotation about x, then about the new y.
    Universal,
    /// Spherical joint (quaternion or Euler angles).
    Ball,
    /// Six DOF.
    Free,
    /// User-defined joint with 1 to 6 mobilities.
    Custom(Arc<dyn CustomImplementation>),
}

impl Mobilizer {
    /// Wrap a user implementation.
    pub fn custom(implementation: impl CustomImplementation + 'static) -> Self {
        Mobilizer::Custom(Arc::new(implementation))
    }

    /// Same mobilizer defined from child to parent.
    pub fn reversed(self) -> Joint {
        Joint {
            mobilizer: self,
            reversed: true,
        }
    }
}

/// A mobilizer together with its direction.
#[derive(Debug, Clone)]
pub struct Joint {
    pub mobilizer: Mobilizer,
    pub reversed: bool,
}

impl From<Mobilizer> for Joint {
    fn from(mobilizer: Mobilizer) -> Self {
        Joint {
            mobilizer,
            reversed: false,
        }
    }
}
