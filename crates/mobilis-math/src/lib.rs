//! Spatial algebra and rotation primitives for the mobilis kinematics engine.
//!
//! Implements 6D spatial vectors and Plücker transforms following
//! Featherstone's conventions, plus the two rotation parameterizations a
//! mobilizer may store in its generalized coordinates: unit quaternions and
//! body-fixed XYZ Euler angles.

pub mod euler;
pub mod quaternion;
pub mod spatial;

pub use quaternion::Quat;
pub use spatial::{SpatialInertia, SpatialTransform, SpatialVec};

use nalgebra as na;

/// 3D vector alias.
pub type Vec3 = na::Vector3<f64>;
/// 4D vector alias (quaternion storage order `[w, x, y, z]`).
pub type Vec4 = na::Vector4<f64>;
/// 3x3 matrix alias.
pub type Mat3 = na::Matrix3<f64>;
/// 6D vector alias.
pub type Vec6 = na::Vector6<f64>;
/// 6x6 matrix alias.
pub type Mat6 = na::Matrix6<f64>;
/// 4x3 matrix alias (quaternion rate from angular velocity).
pub type Mat4x3 = na::Matrix4x3<f64>;
/// 3x4 matrix alias (angular velocity from quaternion rate).
pub type Mat3x4 = na::Matrix3x4<f64>;
/// Dynamic vector.
pub type DVec = na::DVector<f64>;
/// Dynamic matrix.
pub type DMat = na::DMatrix<f64>;
/// Six rows, one spatial column per mobility (velocity Jacobian storage).
pub type HMatrix = na::Matrix6xX<f64>;

/// Cross-product matrix: [v]× such that [v]× w = v × w.
#[inline]
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
