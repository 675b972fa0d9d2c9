//! 6D spatial algebra following Featherstone's "Rigid Body Dynamics Algorithms".
//!
//! Convention: spatial vectors are [angular; linear] (Featherstone order),
//! measured about the origin of the frame they are expressed in.
//! A spatial motion vector (twist): [ω; v]
//! A spatial force vector (wrench): [τ; f]

use crate::{Mat3, Mat6, Vec3, Vec6, skew};

/// 6D spatial vector: a motion vector (twist) or a force vector (wrench).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialVec {
    /// The underlying 6D vector [angular(3); linear(3)].
    pub data: Vec6,
}

impl SpatialVec {
    /// Create from angular and linear parts.
    #[inline]
    pub fn new(angular: Vec3, linear: Vec3) -> Self {
        Self {
            data: Vec6::new(
                angular.x, angular.y, angular.z, linear.x, linear.y, linear.z,
            ),
        }
    }

    /// Zero spatial vector.
    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Vec6::zeros(),
        }
    }

    /// Pure rotation.
    #[inline]
    pub fn angular_only(angular: Vec3) -> Self {
        Self::new(angular, Vec3::zeros())
    }

    /// Pure translation.
    #[inline]
    pub fn linear_only(linear: Vec3) -> Self {
        Self::new(Vec3::zeros(), linear)
    }

    /// Angular (top 3) component.
    #[inline]
    pub fn angular(&self) -> Vec3 {
        Vec3::new(self.data[0], self.data[1], self.data[2])
    }

    /// Linear (bottom 3) component.
    #[inline]
    pub fn linear(&self) -> Vec3 {
        Vec3::new(self.data[3], self.data[4], self.data[5])
    }

    /// Spatial cross product for motion vectors: v ×ₘ w
    pub fn cross_motion(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let w2 = other.angular();
        let v2 = other.linear();
        SpatialVec::new(w.cross(&w2), w.cross(&v2) + v.cross(&w2))
    }
}

impl From<Vec6> for SpatialVec {
    fn from(data: Vec6) -> Self {
        Self { data }
    }
}

impl std::ops::Add for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn add(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data + rhs.data,
        }
    }
}

impl std::ops::Sub for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn sub(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data - rhs.data,
        }
    }
}

impl std::ops::Mul<f64> for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn mul(self, rhs: f64) -> SpatialVec {
        SpatialVec {
            data: self.data * rhs,
        }
    }
}

impl std::ops::Neg for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn neg(self) -> SpatialVec {
        SpatialVec { data: -self.data }
    }
}

/// Plücker transform from frame A to frame B.
///
/// `rot` maps A coordinates to B coordinates (it is the transpose of the
/// rotation matrix `R_AB` describing B's orientation in A) and `pos` is the
/// position of B's origin expressed in A. An across-joint transform `X_FM`
/// therefore holds `R_FMᵀ` and `p_FM`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialTransform {
    /// Coordinate rotation from frame A to frame B.
    pub rot: Mat3,
    /// Position of frame B's origin expressed in frame A.
    pub pos: Vec3,
}

impl SpatialTransform {
    /// Create from coordinate rotation and translation.
    pub fn new(rot: Mat3, pos: Vec3) -> Self {
        Self { rot, pos }
    }

    /// Create from the pose of B in A: orientation `R_AB` and origin `p_AB`.
    pub fn from_pose(r_ab: Mat3, p_ab: Vec3) -> Self {
        Self {
            rot: r_ab.transpose(),
            pos: p_ab,
        }
    }

    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            rot: Mat3::identity(),
            pos: Vec3::zeros(),
        }
    }

    /// Pure rotation with B's orientation `R_AB` in A.
    pub fn from_rotation(r_ab: Mat3) -> Self {
        Self::from_pose(r_ab, Vec3::zeros())
    }

    /// Pure translation.
    pub fn from_translation(pos: Vec3) -> Self {
        Self {
            rot: Mat3::identity(),
            pos,
        }
    }

    /// Frame B rotated by `angle` about A's X axis.
    pub fn rot_x(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(Mat3::new(1.0, 0.0, 0.0, 0.0, c, s, 0.0, -s, c), Vec3::zeros())
    }

    /// Frame B rotated by `angle` about A's Y axis.
    pub fn rot_y(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(Mat3::new(c, 0.0, -s, 0.0, 1.0, 0.0, s, 0.0, c), Vec3::zeros())
    }

    /// Frame B rotated by `angle` about A's Z axis.
    pub fn rot_z(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::new(Mat3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0), Vec3::zeros())
    }

    /// Orientation `R_AB` of B in A.
    pub fn pose_rotation(&self) -> Mat3 {
        self.rot.transpose()
    }

    /// Transform a spatial motion vector from frame A to frame B.
    pub fn apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let w = v.angular();
        let vel = v.linear();
        SpatialVec::new(self.rot * w, self.rot * (vel - self.pos.cross(&w)))
    }

    /// Inverse transform a spatial motion vector (from B to A).
    pub fn inv_apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let rt = self.rot.transpose();
        let w = rt * v.angular();
        SpatialVec::new(w, rt * v.linear() + self.pos.cross(&w))
    }

    /// Compose two transforms: `other` (A → B) followed by `self` (B → C).
    pub fn compose(&self, other: &SpatialTransform) -> SpatialTransform {
        SpatialTransform {
            rot: self.rot * other.rot,
            pos: other.pos + other.rot.transpose() * self.pos,
        }
    }

    /// Inverse of this transform (B → A).
    pub fn inverse(&self) -> SpatialTransform {
        SpatialTransform {
            rot: self.rot.transpose(),
            pos: -(self.rot * self.pos),
        }
    }
}

/// Mass properties of a rigid body expressed in its body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialInertia {
    /// Mass of the body.
    pub mass: f64,
    /// Center of mass position in body frame.
    pub com: Vec3,
    /// Rotational inertia about the center of mass (3x3 symmetric).
    pub inertia: Mat3,
}

impl SpatialInertia {
    /// Create a spatial inertia with the given mass, CoM offset, and inertia matrix.
    pub fn new(mass: f64, com: Vec3, inertia: Mat3) -> Self {
        Self { mass, com, inertia }
    }

    /// Massless placeholder (used for the ground body).
    pub fn zero() -> Self {
        Self::new(0.0, Vec3::zeros(), Mat3::zeros())
    }

    /// Point mass at a given position.
    pub fn point_mass(mass: f64, pos: Vec3) -> Self {
        Self::new(mass, pos, Mat3::zeros())
    }

    /// Uniform solid sphere centered at the body origin.
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 2.0 / 5.0 * mass * radius * radius;
        Self::new(mass, Vec3::zeros(), Mat3::from_diagonal_element(i))
    }

    /// Convert to 6x6 spatial inertia matrix about the body frame origin.
    ///
    /// I_spatial = | I + m[c]×[c]×ᵀ   m[c]× |
    ///             | m[c]×ᵀ             mE    |
    pub fn to_matrix(&self) -> Mat6 {
        let cx = skew(&self.com);
        let m = self.mass;

        let mut mat = Mat6::zeros();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.inertia + cx * cx.transpose() * m));
        mat.fixed_view_mut::<3, 3>(0, 3).copy_from(&(cx * m));
        mat.fixed_view_mut::<3, 3>(3, 0).copy_from(&(cx.transpose() * m));
        mat.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(Mat3::identity() * m));
        mat
    }

    /// Kinetic energy ½ vᵀ I v of a body moving with spatial velocity `v`
    /// (expressed in the body frame).
    pub fn kinetic_energy(&self, v: &SpatialVec) -> f64 {
        0.5 * v.data.dot(&(self.to_matrix() * v.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra as na;

    #[test]
    fn test_spatial_vec_cross_motion() {
        let v1 = SpatialVec::angular_only(Vec3::z());
        let v2 = SpatialVec::angular_only(Vec3::x());
        let result = v1.cross_motion(&v2);
        assert_relative_eq!(result.angular().y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_transform_identity() {
        let xf = SpatialTransform::identity();
        let v = SpatialVec::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0));
        assert_relative_eq!(xf.apply_motion(&v).data, v.data, epsilon = 1e-10);
    }

    #[test]
    fn test_from_pose_matches_rot_z() {
        let r = *na::Rotation3::from_axis_angle(&na::Vector3::z_axis(), 0.5).matrix();
        let a = SpatialTransform::from_rotation(r);
        let b = SpatialTransform::rot_z(0.5);
        assert_relative_eq!(a.rot, b.rot, epsilon = 1e-12);
        assert_relative_eq!(b.pose_rotation(), r, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_inverse_roundtrip() {
        let xf = SpatialTransform::new(
            *na::Rotation3::from_axis_angle(&na::Vector3::z_axis(), 0.5).matrix(),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let v = SpatialVec::new(Vec3::x(), Vec3::y());
        let back = xf.inv_apply_motion(&xf.apply_motion(&v));
        assert_relative_eq!(back.data, v.data, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_translations() {
        let xf1 = SpatialTransform::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let xf2 = SpatialTransform::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let composed = xf1.compose(&xf2);
        assert_relative_eq!(composed.pos, Vec3::new(1.0, 2.0, 0.0), epsilon = 1e-10);
    }

    #[test]
    fn test_point_mass_kinetic_energy() {
        // Point mass 2 kg at (0,1,0) spinning at 3 rad/s about z: speed 3 m/s
        let si = SpatialInertia::point_mass(2.0, Vec3::y());
        let v = SpatialVec::angular_only(Vec3::new(0.0, 0.0, 3.0));
        assert_relative_eq!(si.kinetic_energy(&v), 0.5 * 2.0 * 9.0, epsilon = 1e-10);
    }
}
