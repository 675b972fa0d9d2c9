//! Unit quaternions for 3D rotations.
//!
//! Convention: q = [w; x; y; z] where w is scalar, (x,y,z) is vector part.
//! A quaternion stored in a mobilizer's generalized coordinates describes the
//! rotation `R_FM` of the moving frame M relative to the fixed frame F.

use crate::{Mat3, Mat3x4, Mat4x3, Vec3, Vec4, euler, skew};

/// A unit quaternion representing a 3D rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    /// Scalar part (w).
    pub w: f64,
    /// Vector part (x, y, z).
    pub v: Vec3,
}

impl Quat {
    /// Create a new quaternion from scalar and vector parts.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            w,
            v: Vec3::new(x, y, z),
        }
    }

    /// Identity quaternion (no rotation).
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            v: Vec3::zeros(),
        }
    }

    /// Reinterpret four consecutive coordinates `[w, x, y, z]`.
    pub fn from_slice(q: &[f64]) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }

    /// Build from a 4-vector in `[w, x, y, z]` order.
    pub fn from_vec4(q: &Vec4) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }

    /// Storage form `[w, x, y, z]`.
    pub fn as_vec4(&self) -> Vec4 {
        Vec4::new(self.w, self.v.x, self.v.y, self.v.z)
    }

    /// Write `[w, x, y, z]` into the first four entries of `out`.
    pub fn write_to(&self, out: &mut [f64]) {
        out[0] = self.w;
        out[1] = self.v.x;
        out[2] = self.v.y;
        out[3] = self.v.z;
    }

    /// Create quaternion from axis-angle representation.
    /// axis should be a unit vector, angle in radians.
    pub fn from_axis_angle(axis: &Vec3, angle: f64) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self { w: c, v: *axis * s }
    }

    /// Euclidean norm of the four components.
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.v.norm_squared()).sqrt()
    }

    /// Normalize this quaternion to unit length.
    ///
    /// A (near) zero quaternion normalizes to the identity.
    pub fn normalize(&self) -> Self {
        let norm = self.norm();
        if norm < 1e-12 {
            return Self::identity();
        }
        Self {
            w: self.w / norm,
            v: self.v / norm,
        }
    }

    /// Convert quaternion to the 3x3 rotation matrix it represents.
    pub fn to_matrix(&self) -> Mat3 {
        let (w, x, y, z) = (self.w, self.v.x, self.v.y, self.v.z);
        let (x2, y2, z2) = (x * x, y * y, z * z);
        let (xy, xz, yz) = (x * y, x * z, y * z);
        let (wx, wy, wz) = (w * x, w * y, w * z);

        Mat3::new(
            1.0 - 2.0 * (y2 + z2),
            2.0 * (xy - wz),
            2.0 * (xz + wy),
            2.0 * (xy + wz),
            1.0 - 2.0 * (x2 + z2),
            2.0 * (yz - wx),
            2.0 * (xz - wy),
            2.0 * (yz + wx),
            1.0 - 2.0 * (x2 + y2),
        )
    }

    /// Convert rotation matrix to quaternion (Shepperd's method).
    ///
    /// The result is canonicalized to a non-negative scalar part.
    pub fn from_matrix(m: &Mat3) -> Quat {
        let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0; // s = 4*w
            Quat::new(
                0.25 * s,
                (m[(2, 1)] - m[(1, 2)]) / s,
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(1, 0)] - m[(0, 1)]) / s,
            )
        } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
            let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0; // s = 4*x
            Quat::new(
                (m[(2, 1)] - m[(1, 2)]) / s,
                0.25 * s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
            )
        } else if m[(1, 1)] > m[(2, 2)] {
            let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0; // s = 4*y
            Quat::new(
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                0.25 * s,
                (m[(1, 2)] + m[(2, 1)]) / s,
            )
        } else {
            let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0; // s = 4*z
            Quat::new(
                (m[(1, 0)] - m[(0, 1)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
                (m[(1, 2)] + m[(2, 1)]) / s,
                0.25 * s,
            )
        };

        if q.w < 0.0 {
            Quat { w: -q.w, v: -q.v }
        } else {
            q
        }
    }

    /// Quaternion for the body-fixed X-Y-Z rotation sequence `angles`.
    pub fn from_body_fixed_xyz(angles: &Vec3) -> Quat {
        Quat::from_matrix(&euler::body_fixed_xyz_to_matrix(angles))
    }

    /// Body-fixed X-Y-Z angles of the rotation this quaternion represents.
    pub fn to_body_fixed_xyz(&self) -> Vec3 {
        euler::matrix_to_body_fixed_xyz(&self.to_matrix())
    }

    /// Matrix `N` with `q̇ = N ω` for the angular velocity ω of M in F,
    /// expressed in F.
    ///
    /// N = ½ | -vᵀ        |
    ///       |  wE - [v]× |
    pub fn rate_from_angular_velocity(&self) -> Mat4x3 {
        let lower = Mat3::identity() * self.w - skew(&self.v);
        let mut n = Mat4x3::zeros();
        n.fixed_view_mut::<1, 3>(0, 0).copy_from(&(-self.v.transpose()));
        n.fixed_view_mut::<3, 3>(1, 0).copy_from(&lower);
        n * 0.5
    }

    /// Left inverse of [`Quat::rate_from_angular_velocity`] for a unit
    /// quaternion: ω = N⁻¹ q̇.
    ///
    /// N⁻¹ = 2 | -v   wE + [v]× |
    pub fn angular_velocity_from_rate(&self) -> Mat3x4 {
        let right = Mat3::identity() * self.w + skew(&self.v);
        let mut n_inv = Mat3x4::zeros();
        n_inv.fixed_view_mut::<3, 1>(0, 0).copy_from(&(-self.v));
        n_inv.fixed_view_mut::<3, 3>(0, 1).copy_from(&right);
        n_inv * 2.0
    }
}
