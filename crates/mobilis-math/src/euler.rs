//! Body-fixed X-Y-Z Euler angles.
//!
//! The rotation is `R = Rx(a) · Ry(b) · Rz(c)` for angles `[a, b, c]`: rotate
//! about F's x axis, then about the new y axis, then about the new z axis.
//! The parameterization is singular where `cos(b) = 0`.

use crate::{Mat3, Vec3};

/// Rotation matrix for body-fixed X-Y-Z angles.
pub fn body_fixed_xyz_to_matrix(angles: &Vec3) -> Mat3 {
    let (sa, ca) = angles.x.sin_cos();
    let (sb, cb) = angles.y.sin_cos();
    let (sc, cc) = angles.z.sin_cos();

    Mat3::new(
        cb * cc,
        -cb * sc,
        sb,
        sa * sb * cc + ca * sc,
        -sa * sb * sc + ca * cc,
        -sa * cb,
        -ca * sb * cc + sa * sc,
        ca * sb * sc + sa * cc,
        ca * cb,
    )
}

/// Body-fixed X-Y-Z angles reproducing the rotation matrix `m`.
///
/// The middle angle is returned in `[-π/2, π/2]`.
pub fn matrix_to_body_fixed_xyz(m: &Mat3) -> Vec3 {
    let b = m[(0, 2)].atan2((m[(0, 0)] * m[(0, 0)] + m[(0, 1)] * m[(0, 1)]).sqrt());
    let a = (-m[(1, 2)]).atan2(m[(2, 2)]);
    let c = (-m[(0, 1)]).atan2(m[(0, 0)]);
    Vec3::new(a, b, c)
}

/// Matrix `M(q)` with ω = M q̇, ω being the angular velocity of M in F
/// expressed in F.
///
/// Columns are the x axis of F, the y axis after the first rotation and the
/// z axis after the second.
pub fn angular_velocity_from_rates(angles: &Vec3) -> Mat3 {
    let (sa, ca) = angles.x.sin_cos();
    let (sb, cb) = angles.y.sin_cos();
    Mat3::new(1.0, 0.0, sb, 0.0, ca, -sa * cb, 0.0, sa, ca * cb)
}

/// Inverse of [`angular_velocity_from_rates`]: q̇ = N ω.
///
/// Blows up as `cos(b)` approaches zero.
pub fn rates_from_angular_velocity(angles: &Vec3) -> Mat3 {
    let (sa, ca) = angles.x.sin_cos();
    let (sb, cb) = angles.y.sin_cos();
    let ooc = 1.0 / cb;
    Mat3::new(
        1.0,
        sa * sb * ooc,
        -ca * sb * ooc,
        0.0,
        ca,
        sa,
        0.0,
        -sa * ooc,
        ca * ooc,
    )
}

/// Time derivative of [`angular_velocity_from_rates`] given the angle rates.
pub fn angular_velocity_from_rates_dot(angles: &Vec3, rates: &Vec3) -> Mat3 {
    let (sa, ca) = angles.x.sin_cos();
    let (sb, cb) = angles.y.sin_cos();
    let (ad, bd) = (rates.x, rates.y);
    Mat3::new(
        0.0,
        0.0,
        cb * bd,
        0.0,
        -sa * ad,
        -ca * cb * ad + sa * sb * bd,
        0.0,
        ca * ad,
        -sa * cb * ad - ca * sb * bd,
    )
}

/// Time derivative of [`rates_from_angular_velocity`]: Ṅ = -N Ṁ N.
pub fn rates_from_angular_velocity_dot(angles: &Vec3, rates: &Vec3) -> Mat3 {
    let n = rates_from_angular_velocity(angles);
    -(n * angular_velocity_from_rates_dot(angles, rates) * n)
}
