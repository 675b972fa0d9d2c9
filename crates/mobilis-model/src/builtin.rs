//! Built-in joint types.
//!
//! Every built-in mobilizer has a fixed velocity DOF count. Ball and free
//! joints may store their rotation as a quaternion or, in Euler mode, as
//! body-fixed XYZ angles; the other kinds use plain coordinates with `q̇ = u`.

use mobilis_math::{
    DMat, DVec, HMatrix, Mat3, Quat, SpatialTransform, SpatialVec, Vec3, euler, skew,
};

use crate::error::Result;
use crate::index::{MobilizerQIndex, SlotCursor};
use crate::node::{AngleSpan, MobilizerNode, NodeSlots, NodeSpec, QDotPolicy, QuaternionPolicy};
use crate::state::{ModelVars, State};

/// Built-in joint type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// One rotational DOF about the shared z axis of F and M.
    Pin,
    /// One translational DOF along the shared x axis of F and M.
    Slider,
    /// Rotation about F's x axis, then about the rotated y axis.
    Universal,
    /// Three rotational DOFs about a shared origin.
    Ball,
    /// Unrestricted motion: rotation followed by translation of M's origin in F.
    Free,
}

impl BuiltinKind {
    /// Number of velocity DOFs.
    pub fn nu(self) -> usize {
        match self {
            BuiltinKind::Pin | BuiltinKind::Slider => 1,
            BuiltinKind::Universal => 2,
            BuiltinKind::Ball => 3,
            BuiltinKind::Free => 6,
        }
    }

    /// Position slots reserved for this joint (quaternion mode).
    pub fn max_nq(self) -> usize {
        match self {
            BuiltinKind::Pin | BuiltinKind::Slider => 1,
            BuiltinKind::Universal => 2,
            BuiltinKind::Ball => 4,
            BuiltinKind::Free => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::Pin => "pin",
            BuiltinKind::Slider => "slider",
            BuiltinKind::Universal => "universal",
            BuiltinKind::Ball => "ball",
            BuiltinKind::Free => "free",
        }
    }

    fn has_rotation_block(self) -> bool {
        matches!(self, BuiltinKind::Ball | BuiltinKind::Free)
    }
}

/// A node for one of the [`BuiltinKind`] joints.
#[derive(Debug, Clone)]
pub struct BuiltinNode {
    kind: BuiltinKind,
    slots: NodeSlots,
}

impl BuiltinNode {
    /// Create the node and reserve its slots.
    pub fn new(kind: BuiltinKind, spec: NodeSpec, cursor: &mut SlotCursor) -> Self {
        let qdot_policy = if kind.has_rotation_block() {
            QDotPolicy::MayDifferFromU
        } else {
            QDotPolicy::AlwaysU
        };
        let quaternion_policy = if kind.has_rotation_block() {
            QuaternionPolicy::MayBeUsed
        } else {
            QuaternionPolicy::NeverUsed
        };
        let slots = NodeSlots::allocate(
            spec,
            kind.max_nq(),
            kind.nu(),
            qdot_policy,
            quaternion_policy,
            cursor,
        );
        Self { kind, slots }
    }

    pub fn kind(&self) -> BuiltinKind {
        self.kind
    }

    /// Coordinates taken by the rotation block in the current mode.
    fn rotation_len(use_euler: bool) -> usize {
        if use_euler { 3 } else { 4 }
    }

    /// Unit-norm quaternion or angles of the rotation block as `R_FM`.
    fn rotation(use_euler: bool, q: &[f64]) -> Mat3 {
        if use_euler {
            euler::body_fixed_xyz_to_matrix(&Vec3::new(q[0], q[1], q[2]))
        } else {
            Quat::from_slice(q).normalize().to_matrix()
        }
    }

    /// `q̇_rot = N_rot ω` for the rotation block.
    fn rotation_n(use_euler: bool, q: &[f64]) -> DMat {
        if use_euler {
            let n = euler::rates_from_angular_velocity(&Vec3::new(q[0], q[1], q[2]));
            to_dmat(3, 3, n.as_slice())
        } else {
            let n = Quat::from_slice(q).normalize().rate_from_angular_velocity();
            to_dmat(4, 3, n.as_slice())
        }
    }

    fn rotation_n_inv(use_euler: bool, q: &[f64]) -> DMat {
        if use_euler {
            let m = euler::angular_velocity_from_rates(&Vec3::new(q[0], q[1], q[2]));
            to_dmat(3, 3, m.as_slice())
        } else {
            let n_inv = Quat::from_slice(q).normalize().angular_velocity_from_rate();
            to_dmat(3, 4, n_inv.as_slice())
        }
    }

    fn rotation_n_dot(use_euler: bool, q: &[f64], w: &Vec3) -> DMat {
        if use_euler {
            let angles = Vec3::new(q[0], q[1], q[2]);
            let rates = euler::rates_from_angular_velocity(&angles) * w;
            let n_dot = euler::rates_from_angular_velocity_dot(&angles, &rates);
            to_dmat(3, 3, n_dot.as_slice())
        } else {
            // N is linear in the quaternion components, so Ṅ = N(q̇)
            let quat = Quat::from_slice(q).normalize();
            let qdot = quat.rate_from_angular_velocity() * w;
            let n_dot = Quat::from_vec4(&qdot).rate_from_angular_velocity();
            to_dmat(4, 3, n_dot.as_slice())
        }
    }

    /// Lay a rotation-block operator and a 3x3 translational block out
    /// diagonally, as the free joint's coordinates are.
    fn with_translation(rot: DMat, translation: Option<f64>) -> DMat {
        let (r, c) = rot.shape();
        let mut n = DMat::zeros(r + 3, c + 3);
        n.view_mut((0, 0), (r, c)).copy_from(&rot);
        if let Some(scale) = translation {
            n.view_mut((r, c), (3, 3)).fill_with_identity();
            n.view_mut((r, c), (3, 3)).scale_mut(scale);
        }
        n
    }

    fn n_matrix(&self, use_euler: bool, q: &[f64]) -> DMat {
        match self.kind {
            BuiltinKind::Pin | BuiltinKind::Slider | BuiltinKind::Universal => {
                DMat::identity(self.kind.nu(), self.kind.nu())
            }
            BuiltinKind::Ball => Self::rotation_n(use_euler, q),
            BuiltinKind::Free => Self::with_translation(Self::rotation_n(use_euler, q), Some(1.0)),
        }
    }

    fn n_inv_matrix(&self, use_euler: bool, q: &[f64]) -> DMat {
        match self.kind {
            BuiltinKind::Pin | BuiltinKind::Slider | BuiltinKind::Universal => {
                DMat::identity(self.kind.nu(), self.kind.nu())
            }
            BuiltinKind::Ball => Self::rotation_n_inv(use_euler, q),
            BuiltinKind::Free => {
                Self::with_translation(Self::rotation_n_inv(use_euler, q), Some(1.0))
            }
        }
    }

    fn n_dot_matrix(&self, use_euler: bool, q: &[f64], u: &[f64]) -> DMat {
        match self.kind {
            BuiltinKind::Pin | BuiltinKind::Slider | BuiltinKind::Universal => {
                DMat::zeros(self.kind.nu(), self.kind.nu())
            }
            BuiltinKind::Ball => {
                Self::rotation_n_dot(use_euler, q, &Vec3::new(u[0], u[1], u[2]))
            }
            BuiltinKind::Free => Self::with_translation(
                Self::rotation_n_dot(use_euler, q, &Vec3::new(u[0], u[1], u[2])),
                None,
            ),
        }
    }
}

fn to_dmat(nrows: usize, ncols: usize, column_major: &[f64]) -> DMat {
    DMat::from_column_slice(nrows, ncols, column_major)
}

/// `out = m·in`, or `out = in·m` (that is `mᵀ·in`) when `matrix_on_right`.
fn apply(m: &DMat, matrix_on_right: bool, input: &[f64], out: &mut [f64]) {
    let x = DVec::from_column_slice(input);
    let y = if matrix_on_right { m.tr_mul(&x) } else { m * x };
    out.copy_from_slice(y.as_slice());
}

impl MobilizerNode for BuiltinNode {
    fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    fn slots(&self) -> &NodeSlots {
        &self.slots
    }

    fn is_using_quaternion(&self, state: &State) -> Option<MobilizerQIndex> {
        (self.kind.has_rotation_block() && !state.use_euler_angles()).then_some(MobilizerQIndex(0))
    }

    fn is_using_angles(&self, state: &State) -> Option<AngleSpan> {
        let count = match self.kind {
            BuiltinKind::Pin => 1,
            BuiltinKind::Universal => 2,
            BuiltinKind::Ball | BuiltinKind::Free if state.use_euler_angles() => 3,
            _ => return None,
        };
        Some(AngleSpan {
            start: MobilizerQIndex(0),
            count,
        })
    }

    fn calc_across_joint_transform(&self, state: &State, q: &DVec) -> SpatialTransform {
        let use_euler = state.use_euler_angles();
        let q = self.slots.q_slice(q, self.nq_in_use(state.model_vars()));
        match self.kind {
            BuiltinKind::Pin => SpatialTransform::rot_z(q[0]),
            BuiltinKind::Slider => SpatialTransform::from_translation(Vec3::x() * q[0]),
            BuiltinKind::Universal => {
                let r = euler::body_fixed_xyz_to_matrix(&Vec3::new(q[0], q[1], 0.0));
                SpatialTransform::from_rotation(r)
            }
            BuiltinKind::Ball => SpatialTransform::from_rotation(Self::rotation(use_euler, q)),
            BuiltinKind::Free => {
                let nr = Self::rotation_len(use_euler);
                let p = Vec3::new(q[nr], q[nr + 1], q[nr + 2]);
                SpatialTransform::from_pose(Self::rotation(use_euler, q), p)
            }
        }
    }

    fn calc_across_joint_velocity_jacobian(&self, state: &State) -> HMatrix {
        let mut h = HMatrix::zeros(self.kind.nu());
        match self.kind {
            BuiltinKind::Pin => h[(2, 0)] = 1.0,
            BuiltinKind::Slider => h[(3, 0)] = 1.0,
            BuiltinKind::Universal => {
                let (sa, ca) = self.slots.q_slice(&state.q, 1)[0].sin_cos();
                h[(0, 0)] = 1.0;
                h[(1, 1)] = ca;
                h[(2, 1)] = sa;
            }
            BuiltinKind::Ball => h.fixed_view_mut::<3, 3>(0, 0).fill_with_identity(),
            BuiltinKind::Free => {
                let nr = Self::rotation_len(state.use_euler_angles());
                let q = self.slots.q_slice(&state.q, nr + 3);
                let p = Vec3::new(q[nr], q[nr + 1], q[nr + 2]);
                h.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
                h.fixed_view_mut::<3, 3>(3, 0).copy_from(&skew(&p));
                h.fixed_view_mut::<3, 3>(3, 3).fill_with_identity();
            }
        }
        h
    }

    fn calc_across_joint_velocity_jacobian_dot(&self, state: &State) -> HMatrix {
        let mut h_dot = HMatrix::zeros(self.kind.nu());
        let u = self.slots.u_slice(&state.u);
        match self.kind {
            BuiltinKind::Pin | BuiltinKind::Slider | BuiltinKind::Ball => {}
            BuiltinKind::Universal => {
                let (sa, ca) = self.slots.q_slice(&state.q, 1)[0].sin_cos();
                h_dot[(1, 1)] = -sa * u[0];
                h_dot[(2, 1)] = ca * u[0];
            }
            BuiltinKind::Free => {
                let p_dot = Vec3::new(u[3], u[4], u[5]);
                h_dot.fixed_view_mut::<3, 3>(3, 0).copy_from(&skew(&p_dot));
            }
        }
        h_dot
    }

    fn multiply_by_n(
        &self,
        state: &State,
        _use_euler_angles_if_possible: bool,
        q: &[f64],
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        apply(&self.n_matrix(state.use_euler_angles(), q), matrix_on_right, input, out);
        Ok(())
    }

    fn multiply_by_n_inv(
        &self,
        state: &State,
        _use_euler_angles_if_possible: bool,
        q: &[f64],
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        apply(&self.n_inv_matrix(state.use_euler_angles(), q), matrix_on_right, input, out);
        Ok(())
    }

    fn multiply_by_n_dot(
        &self,
        state: &State,
        _use_euler_angles_if_possible: bool,
        q: &[f64],
        u: &[f64],
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        apply(&self.n_dot_matrix(state.use_euler_angles(), q, u), matrix_on_right, input, out);
        Ok(())
    }

    fn calc_local_qdot_from_local_u(&self, state: &State, u: &[f64], qdot: &mut [f64]) -> Result<()> {
        if self.slots.qdot_policy == QDotPolicy::AlwaysU {
            qdot.copy_from_slice(u);
            return Ok(());
        }
        let q = self.slots.q_slice(&state.q, self.nq_in_use(state.model_vars()));
        self.multiply_by_n(state, false, q, false, u, qdot)
    }

    fn set_q_to_fit_transform(&self, state: &State, x_fm: &SpatialTransform, q: &mut DVec) -> Result<()> {
        let use_euler = state.use_euler_angles();
        let r = x_fm.pose_rotation();
        let nq = self.nq_in_use(state.model_vars());
        let local = self.slots.q_slice_mut(q, nq);
        match self.kind {
            BuiltinKind::Pin => local[0] = r[(1, 0)].atan2(r[(0, 0)]),
            BuiltinKind::Slider => local[0] = x_fm.pos.x,
            BuiltinKind::Universal => {
                let angles = euler::matrix_to_body_fixed_xyz(&r);
                local[0] = angles.x;
                local[1] = angles.y;
            }
            BuiltinKind::Ball | BuiltinKind::Free => {
                if use_euler {
                    local[..3].copy_from_slice(euler::matrix_to_body_fixed_xyz(&r).as_slice());
                } else {
                    Quat::from_matrix(&r).write_to(local);
                }
                if self.kind == BuiltinKind::Free {
                    let nr = Self::rotation_len(use_euler);
                    local[nr..nr + 3].copy_from_slice(x_fm.pos.as_slice());
                }
            }
        }
        Ok(())
    }

    fn set_u_to_fit_velocity(&self, state: &State, q: &DVec, v_fm: &SpatialVec, u: &mut DVec) -> Result<()> {
        let w = v_fm.angular();
        let v = v_fm.linear();
        let local = self.slots.u_slice_mut(u);
        match self.kind {
            BuiltinKind::Pin => local[0] = w.z,
            BuiltinKind::Slider => local[0] = v.x,
            BuiltinKind::Universal => {
                // the two Jacobian columns are orthonormal
                let (sa, ca) = self.slots.q_slice(q, 1)[0].sin_cos();
                local[0] = w.x;
                local[1] = w.y * ca + w.z * sa;
            }
            BuiltinKind::Ball => local.copy_from_slice(w.as_slice()),
            BuiltinKind::Free => {
                let nr = Self::rotation_len(state.use_euler_angles());
                let qs = self.slots.q_slice(q, nr + 3);
                let p = Vec3::new(qs[nr], qs[nr + 1], qs[nr + 2]);
                let p_dot = v - p.cross(&w);
                local[..3].copy_from_slice(w.as_slice());
                local[3..].copy_from_slice(p_dot.as_slice());
            }
        }
        Ok(())
    }

    fn calc_joint_sin_cos_q_norm(
        &self,
        mv: &ModelVars,
        q: &DVec,
        sine: &mut DVec,
        cosine: &mut DVec,
        q_err: &mut DVec,
        qnorm: &mut DVec,
    ) {
        let qi = self.slots.q_index.index();
        let angles = match self.kind {
            BuiltinKind::Slider => 0,
            BuiltinKind::Pin => 1,
            BuiltinKind::Universal => 2,
            BuiltinKind::Ball | BuiltinKind::Free if mv.use_euler_angles => 3,
            BuiltinKind::Ball | BuiltinKind::Free => {
                let quat = Quat::from_slice(self.slots.q_slice(q, 4));
                let norm = quat.norm();
                quat.normalize().write_to(self.slots.q_slice_mut(qnorm, 4));
                q_err[qi] = norm - 1.0;
                0
            }
        };
        for i in qi..qi + angles {
            let (s, c) = q[i].sin_cos();
            sine[i] = s;
            cosine[i] = c;
        }
    }
}
