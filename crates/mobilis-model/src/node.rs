//! The per-joint kinematics contract shared by every mobilizer.
//!
//! Tree-level code never looks at a joint's type: it asks the
//! [`MobilizerNode`] for coordinate counts, the across-joint transform, the
//! velocity Jacobian and the `q̇ = N u` map, and lets the node address its own
//! slice of the global `q`/`u` vectors.

use std::fmt;
use std::ops::Range;

use mobilis_math::{
    DVec, HMatrix, Mat3, Quat, SpatialInertia, SpatialTransform, SpatialVec, Vec3, Vec4,
};

use crate::error::Result;
use crate::index::{BodyIndex, MobilizerQIndex, QIndex, SlotCursor, UIndex, USquaredIndex};
use crate::state::{ModelVars, Stage, State};

/// Whether a joint can store its rotation as a 4-component quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuaternionPolicy {
    /// Quaternion in quaternion mode, three Euler angles in Euler mode.
    MayBeUsed,
    /// Coordinates never change representation.
    NeverUsed,
}

/// Whether `q̇` is always identical to `u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QDotPolicy {
    /// `N` is the identity; `q̇` can be copied from `u`.
    AlwaysU,
    /// `q̇` must be computed through `N`.
    MayDifferFromU,
}

/// Position coordinates that are literal angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AngleSpan {
    /// First angle within the joint's coordinates.
    pub start: MobilizerQIndex,
    /// Number of consecutive angles.
    pub count: usize,
}

/// Construction parameters common to every node.
#[derive(Debug, Clone, Copy)]
pub struct NodeSpec {
    /// Body this node moves.
    pub body: BodyIndex,
    /// Mass properties of the body in its own frame.
    pub mass_props: SpatialInertia,
    /// Fixed joint frame F on the parent body (parent → F).
    pub x_pf: SpatialTransform,
    /// Moving joint frame M on the child body (body → M).
    pub x_bm: SpatialTransform,
    /// Mobilizer defined from child to parent.
    pub reversed: bool,
}

impl NodeSpec {
    /// Spec with coincident joint frames and no reversal.
    pub fn new(body: BodyIndex, mass_props: SpatialInertia) -> Self {
        Self {
            body,
            mass_props,
            x_pf: SpatialTransform::identity(),
            x_bm: SpatialTransform::identity(),
            reversed: false,
        }
    }
}

/// Topology and slot bookkeeping of one node, fixed at construction.
#[derive(Debug, Clone)]
pub struct NodeSlots {
    pub body: BodyIndex,
    pub mass_props: SpatialInertia,
    pub x_pf: SpatialTransform,
    pub x_bm: SpatialTransform,
    pub reversed: bool,
    pub q_index: QIndex,
    pub u_index: UIndex,
    pub usq_index: USquaredIndex,
    pub nu: usize,
    pub max_nq: usize,
    pub qdot_policy: QDotPolicy,
    pub quaternion_policy: QuaternionPolicy,
}

impl NodeSlots {
    /// Reserve `max_nq` position and `nu` velocity slots from `cursor`.
    pub fn allocate(
        spec: NodeSpec,
        max_nq: usize,
        nu: usize,
        qdot_policy: QDotPolicy,
        quaternion_policy: QuaternionPolicy,
        cursor: &mut SlotCursor,
    ) -> Self {
        let (q_index, u_index, usq_index) = cursor.reserve(max_nq, nu);
        Self {
            body: spec.body,
            mass_props: spec.mass_props,
            x_pf: spec.x_pf,
            x_bm: spec.x_bm,
            reversed: spec.reversed,
            q_index,
            u_index,
            usq_index,
            nu,
            max_nq,
            qdot_policy,
            quaternion_policy,
        }
    }

    /// All position slots owned by this node.
    pub fn q_range(&self) -> Range<usize> {
        self.q_index.index()..self.q_index.index() + self.max_nq
    }

    /// All velocity slots owned by this node.
    pub fn u_range(&self) -> Range<usize> {
        self.u_index.index()..self.u_index.index() + self.nu
    }

    /// The first `n` of this node's coordinates in a q-sized vector.
    pub fn q_slice<'a>(&self, q: &'a DVec, n: usize) -> &'a [f64] {
        let i = self.q_index.index();
        &q.as_slice()[i..i + n]
    }

    /// Mutable form of [`NodeSlots::q_slice`].
    pub fn q_slice_mut<'a>(&self, q: &'a mut DVec, n: usize) -> &'a mut [f64] {
        let i = self.q_index.index();
        &mut q.as_mut_slice()[i..i + n]
    }

    /// This node's entries in a u-sized vector.
    pub fn u_slice<'a>(&self, u: &'a DVec) -> &'a [f64] {
        &u.as_slice()[self.u_range()]
    }

    /// Mutable form of [`NodeSlots::u_slice`].
    pub fn u_slice_mut<'a>(&self, u: &'a mut DVec) -> &'a mut [f64] {
        let range = self.u_range();
        &mut u.as_mut_slice()[range]
    }

    /// Transform from F to the child body frame B, given `X_FM`.
    pub fn x_fb(&self, x_fm: &SpatialTransform) -> SpatialTransform {
        self.x_bm.inverse().compose(x_fm)
    }
}

/// Spatial column `i` of a Jacobian.
pub fn h_column(h: &HMatrix, i: usize) -> SpatialVec {
    SpatialVec::from(h.column(i).into_owned())
}

fn map_columns(h: &HMatrix, mut f: impl FnMut(usize, SpatialVec) -> SpatialVec) -> HMatrix {
    let mut out = HMatrix::zeros(h.ncols());
    for i in 0..h.ncols() {
        out.set_column(i, &f(i, h_column(h, i)).data);
    }
    out
}

/// Capability set every joint type implements.
///
/// Methods taking whole `q`/`u`-sized vectors read and write only this
/// node's slots; the `local` variants and the `N` operators work on slices
/// sized exactly to the in-use dimensions.
pub trait MobilizerNode: fmt::Debug {
    /// Short name of the joint kind.
    fn type_name(&self) -> &'static str;

    /// Slot bookkeeping.
    fn slots(&self) -> &NodeSlots;

    /// Largest number of position coordinates this joint can use.
    fn max_nq(&self) -> usize {
        self.slots().max_nq
    }

    /// Position coordinates in use under the current representation mode.
    fn nq_in_use(&self, mv: &ModelVars) -> usize {
        let nq = self.max_nq();
        if self.slots().quaternion_policy == QuaternionPolicy::MayBeUsed && mv.use_euler_angles {
            nq - 1
        } else {
            nq
        }
    }

    /// Velocity coordinates in use; constant for every joint kind.
    fn nu_in_use(&self, _mv: &ModelVars) -> usize {
        self.slots().nu
    }

    /// Where the quaternion starts, when the rotation is currently a quaternion.
    fn is_using_quaternion(&self, state: &State) -> Option<MobilizerQIndex>;

    /// Which coordinates are literal angles, if any.
    fn is_using_angles(&self, state: &State) -> Option<AngleSpan>;

    /// Copy the in-use local coordinates from `q_in` to `q`.
    fn copy_q(&self, mv: &ModelVars, q_in: &[f64], q: &mut [f64]) {
        let n = self.nq_in_use(mv);
        q[..n].copy_from_slice(&q_in[..n]);
    }

    /// `X_F0M0` between the joint's own frames; a function of this node's
    /// slice of `q` and the representation mode only.
    fn calc_across_joint_transform(&self, state: &State, q: &DVec) -> SpatialTransform;

    /// `H_F0M0`: one spatial column per mobility.
    fn calc_across_joint_velocity_jacobian(&self, state: &State) -> HMatrix;

    /// `Ḣ_F0M0`, the time derivative of `H` at the state's `u`.
    fn calc_across_joint_velocity_jacobian_dot(&self, state: &State) -> HMatrix;

    /// `out = N·in` (`nu` → `nq`), or `out = in·N` when `matrix_on_right`.
    fn multiply_by_n(
        &self,
        state: &State,
        use_euler_angles_if_possible: bool,
        q: &[f64],
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    /// `out = N⁻¹·in` (`nq` → `nu`), or `out = in·N⁻¹` when `matrix_on_right`.
    fn multiply_by_n_inv(
        &self,
        state: &State,
        use_euler_angles_if_possible: bool,
        q: &[f64],
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    /// `out = Ṅ·in`, or `out = in·Ṅ` when `matrix_on_right`.
    #[allow(clippy::too_many_arguments)]
    fn multiply_by_n_dot(
        &self,
        state: &State,
        use_euler_angles_if_possible: bool,
        q: &[f64],
        u: &[f64],
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    /// `q̇ = N u` on local slices; `qdot` has `nq_in_use` entries.
    fn calc_local_qdot_from_local_u(&self, state: &State, u: &[f64], qdot: &mut [f64]) -> Result<()> {
        let s = self.slots();
        let q = s.q_slice(&state.q, self.nq_in_use(state.model_vars()));
        self.multiply_by_n(state, false, q, false, u, qdot)
    }

    /// `q̈ = N u̇ + Ṅ u` on local slices, with `u` taken from the state.
    fn calc_local_qdotdot_from_local_udot(
        &self,
        state: &State,
        udot: &[f64],
        qdotdot: &mut [f64],
    ) -> Result<()> {
        let s = self.slots();
        let q = s.q_slice(&state.q, self.nq_in_use(state.model_vars()));
        let u = s.u_slice(&state.u);
        self.multiply_by_n(state, false, q, false, udot, qdotdot)?;
        let mut temp = vec![0.0; qdotdot.len()];
        self.multiply_by_n_dot(state, false, q, u, false, u, &mut temp)?;
        for (out, t) in qdotdot.iter_mut().zip(&temp) {
            *out += t;
        }
        Ok(())
    }

    /// Write this node's `q̇` into a q-sized vector; unused tail slots are zeroed.
    fn calc_qdot(&self, state: &State, u: &DVec, qdot: &mut DVec) -> Result<()> {
        let s = self.slots();
        let nq = self.nq_in_use(state.model_vars());
        self.calc_local_qdot_from_local_u(state, s.u_slice(u), s.q_slice_mut(qdot, nq))?;
        s.q_slice_mut(qdot, s.max_nq)[nq..].fill(0.0);
        Ok(())
    }

    /// Write this node's `q̈` into a q-sized vector; unused tail slots are zeroed.
    fn calc_qdotdot(&self, state: &State, udot: &DVec, qdotdot: &mut DVec) -> Result<()> {
        let s = self.slots();
        let nq = self.nq_in_use(state.model_vars());
        self.calc_local_qdotdot_from_local_udot(
            state,
            s.u_slice(udot),
            s.q_slice_mut(qdotdot, nq),
        )?;
        s.q_slice_mut(qdotdot, s.max_nq)[nq..].fill(0.0);
        Ok(())
    }

    /// Normalize the quaternion and remove the component of the error
    /// estimate along it. Returns false (and touches nothing) unless the
    /// joint is currently quaternion-represented.
    fn enforce_quaternion_constraints(&self, state: &State, q: &mut DVec, q_err: &mut DVec) -> bool {
        let Some(start) = self.is_using_quaternion(state) else {
            return false;
        };
        let i = self.slots().q_index.index() + start.index();
        let raw: Vec4 = q.fixed_rows::<4>(i).into_owned();
        let quat = raw / raw.norm();
        q.fixed_rows_mut::<4>(i).copy_from(&quat);
        if !q_err.is_empty() {
            let err: Vec4 = q_err.fixed_rows::<4>(i).into_owned();
            let projected = err - quat * err.dot(&quat);
            q_err.fixed_rows_mut::<4>(i).copy_from(&projected);
        }
        true
    }

    /// Re-express quaternion coordinates as body-fixed XYZ angles.
    ///
    /// Trailing coordinates move down one slot and the last slot is zeroed.
    fn convert_to_euler_angles(&self, input: &DVec, out: &mut DVec) {
        let s = self.slots();
        let nq = s.max_nq;
        let qi = s.q_index.index();
        if s.quaternion_policy == QuaternionPolicy::NeverUsed {
            s.q_slice_mut(out, nq).copy_from_slice(s.q_slice(input, nq));
            return;
        }
        let angles = Quat::from_slice(s.q_slice(input, 4)).normalize().to_body_fixed_xyz();
        out.fixed_rows_mut::<3>(qi).copy_from(&angles);
        for i in 3..nq - 1 {
            out[qi + i] = input[qi + i + 1];
        }
        out[qi + nq - 1] = 0.0;
    }

    /// Re-express body-fixed XYZ angles as a quaternion.
    ///
    /// Trailing coordinates move up one slot.
    fn convert_to_quaternions(&self, input: &DVec, out: &mut DVec) {
        let s = self.slots();
        let nq = s.max_nq;
        let qi = s.q_index.index();
        if s.quaternion_policy == QuaternionPolicy::NeverUsed {
            s.q_slice_mut(out, nq).copy_from_slice(s.q_slice(input, nq));
            return;
        }
        let angles = Vec3::new(input[qi], input[qi + 1], input[qi + 2]);
        Quat::from_body_fixed_xyz(&angles).write_to(s.q_slice_mut(out, 4));
        for i in 4..nq {
            out[qi + i] = input[qi + i - 1];
        }
    }

    /// Set this node's `q` so that `X_F0M0` best matches `x_fm`.
    fn set_q_to_fit_transform(&self, state: &State, x_fm: &SpatialTransform, q: &mut DVec) -> Result<()>;

    /// Fit the rotation only; the translation target is zero.
    fn set_q_to_fit_rotation(&self, state: &State, r_fm: &Mat3, q: &mut DVec) -> Result<()> {
        self.set_q_to_fit_transform(state, &SpatialTransform::from_rotation(*r_fm), q)
    }

    /// Fit the translation only; the rotation target is the identity.
    fn set_q_to_fit_translation(&self, state: &State, p_fm: &Vec3, q: &mut DVec) -> Result<()> {
        self.set_q_to_fit_transform(state, &SpatialTransform::from_translation(*p_fm), q)
    }

    /// Set this node's `u` so that `H u` best matches `v_fm`.
    fn set_u_to_fit_velocity(&self, state: &State, q: &DVec, v_fm: &SpatialVec, u: &mut DVec) -> Result<()>;

    /// Fit the angular velocity only; the linear target is zero.
    fn set_u_to_fit_angular_velocity(&self, state: &State, q: &DVec, w_fm: &Vec3, u: &mut DVec) -> Result<()> {
        self.set_u_to_fit_velocity(state, q, &SpatialVec::angular_only(*w_fm), u)
    }

    /// Fit the linear velocity only; the angular target is zero.
    fn set_u_to_fit_linear_velocity(&self, state: &State, q: &DVec, v_fm: &Vec3, u: &mut DVec) -> Result<()> {
        self.set_u_to_fit_velocity(state, q, &SpatialVec::linear_only(*v_fm), u)
    }

    /// Mobility forces `τ = Hᵀ f` equivalent to the spatial force `force_fm`
    /// acting across the joint (in F, about F's origin).
    fn internal_force(&self, state: &State, force_fm: &SpatialVec, tau: &mut DVec) -> Result<()> {
        state.require_stage(Stage::Position)?;
        let s = self.slots();
        let h = &state.position_cache.h_fm[s.body.index()];
        let t = h.transpose() * force_fm.data;
        s.u_slice_mut(tau).copy_from_slice(t.as_slice());
        Ok(())
    }

    /// Precompute sines and cosines of angle coordinates and normalized
    /// quaternions into the Position cache vectors.
    fn calc_joint_sin_cos_q_norm(
        &self,
        mv: &ModelVars,
        q: &DVec,
        sine: &mut DVec,
        cosine: &mut DVec,
        q_err: &mut DVec,
        qnorm: &mut DVec,
    );

    fn realize_model(&self, _state: &mut State) -> Result<()> {
        Ok(())
    }

    fn realize_instance(&self, _state: &mut State) -> Result<()> {
        Ok(())
    }

    fn realize_time(&self, _state: &mut State) -> Result<()> {
        Ok(())
    }

    fn realize_position(&self, state: &mut State) -> Result<()> {
        realize_position_base(self, state);
        Ok(())
    }

    fn realize_velocity(&self, state: &mut State) -> Result<()> {
        realize_velocity_base(self, state);
        Ok(())
    }

    fn realize_dynamics(&self, state: &mut State) -> Result<()> {
        realize_dynamics_base(self, state);
        Ok(())
    }

    fn realize_acceleration(&self, _state: &mut State) -> Result<()> {
        Ok(())
    }

    fn realize_report(&self, _state: &mut State) -> Result<()> {
        Ok(())
    }

    /// `X_FM`, accounting for reversal.
    fn calc_x_fm(&self, state: &State, q: &DVec) -> SpatialTransform {
        let x = self.calc_across_joint_transform(state, q);
        if self.slots().reversed { x.inverse() } else { x }
    }

    /// `H_FM`, accounting for reversal.
    fn calc_h_fm(&self, state: &State) -> HMatrix {
        let h = self.calc_across_joint_velocity_jacobian(state);
        if !self.slots().reversed {
            return h;
        }
        let x = self.calc_across_joint_transform(state, &state.q);
        map_columns(&h, |_, col| -x.apply_motion(&col))
    }

    /// `Ḣ_FM`, accounting for reversal.
    fn calc_h_dot_fm(&self, state: &State) -> HMatrix {
        let h_dot = self.calc_across_joint_velocity_jacobian_dot(state);
        if !self.slots().reversed {
            return h_dot;
        }
        // M0 moves relative to F0 with v_m, so d/dt(X h) = X ḣ - v_m ×ₘ X h
        let x = self.calc_across_joint_transform(state, &state.q);
        let h = self.calc_across_joint_velocity_jacobian(state);
        let s = self.slots();
        let v_m = x.apply_motion(&SpatialVec::from(&h * state.u.rows(s.u_index.index(), s.nu)));
        map_columns(&h_dot, |i, col| {
            let xh = x.apply_motion(&h_column(&h, i));
            -(x.apply_motion(&col) - v_m.cross_motion(&xh))
        })
    }

    /// Set `q` from a target `X_FM`, accounting for reversal.
    fn fit_q_to_x_fm(&self, state: &State, x_fm: &SpatialTransform, q: &mut DVec) -> Result<()> {
        if self.slots().reversed {
            self.set_q_to_fit_transform(state, &x_fm.inverse(), q)
        } else {
            self.set_q_to_fit_transform(state, x_fm, q)
        }
    }

    /// Set `u` from a target `V_FM`, accounting for reversal.
    fn fit_u_to_v_fm(&self, state: &State, v_fm: &SpatialVec, u: &mut DVec) -> Result<()> {
        if self.slots().reversed {
            let x = self.calc_across_joint_transform(state, &state.q);
            self.set_u_to_fit_velocity(state, &state.q, &-x.inv_apply_motion(v_fm), u)
        } else {
            self.set_u_to_fit_velocity(state, &state.q, v_fm, u)
        }
    }
}

/// Position-stage caching shared by every node: `X_FM`, `H_FM` and the
/// trigonometric/quaternion precomputations.
pub fn realize_position_base<N: MobilizerNode + ?Sized>(node: &N, state: &mut State) {
    let body = node.slots().body.index();
    let x_fm = node.calc_x_fm(state, &state.q);
    let h_fm = node.calc_h_fm(state);
    let mv = *state.model_vars();
    let pc = &mut state.position_cache;
    node.calc_joint_sin_cos_q_norm(
        &mv,
        &state.q,
        &mut pc.sine,
        &mut pc.cosine,
        &mut pc.q_err,
        &mut pc.qnorm,
    );
    pc.x_fm[body] = x_fm;
    pc.h_fm[body] = h_fm;
    tracing::trace!(body, kind = node.type_name(), "cached across-joint transform");
}

/// Velocity-stage caching shared by every node: `V_FM = H u` and `Ḣ_FM`.
pub fn realize_velocity_base<N: MobilizerNode + ?Sized>(node: &N, state: &mut State) {
    let s = node.slots();
    let body = s.body.index();
    let v_fm = SpatialVec::from(
        &state.position_cache.h_fm[body] * state.u.rows(s.u_index.index(), s.nu),
    );
    let h_dot = node.calc_h_dot_fm(state);
    state.velocity_cache.v_fm[body] = v_fm;
    state.velocity_cache.h_dot_fm[body] = h_dot;
}

/// Dynamics-stage caching shared by every node: the `nu × nu` mobility
/// inertia `Sᵀ I S` of the body alone, with `S` the Jacobian in body
/// coordinates.
pub fn realize_dynamics_base<N: MobilizerNode + ?Sized>(node: &N, state: &mut State) {
    let s = node.slots();
    let body = s.body.index();
    let x_fb = s.x_fb(&state.position_cache.x_fm[body]);
    let s_b = map_columns(&state.position_cache.h_fm[body], |_, col| x_fb.apply_motion(&col));
    let block = s_b.transpose() * s.mass_props.to_matrix() * &s_b;
    let start = s.usq_index.index();
    state
        .dynamics_cache
        .mobility_inertia
        .rows_mut(start, s.nu * s.nu)
        .copy_from_slice(block.as_slice());
}
