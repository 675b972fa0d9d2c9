//! User-defined mobilizers.
//!
//! A [`CustomImplementation`] supplies a handful of elementary operators
//! (`N`, `N⁻¹`, `Ṅ`, the transform from `q`, `H·u` and `Ḣ·u`);
//! [`CustomNode`] composes them into the full [`MobilizerNode`] contract so a
//! user joint is indistinguishable from a built-in one during traversal.

use std::fmt;
use std::sync::Arc;

use mobilis_math::{DVec, HMatrix, Quat, SpatialTransform, SpatialVec};
use nalgebra::SVector;

use crate::error::{MobilizerError, Result};
use crate::index::{MobilizerQIndex, SlotCursor};
use crate::node::{
    AngleSpan, MobilizerNode, NodeSlots, NodeSpec, QDotPolicy, QuaternionPolicy,
    realize_dynamics_base, realize_position_base, realize_velocity_base,
};
use crate::state::{ModelVars, State};

/// Read-only view handed to every [`CustomImplementation`] call.
#[derive(Debug, Clone, Copy)]
pub struct CustomContext<'a> {
    /// The full state.
    pub state: &'a State,
    /// This joint's in-use position coordinates.
    pub q: &'a [f64],
    /// This joint's velocity coordinates.
    pub u: &'a [f64],
}

impl CustomContext<'_> {
    /// True when a quaternion-capable joint is storing Euler angles.
    pub fn use_euler_angles(&self) -> bool {
        self.state.use_euler_angles()
    }
}

/// The operators a user-defined joint must provide.
///
/// Buffers passed in are sized exactly: `N` maps `nu` → `nq_in_use` values
/// (`nq_in_use` → `nu` when `matrix_on_right`), `N⁻¹` the other way round, and
/// `Ṅ` like `N`, evaluated at `ctx.u`. Operators an implementation cannot
/// provide should return [`MobilizerError::Unsupported`].
pub trait CustomImplementation: fmt::Debug {
    /// Velocity DOFs.
    fn nu(&self) -> usize;

    /// Position slots (quaternion mode when `num_angles() == 4`).
    fn nq(&self) -> usize;

    /// 0 to 3 leading coordinates are literal angles; 4 means a leading
    /// quaternion that becomes three body-fixed XYZ angles in Euler mode.
    fn num_angles(&self) -> usize;

    /// `X_F0M0` from this joint's in-use coordinates. Quaternions arrive
    /// normalized.
    fn transform_from_q(&self, ctx: &CustomContext<'_>, q: &[f64]) -> SpatialTransform;

    /// `V_F0M0 = H u`.
    fn multiply_by_h(&self, ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec;

    /// `Ḣ u`, with `Ḣ` evaluated at `ctx.u`.
    fn multiply_by_h_dot(&self, ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec;

    fn multiply_by_n(
        &self,
        ctx: &CustomContext<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    fn multiply_by_n_inv(
        &self,
        ctx: &CustomContext<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    fn multiply_by_n_dot(
        &self,
        ctx: &CustomContext<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) -> Result<()>;

    /// Write in-use coordinates best reproducing `x_fm`.
    fn set_q_to_fit_transform(
        &self,
        _ctx: &CustomContext<'_>,
        _x_fm: &SpatialTransform,
        _q: &mut [f64],
    ) -> Result<()> {
        Err(MobilizerError::Unsupported(
            "set_q_to_fit_transform is not provided by this joint".into(),
        ))
    }

    /// Write velocities best reproducing `v_fm`.
    fn set_u_to_fit_velocity(
        &self,
        _ctx: &CustomContext<'_>,
        _v_fm: &SpatialVec,
        _u: &mut [f64],
    ) -> Result<()> {
        Err(MobilizerError::Unsupported(
            "set_u_to_fit_velocity is not provided by this joint".into(),
        ))
    }

    fn realize_model(&self, _state: &mut State) -> Result<()> {
        Ok(())
    }

    fn realize_instance(&self, _state: &State) -> Result<()> {
        Ok(())
    }

    fn realize_time(&self, _state: &State) -> Result<()> {
        Ok(())
    }

    fn realize_position(&self, _state: &State) -> Result<()> {
        Ok(())
    }

    fn realize_velocity(&self, _state: &State) -> Result<()> {
        Ok(())
    }

    fn realize_dynamics(&self, _state: &State) -> Result<()> {
        Ok(())
    }

    fn realize_acceleration(&self, _state: &State) -> Result<()> {
        Ok(())
    }

    fn realize_report(&self, _state: &State) -> Result<()> {
        Ok(())
    }
}

/// Adapter running a [`CustomImplementation`] with `NU` velocity DOFs.
#[derive(Debug, Clone)]
pub struct CustomNode<const NU: usize> {
    slots: NodeSlots,
    implementation: Arc<dyn CustomImplementation>,
    nq: usize,
    num_angles: usize,
}

impl<const NU: usize> CustomNode<NU> {
    /// Query the implementation's dimensions and reserve its slots.
    pub fn new(
        implementation: Arc<dyn CustomImplementation>,
        spec: NodeSpec,
        cursor: &mut SlotCursor,
    ) -> Result<Self> {
        let found = implementation.nu();
        if found != NU {
            return Err(MobilizerError::DimensionMismatch { expected: NU, found });
        }
        let nq = implementation.nq();
        let num_angles = implementation.num_angles();
        if num_angles > 4 {
            return Err(MobilizerError::InvalidAngleCount(num_angles));
        }
        if nq < num_angles {
            return Err(MobilizerError::InvalidCoordinateCount { nq, num_angles });
        }
        let quaternion_policy = if num_angles == 4 {
            QuaternionPolicy::MayBeUsed
        } else {
            QuaternionPolicy::NeverUsed
        };
        let slots = NodeSlots::allocate(
            spec,
            nq,
            NU,
            QDotPolicy::MayDifferFromU,
            quaternion_policy,
            cursor,
        );
        Ok(Self {
            slots,
            implementation,
            nq,
            num_angles,
        })
    }

    /// The wrapped implementation.
    pub fn implementation(&self) -> &Arc<dyn CustomImplementation> {
        &self.implementation
    }

    pub fn num_angles(&self) -> usize {
        self.num_angles
    }

    fn context<'a>(&self, state: &'a State, q: &'a [f64]) -> CustomContext<'a> {
        CustomContext {
            state,
            q,
            u: self.slots.u_slice(&state.u),
        }
    }

    fn state_context<'a>(&self, state: &'a State) -> CustomContext<'a> {
        let q = self.slots.q_slice(&state.q, self.nq_in_use(state.model_vars()));
        self.context(state, q)
    }

    /// Probe `op` with each unit velocity to assemble a Jacobian.
    fn columns_of(&self, op: impl Fn(&[f64]) -> SpatialVec) -> HMatrix {
        let mut h = HMatrix::zeros(NU);
        for i in 0..NU {
            let mut e = SVector::<f64, NU>::zeros();
            e[i] = 1.0;
            h.set_column(i, &op(e.as_slice()).data);
        }
        h
    }
}

impl<const NU: usize> MobilizerNode for CustomNode<NU> {
    fn type_name(&self) -> &'static str {
        "custom"
    }

    fn slots(&self) -> &NodeSlots {
        &self.slots
    }

    fn max_nq(&self) -> usize {
        self.nq
    }

    fn nq_in_use(&self, mv: &ModelVars) -> usize {
        if self.num_angles == 4 && mv.use_euler_angles {
            self.nq - 1
        } else {
            self.nq
        }
    }

    fn nu_in_use(&self, _mv: &ModelVars) -> usize {
        NU
    }

    fn is_using_quaternion(&self, state: &State) -> Option<MobilizerQIndex> {
        (self.num_angles == 4 && !state.use_euler_angles()).then_some(MobilizerQIndex(0))
    }

    fn is_using_angles(&self, state: &State) -> Option<AngleSpan> {
        if self.num_angles == 0 || (self.num_angles == 4 && !state.use_euler_angles()) {
            return None;
        }
        Some(AngleSpan {
            start: MobilizerQIndex(0),
            count: self.num_angles.min(3),
        })
    }

    fn calc_across_joint_transform(&self, state: &State, q: &DVec) -> SpatialTransform {
        let nq = self.nq_in_use(state.model_vars());
        let mut local = self.slots.q_slice(q, nq).to_vec();
        if self.is_using_quaternion(state).is_some() {
            Quat::from_slice(&local).normalize().write_to(&mut local);
        }
        let ctx = self.context(state, &local);
        self.implementation.transform_from_q(&ctx, &local)
    }

    fn calc_across_joint_velocity_jacobian(&self, state: &State) -> HMatrix {
        let ctx = self.state_context(state);
        self.columns_of(|e| self.implementation.multiply_by_h(&ctx, e))
    }

    fn calc_across_joint_velocity_jacobian_dot(&self, state: &State) -> HMatrix {
        let ctx = self.state_context(state);
        self.columns_of(|e| self.implementation.multiply_by_h_dot(&ctx, e))
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
        let nq = self.nq_in_use(state.model_vars());
        let (n_in, n_out) = if matrix_on_right { (nq, NU) } else { (NU, nq) };
        debug_assert_eq!(input.len(), n_in);
        debug_assert_eq!(out.len(), n_out);
        let ctx = self.context(state, q);
        self.implementation.multiply_by_n(&ctx, matrix_on_right, input, out)
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
        let nq = self.nq_in_use(state.model_vars());
        let (n_in, n_out) = if matrix_on_right { (NU, nq) } else { (nq, NU) };
        debug_assert_eq!(input.len(), n_in);
        debug_assert_eq!(out.len(), n_out);
        let ctx = self.context(state, q);
        self.implementation.multiply_by_n_inv(&ctx, matrix_on_right, input, out)
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
        let nq = self.nq_in_use(state.model_vars());
        let (n_in, n_out) = if matrix_on_right { (nq, NU) } else { (NU, nq) };
        debug_assert_eq!(input.len(), n_in);
        debug_assert_eq!(out.len(), n_out);
        debug_assert_eq!(u.len(), NU);
        let ctx = CustomContext { state, q, u };
        self.implementation.multiply_by_n_dot(&ctx, matrix_on_right, input, out)
    }

    fn set_q_to_fit_transform(&self, state: &State, x_fm: &SpatialTransform, q: &mut DVec) -> Result<()> {
        let nq = self.nq_in_use(state.model_vars());
        let ctx = self.state_context(state);
        self.implementation
            .set_q_to_fit_transform(&ctx, x_fm, self.slots.q_slice_mut(q, nq))
    }

    fn set_u_to_fit_velocity(&self, state: &State, q: &DVec, v_fm: &SpatialVec, u: &mut DVec) -> Result<()> {
        let nq = self.nq_in_use(state.model_vars());
        let ctx = self.context(state, self.slots.q_slice(q, nq));
        self.implementation
            .set_u_to_fit_velocity(&ctx, v_fm, self.slots.u_slice_mut(u))
    }

    fn internal_force(&self, _state: &State, _force_fm: &SpatialVec, _tau: &mut DVec) -> Result<()> {
        Err(MobilizerError::NotImplemented {
            mobilizer: "custom",
            operation: "internal_force",
        })
    }

    fn calc_joint_sin_cos_q_norm(
        &self,
        _mv: &ModelVars,
        _q: &DVec,
        _sine: &mut DVec,
        _cosine: &mut DVec,
        _q_err: &mut DVec,
        _qnorm: &mut DVec,
    ) {
    }

    fn realize_model(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_model(state)
    }

    fn realize_instance(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_instance(state)
    }

    fn realize_time(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_time(state)
    }

    // The implementation sees Position and Velocity before the shared
    // caching, which calls back into it through transform_from_q and H.
    fn realize_position(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_position(state)?;
        realize_position_base(self, state);
        Ok(())
    }

    fn realize_velocity(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_velocity(state)?;
        realize_velocity_base(self, state);
        Ok(())
    }

    fn realize_dynamics(&self, state: &mut State) -> Result<()> {
        realize_dynamics_base(self, state);
        self.implementation.realize_dynamics(state)
    }

    fn realize_acceleration(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_acceleration(state)
    }

    fn realize_report(&self, state: &mut State) -> Result<()> {
        self.implementation.realize_report(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BodyIndex;
    use approx::assert_relative_eq;
    use mobilis_math::{Mat3, SpatialInertia, Vec3, euler};
    use std::cell::RefCell;

    const EPS: f64 = 1e-12;

    /// Ball joint: quaternion or body-fixed XYZ angles, `u` = ω in F.
    #[derive(Debug, Default)]
    struct QuatBall {
        log: RefCell<Vec<String>>,
    }

    impl QuatBall {
        fn n(ctx: &CustomContext<'_>) -> mobilis_math::DMat {
            let q = ctx.q;
            if ctx.use_euler_angles() {
                let n = euler::rates_from_angular_velocity(&Vec3::new(q[0], q[1], q[2]));
                mobilis_math::DMat::from_column_slice(3, 3, n.as_slice())
            } else {
                let n = Quat::from_slice(q).rate_from_angular_velocity();
                mobilis_math::DMat::from_column_slice(4, 3, n.as_slice())
            }
        }
    }

    fn apply(m: &mobilis_math::DMat, right: bool, input: &[f64], out: &mut [f64]) {
        let x = DVec::from_column_slice(input);
        let y = if right { m.tr_mul(&x) } else { m * x };
        out.copy_from_slice(y.as_slice());
    }

    impl CustomImplementation for QuatBall {
        fn nu(&self) -> usize {
            3
        }
        fn nq(&self) -> usize {
            4
        }
        fn num_angles(&self) -> usize {
            4
        }

        fn transform_from_q(&self, ctx: &CustomContext<'_>, q: &[f64]) -> SpatialTransform {
            let r = if ctx.use_euler_angles() {
                euler::body_fixed_xyz_to_matrix(&Vec3::new(q[0], q[1], q[2]))
            } else {
                Quat::from_slice(q).to_matrix()
            };
            SpatialTransform::from_rotation(r)
        }

        fn multiply_by_h(&self, _ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec {
            SpatialVec::angular_only(Vec3::new(u[0], u[1], u[2]))
        }

        fn multiply_by_h_dot(&self, _ctx: &CustomContext<'_>, _u: &[f64]) -> SpatialVec {
            SpatialVec::zero()
        }

        fn multiply_by_n(&self, ctx: &CustomContext<'_>, right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            apply(&Self::n(ctx), right, input, out);
            Ok(())
        }

        fn multiply_by_n_inv(&self, ctx: &CustomContext<'_>, right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            if right {
                return Err(MobilizerError::Unsupported("row-vector N⁻¹".into()));
            }
            let q = ctx.q;
            let x = if ctx.use_euler_angles() {
                euler::angular_velocity_from_rates(&Vec3::new(q[0], q[1], q[2]))
                    * Vec3::new(input[0], input[1], input[2])
            } else {
                Quat::from_slice(q).angular_velocity_from_rate()
                    * mobilis_math::Vec4::from_column_slice(input)
            };
            out.copy_from_slice(x.as_slice());
            Ok(())
        }

        fn multiply_by_n_dot(&self, ctx: &CustomContext<'_>, right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            let q = ctx.q;
            let w = Vec3::new(ctx.u[0], ctx.u[1], ctx.u[2]);
            let n_dot = if ctx.use_euler_angles() {
                let angles = Vec3::new(q[0], q[1], q[2]);
                let rates = euler::rates_from_angular_velocity(&angles) * w;
                let m = euler::rates_from_angular_velocity_dot(&angles, &rates);
                mobilis_math::DMat::from_column_slice(3, 3, m.as_slice())
            } else {
                let qdot = Quat::from_slice(q).rate_from_angular_velocity() * w;
                let m = Quat::from_vec4(&qdot).rate_from_angular_velocity();
                mobilis_math::DMat::from_column_slice(4, 3, m.as_slice())
            };
            apply(&n_dot, right, input, out);
            Ok(())
        }

        fn set_q_to_fit_transform(&self, ctx: &CustomContext<'_>, x_fm: &SpatialTransform, q: &mut [f64]) -> Result<()> {
            let r = x_fm.pose_rotation();
            if ctx.use_euler_angles() {
                q.copy_from_slice(euler::matrix_to_body_fixed_xyz(&r).as_slice());
            } else {
                Quat::from_matrix(&r).write_to(q);
            }
            Ok(())
        }

        fn realize_model(&self, _state: &mut State) -> Result<()> {
            self.log.borrow_mut().push("model".into());
            Ok(())
        }
        fn realize_instance(&self, _state: &State) -> Result<()> {
            self.log.borrow_mut().push("instance".into());
            Ok(())
        }
        fn realize_time(&self, _state: &State) -> Result<()> {
            self.log.borrow_mut().push("time".into());
            Ok(())
        }
        fn realize_position(&self, state: &State) -> Result<()> {
            let cached = state.position_cache.x_fm[1] != SpatialTransform::identity();
            self.log.borrow_mut().push(format!("position cached={cached}"));
            Ok(())
        }
        fn realize_velocity(&self, state: &State) -> Result<()> {
            let cached = state.velocity_cache.v_fm[1] != SpatialVec::zero();
            self.log.borrow_mut().push(format!("velocity cached={cached}"));
            Ok(())
        }
        fn realize_dynamics(&self, state: &State) -> Result<()> {
            let cached = state.dynamics_cache.mobility_inertia.norm() > 0.0;
            self.log.borrow_mut().push(format!("dynamics cached={cached}"));
            Ok(())
        }
        fn realize_acceleration(&self, _state: &State) -> Result<()> {
            self.log.borrow_mut().push("acceleration".into());
            Ok(())
        }
        fn realize_report(&self, _state: &State) -> Result<()> {
            self.log.borrow_mut().push("report".into());
            Ok(())
        }
    }

    /// Rotation about z; the only coordinate is not flagged as an angle.
    #[derive(Debug)]
    struct ZPin;

    impl CustomImplementation for ZPin {
        fn nu(&self) -> usize {
            1
        }
        fn nq(&self) -> usize {
            1
        }
        fn num_angles(&self) -> usize {
            0
        }
        fn transform_from_q(&self, _ctx: &CustomContext<'_>, q: &[f64]) -> SpatialTransform {
            SpatialTransform::rot_z(q[0])
        }
        fn multiply_by_h(&self, _ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec {
            SpatialVec::angular_only(Vec3::z() * u[0])
        }
        fn multiply_by_h_dot(&self, _ctx: &CustomContext<'_>, _u: &[f64]) -> SpatialVec {
            SpatialVec::zero()
        }
        fn multiply_by_n(&self, _ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            out.copy_from_slice(input);
            Ok(())
        }
        fn multiply_by_n_inv(&self, _ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            out.copy_from_slice(input);
            Ok(())
        }
        fn multiply_by_n_dot(&self, _ctx: &CustomContext<'_>, _right: bool, _input: &[f64], out: &mut [f64]) -> Result<()> {
            out.fill(0.0);
            Ok(())
        }
    }

    /// Screw about z: rotation `q` with translation `pitch·q`, plus a
    /// trailing slider coordinate along x. Exercises a non-trivial `Ḣ`.
    #[derive(Debug)]
    struct Screw {
        pitch: f64,
    }

    impl CustomImplementation for Screw {
        fn nu(&self) -> usize {
            2
        }
        fn nq(&self) -> usize {
            2
        }
        fn num_angles(&self) -> usize {
            1
        }
        fn transform_from_q(&self, _ctx: &CustomContext<'_>, q: &[f64]) -> SpatialTransform {
            let r = SpatialTransform::rot_z(q[0]).pose_rotation();
            SpatialTransform::from_pose(r, Vec3::new(q[1], 0.0, self.pitch * q[0]))
        }
        fn multiply_by_h(&self, ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec {
            let p = Vec3::new(ctx.q[1], 0.0, self.pitch * ctx.q[0]);
            let w = Vec3::z() * u[0];
            let p_dot = Vec3::new(u[1], 0.0, self.pitch * u[0]);
            SpatialVec::new(w, p_dot - w.cross(&p))
        }
        fn multiply_by_h_dot(&self, ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec {
            // only the -ω × p term varies with time
            let p_dot = Vec3::new(ctx.u[1], 0.0, self.pitch * ctx.u[0]);
            let w = Vec3::z() * u[0];
            SpatialVec::linear_only(-w.cross(&p_dot))
        }
        fn multiply_by_n(&self, _ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            out.copy_from_slice(input);
            Ok(())
        }
        fn multiply_by_n_inv(&self, _ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            out.copy_from_slice(input);
            Ok(())
        }
        fn multiply_by_n_dot(&self, _ctx: &CustomContext<'_>, _right: bool, _input: &[f64], out: &mut [f64]) -> Result<()> {
            out.fill(0.0);
            Ok(())
        }
    }

    fn spec() -> NodeSpec {
        NodeSpec::new(BodyIndex(1), SpatialInertia::sphere(2.0, 0.5))
    }

    fn ball() -> (Arc<QuatBall>, CustomNode<3>, State) {
        let implementation = Arc::new(QuatBall::default());
        let mut cursor = SlotCursor::new();
        let node = CustomNode::<3>::new(implementation.clone(), spec(), &mut cursor).unwrap();
        assert_eq!(cursor.next_q.index(), 4);
        assert_eq!(cursor.next_usq.index(), 9);
        let mut state = State::new(4, 3, 9, 2, ModelVars::default());
        state.q.copy_from_slice(&Quat::from_axis_angle(&Vec3::new(1.0, 2.0, -1.0).normalize(), 0.7).as_vec4().as_slice());
        (implementation, node, state)
    }

    #[test]
    fn test_construction_checks_dimensions() {
        let mut cursor = SlotCursor::new();
        let err = CustomNode::<2>::new(Arc::new(ZPin), spec(), &mut cursor).unwrap_err();
        assert_eq!(err, MobilizerError::DimensionMismatch { expected: 2, found: 1 });
        // a failed construction reserves nothing
        assert_eq!(cursor, SlotCursor::new());
    }

    #[test]
    fn test_ball_mode_queries() {
        let (_, node, mut state) = ball();
        assert_eq!(node.max_nq(), 4);
        assert_eq!(node.nq_in_use(state.model_vars()), 4);
        assert_eq!(node.nu_in_use(state.model_vars()), 3);
        assert_eq!(node.is_using_quaternion(&state), Some(MobilizerQIndex(0)));
        assert_eq!(node.is_using_angles(&state), None);

        state.model_vars_mut().use_euler_angles = true;
        assert_eq!(node.nq_in_use(state.model_vars()), 3);
        assert_eq!(node.is_using_quaternion(&state), None);
        assert_eq!(
            node.is_using_angles(&state),
            Some(AngleSpan {
                start: MobilizerQIndex(0),
                count: 3
            })
        );
    }

    #[test]
    fn test_pin_never_quaternion_or_angles() {
        let mut cursor = SlotCursor::new();
        let node = CustomNode::<1>::new(Arc::new(ZPin), spec(), &mut cursor).unwrap();
        let mut state = State::new(1, 1, 1, 2, ModelVars::default());
        state.q[0] = 0.3;
        for use_euler in [false, true] {
            state.model_vars_mut().use_euler_angles = use_euler;
            assert_eq!(node.nq_in_use(state.model_vars()), 1);
            assert!(node.is_using_quaternion(&state).is_none());
            assert!(node.is_using_angles(&state).is_none());
            let mut q = state.q.clone();
            let mut q_err = DVec::from_element(1, 0.5);
            assert!(!node.enforce_quaternion_constraints(&state, &mut q, &mut q_err));
            assert_eq!(q, state.q);
            assert_eq!(q_err[0], 0.5);
        }
    }

    #[test]
    fn test_transform_uses_normalized_quaternion() {
        let (_, node, mut state) = ball();
        let unit = node.calc_across_joint_transform(&state, &state.q);
        state.q *= 3.0;
        let scaled = node.calc_across_joint_transform(&state, &state.q);
        assert_relative_eq!(unit.rot, scaled.rot, epsilon = EPS);
        // the caller's vector is untouched
        assert_relative_eq!(Quat::from_slice(state.q.as_slice()).norm(), 3.0, epsilon = EPS);
    }

    #[test]
    fn test_jacobian_columns_are_unit_responses() {
        let mut cursor = SlotCursor::new();
        let screw = Screw { pitch: 0.25 };
        let node = CustomNode::<2>::new(Arc::new(Screw { pitch: 0.25 }), spec(), &mut cursor).unwrap();
        let mut state = State::new(2, 2, 4, 2, ModelVars::default());
        state.q.copy_from_slice(&[0.8, -1.5]);
        state.u.copy_from_slice(&[2.0, 0.5]);
        let h = node.calc_across_joint_velocity_jacobian(&state);
        assert_eq!(h.ncols(), 2);
        let ctx = CustomContext {
            state: &state,
            q: state.q.as_slice(),
            u: state.u.as_slice(),
        };
        for (i, e) in [[1.0, 0.0], [0.0, 1.0]].iter().enumerate() {
            assert_relative_eq!(h.column(i).into_owned(), screw.multiply_by_h(&ctx, e).data, epsilon = EPS);
        }
        // H·u reproduces the implementation's velocity
        let v = &h * &state.u;
        assert_relative_eq!(v, screw.multiply_by_h(&ctx, state.u.as_slice()).data, epsilon = EPS);

        // Ḣ matches a finite difference of H along the motion
        let dt = 1e-7;
        let mut moved = state.clone();
        moved.q += &state.u * dt;
        let fd = (node.calc_across_joint_velocity_jacobian(&moved) - &h) / dt;
        let h_dot = node.calc_across_joint_velocity_jacobian_dot(&state);
        assert_relative_eq!(fd, h_dot, epsilon = 1e-6);
    }

    #[test]
    fn test_screw_reports_one_angle() {
        let mut cursor = SlotCursor::new();
        let node = CustomNode::<2>::new(Arc::new(Screw { pitch: 1.0 }), spec(), &mut cursor).unwrap();
        let state = State::new(2, 2, 4, 2, ModelVars::default());
        assert_eq!(node.is_using_angles(&state).map(|a| a.count), Some(1));
        assert!(node.set_q_to_fit_transform(&state, &SpatialTransform::identity(), &mut DVec::zeros(2)).is_err());
    }

    #[test]
    fn test_qdot_then_n_inv_recovers_u() {
        for use_euler in [false, true] {
            let (_, node, mut state) = ball();
            if use_euler {
                let mut q = DVec::zeros(4);
                node.convert_to_euler_angles(&state.q, &mut q);
                state.model_vars_mut().use_euler_angles = true;
                state.q = q;
            }
            state.u.copy_from_slice(&[0.4, -1.1, 2.3]);
            let nq = node.nq_in_use(state.model_vars());
            let mut qdot = DVec::zeros(4);
            node.calc_qdot(&state, &state.u, &mut qdot).unwrap();
            if use_euler {
                assert_eq!(qdot[3], 0.0);
            }
            let mut u = [0.0; 3];
            let q = node.slots().q_slice(&state.q, nq);
            node.multiply_by_n_inv(&state, true, q, false, &qdot.as_slice()[..nq], &mut u)
                .unwrap();
            assert_relative_eq!(u.as_slice(), state.u.as_slice(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_unsupported_operator_surfaces() {
        let (_, node, state) = ball();
        let q = node.slots().q_slice(&state.q, 4);
        let err = node
            .multiply_by_n_inv(&state, false, q, true, &[0.0; 3], &mut [0.0; 4])
            .unwrap_err();
        assert!(matches!(err, MobilizerError::Unsupported(_)));
    }

    #[test]
    fn test_qdotdot_adds_n_dot_term() {
        let (_, node, mut state) = ball();
        state.u.copy_from_slice(&[1.0, 0.5, -0.25]);
        let udot = DVec::from_column_slice(&[0.3, 0.0, -0.7]);
        let mut qdotdot = DVec::zeros(4);
        node.calc_qdotdot(&state, &udot, &mut qdotdot).unwrap();

        let q = node.slots().q_slice(&state.q, 4);
        let mut n_udot = [0.0; 4];
        node.multiply_by_n(&state, false, q, false, udot.as_slice(), &mut n_udot).unwrap();
        let mut n_dot_u = [0.0; 4];
        let u = state.u.as_slice();
        node.multiply_by_n_dot(&state, false, q, u, false, u, &mut n_dot_u).unwrap();
        for i in 0..4 {
            assert_relative_eq!(qdotdot[i], n_udot[i] + n_dot_u[i], epsilon = EPS);
        }
        // second derivative of a unit quaternion: q·q̈ = -|q̇|²
        let mut qdot = DVec::zeros(4);
        node.calc_qdot(&state, &state.u, &mut qdot).unwrap();
        assert_relative_eq!(state.q.dot(&qdotdot), -qdot.norm_squared(), epsilon = 1e-10);
    }

    #[test]
    fn test_enforce_quaternion_constraints() {
        let (_, node, state) = ball();
        let mut q = DVec::from_column_slice(&[0.9, 0.3, -0.6, 1.2]);
        let mut q_err = DVec::from_column_slice(&[1e-3, -2e-3, 5e-4, 7e-4]);
        assert!(node.enforce_quaternion_constraints(&state, &mut q, &mut q_err));
        assert_relative_eq!(q.norm(), 1.0, epsilon = EPS);
        assert_relative_eq!(q.dot(&q_err), 0.0, epsilon = EPS);

        // an empty error estimate is allowed
        let mut q = DVec::from_column_slice(&[2.0, 0.0, 0.0, 0.0]);
        assert!(node.enforce_quaternion_constraints(&state, &mut q, &mut DVec::zeros(0)));
        assert_relative_eq!(q[0], 1.0, epsilon = EPS);

        let mut euler_state = state.clone();
        euler_state.model_vars_mut().use_euler_angles = true;
        let before = q.clone();
        assert!(!node.enforce_quaternion_constraints(&euler_state, &mut q, &mut DVec::zeros(0)));
        assert_eq!(q, before);
    }

    #[test]
    fn test_conversion_roundtrip() {
        let (_, node, state) = ball();
        let mut angles = DVec::zeros(4);
        node.convert_to_euler_angles(&state.q, &mut angles);
        assert_eq!(angles[3], 0.0);
        let r = euler::body_fixed_xyz_to_matrix(&Vec3::new(angles[0], angles[1], angles[2]));
        assert_relative_eq!(r, Quat::from_slice(state.q.as_slice()).to_matrix(), epsilon = 1e-10);

        let mut back = DVec::zeros(4);
        node.convert_to_quaternions(&angles, &mut back);
        let same = (&back - &state.q).norm() < 1e-10;
        let flipped = (&back + &state.q).norm() < 1e-10;
        assert!(same || flipped, "q = {}, back = {}", state.q, back);
    }

    #[test]
    fn test_non_quaternion_conversion_copies() {
        let mut cursor = SlotCursor::new();
        let node = CustomNode::<2>::new(Arc::new(Screw { pitch: 1.0 }), spec(), &mut cursor).unwrap();
        let q = DVec::from_column_slice(&[0.3, -4.0]);
        let mut out = DVec::zeros(2);
        node.convert_to_euler_angles(&q, &mut out);
        assert_eq!(out, q);
        node.convert_to_quaternions(&q, &mut out);
        assert_eq!(out, q);
    }

    #[test]
    fn test_internal_force_not_implemented() {
        let (_, node, state) = ball();
        let err = node
            .internal_force(&state, &SpatialVec::zero(), &mut DVec::zeros(3))
            .unwrap_err();
        assert_eq!(
            err,
            MobilizerError::NotImplemented {
                mobilizer: "custom",
                operation: "internal_force"
            }
        );
    }

    #[test]
    fn test_sin_cos_is_noop() {
        let (_, node, mut state) = ball();
        node.realize_position(&mut state).unwrap();
        assert_eq!(state.position_cache.qnorm.norm(), 0.0);
        assert_eq!(state.position_cache.sine.norm(), 0.0);
    }

    #[test]
    fn test_realize_hook_order() {
        let (implementation, node, mut state) = ball();
        state.u.copy_from_slice(&[0.1, 0.2, 0.3]);
        node.realize_model(&mut state).unwrap();
        node.realize_instance(&mut state).unwrap();
        node.realize_time(&mut state).unwrap();
        node.realize_position(&mut state).unwrap();
        node.realize_velocity(&mut state).unwrap();
        node.realize_dynamics(&mut state).unwrap();
        node.realize_acceleration(&mut state).unwrap();
        node.realize_report(&mut state).unwrap();
        assert_eq!(
            *implementation.log.borrow(),
            [
                "model",
                "instance",
                "time",
                "position cached=false",
                "velocity cached=false",
                "dynamics cached=true",
                "acceleration",
                "report",
            ]
        );
        // base caching ran after the hooks
        let r = Quat::from_slice(state.q.as_slice()).to_matrix();
        assert_relative_eq!(state.position_cache.x_fm[1].pose_rotation(), r, epsilon = 1e-12);
        assert_relative_eq!(state.velocity_cache.v_fm[1].angular(), Vec3::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_mobility_inertia_block() {
        let (_, node, mut state) = ball();
        node.realize_position(&mut state).unwrap();
        node.realize_dynamics(&mut state).unwrap();
        // a sphere about its center has rotational inertia 2/5 m r² in every direction
        let block = Mat3::from_column_slice(state.dynamics_cache.mobility_inertia.as_slice());
        assert_relative_eq!(block, Mat3::from_diagonal_element(0.2), epsilon = 1e-12);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::index::BodyIndex;
    use mobilis_math::{SpatialInertia, Vec3};
    use proptest::prelude::*;

    /// Euler-angle-only ball: three angle coordinates, no quaternion.
    #[derive(Debug)]
    struct AngleBall;

    impl CustomImplementation for AngleBall {
        fn nu(&self) -> usize {
            3
        }
        fn nq(&self) -> usize {
            3
        }
        fn num_angles(&self) -> usize {
            3
        }
        fn transform_from_q(&self, _ctx: &CustomContext<'_>, q: &[f64]) -> SpatialTransform {
            SpatialTransform::from_rotation(mobilis_math::euler::body_fixed_xyz_to_matrix(&Vec3::from_column_slice(q)))
        }
        fn multiply_by_h(&self, _ctx: &CustomContext<'_>, u: &[f64]) -> SpatialVec {
            SpatialVec::angular_only(Vec3::from_column_slice(u))
        }
        fn multiply_by_h_dot(&self, _ctx: &CustomContext<'_>, _u: &[f64]) -> SpatialVec {
            SpatialVec::zero()
        }
        fn multiply_by_n(&self, ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            let n = mobilis_math::euler::rates_from_angular_velocity(&Vec3::from_column_slice(ctx.q));
            out.copy_from_slice((n * Vec3::from_column_slice(input)).as_slice());
            Ok(())
        }
        fn multiply_by_n_inv(&self, ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            let m = mobilis_math::euler::angular_velocity_from_rates(&Vec3::from_column_slice(ctx.q));
            out.copy_from_slice((m * Vec3::from_column_slice(input)).as_slice());
            Ok(())
        }
        fn multiply_by_n_dot(&self, ctx: &CustomContext<'_>, _right: bool, input: &[f64], out: &mut [f64]) -> Result<()> {
            let angles = Vec3::from_column_slice(ctx.q);
            let rates = mobilis_math::euler::rates_from_angular_velocity(&angles) * Vec3::from_column_slice(ctx.u);
            let n_dot = mobilis_math::euler::rates_from_angular_velocity_dot(&angles, &rates);
            out.copy_from_slice((n_dot * Vec3::from_column_slice(input)).as_slice());
            Ok(())
        }
    }

    fn node() -> CustomNode<3> {
        let mut cursor = SlotCursor::new();
        let spec = NodeSpec::new(BodyIndex(1), SpatialInertia::sphere(1.0, 1.0));
        CustomNode::<3>::new(Arc::new(AngleBall), spec, &mut cursor).unwrap()
    }

    fn arb_angles() -> impl Strategy<Value = [f64; 3]> {
        // stay clear of the cos(b) = 0 singularity
        (-3.0..3.0_f64, -1.2..1.2_f64, -3.0..3.0_f64).prop_map(|(a, b, c)| [a, b, c])
    }

    proptest! {
        #[test]
        fn qdot_then_n_inv_recovers_u(q in arb_angles(), u in prop::array::uniform3(-5.0..5.0_f64)) {
            let node = node();
            let mut state = State::new(3, 3, 9, 2, ModelVars::default());
            state.q.copy_from_slice(&q);
            state.u.copy_from_slice(&u);
            let mut qdot = DVec::zeros(3);
            node.calc_qdot(&state, &state.u, &mut qdot).unwrap();
            let mut back = [0.0; 3];
            node.multiply_by_n_inv(&state, false, &q, false, qdot.as_slice(), &mut back).unwrap();
            for i in 0..3 {
                prop_assert!((back[i] - u[i]).abs() < 1e-10 * (1.0 + u[i].abs()));
            }
        }

        #[test]
        fn qdotdot_is_affine_in_u(
            q in arb_angles(),
            u in prop::array::uniform3(-2.0..2.0_f64),
            du in prop::array::uniform3(-2.0..2.0_f64),
        ) {
            let node = node();
            let mut state = State::new(3, 3, 9, 2, ModelVars::default());
            state.q.copy_from_slice(&q);
            let udot = DVec::from_column_slice(&[0.5, -0.5, 1.0]);
            let qdotdot_at = |u: &[f64]| {
                let mut s = state.clone();
                s.u.copy_from_slice(u);
                let mut out = DVec::zeros(3);
                node.calc_qdotdot(&s, &udot, &mut out).unwrap();
                out
            };
            let n_dot = |at: &[f64], input: &[f64]| {
                let mut out = [0.0; 3];
                node.multiply_by_n_dot(&state, false, &q, at, false, input, &mut out).unwrap();
                Vec3::from(out)
            };
            let shifted: Vec<f64> = u.iter().zip(&du).map(|(a, b)| a + b).collect();
            let delta = qdotdot_at(shifted.as_slice()) - qdotdot_at(&u[..]);
            let expected = n_dot(&u[..], &du[..]) + n_dot(&du[..], &u[..]) + n_dot(&du[..], &du[..]);
            for i in 0..3 {
                prop_assert!((delta[i] - expected[i]).abs() < 1e-8 * (1.0 + expected[i].abs()));
            }
        }
    }
}
