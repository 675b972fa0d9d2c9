//! The multibody tree: body registration and run-time queries.

use std::sync::Arc;

use mobilis_math::{DMat, DVec, Mat3, SpatialInertia, SpatialTransform, SpatialVec, Vec3};
use mobilis_model::{
    BodyIndex, BuiltinKind, BuiltinNode, CustomImplementation, CustomNode, MobilizerNode,
    ModelVars, NodeSpec, QDotPolicy, QIndex, SlotCursor, Stage, State, UIndex,
};
use tracing::{debug, trace, warn};

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::joint::{Joint, Mobilizer};
use crate::kinematics;

/// A tree of rigid bodies, each attached to its parent by one mobilizer.
///
/// Body 0 is ground. Bodies are added parent-first, so body order is a
/// valid traversal order for every recursive pass.
#[derive(Debug)]
pub struct MatterTree {
    config: TreeConfig,
    /// Parent of each body; ground is its own parent.
    parents: Vec<BodyIndex>,
    /// `nodes[i]` moves body `i + 1`.
    nodes: Vec<Box<dyn MobilizerNode>>,
    cursor: SlotCursor,
    constructed: bool,
}

impl Default for MatterTree {
    fn default() -> Self {
        Self::with_config(TreeConfig::default())
    }
}

/// Builder for [`MatterTree`] settings.
#[derive(Debug, Clone, Default)]
pub struct MatterTreeBuilder {
    config: TreeConfig,
}

impl MatterTreeBuilder {
    /// Start from the given settings.
    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    /// Hand out states in Euler-angle mode.
    pub fn use_euler_angles(mut self, use_euler_angles: bool) -> Self {
        self.config.use_euler_angles = use_euler_angles;
        self
    }

    /// Tolerance for [`MatterTree::check_quaternions`].
    pub fn quaternion_tolerance(mut self, tolerance: f64) -> Self {
        self.config.quaternion_tolerance = tolerance;
        self
    }

    pub fn ground_name(mut self, name: &str) -> Self {
        self.config.ground_name = name.to_string();
        self
    }

    pub fn build(self) -> MatterTree {
        MatterTree::with_config(self.config)
    }
}

impl MatterTree {
    /// Empty tree (ground only) with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MatterTreeBuilder {
        MatterTreeBuilder::default()
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            config,
            parents: vec![BodyIndex::GROUND],
            nodes: Vec::new(),
            cursor: SlotCursor::new(),
            constructed: false,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn ground_name(&self) -> &str {
        &self.config.ground_name
    }

    /// Add a body attached to `parent` and return its index.
    ///
    /// `x_pf` locates the mobilizer's fixed frame F on the parent and `x_bm`
    /// its moving frame M on the new body.
    pub fn add_rigid_body(
        &mut self,
        mass_props: SpatialInertia,
        x_bm: SpatialTransform,
        parent: BodyIndex,
        x_pf: SpatialTransform,
        joint: impl Into<Joint>,
    ) -> Result<BodyIndex> {
        if self.constructed {
            return Err(TreeError::AlreadyConstructed);
        }
        if parent.index() >= self.num_bodies() {
            return Err(TreeError::InvalidParent {
                parent,
                num_bodies: self.num_bodies(),
            });
        }
        let joint = joint.into();
        let reversed = joint.reversed;
        let body = BodyIndex(self.num_bodies());
        let spec = NodeSpec {
            body,
            mass_props,
            x_pf,
            x_bm,
            reversed,
        };
        // a failed construction must leave the cursors untouched
        let mut cursor = self.cursor;
        let node: Box<dyn MobilizerNode> = match joint.mobilizer {
            Mobilizer::Pin => Box::new(BuiltinNode::new(BuiltinKind::Pin, spec, &mut cursor)),
            Mobilizer::Slider => Box::new(BuiltinNode::new(BuiltinKind::Slider, spec, &mut cursor)),
            Mobilizer::Universal => {
                Box::new(BuiltinNode::new(BuiltinKind::Universal, spec, &mut cursor))
            }
            Mobilizer::Ball => Box::new(BuiltinNode::new(BuiltinKind::Ball, spec, &mut cursor)),
            Mobilizer::Free => Box::new(BuiltinNode::new(BuiltinKind::Free, spec, &mut cursor)),
            Mobilizer::Custom(implementation) => custom_node(implementation, spec, &mut cursor)?,
        };
        self.cursor = cursor;

        debug!(
            body = body.index(),
            parent = %self.body_name(parent),
            kind = node.type_name(),
            reversed,
            nq = node.max_nq(),
            nu = node.slots().nu,
            "added rigid body"
        );
        self.parents.push(parent);
        self.nodes.push(node);
        Ok(body)
    }

    /// Freeze the topology. Required before states can be created.
    pub fn end_construction(&mut self) -> Result<()> {
        if self.constructed {
            return Err(TreeError::AlreadyConstructed);
        }
        self.constructed = true;
        debug!(
            bodies = self.num_bodies(),
            nq = self.total_q_alloc(),
            nu = self.total_dof(),
            "tree construction complete"
        );
        Ok(())
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    /// Bodies including ground.
    pub fn num_bodies(&self) -> usize {
        self.parents.len()
    }

    /// Total velocity coordinates.
    pub fn total_dof(&self) -> usize {
        self.cursor.next_u.index()
    }

    /// Total position slots.
    pub fn total_q_alloc(&self) -> usize {
        self.cursor.next_q.index()
    }

    /// Total size of the `nu × nu` block pool.
    pub fn total_u_squared_alloc(&self) -> usize {
        self.cursor.next_usq.index()
    }

    pub fn parent(&self, body: BodyIndex) -> Result<BodyIndex> {
        self.parents
            .get(body.index())
            .copied()
            .ok_or(TreeError::BodyOutOfRange(body))
    }

    /// The mobilizer moving `body`.
    pub fn mobilizer(&self, body: BodyIndex) -> Result<&dyn MobilizerNode> {
        if body.is_ground() {
            return Err(TreeError::BodyOutOfRange(body));
        }
        self.nodes
            .get(body.index() - 1)
            .map(|n| n.as_ref())
            .ok_or(TreeError::BodyOutOfRange(body))
    }

    pub fn q_index(&self, body: BodyIndex) -> Result<QIndex> {
        Ok(self.mobilizer(body)?.slots().q_index)
    }

    /// Position slots reserved for `body`'s mobilizer.
    pub fn q_alloc(&self, body: BodyIndex) -> Result<usize> {
        Ok(self.mobilizer(body)?.max_nq())
    }

    pub fn u_index(&self, body: BodyIndex) -> Result<UIndex> {
        Ok(self.mobilizer(body)?.slots().u_index)
    }

    /// Velocity DOFs of `body`'s mobilizer.
    pub fn dof(&self, body: BodyIndex) -> Result<usize> {
        Ok(self.mobilizer(body)?.slots().nu)
    }

    fn body_name(&self, body: BodyIndex) -> String {
        if body.is_ground() {
            self.config.ground_name.clone()
        } else {
            format!("body {body}")
        }
    }

    /// A state with zero coordinates and identity quaternions.
    pub fn default_state(&self) -> Result<State> {
        if !self.constructed {
            return Err(TreeError::NotConstructed);
        }
        let model_vars = ModelVars {
            use_euler_angles: self.config.use_euler_angles,
        };
        let mut state = State::new(
            self.total_q_alloc(),
            self.total_dof(),
            self.total_u_squared_alloc(),
            self.num_bodies(),
            model_vars,
        );
        for node in &self.nodes {
            if let Some(start) = node.is_using_quaternion(&state) {
                state.q[node.slots().q_index.index() + start.index()] = 1.0;
            }
        }
        Ok(state)
    }

    pub fn use_euler_angles(&self, state: &State) -> bool {
        state.use_euler_angles()
    }

    /// Switch representation mode, converting every quaternion-capable
    /// joint's coordinates so the configuration is unchanged.
    pub fn set_use_euler_angles(&self, state: &mut State, use_euler_angles: bool) {
        if state.use_euler_angles() == use_euler_angles {
            warn!(use_euler_angles, "representation mode already set; q left as is");
            return;
        }
        let mut q = state.q.clone();
        for node in &self.nodes {
            if use_euler_angles {
                node.convert_to_euler_angles(&state.q, &mut q);
            } else {
                node.convert_to_quaternions(&state.q, &mut q);
            }
        }
        state.model_vars_mut().use_euler_angles = use_euler_angles;
        state.q = q;
        debug!(use_euler_angles, "switched rotation representation");
    }

    fn check_coordinate(body: BodyIndex, which: usize, count: usize) -> Result<usize> {
        if which >= count {
            return Err(TreeError::CoordinateOutOfRange {
                body,
                index: which,
                count,
            });
        }
        Ok(which)
    }

    /// One of `body`'s in-use position coordinates.
    pub fn joint_q(&self, state: &State, body: BodyIndex, which: usize) -> Result<f64> {
        let node = self.mobilizer(body)?;
        let n = node.nq_in_use(state.model_vars());
        let i = Self::check_coordinate(body, which, n)?;
        Ok(state.q[node.slots().q_index.index() + i])
    }

    /// Set one position coordinate; invalidates Position and later stages.
    pub fn set_joint_q(&self, state: &mut State, body: BodyIndex, which: usize, value: f64) -> Result<()> {
        let node = self.mobilizer(body)?;
        let n = node.nq_in_use(state.model_vars());
        let i = Self::check_coordinate(body, which, n)?;
        state.q[node.slots().q_index.index() + i] = value;
        state.invalidate(Stage::Position);
        Ok(())
    }

    pub fn joint_u(&self, state: &State, body: BodyIndex, which: usize) -> Result<f64> {
        let node = self.mobilizer(body)?;
        let i = Self::check_coordinate(body, which, node.slots().nu)?;
        Ok(state.u[node.slots().u_index.index() + i])
    }

    /// Set one velocity coordinate; invalidates Velocity and later stages.
    pub fn set_joint_u(&self, state: &mut State, body: BodyIndex, which: usize, value: f64) -> Result<()> {
        let node = self.mobilizer(body)?;
        let i = Self::check_coordinate(body, which, node.slots().nu)?;
        state.u[node.slots().u_index.index() + i] = value;
        state.invalidate(Stage::Velocity);
        Ok(())
    }

    /// Realize every stage up to and including `stage` that is not yet valid.
    pub fn realize(&self, state: &mut State, stage: Stage) -> Result<()> {
        for next in Stage::REALIZABLE.into_iter().take_while(|s| *s <= stage) {
            if state.stage() < next {
                self.realize_stage(state, next)?;
            }
        }
        Ok(())
    }

    /// Realize exactly one stage. The previous stage must already be valid.
    ///
    /// Realizing a stage that is already valid recomputes it and leaves the
    /// state at that stage, so every later stage must be realized again.
    pub fn realize_stage(&self, state: &mut State, stage: Stage) -> Result<()> {
        if !self.constructed {
            return Err(TreeError::NotConstructed);
        }
        if state.stage() >= stage {
            warn!(?stage, current = ?state.stage(), "stage realized again; later stages invalidated");
        } else {
            state.require_stage(stage.prev())?;
        }
        for node in &self.nodes {
            match stage {
                Stage::Empty => {}
                Stage::Model => node.realize_model(state)?,
                Stage::Instance => node.realize_instance(state)?,
                Stage::Time => node.realize_time(state)?,
                Stage::Position => node.realize_position(state)?,
                Stage::Velocity => node.realize_velocity(state)?,
                Stage::Dynamics => node.realize_dynamics(state)?,
                Stage::Acceleration => node.realize_acceleration(state)?,
                Stage::Report => node.realize_report(state)?,
            }
        }
        match stage {
            Stage::Position => kinematics::position_kinematics(&self.nodes, &self.parents, state),
            Stage::Velocity => kinematics::velocity_kinematics(&self.nodes, &self.parents, state),
            Stage::Acceleration => {
                kinematics::acceleration_kinematics(&self.nodes, &self.parents, state)
            }
            _ => {}
        }
        state.advance_to(stage);
        trace!(?stage, "realized stage");
        Ok(())
    }

    /// `q̇ = N u` for the whole tree.
    pub fn calc_qdot(&self, state: &State, u: &DVec) -> Result<DVec> {
        state.require_stage(Stage::Position)?;
        let mut qdot = DVec::zeros(self.total_q_alloc());
        for node in &self.nodes {
            let s = node.slots();
            if s.qdot_policy == QDotPolicy::AlwaysU {
                s.q_slice_mut(&mut qdot, s.nu).copy_from_slice(s.u_slice(u));
            } else {
                node.calc_qdot(state, u, &mut qdot)?;
            }
        }
        Ok(qdot)
    }

    /// `q̈ = N u̇ + Ṅ u` for the whole tree, with `u` from the state.
    pub fn calc_qdotdot(&self, state: &State, udot: &DVec) -> Result<DVec> {
        state.require_stage(Stage::Velocity)?;
        let mut qdotdot = DVec::zeros(self.total_q_alloc());
        for node in &self.nodes {
            node.calc_qdotdot(state, udot, &mut qdotdot)?;
        }
        Ok(qdotdot)
    }

    /// `u = N⁻¹ q̇` for the whole tree.
    pub fn calc_u_from_qdot(&self, state: &State, qdot: &DVec) -> Result<DVec> {
        state.require_stage(Stage::Position)?;
        let mut u = DVec::zeros(self.total_dof());
        for node in &self.nodes {
            let s = node.slots();
            let nq = node.nq_in_use(state.model_vars());
            let q = s.q_slice(&state.q, nq);
            node.multiply_by_n_inv(state, false, q, false, s.q_slice(qdot, nq), s.u_slice_mut(&mut u))?;
        }
        Ok(u)
    }

    /// Normalize every quaternion in use. Returns how many joints changed.
    pub fn enforce_quaternion_constraints(&self, state: &mut State) -> usize {
        self.enforce_quaternion_constraints_with_error(state, &mut DVec::zeros(0))
    }

    /// As [`MatterTree::enforce_quaternion_constraints`], also projecting the
    /// q-sized error estimate `q_err` (which may be empty).
    pub fn enforce_quaternion_constraints_with_error(&self, state: &mut State, q_err: &mut DVec) -> usize {
        let mut q = state.q.clone();
        let mut count = 0;
        for node in &self.nodes {
            if node.enforce_quaternion_constraints(state, &mut q, q_err) {
                count += 1;
            }
        }
        if count > 0 {
            state.q = q;
            state.invalidate(Stage::Position);
        }
        count
    }

    /// Bodies whose quaternion norm drifted from 1 by more than the
    /// configured tolerance.
    pub fn check_quaternions(&self, state: &State) -> Vec<BodyIndex> {
        let mut drifted = Vec::new();
        for node in &self.nodes {
            let Some(start) = node.is_using_quaternion(state) else {
                continue;
            };
            let i = node.slots().q_index.index() + start.index();
            let norm = state.q.fixed_rows::<4>(i).norm();
            if (norm - 1.0).abs() > self.config.quaternion_tolerance {
                warn!(body = node.slots().body.index(), norm, "quaternion has drifted");
                drifted.push(node.slots().body);
            }
        }
        drifted
    }

    fn check_body(&self, body: BodyIndex) -> Result<()> {
        if body.index() < self.num_bodies() {
            Ok(())
        } else {
            Err(TreeError::BodyOutOfRange(body))
        }
    }

    /// Ground-to-body transform `X_GB`.
    pub fn body_configuration(&self, state: &State, body: BodyIndex) -> Result<SpatialTransform> {
        self.check_body(body)?;
        state.require_stage(Stage::Position)?;
        Ok(state.position_cache.x_gb[body.index()])
    }

    /// Spatial velocity of `body` in ground, expressed in the body frame.
    pub fn body_velocity(&self, state: &State, body: BodyIndex) -> Result<SpatialVec> {
        self.check_body(body)?;
        state.require_stage(Stage::Velocity)?;
        Ok(state.velocity_cache.v_gb[body.index()])
    }

    /// Spatial acceleration of `body` in ground, expressed in the body frame.
    pub fn body_acceleration(&self, state: &State, body: BodyIndex) -> Result<SpatialVec> {
        self.check_body(body)?;
        state.require_stage(Stage::Acceleration)?;
        Ok(state.acceleration_cache.a_gb[body.index()])
    }

    /// Cached across-joint transform `X_FM` of `body`'s mobilizer.
    pub fn mobilizer_transform(&self, state: &State, body: BodyIndex) -> Result<SpatialTransform> {
        self.mobilizer(body)?;
        state.require_stage(Stage::Position)?;
        Ok(state.position_cache.x_fm[body.index()])
    }

    /// Cached across-joint velocity `V_FM` of `body`'s mobilizer.
    pub fn mobilizer_velocity(&self, state: &State, body: BodyIndex) -> Result<SpatialVec> {
        self.mobilizer(body)?;
        state.require_stage(Stage::Velocity)?;
        Ok(state.velocity_cache.v_fm[body.index()])
    }

    /// `Sᵀ I S` for `body` alone, `S` being its mobilizer's Jacobian in the
    /// body frame.
    pub fn mobility_inertia(&self, state: &State, body: BodyIndex) -> Result<DMat> {
        let s = self.mobilizer(body)?.slots();
        state.require_stage(Stage::Dynamics)?;
        let block = state
            .dynamics_cache
            .mobility_inertia
            .rows(s.usq_index.index(), s.nu * s.nu);
        Ok(DMat::from_iterator(s.nu, s.nu, block.iter().copied()))
    }

    /// Mobility forces equivalent to the spatial force `force_fm` applied
    /// across `body`'s mobilizer.
    pub fn internal_force(&self, state: &State, body: BodyIndex, force_fm: &SpatialVec) -> Result<DVec> {
        let node = self.mobilizer(body)?;
        let mut tau = DVec::zeros(self.total_dof());
        node.internal_force(state, force_fm, &mut tau)?;
        let s = node.slots();
        Ok(tau.rows(s.u_index.index(), s.nu).into_owned())
    }

    /// Total kinetic energy `½ Σ vᵀ I v` over all bodies.
    pub fn calc_kinetic_energy(&self, state: &State) -> Result<f64> {
        state.require_stage(Stage::Velocity)?;
        Ok(self
            .nodes
            .iter()
            .map(|node| {
                let s = node.slots();
                s.mass_props.kinetic_energy(&state.velocity_cache.v_gb[s.body.index()])
            })
            .sum())
    }

    fn update_q(
        &self,
        state: &mut State,
        body: BodyIndex,
        fit: impl FnOnce(&dyn MobilizerNode, &State, &mut DVec) -> mobilis_model::Result<()>,
    ) -> Result<()> {
        let node = self.mobilizer(body)?;
        let mut q = state.q.clone();
        fit(node, state, &mut q)?;
        state.q = q;
        state.invalidate(Stage::Position);
        Ok(())
    }

    fn update_u(
        &self,
        state: &mut State,
        body: BodyIndex,
        fit: impl FnOnce(&dyn MobilizerNode, &State, &mut DVec) -> mobilis_model::Result<()>,
    ) -> Result<()> {
        let node = self.mobilizer(body)?;
        let mut u = state.u.clone();
        fit(node, state, &mut u)?;
        state.u = u;
        state.invalidate(Stage::Velocity);
        Ok(())
    }

    /// Set `body`'s coordinates to best reproduce `x_fm`.
    pub fn set_q_to_fit_transform(&self, state: &mut State, body: BodyIndex, x_fm: &SpatialTransform) -> Result<()> {
        self.update_q(state, body, |node, state, q| node.fit_q_to_x_fm(state, x_fm, q))
    }

    /// Fit the rotation of `X_FM` only; the translation target is zero.
    pub fn set_q_to_fit_rotation(&self, state: &mut State, body: BodyIndex, r_fm: &Mat3) -> Result<()> {
        self.update_q(state, body, |node, state, q| {
            if node.slots().reversed {
                node.fit_q_to_x_fm(state, &SpatialTransform::from_rotation(*r_fm), q)
            } else {
                node.set_q_to_fit_rotation(state, r_fm, q)
            }
        })
    }

    /// Fit the translation of `X_FM` only; the rotation target is the identity.
    pub fn set_q_to_fit_translation(&self, state: &mut State, body: BodyIndex, p_fm: &Vec3) -> Result<()> {
        self.update_q(state, body, |node, state, q| {
            if node.slots().reversed {
                node.fit_q_to_x_fm(state, &SpatialTransform::from_translation(*p_fm), q)
            } else {
                node.set_q_to_fit_translation(state, p_fm, q)
            }
        })
    }

    /// Set `body`'s velocities to best reproduce `v_fm` at the current `q`.
    pub fn set_u_to_fit_velocity(&self, state: &mut State, body: BodyIndex, v_fm: &SpatialVec) -> Result<()> {
        self.update_u(state, body, |node, state, u| node.fit_u_to_v_fm(state, v_fm, u))
    }

    /// Fit the angular part of `V_FM` only; the linear target is zero.
    pub fn set_u_to_fit_angular_velocity(&self, state: &mut State, body: BodyIndex, w_fm: &Vec3) -> Result<()> {
        self.update_u(state, body, |node, state, u| {
            if node.slots().reversed {
                node.fit_u_to_v_fm(state, &SpatialVec::angular_only(*w_fm), u)
            } else {
                node.set_u_to_fit_angular_velocity(state, &state.q, w_fm, u)
            }
        })
    }

    /// Fit the linear part of `V_FM` only; the angular target is zero.
    pub fn set_u_to_fit_linear_velocity(&self, state: &mut State, body: BodyIndex, v_fm: &Vec3) -> Result<()> {
        self.update_u(state, body, |node, state, u| {
            if node.slots().reversed {
                node.fit_u_to_v_fm(state, &SpatialVec::linear_only(*v_fm), u)
            } else {
                node.set_u_to_fit_linear_velocity(state, &state.q, v_fm, u)
            }
        })
    }
}

fn custom_node(
    implementation: Arc<dyn CustomImplementation>,
    spec: NodeSpec,
    cursor: &mut SlotCursor,
) -> Result<Box<dyn MobilizerNode>> {
    Ok(match implementation.nu() {
        1 => Box::new(CustomNode::<1>::new(implementation, spec, cursor)?),
        2 => Box::new(CustomNode::<2>::new(implementation, spec, cursor)?),
        3 => Box::new(CustomNode::<3>::new(implementation, spec, cursor)?),
        4 => Box::new(CustomNode::<4>::new(implementation, spec, cursor)?),
        5 => Box::new(CustomNode::<5>::new(implementation, spec, cursor)?),
        6 => Box::new(CustomNode::<6>::new(implementation, spec, cursor)?),
        n => return Err(TreeError::UnsupportedDof(n)),
    })
}
