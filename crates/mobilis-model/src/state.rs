//! Simulation state: coordinates, representation mode and per-stage caches.

use mobilis_math::{DVec, HMatrix, SpatialTransform, SpatialVec};
use serde::{Deserialize, Serialize};

use crate::error::{MobilizerError, Result};

/// Ordered evaluation passes. Each stage builds on the caches of the previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Nothing realized yet (or everything invalidated).
    Empty,
    Model,
    Instance,
    Time,
    Position,
    Velocity,
    Dynamics,
    Acceleration,
    Report,
}

impl Stage {
    /// All realizable stages in evaluation order.
    pub const REALIZABLE: [Stage; 8] = [
        Stage::Model,
        Stage::Instance,
        Stage::Time,
        Stage::Position,
        Stage::Velocity,
        Stage::Dynamics,
        Stage::Acceleration,
        Stage::Report,
    ];

    /// The stage immediately before this one.
    pub fn prev(self) -> Stage {
        match self {
            Stage::Empty | Stage::Model => Stage::Empty,
            Stage::Instance => Stage::Model,
            Stage::Time => Stage::Instance,
            Stage::Position => Stage::Time,
            Stage::Velocity => Stage::Position,
            Stage::Dynamics => Stage::Velocity,
            Stage::Acceleration => Stage::Dynamics,
            Stage::Report => Stage::Acceleration,
        }
    }
}

/// Modeling choices that change the meaning of the state variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVars {
    /// Store 3-DOF rotations of quaternion-capable joints as body-fixed XYZ
    /// Euler angles instead of quaternions. Applies to every such joint.
    pub use_euler_angles: bool,
}

/// Cached results of the Position stage, indexed by body or by `q` slot.
#[derive(Debug, Clone)]
pub struct PositionCache {
    /// Across-joint transform `X_FM` per body.
    pub x_fm: Vec<SpatialTransform>,
    /// Across-joint velocity Jacobian `H_FM` per body.
    pub h_fm: Vec<HMatrix>,
    /// Sines of angle coordinates (same slots as `q`).
    pub sine: DVec,
    /// Cosines of angle coordinates.
    pub cosine: DVec,
    /// Quaternion norm error `|q| - 1`, stored at the quaternion's first slot.
    pub q_err: DVec,
    /// Normalized quaternions (same slots as `q`).
    pub qnorm: DVec,
    /// Ground-to-body transform per body.
    pub x_gb: Vec<SpatialTransform>,
}

/// Cached results of the Velocity stage.
#[derive(Debug, Clone)]
pub struct VelocityCache {
    /// Across-joint spatial velocity `V_FM` (in F, about F's origin) per body.
    pub v_fm: Vec<SpatialVec>,
    /// Time derivative of `H_FM` per body.
    pub h_dot_fm: Vec<HMatrix>,
    /// Body spatial velocity in body coordinates.
    pub v_gb: Vec<SpatialVec>,
}

/// Cached results of the Dynamics stage.
#[derive(Debug, Clone)]
pub struct DynamicsCache {
    /// Column-major `nu × nu` mobility inertia blocks, laid out by
    /// [`crate::USquaredIndex`].
    pub mobility_inertia: DVec,
}

/// Cached results of the Acceleration stage.
#[derive(Debug, Clone)]
pub struct AccelerationCache {
    /// Body spatial acceleration in body coordinates.
    pub a_gb: Vec<SpatialVec>,
}

/// Mutable simulation state.
#[derive(Debug, Clone)]
pub struct State {
    /// Generalized positions.
    pub q: DVec,
    /// Generalized velocities.
    pub u: DVec,
    /// Generalized accelerations.
    pub udot: DVec,
    /// Simulation time.
    pub time: f64,

    pub position_cache: PositionCache,
    pub velocity_cache: VelocityCache,
    pub dynamics_cache: DynamicsCache,
    pub acceleration_cache: AccelerationCache,

    model_vars: ModelVars,
    stage: Stage,
}

impl State {
    /// Create a zero-initialized state.
    ///
    /// `nq` and `nu` are the total position and velocity slot counts, `nusq`
    /// the u-squared pool size and `nbodies` includes ground.
    pub fn new(nq: usize, nu: usize, nusq: usize, nbodies: usize, model_vars: ModelVars) -> Self {
        Self {
            q: DVec::zeros(nq),
            u: DVec::zeros(nu),
            udot: DVec::zeros(nu),
            time: 0.0,
            position_cache: PositionCache {
                x_fm: vec![SpatialTransform::identity(); nbodies],
                h_fm: vec![HMatrix::zeros(0); nbodies],
                sine: DVec::zeros(nq),
                cosine: DVec::zeros(nq),
                q_err: DVec::zeros(nq),
                qnorm: DVec::zeros(nq),
                x_gb: vec![SpatialTransform::identity(); nbodies],
            },
            velocity_cache: VelocityCache {
                v_fm: vec![SpatialVec::zero(); nbodies],
                h_dot_fm: vec![HMatrix::zeros(0); nbodies],
                v_gb: vec![SpatialVec::zero(); nbodies],
            },
            dynamics_cache: DynamicsCache {
                mobility_inertia: DVec::zeros(nusq),
            },
            acceleration_cache: AccelerationCache {
                a_gb: vec![SpatialVec::zero(); nbodies],
            },
            model_vars,
            stage: Stage::Empty,
        }
    }

    /// Current modeling choices.
    pub fn model_vars(&self) -> &ModelVars {
        &self.model_vars
    }

    /// Mutable modeling choices. Changing them invalidates every stage.
    ///
    /// Flipping `use_euler_angles` here leaves `q` in the old representation;
    /// the tree-level switch converts it.
    pub fn model_vars_mut(&mut self) -> &mut ModelVars {
        self.stage = Stage::Empty;
        &mut self.model_vars
    }

    /// True when quaternion-capable joints are using Euler angles.
    pub fn use_euler_angles(&self) -> bool {
        self.model_vars.use_euler_angles
    }

    /// Highest stage realized so far.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Record that `stage` has been realized.
    pub fn advance_to(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Mark `stage` and everything after it as stale.
    pub fn invalidate(&mut self, stage: Stage) {
        if self.stage >= stage {
            self.stage = stage.prev();
        }
    }

    /// Fail unless `required` has been realized.
    pub fn require_stage(&self, required: Stage) -> Result<()> {
        if self.stage >= required {
            Ok(())
        } else {
            Err(MobilizerError::StageViolation {
                required,
                current: self.stage,
            })
        }
    }
}
