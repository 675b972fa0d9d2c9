//! Forward kinematics: body transforms, velocities and accelerations.
//!
//! Each pass walks the nodes in tree order (parents before children) and
//! combines the parent's result with the node's cached across-joint
//! quantities. All body quantities are expressed in the body frame.

use mobilis_math::{SpatialTransform, SpatialVec};
use mobilis_model::{BodyIndex, MobilizerNode, State};

/// Plücker transform from the parent body frame to the child body frame.
pub fn parent_to_body(node: &dyn MobilizerNode, x_fm: &SpatialTransform) -> SpatialTransform {
    let s = node.slots();
    s.x_bm.inverse().compose(&x_fm.compose(&s.x_pf))
}

/// Ground-to-body transforms from the cached `X_FM`.
pub fn position_kinematics(
    nodes: &[Box<dyn MobilizerNode>],
    parents: &[BodyIndex],
    state: &mut State,
) {
    let pc = &mut state.position_cache;
    pc.x_gb[BodyIndex::GROUND.index()] = SpatialTransform::identity();
    for node in nodes {
        let b = node.slots().body.index();
        let p = parents[b].index();
        let x_pb = parent_to_body(node.as_ref(), &pc.x_fm[b]);
        pc.x_gb[b] = x_pb.compose(&pc.x_gb[p]);
    }
}

/// Body spatial velocities: `v_B = X_PB v_P + X_FB V_FM`.
pub fn velocity_kinematics(
    nodes: &[Box<dyn MobilizerNode>],
    parents: &[BodyIndex],
    state: &mut State,
) {
    state.velocity_cache.v_gb[BodyIndex::GROUND.index()] = SpatialVec::zero();
    for node in nodes {
        let b = node.slots().body.index();
        let p = parents[b].index();
        let x_fm = &state.position_cache.x_fm[b];
        let x_pb = parent_to_body(node.as_ref(), x_fm);
        let x_fb = node.slots().x_fb(x_fm);

        let vc = &mut state.velocity_cache;
        vc.v_gb[b] = x_pb.apply_motion(&vc.v_gb[p]) + x_fb.apply_motion(&vc.v_fm[b]);
    }
}

/// Body spatial accelerations from `u̇`:
/// `a_B = X_PB a_P + X_FB (Ḣ u + H u̇) + v_B ×ₘ X_FB V_FM`.
pub fn acceleration_kinematics(
    nodes: &[Box<dyn MobilizerNode>],
    parents: &[BodyIndex],
    state: &mut State,
) {
    state.acceleration_cache.a_gb[BodyIndex::GROUND.index()] = SpatialVec::zero();
    for node in nodes {
        let s = node.slots();
        let b = s.body.index();
        let p = parents[b].index();
        let x_fm = &state.position_cache.x_fm[b];
        let x_pb = parent_to_body(node.as_ref(), x_fm);
        let x_fb = s.x_fb(x_fm);

        let ui = s.u_index.index();
        let u = state.u.rows(ui, s.nu);
        let udot = state.udot.rows(ui, s.nu);
        let a_fm = SpatialVec::from(
            &state.velocity_cache.h_dot_fm[b] * u + &state.position_cache.h_fm[b] * udot,
        );
        let v_joint = x_fb.apply_motion(&state.velocity_cache.v_fm[b]);
        let v_body = state.velocity_cache.v_gb[b];

        let ac = &mut state.acceleration_cache;
        ac.a_gb[b] = x_pb.apply_motion(&ac.a_gb[p])
            + x_fb.apply_motion(&a_fm)
            + v_body.cross_motion(&v_joint);
    }
}
