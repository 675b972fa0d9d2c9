//! Per-joint kinematics for the mobilis multibody engine.
//!
//! `State` holds the generalized coordinates, the representation mode and the
//! per-stage caches. Every joint in a tree is a [`MobilizerNode`]: either a
//! [`BuiltinNode`] or a [`CustomNode`] forwarding to a user-supplied
//! [`CustomImplementation`].

pub mod builtin;
pub mod custom;
pub mod error;
pub mod index;
pub mod node;
pub mod state;

pub use builtin::{BuiltinKind, BuiltinNode};
pub use custom::{CustomContext, CustomImplementation, CustomNode};
pub use error::{MobilizerError, Result};
pub use index::{BodyIndex, MobilizerQIndex, QIndex, SlotCursor, UIndex, USquaredIndex};
pub use node::{AngleSpan, MobilizerNode, NodeSlots, NodeSpec, QDotPolicy, QuaternionPolicy};
pub use state::{ModelVars, Stage, State};
