//! Tree-wide settings.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings applied when a tree hands out states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Start new states in Euler-angle mode.
    pub use_euler_angles: bool,
    /// Allowed `| |q| - 1 |` before a quaternion is reported as drifted.
    pub quaternion_tolerance: f64,
    /// Name reported for body 0.
    pub ground_name: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            use_euler_angles: false,
            quaternion_tolerance: 1e-10,
            ground_name: "ground".to_string(),
        }
    }
}

impl TreeConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
