//! Blended joint path construction

use crate::command::MotionCommand;
use crate::config::MovementDefaults;
use crate::Result;

/// One waypoint of a blended joint move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub joints: [f64; 6],
    pub speed: f64,
    pub acceleration: f64,
    pub blend_radius: f64,
}

impl TrajectoryPoint {
    /// Row layout used by blended moves: six joints, speed, acceleration, blend
    pub fn to_row(&self) -> [f64; 9] {
        let [q0, q1, q2, q3, q4, q5] = self.joints;
        [q0, q1, q2, q3, q4, q5, self.speed, self.acceleration, self.blend_radius]
    }
}

/// Convert a motion run into waypoints, one per command and in the same order.
///
/// Missing acceleration or blend radius falls back to `defaults`.
pub fn build_trajectory(run: &[MotionCommand], defaults: &MovementDefaults) -> Result<Vec<TrajectoryPoint>> {
    run.iter()
        .map(|command| {
            Ok(TrajectoryPoint {
                joints: command.joints.to_ordered_values()?,
                speed: command.speed,
                acceleration: command.accel.unwrap_or(defaults.acceleration),
                blend_radius: command.blend.unwrap_or(defaults.blend_radius),
            })
        })
        .collect()
}
