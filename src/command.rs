//! Fabrication commands and motion grouping
//!
//! A command stream mixes joint targets with side-effecting steps (waits,
//! digital output toggles). Contiguous joint targets are grouped into a single
//! motion run so they can be sent as one blended path.

use crate::{Result, URError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// UR joint names in kinematic-chain order
pub const JOINT_NAMES: [&str; 6] = [
    "shoulder_pan_joint",
    "shoulder_lift_joint",
    "elbow_joint",
    "wrist_1_joint",
    "wrist_2_joint",
    "wrist_3_joint",
];

/// Named joint angles in radians
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointConfiguration {
    values: HashMap<String, f64>,
}

impl JointConfiguration {
    pub fn new(values: HashMap<String, f64>) -> Self {
        Self { values }
    }

    /// Build a configuration from six revolute values using the UR joint names
    pub fn from_revolute_values(values: [f64; 6]) -> Self {
        Self::from_ordered_values(values)
    }

    pub fn from_ordered_values(values: [f64; 6]) -> Self {
        let values = JOINT_NAMES
            .iter()
            .zip(values)
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Self { values }
    }

    /// Joint values ordered shoulder-pan through wrist-3
    pub fn to_ordered_values(&self) -> Result<[f64; 6]> {
        let mut ordered = [0.0; 6];
        for (slot, name) in ordered.iter_mut().zip(JOINT_NAMES) {
            *slot = *self
                .values
                .get(name)
                .ok_or_else(|| URError::MissingJoint(name.to_string()))?;
        }
        Ok(ordered)
    }

    pub fn get(&self, joint: &str) -> Option<f64> {
        self.values.get(joint).copied()
    }

    pub fn set(&mut self, joint: &str, value: f64) {
        self.values.insert(joint.to_string(), value);
    }

    pub fn remove(&mut self, joint: &str) -> Option<f64> {
        self.values.remove(joint)
    }
}

/// A joint target with its motion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    #[serde(alias = "configuration")]
    pub joints: JointConfiguration,
    /// Joint speed in rad/s
    pub speed: f64,
    /// Joint acceleration in rad/s^2
    #[serde(default, alias = "acceleration", skip_serializing_if = "Option::is_none")]
    pub accel: Option<f64>,
    /// Blend radius in metres
    #[serde(default, alias = "blend_radius", skip_serializing_if = "Option::is_none")]
    pub blend: Option<f64>,
}

impl MotionCommand {
    pub fn new(joints: JointConfiguration, speed: f64, accel: f64, blend: f64) -> Self {
        Self {
            joints,
            speed,
            accel: Some(accel),
            blend: Some(blend),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Configuration(MotionCommand),
    Wait {
        /// Seconds
        wait_time: f64,
    },
    SetDigitalIo {
        signal: u8,
        value: bool,
    },
}

impl Command {
    pub fn is_motion(&self) -> bool {
        matches!(self, Command::Configuration(_))
    }
}

/// A command executed on its own, never blended into a path
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Wait { wait_time: f64 },
    SetDigitalIo { signal: u8, value: bool },
}

impl From<Action> for Command {
    fn from(action: Action) -> Self {
        match action {
            Action::Wait { wait_time } => Command::Wait { wait_time },
            Action::SetDigitalIo { signal, value } => Command::SetDigitalIo { signal, value },
        }
    }
}

/// A maximal run of motion commands, or a single non-motion command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandGroup {
    Motion(Vec<MotionCommand>),
    Single(Action),
}

impl CommandGroup {
    pub fn len(&self) -> usize {
        match self {
            CommandGroup::Motion(run) => run.len(),
            CommandGroup::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_commands(self) -> Vec<Command> {
        match self {
            CommandGroup::Motion(run) => run.into_iter().map(Command::Configuration).collect(),
            CommandGroup::Single(action) => vec![action.into()],
        }
    }
}

/// Partition commands into motion runs and singleton groups, preserving order
pub fn group_commands(commands: Vec<Command>) -> Vec<CommandGroup> {
    let mut grouped = Vec::new();
    let mut current_path = Vec::new();

    for command in commands {
        let action = match command {
            Command::Configuration(motion) => {
                current_path.push(motion);
                continue;
            }
            Command::Wait { wait_time } => Action::Wait { wait_time },
            Command::SetDigitalIo { signal, value } => Action::SetDigitalIo { signal, value },
        };
        if !current_path.is_empty() {
            grouped.push(CommandGroup::Motion(std::mem::take(&mut current_path)));
        }
        grouped.push(CommandGroup::Single(action));
    }

    if !current_path.is_empty() {
        grouped.push(CommandGroup::Motion(current_path));
    }

    grouped
}

/// Parse a JSON array of commands
pub fn parse_commands(json: &str) -> Result<Vec<Command>> {
    Ok(serde_json::from_str(json)?)
}
