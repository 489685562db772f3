//! URFab - fabrication command execution for Universal Robots arms
//!
//! Turns a sequence of fabrication commands (joint targets, waits, digital
//! output toggles) into blended joint paths and IO calls, executed in the
//! background so the caller never blocks on robot motion.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use urfab::{parse_commands, Config, UrRobot};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_from_path("config/robot.yaml")?;
//!     let robot = UrRobot::from_config(&config);
//!
//!     let commands = parse_commands(&std::fs::read_to_string("path.json")?)?;
//!     let report = robot.send_commands(commands).wait().await?;
//!     println!("Session {} finished: {:?}", report.id, report.state);
//!
//!     println!("Tool frame: {:?}", robot.get_tcp_frame().await?);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **command**: command model, joint configuration adapter and grouping
//! - **trajectory**: motion runs to blended path waypoints
//! - **dispatcher**: ordered execution of groups against one session
//! - **engine**: background sessions, per-address serialization, reports
//! - **connection**: handle traits and the reuse-aware connection pool
//! - **interpreter** / **rtde** / **provider**: the UR interpreter-mode and RTDE links
//! - **robot**: `UrRobot`, the caller-facing client

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod interpreter;
pub mod provider;
pub mod robot;
pub mod rtde;
pub mod trajectory;

#[cfg(test)]
mod testing;

pub use command::{group_commands, Action, parse_commands, Command, CommandGroup, JointConfiguration, MotionCommand, JOINT_NAMES};
pub use config::{Config, ConnectionReuse, EngineConfig, MovementDefaults, RobotConfig};
pub use connection::{ConnectionPool, ConnectionProvider, ControlHandle, IoHandle, ReceiveHandle};
pub use dispatcher::{Dispatcher, ExecutionSession};
pub use engine::{ExecutionEngine, SessionReport, SessionState, Submission};
pub use error::{Result, URError};
pub use geometry::Frame;
pub use provider::UrConnectionProvider;
pub use robot::UrRobot;
pub use trajectory::{build_trajectory, TrajectoryPoint};
