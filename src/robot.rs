//! High-level robot client for fabrication sequences
//!
//! `send_commands` is asynchronous fire-and-forget; every other operation is
//! a direct call whose errors propagate to the caller.

use crate::command::{Command, JointConfiguration};
use crate::config::Config;
use crate::connection::{ConnectionPool, ConnectionProvider};
use crate::engine::{ExecutionEngine, Submission};
use crate::geometry::Frame;
use crate::provider::UrConnectionProvider;
use crate::trajectory::TrajectoryPoint;
use crate::{Result, URError};
use std::sync::Arc;
use tracing::{info, warn};

/// Client for one robot address.
///
/// Owns the connection pool and the execution engine for that address.
/// Direct helpers evict pooled handles after a link failure so the next
/// call reconnects instead of reusing a broken connection.
pub struct UrRobot {
    address: String,
    pool: Arc<ConnectionPool>,
    engine: ExecutionEngine,
}

impl UrRobot {
    /// Client for the robot configured in `config.robot.host`
    pub fn from_config(config: &Config) -> Self {
        let provider = Arc::new(UrConnectionProvider::new(config.robot.clone()));
        Self::with_provider(provider, &config.robot.host, config)
    }

    /// Client using a custom connection provider.
    ///
    /// `config.engine` selects connection reuse and per-address
    /// serialization; `config.defaults` fills missing motion parameters.
    pub fn with_provider(provider: Arc<dyn ConnectionProvider>, address: &str, config: &Config) -> Self {
        let pool = Arc::new(ConnectionPool::new(provider, config.engine.connection_reuse));
        let engine = ExecutionEngine::new(Arc::clone(&pool), &config.engine, config.defaults.clone());
        Self {
            address: address.to_string(),
            pool,
            engine,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Execute a command sequence in the background.
    ///
    /// Returns immediately. Await [`Submission::wait`] for the session report
    /// or drop it to fire and forget.
    pub fn send_commands(&self, commands: Vec<Command>) -> Submission {
        self.engine.submit(commands, &self.address)
    }

    /// Halt the arm. Does not cancel a running sequence.
    pub async fn stop(&self) -> Result<()> {
        self.engine.stop(&self.address).await
    }

    /// Current joint positions keyed by UR joint name
    pub async fn get_config(&self) -> Result<JointConfiguration> {
        let receive = self.pool.receive(&self.address).await?;
        let joints = self.checked(receive.actual_joint_positions().await).await?;
        Ok(JointConfiguration::from_revolute_values(joints))
    }

    /// Active TCP offset `[x, y, z, rx, ry, rz]`
    pub async fn get_tcp_offset(&self) -> Result<[f64; 6]> {
        let control = self.pool.control(&self.address).await?;
        self.checked(control.tcp_offset().await).await
    }

    /// Current tool pose as a frame
    pub async fn get_tcp_frame(&self) -> Result<Frame> {
        let receive = self.pool.receive(&self.address).await?;
        let pose = self.checked(receive.actual_tcp_pose().await).await?;
        Ok(Frame::from_pose(pose))
    }

    /// Joint move to `config`.
    ///
    /// Speed in rad/s, acceleration in rad/s^2. With `nowait` the call
    /// returns once the robot has accepted the move.
    pub async fn move_to_joints(&self, config: &JointConfiguration, speed: f64, accel: f64, nowait: bool) -> Result<()> {
        let target = config.to_ordered_values()?;
        info!("Moving to joints {:?}", target);
        let control = self.pool.control(&self.address).await?;
        self.checked(control.move_joint(target, speed, accel, !nowait).await).await
    }

    /// Linear tool move to the pose of `config`.
    ///
    /// Speed in m/s, acceleration in m/s^2.
    pub async fn movel_to_joints(&self, config: &JointConfiguration, speed: f64, accel: f64, nowait: bool) -> Result<()> {
        let target = config.to_ordered_values()?;
        info!("Moving linearly to joints {:?}", target);
        let control = self.pool.control(&self.address).await?;
        self.checked(control.move_linear_fk(target, speed, accel, !nowait).await).await
    }

    /// Blended joint move through `configurations` with shared parameters.
    ///
    /// An empty list is a no-op; the call returns when the last point is reached.
    pub async fn move_trajectory(
        &self,
        configurations: &[JointConfiguration],
        speed: f64,
        accel: f64,
        blend: f64,
    ) -> Result<()> {
        let path = configurations
            .iter()
            .map(|config| {
                Ok(TrajectoryPoint {
                    joints: config.to_ordered_values()?,
                    speed,
                    acceleration: accel,
                    blend_radius: blend,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if path.is_empty() {
            return Ok(());
        }
        let control = self.pool.control(&self.address).await?;
        self.checked(control.move_joint_blended(&path).await).await
    }

    /// State of standard digital output `signal`
    pub async fn get_digital_io(&self, signal: u8) -> Result<bool> {
        let receive = self.pool.receive(&self.address).await?;
        self.checked(receive.digital_output_state(signal).await).await
    }

    pub async fn set_digital_io(&self, signal: u8, value: bool) -> Result<()> {
        let io = self.pool.io(&self.address).await?;
        self.checked(io.set_standard_digital_out(signal, value).await).await
    }

    pub async fn set_tool_digital_io(&self, signal: u8, value: bool) -> Result<()> {
        let io = self.pool.io(&self.address).await?;
        self.checked(io.set_tool_digital_out(signal, value).await).await
    }

    /// Switch to freedrive so the arm can be moved by hand
    pub async fn start_teach_mode(&self) -> Result<()> {
        let control = self.pool.control(&self.address).await?;
        self.checked(control.enter_teach_mode().await).await
    }

    pub async fn stop_teach_mode(&self) -> Result<()> {
        let control = self.pool.control(&self.address).await?;
        self.checked(control.exit_teach_mode().await).await
    }

    async fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(URError::Connection(e)) = &result {
            warn!("Link to {} failed: {}", self.address, e);
            self.pool.evict(&self.address).await;
        }
        result
    }
}
