//! Universal Robots connection provider
//!
//! Control and IO handles speak URScript through interpreter mode; the
//! receive handle reads RTDE output packages.

use crate::config::RobotConfig;
use crate::connection::{ConnectionProvider, ControlHandle, IoHandle, ReceiveHandle};
use crate::interpreter::{
    movej_statement, movel_statement, python_bool, stopj_statement, InterpreterClient, INTERPRETER_BOOTSTRAP_SCRIPT,
};
use crate::rtde::RTDEReceiver;
use crate::trajectory::TrajectoryPoint;
use crate::{Result, URError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

/// Opens interpreter and RTDE connections using the configured ports
#[derive(Debug, Clone)]
pub struct UrConnectionProvider {
    robot: RobotConfig,
}

impl UrConnectionProvider {
    pub fn new(robot: RobotConfig) -> Self {
        Self { robot }
    }

    fn io_timeout(&self) -> Result<Duration> {
        self.robot.connect_timeout()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.robot.completion_poll_ms.max(1))
    }

    async fn connect_interpreter(&self, address: &str) -> Result<InterpreterClient> {
        let port = self.robot.ports.interpreter;
        let io_timeout = self.io_timeout()?;
        match InterpreterClient::connect(address, port, io_timeout, self.poll_interval()).await {
            Ok(client) => Ok(client),
            Err(e) if self.robot.bootstrap_interpreter => {
                warn!("Interpreter not reachable ({}), starting interpreter mode", e);
                self.bootstrap(address).await?;
                InterpreterClient::connect_with_retry(
                    address,
                    port,
                    self.robot.interpreter_connect_attempts,
                    io_timeout,
                    self.poll_interval(),
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    /// Send the interpreter-mode program through the primary interface
    async fn bootstrap(&self, address: &str) -> Result<()> {
        let port = self.robot.ports.primary;
        let mut socket = timeout(self.io_timeout()?, TcpStream::connect((address, port)))
            .await
            .map_err(|_| URError::Connection(format!("Timed out connecting to primary interface {}:{}", address, port)))?
            .map_err(|e| URError::Connection(format!("Failed to connect to primary interface: {}", e)))?;

        socket
            .write_all(INTERPRETER_BOOTSTRAP_SCRIPT.as_bytes())
            .await
            .map_err(|e| URError::Connection(format!("Failed to send interpreter mode script: {}", e)))?;

        // Give the controller time to start the program
        sleep(Duration::from_millis(1000)).await;
        info!("Interpreter mode script sent to {}:{}", address, port);
        Ok(())
    }
}

#[async_trait]
impl ConnectionProvider for UrConnectionProvider {
    async fn connect_control(&self, address: &str) -> Result<Arc<dyn ControlHandle>> {
        let interpreter = self.connect_interpreter(address).await?;
        Ok(Arc::new(UrControl {
            interpreter,
            address: address.to_string(),
            rtde_port: self.robot.ports.rtde,
            io_timeout: self.io_timeout()?,
        }))
    }

    async fn connect_receive(&self, address: &str) -> Result<Arc<dyn ReceiveHandle>> {
        let receiver = RTDEReceiver::connect(address, self.robot.ports.rtde, self.io_timeout()?).await?;
        Ok(Arc::new(receiver))
    }

    async fn connect_io(&self, address: &str) -> Result<Arc<dyn IoHandle>> {
        let interpreter = self.connect_interpreter(address).await?;
        Ok(Arc::new(UrIo { interpreter }))
    }
}

pub struct UrControl {
    interpreter: InterpreterClient,
    address: String,
    rtde_port: u16,
    io_timeout: Duration,
}

#[async_trait]
impl ControlHandle for UrControl {
    async fn halt(&self, deceleration: f64) -> Result<()> {
        let stop = stopj_statement(deceleration)?;
        // Drop queued motion, stop the running statement, then decelerate
        self.interpreter.skip_buffer().await?;
        self.interpreter.abort_move().await?;
        self.interpreter.execute_and_wait(&stop).await?;
        Ok(())
    }

    async fn move_joint_blended(&self, path: &[TrajectoryPoint]) -> Result<()> {
        self.interpreter.move_path(path).await
    }

    async fn move_joint(&self, target: [f64; 6], speed: f64, acceleration: f64, blocking: bool) -> Result<()> {
        let statement = movej_statement(&target, speed, acceleration, 0.0)?;
        if blocking {
            self.interpreter.execute_and_wait(&statement).await?;
        } else {
            self.interpreter.execute(&statement).await?;
        }
        Ok(())
    }

    async fn move_linear_fk(&self, target: [f64; 6], speed: f64, acceleration: f64, blocking: bool) -> Result<()> {
        let statement = movel_statement(&target, speed, acceleration)?;
        if blocking {
            self.interpreter.execute_and_wait(&statement).await?;
        } else {
            self.interpreter.execute(&statement).await?;
        }
        Ok(())
    }

    async fn tcp_offset(&self) -> Result<[f64; 6]> {
        let receiver = RTDEReceiver::connect(&self.address, self.rtde_port, self.io_timeout).await?;
        Ok(receiver.state().await?.tcp_offset)
    }

    async fn enter_teach_mode(&self) -> Result<()> {
        self.interpreter.execute_and_wait("teach_mode()").await?;
        Ok(())
    }

    async fn exit_teach_mode(&self) -> Result<()> {
        self.interpreter.execute_and_wait("end_teach_mode()").await?;
        Ok(())
    }
}

pub struct UrIo {
    interpreter: InterpreterClient,
}

#[async_trait]
impl IoHandle for UrIo {
    async fn set_standard_digital_out(&self, signal: u8, value: bool) -> Result<()> {
        let statement = format!("set_standard_digital_out({}, {})", signal, python_bool(value));
        self.interpreter.execute_and_wait(&statement).await?;
        Ok(())
    }

    async fn set_tool_digital_out(&self, signal: u8, value: bool) -> Result<()> {
        let statement = format!("set_tool_digital_out({}, {})", signal, python_bool(value));
        self.interpreter.execute_and_wait(&statement).await?;
        Ok(())
    }
}

#[async_trait]
impl ReceiveHandle for RTDEReceiver {
    async fn actual_joint_positions(&self) -> Result<[f64; 6]> {
        Ok(self.state().await?.joint_positions)
    }

    async fn digital_output_state(&self, signal: u8) -> Result<bool> {
        Ok(self.state().await?.digital_output(signal))
    }

    async fn actual_tcp_pose(&self) -> Result<[f64; 6]> {
        Ok(self.state().await?.tcp_pose)
    }
}
