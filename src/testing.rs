//! Recording robot double for dispatch and engine tests

use crate::connection::{ConnectionProvider, ControlHandle, IoHandle, ReceiveHandle};
use crate::trajectory::TrajectoryPoint;
use crate::{Result, URError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Halt(f64),
    MoveBlended(Vec<TrajectoryPoint>),
    MoveJoint([f64; 6], bool),
    MoveLinear([f64; 6], bool),
    SetStandardOut(u8, bool),
    SetToolOut(u8, bool),
    EnterTeach,
    ExitTeach,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub call: Call,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<Recorded>>,
    connects: AtomicUsize,
    fail_connections: AtomicBool,
    blended_moves: AtomicUsize,
    /// 1-based index of the blended move that should fail
    fail_blended_move: Mutex<Option<usize>>,
    fail_halt: AtomicBool,
    link_down: AtomicBool,
    move_duration: Mutex<Duration>,
    outputs: Mutex<HashMap<u8, bool>>,
    joints: Mutex<[f64; 6]>,
    tcp_pose: Mutex<[f64; 6]>,
}

/// Provider whose handles all record into one shared call log
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.recorded().into_iter().map(|r| r.call).collect()
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connections(&self, fail: bool) {
        self.state.fail_connections.store(fail, Ordering::SeqCst);
    }

    pub fn fail_blended_move(&self, nth: usize) {
        *self.state.fail_blended_move.lock().unwrap() = Some(nth);
    }

    pub fn fail_halt(&self, fail: bool) {
        self.state.fail_halt.store(fail, Ordering::SeqCst);
    }

    /// Make IO and feedback calls fail as if the socket had dropped
    pub fn drop_link(&self, down: bool) {
        self.state.link_down.store(down, Ordering::SeqCst);
    }

    /// Simulated time each blocking move takes
    pub fn set_move_duration(&self, duration: Duration) {
        *self.state.move_duration.lock().unwrap() = duration;
    }

    pub fn set_joints(&self, joints: [f64; 6]) {
        *self.state.joints.lock().unwrap() = joints;
    }

    pub fn set_tcp_pose(&self, pose: [f64; 6]) {
        *self.state.tcp_pose.lock().unwrap() = pose;
    }

    fn handle(&self) -> Result<Arc<MockRobot>> {
        if self.state.fail_connections.load(Ordering::SeqCst) {
            return Err(URError::Connection("mock robot unreachable".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockRobot { state: Arc::clone(&self.state) }))
    }
}

pub struct MockRobot {
    state: Arc<MockState>,
}

impl MockRobot {
    fn record(&self, call: Call) {
        self.state.calls.lock().unwrap().push(Recorded { call, at: Instant::now() });
    }

    fn check_link(&self) -> Result<()> {
        if self.state.link_down.load(Ordering::SeqCst) {
            return Err(URError::Connection("mock link dropped".to_string()));
        }
        Ok(())
    }

    async fn simulate_motion(&self, blocking: bool) {
        let duration = *self.state.move_duration.lock().unwrap();
        if blocking && !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[async_trait]
impl ControlHandle for MockRobot {
    async fn halt(&self, deceleration: f64) -> Result<()> {
        self.record(Call::Halt(deceleration));
        if self.state.fail_halt.load(Ordering::SeqCst) {
            return Err(URError::MotionCommand("halt refused".to_string()));
        }
        Ok(())
    }

    async fn move_joint_blended(&self, path: &[TrajectoryPoint]) -> Result<()> {
        self.record(Call::MoveBlended(path.to_vec()));
        let count = self.state.blended_moves.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.state.fail_blended_move.lock().unwrap() == Some(count) {
            return Err(URError::MotionCommand(format!("blended move {} faulted", count)));
        }
        self.simulate_motion(true).await;
        Ok(())
    }

    async fn move_joint(&self, target: [f64; 6], _speed: f64, _acceleration: f64, blocking: bool) -> Result<()> {
        self.record(Call::MoveJoint(target, blocking));
        self.simulate_motion(blocking).await;
        Ok(())
    }

    async fn move_linear_fk(&self, target: [f64; 6], _speed: f64, _acceleration: f64, blocking: bool) -> Result<()> {
        self.record(Call::MoveLinear(target, blocking));
        self.simulate_motion(blocking).await;
        Ok(())
    }

    async fn tcp_offset(&self) -> Result<[f64; 6]> {
        Ok([0.0, 0.0, 0.15, 0.0, 0.0, 0.0])
    }

    async fn enter_teach_mode(&self) -> Result<()> {
        self.record(Call::EnterTeach);
        Ok(())
    }

    async fn exit_teach_mode(&self) -> Result<()> {
        self.record(Call::ExitTeach);
        Ok(())
    }
}

#[async_trait]
impl ReceiveHandle for MockRobot {
    async fn actual_joint_positions(&self) -> Result<[f64; 6]> {
        self.check_link()?;
        Ok(*self.state.joints.lock().unwrap())
    }

    async fn digital_output_state(&self, signal: u8) -> Result<bool> {
        Ok(self.state.outputs.lock().unwrap().get(&signal).copied().unwrap_or(false))
    }

    async fn actual_tcp_pose(&self) -> Result<[f64; 6]> {
        Ok(*self.state.tcp_pose.lock().unwrap())
    }
}

#[async_trait]
impl IoHandle for MockRobot {
    async fn set_standard_digital_out(&self, signal: u8, value: bool) -> Result<()> {
        self.check_link()?;
        self.record(Call::SetStandardOut(signal, value));
        self.state.outputs.lock().unwrap().insert(signal, value);
        Ok(())
    }

    async fn set_tool_digital_out(&self, signal: u8, value: bool) -> Result<()> {
        self.check_link()?;
        self.record(Call::SetToolOut(signal, value));
        Ok(())
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn connect_control(&self, _address: &str) -> Result<Arc<dyn ControlHandle>> {
        Ok(self.handle()?)
    }

    async fn connect_receive(&self, _address: &str) -> Result<Arc<dyn ReceiveHandle>> {
        Ok(self.handle()?)
    }

    async fn connect_io(&self, _address: &str) -> Result<Arc<dyn IoHandle>> {
        Ok(self.handle()?)
    }
}
