//! Sequential dispatch of grouped commands against one robot session

use crate::command::{Action, CommandGroup};
use crate::config::MovementDefaults;
use crate::connection::{ControlHandle, IoHandle};
use crate::trajectory::build_trajectory;
use crate::{Result, URError};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};
use uuid::Uuid;

/// Handles owned by one command-sequence execution
pub struct ExecutionSession {
    id: Uuid,
    address: String,
    control: Arc<dyn ControlHandle>,
    io: Arc<dyn IoHandle>,
    groups_dispatched: usize,
}

impl ExecutionSession {
    pub fn new(id: Uuid, address: &str, control: Arc<dyn ControlHandle>, io: Arc<dyn IoHandle>) -> Self {
        Self {
            id,
            address: address.to_string(),
            control,
            io,
            groups_dispatched: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn control(&self) -> &Arc<dyn ControlHandle> {
        &self.control
    }

    /// Number of groups whose robot call has returned successfully
    pub fn groups_dispatched(&self) -> usize {
        self.groups_dispatched
    }
}

/// Routes each command group to the matching robot operation
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    defaults: MovementDefaults,
}

impl Dispatcher {
    pub fn new(defaults: MovementDefaults) -> Self {
        Self { defaults }
    }

    /// Run groups in order, each one finished before the next begins.
    ///
    /// The first failure aborts the remaining groups.
    pub async fn dispatch(&self, groups: &[CommandGroup], session: &mut ExecutionSession) -> Result<()> {
        for (index, group) in groups.iter().enumerate() {
            debug!("Session {}: dispatching group {}/{}", session.id, index + 1, groups.len());
            self.dispatch_group(group, session).await?;
            session.groups_dispatched += 1;
        }
        Ok(())
    }

    async fn dispatch_group(&self, group: &CommandGroup, session: &ExecutionSession) -> Result<()> {
        match group {
            CommandGroup::Motion(run) => {
                let path = build_trajectory(run, &self.defaults)?;
                if path.is_empty() {
                    return Ok(());
                }
                info!("Session {}: sending path of length={}", session.id, path.len());
                session
                    .control
                    .move_joint_blended(&path)
                    .await
                    .map_err(|e| motion_failure("blended joint move", e))
            }
            CommandGroup::Single(Action::Wait { wait_time }) => {
                let duration = Duration::try_from_secs_f64(*wait_time).map_err(|_| {
                    URError::MotionCommand(format!("Invalid wait time: {}", wait_time))
                })?;
                info!("Session {}: waiting {:.3}s", session.id, duration.as_secs_f64());
                sleep(duration).await;
                Ok(())
            }
            CommandGroup::Single(Action::SetDigitalIo { signal, value }) => {
                info!("Session {}: setting digital output {} to {}", session.id, signal, value);
                session
                    .io
                    .set_standard_digital_out(*signal, *value)
                    .await
                    .map_err(|e| motion_failure("set digital output", e))
            }
        }
    }
}

fn motion_failure(step: &str, error: URError) -> URError {
    match error {
        URError::MotionCommand(message) => URError::MotionCommand(format!("{}: {}", step, message)),
        other => URError::MotionCommand(format!("{}: {}", step, other)),
    }
}
