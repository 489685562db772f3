//! Execution engine - runs command sequences in the background
//!
//! `submit` hands a command sequence to a background task and returns at once.
//! Each session acquires its own control and IO handles, halts any motion
//! already in progress, groups the commands and dispatches them in order.
//! Failures are logged and recorded in the session report; they never reach
//! the submitting caller directly.
//!
//! With `serialize_per_address` enabled, submissions to one robot run one
//! after another in submission order through a per-address worker. A worker
//! that sees no work for `worker_idle_seconds` removes itself; the next
//! submission for that address starts a new one.

use crate::command::{group_commands, Command};
use crate::config::{EngineConfig, MovementDefaults};
use crate::connection::ConnectionPool;
use crate::dispatcher::{Dispatcher, ExecutionSession};
use crate::{Result, URError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of one submitted command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    StoppingCurrentMotion,
    Grouping,
    Dispatching,
    Completed,
    Failed,
}

/// Outcome of one session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: Uuid,
    pub address: String,
    /// `Completed` or `Failed`
    pub state: SessionState,
    /// Phase that raised the error, if any
    pub failed_during: Option<SessionState>,
    pub error: Option<String>,
    pub groups: usize,
    pub groups_dispatched: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }
}

/// Handle returned by [`ExecutionEngine::submit`].
///
/// Dropping it leaves the session running; awaiting [`Submission::wait`]
/// yields the final report.
#[derive(Debug)]
pub struct Submission {
    id: Uuid,
    report: oneshot::Receiver<SessionReport>,
}

impl Submission {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> Result<SessionReport> {
        self.report
            .await
            .map_err(|_| URError::SessionLost(self.id.to_string()))
    }
}

struct QueuedSession {
    id: Uuid,
    address: String,
    commands: Vec<Command>,
    reply: oneshot::Sender<SessionReport>,
}

/// Runs a single session from handle acquisition to report
struct SessionRunner {
    pool: Arc<ConnectionPool>,
    dispatcher: Dispatcher,
    stop_deceleration: f64,
}

impl SessionRunner {
    async fn run(&self, id: Uuid, address: &str, commands: Vec<Command>) -> SessionReport {
        let started_at = Utc::now();
        let mut state = SessionState::Idle;
        let mut groups = 0;
        let mut groups_dispatched = 0;

        let outcome = self
            .execute(id, address, commands, &mut state, &mut groups, &mut groups_dispatched)
            .await;

        let (final_state, failed_during, error) = match outcome {
            Ok(()) => {
                info!("Session {} on {} completed: {} groups dispatched", id, address, groups_dispatched);
                (SessionState::Completed, None, None)
            }
            Err(e) => {
                error!(
                    "Session {} on {} failed during {:?} after {}/{} groups: {}",
                    id, address, state, groups_dispatched, groups, e
                );
                self.pool.evict(address).await;
                (SessionState::Failed, Some(state), Some(e.to_string()))
            }
        };

        SessionReport {
            id,
            address: address.to_string(),
            state: final_state,
            failed_during,
            error,
            groups,
            groups_dispatched,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute(
        &self,
        id: Uuid,
        address: &str,
        commands: Vec<Command>,
        state: &mut SessionState,
        groups: &mut usize,
        groups_dispatched: &mut usize,
    ) -> Result<()> {
        *state = SessionState::Starting;
        debug!("Session {}: acquiring connections to {}", id, address);
        let control = self.pool.control(address).await?;
        let io = self.pool.io(address).await?;
        let mut session = ExecutionSession::new(id, address, control, io);

        *state = SessionState::StoppingCurrentMotion;
        session
            .control()
            .halt(self.stop_deceleration)
            .await
            .map_err(|e| URError::MotionCommand(format!("halt before session: {}", e)))?;

        *state = SessionState::Grouping;
        let grouped = group_commands(commands);
        *groups = grouped.len();
        info!("Session {}: {} groups to dispatch on {}", id, grouped.len(), address);

        *state = SessionState::Dispatching;
        let result = self.dispatcher.dispatch(&grouped, &mut session).await;
        *groups_dispatched = session.groups_dispatched();
        result
    }
}

type WorkerQueues = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<QueuedSession>>>>;

fn lock_queues(queues: &WorkerQueues) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<QueuedSession>>> {
    queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background executor for command sequences
pub struct ExecutionEngine {
    runner: Arc<SessionRunner>,
    serialize_per_address: bool,
    worker_idle: Duration,
    queues: WorkerQueues,
}

impl ExecutionEngine {
    pub fn new(pool: Arc<ConnectionPool>, config: &EngineConfig, defaults: MovementDefaults) -> Self {
        Self {
            runner: Arc::new(SessionRunner {
                pool,
                dispatcher: Dispatcher::new(defaults),
                stop_deceleration: config.stop_deceleration,
            }),
            serialize_per_address: config.serialize_per_address,
            worker_idle: Duration::from_secs(config.worker_idle_seconds),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start executing `commands` on the robot at `address` without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, commands: Vec<Command>, address: &str) -> Submission {
        let id = Uuid::new_v4();
        let (reply, report) = oneshot::channel();
        info!("Submitting session {} with {} commands to {}", id, commands.len(), address);

        let job = QueuedSession {
            id,
            address: address.to_string(),
            commands,
            reply,
        };

        if self.serialize_per_address {
            self.enqueue(job);
        } else {
            let runner = Arc::clone(&self.runner);
            tokio::spawn(async move {
                let report = runner.run(job.id, &job.address, job.commands).await;
                let _ = job.reply.send(report);
            });
        }

        Submission { id, report }
    }

    /// Halt the robot on a fresh control handle.
    ///
    /// Running sessions are not cancelled and may issue further motion.
    pub async fn stop(&self, address: &str) -> Result<()> {
        info!("Stopping robot at {}", address);
        let control = self.runner.pool.fresh_control(address).await?;
        control.halt(self.runner.stop_deceleration).await
    }

    /// Number of per-address workers currently alive
    pub fn active_workers(&self) -> usize {
        lock_queues(&self.queues).len()
    }

    fn enqueue(&self, job: QueuedSession) {
        let mut queues = lock_queues(&self.queues);

        let job = match queues.get(&job.address) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => {
                    warn!("Worker for {} has exited, restarting", job.address);
                    job
                }
            },
            None => job,
        };

        let address = job.address.clone();
        let sender = self.spawn_worker(address.clone());
        // A freshly spawned worker is still receiving
        let _ = sender.send(job);
        queues.insert(address, sender);
    }

    fn spawn_worker(&self, address: String) -> mpsc::UnboundedSender<QueuedSession> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedSession>();
        let runner = Arc::clone(&self.runner);
        let queues = Arc::clone(&self.queues);
        let idle = self.worker_idle;

        tokio::spawn(async move {
            debug!("Session worker for {} started", address);
            loop {
                let job = match timeout(idle, receiver.recv()).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(_) => {
                        // Senders hold the same lock, so nothing can arrive between
                        // the empty check and the removal
                        let mut queues = lock_queues(&queues);
                        match receiver.try_recv() {
                            Ok(job) => job,
                            Err(_) => {
                                queues.remove(&address);
                                break;
                            }
                        }
                    }
                };
                let report = runner.run(job.id, &job.address, job.commands).await;
                let _ = job.reply.send(report);
            }
            debug!("Session worker for {} stopped", address);
        });
        sender
    }
}
