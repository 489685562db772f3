//! Error types for robot command execution

use thiserror::Error;

pub type Result<T> = std::result::Result<T, URError>;

#[derive(Error, Debug)]
pub enum URError {
    #[error("Missing joint in configuration: {0}")]
    MissingJoint(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Motion command failed: {0}")]
    MotionCommand(String),

    #[error("Statement rejected by interpreter: {0}")]
    Rejected(String),

    #[error("Session {0} ended without a report")]
    SessionLost(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RTDE protocol error: {0}")]
    Protocol(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
