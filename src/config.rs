//! Configuration loading for the fabrication client

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use crate::{Result, URError};

/// Default primary interface port for UR robots
pub const UR_PRIMARY_PORT: u16 = 30001;
/// Default interpreter-mode port
pub const UR_INTERPRETER_PORT: u16 = 30020;
/// Default RTDE port
pub const UR_RTDE_PORT: u16 = 30004;
/// Upper bound for `connect_timeout_seconds`
pub const MAX_CONNECT_TIMEOUT_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub robot: RobotConfig,
    pub engine: EngineConfig,
    pub defaults: MovementDefaults,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    pub host: String,
    pub ports: PortConfig,
    pub connect_timeout_seconds: f64,
    /// Send the interpreter-mode script on the primary port when the
    /// interpreter socket is not accepting connections
    pub bootstrap_interpreter: bool,
    /// Connection attempts (one per second) after bootstrapping
    pub interpreter_connect_attempts: u32,
    pub completion_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    pub primary: u16,
    pub interpreter: u16,
    pub rtde: u16,
}

/// Whether robot handles are cached per address or opened per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionReuse {
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub connection_reuse: ConnectionReuse,
    pub serialize_per_address: bool,
    /// Deceleration (rad/s^2) used when halting before a new session
    pub stop_deceleration: f64,
    /// Seconds a per-address worker waits for work before exiting
    pub worker_idle_seconds: u64,
}

/// Fallbacks for `configuration` commands that omit motion parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MovementDefaults {
    pub acceleration: f64,
    pub blend_radius: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: PortConfig::default(),
            connect_timeout_seconds: 5.0,
            bootstrap_interpreter: false,
            interpreter_connect_attempts: 10,
            completion_poll_ms: 50,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            primary: UR_PRIMARY_PORT,
            interpreter: UR_INTERPRETER_PORT,
            rtde: UR_RTDE_PORT,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_reuse: ConnectionReuse::Disabled,
            serialize_per_address: true,
            stop_deceleration: 2.0,
            worker_idle_seconds: 60,
        }
    }
}

impl Default for MovementDefaults {
    fn default() -> Self {
        Self {
            acceleration: 1.0,
            blend_radius: 0.01,
        }
    }
}

impl Config {
    pub fn load_from_path(config_path: &str) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .map_err(|e| URError::Config(format!("Failed to read {}: {}", config_path, e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.robot.connect_timeout()?;
        positive_finite("engine.stop_deceleration", self.engine.stop_deceleration)?;
        positive_finite("defaults.acceleration", self.defaults.acceleration)?;
        if !self.defaults.blend_radius.is_finite() || self.defaults.blend_radius < 0.0 {
            return Err(URError::Config(format!(
                "defaults.blend_radius must be finite and non-negative, got {}",
                self.defaults.blend_radius
            )));
        }
        Ok(())
    }
}

impl RobotConfig {
    /// Connect and reply timeout as a `Duration`.
    ///
    /// Fails for non-finite, non-positive or oversized values instead of
    /// panicking in the conversion.
    pub fn connect_timeout(&self) -> Result<Duration> {
        let seconds = self.connect_timeout_seconds;
        positive_finite("robot.connect_timeout_seconds", seconds)?;
        if seconds > MAX_CONNECT_TIMEOUT_SECONDS {
            return Err(URError::Config(format!(
                "robot.connect_timeout_seconds must be at most {}, got {}",
                MAX_CONNECT_TIMEOUT_SECONDS, seconds
            )));
        }
        Duration::try_from_secs_f64(seconds)
            .map_err(|e| URError::Config(format!("robot.connect_timeout_seconds: {}", e)))
    }
}

fn positive_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(URError::Config(format!("{} must be positive and finite, got {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::load_from_str("").unwrap();
        assert_eq!(config.robot.host, "127.0.0.1");
        assert_eq!(config.robot.ports.interpreter, UR_INTERPRETER_PORT);
        assert_eq!(config.engine.connection_reuse, ConnectionReuse::Disabled);
        assert!(config.engine.serialize_per_address);
        assert_eq!(config.defaults.blend_radius, 0.01);
    }

    #[test]
    fn test_partial_document() {
        let yaml = "robot:\n  host: 10.0.0.5\nengine:\n  connection_reuse: enabled\n";
        let config = Config::load_from_str(yaml).unwrap();
        assert_eq!(config.robot.host, "10.0.0.5");
        assert_eq!(config.robot.ports.rtde, UR_RTDE_PORT);
        assert_eq!(config.engine.connection_reuse, ConnectionReuse::Enabled);
        assert_eq!(config.engine.stop_deceleration, 2.0);
    }

    #[test]
    fn test_rejects_non_positive_deceleration() {
        let yaml = "engine:\n  stop_deceleration: 0.0\n";
        assert!(matches!(Config::load_from_str(yaml), Err(URError::Config(_))));
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let documents = [
            "engine:\n  stop_deceleration: .nan\n",
            "engine:\n  stop_deceleration: .inf\n",
            "robot:\n  connect_timeout_seconds: .nan\n",
            "robot:\n  connect_timeout_seconds: .inf\n",
            "defaults:\n  acceleration: .nan\n",
            "defaults:\n  blend_radius: -.inf\n",
        ];
        for yaml in documents {
            assert!(
                matches!(Config::load_from_str(yaml), Err(URError::Config(_))),
                "accepted {:?}",
                yaml
            );
        }
    }

    #[test]
    fn test_rejects_oversized_timeout() {
        let yaml = "robot:\n  connect_timeout_seconds: 1.0e20\n";
        assert!(matches!(Config::load_from_str(yaml), Err(URError::Config(_))));
    }

    #[test]
    fn test_connect_timeout_conversion_never_panics() {
        let mut robot = RobotConfig::default();
        assert_eq!(robot.connect_timeout().unwrap(), Duration::from_secs(5));

        for seconds in [f64::NAN, f64::INFINITY, 1.0e20, -1.0, 0.0] {
            robot.connect_timeout_seconds = seconds;
            assert!(matches!(robot.connect_timeout(), Err(URError::Config(_))));
        }
    }
}
