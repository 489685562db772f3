//! Robot connection boundary
//!
//! The control, receive and IO links are opaque handles produced by a
//! [`ConnectionProvider`]. [`ConnectionPool`] decides whether handles are
//! cached per robot address or opened fresh for every use.

use crate::config::ConnectionReuse;
use crate::trajectory::TrajectoryPoint;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Motion and mode control link
///
/// Every call returns once the robot has finished the requested action,
/// except moves issued with `blocking == false`.
#[async_trait]
pub trait ControlHandle: Send + Sync {
    /// Decelerate joints to a stop (rad/s^2)
    async fn halt(&self, deceleration: f64) -> Result<()>;

    /// Move through all points as one blended joint path
    async fn move_joint_blended(&self, path: &[TrajectoryPoint]) -> Result<()>;

    /// Joint move to `target` in radians.
    ///
    /// Speed in rad/s, acceleration in rad/s^2. With `blocking == false`
    /// the call returns once the robot has queued the move.
    async fn move_joint(&self, target: [f64; 6], speed: f64, acceleration: f64, blocking: bool) -> Result<()>;

    /// Linear tool move to the pose reached by `target` joints.
    ///
    /// Speed in m/s, acceleration in m/s^2.
    async fn move_linear_fk(&self, target: [f64; 6], speed: f64, acceleration: f64, blocking: bool) -> Result<()>;

    /// Active TCP offset `[x, y, z, rx, ry, rz]` relative to the flange
    async fn tcp_offset(&self) -> Result<[f64; 6]>;

    /// Enable freedrive so the arm can be guided by hand
    async fn enter_teach_mode(&self) -> Result<()>;

    async fn exit_teach_mode(&self) -> Result<()>;
}

/// Robot state feedback link
#[async_trait]
pub trait ReceiveHandle: Send + Sync {
    /// Joint angles in radians, shoulder-pan through wrist-3
    async fn actual_joint_positions(&self) -> Result<[f64; 6]>;

    /// Whether standard digital output `signal` is high
    async fn digital_output_state(&self, signal: u8) -> Result<bool>;

    /// TCP pose `[x, y, z, rx, ry, rz]`
    async fn actual_tcp_pose(&self) -> Result<[f64; 6]>;
}

/// Digital output link
#[async_trait]
pub trait IoHandle: Send + Sync {
    /// Set a controller cabinet output; returns once the robot has applied it
    async fn set_standard_digital_out(&self, signal: u8, value: bool) -> Result<()>;

    /// Set an output on the tool connector
    async fn set_tool_digital_out(&self, signal: u8, value: bool) -> Result<()>;
}

/// Factory for robot handles.
///
/// Each call opens a new link to `address`; caching is left to
/// [`ConnectionPool`].
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect_control(&self, address: &str) -> Result<Arc<dyn ControlHandle>>;

    async fn connect_receive(&self, address: &str) -> Result<Arc<dyn ReceiveHandle>>;

    async fn connect_io(&self, address: &str) -> Result<Arc<dyn IoHandle>>;
}

type HandleCache<H> = Mutex<HashMap<String, Arc<H>>>;

/// Hands out robot handles according to the configured reuse policy
pub struct ConnectionPool {
    provider: Arc<dyn ConnectionProvider>,
    reuse: ConnectionReuse,
    control: HandleCache<dyn ControlHandle>,
    receive: HandleCache<dyn ReceiveHandle>,
    io: HandleCache<dyn IoHandle>,
}

impl ConnectionPool {
    pub fn new(provider: Arc<dyn ConnectionProvider>, reuse: ConnectionReuse) -> Self {
        Self {
            provider,
            reuse,
            control: Mutex::new(HashMap::new()),
            receive: Mutex::new(HashMap::new()),
            io: Mutex::new(HashMap::new()),
        }
    }

    /// Reuse policy this pool was created with
    pub fn reuse(&self) -> ConnectionReuse {
        self.reuse
    }

    /// Control handle for `address`, cached when reuse is enabled
    pub async fn control(&self, address: &str) -> Result<Arc<dyn ControlHandle>> {
        self.acquire(&self.control, address, self.provider.connect_control(address)).await
    }

    pub async fn receive(&self, address: &str) -> Result<Arc<dyn ReceiveHandle>> {
        self.acquire(&self.receive, address, self.provider.connect_receive(address)).await
    }

    pub async fn io(&self, address: &str) -> Result<Arc<dyn IoHandle>> {
        self.acquire(&self.io, address, self.provider.connect_io(address)).await
    }

    /// Control handle that bypasses the cache
    pub async fn fresh_control(&self, address: &str) -> Result<Arc<dyn ControlHandle>> {
        self.provider.connect_control(address).await
    }

    /// Drop cached handles for `address` so the next use reconnects
    pub async fn evict(&self, address: &str) {
        if self.reuse == ConnectionReuse::Disabled {
            return;
        }
        let removed = self.control.lock().await.remove(address).is_some()
            | self.receive.lock().await.remove(address).is_some()
            | self.io.lock().await.remove(address).is_some();
        if removed {
            info!("Evicted cached connections for {}", address);
        }
    }

    async fn acquire<H, F>(&self, cache: &HandleCache<H>, address: &str, connect: F) -> Result<Arc<H>>
    where
        H: ?Sized,
        F: Future<Output = Result<Arc<H>>>,
    {
        if self.reuse == ConnectionReuse::Disabled {
            return connect.await;
        }

        // Held across connect so concurrent callers share one handle
        let mut guard = cache.lock().await;
        if let Some(handle) = guard.get(address) {
            debug!("Reusing cached connection for {}", address);
            return Ok(Arc::clone(handle));
        }

        let handle = connect.await?;
        guard.insert(address.to_string(), Arc::clone(&handle));
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[tokio::test]
    async fn test_disabled_reuse_connects_every_time() {
        let provider = Arc::new(MockProvider::new());
        let pool = ConnectionPool::new(provider.clone(), ConnectionReuse::Disabled);

        pool.control("10.0.0.1").await.unwrap();
        pool.control("10.0.0.1").await.unwrap();
        pool.io("10.0.0.1").await.unwrap();

        assert_eq!(provider.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_enabled_reuse_caches_per_address() {
        let provider = Arc::new(MockProvider::new());
        let pool = ConnectionPool::new(provider.clone(), ConnectionReuse::Enabled);

        let first = pool.control("10.0.0.1").await.unwrap();
        let second = pool.control("10.0.0.1").await.unwrap();
        pool.control("10.0.0.2").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.connect_count(), 2);

        pool.evict("10.0.0.1").await;
        pool.control("10.0.0.1").await.unwrap();
        assert_eq!(provider.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_cached() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_connections(true);
        let pool = ConnectionPool::new(provider.clone(), ConnectionReuse::Enabled);

        assert!(pool.control("10.0.0.1").await.is_err());

        provider.fail_connections(false);
        assert!(pool.control("10.0.0.1").await.is_ok());
    }
}
