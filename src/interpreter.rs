//! UR Robot Interpreter Client
//!
//! Async client for the Universal Robots interpreter-mode socket. Each
//! URScript statement is acknowledged with an id (`ack: <id>`) or rejected
//! (`discard`). Completion is tracked by polling `statelastexecuted`.

use crate::trajectory::TrajectoryPoint;
use crate::{Result, URError};
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info};

/// Statements after which the interpreter buffer is cleared.
/// Prevents "runtime too much behind" errors in interpreter mode.
const CLEAR_BUFFER_LIMIT: u32 = 500;

/// Script sent on the primary port to enter interpreter mode
pub const INTERPRETER_BOOTSTRAP_SCRIPT: &str =
    "def ur_init():\n  textmsg(\"Starting interpreter mode\")\n  interpreter_mode()\nend\nur_init()\n";

struct InterpreterStream {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct InterpreterClient {
    stream: Mutex<InterpreterStream>,
    state_reply_pattern: Regex,
    reply_timeout: Duration,
    poll_interval: Duration,
    statements_since_clear: AtomicU32,
    /// Set once a reply went missing; later replies can no longer be paired
    desynchronized: AtomicBool,
}

impl InterpreterClient {
    /// Connect to the interpreter socket
    pub async fn connect(host: &str, port: u16, reply_timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let stream = timeout(reply_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| URError::Connection(format!("Timed out connecting to {}:{}", host, port)))?
            .map_err(|e| URError::Connection(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
        let (read_half, writer) = stream.into_split();

        debug!("Connected to interpreter at {}:{}", host, port);
        Ok(Self {
            stream: Mutex::new(InterpreterStream {
                reader: BufReader::new(read_half),
                writer,
            }),
            state_reply_pattern: Regex::new(r"(\w+):\W+(\d+)?")
                .map_err(|e| URError::Protocol(e.to_string()))?,
            reply_timeout,
            poll_interval,
            statements_since_clear: AtomicU32::new(0),
            desynchronized: AtomicBool::new(false),
        })
    }

    /// Connect, retrying once per second while interpreter mode starts up
    pub async fn connect_with_retry(
        host: &str,
        port: u16,
        attempts: u32,
        reply_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::connect(host, port, reply_timeout, poll_interval).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt >= attempts => {
                    return Err(URError::Connection(format!(
                        "Interpreter unavailable after {} attempts: {}",
                        attempts, e
                    )))
                }
                Err(_) => {
                    info!("Waiting for interpreter mode (attempt {}/{})", attempt, attempts);
                    attempt += 1;
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Send a statement and return the id it was queued under.
    ///
    /// A reply timeout leaves the late reply in the socket buffer, so the
    /// client refuses further statements afterwards and the caller must
    /// reconnect. A `discard` reply is returned as [`URError::Rejected`].
    pub async fn execute(&self, statement: &str) -> Result<u32> {
        if self.desynchronized.load(Ordering::SeqCst) {
            return Err(URError::Connection(
                "Interpreter connection lost track of replies, reconnect required".to_string(),
            ));
        }

        let raw_reply = {
            let mut stream = self.stream.lock().await;
            let line = format!("{}\n", statement.trim_end());
            stream.writer.write_all(line.as_bytes()).await?;

            let mut raw_reply = String::new();
            let read = match timeout(self.reply_timeout, stream.reader.read_line(&mut raw_reply)).await {
                Ok(read) => read?,
                Err(_) => {
                    self.desynchronized.store(true, Ordering::SeqCst);
                    return Err(URError::Connection(
                        "Interpreter response timeout - robot may be halted or unresponsive".to_string(),
                    ));
                }
            };
            if read == 0 {
                self.desynchronized.store(true, Ordering::SeqCst);
                return Err(URError::Connection("Interpreter closed the connection".to_string()));
            }
            raw_reply.trim().to_string()
        };

        let (status, id) = parse_reply(&self.state_reply_pattern, &raw_reply)?;
        if status == "discard" {
            return Err(URError::Rejected(format!("{} ({})", statement, raw_reply)));
        }

        debug!("Interpreter accepted {} as {}", statement, id);
        Ok(id)
    }

    /// Whether the client can still pair statements with replies
    pub fn is_usable(&self) -> bool {
        !self.desynchronized.load(Ordering::SeqCst)
    }

    /// Send a statement and wait until the robot has executed it
    pub async fn execute_and_wait(&self, statement: &str) -> Result<u32> {
        let id = self.execute(statement).await?;
        self.statements_since_clear.fetch_add(1, Ordering::Relaxed);
        self.wait_executed(id).await?;
        self.clear_if_needed().await?;
        Ok(id)
    }

    /// Poll until `statelastexecuted` reaches `id`
    pub async fn wait_executed(&self, id: u32) -> Result<()> {
        loop {
            if self.last_executed_id().await? >= id {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }

    pub async fn last_executed_id(&self) -> Result<u32> {
        self.execute("statelastexecuted").await
    }

    /// Abort the motion currently executing
    pub async fn abort_move(&self) -> Result<u32> {
        self.execute("abort").await
    }

    /// Skip statements queued but not yet executed
    pub async fn skip_buffer(&self) -> Result<u32> {
        self.execute("skipbuffer").await
    }

    pub async fn clear(&self) -> Result<u32> {
        let id = self.execute("clear_interpreter()").await?;
        self.statements_since_clear.store(0, Ordering::Relaxed);
        Ok(id)
    }

    async fn clear_if_needed(&self) -> Result<()> {
        let count = self.statements_since_clear.load(Ordering::Relaxed);
        if count >= CLEAR_BUFFER_LIMIT {
            info!("Clearing interpreter buffer after {} statements", count);
            self.clear().await?;
        }
        Ok(())
    }

    /// Queue every waypoint as a blending `movej`, then wait for the last one
    pub async fn move_path(&self, path: &[TrajectoryPoint]) -> Result<()> {
        let mut last_id = None;
        for (index, point) in path.iter().enumerate() {
            // The final waypoint must come to rest
            let blend = if index + 1 == path.len() { 0.0 } else { point.blend_radius };
            let statement = movej_statement(&point.joints, point.speed, point.acceleration, blend)?;
            last_id = Some(self.execute(&statement).await?);
            self.statements_since_clear.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(id) = last_id {
            self.wait_executed(id).await?;
            self.clear_if_needed().await?;
        }
        Ok(())
    }
}

fn parse_reply(pattern: &Regex, raw_reply: &str) -> Result<(String, u32)> {
    let reply = pattern
        .captures(raw_reply)
        .ok_or_else(|| URError::Protocol(format!("Invalid interpreter reply format: {}", raw_reply)))?;
    let status = reply
        .get(1)
        .ok_or_else(|| URError::Protocol(format!("Missing status in reply: {}", raw_reply)))?
        .as_str()
        .to_string();
    let id = reply
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0);
    Ok((status, id))
}

/// URScript joint list literal, e.g. `[0.1,0.2,0.3,0.4,0.5,0.6]`
pub fn joint_list(joints: &[f64; 6]) -> Result<String> {
    if let Some(bad) = joints.iter().find(|v| !v.is_finite()) {
        return Err(URError::MotionCommand(format!("Non-finite joint value: {}", bad)));
    }
    let values: Vec<String> = joints.iter().map(|v| v.to_string()).collect();
    Ok(format!("[{}]", values.join(",")))
}

pub fn movej_statement(joints: &[f64; 6], speed: f64, acceleration: f64, blend: f64) -> Result<String> {
    check_finite(&[speed, acceleration, blend])?;
    Ok(format!("movej({}, a={}, v={}, r={})", joint_list(joints)?, acceleration, speed, blend))
}

/// `movel` given joint positions moves linearly to their forward kinematics pose
pub fn movel_statement(joints: &[f64; 6], speed: f64, acceleration: f64) -> Result<String> {
    check_finite(&[speed, acceleration])?;
    Ok(format!("movel({}, a={}, v={})", joint_list(joints)?, acceleration, speed))
}

/// Joint-space stop with the given deceleration in rad/s^2
pub fn stopj_statement(deceleration: f64) -> Result<String> {
    check_finite(&[deceleration])?;
    Ok(format!("stopj({})", deceleration))
}

fn check_finite(values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(bad) => Err(URError::MotionCommand(format!("Non-finite motion parameter: {}", bad))),
        None => Ok(()),
    }
}

pub fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_ack_and_discard() {
        let pattern = Regex::new(r"(\w+):\W+(\d+)?").unwrap();

        let (status, id) = parse_reply(&pattern, "ack: 42: movej([0,0,0,0,0,0])").unwrap();
        assert_eq!(status, "ack");
        assert_eq!(id, 42);

        let (status, id) = parse_reply(&pattern, "discard: Too many interpreted statements").unwrap();
        assert_eq!(status, "discard");
        assert_eq!(id, 0);

        assert!(parse_reply(&pattern, "garbage").is_err());
    }

    #[test]
    fn test_statement_formatting() {
        let joints = [0.0, -1.57, 1.5, 0.25, 1.0, -0.5];
        assert_eq!(
            movej_statement(&joints, 0.1, 0.2, 0.01).unwrap(),
            "movej([0,-1.57,1.5,0.25,1,-0.5], a=0.2, v=0.1, r=0.01)"
        );
        assert_eq!(
            movel_statement(&joints, 0.25, 1.2).unwrap(),
            "movel([0,-1.57,1.5,0.25,1,-0.5], a=1.2, v=0.25)"
        );
        assert!(movej_statement(&[f64::NAN; 6], 0.1, 0.2, 0.0).is_err());
    }

    /// Fake interpreter that acks statements in order and reports them executed
    async fn fake_interpreter(discard: &'static str) -> (String, u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut received = Vec::new();
            let mut next_id = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = if line == "statelastexecuted" {
                    format!("statelastexecuted: {}\n", next_id)
                } else if line.starts_with(discard) {
                    format!("discard: {}\n", line)
                } else {
                    next_id += 1;
                    received.push(line.clone());
                    format!("ack: {}: {}\n", next_id, line)
                };
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
            received
        });
        ("127.0.0.1".to_string(), port, handle)
    }

    #[tokio::test]
    async fn test_move_path_blends_all_but_last() {
        let (host, port, server) = fake_interpreter("never").await;
        let client = InterpreterClient::connect(&host, port, Duration::from_secs(2), Duration::from_millis(1))
            .await
            .unwrap();

        let path = vec![
            TrajectoryPoint { joints: [0.0; 6], speed: 0.1, acceleration: 0.2, blend_radius: 0.01 },
            TrajectoryPoint { joints: [1.0; 6], speed: 0.1, acceleration: 0.2, blend_radius: 0.01 },
        ];
        client.move_path(&path).await.unwrap();
        drop(client);

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![
                "movej([0,0,0,0,0,0], a=0.2, v=0.1, r=0.01)".to_string(),
                "movej([1,1,1,1,1,1], a=0.2, v=0.1, r=0)".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_discarded_statement_is_rejected() {
        let (host, port, _server) = fake_interpreter("set_standard").await;
        let client = InterpreterClient::connect(&host, port, Duration::from_secs(2), Duration::from_millis(1))
            .await
            .unwrap();

        let result = client.execute_and_wait("set_standard_digital_out(3, True)").await;
        assert!(matches!(result, Err(URError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_reply_timeout_poisons_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut next_id = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                next_id += 1;
                if next_id == 1 {
                    // Reply to the first statement only after the client gave up
                    sleep(Duration::from_millis(200)).await;
                }
                let reply = format!("ack: {}: {}\n", next_id, line);
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let client = InterpreterClient::connect("127.0.0.1", port, Duration::from_millis(50), Duration::from_millis(1))
            .await
            .unwrap();
        assert!(matches!(client.execute("popup(\"slow\")").await, Err(URError::Connection(_))));
        assert!(!client.is_usable());

        // The late ack for statement 1 must never be taken as this statement's reply
        sleep(Duration::from_millis(300)).await;
        assert!(matches!(client.execute("textmsg(\"next\")").await, Err(URError::Connection(_))));

        drop(client);
        server.await.unwrap();
    }
}
