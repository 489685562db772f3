//! Pure Rust implementation of the RTDE (Real-Time Data Exchange) protocol
//! Based on Universal Robots' official RTDE specification

use crate::{Result, URError};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// RTDE message types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RTDEMessage {
    RequestProtocolVersion = 86,
    TextMessage = 77,
    DataPackage = 85,
    ControlPackageSetupOutputs = 79,
    ControlPackageSetupInputs = 73,
    ControlPackageStart = 83,
    ControlPackagePause = 80,
}

impl RTDEMessage {
    fn from_byte(raw: u8) -> Result<Self> {
        match raw {
            86 => Ok(RTDEMessage::RequestProtocolVersion),
            77 => Ok(RTDEMessage::TextMessage),
            85 => Ok(RTDEMessage::DataPackage),
            79 => Ok(RTDEMessage::ControlPackageSetupOutputs),
            73 => Ok(RTDEMessage::ControlPackageSetupInputs),
            83 => Ok(RTDEMessage::ControlPackageStart),
            80 => Ok(RTDEMessage::ControlPackagePause),
            _ => Err(URError::Protocol(format!("Unknown message type: {}", raw))),
        }
    }
}

/// Output variables requested from the controller
pub const RECEIVE_VARIABLES: [&str; 4] = [
    "actual_q",
    "actual_TCP_pose",
    "actual_digital_output_bits",
    "tcp_offset",
];

/// Recipe output frequency in Hz
const OUTPUT_FREQUENCY: f64 = 125.0;

/// RTDE client for communicating with Universal Robots
pub struct RTDEClient {
    stream: TcpStream,
    io_timeout: Duration,
    variables: Vec<String>,
    variable_types: Vec<String>,
}

impl RTDEClient {
    /// Connect to the RTDE interface
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self> {
        let stream = timeout(io_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| URError::Connection(format!("Timed out connecting to RTDE at {}:{}", host, port)))?
            .map_err(|e| URError::Connection(format!("Failed to connect to RTDE at {}:{}: {}", host, port, e)))?;

        Ok(Self {
            stream,
            io_timeout,
            variables: Vec::new(),
            variable_types: Vec::new(),
        })
    }

    /// Send an RTDE message
    async fn send_message(&mut self, msg_type: RTDEMessage, payload: &[u8]) -> Result<()> {
        let size = (payload.len() + 3) as u16;
        let mut packet = Vec::with_capacity(size as usize);
        packet.extend_from_slice(&size.to_be_bytes());
        packet.push(msg_type as u8);
        packet.extend_from_slice(payload);

        self.stream
            .write_all(&packet)
            .await
            .map_err(|e| URError::Connection(format!("Failed to send RTDE message: {}", e)))
    }

    /// Receive an RTDE message, skipping controller text messages
    async fn receive_message(&mut self) -> Result<(RTDEMessage, Vec<u8>)> {
        loop {
            let mut header = [0u8; 3];
            self.read_exact(&mut header).await?;

            let size = u16::from_be_bytes([header[0], header[1]]) as usize;
            if size < 3 {
                return Err(URError::Protocol(format!("Invalid RTDE packet size: {}", size)));
            }
            let msg_type = RTDEMessage::from_byte(header[2])?;

            let mut payload = vec![0u8; size - 3];
            if !payload.is_empty() {
                self.read_exact(&mut payload).await?;
            }

            if msg_type == RTDEMessage::TextMessage {
                warn!("RTDE controller message: {}", String::from_utf8_lossy(&payload));
                continue;
            }
            return Ok((msg_type, payload));
        }
    }

    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        timeout(self.io_timeout, self.stream.read_exact(buffer))
            .await
            .map_err(|_| URError::Connection("RTDE read timeout".to_string()))?
            .map_err(|e| URError::Connection(format!("Failed to read RTDE packet: {}", e)))?;
        Ok(())
    }

    /// Receive messages until one of `expected` type arrives
    async fn expect(&mut self, expected: RTDEMessage) -> Result<Vec<u8>> {
        loop {
            let (msg_type, payload) = self.receive_message().await?;
            if msg_type == expected {
                return Ok(payload);
            }
            // Data packages still in flight around start/pause are dropped
            if msg_type != RTDEMessage::DataPackage {
                return Err(URError::Protocol(format!("Expected {:?}, got {:?}", expected, msg_type)));
            }
        }
    }

    /// Negotiate protocol version
    pub async fn negotiate_protocol_version(&mut self, requested_version: u16) -> Result<()> {
        self.send_message(RTDEMessage::RequestProtocolVersion, &requested_version.to_be_bytes())
            .await?;
        let payload = self.expect(RTDEMessage::RequestProtocolVersion).await?;

        if payload.first() == Some(&1) {
            Ok(())
        } else {
            Err(URError::Protocol("Protocol version negotiation failed".to_string()))
        }
    }

    /// Setup output recipe (configure what data to receive)
    pub async fn setup_output_recipe(&mut self, variables: &[&str], frequency: f64) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&frequency.to_be_bytes());
        payload.extend_from_slice(variables.join(",").as_bytes());

        self.send_message(RTDEMessage::ControlPackageSetupOutputs, &payload).await?;
        let response = self.expect(RTDEMessage::ControlPackageSetupOutputs).await?;

        if response.is_empty() {
            return Err(URError::Protocol("Output recipe setup failed".to_string()));
        }

        let variable_types: Vec<String> = String::from_utf8_lossy(&response[1..])
            .split(',')
            .map(|s| s.to_string())
            .collect();
        if let Some(index) = variable_types.iter().position(|t| t == "NOT_FOUND") {
            return Err(URError::Protocol(format!(
                "Controller does not provide RTDE output {}",
                variables.get(index).copied().unwrap_or("?")
            )));
        }

        self.variables = variables.iter().map(|v| v.to_string()).collect();
        self.variable_types = variable_types;
        Ok(())
    }

    pub async fn start_data_synchronization(&mut self) -> Result<()> {
        self.send_message(RTDEMessage::ControlPackageStart, &[]).await?;
        let payload = self.expect(RTDEMessage::ControlPackageStart).await?;
        if payload.first() == Some(&1) {
            Ok(())
        } else {
            Err(URError::Protocol("Failed to start data synchronization".to_string()))
        }
    }

    pub async fn pause_data_synchronization(&mut self) -> Result<()> {
        self.send_message(RTDEMessage::ControlPackagePause, &[]).await?;
        self.expect(RTDEMessage::ControlPackagePause).await?;
        Ok(())
    }

    /// Read and parse the next data package
    pub async fn read_data_package(&mut self) -> Result<HashMap<String, Vec<f64>>> {
        let payload = self.expect(RTDEMessage::DataPackage).await?;
        if payload.is_empty() {
            return Err(URError::Protocol("Empty data package".to_string()));
        }
        parse_data_package(&self.variables, &self.variable_types, &payload[1..])
    }

    /// Start synchronization, take one fresh package, then pause again
    pub async fn snapshot(&mut self) -> Result<HashMap<String, Vec<f64>>> {
        self.start_data_synchronization().await?;
        let data = self.read_data_package().await;
        self.pause_data_synchronization().await?;
        data
    }
}

/// Parse binary data according to variable types
pub fn parse_data_package(
    variables: &[String],
    variable_types: &[String],
    data: &[u8],
) -> Result<HashMap<String, Vec<f64>>> {
    let mut result = HashMap::new();
    let mut offset = 0;

    for (i, var_type) in variable_types.iter().enumerate() {
        let var_name = variables
            .get(i)
            .ok_or_else(|| URError::Protocol("Variable name missing".to_string()))?;

        let (count, width) = match var_type.as_str() {
            "VECTOR6D" => (6, 8),
            "DOUBLE" | "UINT64" => (1, 8),
            "INT32" | "UINT32" => (1, 4),
            _ => return Err(URError::Protocol(format!("Unsupported variable type: {}", var_type))),
        };

        if offset + count * width > data.len() {
            return Err(URError::Protocol(format!("Insufficient data for {}", var_type)));
        }

        let mut values = Vec::with_capacity(count);
        for j in 0..count {
            let start = offset + j * width;
            let bytes = &data[start..start + width];
            let value = match var_type.as_str() {
                "VECTOR6D" | "DOUBLE" => f64::from_be_bytes(to_array(bytes)),
                "UINT64" => u64::from_be_bytes(to_array(bytes)) as f64,
                "INT32" => i32::from_be_bytes(to_array(bytes)) as f64,
                _ => u32::from_be_bytes(to_array(bytes)) as f64,
            };
            values.push(value);
        }

        result.insert(var_name.clone(), values);
        offset += count * width;
    }

    Ok(result)
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(bytes);
    array
}

/// Latest robot feedback from an RTDE snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiveState {
    pub joint_positions: [f64; 6],
    pub tcp_pose: [f64; 6],
    pub digital_output_bits: u64,
    pub tcp_offset: [f64; 6],
}

impl ReceiveState {
    pub fn from_package(data: &HashMap<String, Vec<f64>>) -> Result<Self> {
        Ok(Self {
            joint_positions: vector6(data, "actual_q")?,
            tcp_pose: vector6(data, "actual_TCP_pose")?,
            digital_output_bits: scalar(data, "actual_digital_output_bits")? as u64,
            tcp_offset: vector6(data, "tcp_offset")?,
        })
    }

    pub fn digital_output(&self, signal: u8) -> bool {
        signal < 64 && (self.digital_output_bits >> signal) & 1 == 1
    }
}

fn vector6(data: &HashMap<String, Vec<f64>>, name: &str) -> Result<[f64; 6]> {
    let values = data
        .get(name)
        .filter(|v| v.len() == 6)
        .ok_or_else(|| URError::Protocol(format!("Data package missing {}", name)))?;
    let mut array = [0.0; 6];
    array.copy_from_slice(values);
    Ok(array)
}

fn scalar(data: &HashMap<String, Vec<f64>>, name: &str) -> Result<f64> {
    data.get(name)
        .and_then(|v| v.first())
        .copied()
        .ok_or_else(|| URError::Protocol(format!("Data package missing {}", name)))
}

/// RTDE feedback link; each query reads a fresh package
pub struct RTDEReceiver {
    client: Mutex<RTDEClient>,
}

impl RTDEReceiver {
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self> {
        let mut client = RTDEClient::connect(host, port, io_timeout).await?;
        client.negotiate_protocol_version(2).await?;
        client.setup_output_recipe(&RECEIVE_VARIABLES, OUTPUT_FREQUENCY).await?;
        debug!("RTDE receiver ready on {}:{}", host, port);
        Ok(Self { client: Mutex::new(client) })
    }

    pub async fn state(&self) -> Result<ReceiveState> {
        let mut client = self.client.lock().await;
        let data = client.snapshot().await?;
        ReceiveState::from_package(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_mixed_package() {
        let mut data = Vec::new();
        for v in [0.1, 0.2, 0.3, 0.4, 0.5, 0.6] {
            data.extend_from_slice(&f64::to_be_bytes(v));
        }
        data.extend_from_slice(&0b1010u64.to_be_bytes());
        data.extend_from_slice(&7i32.to_be_bytes());

        let parsed = parse_data_package(
            &names(&["actual_q", "actual_digital_output_bits", "robot_mode"]),
            &names(&["VECTOR6D", "UINT64", "INT32"]),
            &data,
        )
        .unwrap();

        assert_eq!(parsed["actual_q"], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(parsed["actual_digital_output_bits"], vec![10.0]);
        assert_eq!(parsed["robot_mode"], vec![7.0]);
    }

    #[test]
    fn test_truncated_package_is_rejected() {
        let data = vec![0u8; 20];
        let result = parse_data_package(&names(&["actual_q"]), &names(&["VECTOR6D"]), &data);
        assert!(matches!(result, Err(URError::Protocol(_))));
    }

    #[test]
    fn test_digital_output_bits() {
        let state = ReceiveState {
            digital_output_bits: 0b1000_0100,
            ..ReceiveState::default()
        };
        assert!(state.digital_output(2));
        assert!(state.digital_output(7));
        assert!(!state.digital_output(3));
        assert!(!state.digital_output(64));
    }

    #[test]
    fn test_state_requires_all_outputs() {
        let mut data = HashMap::new();
        data.insert("actual_q".to_string(), vec![0.0; 6]);
        assert!(ReceiveState::from_package(&data).is_err());
    }
}
