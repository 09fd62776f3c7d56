//! Network tools: `network:connections` and `network:port-check`.
//!
//! On Linux the TCP table comes from `/proc/net/tcp` and `/proc/net/tcp6`.
//! Elsewhere `netstat -an` is run through the sandbox and its TCP rows parsed.

use crate::registry::Tool;
use crate::sandbox::CommandSandbox;
use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::permissions::Capability;
use hearth_core::types::ToolContext;
use serde::Serialize;
use serde_json::{Value, json};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

const DEFAULT_CONNECTION_LIMIT: usize = 500;
const DEFAULT_PORT_CHECK_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    Unknown,
}

impl TcpState {
    /// State code as printed in `/proc/net/tcp`.
    pub fn from_hex(code: u8) -> Self {
        match code {
            0x01 => Self::Established,
            0x02 => Self::SynSent,
            0x03 => Self::SynRecv,
            0x04 => Self::FinWait1,
            0x05 => Self::FinWait2,
            0x06 => Self::TimeWait,
            0x07 => Self::Close,
            0x08 => Self::CloseWait,
            0x09 => Self::LastAck,
            0x0A => Self::Listen,
            0x0B => Self::Closing,
            _ => Self::Unknown,
        }
    }

    /// State column of BSD and Windows `netstat`.
    pub fn from_netstat(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "ESTABLISHED" => Self::Established,
            "SYN_SENT" => Self::SynSent,
            "SYN_RECEIVED" | "SYN_RCVD" | "SYN_RECV" => Self::SynRecv,
            "FIN_WAIT_1" | "FIN_WAIT1" => Self::FinWait1,
            "FIN_WAIT_2" | "FIN_WAIT2" => Self::FinWait2,
            "TIME_WAIT" => Self::TimeWait,
            "CLOSED" | "CLOSE" => Self::Close,
            "CLOSE_WAIT" => Self::CloseWait,
            "LAST_ACK" => Self::LastAck,
            "LISTEN" | "LISTENING" => Self::Listen,
            "CLOSING" => Self::Closing,
            _ => Self::Unknown,
        }
    }

    fn parse_filter(name: &str) -> Option<Self> {
        let state = Self::from_netstat(name);
        (state != Self::Unknown).then_some(state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpConnection {
    pub protocol: &'static str,
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
    pub state: TcpState,
}

/// Parse the contents of `/proc/net/tcp` (or `tcp6` when `ipv6`).
pub fn parse_proc_net_tcp(content: &str, ipv6: bool) -> Vec<TcpConnection> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            // sl local_address rem_address st tx_queue:rx_queue ...
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let (local_address, local_port) = proc_addr_port(parts[1], ipv6)?;
            let (remote_address, remote_port) = proc_addr_port(parts[2], ipv6)?;
            let state = u8::from_str_radix(parts[3], 16)
                .map(TcpState::from_hex)
                .unwrap_or(TcpState::Unknown);
            Some(TcpConnection {
                protocol: if ipv6 { "tcp6" } else { "tcp" },
                local_address,
                local_port,
                remote_address,
                remote_port,
                state,
            })
        })
        .collect()
}

fn proc_addr_port(field: &str, ipv6: bool) -> Option<(String, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let addr = if ipv6 {
        proc_ipv6(addr_hex)?.to_string()
    } else {
        proc_ipv4(addr_hex)?.to_string()
    };
    Some((addr, port))
}

/// IPv4 addresses are one little-endian 32-bit word.
fn proc_ipv4(hex: &str) -> Option<Ipv4Addr> {
    if hex.len() != 8 {
        return None;
    }
    let word = u32::from_str_radix(hex, 16).ok()?;
    Some(Ipv4Addr::from(word.swap_bytes()))
}

/// IPv6 addresses are four little-endian 32-bit words.
fn proc_ipv6(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 {
        return None;
    }
    let mut octets = [0u8; 16];
    for (i, chunk) in octets.chunks_mut(4).enumerate() {
        let word = u32::from_str_radix(&hex[i * 8..(i + 1) * 8], 16).ok()?;
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Some(Ipv6Addr::from(octets))
}

/// Parse the TCP rows of `netstat -an`.
///
/// BSD rows are `proto recv-q send-q local foreign state` with the port
/// after the last `.`. Windows rows are `proto local foreign state` with the
/// port after the last `:`.
pub fn parse_netstat(output: &str) -> Vec<TcpConnection> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let proto = parts.first()?.to_ascii_lowercase();
            if !proto.starts_with("tcp") {
                return None;
            }
            let (local, remote, state, separator) = match parts.len() {
                n if n >= 6 => (parts[3], parts[4], parts[5], '.'),
                4 => (parts[1], parts[2], parts[3], ':'),
                _ => return None,
            };
            let (local_address, local_port) = netstat_addr_port(local, separator)?;
            let (remote_address, remote_port) = netstat_addr_port(remote, separator)?;
            let ipv6 = proto.ends_with('6') || local_address.contains(':');
            Some(TcpConnection {
                protocol: if ipv6 { "tcp6" } else { "tcp" },
                local_address,
                local_port,
                remote_address,
                remote_port,
                state: TcpState::from_netstat(state),
            })
        })
        .collect()
}

fn netstat_addr_port(field: &str, separator: char) -> Option<(String, u16)> {
    let (addr, port) = field.rsplit_once(separator)?;
    let port = if port == "*" { 0 } else { port.parse().ok()? };
    let addr = addr.trim_start_matches('[').trim_end_matches(']');
    Some((addr.to_string(), port))
}

/// Current TCP sockets, optionally narrowed to one state.
pub struct NetworkConnectionsTool {
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    sandbox: CommandSandbox,
}

impl NetworkConnectionsTool {
    pub fn new(sandbox: CommandSandbox) -> Self {
        Self { sandbox }
    }

    #[cfg(target_os = "linux")]
    async fn table(&self) -> Result<Vec<TcpConnection>, String> {
        let v4 = tokio::fs::read_to_string("/proc/net/tcp")
            .await
            .map_err(|e| format!("cannot read /proc/net/tcp: {e}"))?;
        let mut connections = parse_proc_net_tcp(&v4, false);
        // tcp6 is absent when IPv6 is disabled.
        if let Ok(v6) = tokio::fs::read_to_string("/proc/net/tcp6").await {
            connections.extend(parse_proc_net_tcp(&v6, true));
        }
        Ok(connections)
    }

    #[cfg(not(target_os = "linux"))]
    async fn table(&self) -> Result<Vec<TcpConnection>, String> {
        let command = if cfg!(windows) { "netstat -an -p tcp" } else { "netstat -an" };
        let result = self.sandbox.run(command, None, None).await;
        if !result.ok {
            return Err(format!("netstat failed: {}", result.stderr.trim()));
        }
        Ok(parse_netstat(&result.stdout))
    }
}

#[async_trait]
impl Tool for NetworkConnectionsTool {
    fn name(&self) -> &str {
        "network:connections"
    }

    fn description(&self) -> &str {
        "List TCP sockets with local and remote endpoints and state. \
         'state' narrows the list, e.g. 'listen' or 'established'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "state": { "type": "string", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 5000 }
            }
        })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Network]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let state = match args["state"].as_str() {
            None => None,
            Some(name) => Some(TcpState::parse_filter(name).ok_or_else(|| {
                ToolError::InvalidArguments {
                    name: self.name().to_string(),
                    reason: format!("unknown TCP state '{name}'"),
                }
            })?),
        };
        let limit = args["limit"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_CONNECTION_LIMIT);

        let mut connections = self
            .table()
            .await
            .map_err(|message| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                message,
            })?;
        if let Some(wanted) = state {
            connections.retain(|c| c.state == wanted);
        }
        let total = connections.len();
        connections.truncate(limit);
        Ok(json!({ "connections": connections, "total": total }))
    }
}

/// Whether something accepts TCP connections on a port.
pub struct PortCheckTool;

#[async_trait]
impl Tool for PortCheckTool {
    fn name(&self) -> &str {
        "network:port-check"
    }

    fn description(&self) -> &str {
        "Try a TCP connection to host:port (host defaults to 127.0.0.1) and report whether it is open."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
                "host": { "type": "string", "minLength": 1 },
                "timeoutMs": { "type": "integer", "minimum": 1, "maximum": 30000 }
            },
            "required": ["port"]
        })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Network]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let port = args["port"]
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p > 0)
            .ok_or_else(|| ToolError::InvalidArguments {
                name: self.name().to_string(),
                reason: "'port' must be between 1 and 65535".into(),
            })?;
        let host = args["host"].as_str().unwrap_or("127.0.0.1");
        let timeout = Duration::from_millis(
            args["timeoutMs"]
                .as_u64()
                .unwrap_or(DEFAULT_PORT_CHECK_TIMEOUT_MS),
        );

        let started = Instant::now();
        let open = matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        );
        let mut reply = json!({ "host": host, "port": port, "open": open });
        if open {
            reply["latencyMs"] = json!(started.elapsed().as_millis() as u64);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::permissions::CapabilitySet;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    fn ctx() -> ToolContext {
        ToolContext::new("c1", CapabilitySet::all())
    }

    const PROC_TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41234 1 0000000000000000 100 0 0 10 0
   1: 0F02000A:9C4A 5DB8D822:01BB 01 00000000:00000000 02:000A7B2C 00000000  1000        0 41301 2 0000000000000000 20 4 30 10 -1
";

    const PROC_TCP6: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:0CEA 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000   123        0 30712 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn test_parse_proc_net_tcp() {
        let connections = parse_proc_net_tcp(PROC_TCP, false);
        assert_eq!(connections.len(), 2);
        assert_eq!(
            connections[0],
            TcpConnection {
                protocol: "tcp",
                local_address: "127.0.0.1".into(),
                local_port: 8080,
                remote_address: "0.0.0.0".into(),
                remote_port: 0,
                state: TcpState::Listen,
            }
        );
        assert_eq!(connections[1].local_address, "10.0.2.15");
        assert_eq!(connections[1].remote_address, "34.216.184.93");
        assert_eq!(connections[1].remote_port, 443);
        assert_eq!(connections[1].state, TcpState::Established);
    }

    #[test]
    fn test_parse_proc_net_tcp6() {
        let connections = parse_proc_net_tcp(PROC_TCP6, true);
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].protocol, "tcp6");
        assert_eq!(connections[0].local_address, "::1");
        assert_eq!(connections[0].local_port, 3306);
        assert_eq!(connections[0].state, TcpState::Listen);
    }

    #[test]
    fn test_parse_netstat_bsd_and_windows() {
        let bsd = "Active Internet connections (including servers)\n\
                   Proto Recv-Q Send-Q  Local Address          Foreign Address        (state)\n\
                   tcp4       0      0  127.0.0.1.5432         *.*                    LISTEN\n\
                   tcp6       0      0  fe80::1%lo0.631        *.*                    LISTEN\n\
                   tcp4       0      0  192.168.1.4.50212      140.82.114.26.443      ESTABLISHED\n\
                   udp4       0      0  *.5353                 *.*\n";
        let connections = parse_netstat(bsd);
        assert_eq!(connections.len(), 3);
        assert_eq!(connections[0].local_address, "127.0.0.1");
        assert_eq!(connections[0].local_port, 5432);
        assert_eq!(connections[0].remote_port, 0);
        assert_eq!(connections[1].protocol, "tcp6");
        assert_eq!(connections[1].local_port, 631);
        assert_eq!(connections[2].remote_address, "140.82.114.26");
        assert_eq!(connections[2].state, TcpState::Established);

        let windows = "\r\nActive Connections\r\n\r\n  Proto  Local Address          Foreign Address        State\r\n\
                       \x20 TCP    0.0.0.0:135            0.0.0.0:0              LISTENING\r\n\
                       \x20 TCP    [::1]:49664            [::]:0                 LISTENING\r\n";
        let connections = parse_netstat(windows);
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].local_port, 135);
        assert_eq!(connections[0].state, TcpState::Listen);
        assert_eq!(connections[1].protocol, "tcp6");
        assert_eq!(connections[1].local_address, "::1");
    }

    #[tokio::test]
    async fn test_port_check_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let open = PortCheckTool
            .execute(json!({ "port": port }), &ctx())
            .await
            .unwrap();
        assert_eq!(open["open"], true);
        assert_eq!(open["host"], "127.0.0.1");
        assert!(open["latencyMs"].is_u64());

        drop(listener);
        let closed = PortCheckTool
            .execute(json!({ "port": port, "timeoutMs": 500 }), &ctx())
            .await
            .unwrap();
        assert_eq!(closed["open"], false);
        assert!(closed.get("latencyMs").is_none());
    }

    #[tokio::test]
    async fn test_unknown_state_filter() {
        let tool = NetworkConnectionsTool::new(CommandSandbox::default());
        let err = tool
            .execute(json!({ "state": "sleepy" }), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgs");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_listening_socket_is_listed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let tool = NetworkConnectionsTool::new(CommandSandbox::default());
        let result = tool
            .execute(json!({ "state": "listen", "limit": 5000 }), &ctx())
            .await
            .unwrap();
        let connections = result["connections"].as_array().unwrap();
        assert!(connections.iter().all(|c| c["state"] == "listen"));
        assert!(connections.iter().any(|c| c["localPort"] == port && c["localAddress"] == "127.0.0.1"));
    }
}
