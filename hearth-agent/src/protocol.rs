//! Envelope types exchanged with the host.
//!
//! Every envelope is a JSON object tagged by its `type` field and framed as
//! one line of NDJSON. Field names are camelCase on the wire. A `requestId`
//! is opaque to the agent and echoed back verbatim in the matching reply.

use crate::error::{HandlerError, ProtocolError};
use hearth_core::error::error_chain;
use hearth_core::types::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// host -> agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Inbound {
    #[serde(rename = "agent:ping")]
    Ping {
        #[serde(default)]
        request_id: Option<Value>,
    },

    #[serde(rename = "agent:tools:list")]
    ToolsList {
        #[serde(default)]
        request_id: Option<Value>,
    },

    #[serde(rename = "agent:tool:run")]
    ToolRun(ToolRunRequest),

    #[serde(rename = "agent:chat")]
    Chat(ChatRequest),

    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Requests answered without touching tools or storage.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Inbound::Ping { .. } | Inbound::ToolsList { .. } | Inbound::Unknown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRunRequest {
    #[serde(default)]
    pub request_id: Option<Value>,
    pub tool: String,
    /// Absent or null arguments are treated as `{}`.
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub convo_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub request_id: Option<Value>,
    #[serde(default)]
    pub convo_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Decode one NDJSON line.
///
/// Lines that are not JSON objects, lack a string `type`, carry an unknown
/// `type`, or miss a required field are rejected; the caller drops them.
pub fn parse_inbound(line: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(line).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
    })?;
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(ProtocolError::Malformed {
                reason: "'type' is not a string".into(),
            });
        }
        None => {
            return Err(ProtocolError::Malformed {
                reason: "missing 'type'".into(),
            });
        }
    };
    match serde_json::from_value::<Inbound>(value) {
        Ok(Inbound::Unknown) => Err(ProtocolError::UnknownType { kind }),
        Ok(inbound) => Ok(inbound),
        Err(e) => Err(ProtocolError::Malformed {
            reason: format!("{kind}: {e}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// agent -> host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Outbound {
    #[serde(rename = "agent:ready")]
    Ready {
        pid: u32,
        version: String,
        tools: Vec<ToolDefinition>,
    },

    #[serde(rename = "agent:pong")]
    Pong {
        ts: i64,
        pid: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },

    #[serde(rename = "agent:tools:list:result")]
    ToolsListResult {
        tools: Vec<ToolDefinition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },

    #[serde(rename = "agent:tool:result")]
    ToolResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
        ok: bool,
        tool: String,
        result: Value,
    },

    #[serde(rename = "agent:chat:result")]
    ChatResult {
        convo_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },

    #[serde(rename = "agent:error")]
    Error {
        message: String,
        stack: String,
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },
}

impl Outbound {
    /// `agent:error` describing `err` and its cause chain.
    pub fn error(err: &HandlerError, request_id: Option<Value>) -> Self {
        Outbound::Error {
            message: err.to_string(),
            stack: error_chain(err),
            kind: err.kind().to_string(),
            request_id,
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Ready { .. } => "agent:ready",
            Outbound::Pong { .. } => "agent:pong",
            Outbound::ToolsListResult { .. } => "agent:tools:list:result",
            Outbound::ToolResult { .. } => "agent:tool:result",
            Outbound::ChatResult { .. } => "agent:chat:result",
            Outbound::Error { .. } => "agent:error",
        }
    }

    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
