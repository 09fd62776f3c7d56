//! Process tools: `process:list`, `process:info`, `process:kill`.
//!
//! Listing shells out to the platform's process table command through the
//! sandbox (`ps` on unix, `tasklist` on Windows). Signals go straight to the
//! kernel.

use crate::registry::Tool;
use crate::sandbox::{CommandResult, CommandSandbox};
use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::permissions::Capability;
use hearth_core::types::ToolContext;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

const DEFAULT_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub pid: u32,
    /// Unknown on platforms whose process table does not report it.
    pub ppid: Option<u32>,
    pub cpu_percent: Option<f64>,
    pub memory_kb: Option<u64>,
    /// Wall time since start as the platform prints it (`[[dd-]hh:]mm:ss`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
    pub command: String,
}

/// Split off the first `n` whitespace-separated fields and return them with
/// the trimmed remainder, which may itself contain spaces.
fn leading_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest.trim_end()))
}

/// Parse `ps -o pid=,ppid=,pcpu=,rss=,comm=` output.
pub fn parse_ps_list(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (fields, command) = leading_fields(line, 4)?;
            Some(ProcessEntry {
                pid: fields[0].parse().ok()?,
                ppid: fields[1].parse().ok(),
                cpu_percent: fields[2].parse().ok(),
                memory_kb: fields[3].parse().ok(),
                elapsed: None,
                command: command.to_string(),
            })
        })
        .collect()
}

/// Parse `ps -o pid=,ppid=,pcpu=,rss=,etime=,args=` output for one process.
pub fn parse_ps_info(output: &str) -> Option<ProcessEntry> {
    output.lines().find_map(|line| {
        let (fields, command) = leading_fields(line, 5)?;
        Some(ProcessEntry {
            pid: fields[0].parse().ok()?,
            ppid: fields[1].parse().ok(),
            cpu_percent: fields[2].parse().ok(),
            memory_kb: fields[3].parse().ok(),
            elapsed: Some(fields[4].to_string()),
            command: command.to_string(),
        })
    })
}

/// Parse `tasklist /fo csv /nh` rows: image, PID, session, session#, memory.
pub fn parse_tasklist_csv(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let cells: Vec<&str> = line
                .trim()
                .trim_matches('"')
                .split("\",\"")
                .collect();
            if cells.len() < 5 {
                return None;
            }
            let memory: String = cells[4].chars().filter(char::is_ascii_digit).collect();
            Some(ProcessEntry {
                pid: cells[1].parse().ok()?,
                ppid: None,
                cpu_percent: None,
                memory_kb: memory.parse().ok(),
                elapsed: None,
                command: cells[0].to_string(),
            })
        })
        .collect()
}

fn table_failed(tool: &str, result: &CommandResult) -> ToolError {
    let detail = if result.stderr.trim().is_empty() {
        format!("exit code {}", result.exit_code)
    } else {
        result.stderr.trim().to_string()
    };
    ToolError::ExecutionFailed {
        name: tool.to_string(),
        message: format!("process table unavailable: {detail}"),
    }
}

fn required_pid(tool: &str, args: &Value) -> Result<u32, ToolError> {
    args["pid"]
        .as_u64()
        .and_then(|pid| u32::try_from(pid).ok())
        .ok_or_else(|| ToolError::InvalidArguments {
            name: tool.to_string(),
            reason: "'pid' must be a positive integer".into(),
        })
}

/// Snapshot of running processes, optionally filtered by command substring.
pub struct ProcessListTool {
    sandbox: CommandSandbox,
}

impl ProcessListTool {
    pub fn new(sandbox: CommandSandbox) -> Self {
        Self { sandbox }
    }

    async fn snapshot(&self) -> Result<Vec<ProcessEntry>, ToolError> {
        let (command, parse): (&str, fn(&str) -> Vec<ProcessEntry>) = if cfg!(windows) {
            ("tasklist /fo csv /nh", parse_tasklist_csv)
        } else {
            ("ps -A -o pid=,ppid=,pcpu=,rss=,comm=", parse_ps_list)
        };
        let result = self.sandbox.run(command, None, None).await;
        if !result.ok {
            return Err(table_failed(self.name(), &result));
        }
        Ok(parse(&result.stdout))
    }
}

#[async_trait]
impl Tool for ProcessListTool {
    fn name(&self) -> &str {
        "process:list"
    }

    fn description(&self) -> &str {
        "List running processes with pid, parent pid, CPU percent, resident memory and command. \
         'filter' keeps commands containing the text, case-insensitively."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filter": { "type": "string", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 5000 }
            }
        })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Process]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let limit = args["limit"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIST_LIMIT);
        let filter = args["filter"].as_str().map(str::to_lowercase);

        let mut processes = self.snapshot().await?;
        if let Some(needle) = &filter {
            processes.retain(|p| p.command.to_lowercase().contains(needle));
        }
        let total = processes.len();
        processes.truncate(limit);
        Ok(json!({ "processes": processes, "total": total }))
    }
}

/// Details for a single process.
pub struct ProcessInfoTool {
    sandbox: CommandSandbox,
}

impl ProcessInfoTool {
    pub fn new(sandbox: CommandSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ProcessInfoTool {
    fn name(&self) -> &str {
        "process:info"
    }

    fn description(&self) -> &str {
        "Show parent pid, CPU percent, resident memory, elapsed time and full command line of one process."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pid": { "type": "integer", "minimum": 1 }
            },
            "required": ["pid"]
        })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Process]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let pid = required_pid(self.name(), &args)?;
        let found = if cfg!(windows) {
            let command = format!("tasklist /fi \"PID eq {pid}\" /fo csv /nh");
            let result = self.sandbox.run(&command, None, None).await;
            parse_tasklist_csv(&result.stdout).into_iter().find(|p| p.pid == pid)
        } else {
            // ps exits 1 when the pid is gone, which is the not-found case below.
            let command = format!("ps -o pid=,ppid=,pcpu=,rss=,etime=,args= -p {pid}");
            let result = self.sandbox.run(&command, None, None).await;
            if result.timed_out {
                return Err(table_failed(self.name(), &result));
            }
            parse_ps_info(&result.stdout)
        };

        let entry = found.ok_or_else(|| ToolError::ExecutionFailed {
            name: self.name().to_string(),
            message: format!("no such process: {pid}"),
        })?;
        serde_json::to_value(entry).map_err(|e| ToolError::ExecutionFailed {
            name: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

/// Signals `process:kill` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
    Int,
    Hup,
}

impl KillSignal {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "TERM" => Some(Self::Term),
            "KILL" => Some(Self::Kill),
            "INT" => Some(Self::Int),
            "HUP" => Some(Self::Hup),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Kill => "KILL",
            Self::Int => "INT",
            Self::Hup => "HUP",
        }
    }

    #[cfg(unix)]
    fn number(self) -> libc::c_int {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Int => libc::SIGINT,
            Self::Hup => libc::SIGHUP,
        }
    }
}

/// Send a signal to a process. Refuses init and the agent itself.
pub struct ProcessKillTool {
    #[cfg_attr(unix, allow(dead_code))]
    sandbox: CommandSandbox,
}

impl ProcessKillTool {
    pub fn new(sandbox: CommandSandbox) -> Self {
        Self { sandbox }
    }

    #[cfg(unix)]
    async fn deliver(&self, pid: u32, signal: KillSignal) -> Result<(), String> {
        let target = libc::pid_t::try_from(pid).map_err(|_| format!("pid {pid} is out of range"))?;
        // SAFETY: kill(2) takes plain integers and touches no memory of ours.
        if unsafe { libc::kill(target, signal.number()) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        Err(match err.raw_os_error() {
            Some(libc::ESRCH) => format!("no such process: {pid}"),
            Some(libc::EPERM) => format!("not permitted to signal process {pid}"),
            _ => err.to_string(),
        })
    }

    #[cfg(not(unix))]
    async fn deliver(&self, pid: u32, signal: KillSignal) -> Result<(), String> {
        let force = if signal == KillSignal::Kill { " /F" } else { "" };
        let result = self
            .sandbox
            .run(&format!("taskkill /PID {pid}{force}"), None, None)
            .await;
        if result.ok {
            Ok(())
        } else {
            Err(result.stderr.trim().to_string())
        }
    }
}

#[async_trait]
impl Tool for ProcessKillTool {
    fn name(&self) -> &str {
        "process:kill"
    }

    fn description(&self) -> &str {
        "Send TERM (default), KILL, INT or HUP to a process by pid."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pid": { "type": "integer", "minimum": 1 },
                "signal": { "type": "string", "enum": ["TERM", "KILL", "INT", "HUP"] }
            },
            "required": ["pid"]
        })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Process]
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let pid = required_pid(self.name(), &args)?;
        if pid <= 1 || pid == std::process::id() {
            return Err(ToolError::InvalidArguments {
                name: self.name().to_string(),
                reason: format!("refusing to signal pid {pid}"),
            });
        }
        let signal = match args["signal"].as_str() {
            None => KillSignal::Term,
            Some(name) => KillSignal::parse(name).ok_or_else(|| ToolError::InvalidArguments {
                name: self.name().to_string(),
                reason: format!("unknown signal '{name}'"),
            })?,
        };

        self.deliver(pid, signal)
            .await
            .map_err(|message| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                message,
            })?;
        info!(pid, signal = signal.as_str(), "Signalled process");
        Ok(json!({ "pid": pid, "signal": signal.as_str(), "sent": true }))
    }
}
