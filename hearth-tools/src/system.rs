//! `system:info`: a snapshot of the host the agent runs on.

use crate::registry::Tool;
use async_trait::async_trait;
use hearth_core::error::ToolError;
use hearth_core::permissions::Capability;
use hearth_core::types::ToolContext;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub platform: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
    pub cpus: usize,
    /// Bytes of physical memory, when the platform reports it.
    pub total_memory: Option<u64>,
    pub uptime_secs: Option<u64>,
    pub hostname: Option<String>,
    pub pid: u32,
}

impl SystemSnapshot {
    pub fn collect() -> Self {
        let (total_memory, uptime_secs) = memory_and_uptime();
        Self {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            total_memory,
            uptime_secs,
            hostname: hostname(),
            pid: std::process::id(),
        }
    }
}

#[cfg(target_os = "linux")]
fn memory_and_uptime() -> (Option<u64>, Option<u64>) {
    // SAFETY: sysinfo only writes into the zeroed struct we hand it.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return (None, None);
    }
    let total = (info.totalram as u64).saturating_mul(info.mem_unit as u64);
    (Some(total), Some(info.uptime.max(0) as u64))
}

#[cfg(target_vendor = "apple")]
fn memory_and_uptime() -> (Option<u64>, Option<u64>) {
    let total = sysctl_value::<u64>(c"hw.memsize");
    let uptime = sysctl_value::<libc::timeval>(c"kern.boottime").and_then(|boot| {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        now.as_secs().checked_sub(u64::try_from(boot.tv_sec).ok()?)
    });
    (total, uptime)
}

/// Read a fixed-size sysctl value by name.
#[cfg(target_vendor = "apple")]
fn sysctl_value<T: Copy>(name: &std::ffi::CStr) -> Option<T> {
    let mut value = std::mem::MaybeUninit::<T>::zeroed();
    let mut len = std::mem::size_of::<T>();
    // SAFETY: the kernel writes at most `len` bytes into `value`.
    let rc = unsafe {
        libc::sysctlbyname(
            name.as_ptr(),
            value.as_mut_ptr().cast::<libc::c_void>(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 || len != std::mem::size_of::<T>() {
        return None;
    }
    // SAFETY: the call succeeded and filled every byte.
    Some(unsafe { value.assume_init() })
}

#[cfg(windows)]
mod win {
    #[repr(C)]
    pub struct MemoryStatusEx {
        pub length: u32,
        pub memory_load: u32,
        pub total_phys: u64,
        pub avail_phys: u64,
        pub total_page_file: u64,
        pub avail_page_file: u64,
        pub total_virtual: u64,
        pub avail_virtual: u64,
        pub avail_extended_virtual: u64,
    }

    #[link(name = "kernel32")]
    unsafe extern "system" {
        pub fn GlobalMemoryStatusEx(buffer: *mut MemoryStatusEx) -> i32;
        pub fn GetTickCount64() -> u64;
    }
}

#[cfg(windows)]
fn memory_and_uptime() -> (Option<u64>, Option<u64>) {
    // SAFETY: plain-old-data struct, zero is a valid bit pattern.
    let mut status: win::MemoryStatusEx = unsafe { std::mem::zeroed() };
    status.length = std::mem::size_of::<win::MemoryStatusEx>() as u32;
    // SAFETY: `length` is set as the API requires and the pointer is live.
    let total = (unsafe { win::GlobalMemoryStatusEx(&mut status) } != 0).then_some(status.total_phys);
    // SAFETY: no arguments, no preconditions.
    let uptime = unsafe { win::GetTickCount64() } / 1000;
    (total, Some(uptime))
}

#[cfg(not(any(target_os = "linux", target_vendor = "apple", windows)))]
fn memory_and_uptime() -> (Option<u64>, Option<u64>) {
    (None, None)
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer outlives the call and its length is passed along.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..end]).into_owned()).filter(|h| !h.is_empty())
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

/// Reports platform, architecture, CPU count, memory, and uptime.
pub struct SystemInfoTool;

#[async_trait]
impl Tool for SystemInfoTool {
    fn name(&self) -> &str {
        "system:info"
    }

    fn description(&self) -> &str {
        "Report the host platform, architecture, CPU count, total memory, and uptime."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn required_capabilities(&self) -> &[Capability] {
        &[Capability::Process]
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        serde_json::to_value(SystemSnapshot::collect()).map_err(|e| ToolError::ExecutionFailed {
            name: self.name().to_string(),
            message: e.to_string(),
        })
    }
}
