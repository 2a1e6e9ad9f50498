//! Host system information resource

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use sysinfo::System;

pub const URI: &str = "system://info";

/// Environment variables reported verbatim; nothing else is exposed
const REPORTED_ENV: [&str; 5] = ["PATH", "LANG", "USER", "HOME", "SHELL"];

#[derive(Debug, Serialize)]
struct MemoryInfo {
    total: u64,
    available: u64,
    used: u64,
    percent: f64,
    swap_total: u64,
    swap_used: u64,
    swap_free: u64,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    hostname: String,
    platform: String,
    platform_version: String,
    kernel_version: String,
    arch: String,
    server_version: String,
    user: String,
    cpu_count: usize,
    memory_info: MemoryInfo,
    current_time: String,
    uptime: String,
    environment_variables: BTreeMap<String, String>,
}

/// Reports the machine running the server
#[derive(Debug, Default)]
pub struct SystemInfoResource;

impl SystemInfoResource {
    fn collect() -> SystemInfo {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let total = sys.total_memory();
        let used = sys.used_memory();
        let percent = if total == 0 {
            0.0
        } else {
            (used as f64 / total as f64 * 1000.0).round() / 10.0
        };

        let environment_variables = REPORTED_ENV
            .iter()
            .map(|key| (key.to_string(), std::env::var(key).unwrap_or_default()))
            .collect();

        SystemInfo {
            hostname: System::host_name()
                .or_else(|| whoami::fallible::hostname().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            platform: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            platform_version: System::os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            user: whoami::username(),
            cpu_count: sys.cpus().len(),
            memory_info: MemoryInfo {
                total,
                available: sys.available_memory(),
                used,
                percent,
                swap_total: sys.total_swap(),
                swap_used: sys.used_swap(),
                swap_free: sys.free_swap(),
            },
            current_time: chrono::Local::now().to_rfc3339(),
            uptime: format_uptime(System::uptime()),
            environment_variables,
        }
    }
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{} days, {} hours, {} minutes, {} seconds", days, hours, minutes, seconds % 60)
}

#[async_trait]
impl Capability for SystemInfoResource {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Resource,
            "system_info",
            "Provides information about the system running the MCP server",
            json!({"type": "object", "properties": {}}),
        )
        .with_uri(URI)
    }

    async fn invoke(&self, _arguments: Value, _ctx: &Context) -> Result<Value, CapabilityError> {
        let info = tokio::task::spawn_blocking(Self::collect)
            .await
            .map_err(|e| CapabilityError::execution(format!("system lookup failed: {}", e)))?;
        serde_json::to_value(info).map_err(|e| CapabilityError::execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_formatting() {
        assert_eq!(format_uptime(0), "0 days, 0 hours, 0 minutes, 0 seconds");
        assert_eq!(format_uptime(90_061), "1 days, 1 hours, 1 minutes, 1 seconds");
    }

    #[test]
    fn test_collect_reports_only_selected_environment() {
        let info = SystemInfoResource::collect();
        assert_eq!(info.environment_variables.len(), REPORTED_ENV.len());
        assert!(!info.hostname.is_empty());
        assert!(info.memory_info.percent <= 100.0);
    }
}
