//! Startup summary logging

use crate::capability::{CapabilityKind, CapabilityRegistry};
use crate::config::Config;
use crate::mcp::ServerInfo;
use crate::providers::ProviderSnapshot;
use tracing::{info, warn};

/// Logs what the server is about to serve
pub struct StartupLogger;

impl StartupLogger {
    pub fn log_summary(config: &Config, server: &ServerInfo, capabilities: &CapabilityRegistry, providers: &ProviderSnapshot) {
        info!("🚀 {} v{} starting...", server.name, server.version);
        info!("");

        Self::display_providers(providers);
        Self::display_capabilities(capabilities);
        Self::display_server_information(config);
    }

    fn display_providers(providers: &ProviderSnapshot) {
        info!("🤖 LLM Providers (active: {}):", providers.active_id());
        for status in providers.status() {
            let model = status.model.as_deref().unwrap_or("-");
            match (status.ready, status.active) {
                (true, true) => info!("   ✅ {} [{}] (active)", status.id, model),
                (true, false) => info!("   ✅ {} [{}]", status.id, model),
                (false, active) => warn!(
                    "   ⚠️  {}{}: {}",
                    status.id,
                    if active { " (active)" } else { "" },
                    status.reason.as_deref().unwrap_or("unavailable")
                ),
            }
        }
        info!("");
    }

    fn display_capabilities(capabilities: &CapabilityRegistry) {
        info!("🎯 Capabilities:");
        for kind in CapabilityKind::ALL {
            let names = capabilities.names(kind);
            if names.is_empty() {
                info!("   {}: none", kind.plural());
            } else {
                info!("   {} ({}): {}", kind.plural(), names.len(), names.join(", "));
            }
        }
        info!("");
    }

    fn display_server_information(config: &Config) {
        info!("🌐 Server Information:");
        info!("   HTTP: http://{}:{}", config.server.host, config.server.port);
        info!("   Discovery: /.well-known/mcp");
        info!("   JSON-RPC: /mcp/jsonrpc");
        info!(
            "   Request timeout: {}s, max request size: {} bytes",
            config.server.request_timeout_secs, config.server.max_request_size
        );
        if config.server.hot_reload {
            info!("   Hot reload: enabled");
        }
        info!("");
    }
}
