//! Built-in tools

pub mod ask_llm;
pub mod calculator;
pub mod echo;
pub mod weather;

pub use ask_llm::AskLlmTool;
pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use weather::WeatherTool;

use crate::capability::Capability;
use std::sync::Arc;

/// Names accepted in `tools_enabled`
pub const AVAILABLE_TOOLS: [&str; 4] = ["echo", "calculator", "weather", "ask_llm"];

/// Construct a built-in tool by name
pub fn builtin(name: &str) -> Option<Arc<dyn Capability>> {
    match name {
        "echo" => Some(Arc::new(EchoTool)),
        "calculator" => Some(Arc::new(CalculatorTool)),
        "weather" => Some(Arc::new(WeatherTool::from_env())),
        "ask_llm" => Some(Arc::new(AskLlmTool)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_available_name_builds() {
        for name in AVAILABLE_TOOLS {
            let tool = builtin(name).unwrap();
            assert_eq!(tool.metadata().name, name);
        }
        assert!(builtin("shell").is_none());
    }
}
