//! LLM provider backends
//!
//! Adapters normalize each upstream API into one request/response shape and
//! one error taxonomy. The registry owns adapter lifetime, active-provider
//! resolution and the retry policy.

pub mod adapter;
pub mod anthropic;
pub mod credentials;
pub mod error;
pub mod generic_chat;
pub(crate) mod http;
pub mod openai;
pub mod openrouter;
pub mod registry;
pub mod retry;
pub mod types;

pub use adapter::{AdapterSettings, ProviderAdapter};
pub use anthropic::AnthropicAdapter;
pub use credentials::{Credential, CredentialSource, EnvCredentials, StaticCredentials};
pub use error::ProviderError;
pub use generic_chat::GenericChatAdapter;
pub use openai::OpenAiAdapter;
pub use openrouter::OpenRouterAdapter;
pub use registry::{
    build_adapter, InvokeOptions, ProviderRegistry, ProviderSlot, ProviderSnapshot, ProviderStatus,
    SnapshotBuilder, DEFAULT_APP_TITLE,
};
pub use retry::RetryPolicy;
pub use types::{ChatMessage, ChatRole, ModelRequest, ModelResponse, ProviderId, TokenUsage};
