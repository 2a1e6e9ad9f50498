//! Capability catalog
//!
//! Resources, tools and prompts all implement [`Capability`] and live in a
//! [`CapabilityRegistry`] that is built at startup and read-only afterwards.

pub mod registry;
pub mod types;

pub use registry::{CapabilityRegistry, RegisteredCapability};
pub use types::{
    optional_str, required_str, Capability, CapabilityError, CapabilityKind, CapabilityMetadata,
    InvocationResult,
};
