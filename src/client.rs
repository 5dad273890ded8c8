//! Orchestrator facade.
//!
//! Wires admission, model resolution, fallback with retries and usage
//! accounting into one call. Each piece stays usable on its own; this module
//! only sequences them. Implementation details are split into submodules
//! under `src/client/`.

pub mod builder;
pub mod core;
pub mod signals;
pub mod types;

pub use builder::OrchestratorBuilder;
pub use core::Orchestrator;
pub use signals::SignalsSnapshot;
pub use types::{
    Completion, Dispatch, Metered, OrchestrationRequest, ProviderRoute, TokenUsage, WithUsage,
};
