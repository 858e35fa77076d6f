// src/lib.rs

// Import the top-level `cclaw` module.
pub mod cclaw;

// Re-exporting key items for easier external access.
pub use cclaw::agent_loop::AgentContext;
pub use cclaw::config::Config;
pub use cclaw::provider::{ChatResponse, ProviderClient, StopReason, ToolCall};
pub use cclaw::session::Session;
