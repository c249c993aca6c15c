//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the Stepwise agent.
//! This crate has **no runtime dependencies** beyond serialization; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here. Implementations
//! live in their respective crates, so tests can swap in scripted models,
//! environments and output sinks.

pub mod environment;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use environment::{Environment, ExecutionOutput};
pub use error::{EnvironmentError, Error, ProviderError, Result};
pub use event::{Event, EventKind, OutputHandler};
pub use message::{Conversation, ConversationId, Message, Role};
pub use model::{Model, ModelResponse};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
