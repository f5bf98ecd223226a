//! Broker core: tool registry, sessions with capability negotiation, the
//! call dispatcher and the stream multiplexer.

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod session;
pub mod stream;
pub mod truncate;

pub mod mock;

pub use broker::Broker;
pub use config::DispatchConfig;
pub use registry::ToolRegistry;
pub use session::{Session, SessionState};
