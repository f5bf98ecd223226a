//! WebSocket JSON-RPC front end: one connection is one broker session.

pub mod connection;
pub mod handlers;
pub mod rpc;
pub mod server;
pub mod wire;

pub use server::{start, ServerConfig, ServerHandle};
