//! Shared data model for the switchboard broker: identifiers, error kinds,
//! tool descriptors, the adapter capability traits and the session protocol
//! messages.

pub mod errors;
pub mod ids;
pub mod invocation;
pub mod protocol;
pub mod stream;
pub mod tools;
