//! Model Context Protocol surface: JSON-RPC framing, the tool table,
//! per-client session state and method dispatch.

pub mod dispatcher;
pub mod protocol;
pub mod session;
pub mod tools;

pub use dispatcher::McpDispatcher;
pub use session::Peer;
