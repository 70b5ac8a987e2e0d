//! Transports carrying JSON-RPC frames to the dispatcher.

pub mod http;
pub mod stdio;
