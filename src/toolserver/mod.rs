//! External tool servers: child processes speaking newline-delimited
//! JSON-RPC that advertise tools and resources and execute calls on request.

pub mod bridge;
pub mod client;
pub mod protocol;
pub mod transport;

pub use bridge::{register_server_tools, unregister_server_tools};
pub use client::ToolServerClient;
pub use protocol::{ServerResourceInfo, ServerToolInfo, PROTOCOL_VERSION};
pub use transport::ServerIo;
