//! Host-facing proxies.
//!
//! Each request gets its own proxy and its own host process. [`ProxyOperationManager`] owns the socket and the
//! host; [`HostDiscoveryProxy`] and [`HostExecutionProxy`] layer the discovery and run conversations on top of it.
//!
//! ## Conversation
//!
//! 1. Bind a loopback listener and launch the host with `--port`.
//! 2. Wait for the host to dial back (`connection_timeout`).
//! 3. Negotiate the protocol version.
//! 4. Send `Initialize` with extension paths unless there is nothing to load.
//! 5. Send the start message and relay events until the completion arrives.
//!
//! A completion the host never sends (disconnect, crash, abort before start) is synthesized so every request
//! ends with exactly one completion.

mod discovery;
mod engine;
mod execution;
mod operation;

pub use discovery::HostDiscoveryProxy;
pub use engine::{HostFactory, ProcessTestEngine};
pub use execution::HostExecutionProxy;
pub use operation::ProxyOperationManager;
