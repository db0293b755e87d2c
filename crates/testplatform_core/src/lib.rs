//! Provide the shared, IO-free vocabulary of the test platform: wire message types, protocol versions,
//! the object model carried in payloads, and the error taxonomy.
//!
//! Both sides of the process boundary (the controller and a test host) agree on everything in this crate. It
//! owns no sockets, threads or processes; the `testplatform` crate builds the orchestration core on top.
//!
//! ## Notes
//!
//! - This is a “vocabulary” crate: **no IO**, no global state.
//! - Message types live in a registry-first table ([`protocol::messages::MESSAGE_TYPES`]) so tooling and guardrail
//!   tests can reason about them without stringly-typed comparisons scattered around the controller.

pub mod errors;
pub mod metrics;
pub mod objectmodel;
pub mod protocol;

pub use errors::{ErrorKind, PlatformError, PlatformResult};
pub use metrics::MetricsCollection;
pub use protocol::envelope::Message;
pub use protocol::messages::MessageTypeId;
