//! Shareable metadata for the message-type registry.
//!
//! The message vocabulary is **registry-first**: every message the controller understands has a stable id, one
//! canonical wire spelling, a direction and a description. This submodule holds the small metadata types; the table
//! itself lives in [`crate::protocol::messages`].
//!
//! ## Notes
//! - These types are `Copy` so the registry can live in a `const` table.
//! - Metadata is for tooling, logs and guardrail tests; the dispatch loops still match on [`MessageTypeId`].
//!
//! [`MessageTypeId`]: crate::protocol::messages::MessageTypeId

/// Which side of which connection sends a message.
///
/// The controller has two peers: the test host it launched (over the worker connection) and, in design mode, the
/// IDE client that drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Controller -> test host.
    ToHost,
    /// Test host -> controller.
    FromHost,
    /// IDE client -> controller.
    FromClient,
    /// Controller -> IDE client.
    ToClient,
    /// Sent in both directions on a connection (handshakes, session control, relayed events).
    Both,
}

/// Metadata entry for one message type.
///
/// ## Notes
/// - `since_version` is the lowest negotiated protocol version in which the message may be sent.
/// - `description` is mandatory to keep logs and docs consistent.
#[derive(Debug, Clone, Copy)]
pub struct MessageInfo<Id> {
    pub id: Id,
    pub canonical: &'static str,
    pub direction: Direction,
    pub description: &'static str,
    pub since_version: u32,
}
