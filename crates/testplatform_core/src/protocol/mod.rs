//! Wire protocol vocabulary: message-type registry, envelope, and protocol versions.
//!
//! ## Versioning
//!
//! The controller and a test host negotiate a protocol version right after the host dials back: the controller
//! sends [`HIGHEST_SUPPORTED_VERSION`] in a `ProtocolVersion` message, the host replies with its own highest
//! version, and both sides use the minimum. Until negotiation finishes the controller assumes
//! [`DEFAULT_PROTOCOL_VERSION`].

pub mod envelope;
pub mod messages;
pub mod registry;

/// Protocol version assumed before negotiation completes.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

/// Highest protocol version this controller speaks.
pub const HIGHEST_SUPPORTED_VERSION: u32 = 7;

/// First protocol version whose hosts accept an abort targeted at one in-flight discovery.
///
/// Hosts below this version only understand the version-less abort, so the controller falls back to it.
pub const TARGETED_ABORT_MIN_VERSION: u32 = 5;

/// Negotiate the protocol version to use with a peer.
pub fn negotiate_version(ours: u32, theirs: u32) -> u32 {
    ours.min(theirs).max(DEFAULT_PROTOCOL_VERSION)
}

/// Check whether a negotiated version supports targeted discovery aborts.
pub fn supports_targeted_abort(negotiated: u32) -> bool {
    negotiated >= TARGETED_ABORT_MIN_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_picks_minimum() {
        assert_eq!(negotiate_version(7, 3), 3);
        assert_eq!(negotiate_version(2, 7), 2);
    }

    #[test]
    fn test_negotiate_never_below_default() {
        assert_eq!(negotiate_version(7, 0), DEFAULT_PROTOCOL_VERSION);
    }

    #[test]
    fn test_targeted_abort_threshold() {
        assert!(!supports_targeted_abort(TARGETED_ABORT_MIN_VERSION - 1));
        assert!(supports_targeted_abort(TARGETED_ABORT_MIN_VERSION));
        assert!(supports_targeted_abort(HIGHEST_SUPPORTED_VERSION));
    }
}
