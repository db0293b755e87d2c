//! Object model carried in wire payloads.
//!
//! Everything here is plain data with `serde` derives. Field names are PascalCase on the wire.

pub mod events;
pub mod payloads;
pub mod process;
pub mod test_case;

pub use events::{
    AttachmentSet, DiscoveryCompleteEventArgs, TestMessageLevel, TestRunChangedEventArgs, TestRunCompleteEventArgs,
    UriDataAttachment,
};
pub use payloads::{
    CustomHostLaunchAckPayload, DiscoveryCompletePayload, DiscoveryRequestPayload, StartDiscoveryPayload,
    StartRunPayload, TestMessagePayload, TestPlatformOptions, TestRunCompletePayload, TestRunRequestPayload,
};
pub use process::TestProcessStartInfo;
pub use test_case::{TestCase, TestOutcome, TestResult, TestRunStatistics};
