//! Client-side request model: criteria, requests and their lifecycle, listeners, and the orchestrator.
//!
//! ## Modules
//!
//! - `criteria` - What a discovery or run asks for
//! - `request` - The state machine shared by both request kinds
//! - `discovery_request` / `run_request` - The two request kinds
//! - `events` - Listener traits and fan-out
//! - `proxy` - Seams towards the host-facing proxies
//! - `registrar` - How callers attach listeners to orchestrated requests
//! - `orchestrator` - The single-flight entry point

pub mod criteria;
pub mod discovery_request;
pub mod events;
pub mod orchestrator;
pub mod proxy;
pub mod registrar;
pub mod request;
pub mod run_request;

use std::sync::{Arc, Mutex};

use testplatform_core::MetricsCollection;

pub use criteria::{DiscoveryCriteria, RunTarget, TestRunCriteria};
pub use discovery_request::DiscoveryRequest;
pub use events::{DiscoveryEventsListener, ListenerId, TestRunEventsListener};
pub use orchestrator::{DiscoveryOutcome, RunOutcome, TestRequestManager};
pub use proxy::{DiscoveryEventsHandler, ProxyDiscoveryManager, ProxyExecutionManager, RunEventsHandler, TestEngine};
pub use registrar::{TestDiscoveryEventsRegistrar, TestRunEventsRegistrar};
pub use request::RequestState;
pub use run_request::TestRunRequest;

/// Telemetry collection shared between a request and its caller.
pub type SharedMetrics = Arc<Mutex<MetricsCollection>>;
