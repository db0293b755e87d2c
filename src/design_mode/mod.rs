//! Design mode: an IDE drives the controller over a socket instead of the command line.
//!
//! The controller connects to the port the IDE passes on its command line, announces the session and then serves
//! requests until the IDE ends the session. Events from test hosts are relayed to the IDE unchanged.
//!
//! When the IDE wants to launch test hosts itself (usually under a debugger) the controller asks for each launch
//! through [`HostLaunchCorrelator`], which waits for the IDE's acknowledgement on the same connection.

mod client;
mod correlator;
mod launcher;
mod registrars;

pub use client::{DesignModeClient, Flow};
pub use correlator::HostLaunchCorrelator;
pub use launcher::DesignModeTestHostLauncher;
pub use registrars::{DesignModeDiscoveryRegistrar, DesignModeRunRegistrar, Relay};
