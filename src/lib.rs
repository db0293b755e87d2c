#![forbid(unsafe_code)]
//! Test Platform Controller
//!
//! Drives out-of-process test hosts for test discovery and execution. A request (discovery or run) owns one
//! host-facing proxy; the [`client::TestRequestManager`] serializes runs, resolves cancel/abort races and reports
//! failures to the caller's registrar.
//!
//! ## Layout
//!
//! - `client` - Criteria, the request state machine, listeners and the orchestrator
//! - `proxy` - Host-facing proxies and the production test engine
//! - `hosting` - Launching and supervising test host processes
//! - `communication` - Frames, the JSON envelope serializer and loopback sockets
//! - `design_mode` - Serving an IDE, including custom host launches
//! - `artifacts` - Per-invocation snapshots
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Listeners**: a panicking listener is caught and logged; it never reaches the request that notified it.

pub mod artifacts;
pub mod cli;
pub mod client;
pub mod communication;
pub mod config;
pub mod design_mode;
pub mod hosting;
pub mod proxy;
pub mod sync;
pub mod version;

pub use client::{RequestState, TestRequestManager};
pub use config::PlatformConfig;
pub use testplatform_core::{PlatformError, PlatformResult};
