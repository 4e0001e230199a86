//! Session registry and command dispatch engine for the tether automation server.
//!
//! This crate owns everything between a protocol front-end and the drivers:
//!
//! - **Session registry**: session id to driver mapping, pending-driver
//!   tracking, creation and teardown
//! - **Plugin pool**: per-session and sessionless plugin instances
//! - **Command router**: which plugins see a command and whether it is proxied
//! - **Dispatch chain**: plugins wrapped around the driver call with explicit
//!   `next` continuations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ AutomationServer │  createSession / deleteSession / executeCommand
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐     ┌───────────────┐
//! │    Dispatcher    │────▶│ CommandRouter │
//! │  plugin chain    │     └───────┬───────┘
//! └────────┬─────────┘             │
//!          │               ┌───────▼─────────┐     ┌────────────┐
//!          └──────────────▶│ SessionRegistry │────▶│ PluginPool │
//!                          └─────────────────┘     └────────────┘
//! ```
//!
//! Drivers and plugins are trait objects created through factories held in an
//! [`ExtensionRegistry`]; the core never discovers extension code on its own.

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod extension;
pub mod plugin;
pub mod plugin_pool;
pub mod registry;
pub mod router;
pub mod server;
pub mod testing;

pub use config::ServerConfig;
pub use dispatch::{CommandContext, CommandRequest, Dispatcher, HandlerReport, Next, ResultEnvelope, ServerCommands, Target};
pub use driver::{Driver, DriverArgs, DriverData, DriverFactory, ShutdownNotifier, ShutdownSignal};
pub use error::{CreationFailure, Error, Result};
pub use extension::{CapabilityMatcher, DriverSelector, ExtensionRegistry};
pub use plugin::{CommandFilter, Plugin, PluginArgs, PluginFactory};
pub use plugin_pool::{PluginList, PluginPool};
pub use registry::{DeleteAllOptions, NewSession, SessionHandle, SessionRegistry, SessionState, Termination};
pub use router::{CommandRouter, Route};
pub use server::AutomationServer;
pub use tether_protocol::{Capabilities, CapabilityRequest, Protocol, SessionInfo, WireEnvelope};
