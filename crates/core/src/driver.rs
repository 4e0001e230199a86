//! Driver capability interface.
//!
//! A driver is a backend that negotiates a session against one target platform
//! and executes automation commands for it. Drivers are constructed through a
//! [`DriverFactory`] registered by name in the
//! [`ExtensionRegistry`](crate::extension::ExtensionRegistry); the core never
//! loads driver code on its own.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tether_protocol::{Capabilities, Protocol};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Opaque per-session data a driver shares with sibling sessions of the same type.
pub type DriverData = Value;

/// Per-driver arguments from the server configuration.
pub type DriverArgs = Map<String, Value>;

/// A live driver instance bound to at most one session.
#[async_trait]
pub trait Driver: Send + Sync {
	/// Negotiates a session for `capabilities`.
	///
	/// `others` holds the [`DriverData`] of every other active or pending session
	/// of the same driver type, so singleton-style drivers can refuse to share a
	/// device. Returns the negotiated capabilities.
	async fn create_session(&self, capabilities: &Capabilities, others: &[DriverData]) -> Result<Capabilities>;

	/// Tears down the session.
	async fn delete_session(&self) -> Result<()>;

	/// Executes a command in-process.
	async fn execute_command(&self, command: &str, args: Vec<Value>) -> Result<Value>;

	/// Whether [`execute_command`](Self::execute_command) implements `command`.
	fn supports_command(&self, _command: &str) -> bool {
		true
	}

	/// Forwards a command to the driver's own backing transport.
	async fn proxy_command(&self, command: &str, _args: Vec<Value>) -> Result<Value> {
		Err(Error::NoProxyCommand {
			command: command.to_string(),
		})
	}

	/// Whether a proxy is configured for this session at all.
	fn proxy_active(&self) -> bool {
		false
	}

	/// Whether `command` is eligible for proxying.
	fn can_proxy(&self, _command: &str) -> bool {
		false
	}

	/// Data shared with sibling sessions of the same driver type.
	fn driver_data(&self) -> DriverData {
		Value::Null
	}

	/// Protocol marker the session speaks, once negotiated.
	fn protocol(&self) -> Option<Protocol> {
		None
	}

	/// Signal fired when the driver ends its session on its own.
	fn shutdown_signal(&self) -> Option<ShutdownSignal> {
		None
	}
}

/// Constructs [`Driver`] instances; one factory per driver type.
pub trait DriverFactory: Send + Sync {
	/// Unique driver name (the registry's driver type key).
	fn name(&self) -> &str;

	/// Value of `automationName` this driver serves.
	fn automation_name(&self) -> &str;

	/// Supported `platformName` values; empty means any platform.
	fn platform_names(&self) -> &[String] {
		&[]
	}

	fn version(&self) -> &str {
		"0.0.0"
	}

	/// Creates a fresh driver instance.
	fn create(&self, args: &DriverArgs) -> Arc<dyn Driver>;
}

/// Driver-side half of the unexpected-shutdown channel.
#[derive(Debug)]
pub struct ShutdownNotifier {
	tx: watch::Sender<Option<String>>,
}

impl Default for ShutdownNotifier {
	fn default() -> Self {
		Self::new()
	}
}

impl ShutdownNotifier {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(None);
		Self { tx }
	}

	/// Creates a listener for [`Driver::shutdown_signal`].
	pub fn subscribe(&self) -> ShutdownSignal {
		ShutdownSignal { rx: self.tx.subscribe() }
	}

	/// Reports that the session ended without being asked to. Only the first
	/// reason is kept.
	pub fn notify(&self, reason: impl Into<String>) {
		let reason = reason.into();
		self.tx.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}
			*current = Some(reason);
			true
		});
	}

	pub fn is_notified(&self) -> bool {
		self.tx.borrow().is_some()
	}
}

/// Registry-side half of the unexpected-shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
	rx: watch::Receiver<Option<String>>,
}

impl ShutdownSignal {
	/// Resolves with the shutdown reason, or `None` once the notifier is dropped
	/// without firing.
	pub async fn wait(mut self) -> Option<String> {
		loop {
			if let Some(reason) = self.rx.borrow_and_update().clone() {
				return Some(reason);
			}
			if self.rx.changed().await.is_err() {
				return self.rx.borrow().clone();
			}
		}
	}
}
