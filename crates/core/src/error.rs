//! Error types for the session core.

use tether_protocol::{CapabilityError, ErrorPayload};
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One driver's failure during session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationFailure {
	/// Driver name, or `capabilities` when a candidate was rejected before any driver ran.
	pub driver: String,
	pub message: String,
}

/// Errors surfaced by the registry and dispatch engine.
#[derive(Debug, Error)]
pub enum Error {
	/// The referenced session is not registered.
	#[error("A session is either terminated or not started: {0}")]
	SessionNotFound(String),

	/// No candidate driver accepted the requested capabilities.
	#[error("Could not create a session: {reason}{}", format_failures(failures))]
	Creation { reason: String, failures: Vec<CreationFailure> },

	/// The driver has no implementation for the command.
	#[error("Command '{command}' is not implemented by this driver")]
	UnsupportedCommand { command: String },

	/// Proxying was selected but the driver has no proxy hook.
	#[error("Command '{command}' was routed to the driver proxy, but the driver does not implement proxyCommand")]
	NoProxyCommand { command: String },

	/// Error raised by a driver or plugin while handling a command.
	#[error("{message}")]
	Command {
		/// W3C error code reported to the client.
		code: String,
		message: String,
	},

	/// Invalid argument passed to a command.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// Invalid capability payload.
	#[error(transparent)]
	Capabilities(#[from] CapabilityError),

	/// Invalid server or extension configuration.
	#[error("Configuration error: {0}")]
	Config(String),

	/// Registry bookkeeping invariant was violated.
	#[error("Internal error: {0}")]
	Internal(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

fn format_failures(failures: &[CreationFailure]) -> String {
	if failures.is_empty() {
		return String::new();
	}
	let details: Vec<String> = failures.iter().map(|f| format!("{}: {}", f.driver, f.message)).collect();
	format!(" ({})", details.join("; "))
}

impl Error {
	/// Shorthand for a driver/plugin error with a W3C code.
	pub fn command(code: impl Into<String>, message: impl Into<String>) -> Self {
		Error::Command {
			code: code.into(),
			message: message.into(),
		}
	}

	/// W3C error code used on the wire.
	pub fn w3c_code(&self) -> &str {
		match self {
			Error::SessionNotFound(_) => "invalid session id",
			Error::Creation { .. } => "session not created",
			Error::UnsupportedCommand { .. } => "unknown command",
			Error::Command { code, .. } => code,
			Error::InvalidArgument(_) | Error::Capabilities(_) => "invalid argument",
			Error::NoProxyCommand { .. }
			| Error::Config(_)
			| Error::Internal(_)
			| Error::Io(_)
			| Error::Json(_) => "unknown error",
		}
	}

	pub fn is_session_not_found(&self) -> bool {
		matches!(self, Error::SessionNotFound(_))
	}

	pub fn is_unsupported_command(&self) -> bool {
		matches!(self, Error::UnsupportedCommand { .. })
	}

	pub fn is_no_proxy_command(&self) -> bool {
		matches!(self, Error::NoProxyCommand { .. })
	}

	/// Converts into the wire error payload.
	pub fn to_payload(&self) -> ErrorPayload {
		ErrorPayload::new(self.w3c_code(), self.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creation_error_lists_every_driver_failure() {
		let err = Error::Creation {
			reason: "all candidate drivers failed".to_string(),
			failures: vec![
				CreationFailure {
					driver: "first".to_string(),
					message: "device busy".to_string(),
				},
				CreationFailure {
					driver: "second".to_string(),
					message: "no app".to_string(),
				},
			],
		};
		assert_eq!(
			err.to_string(),
			"Could not create a session: all candidate drivers failed (first: device busy; second: no app)"
		);
		assert_eq!(err.w3c_code(), "session not created");
	}

	#[test]
	fn proxy_and_unsupported_errors_are_distinguishable() {
		let unsupported = Error::UnsupportedCommand { command: "tap".to_string() };
		let no_proxy = Error::NoProxyCommand { command: "tap".to_string() };
		assert!(unsupported.is_unsupported_command() && !unsupported.is_no_proxy_command());
		assert!(no_proxy.is_no_proxy_command() && !no_proxy.is_unsupported_command());
		assert_ne!(unsupported.w3c_code(), no_proxy.w3c_code());
	}

	#[test]
	fn command_error_keeps_its_code() {
		let err = Error::command("no such element", "element not found");
		let payload = err.to_payload();
		assert_eq!(payload.error, "no such element");
		assert_eq!(payload.message, "element not found");
	}
}
