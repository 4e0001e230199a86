//! Result envelope wire shape and the protocol marker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire protocol dialect a response must be encoded for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
	/// W3C WebDriver.
	#[default]
	W3C,
	/// Legacy Mobile JSON Wire Protocol.
	MJSONWP,
}

impl std::fmt::Display for Protocol {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Protocol::W3C => f.write_str("W3C"),
			Protocol::MJSONWP => f.write_str("MJSONWP"),
		}
	}
}

/// Error details in a [`WireEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// W3C error code (e.g. `invalid session id`, `unknown command`).
	pub error: String,
	/// Human-readable message.
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stacktrace: Option<String>,
}

impl ErrorPayload {
	pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			message: message.into(),
			stacktrace: None,
		}
	}
}

/// Normalized dispatch outcome sent to clients.
///
/// Exactly one of `value` / `error` is populated; the constructors are the only
/// way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	value: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	error: Option<ErrorPayload>,
	protocol: Protocol,
}

impl WireEnvelope {
	pub fn success(value: Value, protocol: Protocol) -> Self {
		Self {
			value: Some(value),
			error: None,
			protocol,
		}
	}

	pub fn failure(error: ErrorPayload, protocol: Protocol) -> Self {
		Self {
			value: None,
			error: Some(error),
			protocol,
		}
	}

	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}

	/// Success value; `Value::Null` for an error envelope.
	pub fn value(&self) -> &Value {
		self.value.as_ref().unwrap_or(&Value::Null)
	}

	pub fn error(&self) -> Option<&ErrorPayload> {
		self.error.as_ref()
	}

	pub fn protocol(&self) -> Protocol {
		self.protocol
	}

	pub fn into_result(self) -> Result<Value, ErrorPayload> {
		match self.error {
			Some(error) => Err(error),
			None => Ok(self.value.unwrap_or(Value::Null)),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn success_omits_error_field() {
		let envelope = WireEnvelope::success(json!({"ok": true}), Protocol::W3C);
		let encoded = serde_json::to_value(&envelope).unwrap();
		assert_eq!(encoded, json!({"value": {"ok": true}, "protocol": "W3C"}));
	}

	#[test]
	fn failure_omits_value_field() {
		let envelope = WireEnvelope::failure(ErrorPayload::new("unknown command", "nope"), Protocol::MJSONWP);
		let encoded = serde_json::to_value(&envelope).unwrap();
		assert_eq!(
			encoded,
			json!({"error": {"error": "unknown command", "message": "nope"}, "protocol": "MJSONWP"})
		);
		assert!(!envelope.is_ok());
		assert_eq!(envelope.value(), &Value::Null);
		assert_eq!(envelope.into_result().unwrap_err().error, "unknown command");
	}
}
