//! Capability payloads and W3C `alwaysMatch` / `firstMatch` processing.
//!
//! A new-session request arrives either in W3C shape
//! (`{"capabilities": {"alwaysMatch": {...}, "firstMatch": [{...}]}}`) or in the
//! legacy JSONWP shape (`{"desiredCapabilities": {...}}`). [`CapabilityRequest`]
//! normalizes both into an ordered list of candidate [`Capabilities`], one per
//! `firstMatch` entry, which the session core tries in order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::Protocol;

/// Vendor prefix stripped from capability names unless configured otherwise.
pub const DEFAULT_VENDOR_PREFIX: &str = "appium:";

/// Capabilities every candidate must carry as strings.
pub const REQUIRED_CAPABILITIES: [&str; 2] = ["platformName", "automationName"];

/// Accepted shape of an optional capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
	String,
	Number,
	Boolean,
	OneOf(&'static [&'static str]),
}

impl Constraint {
	fn accepts(self, value: &Value) -> bool {
		match self {
			Constraint::String => value.is_string(),
			Constraint::Number => value.is_number(),
			Constraint::Boolean => value.is_boolean(),
			Constraint::OneOf(allowed) => value.as_str().is_some_and(|v| allowed.contains(&v)),
		}
	}

	fn expected(self) -> String {
		match self {
			Constraint::String => "a string".to_string(),
			Constraint::Number => "a number".to_string(),
			Constraint::Boolean => "a boolean".to_string(),
			Constraint::OneOf(allowed) => format!("one of {}", allowed.join(", ")),
		}
	}
}

/// Type constraints on well-known optional capabilities; absent or null values pass.
pub const CAPABILITY_CONSTRAINTS: &[(&str, Constraint)] = &[
	("app", Constraint::String),
	("deviceName", Constraint::String),
	("platformVersion", Constraint::String),
	("newCommandTimeout", Constraint::Number),
	("autoLaunch", Constraint::Boolean),
	("udid", Constraint::String),
	("orientation", Constraint::OneOf(&["LANDSCAPE", "PORTRAIT"])),
	("autoWebview", Constraint::Boolean),
	("noReset", Constraint::Boolean),
	("fullReset", Constraint::Boolean),
	("language", Constraint::String),
	("locale", Constraint::String),
	("eventTimings", Constraint::Boolean),
	("printPageSourceOnFindFailure", Constraint::Boolean),
];

/// Capability names defined by W3C WebDriver; these never carry a vendor prefix.
const W3C_STANDARD_CAPABILITIES: &[&str] = &[
	"acceptInsecureCerts",
	"browserName",
	"browserVersion",
	"pageLoadStrategy",
	"platformName",
	"proxy",
	"setWindowRect",
	"strictFileInteractability",
	"timeouts",
	"unhandledPromptBehavior",
	"webSocketUrl",
];

/// Errors produced while parsing or validating capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
	/// The request body is not a recognizable capabilities payload.
	#[error("malformed capabilities: {0}")]
	Malformed(String),

	/// A key is present in both `alwaysMatch` and a `firstMatch` entry.
	#[error("capability '{0}' appears in both alwaysMatch and firstMatch")]
	Conflict(String),

	/// A required capability is absent.
	#[error("required capability '{0}' is missing")]
	Missing(&'static str),

	/// A required capability is present but not a string.
	#[error("capability '{0}' must be a string")]
	NotAString(&'static str),

	/// An optional capability violates its [`Constraint`].
	#[error("capability '{name}' must be {expected}")]
	Invalid { name: &'static str, expected: String },
}

/// A flat capability object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
	pub fn new() -> Self {
		Self(Map::new())
	}

	/// Wraps a JSON object; non-object values are rejected.
	pub fn from_value(value: Value) -> Result<Self, CapabilityError> {
		match value {
			Value::Object(map) => Ok(Self(map)),
			Value::Null => Ok(Self::new()),
			other => Err(CapabilityError::Malformed(format!("expected an object, got {other}"))),
		}
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn get_str(&self, name: &str) -> Option<&str> {
		self.0.get(name).and_then(Value::as_str)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.0.insert(name.into(), value.into())
	}

	/// Builder-style [`insert`](Self::insert).
	pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.insert(name, value);
		self
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}

	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}

	pub fn platform_name(&self) -> Option<&str> {
		self.get_str("platformName")
	}

	pub fn automation_name(&self) -> Option<&str> {
		self.get_str("automationName")
	}

	/// Removes `prefix` from non-standard capability names.
	///
	/// `appium:deviceName` becomes `deviceName`; an unprefixed standard name such
	/// as `platformName` is kept as-is. An empty prefix returns a clone.
	pub fn strip_vendor_prefix(&self, prefix: &str) -> Self {
		if prefix.is_empty() {
			return self.clone();
		}
		let map = self
			.0
			.iter()
			.map(|(key, value)| match key.strip_prefix(prefix) {
				Some(stripped) if !W3C_STANDARD_CAPABILITIES.contains(&stripped) => (stripped.to_string(), value.clone()),
				_ => (key.clone(), value.clone()),
			})
			.collect();
		Self(map)
	}

	/// Merges a `firstMatch` entry over `alwaysMatch`. Shared keys are an error.
	pub fn merge(always: &Capabilities, first: &Capabilities) -> Result<Self, CapabilityError> {
		let mut merged = always.0.clone();
		for (key, value) in &first.0 {
			if merged.contains_key(key) {
				return Err(CapabilityError::Conflict(key.clone()));
			}
			merged.insert(key.clone(), value.clone());
		}
		Ok(Self(merged))
	}

	/// Checks the [`REQUIRED_CAPABILITIES`] constraints.
	pub fn validate_required(&self) -> Result<(), CapabilityError> {
		for name in REQUIRED_CAPABILITIES {
			match self.get(name) {
				None | Some(Value::Null) => return Err(CapabilityError::Missing(name)),
				Some(Value::String(_)) => {}
				Some(_) => return Err(CapabilityError::NotAString(name)),
			}
		}
		Ok(())
	}

	/// Checks the required capabilities, then [`CAPABILITY_CONSTRAINTS`].
	pub fn validate(&self) -> Result<(), CapabilityError> {
		self.validate_required()?;
		for &(name, constraint) in CAPABILITY_CONSTRAINTS {
			match self.get(name) {
				None | Some(Value::Null) => {}
				Some(value) if constraint.accepts(value) => {}
				Some(_) => {
					return Err(CapabilityError::Invalid {
						name,
						expected: constraint.expected(),
					});
				}
			}
		}
		Ok(())
	}
}

impl From<Map<String, Value>> for Capabilities {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}

/// A parsed new-session request.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
	/// Protocol inferred from the request shape.
	pub protocol: Protocol,
	always_match: Capabilities,
	first_match: Vec<Capabilities>,
}

impl CapabilityRequest {
	/// Builds a W3C request directly.
	pub fn w3c(always_match: Capabilities, first_match: Vec<Capabilities>) -> Self {
		Self {
			protocol: Protocol::W3C,
			always_match,
			first_match,
		}
	}

	/// Parses either request shape from a JSON body.
	pub fn parse(body: &Value) -> Result<Self, CapabilityError> {
		if let Some(caps) = body.get("capabilities") {
			let always_match = Capabilities::from_value(caps.get("alwaysMatch").cloned().unwrap_or(Value::Null))?;
			let first_match = match caps.get("firstMatch") {
				None | Some(Value::Null) => Vec::new(),
				Some(Value::Array(entries)) => entries
					.iter()
					.cloned()
					.map(Capabilities::from_value)
					.collect::<Result<Vec<_>, _>>()?,
				Some(other) => return Err(CapabilityError::Malformed(format!("firstMatch must be an array, got {other}"))),
			};
			return Ok(Self {
				protocol: Protocol::W3C,
				always_match,
				first_match,
			});
		}

		if let Some(desired) = body.get("desiredCapabilities") {
			return Ok(Self {
				protocol: Protocol::MJSONWP,
				always_match: Capabilities::from_value(desired.clone())?,
				first_match: Vec::new(),
			});
		}

		Err(CapabilityError::Malformed("expected 'capabilities' or 'desiredCapabilities'".to_string()))
	}

	/// Returns one entry per `firstMatch` alternative, in request order.
	///
	/// Each entry is the prefix-stripped merge checked by
	/// [`Capabilities::validate`]; invalid alternatives are kept as errors so the
	/// caller can report why they were skipped.
	pub fn candidates(&self, vendor_prefix: &str) -> Vec<Result<Capabilities, CapabilityError>> {
		let always = self.always_match.strip_vendor_prefix(vendor_prefix);
		let empty = [Capabilities::new()];
		let firsts: &[Capabilities] = if self.first_match.is_empty() { &empty } else { &self.first_match };

		firsts
			.iter()
			.map(|first| {
				let merged = Capabilities::merge(&always, &first.strip_vendor_prefix(vendor_prefix))?;
				merged.validate()?;
				Ok(merged)
			})
			.collect()
	}
}
