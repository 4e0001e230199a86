//! Server configuration file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_protocol::{DEFAULT_VENDOR_PREFIX, Protocol};

use crate::driver::DriverArgs;
use crate::error::{Error, Result};
use crate::plugin::PluginArgs;

/// Server settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	/// Enabled plugins in chain order.
	pub plugins: Vec<String>,
	/// Enabled drivers; empty enables every registered driver.
	pub drivers: Vec<String>,
	pub driver_args: HashMap<String, DriverArgs>,
	pub plugin_args: HashMap<String, PluginArgs>,
	/// Protocol marker used when neither the request nor the session sets one.
	pub default_protocol: Protocol,
	/// Delete every existing session before creating a new one.
	pub session_override: bool,
	/// Vendor prefix stripped from capability names.
	pub capability_prefix: String,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			plugins: Vec::new(),
			drivers: Vec::new(),
			driver_args: HashMap::new(),
			plugin_args: HashMap::new(),
			default_protocol: Protocol::default(),
			session_override: false,
			capability_prefix: DEFAULT_VENDOR_PREFIX.to_string(),
		}
	}
}

impl ServerConfig {
	/// Reads a JSON config file.
	pub fn load(path: &Path) -> Result<Self> {
		let text = fs::read_to_string(path)?;
		Self::from_json_str(&text).map_err(|err| match err {
			Error::Json(err) => Error::Config(format!("{}: {err}", path.display())),
			other => other,
		})
	}

	pub fn from_json_str(text: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<()> {
		for (index, name) in self.plugins.iter().enumerate() {
			if self.plugins[..index].contains(name) {
				return Err(Error::Config(format!("plugin '{name}' is listed more than once")));
			}
		}
		for name in self.plugin_args.keys() {
			if !self.plugins.contains(name) {
				return Err(Error::Config(format!("arguments given for plugin '{name}', which is not enabled")));
			}
		}
		Ok(())
	}
}
