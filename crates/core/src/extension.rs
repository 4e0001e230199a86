//! Name-indexed driver and plugin factories plus the driver selection policy.

use std::sync::Arc;

use tether_protocol::Capabilities;

use crate::driver::DriverFactory;
use crate::error::{Error, Result};
use crate::plugin::PluginFactory;

/// Driver and plugin factories available to the server, in registration order.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
	drivers: Vec<Arc<dyn DriverFactory>>,
	plugins: Vec<Arc<dyn PluginFactory>>,
}

impl ExtensionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a driver factory; names must be unique.
	pub fn register_driver(&mut self, factory: Arc<dyn DriverFactory>) -> Result<()> {
		if self.driver(factory.name()).is_some() {
			return Err(Error::Config(format!("driver '{}' is already registered", factory.name())));
		}
		self.drivers.push(factory);
		Ok(())
	}

	/// Registers a plugin factory; names must be unique.
	pub fn register_plugin(&mut self, factory: Arc<dyn PluginFactory>) -> Result<()> {
		if self.plugin(factory.name()).is_some() {
			return Err(Error::Config(format!("plugin '{}' is already registered", factory.name())));
		}
		self.plugins.push(factory);
		Ok(())
	}

	pub fn driver(&self, name: &str) -> Option<&Arc<dyn DriverFactory>> {
		self.drivers.iter().find(|d| d.name() == name)
	}

	pub fn plugin(&self, name: &str) -> Option<&Arc<dyn PluginFactory>> {
		self.plugins.iter().find(|p| p.name() == name)
	}

	pub fn drivers(&self) -> &[Arc<dyn DriverFactory>] {
		&self.drivers
	}

	pub fn plugins(&self) -> &[Arc<dyn PluginFactory>] {
		&self.plugins
	}

	/// Keeps only the named drivers. An empty list keeps everything.
	pub fn retain_drivers(&mut self, names: &[String]) -> Result<()> {
		if names.is_empty() {
			return Ok(());
		}
		if let Some(unknown) = names.iter().find(|name| self.driver(name).is_none()) {
			return Err(Error::Config(format!("driver '{unknown}' is not registered")));
		}
		self.drivers.retain(|d| names.iter().any(|name| name == d.name()));
		Ok(())
	}

	/// Resolves enabled plugin names to factories, preserving the given order.
	pub fn resolve_plugins(&self, names: &[String]) -> Result<Vec<Arc<dyn PluginFactory>>> {
		names
			.iter()
			.map(|name| {
				self.plugin(name)
					.cloned()
					.ok_or_else(|| Error::Config(format!("plugin '{name}' is not registered")))
			})
			.collect()
	}
}

/// Policy yielding the ordered driver candidates for a capability set.
pub trait DriverSelector: Send + Sync {
	fn candidates(&self, extensions: &ExtensionRegistry, capabilities: &Capabilities) -> Vec<Arc<dyn DriverFactory>>;
}

/// Matches `automationName` and `platformName` case-insensitively, keeping
/// registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityMatcher;

impl DriverSelector for CapabilityMatcher {
	fn candidates(&self, extensions: &ExtensionRegistry, capabilities: &Capabilities) -> Vec<Arc<dyn DriverFactory>> {
		let Some(automation) = capabilities.automation_name() else {
			return Vec::new();
		};
		let platform = capabilities.platform_name();

		extensions
			.drivers()
			.iter()
			.filter(|driver| driver.automation_name().eq_ignore_ascii_case(automation))
			.filter(|driver| {
				let platforms = driver.platform_names();
				platforms.is_empty()
					|| platform.is_some_and(|requested| platforms.iter().any(|p| p.eq_ignore_ascii_case(requested)))
			})
			.cloned()
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{MockDriverFactory, RecordingPlugin};

	fn registry() -> ExtensionRegistry {
		let mut extensions = ExtensionRegistry::new();
		extensions
			.register_driver(Arc::new(MockDriverFactory::new("uia2", "UiAutomator2").with_platforms(["Android"])))
			.unwrap();
		extensions
			.register_driver(Arc::new(MockDriverFactory::new("xcui", "XCUITest").with_platforms(["iOS", "tvOS"])))
			.unwrap();
		extensions
			.register_driver(Arc::new(MockDriverFactory::new("uia2-fallback", "uiautomator2")))
			.unwrap();
		extensions
	}

	fn names(candidates: &[Arc<dyn DriverFactory>]) -> Vec<&str> {
		candidates.iter().map(|d| d.name()).collect()
	}

	#[test]
	fn matcher_keeps_registration_order_and_ignores_case() {
		let caps = Capabilities::new()
			.with("platformName", "android")
			.with("automationName", "UIAUTOMATOR2");
		let candidates = CapabilityMatcher.candidates(&registry(), &caps);
		assert_eq!(names(&candidates), vec!["uia2", "uia2-fallback"]);
	}

	#[test]
	fn matcher_filters_on_platform() {
		let caps = Capabilities::new().with("platformName", "tvOS").with("automationName", "XCUITest");
		assert_eq!(names(&CapabilityMatcher.candidates(&registry(), &caps)), vec!["xcui"]);

		let caps = Capabilities::new().with("platformName", "Windows").with("automationName", "XCUITest");
		assert!(CapabilityMatcher.candidates(&registry(), &caps).is_empty());
	}

	#[test]
	fn duplicate_registration_is_rejected() {
		let mut extensions = registry();
		let err = extensions
			.register_driver(Arc::new(MockDriverFactory::new("uia2", "UiAutomator2")))
			.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn plugin_resolution_preserves_configured_order() {
		let mut extensions = ExtensionRegistry::new();
		extensions.register_plugin(Arc::new(RecordingPlugin::factory("a"))).unwrap();
		extensions.register_plugin(Arc::new(RecordingPlugin::factory("b"))).unwrap();

		let resolved = extensions.resolve_plugins(&["b".to_string(), "a".to_string()]).unwrap();
		let order: Vec<&str> = resolved.iter().map(|p| p.name()).collect();
		assert_eq!(order, vec!["b", "a"]);

		assert!(extensions.resolve_plugins(&["missing".to_string()]).is_err());
	}

	#[test]
	fn retain_drivers_applies_allow_list() {
		let mut extensions = registry();
		extensions.retain_drivers(&["xcui".to_string()]).unwrap();
		assert_eq!(names(extensions.drivers()), vec!["xcui"]);
		assert!(extensions.retain_drivers(&["nope".to_string()]).is_err());
	}
}
