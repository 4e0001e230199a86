//! Command routing: which plugins see a command, and where it terminates.

use std::sync::Arc;

use crate::dispatch::Target;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use crate::registry::{SessionHandle, SessionRegistry, SessionState};

/// Resolved plan for one dispatch.
pub struct Route {
	/// Plugins handling the command, in configuration order.
	pub plugins: Vec<Arc<dyn Plugin>>,
	pub target: Target,
	/// `None` for sessionless commands.
	pub session: Option<SessionHandle>,
}

pub struct CommandRouter {
	registry: Arc<SessionRegistry>,
}

impl CommandRouter {
	pub fn new(registry: Arc<SessionRegistry>) -> Self {
		Self { registry }
	}

	/// Plugins that declare support for `command`, from the session's set or the
	/// sessionless set.
	pub fn plugins_to_handle(&self, command: &str, session_id: Option<&str>) -> Result<Vec<Arc<dyn Plugin>>> {
		let plugins = match session_id {
			Some(id) => self.session(id)?.plugins,
			None => self.registry.plugins().instances_for(None),
		};
		Ok(filter_plugins(&plugins, command))
	}

	/// Whether the session's driver would proxy `command`.
	pub fn can_proxy(&self, session_id: &str, command: &str) -> Result<bool> {
		Ok(driver_can_proxy(&self.registry.get(session_id)?, command))
	}

	/// Whether a proxy is configured for the session at all.
	pub fn proxy_active(&self, session_id: &str) -> Result<bool> {
		Ok(self.registry.get(session_id)?.proxy_active())
	}

	/// Resolves plugins and target from a single registry read.
	///
	/// Plugins take precedence over proxying: a command goes straight to the
	/// proxy only when no plugin claims it.
	pub fn route(&self, command: &str, session_id: Option<&str>, server_command: bool) -> Result<Route> {
		let session = session_id.map(|id| self.session(id)).transpose()?;
		let plugins = match &session {
			Some(handle) => filter_plugins(&handle.plugins, command),
			None => filter_plugins(&self.registry.plugins().instances_for(None), command),
		};

		let target = match &session {
			_ if server_command => Target::Server,
			Some(handle) if plugins.is_empty() && driver_can_proxy(&handle.driver, command) => Target::Proxy,
			Some(_) => Target::Driver,
			None => Target::Unsupported,
		};

		Ok(Route { plugins, target, session })
	}

	/// Sessions being torn down no longer accept commands.
	fn session(&self, session_id: &str) -> Result<SessionHandle> {
		let handle = self.registry.lookup(session_id)?;
		if handle.state == SessionState::Terminating {
			return Err(Error::SessionNotFound(session_id.to_string()));
		}
		Ok(handle)
	}
}

fn filter_plugins(plugins: &[Arc<dyn Plugin>], command: &str) -> Vec<Arc<dyn Plugin>> {
	plugins
		.iter()
		.filter(|plugin| plugin.commands().matches(command))
		.cloned()
		.collect()
}

fn driver_can_proxy(driver: &Arc<dyn Driver>, command: &str) -> bool {
	driver.proxy_active() && driver.can_proxy(command)
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tether_protocol::CapabilityRequest;

	use super::*;
	use crate::extension::ExtensionRegistry;
	use crate::plugin::PluginFactory;
	use crate::plugin_pool::PluginPool;
	use crate::testing::{MockDriverFactory, RecordingPlugin};

	fn request() -> CapabilityRequest {
		CapabilityRequest::parse(&json!({
			"capabilities": {"alwaysMatch": {"platformName": "Android", "appium:automationName": "Mock"}}
		}))
		.unwrap()
	}

	fn router(driver: MockDriverFactory, plugins: Vec<Arc<dyn PluginFactory>>) -> (CommandRouter, Arc<SessionRegistry>) {
		let mut extensions = ExtensionRegistry::new();
		extensions.register_driver(Arc::new(driver)).unwrap();
		let pool = Arc::new(PluginPool::new(plugins, Default::default()));
		let registry = Arc::new(SessionRegistry::new(extensions, pool));
		(CommandRouter::new(Arc::clone(&registry)), registry)
	}

	fn names(plugins: &[Arc<dyn Plugin>]) -> Vec<&str> {
		plugins.iter().map(|p| p.name()).collect()
	}

	#[tokio::test]
	async fn only_plugins_declaring_the_command_are_assigned() {
		let (router, registry) = router(
			MockDriverFactory::new("mock", "Mock"),
			vec![
				Arc::new(RecordingPlugin::factory("A").handling(["swipe"])),
				Arc::new(RecordingPlugin::factory("B").handling(["tap"])),
			],
		);
		let session = registry.create(request()).await.unwrap();

		let plugins = router.plugins_to_handle("tap", Some(&session.id)).unwrap();
		assert_eq!(names(&plugins), vec!["B"]);
		assert!(router.plugins_to_handle("getPageSource", Some(&session.id)).unwrap().is_empty());
	}

	#[tokio::test]
	async fn sessionless_commands_use_the_shared_set() {
		let (router, _registry) = router(
			MockDriverFactory::new("mock", "Mock"),
			vec![Arc::new(RecordingPlugin::factory("A"))],
		);
		let plugins = router.plugins_to_handle("getStatus", None).unwrap();
		assert_eq!(names(&plugins), vec!["A"]);
	}

	#[tokio::test]
	async fn unknown_session_fails_before_plugin_resolution() {
		let (router, _registry) = router(MockDriverFactory::new("mock", "Mock"), Vec::new());
		let err = router.route("tap", Some("missing"), false).err().unwrap();
		assert!(err.is_session_not_found());
		assert!(router.can_proxy("missing", "tap").unwrap_err().is_session_not_found());
	}

	#[tokio::test]
	async fn proxy_wins_only_without_plugins() {
		let (router, registry) = router(
			MockDriverFactory::new("mock", "Mock").with_proxy(["getPageSource"]),
			vec![Arc::new(RecordingPlugin::factory("A").handling(["tap"]))],
		);
		let session = registry.create(request()).await.unwrap();

		assert!(router.proxy_active(&session.id).unwrap());
		assert!(router.can_proxy(&session.id, "getPageSource").unwrap());
		assert!(!router.can_proxy(&session.id, "tap").unwrap());

		let route = router.route("getPageSource", Some(&session.id), false).unwrap();
		assert_eq!(route.target, Target::Proxy);

		let route = router.route("tap", Some(&session.id), false).unwrap();
		assert_eq!(route.target, Target::Driver);
		assert_eq!(names(&route.plugins), vec!["A"]);
	}

	#[tokio::test]
	async fn plugins_take_precedence_over_proxy() {
		let (router, registry) = router(
			MockDriverFactory::new("mock", "Mock").with_proxy(["tap"]),
			vec![Arc::new(RecordingPlugin::factory("A").handling(["tap"]))],
		);
		let session = registry.create(request()).await.unwrap();

		assert!(router.can_proxy(&session.id, "tap").unwrap());
		let route = router.route("tap", Some(&session.id), false).unwrap();
		assert_eq!(route.target, Target::Driver);
	}

	#[tokio::test]
	async fn server_commands_and_sessionless_targets() {
		let (router, _registry) = router(MockDriverFactory::new("mock", "Mock"), Vec::new());
		assert_eq!(router.route("getStatus", None, true).unwrap().target, Target::Server);
		assert_eq!(router.route("tap", None, false).unwrap().target, Target::Unsupported);
	}
}
