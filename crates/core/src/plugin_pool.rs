//! Lazily instantiated plugin sets: one per session plus one shared sessionless set.
//!
//! Session lists live in a [`DashMap`] so resolution never contends with the
//! session registry's guard; once built, a list is immutable for the life of
//! its session.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::debug;

use crate::plugin::{Plugin, PluginArgs, PluginFactory};

/// Ordered, immutable set of plugin instances.
pub type PluginList = Arc<[Arc<dyn Plugin>]>;

pub struct PluginPool {
	factories: Vec<Arc<dyn PluginFactory>>,
	args: HashMap<String, PluginArgs>,
	sessionless: OnceLock<PluginList>,
	sessions: DashMap<String, PluginList>,
}

impl Default for PluginPool {
	fn default() -> Self {
		Self::new(Vec::new(), HashMap::new())
	}
}

impl PluginPool {
	/// Creates a pool for `factories`, in chain order.
	pub fn new(factories: Vec<Arc<dyn PluginFactory>>, args: HashMap<String, PluginArgs>) -> Self {
		Self {
			factories,
			args,
			sessionless: OnceLock::new(),
			sessions: DashMap::new(),
		}
	}

	/// Names of the configured plugins, in chain order.
	pub fn plugin_names(&self) -> Vec<&str> {
		self.factories.iter().map(|f| f.name()).collect()
	}

	/// Returns the instances for a session, or the sessionless set for `None`,
	/// constructing them on first use.
	pub fn instances_for(&self, session_id: Option<&str>) -> PluginList {
		match session_id {
			None => Arc::clone(self.sessionless.get_or_init(|| self.instantiate("sessionless"))),
			Some(id) => {
				if let Some(existing) = self.sessions.get(id) {
					return Arc::clone(existing.value());
				}
				let entry = self
					.sessions
					.entry(id.to_string())
					.or_insert_with(|| self.instantiate(id));
				Arc::clone(entry.value())
			}
		}
	}

	/// Already built instances for `session_id`; never constructs.
	pub fn session_instances(&self, session_id: &str) -> Option<PluginList> {
		self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
	}

	/// Builds a fresh session set without storing it.
	pub(crate) fn build(&self, scope: &str) -> PluginList {
		self.instantiate(scope)
	}

	/// Stores a set built by [`build`](Self::build) for `session_id`.
	pub(crate) fn install(&self, session_id: &str, plugins: PluginList) {
		self.sessions.insert(session_id.to_string(), plugins);
	}

	/// Drops the session's instances from the pool.
	pub fn release(&self, session_id: &str) -> Option<PluginList> {
		self.sessions.remove(session_id).map(|(_, plugins)| plugins)
	}

	/// Number of sessions holding plugin instances.
	pub fn session_count(&self) -> usize {
		self.sessions.len()
	}

	fn instantiate(&self, scope: &str) -> PluginList {
		let empty = PluginArgs::new();
		let plugins: Vec<Arc<dyn Plugin>> = self
			.factories
			.iter()
			.map(|factory| factory.create(self.args.get(factory.name()).unwrap_or(&empty)))
			.collect();
		if !plugins.is_empty() {
			debug!(target = "tether.plugins", scope, count = plugins.len(), "instantiated plugins");
		}
		plugins.into()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::testing::{RecordingPlugin, RecordingPluginFactory};

	fn pool() -> (PluginPool, Arc<RecordingPluginFactory>) {
		let second = Arc::new(RecordingPlugin::factory("second"));
		let factories: Vec<Arc<dyn PluginFactory>> = vec![Arc::new(RecordingPlugin::factory("first")), second.clone()];
		let mut args = HashMap::new();
		args.insert("second".to_string(), json!({"flag": true}).as_object().cloned().unwrap());
		(PluginPool::new(factories, args), second)
	}

	fn names(list: &PluginList) -> Vec<&str> {
		list.iter().map(|p| p.name()).collect()
	}

	#[test]
	fn session_instances_are_built_once_in_order() {
		let (pool, _) = pool();
		let a = pool.instances_for(Some("s1"));
		let b = pool.instances_for(Some("s1"));
		assert!(Arc::ptr_eq(&a, &b));
		assert_eq!(names(&a), vec!["first", "second"]);
		assert_eq!(pool.session_count(), 1);
	}

	#[test]
	fn sessions_do_not_share_instances() {
		let (pool, _) = pool();
		let a = pool.instances_for(Some("s1"));
		let b = pool.instances_for(Some("s2"));
		assert!(!Arc::ptr_eq(&a[0], &b[0]));
	}

	#[test]
	fn sessionless_set_is_shared_for_the_pool_lifetime() {
		let (pool, _) = pool();
		let a = pool.instances_for(None);
		let b = pool.instances_for(None);
		assert!(Arc::ptr_eq(&a, &b));
		assert_eq!(pool.session_count(), 0);
	}

	#[test]
	fn session_instances_only_reads() {
		let (pool, second) = pool();
		assert!(pool.session_instances("s1").is_none());

		let built = pool.build("s1");
		assert_eq!(pool.session_count(), 0);
		pool.install("s1", Arc::clone(&built));
		let stored = pool.session_instances("s1").unwrap();
		assert!(Arc::ptr_eq(&built, &stored));
		assert_eq!(second.created_args().len(), 1);
	}

	#[test]
	fn release_drops_session_instances() {
		let (pool, _) = pool();
		let weak = Arc::downgrade(&pool.instances_for(Some("s1"))[0]);
		assert!(weak.upgrade().is_some());

		assert!(pool.release("s1").is_some());
		assert!(weak.upgrade().is_none());
		assert!(pool.release("s1").is_none());
	}

	#[test]
	fn factories_receive_their_configured_args() {
		let (pool, second) = pool();
		pool.instances_for(None);
		pool.instances_for(Some("s1"));
		pool.instances_for(Some("s1"));

		let created = second.created_args();
		assert_eq!(created.len(), 2);
		assert!(created.iter().all(|args| args.get("flag") == Some(&json!(true))));
	}
}
