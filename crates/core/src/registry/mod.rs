//! Session registry: the single source of truth for live sessions.
//!
//! All bookkeeping lives behind one registry-wide [`Mutex`]. The guard is only
//! ever held for map mutations and snapshots; driver and plugin calls always
//! run with it released, so one slow device never stalls other sessions.
//!
//! Besides registered sessions, the registry tracks *pending* drivers, keyed
//! by driver name, for the duration of capability negotiation. Concurrent
//! creations of the same driver type both proceed; each sees the other's
//! [`DriverData`] and the race is resolved by the drivers themselves.

mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_protocol::{Capabilities, Protocol, SessionInfo, DEFAULT_VENDOR_PREFIX};
use tokio::task::AbortHandle;
use tracing::{error, info};
use uuid::Uuid;

pub use lifecycle::{DeleteAllOptions, SessionState, Termination};

use crate::driver::{Driver, DriverArgs, DriverData, DriverFactory};
use crate::error::{Error, Result};
use crate::extension::{CapabilityMatcher, DriverSelector, ExtensionRegistry};
use crate::plugin_pool::{PluginList, PluginPool};

struct SessionEntry {
	seq: u64,
	driver_name: String,
	driver: Arc<dyn Driver>,
	capabilities: Capabilities,
	protocol: Protocol,
	state: SessionState,
	watcher: Option<AbortHandle>,
}

struct PendingEntry {
	id: u64,
	driver: Arc<dyn Driver>,
}

#[derive(Default)]
struct RegistryState {
	sessions: HashMap<String, SessionEntry>,
	pending: HashMap<String, Vec<PendingEntry>>,
	next_seq: u64,
}

impl RegistryState {
	fn next_seq(&mut self) -> u64 {
		self.next_seq += 1;
		self.next_seq
	}
}

/// A freshly registered session.
#[derive(Clone)]
pub struct NewSession {
	pub id: String,
	pub driver_name: String,
	pub driver: Arc<dyn Driver>,
	pub capabilities: Capabilities,
	pub protocol: Protocol,
}

impl std::fmt::Debug for NewSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NewSession")
			.field("id", &self.id)
			.field("driver_name", &self.driver_name)
			.field("capabilities", &self.capabilities)
			.field("protocol", &self.protocol)
			.finish_non_exhaustive()
	}
}

/// Everything dispatch needs from a session, captured atomically.
#[derive(Clone)]
pub struct SessionHandle {
	pub id: String,
	pub driver: Arc<dyn Driver>,
	pub plugins: PluginList,
	pub protocol: Protocol,
	pub state: SessionState,
}

/// Removes a pending driver entry unless it was promoted.
struct PendingGuard {
	registry: Option<Arc<SessionRegistry>>,
	driver: String,
	id: u64,
}

impl PendingGuard {
	fn disarm(&mut self) {
		self.registry = None;
	}
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		if let Some(registry) = self.registry.take() {
			registry.discard_pending(&self.driver, self.id);
		}
	}
}

pub struct SessionRegistry {
	state: Mutex<RegistryState>,
	extensions: ExtensionRegistry,
	selector: Box<dyn DriverSelector>,
	plugins: Arc<PluginPool>,
	driver_args: HashMap<String, DriverArgs>,
	vendor_prefix: String,
}

impl SessionRegistry {
	pub fn new(extensions: ExtensionRegistry, plugins: Arc<PluginPool>) -> Self {
		Self {
			state: Mutex::new(RegistryState::default()),
			extensions,
			selector: Box::new(CapabilityMatcher),
			plugins,
			driver_args: HashMap::new(),
			vendor_prefix: DEFAULT_VENDOR_PREFIX.to_string(),
		}
	}

	/// Replaces the default [`CapabilityMatcher`] driver selection.
	pub fn with_selector(mut self, selector: impl DriverSelector + 'static) -> Self {
		self.selector = Box::new(selector);
		self
	}

	pub fn with_driver_args(mut self, driver_args: HashMap<String, DriverArgs>) -> Self {
		self.driver_args = driver_args;
		self
	}

	pub fn with_vendor_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.vendor_prefix = prefix.into();
		self
	}

	pub fn extensions(&self) -> &ExtensionRegistry {
		&self.extensions
	}

	pub fn plugins(&self) -> &Arc<PluginPool> {
		&self.plugins
	}

	/// Whether `session_id` is registered, including sessions being torn down.
	pub fn exists(&self, session_id: &str) -> bool {
		self.state.lock().sessions.contains_key(session_id)
	}

	/// Returns the driver bound to `session_id`.
	pub fn get(&self, session_id: &str) -> Result<Arc<dyn Driver>> {
		self.state
			.lock()
			.sessions
			.get(session_id)
			.map(|entry| Arc::clone(&entry.driver))
			.ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
	}

	/// Returns the session's driver, plugins and protocol in one consistent read.
	pub fn lookup(&self, session_id: &str) -> Result<SessionHandle> {
		let state = self.state.lock();
		let entry = state
			.sessions
			.get(session_id)
			.ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
		// Installed at promotion and released at finalization, both under this lock.
		let plugins = self.plugins.session_instances(session_id).unwrap_or_default();
		Ok(SessionHandle {
			id: session_id.to_string(),
			driver: Arc::clone(&entry.driver),
			plugins,
			protocol: entry.protocol,
			state: entry.state,
		})
	}

	/// Snapshot of registered sessions in creation order.
	pub fn get_sessions(&self) -> Vec<SessionInfo> {
		let state = self.state.lock();
		let mut sessions: Vec<(u64, SessionInfo)> = state
			.sessions
			.iter()
			.map(|(id, entry)| {
				(
					entry.seq,
					SessionInfo {
						id: id.clone(),
						capabilities: entry.capabilities.clone(),
					},
				)
			})
			.collect();
		sessions.sort_by_key(|(seq, _)| *seq);
		sessions.into_iter().map(|(_, info)| info).collect()
	}

	pub fn session_count(&self) -> usize {
		self.state.lock().sessions.len()
	}

	/// Number of drivers of this type still negotiating.
	pub fn pending_count(&self, driver_name: &str) -> usize {
		self.state.lock().pending.get(driver_name).map_or(0, Vec::len)
	}

	/// `(session id, driver name)` pairs in creation order.
	fn session_ids(&self) -> Vec<(String, String)> {
		let state = self.state.lock();
		let mut ids: Vec<(u64, String, String)> = state
			.sessions
			.iter()
			.map(|(id, entry)| (entry.seq, id.clone(), entry.driver_name.clone()))
			.collect();
		ids.sort_by_key(|(seq, ..)| *seq);
		ids.into_iter().map(|(_, id, driver)| (id, driver)).collect()
	}

	/// Registers `driver` as pending and snapshots the driver data of every other
	/// session and pending driver of the same type.
	fn register_pending(self: &Arc<Self>, driver_name: &str, driver: &Arc<dyn Driver>) -> (PendingGuard, Vec<DriverData>) {
		let mut state = self.state.lock();
		let mut others: Vec<DriverData> = state
			.sessions
			.values()
			.filter(|entry| entry.driver_name == driver_name)
			.map(|entry| entry.driver.driver_data())
			.collect();
		if let Some(pending) = state.pending.get(driver_name) {
			others.extend(pending.iter().map(|entry| entry.driver.driver_data()));
		}

		let id = state.next_seq();
		state
			.pending
			.entry(driver_name.to_string())
			.or_default()
			.push(PendingEntry {
				id,
				driver: Arc::clone(driver),
			});

		let guard = PendingGuard {
			registry: Some(Arc::clone(self)),
			driver: driver_name.to_string(),
			id,
		};
		(guard, others)
	}

	fn discard_pending(&self, driver_name: &str, id: u64) {
		let mut state = self.state.lock();
		take_pending(&mut state, driver_name, id);
	}

	/// Moves a pending driver into the session map under a fresh id and installs
	/// its plugin set, which is constructed before the guard is taken.
	fn promote(
		&self,
		mut guard: PendingGuard,
		factory: &Arc<dyn DriverFactory>,
		driver: Arc<dyn Driver>,
		capabilities: Capabilities,
		protocol: Protocol,
	) -> Result<NewSession> {
		let mut id = Uuid::new_v4().to_string();
		let plugins = self.plugins.build(&id);

		let mut state = self.state.lock();
		guard.disarm();
		if !take_pending(&mut state, &guard.driver, guard.id) {
			error!(
				target = "tether.registry",
				driver = factory.name(),
				"pending driver vanished before promotion"
			);
			return Err(Error::Internal(format!(
				"pending {} driver was removed during negotiation",
				factory.name()
			)));
		}

		while state.sessions.contains_key(&id) {
			id = Uuid::new_v4().to_string();
		}
		let seq = state.next_seq();
		state.sessions.insert(
			id.clone(),
			SessionEntry {
				seq,
				driver_name: factory.name().to_string(),
				driver: Arc::clone(&driver),
				capabilities: capabilities.clone(),
				protocol,
				state: SessionState::Active,
				watcher: None,
			},
		);
		self.plugins.install(&id, plugins);

		Ok(NewSession {
			id,
			driver_name: factory.name().to_string(),
			driver,
			capabilities,
			protocol,
		})
	}

	/// Marks an active session as terminating and returns its driver. `None` if
	/// the session is absent or another path already owns its removal.
	fn begin_termination(&self, session_id: &str) -> Option<Arc<dyn Driver>> {
		let mut state = self.state.lock();
		let entry = state.sessions.get_mut(session_id)?;
		if !entry.state.can_transition_to(SessionState::Terminating) {
			return None;
		}
		entry.state = SessionState::Terminating;
		Some(Arc::clone(&entry.driver))
	}

	/// Removes a terminating session and its plugins. Every removal path ends
	/// here; returns `false` if the session was already gone.
	fn finalize(&self, session_id: &str, termination: Termination) -> bool {
		let (entry, plugins) = {
			let mut state = self.state.lock();
			let Some(entry) = state.sessions.remove(session_id) else {
				return false;
			};
			(entry, self.plugins.release(session_id))
		};
		debug_assert_eq!(entry.state, SessionState::Terminating);

		if let Some(watcher) = entry.watcher {
			watcher.abort();
		}
		if let (Termination::Unexpected(reason), Some(plugins)) = (&termination, &plugins) {
			for plugin in plugins.iter() {
				plugin.on_unexpected_shutdown(session_id, reason);
			}
		}

		match &termination {
			Termination::Requested => {
				info!(target = "tether.registry", session_id, driver = %entry.driver_name, "session removed");
			}
			Termination::Unexpected(reason) => {
				info!(
					target = "tether.registry",
					session_id,
					driver = %entry.driver_name,
					%reason,
					"session removed after unexpected shutdown"
				);
			}
		}
		true
	}

	fn store_watcher(&self, session_id: &str, watcher: AbortHandle) {
		let mut state = self.state.lock();
		match state.sessions.get_mut(session_id) {
			Some(entry) => {
				if let Some(previous) = entry.watcher.replace(watcher) {
					previous.abort();
				}
			}
			None => watcher.abort(),
		}
	}
}

fn take_pending(state: &mut RegistryState, driver_name: &str, id: u64) -> bool {
	let Some(entries) = state.pending.get_mut(driver_name) else {
		return false;
	};
	let before = entries.len();
	entries.retain(|entry| entry.id != id);
	let removed = entries.len() != before;
	if entries.is_empty() {
		state.pending.remove(driver_name);
	}
	removed
}
