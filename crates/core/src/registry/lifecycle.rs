//! Session state machine plus the create/delete orchestration.
//!
//! ```text
//! (none) -> Pending -> Active -> Terminating -> (removed)
//!              \-> (discarded on negotiation failure)
//! ```
//!
//! Explicit deletion and unexpected driver shutdown both move an `Active`
//! session to `Terminating`; whichever gets there first owns the removal, and
//! removal itself always goes through [`SessionRegistry::finalize`].

use std::sync::Arc;

use futures_util::future::join_all;
use tether_protocol::{CapabilityRequest, Capabilities, Protocol};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::{NewSession, SessionRegistry};
use crate::driver::{Driver, DriverFactory};
use crate::error::{CreationFailure, Error, Result};

/// Lifecycle state of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Driver instantiated, negotiation in flight. Never visible in the session map.
	Pending,
	Active,
	Terminating,
}

impl SessionState {
	pub fn can_transition_to(self, next: SessionState) -> bool {
		matches!(
			(self, next),
			(SessionState::Pending, SessionState::Active) | (SessionState::Active, SessionState::Terminating)
		)
	}
}

/// Why a session is being removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
	/// Client asked for deletion; the driver is torn down first.
	Requested,
	/// Driver ended the session on its own, or deletion was forced.
	Unexpected(String),
}

/// Filters for [`SessionRegistry::delete_all`].
#[derive(Debug, Clone, Default)]
pub struct DeleteAllOptions {
	/// Only delete sessions of this driver.
	pub driver: Option<String>,
	/// Skip driver teardown and treat every session as unexpectedly shut down.
	pub force: bool,
	/// Reason handed to plugins on forced removal.
	pub reason: Option<String>,
}

impl SessionRegistry {
	/// Creates a session for the first capability set and driver that negotiate
	/// successfully.
	///
	/// Candidates are tried in request order (`firstMatch` alternatives), and
	/// for each one in the selector's driver order. Negotiation runs on its own
	/// task: if the caller stops waiting, a late success is still registered.
	pub async fn create(self: &Arc<Self>, request: CapabilityRequest) -> Result<NewSession> {
		let this = Arc::clone(self);
		tokio::spawn(async move { this.negotiate(request).await })
			.await
			.map_err(join_error)?
	}

	async fn negotiate(self: Arc<Self>, request: CapabilityRequest) -> Result<NewSession> {
		let mut failures = Vec::new();
		let mut validated = false;
		let mut attempted = false;

		for candidate in request.candidates(&self.vendor_prefix) {
			let capabilities = match candidate {
				Ok(capabilities) => capabilities,
				Err(err) => {
					debug!(target = "tether.registry", error = %err, "skipping capability candidate");
					failures.push(CreationFailure {
						driver: "capabilities".to_string(),
						message: err.to_string(),
					});
					continue;
				}
			};
			validated = true;

			for factory in self.selector.candidates(&self.extensions, &capabilities) {
				attempted = true;
				match self.attempt(&factory, &capabilities, request.protocol).await {
					Ok(session) => return Ok(session),
					Err(err) => {
						info!(
							target = "tether.registry",
							driver = factory.name(),
							error = %err,
							"driver rejected session"
						);
						failures.push(CreationFailure {
							driver: factory.name().to_string(),
							message: err.to_string(),
						});
					}
				}
			}
		}

		let reason = if attempted {
			"every candidate driver failed to start a session"
		} else if validated {
			"no registered driver matches the requested automationName and platformName"
		} else {
			"no capability set passed validation"
		}
		.to_string();
		Err(Error::Creation { reason, failures })
	}

	async fn attempt(
		self: &Arc<Self>,
		factory: &Arc<dyn DriverFactory>,
		capabilities: &Capabilities,
		requested: Protocol,
	) -> Result<NewSession> {
		let args = self.driver_args.get(factory.name()).cloned().unwrap_or_default();
		let driver = factory.create(&args);
		let (guard, others) = self.register_pending(factory.name(), &driver);

		if !others.is_empty() {
			info!(
				target = "tether.registry",
				driver = factory.name(),
				others = others.len(),
				"other sessions of this driver are active or pending"
			);
		}

		let negotiated = driver.create_session(capabilities, &others).await?;
		let protocol = driver.protocol().unwrap_or(requested);
		let session = self.promote(guard, factory, driver, negotiated, protocol)?;

		info!(
			target = "tether.registry",
			session_id = %session.id,
			driver = factory.name(),
			version = factory.version(),
			%protocol,
			"new session created"
		);
		self.attach_shutdown_handler(&session.id, &session.driver);
		Ok(session)
	}

	/// Tears the session's driver down, then removes the session and its
	/// plugins.
	///
	/// Removal happens even when teardown fails; the teardown error is
	/// returned afterwards. A session already terminating is reported as not
	/// found.
	pub async fn delete(self: &Arc<Self>, session_id: &str) -> Result<()> {
		let this = Arc::clone(self);
		let session_id = session_id.to_string();
		tokio::spawn(async move { this.terminate(&session_id).await })
			.await
			.map_err(join_error)?
	}

	async fn terminate(&self, session_id: &str) -> Result<()> {
		let driver = self
			.begin_termination(session_id)
			.ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

		let teardown = driver.delete_session().await;
		if let Err(err) = &teardown {
			warn!(
				target = "tether.registry",
				session_id,
				error = %err,
				"driver teardown failed, removing session anyway"
			);
		}
		self.finalize(session_id, Termination::Requested);
		teardown
	}

	/// Deletes every matching session concurrently and returns how many were
	/// removed. Individual failures are logged and do not stop the others.
	pub async fn delete_all(self: &Arc<Self>, options: DeleteAllOptions) -> usize {
		let ids: Vec<String> = self
			.session_ids()
			.into_iter()
			.filter(|(_, driver)| options.driver.as_deref().is_none_or(|name| name == driver))
			.map(|(id, _)| id)
			.collect();
		if ids.is_empty() {
			return 0;
		}
		info!(target = "tether.registry", count = ids.len(), force = options.force, "deleting sessions");

		if options.force {
			let reason = options.reason.as_deref().unwrap_or("sessions were force-deleted");
			return ids
				.iter()
				.filter(|id| {
					self.begin_termination(id).is_some()
						&& self.finalize(id, Termination::Unexpected(reason.to_string()))
				})
				.count();
		}

		let results = join_all(ids.iter().map(|id| self.delete(id))).await;
		let mut removed = 0;
		for (id, result) in ids.iter().zip(results) {
			match result {
				Ok(()) => removed += 1,
				Err(err) if err.is_session_not_found() => {
					debug!(target = "tether.registry", session_id = %id, "session already gone");
				}
				Err(err) => {
					removed += 1;
					warn!(target = "tether.registry", session_id = %id, error = %err, "session deletion reported an error");
				}
			}
		}
		removed
	}

	/// Watches the driver's shutdown signal and removes the session when it
	/// fires. Does nothing for drivers without a signal.
	pub fn attach_shutdown_handler(self: &Arc<Self>, session_id: &str, driver: &Arc<dyn Driver>) {
		let Some(signal) = driver.shutdown_signal() else {
			return;
		};
		let registry = Arc::downgrade(self);
		let id = session_id.to_string();
		let task = tokio::spawn(async move {
			let Some(reason) = signal.wait().await else {
				return;
			};
			if let Some(registry) = registry.upgrade() {
				registry.handle_unexpected_shutdown(&id, reason);
			}
		});
		self.store_watcher(session_id, task.abort_handle());
	}

	fn handle_unexpected_shutdown(&self, session_id: &str, reason: String) {
		if self.begin_termination(session_id).is_none() {
			debug!(
				target = "tether.registry",
				session_id,
				"shutdown signal for a session that is already terminating"
			);
			return;
		}
		warn!(target = "tether.registry", session_id, %reason, "driver shut down unexpectedly");
		self.finalize(session_id, Termination::Unexpected(reason));
	}
}

fn join_error(err: JoinError) -> Error {
	Error::Internal(format!("session task failed: {err}"))
}
