//! Dispatch engine: builds the plugin chain for a command and runs it.
//!
//! # Flow
//!
//! 1. [`CommandRouter::route`] resolves the session (failing fast with
//!    `SessionNotFound`), the plugins claiming the command, and the terminal.
//! 2. A [`Chain`] is built over that fixed plugin list and executed from link 0.
//! 3. The [`HandlerReport`] is logged and the outcome is wrapped in a
//!    [`ResultEnvelope`] carrying the final protocol marker.

mod chain;
mod report;

use std::sync::Arc;

use serde_json::Value;
use tether_protocol::{Protocol, WireEnvelope};

pub use chain::{CommandContext, Next, ServerCommands, Terminal};
pub use report::{HandlerReport, Link, PluginRun, Target};

use chain::Chain;
use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::router::CommandRouter;

/// Outcome of one dispatch plus the protocol it must be encoded with.
#[derive(Debug)]
pub struct ResultEnvelope {
	pub result: Result<Value>,
	pub protocol: Protocol,
}

impl ResultEnvelope {
	pub fn success(value: Value, protocol: Protocol) -> Self {
		Self {
			result: Ok(value),
			protocol,
		}
	}

	pub fn failure(error: Error, protocol: Protocol) -> Self {
		Self {
			result: Err(error),
			protocol,
		}
	}

	pub fn is_ok(&self) -> bool {
		self.result.is_ok()
	}

	pub fn value(&self) -> Option<&Value> {
		self.result.as_ref().ok()
	}

	pub fn error(&self) -> Option<&Error> {
		self.result.as_ref().err()
	}

	pub fn into_result(self) -> Result<Value> {
		self.result
	}

	/// Wire shape for the protocol layer.
	pub fn into_wire(self) -> WireEnvelope {
		match self.result {
			Ok(value) => WireEnvelope::success(value, self.protocol),
			Err(err) => WireEnvelope::failure(err.to_payload(), self.protocol),
		}
	}
}

/// A command addressed to the engine.
#[derive(Debug, Clone)]
pub struct CommandRequest<'a> {
	pub command: &'a str,
	pub session_id: Option<&'a str>,
	pub args: Vec<Value>,
	/// Protocol inferred from the inbound request, if known.
	pub protocol: Option<Protocol>,
}

impl<'a> CommandRequest<'a> {
	pub fn new(command: &'a str, session_id: Option<&'a str>, args: Vec<Value>) -> Self {
		Self {
			command,
			session_id,
			args,
			protocol: None,
		}
	}

	pub fn with_protocol(mut self, protocol: Protocol) -> Self {
		self.protocol = Some(protocol);
		self
	}
}

pub struct Dispatcher {
	router: CommandRouter,
	default_protocol: Protocol,
}

impl Dispatcher {
	pub fn new(registry: Arc<SessionRegistry>) -> Self {
		Self {
			router: CommandRouter::new(registry),
			default_protocol: Protocol::default(),
		}
	}

	pub fn with_default_protocol(mut self, protocol: Protocol) -> Self {
		self.default_protocol = protocol;
		self
	}

	pub fn router(&self) -> &CommandRouter {
		&self.router
	}

	/// Runs `request` through its plugin chain.
	pub async fn execute(&self, request: CommandRequest<'_>, server: Option<&dyn ServerCommands>) -> ResultEnvelope {
		self.execute_with_report(request, server).await.0
	}

	/// Like [`execute`](Self::execute), also returning the handler report.
	/// `None` when the command failed before any chain was built.
	pub async fn execute_with_report(
		&self,
		request: CommandRequest<'_>,
		server: Option<&dyn ServerCommands>,
	) -> (ResultEnvelope, Option<HandlerReport>) {
		let CommandRequest {
			command,
			session_id,
			args,
			protocol,
		} = request;
		let requested = protocol.unwrap_or(self.default_protocol);

		let server = server.filter(|server| server.handles(command));
		let route = match self.router.route(command, session_id, server.is_some()) {
			Ok(route) => route,
			Err(err) => {
				tracing::debug!(target = "tether.dispatch", command, session_id, error = %err, "command rejected");
				return (ResultEnvelope::failure(err, requested), None);
			}
		};

		let driver = route.session.as_ref().map(|session| &session.driver);
		let protocol = route.session.as_ref().map_or(requested, |session| session.protocol);
		let terminal = match (route.target, server, driver) {
			(Target::Server, Some(server), _) => Terminal::Server(server),
			(Target::Proxy, _, Some(driver)) => Terminal::Proxy(driver),
			(Target::Driver, _, Some(driver)) => Terminal::Driver(driver),
			_ => Terminal::Unsupported,
		};

		let report = HandlerReport::new(command, session_id, &route.plugins, route.target);
		let ctx = CommandContext::new(command, session_id, driver, protocol);
		let chain = Chain::new(&route.plugins, terminal, ctx, report);
		let result = chain.run(args).await;
		let protocol = chain.protocol();

		let report = chain.into_report();
		report.log();
		(ResultEnvelope { result, protocol }, Some(report))
	}
}
