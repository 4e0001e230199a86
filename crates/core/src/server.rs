//! Upward-facing server facade.
//!
//! [`AutomationServer`] is what a protocol front-end talks to. Session
//! management commands are themselves dispatched through the plugin chain,
//! with the server as the terminal link, so plugins can wrap session creation
//! and deletion the same way they wrap driver commands.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_protocol::{BuildInfo, CapabilityRequest, CreatedSession, Protocol, StatusInfo};
use tracing::info;

use crate::config::ServerConfig;
use crate::dispatch::{CommandContext, CommandRequest, Dispatcher, ResultEnvelope, ServerCommands};
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use crate::plugin_pool::PluginPool;
use crate::registry::{DeleteAllOptions, SessionRegistry};

pub const CREATE_SESSION: &str = "createSession";
pub const DELETE_SESSION: &str = "deleteSession";
pub const GET_SESSIONS: &str = "getSessions";
pub const GET_STATUS: &str = "getStatus";

const SERVER_COMMANDS: [&str; 4] = [CREATE_SESSION, DELETE_SESSION, GET_SESSIONS, GET_STATUS];

pub struct AutomationServer {
	registry: Arc<SessionRegistry>,
	dispatcher: Dispatcher,
	session_override: bool,
	build: BuildInfo,
}

impl AutomationServer {
	pub fn new(registry: Arc<SessionRegistry>) -> Self {
		Self {
			dispatcher: Dispatcher::new(Arc::clone(&registry)),
			registry,
			session_override: false,
			build: BuildInfo {
				version: env!("CARGO_PKG_VERSION").to_string(),
				git_sha: None,
			},
		}
	}

	/// Wires registry, plugin pool and dispatcher from `config`.
	///
	/// Fails if the config names a driver or plugin `extensions` does not
	/// provide.
	pub fn from_config(config: &ServerConfig, mut extensions: ExtensionRegistry) -> Result<Self> {
		extensions.retain_drivers(&config.drivers)?;
		let plugins = extensions.resolve_plugins(&config.plugins)?;
		if extensions.drivers().is_empty() {
			return Err(Error::Config("no drivers are available".to_string()));
		}

		let pool = Arc::new(PluginPool::new(plugins, config.plugin_args.clone()));
		let registry = SessionRegistry::new(extensions, pool)
			.with_driver_args(config.driver_args.clone())
			.with_vendor_prefix(config.capability_prefix.clone());

		let mut server = Self::new(Arc::new(registry)).with_session_override(config.session_override);
		server.dispatcher = Dispatcher::new(Arc::clone(&server.registry)).with_default_protocol(config.default_protocol);
		Ok(server)
	}

	pub fn with_session_override(mut self, enabled: bool) -> Self {
		self.session_override = enabled;
		self
	}

	pub fn with_build(mut self, build: BuildInfo) -> Self {
		self.build = build;
		self
	}

	pub fn registry(&self) -> &Arc<SessionRegistry> {
		&self.registry
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Creates a session from a W3C or legacy new-session body.
	pub async fn create_session(&self, body: Value) -> ResultEnvelope {
		let mut request = CommandRequest::new(CREATE_SESSION, None, vec![body]);
		if let Some(protocol) = request.args.first().and_then(infer_protocol) {
			request = request.with_protocol(protocol);
		}
		self.dispatch(request).await
	}

	pub async fn delete_session(&self, session_id: &str) -> ResultEnvelope {
		self.dispatch(CommandRequest::new(DELETE_SESSION, Some(session_id), Vec::new())).await
	}

	/// Deletes every matching session; returns how many were removed.
	pub async fn delete_all_sessions(&self, options: DeleteAllOptions) -> usize {
		self.registry.delete_all(options).await
	}

	pub async fn execute_command(&self, command: &str, session_id: Option<&str>, args: Vec<Value>) -> ResultEnvelope {
		self.dispatch(CommandRequest::new(command, session_id, args)).await
	}

	pub async fn get_sessions(&self) -> ResultEnvelope {
		self.dispatch(CommandRequest::new(GET_SESSIONS, None, Vec::new())).await
	}

	pub async fn get_status(&self) -> ResultEnvelope {
		self.dispatch(CommandRequest::new(GET_STATUS, None, Vec::new())).await
	}

	/// Dispatches any command with the server's umbrella commands available.
	pub async fn dispatch(&self, request: CommandRequest<'_>) -> ResultEnvelope {
		self.dispatcher.execute(request, Some(self)).await
	}

	fn status(&self) -> StatusInfo {
		StatusInfo {
			ready: true,
			message: format!(
				"tether is ready with {} driver(s) and {} session(s)",
				self.registry.extensions().drivers().len(),
				self.registry.session_count()
			),
			build: self.build.clone(),
		}
	}

	async fn new_session(&self, ctx: &CommandContext<'_>, args: Vec<Value>) -> Result<Value> {
		let body = args
			.into_iter()
			.next()
			.ok_or_else(|| Error::InvalidArgument("createSession requires a capabilities object".to_string()))?;
		let request = CapabilityRequest::parse(&body)?;

		if self.session_override {
			let removed = self
				.registry
				.delete_all(DeleteAllOptions {
					reason: Some("session override".to_string()),
					..Default::default()
				})
				.await;
			if removed > 0 {
				info!(target = "tether.server", removed, "session override removed existing sessions");
			}
		}

		let session = self.registry.create(request).await?;
		ctx.set_protocol(session.protocol);
		Ok(serde_json::to_value(CreatedSession {
			session_id: session.id,
			capabilities: session.capabilities,
		})?)
	}
}

#[async_trait]
impl ServerCommands for AutomationServer {
	fn handles(&self, command: &str) -> bool {
		SERVER_COMMANDS.contains(&command)
	}

	async fn execute(&self, ctx: &CommandContext<'_>, args: Vec<Value>) -> Result<Value> {
		match ctx.command() {
			CREATE_SESSION => self.new_session(ctx, args).await,
			DELETE_SESSION => {
				let session_id = ctx
					.session_id()
					.ok_or_else(|| Error::InvalidArgument("deleteSession requires a session id".to_string()))?;
				self.registry.delete(session_id).await?;
				Ok(Value::Null)
			}
			GET_SESSIONS => Ok(serde_json::to_value(self.registry.get_sessions())?),
			GET_STATUS => Ok(serde_json::to_value(self.status())?),
			other => Err(Error::UnsupportedCommand {
				command: other.to_string(),
			}),
		}
	}
}

fn infer_protocol(body: &Value) -> Option<Protocol> {
	if body.get("capabilities").is_some() {
		Some(Protocol::W3C)
	} else if body.get("desiredCapabilities").is_some() {
		Some(Protocol::MJSONWP)
	} else {
		None
	}
}
