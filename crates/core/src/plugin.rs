//! Plugin capability interface.
//!
//! Plugins intercept commands on their way to a driver. Each plugin declares
//! which commands it handles through [`Plugin::commands`]; for those commands
//! its [`Plugin::handle`] becomes one link of the dispatch chain and decides
//! whether to call [`Next::run`] (wrap) or return on its own (override).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::dispatch::{CommandContext, Next};
use crate::error::Result;

/// Per-plugin arguments from the server configuration.
pub type PluginArgs = Map<String, Value>;

/// Commands a plugin intercepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFilter {
	All,
	Only(Vec<String>),
	None,
}

impl CommandFilter {
	/// Filter for an explicit list of command names.
	pub fn only<I, S>(commands: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		CommandFilter::Only(commands.into_iter().map(Into::into).collect())
	}

	pub fn matches(&self, command: &str) -> bool {
		match self {
			CommandFilter::All => true,
			CommandFilter::Only(commands) => commands.iter().any(|c| c == command),
			CommandFilter::None => false,
		}
	}
}

/// A stateful interceptor bound to one session or to the sessionless pool.
#[async_trait]
pub trait Plugin: Send + Sync {
	/// Plugin name as registered in the extension registry.
	fn name(&self) -> &str;

	fn commands(&self) -> CommandFilter {
		CommandFilter::All
	}

	/// Handles `ctx.command()`. Call `next.run(args)` at most once to continue
	/// the chain.
	async fn handle(&self, ctx: &CommandContext<'_>, next: Next<'_>, args: Vec<Value>) -> Result<Value>;

	/// Called for session-scoped instances when their driver shuts down on its own.
	fn on_unexpected_shutdown(&self, _session_id: &str, _reason: &str) {}
}

/// Constructs [`Plugin`] instances; one factory per plugin type.
pub trait PluginFactory: Send + Sync {
	fn name(&self) -> &str;

	fn create(&self, args: &PluginArgs) -> Arc<dyn Plugin>;
}
