//! Per-dispatch record of which chain links ran.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::plugin::Plugin;

/// Where a command ends up after the plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
	/// In-process driver call.
	Driver,
	/// Driver's own backing transport.
	Proxy,
	/// Server-level command.
	Server,
	/// No session and no server handler.
	Unsupported,
}

impl Target {
	pub fn as_str(self) -> &'static str {
		match self {
			Target::Driver => "driver",
			Target::Proxy => "proxy",
			Target::Server => "server",
			Target::Unsupported => "unsupported",
		}
	}
}

/// A link of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
	Plugin(usize),
	Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRun {
	pub name: String,
	pub entered: bool,
}

#[derive(Debug, Clone)]
pub struct HandlerReport {
	command: String,
	session_id: Option<String>,
	target: Target,
	plugins: Vec<PluginRun>,
	terminal_ran: bool,
	failed_at: Option<Link>,
}

impl HandlerReport {
	pub fn new(command: &str, session_id: Option<&str>, plugins: &[Arc<dyn Plugin>], target: Target) -> Self {
		Self {
			command: command.to_string(),
			session_id: session_id.map(str::to_string),
			target,
			plugins: plugins
				.iter()
				.map(|plugin| PluginRun {
					name: plugin.name().to_string(),
					entered: false,
				})
				.collect(),
			terminal_ran: false,
			failed_at: None,
		}
	}

	pub(crate) fn enter(&mut self, index: usize) {
		if let Some(run) = self.plugins.get_mut(index) {
			run.entered = true;
		}
	}

	pub(crate) fn enter_terminal(&mut self) {
		self.terminal_ran = true;
	}

	/// Records a link's outcome. The innermost failure is kept while the error
	/// propagates; a link that recovers clears it.
	pub(crate) fn settle(&mut self, link: Link, ok: bool) {
		if ok {
			self.failed_at = None;
		} else if self.failed_at.is_none() {
			self.failed_at = Some(link);
		}
	}

	pub fn command(&self) -> &str {
		&self.command
	}

	pub fn target(&self) -> Target {
		self.target
	}

	pub fn plugins(&self) -> &[PluginRun] {
		&self.plugins
	}

	/// Names of plugins that handled the command, in chain order.
	pub fn entered(&self) -> Vec<&str> {
		self.plugins.iter().filter(|p| p.entered).map(|p| p.name.as_str()).collect()
	}

	/// Assigned plugins that never ran because an earlier link returned.
	pub fn skipped(&self) -> Vec<&str> {
		self.plugins.iter().filter(|p| !p.entered).map(|p| p.name.as_str()).collect()
	}

	pub fn terminal_ran(&self) -> bool {
		self.terminal_ran
	}

	pub fn failed_at(&self) -> Option<Link> {
		self.failed_at
	}

	/// Name of the link that produced the error, if any.
	pub fn failed_link(&self) -> Option<&str> {
		match self.failed_at? {
			Link::Plugin(index) => self.plugins.get(index).map(|p| p.name.as_str()),
			Link::Terminal => Some(self.target.as_str()),
		}
	}

	pub fn log(&self) {
		let skipped = self.skipped();
		if !skipped.is_empty() {
			warn!(
				target = "tether.dispatch",
				command = %self.command,
				session_id = ?self.session_id,
				?skipped,
				"command was not handled by every plugin registered for it"
			);
		}
		debug!(
			target = "tether.dispatch",
			command = %self.command,
			session_id = ?self.session_id,
			target_link = self.target.as_str(),
			plugins = ?self.entered(),
			terminal_ran = self.terminal_ran,
			failed_at = ?self.failed_link(),
			"dispatch finished"
		);
	}
}
