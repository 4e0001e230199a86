//! Chain-of-responsibility execution.
//!
//! A [`Chain`] is the resolved plugin slice plus a terminal link. Link `i` is
//! plugin `i`; index `plugins.len()` is the terminal. [`Next`] carries the
//! index of the following link and is consumed by [`Next::run`], so a plugin
//! can continue the chain at most once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tether_protocol::Protocol;

use super::report::{HandlerReport, Link};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::plugin::Plugin;

type LinkFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Commands the server answers itself at the end of a chain.
#[async_trait::async_trait]
pub trait ServerCommands: Send + Sync {
	fn handles(&self, command: &str) -> bool;

	async fn execute(&self, ctx: &CommandContext<'_>, args: Vec<Value>) -> Result<Value>;
}

/// What runs after the last plugin.
pub enum Terminal<'a> {
	Driver(&'a Arc<dyn Driver>),
	Proxy(&'a Arc<dyn Driver>),
	Server(&'a dyn ServerCommands),
	/// Sessionless command nobody implements.
	Unsupported,
}

impl Terminal<'_> {
	async fn run(&self, ctx: &CommandContext<'_>, args: Vec<Value>) -> Result<Value> {
		let command = ctx.command();
		match self {
			Terminal::Driver(driver) => {
				if !driver.supports_command(command) {
					return Err(Error::UnsupportedCommand {
						command: command.to_string(),
					});
				}
				let result = driver.execute_command(command, args).await;
				if let Some(protocol) = driver.protocol() {
					ctx.set_protocol(protocol);
				}
				result
			}
			Terminal::Proxy(driver) => driver.proxy_command(command, args).await,
			Terminal::Server(server) => server.execute(ctx, args).await,
			Terminal::Unsupported => Err(Error::UnsupportedCommand {
				command: command.to_string(),
			}),
		}
	}
}

/// Read-mostly view of the command being dispatched.
pub struct CommandContext<'a> {
	command: &'a str,
	session_id: Option<&'a str>,
	driver: Option<&'a Arc<dyn Driver>>,
	protocol: Mutex<Protocol>,
}

impl<'a> CommandContext<'a> {
	pub fn new(command: &'a str, session_id: Option<&'a str>, driver: Option<&'a Arc<dyn Driver>>, protocol: Protocol) -> Self {
		Self {
			command,
			session_id,
			driver,
			protocol: Mutex::new(protocol),
		}
	}

	pub fn command(&self) -> &str {
		self.command
	}

	/// `None` for sessionless commands.
	pub fn session_id(&self) -> Option<&str> {
		self.session_id
	}

	pub fn driver(&self) -> Option<&Arc<dyn Driver>> {
		self.driver
	}

	/// Protocol marker the response will be encoded with.
	pub fn protocol(&self) -> Protocol {
		*self.protocol.lock()
	}

	/// Overrides the protocol marker; the last writer wins.
	pub fn set_protocol(&self, protocol: Protocol) {
		*self.protocol.lock() = protocol;
	}

	/// Whether the session's driver would proxy this command.
	pub fn can_proxy(&self) -> bool {
		self.driver
			.is_some_and(|driver| driver.proxy_active() && driver.can_proxy(self.command))
	}

	/// Forwards the command to the driver's proxy, bypassing the terminal link.
	pub async fn proxy(&self, args: Vec<Value>) -> Result<Value> {
		match self.driver {
			Some(driver) => driver.proxy_command(self.command, args).await,
			None => Err(Error::NoProxyCommand {
				command: self.command.to_string(),
			}),
		}
	}
}

pub(crate) struct Chain<'a> {
	plugins: &'a [Arc<dyn Plugin>],
	terminal: Terminal<'a>,
	ctx: CommandContext<'a>,
	report: Mutex<HandlerReport>,
}

impl<'a> Chain<'a> {
	pub(crate) fn new(plugins: &'a [Arc<dyn Plugin>], terminal: Terminal<'a>, ctx: CommandContext<'a>, report: HandlerReport) -> Self {
		Self {
			plugins,
			terminal,
			ctx,
			report: Mutex::new(report),
		}
	}

	pub(crate) async fn run(&self, args: Vec<Value>) -> Result<Value> {
		self.invoke(0, args).await
	}

	pub(crate) fn protocol(&self) -> Protocol {
		self.ctx.protocol()
	}

	pub(crate) fn into_report(self) -> HandlerReport {
		self.report.into_inner()
	}

	fn invoke<'s>(&'s self, index: usize, args: Vec<Value>) -> LinkFuture<'s> {
		Box::pin(async move {
			let (link, result) = match self.plugins.get(index) {
				Some(plugin) => {
					self.report.lock().enter(index);
					let next = Next { chain: self, index: index + 1 };
					(Link::Plugin(index), plugin.handle(&self.ctx, next, args).await)
				}
				None => {
					self.report.lock().enter_terminal();
					(Link::Terminal, self.terminal.run(&self.ctx, args).await)
				}
			};
			self.report.lock().settle(link, result.is_ok());
			result
		})
	}
}

/// Continuation handed to each plugin.
pub struct Next<'a> {
	chain: &'a Chain<'a>,
	index: usize,
}

impl Next<'_> {
	/// Runs the rest of the chain with `args`.
	pub async fn run(self, args: Vec<Value>) -> Result<Value> {
		self.chain.invoke(self.index, args).await
	}

	/// Whether any plugin remains before the terminal link.
	pub fn has_plugins(&self) -> bool {
		self.index < self.chain.plugins.len()
	}
}
