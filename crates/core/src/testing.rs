//! Test doubles for drivers and plugins.
//!
//! Every double appends to a shared [`Journal`] so tests can assert the exact
//! order in which plugins, drivers and proxies were reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tether_protocol::{Capabilities, Protocol};
use tokio::sync::Barrier;

use crate::dispatch::{CommandContext, Next};
use crate::driver::{Driver, DriverArgs, DriverData, DriverFactory, ShutdownNotifier, ShutdownSignal};
use crate::error::{Error, Result};
use crate::plugin::{CommandFilter, Plugin, PluginArgs, PluginFactory};

/// Shared, ordered record of calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&self, entry: impl Into<String>) {
		self.0.lock().push(entry.into());
	}

	pub fn entries(&self) -> Vec<String> {
		self.0.lock().clone()
	}

	pub fn contains(&self, entry: &str) -> bool {
		self.0.lock().iter().any(|e| e == entry)
	}

	pub fn clear(&self) {
		self.0.lock().clear();
	}
}

#[derive(Clone, Default)]
struct MockBehavior {
	fail_negotiation: Option<String>,
	fail_teardown: Option<String>,
	refuse_when_shared: bool,
	supported: Option<Vec<String>>,
	failing_commands: Vec<String>,
	proxy: Option<Vec<String>>,
	proxy_hook: bool,
	protocol: Option<Protocol>,
	shutdown_signal: bool,
	barrier: Option<Arc<Barrier>>,
}

/// Factory for [`MockDriver`]s; keeps every instance it creates.
pub struct MockDriverFactory {
	name: String,
	automation: String,
	platforms: Vec<String>,
	behavior: MockBehavior,
	journal: Journal,
	created: Mutex<Vec<Arc<MockDriver>>>,
}

impl MockDriverFactory {
	pub fn new(name: impl Into<String>, automation: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			automation: automation.into(),
			platforms: Vec::new(),
			behavior: MockBehavior::default(),
			journal: Journal::new(),
			created: Mutex::new(Vec::new()),
		}
	}

	pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.platforms = platforms.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_journal(mut self, journal: Journal) -> Self {
		self.journal = journal;
		self
	}

	/// Every negotiation fails with `message`.
	pub fn failing(mut self, message: impl Into<String>) -> Self {
		self.behavior.fail_negotiation = Some(message.into());
		self
	}

	/// Every teardown fails with `message`.
	pub fn failing_teardown(mut self, message: impl Into<String>) -> Self {
		self.behavior.fail_teardown = Some(message.into());
		self
	}

	/// Negotiation fails when another session or pending driver of this type exists.
	pub fn refusing_shared(mut self) -> Self {
		self.behavior.refuse_when_shared = true;
		self
	}

	/// Restricts the in-process command set.
	pub fn supporting<I, S>(mut self, commands: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.behavior.supported = Some(commands.into_iter().map(Into::into).collect());
		self
	}

	pub fn failing_command(mut self, command: impl Into<String>) -> Self {
		self.behavior.failing_commands.push(command.into());
		self
	}

	/// Activates a proxy that accepts `commands` and implements the proxy hook.
	pub fn with_proxy<I, S>(mut self, commands: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.behavior.proxy = Some(commands.into_iter().map(Into::into).collect());
		self.behavior.proxy_hook = true;
		self
	}

	/// Keeps the proxy active but drops the proxy hook.
	pub fn without_proxy_hook(mut self) -> Self {
		self.behavior.proxy_hook = false;
		self
	}

	pub fn with_protocol(mut self, protocol: Protocol) -> Self {
		self.behavior.protocol = Some(protocol);
		self
	}

	/// Drivers expose a shutdown signal, fired through [`MockDriver::shut_down`].
	pub fn with_shutdown_signal(mut self) -> Self {
		self.behavior.shutdown_signal = true;
		self
	}

	/// Negotiation waits on `barrier` before answering.
	pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
		self.behavior.barrier = Some(barrier);
		self
	}

	pub fn journal(&self) -> Journal {
		self.journal.clone()
	}

	/// Drivers created so far, oldest first.
	pub fn created(&self) -> Vec<Arc<MockDriver>> {
		self.created.lock().clone()
	}
}

impl DriverFactory for MockDriverFactory {
	fn name(&self) -> &str {
		&self.name
	}

	fn automation_name(&self) -> &str {
		&self.automation
	}

	fn platform_names(&self) -> &[String] {
		&self.platforms
	}

	fn version(&self) -> &str {
		"1.0.0-mock"
	}

	fn create(&self, args: &DriverArgs) -> Arc<dyn Driver> {
		let mut created = self.created.lock();
		let driver = Arc::new(MockDriver {
			name: self.name.clone(),
			instance: created.len(),
			args: args.clone(),
			behavior: self.behavior.clone(),
			journal: self.journal.clone(),
			notifier: ShutdownNotifier::new(),
			commands: AtomicUsize::new(0),
		});
		created.push(Arc::clone(&driver));
		driver
	}
}

pub struct MockDriver {
	name: String,
	instance: usize,
	args: DriverArgs,
	behavior: MockBehavior,
	journal: Journal,
	notifier: ShutdownNotifier,
	commands: AtomicUsize,
}

impl MockDriver {
	pub fn args(&self) -> &DriverArgs {
		&self.args
	}

	/// Number of commands executed in-process.
	pub fn command_count(&self) -> usize {
		self.commands.load(Ordering::SeqCst)
	}

	/// Simulates the device going away.
	pub fn shut_down(&self, reason: impl Into<String>) {
		self.notifier.notify(reason);
	}
}

#[async_trait]
impl Driver for MockDriver {
	async fn create_session(&self, capabilities: &Capabilities, others: &[DriverData]) -> Result<Capabilities> {
		self.journal.push(format!("negotiate:{}", self.name));
		if let Some(barrier) = &self.behavior.barrier {
			barrier.wait().await;
		}
		if let Some(message) = &self.behavior.fail_negotiation {
			return Err(Error::command("session not created", message.clone()));
		}
		if self.behavior.refuse_when_shared && !others.is_empty() {
			return Err(Error::command("session not created", format!("{} is already in use", self.name)));
		}
		Ok(capabilities.clone().with("mock:instance", self.instance))
	}

	async fn delete_session(&self) -> Result<()> {
		self.journal.push(format!("teardown:{}", self.name));
		match &self.behavior.fail_teardown {
			Some(message) => Err(Error::command("unknown error", message.clone())),
			None => Ok(()),
		}
	}

	async fn execute_command(&self, command: &str, args: Vec<Value>) -> Result<Value> {
		self.journal.push(format!("driver:{command}"));
		self.commands.fetch_add(1, Ordering::SeqCst);
		if self.behavior.failing_commands.iter().any(|c| c == command) {
			return Err(Error::command("unknown error", format!("{command} failed")));
		}
		Ok(json!({ "driver": self.name, "command": command, "args": args }))
	}

	fn supports_command(&self, command: &str) -> bool {
		self.behavior
			.supported
			.as_ref()
			.is_none_or(|supported| supported.iter().any(|c| c == command))
	}

	async fn proxy_command(&self, command: &str, args: Vec<Value>) -> Result<Value> {
		if !self.behavior.proxy_hook {
			return Err(Error::NoProxyCommand {
				command: command.to_string(),
			});
		}
		self.journal.push(format!("proxy:{command}"));
		Ok(json!({ "proxied": command, "args": args }))
	}

	fn proxy_active(&self) -> bool {
		self.behavior.proxy.is_some()
	}

	fn can_proxy(&self, command: &str) -> bool {
		self.behavior
			.proxy
			.as_ref()
			.is_some_and(|commands| commands.iter().any(|c| c == command))
	}

	fn driver_data(&self) -> DriverData {
		json!({ "driver": self.name, "instance": self.instance })
	}

	fn protocol(&self) -> Option<Protocol> {
		self.behavior.protocol
	}

	fn shutdown_signal(&self) -> Option<ShutdownSignal> {
		self.behavior.shutdown_signal.then(|| self.notifier.subscribe())
	}
}

#[derive(Clone)]
enum PluginMode {
	Wrap,
	Override(Value),
	Fail(String),
}

/// Plugin double that journals `plugin:<name>:<command>` on entry.
pub struct RecordingPlugin {
	name: String,
	filter: CommandFilter,
	mode: PluginMode,
	protocol: Option<Protocol>,
	journal: Journal,
}

impl RecordingPlugin {
	pub fn factory(name: impl Into<String>) -> RecordingPluginFactory {
		RecordingPluginFactory {
			name: name.into(),
			filter: CommandFilter::All,
			mode: PluginMode::Wrap,
			protocol: None,
			journal: Journal::new(),
			created: Mutex::new(Vec::new()),
		}
	}
}

#[async_trait]
impl Plugin for RecordingPlugin {
	fn name(&self) -> &str {
		&self.name
	}

	fn commands(&self) -> CommandFilter {
		self.filter.clone()
	}

	async fn handle(&self, ctx: &CommandContext<'_>, next: Next<'_>, args: Vec<Value>) -> Result<Value> {
		self.journal.push(format!("plugin:{}:{}", self.name, ctx.command()));
		if let Some(protocol) = self.protocol {
			ctx.set_protocol(protocol);
		}
		match &self.mode {
			PluginMode::Wrap => {
				let value = next.run(args).await?;
				self.journal.push(format!("after:{}:{}", self.name, ctx.command()));
				Ok(value)
			}
			PluginMode::Override(value) => Ok(value.clone()),
			PluginMode::Fail(message) => Err(Error::command("unknown error", message.clone())),
		}
	}

	fn on_unexpected_shutdown(&self, session_id: &str, reason: &str) {
		self.journal.push(format!("shutdown:{}:{session_id}:{reason}", self.name));
	}
}

pub struct RecordingPluginFactory {
	name: String,
	filter: CommandFilter,
	mode: PluginMode,
	protocol: Option<Protocol>,
	journal: Journal,
	created: Mutex<Vec<PluginArgs>>,
}

impl RecordingPluginFactory {
	/// Handles only the listed commands.
	pub fn handling<I, S>(mut self, commands: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.filter = CommandFilter::only(commands);
		self
	}

	pub fn with_filter(mut self, filter: CommandFilter) -> Self {
		self.filter = filter;
		self
	}

	/// Returns `value` without calling the rest of the chain.
	pub fn overriding(mut self, value: Value) -> Self {
		self.mode = PluginMode::Override(value);
		self
	}

	pub fn failing(mut self, message: impl Into<String>) -> Self {
		self.mode = PluginMode::Fail(message.into());
		self
	}

	/// Sets the dispatch protocol marker on entry.
	pub fn with_protocol(mut self, protocol: Protocol) -> Self {
		self.protocol = Some(protocol);
		self
	}

	pub fn with_journal(mut self, journal: Journal) -> Self {
		self.journal = journal;
		self
	}

	pub fn journal(&self) -> Journal {
		self.journal.clone()
	}

	/// Arguments of every instance created so far.
	pub fn created_args(&self) -> Vec<PluginArgs> {
		self.created.lock().clone()
	}
}

impl PluginFactory for RecordingPluginFactory {
	fn name(&self) -> &str {
		&self.name
	}

	fn create(&self, args: &PluginArgs) -> Arc<dyn Plugin> {
		self.created.lock().push(args.clone());
		Arc::new(RecordingPlugin {
			name: self.name.clone(),
			filter: self.filter.clone(),
			mode: self.mode.clone(),
			protocol: self.protocol,
			journal: self.journal.clone(),
		})
	}
}
