//! Extensions compiled into the host binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tether::{
	Capabilities, CommandContext, Driver, DriverArgs, DriverData, DriverFactory, ExtensionRegistry, Next, Plugin, PluginArgs,
	PluginFactory, Result,
};
use tracing::info;

pub const ECHO_DRIVER: &str = "echo";
pub const COMMAND_LOG_PLUGIN: &str = "command-log";

/// Registry holding every built-in driver and plugin.
pub fn builtin_extensions() -> Result<ExtensionRegistry> {
	let mut extensions = ExtensionRegistry::new();
	extensions.register_driver(Arc::new(EchoDriverFactory))?;
	extensions.register_plugin(Arc::new(CommandLogFactory))?;
	Ok(extensions)
}

/// Driver answering every command with its own name and arguments.
pub struct EchoDriverFactory;

impl DriverFactory for EchoDriverFactory {
	fn name(&self) -> &str {
		ECHO_DRIVER
	}

	fn automation_name(&self) -> &str {
		"Echo"
	}

	fn version(&self) -> &str {
		env!("CARGO_PKG_VERSION")
	}

	fn create(&self, args: &DriverArgs) -> Arc<dyn Driver> {
		static INSTANCES: AtomicU64 = AtomicU64::new(0);
		Arc::new(EchoDriver {
			instance: INSTANCES.fetch_add(1, Ordering::Relaxed),
			greeting: args.get("greeting").and_then(Value::as_str).map(str::to_string),
		})
	}
}

struct EchoDriver {
	instance: u64,
	greeting: Option<String>,
}

#[async_trait]
impl Driver for EchoDriver {
	async fn create_session(&self, capabilities: &Capabilities, others: &[DriverData]) -> Result<Capabilities> {
		let mut negotiated = capabilities.clone();
		negotiated.insert("echo:instance", self.instance);
		negotiated.insert("echo:siblings", others.len());
		Ok(negotiated)
	}

	async fn delete_session(&self) -> Result<()> {
		Ok(())
	}

	async fn execute_command(&self, command: &str, args: Vec<Value>) -> Result<Value> {
		Ok(json!({
			"command": command,
			"args": args,
			"greeting": self.greeting,
		}))
	}

	fn driver_data(&self) -> DriverData {
		json!({ "instance": self.instance })
	}
}

/// Plugin logging every command it sees, with timing.
pub struct CommandLogFactory;

impl PluginFactory for CommandLogFactory {
	fn name(&self) -> &str {
		COMMAND_LOG_PLUGIN
	}

	fn create(&self, _args: &PluginArgs) -> Arc<dyn Plugin> {
		Arc::new(CommandLog)
	}
}

struct CommandLog;

#[async_trait]
impl Plugin for CommandLog {
	fn name(&self) -> &str {
		COMMAND_LOG_PLUGIN
	}

	async fn handle(&self, ctx: &CommandContext<'_>, next: Next<'_>, args: Vec<Value>) -> Result<Value> {
		let started = std::time::Instant::now();
		let result = next.run(args).await;
		info!(
			target = "tether.plugins",
			command = ctx.command(),
			session_id = ?ctx.session_id(),
			ok = result.is_ok(),
			elapsed_ms = started.elapsed().as_millis() as u64,
			"command"
		);
		result
	}

	fn on_unexpected_shutdown(&self, session_id: &str, reason: &str) {
		info!(target = "tether.plugins", session_id, reason, "session ended unexpectedly");
	}
}

#[cfg(test)]
mod tests {
	use tether::{AutomationServer, ServerConfig};

	use super::*;

	#[tokio::test]
	async fn echo_session_round_trip() {
		let config = ServerConfig {
			plugins: vec![COMMAND_LOG_PLUGIN.to_string()],
			..Default::default()
		};
		let server = AutomationServer::from_config(&config, builtin_extensions().unwrap()).unwrap();

		let created = server
			.create_session(json!({
				"capabilities": {"alwaysMatch": {"platformName": "Linux", "appium:automationName": "Echo"}}
			}))
			.await
			.into_result()
			.unwrap();
		let id = created["sessionId"].as_str().unwrap();
		assert_eq!(created["capabilities"]["echo:siblings"], 0);

		let value = server
			.execute_command("getTitle", Some(id), vec![json!("x")])
			.await
			.into_result()
			.unwrap();
		assert_eq!(value["command"], "getTitle");
		assert_eq!(value["args"], json!(["x"]));

		assert!(server.delete_session(id).await.is_ok());
	}
}
