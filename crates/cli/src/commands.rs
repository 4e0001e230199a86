//! Subcommand implementations.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tether::{AutomationServer, ServerConfig, WireEnvelope};
use tracing::info;

use crate::builtin::builtin_extensions;
use crate::cli::{Cli, Commands, ServeArgs};
use crate::daemon::{Daemon, DaemonRequest, DaemonResponse, default_socket_path, send_request};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let socket = cli.socket.unwrap_or_else(default_socket_path);
	match cli.command {
		Commands::Serve(args) => serve(args, socket).await,
		Commands::Status => print_envelope(request(&socket, DaemonRequest::Status).await?),
		Commands::Sessions => print_envelope(request(&socket, DaemonRequest::GetSessions).await?),
		Commands::DeleteSessions { driver } => {
			match request(&socket, DaemonRequest::DeleteAllSessions { driver, force: false }).await? {
				DaemonResponse::Deleted { count } => println!("deleted {count} session(s)"),
				other => bail!("unexpected server response: {other:?}"),
			}
			Ok(())
		}
		Commands::Shutdown => {
			request(&socket, DaemonRequest::Shutdown).await?;
			Ok(())
		}
	}
}

/// Merges the config file with command-line overrides.
pub fn load_config(args: &ServeArgs) -> Result<ServerConfig> {
	let mut config = match &args.config {
		Some(path) => {
			ServerConfig::load(path).with_context(|| format!("Failed to load config: {}", path.display()))?
		}
		None => ServerConfig::default(),
	};
	if !args.plugins.is_empty() {
		config.plugins = args.plugins.clone();
	}
	if args.session_override {
		config.session_override = true;
	}
	Ok(config)
}

async fn serve(args: ServeArgs, socket: PathBuf) -> Result<()> {
	let config = load_config(&args)?;
	let server = AutomationServer::from_config(&config, builtin_extensions()?).context("Failed to configure server")?;
	info!(
		target = "tether.server",
		plugins = ?config.plugins,
		session_override = config.session_override,
		"starting server"
	);
	Daemon::bind(server, &socket)?.run().await
}

async fn request(socket: &std::path::Path, request: DaemonRequest) -> Result<DaemonResponse> {
	match send_request(socket, &request).await? {
		DaemonResponse::Error { code, message } => bail!("server error {code}: {message}"),
		response => Ok(response),
	}
}

fn print_envelope(response: DaemonResponse) -> Result<()> {
	let value = match response {
		DaemonResponse::Result { envelope } => unwrap_envelope(envelope)?,
		other => bail!("unexpected server response: {other:?}"),
	};
	println!("{}", serde_json::to_string_pretty(&value)?);
	Ok(())
}

fn unwrap_envelope(envelope: WireEnvelope) -> Result<Value> {
	envelope
		.into_result()
		.map_err(|error| anyhow::anyhow!("{}: {}", error.error, error.message))
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn cli_flags_override_config_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"plugins": ["from-file"], "session_override": false}}"#).unwrap();

		let args = ServeArgs {
			config: Some(file.path().to_path_buf()),
			plugins: vec!["command-log".to_string()],
			session_override: true,
		};
		let config = load_config(&args).unwrap();
		assert_eq!(config.plugins, vec!["command-log"]);
		assert!(config.session_override);
	}

	#[test]
	fn missing_config_file_is_reported() {
		let args = ServeArgs {
			config: Some(PathBuf::from("/nonexistent/tether.json")),
			..Default::default()
		};
		let err = load_config(&args).unwrap_err();
		assert!(err.to_string().contains("Failed to load config"));
	}
}
