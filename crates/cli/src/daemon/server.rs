use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tether::{AutomationServer, DeleteAllOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{DaemonRequest, DaemonResponse};

pub struct Daemon {
	server: Arc<AutomationServer>,
	socket_path: PathBuf,
	listener: UnixListener,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
	/// Binds the server socket, replacing a stale socket file.
	pub fn bind(server: AutomationServer, socket_path: &Path) -> Result<Self> {
		if socket_path.exists() {
			std::fs::remove_file(socket_path)
				.with_context(|| format!("Failed to remove existing socket: {}", socket_path.display()))?;
		}
		if let Some(parent) = socket_path.parent() {
			if !parent.exists() {
				std::fs::create_dir_all(parent)
					.with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
			}
		}
		let listener = UnixListener::bind(socket_path)
			.with_context(|| format!("Failed to bind server socket: {}", socket_path.display()))?;
		info!(target = "tether.daemon", socket = %socket_path.display(), "server listening");

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Ok(Self {
			server: Arc::new(server),
			socket_path: socket_path.to_path_buf(),
			listener,
			shutdown_tx,
			shutdown_rx,
		})
	}

	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	/// Serves connections until a shutdown request or SIGINT/SIGTERM, then
	/// deletes every session.
	pub async fn run(mut self) -> Result<()> {
		use tokio::signal::unix::{SignalKind, signal};

		let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
		let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

		loop {
			tokio::select! {
				_ = self.shutdown_rx.changed() => {
					if *self.shutdown_rx.borrow() {
						info!(target = "tether.daemon", "shutdown requested via message");
						break;
					}
				}
				_ = sigterm.recv() => {
					info!(target = "tether.daemon", "received SIGTERM, shutting down");
					break;
				}
				_ = sigint.recv() => {
					info!(target = "tether.daemon", "received SIGINT, shutting down");
					break;
				}
				accept = self.listener.accept() => {
					let (stream, _) = accept.context("Server accept failed")?;
					let server = Arc::clone(&self.server);
					let shutdown_tx = self.shutdown_tx.clone();
					tokio::spawn(async move {
						if let Err(err) = handle_client(stream, server, shutdown_tx).await {
							warn!(target = "tether.daemon", error = %err, "server connection error");
						}
					});
				}
			}
		}

		let removed = self.server.delete_all_sessions(DeleteAllOptions::default()).await;
		info!(target = "tether.daemon", removed, "sessions cleaned up");
		if let Err(err) = std::fs::remove_file(&self.socket_path) {
			debug!(target = "tether.daemon", error = %err, "failed to remove socket file");
		}
		Ok(())
	}
}

async fn handle_client<S>(stream: S, server: Arc<AutomationServer>, shutdown_tx: watch::Sender<bool>) -> Result<()>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let (read_half, mut write_half) = tokio::io::split(stream);
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		let bytes = reader
			.read_line(&mut line)
			.await
			.context("Failed reading server request")?;
		if bytes == 0 {
			break;
		}

		let request = match serde_json::from_str::<DaemonRequest>(line.trim_end()) {
			Ok(req) => req,
			Err(err) => {
				let response = DaemonResponse::Error {
					code: "invalid_request".to_string(),
					message: err.to_string(),
				};
				write_response(&mut write_half, &response).await?;
				continue;
			}
		};

		let response = handle_request(&server, &shutdown_tx, request).await;
		write_response(&mut write_half, &response).await?;
	}

	Ok(())
}

async fn write_response<W>(writer: &mut W, response: &DaemonResponse) -> Result<()>
where
	W: tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(response).context("Failed to serialize response")?;
	writer
		.write_all(format!("{}\n", payload).as_bytes())
		.await
		.context("Failed writing server response")?;
	writer.flush().await.context("Failed flushing server response")?;
	Ok(())
}

/// Maps one request onto the server API.
pub async fn handle_request(
	server: &AutomationServer,
	shutdown_tx: &watch::Sender<bool>,
	request: DaemonRequest,
) -> DaemonResponse {
	let envelope = match request {
		DaemonRequest::CreateSession { capabilities } => server.create_session(capabilities).await,
		DaemonRequest::DeleteSession { session_id } => server.delete_session(&session_id).await,
		DaemonRequest::DeleteAllSessions { driver, force } => {
			let count = server
				.delete_all_sessions(DeleteAllOptions {
					driver,
					force,
					reason: force.then(|| "deleted by client".to_string()),
				})
				.await;
			return DaemonResponse::Deleted { count };
		}
		DaemonRequest::Execute {
			command,
			session_id,
			args,
		} => server.execute_command(&command, session_id.as_deref(), args).await,
		DaemonRequest::GetSessions => server.get_sessions().await,
		DaemonRequest::Status => server.get_status().await,
		DaemonRequest::Shutdown => {
			let _ = shutdown_tx.send(true);
			return DaemonResponse::Ok;
		}
	};
	DaemonResponse::Result {
		envelope: envelope.into_wire(),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tether::ServerConfig;

	use super::*;
	use crate::builtin::builtin_extensions;

	fn server() -> AutomationServer {
		AutomationServer::from_config(&ServerConfig::default(), builtin_extensions().unwrap()).unwrap()
	}

	fn envelope(response: DaemonResponse) -> tether::WireEnvelope {
		match response {
			DaemonResponse::Result { envelope } => envelope,
			other => panic!("unexpected response: {other:?}"),
		}
	}

	#[tokio::test]
	async fn session_requests_map_onto_the_server() {
		let server = server();
		let (tx, _rx) = watch::channel(false);

		let created = envelope(
			handle_request(
				&server,
				&tx,
				DaemonRequest::CreateSession {
					capabilities: json!({"capabilities": {"alwaysMatch": {"platformName": "Linux", "appium:automationName": "Echo"}}}),
				},
			)
			.await,
		);
		let id = created.value()["sessionId"].as_str().unwrap().to_string();

		let executed = envelope(
			handle_request(
				&server,
				&tx,
				DaemonRequest::Execute {
					command: "getTitle".to_string(),
					session_id: Some(id.clone()),
					args: vec![],
				},
			)
			.await,
		);
		assert_eq!(executed.value()["command"], "getTitle");

		let listed = envelope(handle_request(&server, &tx, DaemonRequest::GetSessions).await);
		assert_eq!(listed.value()[0]["id"], id.as_str());

		let deleted = handle_request(
			&server,
			&tx,
			DaemonRequest::DeleteAllSessions {
				driver: None,
				force: false,
			},
		)
		.await;
		assert_eq!(deleted, DaemonResponse::Deleted { count: 1 });
	}

	#[tokio::test]
	async fn errors_are_returned_as_envelopes() {
		let server = server();
		let (tx, _rx) = watch::channel(false);

		let missing = envelope(
			handle_request(
				&server,
				&tx,
				DaemonRequest::DeleteSession {
					session_id: "missing".to_string(),
				},
			)
			.await,
		);
		assert_eq!(missing.error().unwrap().error, "invalid session id");
	}

	#[tokio::test]
	async fn shutdown_request_signals_the_loop() {
		let server = server();
		let (tx, rx) = watch::channel(false);

		assert_eq!(handle_request(&server, &tx, DaemonRequest::Shutdown).await, DaemonResponse::Ok);
		assert!(*rx.borrow());
	}
}
