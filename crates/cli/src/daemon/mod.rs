mod protocol;
mod server;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
pub use protocol::{DaemonRequest, DaemonResponse};
pub use server::{Daemon, handle_request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Returns the default server socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/tether.sock` if available (already user-permissioned),
/// otherwise the system temp directory.
pub fn default_socket_path() -> PathBuf {
	dirs::runtime_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("tether.sock")
}

/// Sends one request to the server at `socket` and waits for its response.
pub async fn send_request(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse> {
	let stream = UnixStream::connect(socket)
		.await
		.with_context(|| format!("Failed to connect to server at {}", socket.display()))?;
	send_request_stream(stream, request).await
}

async fn send_request_stream<S>(mut stream: S, request: &DaemonRequest) -> Result<DaemonResponse>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(request).context("Failed to serialize server request")?;
	stream
		.write_all(format!("{}\n", payload).as_bytes())
		.await
		.context("Failed writing server request")?;
	stream.flush().await.context("Failed flushing server request")?;

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	reader
		.read_line(&mut line)
		.await
		.context("Failed reading server response")?;
	let response = serde_json::from_str(&line).context("Failed parsing server response")?;
	Ok(response)
}
