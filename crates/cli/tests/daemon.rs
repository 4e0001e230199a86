use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tether::{AutomationServer, ServerConfig};
use tether_cli::builtin::{COMMAND_LOG_PLUGIN, builtin_extensions};
use tether_cli::daemon::{Daemon, DaemonRequest, DaemonResponse, send_request};

fn echo_capabilities() -> Value {
	json!({
		"capabilities": {
			"alwaysMatch": {"platformName": "Linux", "appium:automationName": "Echo"}
		}
	})
}

async fn value_of(socket: &Path, request: DaemonRequest) -> Value {
	match send_request(socket, &request).await.unwrap() {
		DaemonResponse::Result { envelope } => envelope.into_result().unwrap(),
		other => panic!("unexpected response: {other:?}"),
	}
}

async fn wait_for_socket(socket: &Path) {
	tokio::time::timeout(Duration::from_secs(10), async {
		while !socket.exists() {
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	})
	.await
	.expect("server socket never appeared");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_process_daemon_serves_session_lifecycle() {
	let tmp = TempDir::new().unwrap();
	let socket = tmp.path().join("tether.sock");
	let config = ServerConfig {
		plugins: vec![COMMAND_LOG_PLUGIN.to_string()],
		..Default::default()
	};
	let server = AutomationServer::from_config(&config, builtin_extensions().unwrap()).unwrap();
	let daemon = Daemon::bind(server, &socket).unwrap();
	let running = tokio::spawn(daemon.run());

	let created = value_of(
		&socket,
		DaemonRequest::CreateSession {
			capabilities: echo_capabilities(),
		},
	)
	.await;
	let id = created["sessionId"].as_str().unwrap().to_string();

	let executed = value_of(
		&socket,
		DaemonRequest::Execute {
			command: "findElement".to_string(),
			session_id: Some(id.clone()),
			args: vec![json!("css selector"), json!("#login")],
		},
	)
	.await;
	assert_eq!(executed["command"], "findElement");
	assert_eq!(executed["args"][1], "#login");

	let status = value_of(&socket, DaemonRequest::Status).await;
	assert_eq!(status["ready"], true);

	let sessions = value_of(&socket, DaemonRequest::GetSessions).await;
	assert_eq!(sessions.as_array().unwrap().len(), 1);

	let deleted = value_of(&socket, DaemonRequest::DeleteSession { session_id: id.clone() }).await;
	assert_eq!(deleted, Value::Null);

	let response = send_request(&socket, &DaemonRequest::DeleteSession { session_id: id }).await.unwrap();
	match response {
		DaemonResponse::Result { envelope } => assert_eq!(envelope.error().unwrap().error, "invalid session id"),
		other => panic!("unexpected response: {other:?}"),
	}

	assert_eq!(
		send_request(&socket, &DaemonRequest::Shutdown).await.unwrap(),
		DaemonResponse::Ok
	);
	tokio::time::timeout(Duration::from_secs(5), running)
		.await
		.expect("server did not stop")
		.unwrap()
		.unwrap();
	assert!(!socket.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binary_serves_and_answers_client_commands() {
	let tmp = TempDir::new().unwrap();
	let socket = tmp.path().join("tether.sock");
	let socket_arg = socket.to_str().unwrap();

	let mut serve = tokio::process::Command::new(env!("CARGO_BIN_EXE_tether"))
		.args(["--socket", socket_arg, "serve", "--plugin", COMMAND_LOG_PLUGIN])
		.kill_on_drop(true)
		.spawn()
		.expect("failed to start tether serve");
	wait_for_socket(&socket).await;

	value_of(
		&socket,
		DaemonRequest::CreateSession {
			capabilities: echo_capabilities(),
		},
	)
	.await;

	let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_tether"))
		.args(["--socket", socket_arg, "sessions"])
		.output()
		.await
		.unwrap();
	assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
	let sessions: Value = serde_json::from_slice(&output.stdout).unwrap();
	assert_eq!(sessions[0]["capabilities"]["automationName"], "Echo");

	let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_tether"))
		.args(["--socket", socket_arg, "shutdown"])
		.output()
		.await
		.unwrap();
	assert!(output.status.success());

	let status = tokio::time::timeout(Duration::from_secs(10), serve.wait())
		.await
		.expect("server did not exit")
		.unwrap();
	assert!(status.success());
}

#[tokio::test]
async fn client_reports_missing_server() {
	let tmp = TempDir::new().unwrap();
	let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_tether"))
		.args(["--socket", tmp.path().join("absent.sock").to_str().unwrap(), "status"])
		.output()
		.await
		.unwrap();

	assert!(!output.status.success());
	assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to connect"));
}
