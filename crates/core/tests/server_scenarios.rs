//! End-to-end scenarios through the public server API.

use std::sync::Arc;

use serde_json::{Value, json};
use tether::testing::{Journal, MockDriverFactory, RecordingPlugin};
use tether::{AutomationServer, DeleteAllOptions, ExtensionRegistry, Protocol, ServerConfig};

fn body(automation: &str) -> Value {
	json!({
		"capabilities": {
			"alwaysMatch": {"platformName": "Android"},
			"firstMatch": [{"appium:automationName": automation}]
		}
	})
}

fn session_id(value: &Value) -> String {
	value["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_server_from_config_wires_plugins_in_order() {
	let journal = Journal::new();
	let mut extensions = ExtensionRegistry::new();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("mock", "Mock").with_journal(journal.clone())))
		.unwrap();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("unused", "Unused")))
		.unwrap();
	for name in ["A", "B", "disabled"] {
		extensions
			.register_plugin(Arc::new(RecordingPlugin::factory(name).handling(["tap"]).with_journal(journal.clone())))
			.unwrap();
	}

	let config = ServerConfig::from_json_str(r#"{"plugins": ["B", "A"], "drivers": ["mock"]}"#).unwrap();
	let server = AutomationServer::from_config(&config, extensions).unwrap();
	assert_eq!(server.registry().extensions().drivers().len(), 1);

	let id = session_id(&server.create_session(body("Mock")).await.into_result().unwrap());
	journal.clear();
	server.execute_command("tap", Some(&id), Vec::new()).await.into_result().unwrap();

	assert_eq!(
		journal.entries(),
		vec!["plugin:B:tap", "plugin:A:tap", "driver:tap", "after:A:tap", "after:B:tap"]
	);
}

#[tokio::test]
async fn test_server_from_config_rejects_unknown_extensions() {
	let mut extensions = ExtensionRegistry::new();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("mock", "Mock")))
		.unwrap();

	let config = ServerConfig::from_json_str(r#"{"plugins": ["missing"]}"#).unwrap();
	assert!(AutomationServer::from_config(&config, extensions.clone()).is_err());

	let config = ServerConfig::from_json_str(r#"{"drivers": ["missing"]}"#).unwrap();
	assert!(AutomationServer::from_config(&config, extensions).is_err());
}

#[tokio::test]
async fn test_first_candidate_failure_falls_through_to_second() {
	let mut extensions = ExtensionRegistry::new();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("d1-primary", "D1").failing("negotiation refused")))
		.unwrap();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("d1-secondary", "D1")))
		.unwrap();
	let server = AutomationServer::from_config(&ServerConfig::default(), extensions).unwrap();

	let created = server.create_session(body("D1")).await;
	assert!(created.is_ok());
	let id = session_id(created.value().unwrap());

	let driver = server.execute_command("tap", Some(&id), Vec::new()).await.into_result().unwrap();
	assert_eq!(driver["driver"], "d1-secondary");
}

#[tokio::test]
async fn test_creation_failure_reaches_the_wire() {
	let mut extensions = ExtensionRegistry::new();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("mock", "Mock").failing("no device")))
		.unwrap();
	let server = AutomationServer::from_config(&ServerConfig::default(), extensions).unwrap();

	let wire = server.create_session(body("Mock")).await.into_wire();

	assert!(!wire.is_ok());
	let error = wire.error().unwrap();
	assert_eq!(error.error, "session not created");
	assert!(error.message.contains("mock: no device"), "{}", error.message);
	assert_eq!(wire.protocol(), Protocol::W3C);
}

#[tokio::test]
async fn test_legacy_request_is_answered_in_legacy_protocol() {
	let mut extensions = ExtensionRegistry::new();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("mock", "Mock")))
		.unwrap();
	let server = AutomationServer::from_config(&ServerConfig::default(), extensions).unwrap();

	let created = server
		.create_session(json!({"desiredCapabilities": {"platformName": "Android", "automationName": "Mock"}}))
		.await;

	assert_eq!(created.protocol, Protocol::MJSONWP);
	let id = session_id(created.value().unwrap());
	let tapped = server.execute_command("tap", Some(&id), Vec::new()).await;
	assert_eq!(tapped.protocol, Protocol::MJSONWP);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_listing_tracks_create_and_delete() {
	let mut extensions = ExtensionRegistry::new();
	extensions
		.register_driver(Arc::new(MockDriverFactory::new("mock", "Mock").failing_teardown("device gone")))
		.unwrap();
	let server = Arc::new(AutomationServer::from_config(&ServerConfig::default(), extensions).unwrap());

	let mut handles = Vec::new();
	for _ in 0..8 {
		let server = Arc::clone(&server);
		handles.push(tokio::spawn(async move {
			session_id(&server.create_session(body("Mock")).await.into_result().unwrap())
		}));
	}
	let mut ids = Vec::new();
	for handle in handles {
		ids.push(handle.await.unwrap());
	}

	let listed = server.get_sessions().await.into_result().unwrap();
	assert_eq!(listed.as_array().unwrap().len(), 8);

	let deleted = server.delete_session(&ids[0]).await;
	assert!(!deleted.is_ok());
	let listed = server.get_sessions().await.into_result().unwrap();
	assert!(listed.as_array().unwrap().iter().all(|s| s["id"] != ids[0].as_str()));

	assert_eq!(server.delete_all_sessions(DeleteAllOptions::default()).await, 7);
	assert_eq!(server.registry().session_count(), 0);
}
