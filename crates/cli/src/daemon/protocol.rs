use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::WireEnvelope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
	/// W3C or legacy new-session body.
	CreateSession { capabilities: Value },
	DeleteSession { session_id: String },
	DeleteAllSessions {
		#[serde(default)]
		driver: Option<String>,
		/// Skip driver teardown.
		#[serde(default)]
		force: bool,
	},
	Execute {
		command: String,
		#[serde(default)]
		session_id: Option<String>,
		#[serde(default)]
		args: Vec<Value>,
	},
	GetSessions,
	Status,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
	/// Outcome of a dispatched command.
	Result { envelope: WireEnvelope },
	Deleted { count: usize },
	Ok,
	Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn requests_use_snake_case_tags() {
		let request: DaemonRequest = serde_json::from_value(json!({
			"type": "execute",
			"command": "getTitle",
			"session_id": "abc"
		}))
		.unwrap();
		assert_eq!(
			request,
			DaemonRequest::Execute {
				command: "getTitle".to_string(),
				session_id: Some("abc".to_string()),
				args: Vec::new(),
			}
		);

		let request: DaemonRequest = serde_json::from_value(json!({"type": "delete_all_sessions"})).unwrap();
		assert_eq!(request, DaemonRequest::DeleteAllSessions { driver: None, force: false });
	}

	#[test]
	fn deleted_response_shape() {
		let value = serde_json::to_value(DaemonResponse::Deleted { count: 2 }).unwrap();
		assert_eq!(value, json!({"type": "deleted", "count": 2}));
	}
}
