//! Session and server introspection snapshots.

use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;

/// One registered session as reported by `getSessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
	pub id: String,
	pub capabilities: Capabilities,
}

/// Successful `createSession` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
	pub session_id: String,
	pub capabilities: Capabilities,
}

/// Build metadata included in [`StatusInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildInfo {
	pub version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub git_sha: Option<String>,
}

/// `getStatus` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
	pub ready: bool,
	pub message: String,
	pub build: BuildInfo,
}
