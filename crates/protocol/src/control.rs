//! Control-socket requests used by the `gsm` command line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
	Ping,
	Status,
	Logout,
	CancelLogout,
	Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
	Pong,
	Status {
		name: Option<String>,
		phase: String,
		clients: Vec<ClientSummary>,
	},
	Ok,
	Error {
		code: String,
		message: String,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
	pub client_id: String,
	pub description: String,
	pub pid: Option<u32>,
}
