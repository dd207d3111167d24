//! XSMP messages exchanged on a client connection.
//!
//! Each direction has its own enum. Serialized form is internally tagged:
//! ```json
//! {"type": "register_client", "previous_id": null}
//! ```

use serde::{Deserialize, Serialize};

use crate::property::Property;

/// Scope of a `SaveYourself` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
	/// Update the client's own saved state only.
	Local,
	/// Flush user data to permanent storage.
	Global,
	/// Both of the above.
	Both,
}

/// How much user interaction a client may perform while saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InteractStyle {
	#[default]
	None,
	Errors,
	Any,
}

/// Messages sent from a client to the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	/// First message on every connection.
	RegisterClient {
		#[serde(default)]
		previous_id: Option<String>,
	},
	InteractRequest {
		#[serde(default)]
		dialog_type: InteractStyle,
	},
	InteractDone {
		cancel_shutdown: bool,
	},
	SaveYourselfRequest {
		save_type: SaveType,
		shutdown: bool,
		#[serde(default)]
		interact_style: InteractStyle,
		#[serde(default)]
		fast: bool,
		#[serde(default)]
		global: bool,
	},
	SaveYourselfPhase2Request,
	SaveYourselfDone {
		success: bool,
	},
	CloseConnection {
		#[serde(default)]
		reasons: Vec<String>,
	},
	SetProperties {
		properties: Vec<Property>,
	},
	DeleteProperties {
		names: Vec<String>,
	},
	GetProperties,
}

impl ClientMessage {
	/// Short message name for diagnostics.
	pub fn name(&self) -> &'static str {
		match self {
			Self::RegisterClient { .. } => "RegisterClient",
			Self::InteractRequest { .. } => "InteractRequest",
			Self::InteractDone { .. } => "InteractDone",
			Self::SaveYourselfRequest { .. } => "SaveYourselfRequest",
			Self::SaveYourselfPhase2Request => "SaveYourselfPhase2Request",
			Self::SaveYourselfDone { .. } => "SaveYourselfDone",
			Self::CloseConnection { .. } => "CloseConnection",
			Self::SetProperties { .. } => "SetProperties",
			Self::DeleteProperties { .. } => "DeleteProperties",
			Self::GetProperties => "GetProperties",
		}
	}
}

/// Messages sent from the session manager to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
	RegisterClientReply {
		client_id: String,
	},
	/// Registration was refused; the connection is closed afterwards.
	RegistrationRefused {
		reason: String,
	},
	SaveYourself {
		save_type: SaveType,
		shutdown: bool,
		interact_style: InteractStyle,
		fast: bool,
	},
	SaveYourselfPhase2,
	Interact,
	SaveComplete,
	ShutdownCancelled,
	Die,
	PropertiesReply {
		properties: Vec<Property>,
	},
}
