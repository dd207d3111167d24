//! Client properties as declared through `SetProperties`.

use serde::{Deserialize, Serialize};

/// `SmProgram`: name of the program that is running.
pub const PROGRAM: &str = "Program";
/// `SmProcessID`: decimal process id of the client.
pub const PROCESS_ID: &str = "ProcessID";
/// `SmRestartCommand`: argv that restarts the client in its current state.
pub const RESTART_COMMAND: &str = "RestartCommand";
/// `SmDiscardCommand`: argv that discards the client's saved state.
pub const DISCARD_COMMAND: &str = "DiscardCommand";
/// `SmRestartStyleHint`: one of the [`RestartStyle`] values.
pub const RESTART_STYLE_HINT: &str = "RestartStyleHint";
/// Session-manager specific property naming the client's desktop file.
pub const DESKTOP_FILE: &str = "_GSM_DesktopFile";

/// Values of the `RestartStyleHint` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RestartStyle {
	IfRunning = 0,
	Anyway = 1,
	Immediately = 2,
	Never = 3,
}

impl RestartStyle {
	pub fn from_card8(value: u8) -> Option<Self> {
		match value {
			0 => Some(Self::IfRunning),
			1 => Some(Self::Anyway),
			2 => Some(Self::Immediately),
			3 => Some(Self::Never),
			_ => None,
		}
	}
}

/// Typed property payload, tagged with the XSMP type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
	#[serde(rename = "CARD8")]
	Card8(u8),
	#[serde(rename = "ARRAY8")]
	Array8(String),
	#[serde(rename = "LISTofARRAY8")]
	ListOfArray8(Vec<String>),
}

/// A single named property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
	pub name: String,
	pub value: PropertyValue,
}

impl Property {
	pub fn card8(name: impl Into<String>, value: u8) -> Self {
		Self {
			name: name.into(),
			value: PropertyValue::Card8(value),
		}
	}

	pub fn array8(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: PropertyValue::Array8(value.into()),
		}
	}

	pub fn list<I, S>(name: impl Into<String>, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			name: name.into(),
			value: PropertyValue::ListOfArray8(values.into_iter().map(Into::into).collect()),
		}
	}
}
