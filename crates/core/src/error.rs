//! Error types for session orchestration.

use std::path::PathBuf;

use thiserror::Error;

use crate::client::ClientKey;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Orchestrator-level failures. None of these are fatal to the session.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("session is not in shutdown mode")]
	NotShuttingDown,

	#[error("refusing new client because the session is currently being shut down")]
	ShuttingDown,

	#[error("client id {0} is already in use")]
	DuplicateClientId(String),

	#[error("no client registered under {0}")]
	UnknownClient(ClientKey),
}

/// Failures of client capability operations.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("client has no restart command")]
	NoRestartCommand,

	#[error("failed to spawn `{command}`: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},
}

/// Failures launching an autostart application.
#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("{0} has no Exec line")]
	MissingExec(String),

	#[error("{app}: Exec line `{exec}` is empty or unbalanced")]
	InvalidExec { app: String, exec: String },

	#[error("failed to launch {app}: {source}")]
	Spawn {
		app: String,
		#[source]
		source: std::io::Error,
	},
}

/// Failures reading a desktop-entry manifest.
#[derive(Debug, Error)]
pub enum DesktopEntryError {
	#[error("could not read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("{path}: missing [Desktop Entry] group")]
	MissingGroup { path: PathBuf },

	#[error("{path}:{line}: malformed line")]
	Malformed { path: PathBuf, line: usize },
}
