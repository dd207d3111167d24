use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("failed to bind {path}: {source}")]
	Bind {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot prepare runtime directory {path}: {source}")]
	RuntimeDir {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Authority(#[from] AuthorityError),

	#[error("malformed message: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("control socket closed without a response")]
	NoResponse,

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AuthorityError {
	#[error("{path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("timed out waiting for the lock on {path}")]
	Locked { path: PathBuf },

	#[error("{path}: truncated entry")]
	Truncated { path: PathBuf },

	#[error("no ICE authority file location (set ICEAUTHORITY or HOME)")]
	NoLocation,
}
