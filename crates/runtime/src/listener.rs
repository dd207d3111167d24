//! The local socket XSMP clients connect to.

use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};

pub const SOCKET_NAME: &str = "xsmp.sock";

#[derive(Debug)]
pub struct XsmpListener {
	listener: UnixListener,
	path: PathBuf,
	network_id: String,
}

impl XsmpListener {
	/// Binds `<runtime_dir>/xsmp.sock`, replacing a stale socket.
	pub fn bind(runtime_dir: &Path) -> Result<Self> {
		let path = runtime_dir.join(SOCKET_NAME);
		let listener = bind_unix(&path)?;
		let network_id = network_id(&hostname(), &path);
		info!(target = "gsm.xsmp", network_id = %network_id, "listening for clients");
		Ok(Self {
			listener,
			path,
			network_id,
		})
	}

	/// ICE network id, as exported in `SESSION_MANAGER`.
	pub fn network_id(&self) -> &str {
		&self.network_id
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn accept(&self) -> std::io::Result<UnixStream> {
		self.listener.accept().await.map(|(stream, _)| stream)
	}
}

impl Drop for XsmpListener {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}

/// Binds a Unix listener at `path`, removing a leftover socket file first.
pub(crate) fn bind_unix(path: &Path) -> Result<UnixListener> {
	if path.exists() {
		debug!(target = "gsm.xsmp", path = %path.display(), "removing stale socket");
		std::fs::remove_file(path).map_err(|source| RuntimeError::Bind {
			path: path.to_path_buf(),
			source,
		})?;
	}
	UnixListener::bind(path).map_err(|source| RuntimeError::Bind {
		path: path.to_path_buf(),
		source,
	})
}

pub fn network_id(host: &str, path: &Path) -> String {
	format!("local/{host}:{}", path.display())
}

fn hostname() -> String {
	nix::unistd::gethostname()
		.map(|host| host.to_string_lossy().into_owned())
		.unwrap_or_else(|_| "localhost".to_string())
}
