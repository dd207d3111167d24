//! Optional JSON configuration, `$XDG_CONFIG_HOME/gsm/session.json`.
//!
//! Every field may be omitted. Command line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use gsm_runtime::ManagerConfig;
use gsm_runtime::manager::{HANDSHAKE_TIMEOUT, default_autostart_dirs, default_runtime_dir};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
	pub name: Option<String>,
	/// Highest priority first.
	pub autostart_dirs: Vec<PathBuf>,
	pub phase_timeout_secs: u64,
	pub handshake_timeout_secs: u64,
	pub runtime_dir: Option<PathBuf>,
	pub authority_file: Option<PathBuf>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			name: None,
			autostart_dirs: default_autostart_dirs(),
			phase_timeout_secs: gsm::session::PHASE_TIMEOUT.as_secs(),
			handshake_timeout_secs: HANDSHAKE_TIMEOUT.as_secs(),
			runtime_dir: None,
			authority_file: None,
		}
	}
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub name: Option<String>,
	pub autostart_dirs: Vec<PathBuf>,
	pub phase_timeout_secs: Option<u64>,
	pub handshake_timeout_secs: Option<u64>,
	pub runtime_dir: Option<PathBuf>,
}

pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("gsm").join("session.json"))
}

impl SessionConfig {
	/// Loads `explicit`, or the default location when it exists.
	pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
		match explicit {
			Some(path) => Self::load_file(path),
			None => match default_config_path() {
				Some(path) if path.exists() => Self::load_file(&path),
				_ => Ok(Self::default()),
			},
		}
	}

	pub fn load_file(path: &Path) -> anyhow::Result<Self> {
		let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
		serde_json::from_str(&contents).with_context(|| format!("invalid configuration in {}", path.display()))
	}

	pub fn with_overrides(mut self, overrides: Overrides) -> Self {
		if overrides.name.is_some() {
			self.name = overrides.name;
		}
		if !overrides.autostart_dirs.is_empty() {
			self.autostart_dirs = overrides.autostart_dirs;
		}
		if let Some(secs) = overrides.phase_timeout_secs {
			self.phase_timeout_secs = secs;
		}
		if let Some(secs) = overrides.handshake_timeout_secs {
			self.handshake_timeout_secs = secs;
		}
		if overrides.runtime_dir.is_some() {
			self.runtime_dir = overrides.runtime_dir;
		}
		self
	}

	pub fn runtime_dir(&self) -> PathBuf {
		self.runtime_dir.clone().unwrap_or_else(default_runtime_dir)
	}

	pub fn into_manager_config(self) -> ManagerConfig {
		ManagerConfig {
			runtime_dir: self.runtime_dir(),
			name: self.name,
			autostart_dirs: self.autostart_dirs,
			phase_timeout: Duration::from_secs(self.phase_timeout_secs),
			handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
			authority_file: self.authority_file,
		}
	}
}
