//! Autostart application descriptors.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::desktop_entry::DesktopEntry;
use crate::error::{DesktopEntryError, LaunchError};
use crate::phase::SessionPhase;

/// An application the session starts from a desktop-entry manifest.
#[derive(Debug, Clone)]
pub struct App {
	entry: DesktopEntry,
	basename: String,
	phase: SessionPhase,
	client_id: Option<String>,
	pid: Option<u32>,
}

impl App {
	pub fn from_desktop_entry(entry: DesktopEntry) -> Self {
		let basename = entry
			.source()
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		let phase = entry
			.string("X-GNOME-Autostart-Phase")
			.map(SessionPhase::from_autostart_tag)
			.unwrap_or(SessionPhase::Application);
		Self {
			entry,
			basename,
			phase,
			client_id: None,
			pid: None,
		}
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, DesktopEntryError> {
		DesktopEntry::load(path).map(Self::from_desktop_entry)
	}

	/// File name of the manifest, e.g. `sugar-journal.desktop`.
	pub fn basename(&self) -> &str {
		&self.basename
	}

	pub fn phase(&self) -> SessionPhase {
		self.phase
	}

	pub fn entry(&self) -> &DesktopEntry {
		&self.entry
	}

	/// Identifier minted for the app at launch.
	pub fn client_id(&self) -> Option<&str> {
		self.client_id.as_deref()
	}

	pub fn set_client_id(&mut self, client_id: impl Into<String>) {
		self.client_id = Some(client_id.into());
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn set_pid(&mut self, pid: u32) {
		self.pid = Some(pid);
	}

	pub fn exec(&self) -> Option<&str> {
		self.entry.string("Exec")
	}

	pub fn provided_services(&self) -> Vec<String> {
		self.entry.string_list("X-GNOME-Provides")
	}

	pub fn provides(&self, service: &str) -> bool {
		self.provided_services().iter().any(|s| s == service)
	}

	/// Whether the app understands `DESKTOP_AUTOSTART_ID`.
	pub fn autostart_notify(&self) -> bool {
		self.entry
			.boolean("X-GNOME-Autostart-Notify")
			.or_else(|| self.entry.boolean("AutostartNotify"))
			.unwrap_or(false)
	}

	pub fn autorestart(&self) -> bool {
		self.entry.boolean("X-GNOME-AutoRestart").unwrap_or(false)
	}

	/// Whether the manifest opts out of autostart, either outright or through
	/// an unmet `X-GNOME-Autostart-Condition`.
	pub fn is_disabled(&self) -> bool {
		self.is_disabled_in(dirs::config_dir().as_deref())
	}

	/// Like [`is_disabled`](Self::is_disabled), resolving relative condition
	/// paths against `config_dir`.
	pub fn is_disabled_in(&self, config_dir: Option<&Path>) -> bool {
		if self.entry.boolean("Hidden") == Some(true) {
			return true;
		}
		if self.entry.boolean("X-GNOME-Autostart-enabled") == Some(false) {
			return true;
		}
		match self.entry.string("X-GNOME-Autostart-Condition") {
			Some(condition) => !condition_met(condition, config_dir),
			None => false,
		}
	}
}

fn condition_met(condition: &str, config_dir: Option<&Path>) -> bool {
	let mut parts = condition.trim().splitn(2, char::is_whitespace);
	let kind = parts.next().unwrap_or_default();
	let argument = parts.next().map(str::trim).unwrap_or_default();

	let resolve = |arg: &str| -> PathBuf {
		let path = Path::new(arg);
		match config_dir {
			Some(base) if path.is_relative() => base.join(path),
			_ => path.to_path_buf(),
		}
	};

	match kind.to_ascii_lowercase().as_str() {
		"if-exists" => resolve(argument).exists(),
		"unless-exists" => !resolve(argument).exists(),
		other => {
			debug!(target = "gsm.session", condition = other, "unsupported autostart condition, assuming enabled");
			true
		}
	}
}

/// Starts application processes on behalf of the session.
pub trait AppLauncher: Send {
	/// Launches `app` and returns the child's pid.
	fn launch(&mut self, app: &App) -> Result<u32, LaunchError>;
}

/// Loads every `*.desktop` manifest from `dirs`.
///
/// A basename found in an earlier directory shadows later ones, so user
/// directories go first. Unreadable manifests are logged and skipped.
pub fn load_autostart_dirs<P: AsRef<Path>>(dirs: &[P]) -> Vec<App> {
	let mut seen = HashSet::new();
	let mut apps = Vec::new();

	for dir in dirs {
		let dir = dir.as_ref();
		let read = match std::fs::read_dir(dir) {
			Ok(read) => read,
			Err(err) => {
				debug!(target = "gsm.session", dir = %dir.display(), error = %err, "skipping autostart directory");
				continue;
			}
		};
		let mut paths: Vec<PathBuf> = read
			.filter_map(|entry| entry.ok().map(|e| e.path()))
			.filter(|path| path.extension().is_some_and(|ext| ext == "desktop"))
			.collect();
		paths.sort();

		for path in paths {
			match App::load(&path) {
				Ok(app) => {
					if seen.insert(app.basename().to_string()) {
						apps.push(app);
					}
				}
				Err(err) => warn!(target = "gsm.session", error = %err, "ignoring autostart manifest"),
			}
		}
	}
	apps
}
