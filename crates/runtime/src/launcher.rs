//! Spawning autostart applications and client restart commands.

use std::process::Stdio;

use gsm::{App, AppLauncher, LaunchError, SessionPhase};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Variable naming the session manager's network id.
pub const SESSION_MANAGER_ENV: &str = "SESSION_MANAGER";
/// Variable carrying the client id minted for an autostarted app.
pub const DESKTOP_AUTOSTART_ID_ENV: &str = "DESKTOP_AUTOSTART_ID";

/// Environment handed to every child of the session.
#[derive(Debug, Clone, Default)]
pub struct ChildEnv {
	session_manager: Option<String>,
}

impl ChildEnv {
	pub fn new(network_id: impl Into<String>) -> Self {
		Self {
			session_manager: Some(network_id.into()),
		}
	}

	fn command(&self, argv: &[String]) -> Command {
		let mut command = Command::new(&argv[0]);
		command
			.args(&argv[1..])
			.stdin(Stdio::null())
			.env_remove(DESKTOP_AUTOSTART_ID_ENV);
		if let Some(network_id) = &self.session_manager {
			command.env(SESSION_MANAGER_ENV, network_id);
		}
		command
	}

	/// Spawns `argv` detached from the session and reaps it in the
	/// background. Returns the child's pid.
	pub fn spawn(&self, argv: &[String]) -> std::io::Result<u32> {
		if argv.is_empty() {
			return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"));
		}
		let child = self.command(argv).spawn()?;
		Ok(reap(child, None))
	}
}

/// Waits for `child` in the background, reporting its pid on `exited`.
fn reap(mut child: tokio::process::Child, exited: Option<mpsc::UnboundedSender<u32>>) -> u32 {
	let pid = child.id().unwrap_or_default();
	tokio::spawn(async move {
		match child.wait().await {
			Ok(status) => debug!(target = "gsm.session", pid, %status, "child exited"),
			Err(err) => warn!(target = "gsm.session", pid, error = %err, "failed to wait for child"),
		}
		if let Some(exited) = exited {
			let _ = exited.send(pid);
		}
	});
	pid
}

/// [`AppLauncher`] that starts real processes.
///
/// Initialization-phase apps are watched; their pid is sent on the exit
/// channel when they terminate.
#[derive(Debug)]
pub struct ProcessLauncher {
	env: ChildEnv,
	exits: mpsc::UnboundedSender<u32>,
}

impl ProcessLauncher {
	pub fn new(env: ChildEnv) -> (Self, mpsc::UnboundedReceiver<u32>) {
		let (exits, exits_rx) = mpsc::unbounded_channel();
		(Self { env, exits }, exits_rx)
	}
}

impl AppLauncher for ProcessLauncher {
	fn launch(&mut self, app: &App) -> Result<u32, LaunchError> {
		let exec = app.exec().ok_or_else(|| LaunchError::MissingExec(app.basename().to_string()))?;
		let argv = parse_exec(exec).ok_or_else(|| LaunchError::InvalidExec {
			app: app.basename().to_string(),
			exec: exec.to_string(),
		})?;

		let mut command = self.env.command(&argv);
		if app.autostart_notify() {
			if let Some(client_id) = app.client_id() {
				command.env(DESKTOP_AUTOSTART_ID_ENV, client_id);
			}
		}
		let child = command.spawn().map_err(|source| LaunchError::Spawn {
			app: app.basename().to_string(),
			source,
		})?;

		let watch = (app.phase() == SessionPhase::Initialization).then(|| self.exits.clone());
		let pid = reap(child, watch);
		debug!(target = "gsm.session", app = %app.basename(), pid, argv = ?argv, "spawned application");
		Ok(pid)
	}
}

/// Splits a desktop-entry `Exec` value into argv.
///
/// Double quotes group words and allow backslash escapes. Field codes such
/// as `%U` are dropped since autostart never passes files; `%%` is a literal
/// percent sign. Returns `None` for an empty or unbalanced value.
pub fn parse_exec(exec: &str) -> Option<Vec<String>> {
	let mut argv = Vec::new();
	let mut word = String::new();
	// Set once the word has content of its own, so `""` yields an empty
	// argument while a lone field code yields none.
	let mut literal = false;
	let mut quoted = false;
	let mut chars = exec.chars();

	while let Some(c) = chars.next() {
		match c {
			'"' => {
				quoted = !quoted;
				literal = true;
			}
			'\\' if quoted => {
				word.push(chars.next()?);
			}
			'%' => {
				if chars.next()? == '%' {
					word.push('%');
					literal = true;
				}
			}
			c if c.is_whitespace() && !quoted => {
				if literal {
					argv.push(std::mem::take(&mut word));
				}
				word.clear();
				literal = false;
			}
			c => {
				word.push(c);
				literal = true;
			}
		}
	}
	if quoted {
		return None;
	}
	if literal {
		argv.push(word);
	}
	(!argv.is_empty()).then_some(argv)
}

#[cfg(test)]
mod tests {
	use super::*;
	use gsm::DesktopEntry;

	#[test]
	fn splits_plain_words() {
		assert_eq!(parse_exec("sugar-shell --debug").unwrap(), ["sugar-shell", "--debug"]);
	}

	#[test]
	fn honours_quotes_and_escapes() {
		assert_eq!(
			parse_exec(r#"sh -c "echo \"hi there\" \$HOME" """#).unwrap(),
			["sh", "-c", r#"echo "hi there" $HOME"#, ""]
		);
	}

	#[test]
	fn drops_field_codes() {
		assert_eq!(parse_exec("browse %U").unwrap(), ["browse"]);
		assert_eq!(parse_exec("calc --rate=50%% %f").unwrap(), ["calc", "--rate=50%"]);
	}

	#[test]
	fn rejects_empty_and_unbalanced() {
		assert_eq!(parse_exec("   "), None);
		assert_eq!(parse_exec("%U"), None);
		assert_eq!(parse_exec(r#"foo "bar"#), None);
		assert_eq!(parse_exec("foo %"), None);
	}

	fn app(contents: &str) -> App {
		App::from_desktop_entry(DesktopEntry::parse("/autostart/t.desktop", contents).unwrap())
	}

	#[tokio::test]
	async fn initialization_apps_report_their_exit() {
		let (mut launcher, mut exits) = ProcessLauncher::new(ChildEnv::new("local/test:/tmp/none"));
		let mut app = app("[Desktop Entry]\nExec=true\nX-GNOME-Autostart-Phase=Initialization\n");
		app.set_client_id("10abc");

		let pid = launcher.launch(&app).unwrap();
		assert_eq!(exits.recv().await, Some(pid));
	}

	#[tokio::test]
	async fn autostart_id_is_exported_when_requested() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("env");
		let exec = format!(
			"[Desktop Entry]\nExec=sh -c \"echo $DESKTOP_AUTOSTART_ID $SESSION_MANAGER > {}\"\n\
			 X-GNOME-Autostart-Phase=Initialization\nX-GNOME-Autostart-Notify=true\n",
			out.display()
		);
		let (mut launcher, mut exits) = ProcessLauncher::new(ChildEnv::new("local/test:/tmp/none"));
		let mut app = app(&exec);
		app.set_client_id("10abc");
		launcher.launch(&app).unwrap();
		exits.recv().await.unwrap();

		let written = std::fs::read_to_string(&out).unwrap();
		assert_eq!(written.trim(), "10abc local/test:/tmp/none");
	}

	#[test]
	fn missing_exec_is_an_error() {
		let (mut launcher, _exits) = ProcessLauncher::new(ChildEnv::default());
		let err = launcher.launch(&app("[Desktop Entry]\nName=x\n")).unwrap_err();
		assert!(matches!(err, LaunchError::MissingExec(_)));
	}
}
