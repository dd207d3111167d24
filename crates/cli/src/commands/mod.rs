mod control;
mod run;

use gsm_protocol::ControlRequest;

use crate::cli::{Cli, Commands};
use crate::config::{Overrides, SessionConfig};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
	let file = SessionConfig::load(cli.config.as_deref())?;

	let request = match cli.command {
		Commands::Run {
			name,
			autostart_dirs,
			phase_timeout,
			handshake_timeout,
		} => {
			let config = file.with_overrides(Overrides {
				name,
				autostart_dirs,
				phase_timeout_secs: phase_timeout,
				handshake_timeout_secs: handshake_timeout,
				runtime_dir: cli.runtime_dir,
			});
			return run::execute(config).await;
		}
		Commands::Status => ControlRequest::Status,
		Commands::Logout => ControlRequest::Logout,
		Commands::CancelLogout => ControlRequest::CancelLogout,
		Commands::Checkpoint => ControlRequest::Checkpoint,
	};

	let runtime_dir = cli.runtime_dir.unwrap_or_else(|| file.runtime_dir());
	control::execute(&runtime_dir, request).await
}
