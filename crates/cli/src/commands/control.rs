use std::path::Path;

use anyhow::{Context, anyhow, bail};
use gsm_protocol::{ControlRequest, ControlResponse};
use gsm_runtime::control::send_request;
use gsm_runtime::manager::control_socket_path;

/// Sends `request` to the session running in `runtime_dir` and prints the
/// outcome.
pub async fn execute(runtime_dir: &Path, request: ControlRequest) -> anyhow::Result<()> {
	let path = control_socket_path(runtime_dir);
	let response = send_request(&path, &request)
		.await
		.with_context(|| format!("failed to talk to {}", path.display()))?
		.ok_or_else(|| anyhow!("no session manager is running (looked for {})", path.display()))?;

	match response {
		ControlResponse::Status { name, phase, clients } => {
			println!("session: {} ({phase})", name.as_deref().unwrap_or("unnamed"));
			for client in clients {
				let pid = client.pid.map(|pid| format!(" pid {pid}")).unwrap_or_default();
				println!("  {}{pid}  {}", client.client_id, client.description);
			}
			Ok(())
		}
		ControlResponse::Ok | ControlResponse::Pong => Ok(()),
		ControlResponse::Error { code, message } => bail!("session manager refused ({code}): {message}"),
	}
}
