use anyhow::Context;
use gsm_runtime::SessionManager;
use tracing::info;

use crate::config::SessionConfig;

pub async fn execute(config: SessionConfig) -> anyhow::Result<()> {
	let config = config.into_manager_config();
	info!(target = "gsm", runtime_dir = %config.runtime_dir.display(), "starting session");

	let manager = SessionManager::start(config).await.context("failed to start session manager")?;
	manager.run().await.context("session manager failed")
}
