//! End-to-end tests driving a real session manager over its sockets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gsm::protocol::{
	ClientMessage, ControlRequest, ControlResponse, InteractStyle, ManagerMessage, PROCESS_ID, PROGRAM, Property, SaveType,
};
use gsm_runtime::authority::IceAuthority;
use gsm_runtime::control::send_request;
use gsm_runtime::{ManagerConfig, SessionManager};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

const STEP: Duration = Duration::from_secs(5);

struct Harness {
	dir: tempfile::TempDir,
	runtime_dir: PathBuf,
	authority: IceAuthority,
	network_id: String,
	manager: JoinHandle<gsm_runtime::Result<()>>,
}

impl Harness {
	async fn start(handshake_timeout: Duration) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let runtime_dir = dir.path().join("run");
		let authority_file = dir.path().join("ICEauthority");
		let config = ManagerConfig {
			name: Some("test".into()),
			runtime_dir: runtime_dir.clone(),
			autostart_dirs: vec![dir.path().join("autostart")],
			phase_timeout: Duration::from_secs(10),
			handshake_timeout,
			authority_file: Some(authority_file.clone()),
		};
		let manager = SessionManager::start(config).await.unwrap();
		let network_id = manager.network_id().to_string();
		let manager = tokio::spawn(manager.run());
		Self {
			dir,
			runtime_dir,
			authority: IceAuthority::new(authority_file),
			network_id,
			manager,
		}
	}

	async fn connect(&self) -> TestClient {
		let stream = UnixStream::connect(self.runtime_dir.join("xsmp.sock")).await.unwrap();
		let (read, write) = stream.into_split();
		TestClient {
			lines: BufReader::new(read).lines(),
			write,
		}
	}

	async fn control(&self, request: ControlRequest) -> ControlResponse {
		let path = gsm_runtime::manager::control_socket_path(&self.runtime_dir);
		send_request(&path, &request).await.unwrap().unwrap()
	}

	/// Waits for the manager to exit; the returned directory keeps its
	/// files around for inspection.
	async fn wait(self) -> (tempfile::TempDir, PathBuf) {
		tokio::time::timeout(STEP, self.manager).await.unwrap().unwrap().unwrap();
		(self.dir, self.runtime_dir)
	}
}

struct TestClient {
	lines: Lines<BufReader<OwnedReadHalf>>,
	write: OwnedWriteHalf,
}

impl TestClient {
	async fn send(&mut self, message: ClientMessage) {
		let mut line = serde_json::to_string(&message).unwrap();
		line.push('\n');
		self.write.write_all(line.as_bytes()).await.unwrap();
	}

	/// Next message, or `None` once the manager closed the connection.
	async fn recv(&mut self) -> Option<ManagerMessage> {
		let line = tokio::time::timeout(STEP, self.lines.next_line()).await.unwrap().unwrap()?;
		Some(serde_json::from_str(&line).unwrap())
	}

	async fn register(&mut self, previous_id: Option<&str>) -> String {
		self.send(ClientMessage::RegisterClient {
			previous_id: previous_id.map(str::to_string),
		})
		.await;
		match self.recv().await {
			Some(ManagerMessage::RegisterClientReply { client_id }) => client_id,
			other => panic!("expected registration reply, got {other:?}"),
		}
	}

	async fn done(&mut self) {
		self.send(ClientMessage::SaveYourselfDone { success: true }).await;
	}
}

fn local_save() -> ManagerMessage {
	ManagerMessage::SaveYourself {
		save_type: SaveType::Local,
		shutdown: false,
		interact_style: InteractStyle::None,
		fast: false,
	}
}

fn global_save() -> ManagerMessage {
	ManagerMessage::SaveYourself {
		save_type: SaveType::Global,
		shutdown: true,
		interact_style: InteractStyle::Any,
		fast: false,
	}
}

fn assert_sockets_removed(runtime_dir: &Path) {
	assert!(!runtime_dir.join("xsmp.sock").exists());
	assert!(!runtime_dir.join("control.sock").exists());
}

#[tokio::test]
async fn client_lifecycle_through_logout() {
	let h = Harness::start(Duration::from_secs(5)).await;

	let entries = h.authority.read().unwrap();
	let protocols: Vec<_> = entries
		.iter()
		.filter(|entry| entry.network_id == h.network_id)
		.map(|entry| entry.protocol_name.as_str())
		.collect();
	assert_eq!(protocols, ["ICE", "XSMP"]);

	let mut client = h.connect().await;
	let client_id = client.register(None).await;
	assert!(client_id.starts_with("10"));
	assert_eq!(client.recv().await, Some(local_save()));
	client.done().await;
	assert_eq!(client.recv().await, Some(ManagerMessage::SaveComplete));

	client
		.send(ClientMessage::SetProperties {
			properties: vec![Property::array8(PROGRAM, "test-client"), Property::array8(PROCESS_ID, "4242")],
		})
		.await;
	client.send(ClientMessage::GetProperties).await;
	assert!(matches!(client.recv().await, Some(ManagerMessage::PropertiesReply { properties }) if properties.len() == 2));

	match h.control(ControlRequest::Status).await {
		ControlResponse::Status { name, phase, clients } => {
			assert_eq!(name.as_deref(), Some("test"));
			assert_eq!(phase, "running");
			assert_eq!(clients.len(), 1);
			assert_eq!(clients[0].client_id, client_id);
			assert_eq!(clients[0].pid, Some(4242));
			assert!(clients[0].description.contains("test-client"));
		}
		other => panic!("unexpected status {other:?}"),
	}

	assert_eq!(h.control(ControlRequest::Checkpoint).await, ControlResponse::Ok);
	assert_eq!(client.recv().await, Some(local_save()));
	client.done().await;
	assert_eq!(client.recv().await, Some(ManagerMessage::SaveComplete));

	assert_eq!(h.control(ControlRequest::Logout).await, ControlResponse::Ok);
	assert_eq!(client.recv().await, Some(global_save()));
	client.done().await;
	assert_eq!(client.recv().await, Some(ManagerMessage::Die));

	let authority = h.authority.clone();
	let network_id = h.network_id.clone();
	let (_dir, runtime_dir) = h.wait().await;
	assert!(authority.read().unwrap().iter().all(|entry| entry.network_id != network_id));
	assert_sockets_removed(&runtime_dir);
}

#[tokio::test]
async fn cancelled_logout_keeps_the_session() {
	let h = Harness::start(Duration::from_secs(5)).await;
	let mut client = h.connect().await;
	client.register(Some("10resumed")).await;

	assert!(matches!(
		h.control(ControlRequest::CancelLogout).await,
		ControlResponse::Error { ref code, .. } if code == "not_shutting_down"
	));

	h.control(ControlRequest::Logout).await;
	assert_eq!(client.recv().await, Some(global_save()));
	assert!(matches!(
		h.control(ControlRequest::Checkpoint).await,
		ControlResponse::Error { ref code, .. } if code == "shutting_down"
	));
	assert_eq!(h.control(ControlRequest::CancelLogout).await, ControlResponse::Ok);
	assert_eq!(client.recv().await, Some(ManagerMessage::ShutdownCancelled));

	// The save in flight still completes normally.
	client.done().await;
	client.send(ClientMessage::GetProperties).await;
	assert!(matches!(client.recv().await, Some(ManagerMessage::PropertiesReply { .. })));

	h.control(ControlRequest::Logout).await;
	assert_eq!(client.recv().await, Some(global_save()));
	client.done().await;
	assert_eq!(client.recv().await, Some(ManagerMessage::Die));
	h.wait().await;
}

#[tokio::test]
async fn handshake_rules_are_enforced() {
	let h = Harness::start(Duration::from_millis(200)).await;
	assert_eq!(h.control(ControlRequest::Ping).await, ControlResponse::Pong);

	let mut silent = h.connect().await;
	assert_eq!(silent.recv().await, None);

	let mut rude = h.connect().await;
	rude.send(ClientMessage::GetProperties).await;
	assert!(matches!(rude.recv().await, Some(ManagerMessage::RegistrationRefused { .. })));
	assert_eq!(rude.recv().await, None);

	let mut first = h.connect().await;
	let id = first.register(None).await;
	assert_eq!(first.recv().await, Some(local_save()));

	let mut copycat = h.connect().await;
	copycat
		.send(ClientMessage::RegisterClient {
			previous_id: Some(id.clone()),
		})
		.await;
	assert!(matches!(copycat.recv().await, Some(ManagerMessage::RegistrationRefused { .. })));
	assert_eq!(copycat.recv().await, None);

	// A client that hangs up is simply forgotten.
	first.send(ClientMessage::CloseConnection { reasons: vec!["done".into()] }).await;
	assert_eq!(first.recv().await, None);

	h.control(ControlRequest::Logout).await;
	let (_dir, runtime_dir) = h.wait().await;
	assert_sockets_removed(&runtime_dir);
}

#[tokio::test]
async fn unbounded_handshake_timeout_keeps_idle_connections() {
	let h = Harness::start(Duration::MAX).await;
	let mut idle = h.connect().await;

	let mut client = h.connect().await;
	client.register(None).await;
	assert_eq!(client.recv().await, Some(local_save()));
	client.done().await;
	assert_eq!(client.recv().await, Some(ManagerMessage::SaveComplete));
	assert_eq!(h.control(ControlRequest::Ping).await, ControlResponse::Pong);

	h.control(ControlRequest::Logout).await;
	assert_eq!(client.recv().await, Some(global_save()));
	client.done().await;
	assert_eq!(client.recv().await, Some(ManagerMessage::Die));
	h.wait().await;
	assert_eq!(idle.recv().await, None);
}
