//! The session manager event loop.
//!
//! A single task owns the [`Session`] and `select!`s over everything that can
//! change it: new connections, client messages, control requests, the phase
//! and handshake deadlines, Initialization-app exits and termination signals.
//! Session state therefore needs no locking.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gsm::protocol::{ClientMessage, ClientSummary, ControlRequest, ControlResponse};
use gsm::session::PHASE_TIMEOUT;
use gsm::{ClientEvent, ClientKey, Rejected, Session, SessionEvent, SessionPhase, load_autostart_dirs};
use tokio::net::UnixStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::authority::IceAuthority;
use crate::connection::{Connection, ConnectionEvent};
use crate::control::{CONTROL_SOCKET_NAME, ControlServer};
use crate::error::{Result, RuntimeError};
use crate::launcher::{ChildEnv, ProcessLauncher};
use crate::listener::XsmpListener;
use crate::xsmp_client::XsmpClient;

/// How long a new connection may take to send `RegisterClient`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long pending writes may take to drain on exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
	pub name: Option<String>,
	/// Directory holding the XSMP and control sockets.
	pub runtime_dir: PathBuf,
	/// Autostart directories, highest priority first.
	pub autostart_dirs: Vec<PathBuf>,
	pub phase_timeout: Duration,
	pub handshake_timeout: Duration,
	/// ICE authority file; defaults to `$ICEAUTHORITY` or `~/.ICEauthority`.
	pub authority_file: Option<PathBuf>,
}

impl Default for ManagerConfig {
	fn default() -> Self {
		Self {
			name: None,
			runtime_dir: default_runtime_dir(),
			autostart_dirs: default_autostart_dirs(),
			phase_timeout: PHASE_TIMEOUT,
			handshake_timeout: HANDSHAKE_TIMEOUT,
			authority_file: None,
		}
	}
}

/// `$XDG_RUNTIME_DIR/gsm`, or a per-user directory under the temp dir.
pub fn default_runtime_dir() -> PathBuf {
	dirs::runtime_dir().map(|dir| dir.join("gsm")).unwrap_or_else(|| {
		let uid = nix::unistd::getuid();
		std::env::temp_dir().join(format!("gsm-{uid}"))
	})
}

/// The user's autostart directory followed by the system one.
pub fn default_autostart_dirs() -> Vec<PathBuf> {
	let mut dirs = Vec::new();
	if let Some(config) = dirs::config_dir() {
		dirs.push(config.join("autostart"));
	}
	dirs.push(PathBuf::from("/etc/xdg/autostart"));
	dirs
}

/// Control socket path for a runtime directory.
pub fn control_socket_path(runtime_dir: &Path) -> PathBuf {
	runtime_dir.join(CONTROL_SOCKET_NAME)
}

struct Handshake {
	client: XsmpClient,
	/// `None` when the configured timeout is too large to represent.
	deadline: Option<Instant>,
}

pub struct SessionManager {
	session: Session,
	session_events: mpsc::UnboundedReceiver<SessionEvent>,
	listener: XsmpListener,
	control: ControlServer,
	authority: IceAuthority,
	env: ChildEnv,
	handshake_timeout: Duration,
	handshakes: HashMap<ClientKey, Handshake>,
	connections: HashMap<ClientKey, Connection>,
	draining: Vec<JoinHandle<()>>,
	connection_tx: mpsc::UnboundedSender<ConnectionEvent>,
	connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
	app_exits: mpsc::UnboundedReceiver<u32>,
	next_key: u64,
}

impl SessionManager {
	/// Binds the sockets, publishes authority entries and loads autostart
	/// manifests. Failures here are fatal.
	pub async fn start(config: ManagerConfig) -> Result<Self> {
		prepare_runtime_dir(&config.runtime_dir)?;
		let listener = XsmpListener::bind(&config.runtime_dir)?;
		let control = ControlServer::bind(&config.runtime_dir)?;

		let authority_file = match config.authority_file {
			Some(path) => path,
			None => IceAuthority::default_location()?,
		};
		let authority = IceAuthority::new(authority_file);
		authority.add_network(listener.network_id()).await?;

		let env = ChildEnv::new(listener.network_id());
		let (launcher, app_exits) = ProcessLauncher::new(env.clone());
		let apps = load_autostart_dirs(&config.autostart_dirs);
		info!(target = "gsm.session", apps = apps.len(), "loaded autostart applications");

		let (session, session_events) = Session::new(apps, Box::new(launcher));
		let mut session = session.with_phase_timeout(config.phase_timeout);
		if let Some(name) = config.name {
			session.set_name(name);
		}

		let (connection_tx, connection_rx) = mpsc::unbounded_channel();
		Ok(Self {
			session,
			session_events,
			listener,
			control,
			authority,
			env,
			handshake_timeout: config.handshake_timeout,
			handshakes: HashMap::new(),
			connections: HashMap::new(),
			draining: Vec::new(),
			connection_tx,
			connection_rx,
			app_exits,
			next_key: 0,
		})
	}

	pub fn network_id(&self) -> &str {
		self.listener.network_id()
	}

	pub fn control_path(&self) -> &Path {
		self.control.path()
	}

	/// Runs the session until shutdown completes.
	pub async fn run(mut self) -> Result<()> {
		let mut terminate = signal(SignalKind::terminate())?;
		let mut interrupt = signal(SignalKind::interrupt())?;

		info!(target = "gsm.session", network_id = %self.listener.network_id(), "session manager running");
		self.session.start();

		loop {
			let phase_deadline = self.session.next_deadline();
			let handshake_deadline = self.handshakes.values().filter_map(|h| h.deadline).min();

			tokio::select! {
				Some(event) = self.session_events.recv() => {
					if self.on_session_event(event) {
						break;
					}
				}
				accepted = self.listener.accept() => match accepted {
					Ok(stream) => self.on_accept(stream),
					Err(err) => warn!(target = "gsm.xsmp", error = %err, "accept failed"),
				},
				Some(event) = self.connection_rx.recv() => self.on_connection_event(event),
				Some(call) = self.control.recv() => {
					let response = self.on_control(&call.request);
					call.respond(response);
				}
				Some(pid) = self.app_exits.recv() => {
					if self.session.app_exited(pid) {
						debug!(target = "gsm.session", pid, "initialization application exited");
					}
				}
				_ = sleep_until(phase_deadline) => self.session.handle_timeout(Instant::now()),
				_ = sleep_until(handshake_deadline) => self.expire_handshakes(Instant::now()),
				_ = terminate.recv() => self.on_signal("SIGTERM"),
				_ = interrupt.recv() => self.on_signal("SIGINT"),
			}
		}

		self.finish().await;
		Ok(())
	}

	fn on_signal(&mut self, name: &str) {
		if self.session.phase() == SessionPhase::Shutdown {
			warn!(target = "gsm.session", signal = name, "shutdown already in progress, not waiting for clients");
			self.session.force_shutdown();
		} else {
			info!(target = "gsm.session", signal = name, "logging out");
			self.session.initiate_shutdown();
		}
	}

	/// Returns `true` once the session is over.
	fn on_session_event(&mut self, event: SessionEvent) -> bool {
		match event {
			SessionEvent::PhaseChanged(phase) => {
				debug!(target = "gsm.session", %phase, "phase changed");
				false
			}
			SessionEvent::AppRegistered { .. } | SessionEvent::AppTimedOut { .. } => false,
			SessionEvent::ShutdownCompleted => true,
		}
	}

	fn on_accept(&mut self, stream: UnixStream) {
		self.next_key += 1;
		let key = ClientKey::new(self.next_key);
		let (connection, outgoing) = Connection::spawn(key, stream, self.connection_tx.clone());
		self.connections.insert(key, connection);
		self.handshakes.insert(
			key,
			Handshake {
				client: XsmpClient::new(key, outgoing, self.env.clone()),
				deadline: Instant::now().checked_add(self.handshake_timeout),
			},
		);
		debug!(target = "gsm.xsmp", key = %key, "accepted connection");
	}

	fn on_connection_event(&mut self, event: ConnectionEvent) {
		match event {
			ConnectionEvent::Message { key, message } => {
				if let Some(handshake) = self.handshakes.remove(&key) {
					self.complete_handshake(key, handshake.client, message);
					return;
				}
				let Some(client) = self.session.client_mut(key).and_then(|c| c.downcast_mut::<XsmpClient>()) else {
					debug!(target = "gsm.xsmp", key = %key, message = message.name(), "message for unknown client");
					return;
				};
				for event in client.process(message) {
					if let Err(err) = self.session.handle_client_event(key, event) {
						debug!(target = "gsm.session", key = %key, error = %err, "client event dropped");
					}
					if event == ClientEvent::Disconnected {
						self.close_connection(key);
					}
				}
			}
			ConnectionEvent::Closed { key } => {
				if self.handshakes.remove(&key).is_some() {
					debug!(target = "gsm.xsmp", key = %key, "connection closed before registering");
				} else if let Err(err) = self.session.handle_client_event(key, ClientEvent::Disconnected) {
					debug!(target = "gsm.session", key = %key, error = %err, "disconnect for unknown client");
				}
				self.close_connection(key);
			}
		}
	}

	fn complete_handshake(&mut self, key: ClientKey, client: XsmpClient, message: ClientMessage) {
		let previous_id = match message {
			ClientMessage::RegisterClient { previous_id } => previous_id,
			other => {
				warn!(target = "gsm.xsmp", key = %key, message = other.name(), "malformed handshake");
				client.refuse("expected RegisterClient");
				drop(client);
				self.close_connection(key);
				return;
			}
		};

		match self.session.register_client(key, Box::new(client), previous_id.as_deref()) {
			Ok(client_id) => debug!(target = "gsm.xsmp", key = %key, client_id = %client_id, "handshake complete"),
			Err(Rejected { client, error }) => {
				warn!(target = "gsm.xsmp", key = %key, error = %error, "registration refused");
				if let Ok(client) = client.downcast::<XsmpClient>() {
					client.refuse(error.to_string());
				}
				self.close_connection(key);
			}
		}
	}

	fn expire_handshakes(&mut self, now: Instant) {
		let expired: Vec<ClientKey> = self
			.handshakes
			.iter()
			.filter(|(_, handshake)| handshake.deadline.is_some_and(|deadline| deadline <= now))
			.map(|(&key, _)| key)
			.collect();
		for key in expired {
			warn!(target = "gsm.xsmp", key = %key, "client did not register in time, disconnecting");
			self.handshakes.remove(&key);
			self.close_connection(key);
		}
	}

	fn close_connection(&mut self, key: ClientKey) {
		self.draining.retain(|writer| !writer.is_finished());
		if let Some(connection) = self.connections.remove(&key) {
			self.draining.push(connection.close());
		}
	}

	fn on_control(&mut self, request: &ControlRequest) -> ControlResponse {
		match request {
			ControlRequest::Ping => ControlResponse::Pong,
			ControlRequest::Status => ControlResponse::Status {
				name: self.session.name().map(str::to_string),
				phase: self.session.phase().as_str().to_string(),
				clients: self
					.session
					.clients()
					.map(|(_, client_id, client)| ClientSummary {
						client_id: client_id.to_string(),
						description: client.description().to_string(),
						pid: client.pid(),
					})
					.collect(),
			},
			ControlRequest::Logout => {
				self.session.initiate_shutdown();
				ControlResponse::Ok
			}
			ControlRequest::CancelLogout => match self.session.cancel_shutdown() {
				Ok(()) => ControlResponse::Ok,
				Err(err) => error_response("not_shutting_down", &err),
			},
			ControlRequest::Checkpoint => match self.session.request_checkpoint() {
				Ok(()) => ControlResponse::Ok,
				Err(err) => error_response("shutting_down", &err),
			},
		}
	}

	async fn finish(self) {
		let network_id = self.listener.network_id().to_string();
		if let Err(err) = self.authority.remove_network(&network_id).await {
			warn!(target = "gsm.authority", error = %err, "could not clean up ICE authority file");
		}

		let Self {
			session,
			handshakes,
			connections,
			mut draining,
			..
		} = self;
		// Dropping the clients closes their outgoing queues.
		drop(session);
		drop(handshakes);
		for (_, connection) in connections {
			draining.push(connection.close());
		}
		let drained = tokio::time::timeout(DRAIN_TIMEOUT, async move {
			for writer in draining {
				let _ = writer.await;
			}
		})
		.await;
		if drained.is_err() {
			debug!(target = "gsm.xsmp", "gave up waiting for connections to drain");
		}
		info!(target = "gsm.session", "session ended");
	}
}

fn error_response(code: &str, err: &gsm::SessionError) -> ControlResponse {
	ControlResponse::Error {
		code: code.to_string(),
		message: err.to_string(),
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

fn prepare_runtime_dir(dir: &Path) -> Result<()> {
	let err = |source| RuntimeError::RuntimeDir {
		path: dir.to_path_buf(),
		source,
	};
	std::fs::create_dir_all(dir).map_err(err)?;
	std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(err)
}
