//! The session orchestrator.
//!
//! [`Session`] sequences autostart phases, registers clients and runs the
//! two-phase shutdown protocol. It performs no I/O of its own: applications
//! are started through an [`AppLauncher`], clients are driven through the
//! [`Client`] trait, and the phase timer is exposed as a deadline for the
//! caller's event loop.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::{App, AppLauncher};
use crate::client::{Client, ClientEvent, ClientKey};
use crate::client_id::ClientIdGenerator;
use crate::error::{Result, SessionError};
use crate::phase::SessionPhase;

/// How long a startup phase waits for its applications to register.
pub const PHASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Notifications emitted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	PhaseChanged(SessionPhase),
	/// A pending application registered (or, for Initialization, exited).
	AppRegistered { app: String },
	/// A pending application failed to register before the phase deadline.
	AppTimedOut { app: String },
	/// Every client was told to die; the process may exit.
	ShutdownCompleted,
}

/// A registration the session refused. The client is handed back so the
/// transport can answer and close the connection.
pub struct Rejected {
	pub client: Box<dyn Client>,
	pub error: SessionError,
}

impl fmt::Debug for Rejected {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Rejected")
			.field("client", &self.client.description())
			.field("error", &self.error)
			.finish()
	}
}

struct Registered {
	client_id: String,
	client: Box<dyn Client>,
}

pub struct Session {
	name: Option<String>,
	phase: SessionPhase,
	phase_timeout: Duration,
	phase_deadline: Option<Instant>,
	apps: Vec<App>,
	/// Indices into `apps`.
	pending_apps: BTreeSet<usize>,
	launcher: Box<dyn AppLauncher>,
	ids: ClientIdGenerator,
	clients: BTreeMap<ClientKey, Registered>,
	shutdown_clients: HashSet<ClientKey>,
	phase2_clients: HashSet<ClientKey>,
	condition_clients: HashSet<ClientKey>,
	interact_clients: VecDeque<ClientKey>,
	phase2_started: bool,
	shutdown_finished: bool,
	events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
	/// Creates a session in the Startup phase together with the receiving end
	/// of its event stream.
	pub fn new(apps: Vec<App>, launcher: Box<dyn AppLauncher>) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
		let (events, events_rx) = mpsc::unbounded_channel();
		let session = Self {
			name: None,
			phase: SessionPhase::Startup,
			phase_timeout: PHASE_TIMEOUT,
			phase_deadline: None,
			apps,
			pending_apps: BTreeSet::new(),
			launcher,
			ids: ClientIdGenerator::new(),
			clients: BTreeMap::new(),
			shutdown_clients: HashSet::new(),
			phase2_clients: HashSet::new(),
			condition_clients: HashSet::new(),
			interact_clients: VecDeque::new(),
			phase2_started: false,
			shutdown_finished: false,
			events,
		};
		(session, events_rx)
	}

	pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
		self.phase_timeout = timeout;
		self
	}

	pub fn with_id_generator(mut self, ids: ClientIdGenerator) -> Self {
		self.ids = ids;
		self
	}

	pub fn name(&self) -> Option<&str> {
		self.name.as_deref()
	}

	pub fn set_name(&mut self, name: impl Into<String>) {
		self.name = Some(name.into());
	}

	pub fn phase(&self) -> SessionPhase {
		self.phase
	}

	pub fn apps(&self) -> &[App] {
		&self.apps
	}

	/// Applications the current startup phase is still waiting for.
	pub fn pending_apps(&self) -> impl Iterator<Item = &App> {
		self.pending_apps.iter().map(|&index| &self.apps[index])
	}

	/// When the current phase gives up on its pending applications.
	pub fn next_deadline(&self) -> Option<Instant> {
		self.phase_deadline
	}

	pub fn client_count(&self) -> usize {
		self.clients.len()
	}

	/// Registered clients with their identifiers, in key order.
	pub fn clients(&self) -> impl Iterator<Item = (ClientKey, &str, &dyn Client)> {
		self.clients
			.iter()
			.map(|(&key, registered)| (key, registered.client_id.as_str(), registered.client.as_ref()))
	}

	pub fn client(&self, key: ClientKey) -> Option<&(dyn Client + 'static)> {
		self.clients.get(&key).map(|registered| registered.client.as_ref())
	}

	pub fn client_mut(&mut self, key: ClientKey) -> Option<&mut (dyn Client + 'static)> {
		self.clients.get_mut(&key).map(|registered| registered.client.as_mut())
	}

	pub fn key_for_id(&self, client_id: &str) -> Option<ClientKey> {
		self.clients
			.iter()
			.find(|(_, registered)| registered.client_id == client_id)
			.map(|(&key, _)| key)
	}

	/// Client currently allowed to interact with the user.
	pub fn interacting_client(&self) -> Option<ClientKey> {
		self.interact_clients.front().copied()
	}

	/// Begins startup with the Initialization phase.
	pub fn start(&mut self) {
		if self.phase != SessionPhase::Startup {
			warn!(target = "gsm.session", phase = %self.phase, "session already started");
			return;
		}
		self.set_phase(SessionPhase::Initialization);
		self.start_phase();
	}

	/// Ends the current phase if its deadline has passed by `now`.
	pub fn handle_timeout(&mut self, now: Instant) {
		let Some(deadline) = self.phase_deadline else {
			return;
		};
		if now < deadline {
			return;
		}
		self.phase_deadline = None;

		let timed_out: Vec<String> = self.pending_apps().map(|app| app.basename().to_string()).collect();
		for app in timed_out {
			warn!(target = "gsm.session", app = %app, phase = %self.phase, "application failed to register before timeout");
			self.emit(SessionEvent::AppTimedOut { app });
		}
		self.end_phase();
	}

	/// Registers a connected client, minting an identifier unless it
	/// presents `previous_id`.
	pub fn register_client(
		&mut self,
		key: ClientKey,
		mut client: Box<dyn Client>,
		previous_id: Option<&str>,
	) -> std::result::Result<String, Rejected> {
		if self.phase == SessionPhase::Shutdown {
			warn!(target = "gsm.session", client = %client.description(), "refusing registration during shutdown");
			return Err(Rejected {
				client,
				error: SessionError::ShuttingDown,
			});
		}

		let previous_id = previous_id.filter(|id| !id.is_empty());
		let client_id = match previous_id {
			Some(id) if self.key_for_id(id).is_some() => {
				warn!(target = "gsm.session", client_id = id, "client id already in use");
				return Err(Rejected {
					client,
					error: SessionError::DuplicateClientId(id.to_string()),
				});
			}
			Some(id) => id.to_string(),
			None => self.ids.generate(),
		};

		client.registered(&client_id, previous_id.is_some());
		info!(target = "gsm.session", key = %key, client_id = %client_id, resumed = previous_id.is_some(), "client registered");
		self.clients.insert(
			key,
			Registered {
				client_id: client_id.clone(),
				client,
			},
		);

		if previous_id.is_some() && self.phase < SessionPhase::Application {
			let matched = self
				.pending_apps
				.iter()
				.copied()
				.find(|&index| self.apps[index].client_id() == Some(client_id.as_str()));
			if let Some(index) = matched {
				self.app_registered(index);
			}
		}

		Ok(client_id)
	}

	/// Marks the pending Initialization application with process `pid` as
	/// registered. Returns whether one matched.
	pub fn app_exited(&mut self, pid: u32) -> bool {
		let matched = self.pending_apps.iter().copied().find(|&index| {
			let app = &self.apps[index];
			app.phase() == SessionPhase::Initialization && app.pid() == Some(pid)
		});
		match matched {
			Some(index) => {
				self.app_registered(index);
				true
			}
			None => false,
		}
	}

	/// Feeds a lifecycle event reported by client `key`.
	pub fn handle_client_event(&mut self, key: ClientKey, event: ClientEvent) -> Result<()> {
		if !self.clients.contains_key(&key) {
			return Err(SessionError::UnknownClient(key));
		}
		debug!(target = "gsm.session", key = %key, event = ?event, "client event");

		match event {
			ClientEvent::SavedState => {
				debug!(target = "gsm.session", key = %key, "client saved state");
			}
			ClientEvent::RequestPhase2 => {
				if self.shutdown_clients.remove(&key) {
					self.phase2_clients.insert(key);
					self.check_shutdown_barrier();
				}
			}
			ClientEvent::RequestInteraction => {
				self.interact_clients.push_back(key);
				if self.interact_clients.len() == 1 {
					self.grant_interaction();
				}
			}
			ClientEvent::InteractionDone { cancel_shutdown } => {
				if self.interact_clients.front() != Some(&key) {
					warn!(target = "gsm.session", key = %key, "interaction done from a client that is not interacting");
					return Ok(());
				}
				// A cancel outside of Shutdown is only worth a log line; the
				// turn still passes on.
				if !cancel_shutdown || self.cancel_shutdown().is_err() {
					self.interact_clients.pop_front();
					self.grant_interaction();
				}
			}
			ClientEvent::SaveYourselfDone => {
				self.shutdown_clients.remove(&key);
				self.phase2_clients.remove(&key);
				self.drop_interactor(key);
				self.check_shutdown_barrier();
			}
			ClientEvent::Disconnected => self.client_disconnected(key),
			ClientEvent::RequestLogout => self.initiate_shutdown(),
		}
		Ok(())
	}

	/// Asks every client to save and quit. No-op when already shutting down.
	pub fn initiate_shutdown(&mut self) {
		if self.phase == SessionPhase::Shutdown {
			return;
		}
		self.set_phase(SessionPhase::Shutdown);
		self.pending_apps.clear();
		self.phase_deadline = None;
		self.phase2_started = false;
		self.shutdown_finished = false;

		if self.clients.is_empty() {
			self.finish_shutdown();
			return;
		}
		for (&key, registered) in self.clients.iter_mut() {
			self.shutdown_clients.insert(key);
			registered.client.save_yourself(false);
		}
	}

	/// Ends an in-progress shutdown without waiting for the remaining
	/// clients: every client is told to die and `ShutdownCompleted` fires.
	/// No-op outside of Shutdown or once shutdown has completed.
	pub fn force_shutdown(&mut self) {
		if self.phase != SessionPhase::Shutdown || self.shutdown_finished {
			return;
		}
		warn!(
			target = "gsm.session",
			outstanding = self.shutdown_clients.len() + self.phase2_clients.len(),
			"forcing shutdown"
		);
		self.finish_shutdown();
	}

	/// Aborts an in-progress shutdown and returns to Running.
	pub fn cancel_shutdown(&mut self) -> Result<()> {
		if self.phase != SessionPhase::Shutdown {
			warn!(target = "gsm.session", phase = %self.phase, "cannot cancel shutdown outside of shutdown");
			return Err(SessionError::NotShuttingDown);
		}
		info!(target = "gsm.session", "shutdown cancelled");
		self.set_phase(SessionPhase::Running);
		self.shutdown_clients.clear();
		self.phase2_clients.clear();
		self.interact_clients.clear();
		self.phase2_started = false;
		self.shutdown_finished = false;
		for registered in self.clients.values_mut() {
			registered.client.shutdown_cancelled();
		}
		Ok(())
	}

	/// Asks every client for a local checkpoint.
	pub fn request_checkpoint(&mut self) -> Result<()> {
		if self.phase == SessionPhase::Shutdown {
			return Err(SessionError::ShuttingDown);
		}
		for registered in self.clients.values_mut() {
			registered.client.save_state();
		}
		Ok(())
	}

	/// Stops a client whose autostart condition no longer holds. It is not
	/// restarted when it goes away.
	pub fn disable_client(&mut self, key: ClientKey) -> Result<()> {
		let registered = self.clients.get_mut(&key).ok_or(SessionError::UnknownClient(key))?;
		info!(target = "gsm.session", client = %registered.client.description(), "stopping disabled client");
		self.condition_clients.insert(key);
		registered.client.die();
		Ok(())
	}

	fn emit(&self, event: SessionEvent) {
		// The receiver going away only means nobody is listening.
		let _ = self.events.send(event);
	}

	fn set_phase(&mut self, phase: SessionPhase) {
		info!(target = "gsm.session", phase = %phase, "entering phase");
		self.phase = phase;
		self.emit(SessionEvent::PhaseChanged(phase));
	}

	fn start_phase(&mut self) {
		let phase = self.phase;
		debug!(target = "gsm.session", phase = %phase, "starting phase");
		self.pending_apps.clear();

		for index in 0..self.apps.len() {
			if self.apps[index].phase() != phase {
				continue;
			}
			if self.apps[index].is_disabled() {
				debug!(target = "gsm.session", app = %self.apps[index].basename(), "skipping disabled application");
				continue;
			}
			let client_id = self.ids.generate();
			let app = &mut self.apps[index];
			app.set_client_id(client_id);
			match self.launcher.launch(app) {
				Ok(pid) => {
					debug!(target = "gsm.session", app = %app.basename(), pid, "launched application");
					app.set_pid(pid);
					// Regular applications are not waited for.
					if phase < SessionPhase::Application {
						self.pending_apps.insert(index);
					}
				}
				Err(err) => warn!(target = "gsm.session", error = %err, "could not launch application"),
			}
		}

		if self.pending_apps.is_empty() {
			self.end_phase();
		} else {
			// A timeout too large to represent means waiting indefinitely.
			self.phase_deadline = Instant::now().checked_add(self.phase_timeout);
		}
	}

	fn end_phase(&mut self) {
		self.pending_apps.clear();
		self.phase_deadline = None;
		self.set_phase(self.phase.next());
		if self.phase < SessionPhase::Running {
			self.start_phase();
		}
	}

	fn app_registered(&mut self, index: usize) {
		if !self.pending_apps.remove(&index) {
			return;
		}
		let app = self.apps[index].basename().to_string();
		info!(target = "gsm.session", app = %app, "application registered");
		self.emit(SessionEvent::AppRegistered { app });

		if self.pending_apps.is_empty() && self.phase < SessionPhase::Application {
			self.end_phase();
		}
	}

	fn grant_interaction(&mut self) {
		let Some(&key) = self.interact_clients.front() else {
			return;
		};
		if let Some(registered) = self.clients.get_mut(&key) {
			registered.client.interact();
		}
	}

	/// Removes `key` from the interaction queue, passing the turn on if it
	/// was interacting.
	fn drop_interactor(&mut self, key: ClientKey) {
		let was_head = self.interact_clients.front() == Some(&key);
		self.interact_clients.retain(|&queued| queued != key);
		if was_head {
			self.grant_interaction();
		}
	}

	fn check_shutdown_barrier(&mut self) {
		if self.phase != SessionPhase::Shutdown || self.shutdown_finished || !self.shutdown_clients.is_empty() {
			return;
		}
		if self.phase2_clients.is_empty() {
			self.finish_shutdown();
		} else if !self.phase2_started {
			self.phase2_started = true;
			debug!(target = "gsm.session", clients = self.phase2_clients.len(), "starting phase 2");
			for (key, registered) in self.clients.iter_mut() {
				if self.phase2_clients.contains(key) {
					registered.client.save_yourself_phase2();
				}
			}
		}
	}

	fn finish_shutdown(&mut self) {
		self.shutdown_finished = true;
		info!(target = "gsm.session", clients = self.clients.len(), "shutdown complete");
		for registered in self.clients.values_mut() {
			registered.client.die();
		}
		self.emit(SessionEvent::ShutdownCompleted);
	}

	fn client_disconnected(&mut self, key: ClientKey) {
		let Some(Registered { mut client, .. }) = self.clients.remove(&key) else {
			return;
		};
		debug!(target = "gsm.session", client = %client.description(), "client disconnected");

		self.shutdown_clients.remove(&key);
		self.phase2_clients.remove(&key);
		self.drop_interactor(key);

		if self.condition_clients.remove(&key) {
			debug!(target = "gsm.session", client = %client.description(), "not restarting disabled client");
		} else if self.phase != SessionPhase::Shutdown && client.autorestart() {
			info!(target = "gsm.session", client = %client.description(), "restarting client");
			if let Err(err) = client.restart() {
				warn!(target = "gsm.session", client = %client.description(), error = %err, "could not restart client");
			}
		}

		self.check_shutdown_barrier();
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("name", &self.name)
			.field("phase", &self.phase)
			.field("clients", &self.clients.len())
			.field("pending_apps", &self.pending_apps.len())
			.finish_non_exhaustive()
	}
}
