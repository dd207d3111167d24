//! [`Client`] implementation for connections speaking the wire protocol.

use gsm::protocol::{ClientMessage, InteractStyle, ManagerMessage, PROGRAM, SaveType};
use gsm::{Client, ClientError, ClientEvent, ClientKey, PropertyList, SaveYourselfQueue};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::launcher::ChildEnv;

/// A connected XSMP client.
///
/// Outgoing messages go to the connection's writer task; incoming ones are
/// fed through [`XsmpClient::process`], which answers what it can on its own
/// and returns the lifecycle events the session has to handle.
#[derive(Debug)]
pub struct XsmpClient {
	key: ClientKey,
	client_id: Option<String>,
	description: String,
	properties: PropertyList,
	saves: SaveYourselfQueue,
	outgoing: mpsc::UnboundedSender<ManagerMessage>,
	env: ChildEnv,
}

impl XsmpClient {
	pub fn new(key: ClientKey, outgoing: mpsc::UnboundedSender<ManagerMessage>, env: ChildEnv) -> Self {
		let mut client = Self {
			key,
			client_id: None,
			description: String::new(),
			properties: PropertyList::new(),
			saves: SaveYourselfQueue::default(),
			outgoing,
			env,
		};
		client.update_description();
		client
	}

	pub fn key(&self) -> ClientKey {
		self.key
	}

	pub fn properties(&self) -> &PropertyList {
		&self.properties
	}

	pub fn saves(&self) -> SaveYourselfQueue {
		self.saves
	}

	/// Answers a refused registration.
	pub fn refuse(&self, reason: impl Into<String>) {
		self.send(ManagerMessage::RegistrationRefused { reason: reason.into() });
	}

	/// Handles a message received after registration.
	pub fn process(&mut self, message: ClientMessage) -> Vec<ClientEvent> {
		match message {
			ClientMessage::RegisterClient { .. } => {
				warn!(target = "gsm.xsmp", client = %self.description, "ignoring repeated registration");
				Vec::new()
			}
			ClientMessage::InteractRequest { dialog_type } => {
				debug!(target = "gsm.xsmp", client = %self.description, ?dialog_type, "interaction requested");
				vec![ClientEvent::RequestInteraction]
			}
			ClientMessage::InteractDone { cancel_shutdown } => vec![ClientEvent::InteractionDone { cancel_shutdown }],
			ClientMessage::SaveYourselfRequest {
				save_type,
				shutdown,
				global,
				..
			} => match (shutdown, global) {
				(true, true) => vec![ClientEvent::RequestLogout],
				(false, false) => {
					self.do_save_yourself(SaveType::Local);
					Vec::new()
				}
				_ => {
					warn!(
						target = "gsm.xsmp",
						client = %self.description,
						?save_type,
						shutdown,
						global,
						"unsupported save-yourself request"
					);
					Vec::new()
				}
			},
			ClientMessage::SaveYourselfPhase2Request => {
				if self.saves.current() == Some(SaveType::Local) {
					// Local checkpoints have no barrier to wait for.
					self.send(ManagerMessage::SaveYourselfPhase2);
					Vec::new()
				} else {
					vec![ClientEvent::RequestPhase2]
				}
			}
			ClientMessage::SaveYourselfDone { success } => {
				if !success {
					warn!(target = "gsm.xsmp", client = %self.description, "client reported a failed save");
				}
				let (finished, follow_up) = self.saves.complete();
				let event = if finished == Some(SaveType::Local) {
					self.send(ManagerMessage::SaveComplete);
					ClientEvent::SavedState
				} else {
					ClientEvent::SaveYourselfDone
				};
				if let Some(save_type) = follow_up {
					self.dispatch(save_type);
				}
				vec![event]
			}
			ClientMessage::CloseConnection { reasons } => {
				info!(target = "gsm.xsmp", client = %self.description, reasons = ?reasons, "client closed connection");
				vec![ClientEvent::Disconnected]
			}
			ClientMessage::SetProperties { properties } => {
				let mut program_changed = false;
				for property in properties {
					program_changed |= property.name == PROGRAM;
					self.properties.set(property);
				}
				if program_changed {
					self.update_description();
				}
				Vec::new()
			}
			ClientMessage::DeleteProperties { names } => {
				for name in &names {
					self.properties.delete(name);
				}
				if names.iter().any(|name| name == PROGRAM) {
					self.update_description();
				}
				Vec::new()
			}
			ClientMessage::GetProperties => {
				self.send(ManagerMessage::PropertiesReply {
					properties: self.properties.to_vec(),
				});
				Vec::new()
			}
		}
	}

	fn send(&self, message: ManagerMessage) {
		if self.outgoing.send(message).is_err() {
			debug!(target = "gsm.xsmp", client = %self.description, "connection already closed");
		}
	}

	fn update_description(&mut self) {
		self.description = format!(
			"{} [{} {}]",
			self.key,
			self.properties.program().unwrap_or("?"),
			self.client_id.as_deref().unwrap_or("?"),
		);
	}

	fn do_save_yourself(&mut self, save_type: SaveType) {
		match self.saves.request(save_type) {
			Some(save_type) => self.dispatch(save_type),
			None => debug!(target = "gsm.xsmp", client = %self.description, ?save_type, "save already in progress, queued or dropped"),
		}
	}

	fn dispatch(&self, save_type: SaveType) {
		debug!(target = "gsm.xsmp", client = %self.description, ?save_type, "requesting save");
		let message = match save_type {
			SaveType::Local => ManagerMessage::SaveYourself {
				save_type,
				shutdown: false,
				interact_style: InteractStyle::None,
				fast: false,
			},
			SaveType::Global | SaveType::Both => ManagerMessage::SaveYourself {
				save_type,
				shutdown: true,
				interact_style: InteractStyle::Any,
				fast: false,
			},
		};
		self.send(message);
	}
}

impl Client for XsmpClient {
	fn client_id(&self) -> Option<&str> {
		self.client_id.as_deref()
	}

	fn description(&self) -> &str {
		&self.description
	}

	fn pid(&self) -> Option<u32> {
		self.properties.pid()
	}

	fn desktop_file(&self) -> Option<String> {
		self.properties.desktop_file().map(str::to_string)
	}

	fn restart_command(&self) -> Option<String> {
		self.properties.restart_command()
	}

	fn discard_command(&self) -> Option<String> {
		self.properties.discard_command()
	}

	fn autorestart(&self) -> bool {
		self.properties.autorestart()
	}

	fn registered(&mut self, client_id: &str, resumed: bool) {
		self.client_id = Some(client_id.to_string());
		self.update_description();
		self.send(ManagerMessage::RegisterClientReply {
			client_id: client_id.to_string(),
		});
		if !resumed {
			self.do_save_yourself(SaveType::Local);
		}
	}

	fn restart(&mut self) -> Result<(), ClientError> {
		let argv = self.properties.restart_argv().ok_or(ClientError::NoRestartCommand)?;
		let pid = self.env.spawn(argv).map_err(|source| ClientError::Spawn {
			command: gsm::properties::quote_command(argv),
			source,
		})?;
		info!(target = "gsm.xsmp", client = %self.description, pid, "restarted client");
		Ok(())
	}

	fn save_state(&mut self) {
		self.do_save_yourself(SaveType::Local);
	}

	fn save_yourself(&mut self, save_state: bool) {
		self.do_save_yourself(if save_state { SaveType::Both } else { SaveType::Global });
	}

	fn save_yourself_phase2(&mut self) {
		self.send(ManagerMessage::SaveYourselfPhase2);
	}

	fn interact(&mut self) {
		self.send(ManagerMessage::Interact);
	}

	fn shutdown_cancelled(&mut self) {
		self.send(ManagerMessage::ShutdownCancelled);
	}

	fn die(&mut self) {
		self.send(ManagerMessage::Die);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gsm::protocol::{PROCESS_ID, Property, RESTART_COMMAND, RESTART_STYLE_HINT};

	fn client() -> (XsmpClient, mpsc::UnboundedReceiver<ManagerMessage>) {
		let (outgoing, rx) = mpsc::unbounded_channel();
		(XsmpClient::new(ClientKey::new(4), outgoing, ChildEnv::default()), rx)
	}

	fn drain(rx: &mut mpsc::UnboundedReceiver<ManagerMessage>) -> Vec<ManagerMessage> {
		let mut out = Vec::new();
		while let Ok(message) = rx.try_recv() {
			out.push(message);
		}
		out
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

	#[test]
	fn fresh_registration_gets_initial_checkpoint() {
		let (mut client, mut rx) = client();
		client.registered("10abc", false);
		assert_eq!(
			drain(&mut rx),
			[ManagerMessage::RegisterClientReply { client_id: "10abc".into() }, local_save()]
		);
		assert_eq!(client.description(), "#4 [? 10abc]");
	}

	#[test]
	fn resumed_registration_only_replies() {
		let (mut client, mut rx) = client();
		client.registered("10abc", true);
		assert_eq!(drain(&mut rx), [ManagerMessage::RegisterClientReply { client_id: "10abc".into() }]);
	}

	#[test]
	fn local_done_completes_and_dispatches_queued_save() {
		let (mut client, mut rx) = client();
		client.registered("10abc", false);
		client.save_yourself(false);
		client.save_yourself(false);
		drain(&mut rx);

		let events = client.process(ClientMessage::SaveYourselfDone { success: true });
		assert_eq!(events, [ClientEvent::SavedState]);
		assert_eq!(drain(&mut rx), [ManagerMessage::SaveComplete, global_save()]);

		let events = client.process(ClientMessage::SaveYourselfDone { success: true });
		assert_eq!(events, [ClientEvent::SaveYourselfDone]);
		assert!(drain(&mut rx).is_empty());
	}

	#[test]
	fn phase2_during_local_checkpoint_is_answered_directly() {
		let (mut client, mut rx) = client();
		client.registered("10abc", false);
		drain(&mut rx);
		assert!(client.process(ClientMessage::SaveYourselfPhase2Request).is_empty());
		assert_eq!(drain(&mut rx), [ManagerMessage::SaveYourselfPhase2]);

		client.process(ClientMessage::SaveYourselfDone { success: true });
		client.save_yourself(false);
		assert_eq!(
			client.process(ClientMessage::SaveYourselfPhase2Request),
			[ClientEvent::RequestPhase2]
		);
	}

	#[test]
	fn save_yourself_requests_map_to_logout_or_checkpoint() {
		let (mut client, mut rx) = client();
		client.registered("10abc", true);
		drain(&mut rx);

		let request = |shutdown, global| ClientMessage::SaveYourselfRequest {
			save_type: SaveType::Both,
			shutdown,
			interact_style: InteractStyle::Any,
			fast: false,
			global,
		};
		assert_eq!(client.process(request(true, true)), [ClientEvent::RequestLogout]);
		assert!(client.process(request(true, false)).is_empty());
		assert!(drain(&mut rx).is_empty());

		assert!(client.process(request(false, false)).is_empty());
		assert_eq!(drain(&mut rx), [local_save()]);
	}

	#[test]
	fn properties_update_description_and_accessors() {
		let (mut client, mut rx) = client();
		client.registered("10abc", true);
		client.process(ClientMessage::SetProperties {
			properties: vec![
				Property::array8(PROGRAM, "browse"),
				Property::array8(PROCESS_ID, "321"),
				Property::list(RESTART_COMMAND, ["browse", "--resume"]),
				Property::card8(RESTART_STYLE_HINT, 2),
			],
		});
		assert_eq!(client.description(), "#4 [browse 10abc]");
		assert_eq!(client.pid(), Some(321));
		assert_eq!(client.restart_command().as_deref(), Some("browse --resume"));
		assert!(client.autorestart());

		client.process(ClientMessage::DeleteProperties {
			names: vec![PROGRAM.into(), RESTART_STYLE_HINT.into()],
		});
		assert_eq!(client.description(), "#4 [? 10abc]");
		assert!(!client.autorestart());

		drain(&mut rx);
		client.process(ClientMessage::GetProperties);
		match drain(&mut rx).as_slice() {
			[ManagerMessage::PropertiesReply { properties }] => {
				let names: Vec<_> = properties.iter().map(|p| p.name.as_str()).collect();
				assert_eq!(names, [PROCESS_ID, RESTART_COMMAND]);
			}
			other => panic!("unexpected messages {other:?}"),
		}
	}

	#[test]
	fn close_connection_is_a_disconnect() {
		let (mut client, _rx) = client();
		let events = client.process(ClientMessage::CloseConnection {
			reasons: vec!["bye".into()],
		});
		assert_eq!(events, [ClientEvent::Disconnected]);
	}

	#[test]
	fn restart_without_command_fails() {
		let (mut client, _rx) = client();
		assert!(matches!(client.restart(), Err(ClientError::NoRestartCommand)));
	}

	#[test]
	fn lifecycle_messages_are_forwarded() {
		let (mut client, mut rx) = client();
		client.interact();
		client.save_yourself_phase2();
		client.shutdown_cancelled();
		client.die();
		assert_eq!(
			drain(&mut rx),
			[
				ManagerMessage::Interact,
				ManagerMessage::SaveYourselfPhase2,
				ManagerMessage::ShutdownCancelled,
				ManagerMessage::Die,
			]
		);
	}
}
