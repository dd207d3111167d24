//! Session participants as seen by the orchestrator.

use std::fmt;

use downcast_rs::{Downcast, impl_downcast};
use gsm_protocol::SaveType;

use crate::error::ClientError;

/// Transport-assigned handle for a connected client.
///
/// Keys are unique for the lifetime of the process; unlike client IDs they
/// exist before registration completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(u64);

impl ClientKey {
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ClientKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Lifecycle events a client reports to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
	/// A local checkpoint finished.
	SavedState,
	/// The client wants to finish saving after every other client is done.
	RequestPhase2,
	/// The client wants to prompt the user.
	RequestInteraction,
	/// The client finished prompting; `cancel_shutdown` aborts the logout.
	InteractionDone { cancel_shutdown: bool },
	/// The client finished its shutdown save.
	SaveYourselfDone,
	/// The connection is gone.
	Disconnected,
	/// The client asked for a session-wide logout.
	RequestLogout,
}

/// A connected session participant.
///
/// Capability operations are fire-and-forget: the answer, if any, comes back
/// later as a [`ClientEvent`].
pub trait Client: Downcast + Send {
	/// Identifier assigned at registration.
	fn client_id(&self) -> Option<&str>;

	/// Diagnostic label.
	fn description(&self) -> &str;

	fn pid(&self) -> Option<u32>;

	fn desktop_file(&self) -> Option<String>;

	fn restart_command(&self) -> Option<String>;

	fn discard_command(&self) -> Option<String>;

	/// Whether the client asked to be restarted as soon as it exits.
	fn autorestart(&self) -> bool;

	/// Completes registration under `client_id`. `resumed` is true when the
	/// client supplied the identifier itself.
	fn registered(&mut self, client_id: &str, resumed: bool);

	fn restart(&mut self) -> Result<(), ClientError>;

	/// Requests a silent local checkpoint.
	fn save_state(&mut self);

	/// Requests a shutdown save. `save_state` selects a full save over a
	/// global flush.
	fn save_yourself(&mut self, save_state: bool);

	fn save_yourself_phase2(&mut self);

	fn interact(&mut self);

	fn shutdown_cancelled(&mut self);

	fn die(&mut self);
}
impl_downcast!(Client);

/// Per-client bookkeeping of in-flight and queued `SaveYourself` requests.
///
/// At most one request is in flight and at most one follows it; anything
/// beyond that is redundant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveYourselfQueue {
	current: Option<SaveType>,
	next: Option<SaveType>,
}

impl SaveYourselfQueue {
	pub fn current(&self) -> Option<SaveType> {
		self.current
	}

	pub fn next(&self) -> Option<SaveType> {
		self.next
	}

	/// Records a request and returns the save type to dispatch now, if any.
	pub fn request(&mut self, save_type: SaveType) -> Option<SaveType> {
		if self.next.is_some() {
			None
		} else if self.current.is_some() {
			self.next = Some(save_type);
			None
		} else {
			self.current = Some(save_type);
			Some(save_type)
		}
	}

	/// Finishes the in-flight request.
	///
	/// Returns the save type that just completed and the queued follow-up
	/// that must be dispatched now.
	pub fn complete(&mut self) -> (Option<SaveType>, Option<SaveType>) {
		let finished = self.current.take();
		let follow_up = self.next.take().and_then(|save_type| self.request(save_type));
		(finished, follow_up)
	}
}
