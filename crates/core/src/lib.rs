//! Session orchestration for an XSMP session manager.
//!
//! The crate is transport-agnostic: connected participants are seen through
//! the [`Client`] trait and report protocol activity as [`ClientEvent`]s,
//! which the owner of the [`Session`] feeds back through
//! [`Session::handle_client_event`]. Timers are exposed as deadlines
//! ([`Session::next_deadline`]) so the caller's event loop decides how to
//! wait for them.
//!
//! The `gsm-runtime` crate provides the XSMP transport and event loop built
//! on top of this crate.

pub mod app;
pub mod client;
pub mod client_id;
pub mod desktop_entry;
pub mod error;
pub mod phase;
pub mod properties;
pub mod session;

pub use app::{App, AppLauncher, load_autostart_dirs};
pub use client::{Client, ClientEvent, ClientKey, SaveYourselfQueue};
pub use client_id::ClientIdGenerator;
pub use desktop_entry::DesktopEntry;
pub use error::{ClientError, DesktopEntryError, LaunchError, Result, SessionError};
pub use phase::SessionPhase;
pub use properties::PropertyList;
pub use session::{Rejected, Session, SessionEvent};

/// Re-export of the wire vocabulary.
pub use gsm_protocol as protocol;
