//! Runtime for the `gsm` session manager.
//!
//! Wraps the transport-agnostic orchestrator from `gsm-rs` with everything
//! that touches the operating system:
//!
//! * [`listener`]: the local socket clients connect to, and its network id
//! * [`connection`] / [`xsmp_client`]: per-connection I/O tasks and the
//!   [`gsm::Client`] implementation speaking the wire protocol
//! * [`authority`]: ICE authority file entries for the listener
//! * [`launcher`]: spawning autostart applications and restart commands
//! * [`control`]: the control socket used by the command line
//! * [`manager`]: the event loop tying it all together

pub mod authority;
pub mod connection;
pub mod control;
pub mod error;
pub mod launcher;
pub mod listener;
pub mod manager;
pub mod xsmp_client;

pub use error::{AuthorityError, Result, RuntimeError};
pub use manager::{ManagerConfig, SessionManager};
pub use xsmp_client::XsmpClient;
