//! XSMP messages and properties as they travel between `gsm` and its clients.
//!
//! A client opens with [`ClientMessage::RegisterClient`] and the manager
//! answers with [`ManagerMessage::RegisterClientReply`] or
//! [`ManagerMessage::RegistrationRefused`]. After that, the save-yourself
//! exchange runs in both directions:
//! `SaveYourself` leads to optional `InteractRequest`/`SaveYourselfPhase2Request`
//! and then `SaveYourselfDone`, which is followed by `Die` or `SaveComplete`.
//! Property values keep their XSMP types (`CARD8`, `ARRAY8`,
//! `LISTofARRAY8`) so restart hints and commands survive a resumed session.
//!
//! Every message is a single JSON object on its own line, tagged by `type`.
//! [`ControlRequest`]/[`ControlResponse`] use the same framing on the
//! control socket.

pub mod control;
pub mod message;
pub mod property;

pub use control::*;
pub use message::*;
pub use property::*;
