//! Session lifecycle phases.

use std::fmt;

/// Ordered lifecycle phase of a session.
///
/// Startup phases run in declaration order; the session only moves backwards
/// when a shutdown is cancelled (Shutdown -> Running).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SessionPhase {
	#[default]
	Startup,
	Initialization,
	WindowManager,
	Panel,
	Desktop,
	Application,
	Running,
	Shutdown,
}

impl SessionPhase {
	/// Phase following `self`; Shutdown is terminal.
	pub fn next(self) -> Self {
		match self {
			Self::Startup => Self::Initialization,
			Self::Initialization => Self::WindowManager,
			Self::WindowManager => Self::Panel,
			Self::Panel => Self::Desktop,
			Self::Desktop => Self::Application,
			Self::Application => Self::Running,
			Self::Running | Self::Shutdown => Self::Shutdown,
		}
	}

	/// Maps an `X-GNOME-Autostart-Phase` value; anything unknown runs with
	/// regular applications.
	pub fn from_autostart_tag(tag: &str) -> Self {
		match tag {
			"Initialization" => Self::Initialization,
			"WindowManager" => Self::WindowManager,
			"Panel" => Self::Panel,
			"Desktop" => Self::Desktop,
			_ => Self::Application,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Startup => "startup",
			Self::Initialization => "initialization",
			Self::WindowManager => "window-manager",
			Self::Panel => "panel",
			Self::Desktop => "desktop",
			Self::Application => "application",
			Self::Running => "running",
			Self::Shutdown => "shutdown",
		}
	}
}

impl fmt::Display for SessionPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn startup_phases_are_ordered() {
		let mut phase = SessionPhase::Startup;
		let mut seen = vec![phase];
		while phase < SessionPhase::Running {
			let next = phase.next();
			assert!(next > phase);
			phase = next;
			seen.push(phase);
		}
		assert_eq!(seen.len(), 7);
		assert_eq!(SessionPhase::Shutdown.next(), SessionPhase::Shutdown);
	}

	#[test]
	fn unknown_autostart_tag_maps_to_application() {
		assert_eq!(SessionPhase::from_autostart_tag("Panel"), SessionPhase::Panel);
		assert_eq!(SessionPhase::from_autostart_tag("panel"), SessionPhase::Application);
		assert_eq!(SessionPhase::from_autostart_tag(""), SessionPhase::Application);
	}
}
