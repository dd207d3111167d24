//! XSMP client identifier generation.
//!
//! XSMP defines a client ID as a version digit, an address type plus address,
//! a 13 digit millisecond timestamp, a process-id field and a 4 digit
//! sequence number. The address part is supposed to make IDs globally
//! unique, but a LAN address ("192.168.1.*") is a poor discriminator, so the
//! address-type "0" variant with random hex digits is used instead, the same
//! format GNOME and KDE session managers settled on:
//!
//! `"1" "0" rand1 rand2 seconds micros pid sequence`

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Produces process-locally unique client identifiers.
///
/// The two random seeds are drawn once per generator; the sequence counter
/// rolls over every 10000 identifiers.
#[derive(Debug, Clone)]
pub struct ClientIdGenerator {
	rand1: u32,
	rand2: u32,
	pid: u32,
	sequence: u16,
}

impl ClientIdGenerator {
	pub fn new() -> Self {
		let mut rng = rand::thread_rng();
		Self::with_seeds(rng.r#gen(), rng.r#gen(), std::process::id())
	}

	pub fn with_seeds(rand1: u32, rand2: u32, pid: u32) -> Self {
		Self {
			rand1,
			rand2,
			pid,
			sequence: 0,
		}
	}

	/// Generates a new identifier stamped with the current wall-clock time.
	pub fn generate(&mut self) -> String {
		let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
		self.generate_at(since_epoch)
	}

	fn generate_at(&mut self, since_epoch: Duration) -> String {
		let sequence = self.sequence;
		self.sequence = (self.sequence + 1) % 10000;
		format!(
			"10{:04x}{:04x}{:010}{:03}{:010}{:04}",
			self.rand1,
			self.rand2,
			since_epoch.as_secs(),
			since_epoch.subsec_micros(),
			self.pid,
			sequence
		)
	}
}

impl Default for ClientIdGenerator {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identifier_follows_fixed_field_layout() {
		let mut generator = ClientIdGenerator::with_seeds(0xdead_beef, 0x1f, 4242);
		let id = generator.generate_at(Duration::new(1_700_000_000, 5_000));
		assert_eq!(id, "10deadbeef001f170000000000500000042420000");
	}

	#[test]
	fn sequence_rolls_over_after_ten_thousand() {
		let mut generator = ClientIdGenerator::with_seeds(1, 2, 3);
		let at = Duration::from_secs(10);
		let first = generator.generate_at(at);
		for _ in 1..10000 {
			generator.generate_at(at);
		}
		let wrapped = generator.generate_at(at);
		assert!(first.ends_with("0000"));
		assert_eq!(first, wrapped);
	}

	#[test]
	fn identifiers_within_a_process_are_distinct() {
		let mut generator = ClientIdGenerator::new();
		let ids: std::collections::HashSet<String> = (0..500).map(|_| generator.generate()).collect();
		assert_eq!(ids.len(), 500);
	}
}
