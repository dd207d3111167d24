//! ICE authority file handling.
//!
//! Clients find the cookie for our listener in the ICE authority file
//! (`$ICEAUTHORITY` or `~/.ICEauthority`). Each entry is five fields, each a
//! big-endian `u16` length followed by that many bytes: protocol name,
//! protocol data, network id, auth name and auth data. Updates happen under
//! the same advisory lock `iceauth` uses.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::AuthorityError;

pub const ICE_PROTOCOL: &str = "ICE";
pub const XSMP_PROTOCOL: &str = "XSMP";
pub const MAGIC_COOKIE_AUTH: &str = "MIT-MAGIC-COOKIE-1";
pub const MAGIC_COOKIE_LEN: usize = 16;

const LOCK_RETRIES: u32 = 10;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(600);

type Result<T> = std::result::Result<T, AuthorityError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
	pub protocol_name: String,
	pub protocol_data: Vec<u8>,
	pub network_id: String,
	pub auth_name: String,
	pub auth_data: Vec<u8>,
}

impl AuthEntry {
	/// A fresh `MIT-MAGIC-COOKIE-1` entry for `protocol` on `network_id`.
	pub fn magic_cookie(protocol: &str, network_id: &str) -> Self {
		let cookie: [u8; MAGIC_COOKIE_LEN] = rand::random();
		Self {
			protocol_name: protocol.to_string(),
			protocol_data: Vec::new(),
			network_id: network_id.to_string(),
			auth_name: MAGIC_COOKIE_AUTH.to_string(),
			auth_data: cookie.to_vec(),
		}
	}
}

/// Decodes a whole authority file. Returns `None` on a truncated entry.
pub fn decode_entries(mut bytes: &[u8]) -> Option<Vec<AuthEntry>> {
	fn field<'a>(bytes: &mut &'a [u8]) -> Option<&'a [u8]> {
		let current: &'a [u8] = *bytes;
		let (len, rest) = current.split_first_chunk::<2>()?;
		let len = u16::from_be_bytes(*len) as usize;
		if rest.len() < len {
			return None;
		}
		let (value, rest) = rest.split_at(len);
		*bytes = rest;
		Some(value)
	}
	let text = |raw: &[u8]| String::from_utf8_lossy(raw).into_owned();

	let mut entries = Vec::new();
	while !bytes.is_empty() {
		entries.push(AuthEntry {
			protocol_name: text(field(&mut bytes)?),
			protocol_data: field(&mut bytes)?.to_vec(),
			network_id: text(field(&mut bytes)?),
			auth_name: text(field(&mut bytes)?),
			auth_data: field(&mut bytes)?.to_vec(),
		});
	}
	Some(entries)
}

pub fn encode_entries(entries: &[AuthEntry]) -> Vec<u8> {
	fn field(out: &mut Vec<u8>, value: &[u8]) {
		let len = value.len().min(u16::MAX as usize);
		out.extend_from_slice(&(len as u16).to_be_bytes());
		out.extend_from_slice(&value[..len]);
	}

	let mut out = Vec::new();
	for entry in entries {
		field(&mut out, entry.protocol_name.as_bytes());
		field(&mut out, &entry.protocol_data);
		field(&mut out, entry.network_id.as_bytes());
		field(&mut out, entry.auth_name.as_bytes());
		field(&mut out, &entry.auth_data);
	}
	out
}

/// An ICE authority file and its locking policy.
#[derive(Debug, Clone)]
pub struct IceAuthority {
	path: PathBuf,
	retries: u32,
	retry_interval: Duration,
	stale_after: Duration,
}

impl IceAuthority {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			retries: LOCK_RETRIES,
			retry_interval: LOCK_RETRY_INTERVAL,
			stale_after: LOCK_STALE_AFTER,
		}
	}

	/// `$ICEAUTHORITY`, falling back to `~/.ICEauthority`.
	pub fn default_location() -> Result<PathBuf> {
		if let Some(path) = std::env::var_os("ICEAUTHORITY").filter(|p| !p.is_empty()) {
			return Ok(PathBuf::from(path));
		}
		dirs::home_dir()
			.map(|home| home.join(".ICEauthority"))
			.ok_or(AuthorityError::NoLocation)
	}

	pub fn with_lock_retries(mut self, retries: u32, interval: Duration) -> Self {
		self.retries = retries;
		self.retry_interval = interval;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Takes the advisory lock, retrying while another process holds it.
	pub async fn lock(&self) -> Result<AuthorityLock> {
		let creat = suffixed(&self.path, "-c");
		let link = suffixed(&self.path, "-l");
		self.break_stale(&creat);
		self.break_stale(&link);

		for attempt in 0..self.retries {
			if attempt > 0 {
				tokio::time::sleep(self.retry_interval).await;
			}
			match OpenOptions::new().write(true).create_new(true).mode(0o600).open(&creat) {
				Ok(_) => match fs::hard_link(&creat, &link) {
					Ok(()) => {
						debug!(target = "gsm.authority", path = %self.path.display(), "locked authority file");
						return Ok(AuthorityLock { creat, link });
					}
					Err(err) if err.kind() == ErrorKind::AlreadyExists => {
						let _ = fs::remove_file(&creat);
					}
					Err(source) => {
						let _ = fs::remove_file(&creat);
						return Err(AuthorityError::Io { path: link, source });
					}
				},
				Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
				Err(source) => return Err(AuthorityError::Io { path: creat, source }),
			}
			debug!(target = "gsm.authority", attempt, "authority file is locked by another process");
		}
		Err(AuthorityError::Locked { path: self.path.clone() })
	}

	fn break_stale(&self, lock_file: &Path) {
		let Ok(modified) = fs::metadata(lock_file).and_then(|meta| meta.modified()) else {
			return;
		};
		let age = SystemTime::now().duration_since(modified).unwrap_or_default();
		if age >= self.stale_after {
			warn!(target = "gsm.authority", path = %lock_file.display(), "breaking stale lock");
			let _ = fs::remove_file(lock_file);
		}
	}

	/// Reads every entry; a missing file has none.
	pub fn read(&self) -> Result<Vec<AuthEntry>> {
		match fs::read(&self.path) {
			Ok(bytes) => decode_entries(&bytes).ok_or_else(|| AuthorityError::Truncated { path: self.path.clone() }),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
			Err(source) => Err(AuthorityError::Io {
				path: self.path.clone(),
				source,
			}),
		}
	}

	pub fn write(&self, entries: &[AuthEntry]) -> Result<()> {
		let io_err = |source| AuthorityError::Io {
			path: self.path.clone(),
			source,
		};
		let mut file = OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(0o600)
			.open(&self.path)
			.map_err(io_err)?;
		std::io::Write::write_all(&mut file, &encode_entries(entries)).map_err(io_err)
	}

	/// Replaces our entries for `network_id` with fresh ICE and XSMP cookies.
	///
	/// Entries for the same network id and entries without one are dropped.
	pub async fn add_network(&self, network_id: &str) -> Result<Vec<AuthEntry>> {
		let _lock = self.lock().await?;
		let mut entries = self.read()?;
		retain_foreign(&mut entries, network_id);
		let ours = vec![
			AuthEntry::magic_cookie(ICE_PROTOCOL, network_id),
			AuthEntry::magic_cookie(XSMP_PROTOCOL, network_id),
		];
		entries.extend(ours.iter().cloned());
		self.write(&entries)?;
		debug!(target = "gsm.authority", network_id, path = %self.path.display(), "added authority entries");
		Ok(ours)
	}

	/// Removes every entry for `network_id`.
	pub async fn remove_network(&self, network_id: &str) -> Result<()> {
		let _lock = self.lock().await?;
		let mut entries = self.read()?;
		retain_foreign(&mut entries, network_id);
		self.write(&entries)?;
		debug!(target = "gsm.authority", network_id, "removed authority entries");
		Ok(())
	}
}

fn retain_foreign(entries: &mut Vec<AuthEntry>, network_id: &str) {
	entries.retain(|entry| !entry.network_id.is_empty() && entry.network_id != network_id);
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
	let mut name = path.as_os_str().to_os_string();
	name.push(suffix);
	PathBuf::from(name)
}

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct AuthorityLock {
	creat: PathBuf,
	link: PathBuf,
}

impl Drop for AuthorityLock {
	fn drop(&mut self) {
		let _ = fs::remove_file(&self.creat);
		let _ = fs::remove_file(&self.link);
	}
}
