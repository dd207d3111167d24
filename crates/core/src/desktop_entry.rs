//! Minimal reader for the `[Desktop Entry]` group of `.desktop` manifests.
//!
//! Only what autostart needs is supported: unlocalized keys, the standard
//! escape sequences, booleans and `;`-separated lists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::DesktopEntryError;

const GROUP: &str = "Desktop Entry";

/// Parsed key/value pairs of a manifest's `[Desktop Entry]` group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
	source: PathBuf,
	values: HashMap<String, String>,
}

impl DesktopEntry {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, DesktopEntryError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|source| DesktopEntryError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(path, &contents)
	}

	/// Parses `contents` as if read from `source`.
	pub fn parse(source: impl Into<PathBuf>, contents: &str) -> Result<Self, DesktopEntryError> {
		let source = source.into();
		let mut values = HashMap::new();
		let mut seen_group = false;
		let mut in_group = false;

		for (index, raw) in contents.lines().enumerate() {
			let line = raw.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			if let Some(header) = line.strip_prefix('[') {
				let Some(name) = header.strip_suffix(']') else {
					return Err(DesktopEntryError::Malformed { path: source, line: index + 1 });
				};
				in_group = name == GROUP;
				seen_group |= in_group;
				continue;
			}
			if !in_group {
				continue;
			}
			let Some((key, value)) = line.split_once('=') else {
				return Err(DesktopEntryError::Malformed { path: source, line: index + 1 });
			};
			let key = key.trim_end();
			// Localized variants (Name[de]) are not needed.
			if key.contains('[') {
				continue;
			}
			values.entry(key.to_string()).or_insert_with(|| unescape(value.trim_start()));
		}

		if !seen_group {
			return Err(DesktopEntryError::MissingGroup { path: source });
		}
		Ok(Self { source, values })
	}

	pub fn source(&self) -> &Path {
		&self.source
	}

	pub fn string(&self, key: &str) -> Option<&str> {
		self.values.get(key).map(String::as_str)
	}

	/// `true`/`false` values; anything else reads as absent.
	pub fn boolean(&self, key: &str) -> Option<bool> {
		match self.string(key)? {
			"true" => Some(true),
			"false" => Some(false),
			_ => None,
		}
	}

	pub fn string_list(&self, key: &str) -> Vec<String> {
		self.string(key)
			.map(|value| value.split(';').filter(|item| !item.is_empty()).map(str::to_string).collect())
			.unwrap_or_default()
	}
}

fn unescape(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	let mut chars = value.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some('s') => out.push(' '),
			Some('n') => out.push('\n'),
			Some('t') => out.push('\t'),
			Some('r') => out.push('\r'),
			Some('\\') => out.push('\\'),
			Some(other) => {
				out.push('\\');
				out.push(other);
			}
			None => out.push('\\'),
		}
	}
	out
}
