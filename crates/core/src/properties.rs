//! Ordered property store backing a client's `SetProperties` declarations.

use gsm_protocol::{
	DESKTOP_FILE, DISCARD_COMMAND, PROCESS_ID, PROGRAM, Property, PropertyValue, RESTART_COMMAND, RESTART_STYLE_HINT, RestartStyle,
};

/// Properties in declaration order; setting a name again replaces the old
/// value and moves it to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
	props: Vec<Property>,
}

impl PropertyList {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(&mut self, property: Property) {
		self.delete(&property.name);
		self.props.push(property);
	}

	/// Removes `name`, returning whether it was present.
	pub fn delete(&mut self, name: &str) -> bool {
		match self.props.iter().position(|p| p.name == name) {
			Some(index) => {
				self.props.remove(index);
				true
			}
			None => false,
		}
	}

	pub fn get(&self, name: &str) -> Option<&Property> {
		self.props.iter().find(|p| p.name == name)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Property> {
		self.props.iter()
	}

	pub fn len(&self) -> usize {
		self.props.len()
	}

	pub fn is_empty(&self) -> bool {
		self.props.is_empty()
	}

	pub fn to_vec(&self) -> Vec<Property> {
		self.props.clone()
	}

	fn array8(&self, name: &str) -> Option<&str> {
		match &self.get(name)?.value {
			PropertyValue::Array8(value) => Some(value),
			_ => None,
		}
	}

	fn list(&self, name: &str) -> Option<&[String]> {
		match &self.get(name)?.value {
			PropertyValue::ListOfArray8(values) => Some(values),
			_ => None,
		}
	}

	pub fn program(&self) -> Option<&str> {
		self.array8(PROGRAM)
	}

	pub fn pid(&self) -> Option<u32> {
		self.array8(PROCESS_ID)?.trim().parse().ok()
	}

	pub fn desktop_file(&self) -> Option<&str> {
		self.array8(DESKTOP_FILE)
	}

	pub fn restart_argv(&self) -> Option<&[String]> {
		self.list(RESTART_COMMAND).filter(|argv| !argv.is_empty())
	}

	/// Restart command rendered as a shell command line.
	pub fn restart_command(&self) -> Option<String> {
		self.restart_argv().map(quote_command)
	}

	pub fn discard_command(&self) -> Option<String> {
		self.list(DISCARD_COMMAND).filter(|argv| !argv.is_empty()).map(quote_command)
	}

	pub fn restart_style(&self) -> Option<RestartStyle> {
		match self.get(RESTART_STYLE_HINT)?.value {
			PropertyValue::Card8(value) => RestartStyle::from_card8(value),
			_ => None,
		}
	}

	pub fn autorestart(&self) -> bool {
		self.restart_style() == Some(RestartStyle::Immediately)
	}
}

/// Joins argv into a command line, single-quoting arguments that contain
/// anything beyond `[A-Za-z0-9-_=:./]`.
pub fn quote_command(argv: &[String]) -> String {
	argv.iter().map(|arg| quote_arg(arg)).collect::<Vec<_>>().join(" ")
}

fn quote_arg(arg: &str) -> String {
	let plain = !arg.is_empty() && arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_=:./".contains(c));
	if plain {
		return arg.to_string();
	}
	format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_replaces_by_name_and_moves_to_end() {
		let mut props = PropertyList::new();
		props.set(Property::array8(PROGRAM, "gedit"));
		props.set(Property::array8(PROCESS_ID, "12"));
		props.set(Property::array8(PROGRAM, "pluma"));

		let names: Vec<&str> = props.iter().map(|p| p.name.as_str()).collect();
		assert_eq!(names, [PROCESS_ID, PROGRAM]);
		assert_eq!(props.program(), Some("pluma"));
	}

	#[test]
	fn delete_reports_presence() {
		let mut props = PropertyList::new();
		props.set(Property::array8(PROGRAM, "gedit"));
		assert!(props.delete(PROGRAM));
		assert!(!props.delete(PROGRAM));
		assert!(props.is_empty());
	}

	#[test]
	fn typed_accessors_ignore_mismatched_types() {
		let mut props = PropertyList::new();
		props.set(Property::card8(PROCESS_ID, 7));
		props.set(Property::array8(RESTART_STYLE_HINT, "2"));
		props.set(Property::array8(RESTART_COMMAND, "xterm"));
		assert_eq!(props.pid(), None);
		assert!(!props.autorestart());
		assert_eq!(props.restart_command(), None);
	}

	#[test]
	fn pid_and_autorestart_from_well_formed_properties() {
		let mut props = PropertyList::new();
		props.set(Property::array8(PROCESS_ID, "4242"));
		props.set(Property::card8(RESTART_STYLE_HINT, RestartStyle::Immediately as u8));
		assert_eq!(props.pid(), Some(4242));
		assert!(props.autorestart());

		props.set(Property::card8(RESTART_STYLE_HINT, RestartStyle::Never as u8));
		assert!(!props.autorestart());
	}

	#[test]
	fn commands_are_shell_quoted() {
		let mut props = PropertyList::new();
		props.set(Property::list(RESTART_COMMAND, ["gedit", "--sm-client-id=10ab", "my file.txt", "it's"]));
		props.set(Property::list(DISCARD_COMMAND, ["rm", "-f", "/tmp/state.1"]));
		assert_eq!(
			props.restart_command().as_deref(),
			Some(r"gedit --sm-client-id=10ab 'my file.txt' 'it'\''s'")
		);
		assert_eq!(props.discard_command().as_deref(), Some("rm -f /tmp/state.1"));
	}
}
