use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gsm")]
#[command(about = "XSMP session manager")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Directory holding the session sockets
	#[arg(long, global = true, value_name = "DIR")]
	pub runtime_dir: Option<PathBuf>,

	/// Configuration file (defaults to $XDG_CONFIG_HOME/gsm/session.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the session manager in the foreground
	Run {
		/// Session name shown by `gsm status`
		#[arg(long)]
		name: Option<String>,

		/// Autostart directory to load; repeat for several, highest priority first
		#[arg(long = "autostart-dir", value_name = "DIR")]
		autostart_dirs: Vec<PathBuf>,

		/// Seconds a startup phase waits for its applications
		#[arg(long, value_name = "SECS")]
		phase_timeout: Option<u64>,

		/// Seconds a new connection has to register
		#[arg(long, value_name = "SECS")]
		handshake_timeout: Option<u64>,
	},

	/// Show the running session and its clients
	Status,

	/// Ask every client to save and end the session
	Logout,

	/// Abort a logout in progress
	CancelLogout,

	/// Ask every client to save its state
	Checkpoint,
}
