use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Automation server core with pluggable drivers and plugins")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Server socket path (defaults to $XDG_RUNTIME_DIR/tether.sock)
	#[arg(long, global = true, value_name = "PATH")]
	pub socket: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the server in the foreground
	Serve(ServeArgs),
	/// Print the status of a running server
	Status,
	/// List sessions of a running server
	Sessions,
	/// Delete every session of a running server
	DeleteSessions {
		/// Only sessions of this driver
		#[arg(long)]
		driver: Option<String>,
	},
	/// Stop a running server
	Shutdown,
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
	/// JSON server configuration file
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Enable a plugin (repeatable, replaces the configured list)
	#[arg(long = "plugin", value_name = "NAME")]
	pub plugins: Vec<String>,

	/// Delete existing sessions whenever a new one is created
	#[arg(long)]
	pub session_override: bool,
}
