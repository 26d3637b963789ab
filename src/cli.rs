use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{arg, command, Parser, ValueEnum};

use simple_logger::SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Options {
	#[arg(value_enum, short, long,
		default_value_t = DebugLevel::Warn,
		help = "Debug level to determine which messages are printed"
	)]
	pub debug: DebugLevel,

	#[arg(short = 'r', long = "root", help = "Root directory served to clients")]
	pub root_dir: Option<PathBuf>,

	#[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
	pub bind: IpAddr,

	#[arg(short, long, default_value_t = crate::tftp::consts::TFTP_LISTEN_PORT)]
	pub port: u16,

	#[arg(short, long, default_value_t = crate::tftp::consts::DEFAULT_TIMEOUT_SECS,
		help = "Seconds to wait for a peer's reply before retransmitting"
	)]
	pub timeout: u64,

	#[arg(long, default_value_t = crate::tftp::consts::DEFAULT_RETRANSMIT_TRIES,
		help = "Cumulative retransmissions allowed before a transfer aborts"
	)]
	pub retries: u8,

	#[arg(long, default_value_t = crate::tftp::consts::DEFAULT_EPHEMERAL_PORT_RANGE.0)]
	pub ephemeral_port_low: u16,

	#[arg(long, default_value_t = crate::tftp::consts::DEFAULT_EPHEMERAL_PORT_RANGE.1)]
	pub ephemeral_port_high: u16,

	#[arg(long, default_value_t = crate::tftp::consts::DEFAULT_MAX_TRANSFERS,
		help = "Maximum number of concurrent transfers admitted"
	)]
	pub max_transfers: usize,
}

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum DebugLevel {
	Off = 0,
	Error,

	#[default]
	Warn,
	Info,
	Debug,
	Trace,
}

impl From<DebugLevel> for log::LevelFilter {
	fn from(value: DebugLevel) -> Self {
		match value {
			DebugLevel::Off => Self::Off,
			DebugLevel::Error => Self::Error,
			DebugLevel::Warn => Self::Warn,
			DebugLevel::Info => Self::Info,
			DebugLevel::Debug => Self::Debug,
			DebugLevel::Trace => Self::Trace,
		}
	}
}

pub fn init_logger(debug_level: DebugLevel) {
	SimpleLogger::new()
		.with_level(debug_level.into())
		.env()
		.init()
		.unwrap();
}
