//! Server runtime configuration.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::tftp::consts;

/// A callback the dispatcher hands every drained log line to, in addition to
/// the `log` facade. Used by embedders that want transfer activity routed
/// somewhere other than the process logger.
pub type LogSink = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone)]
pub struct ServerConfig {
	pub host_address: IpAddr,
	pub listening_port: u16,
	pub root: PathBuf,
	pub timeout: Duration,
	pub retries: u8,
	pub ephemeral_port_range: (u16, u16),
	pub max_transfers: usize,
	pub log_sink: Option<LogSink>,
}

impl ServerConfig {
	pub fn new(host_address: IpAddr, root: PathBuf) -> Self {
		Self {
			host_address,
			listening_port: consts::TFTP_LISTEN_PORT,
			root,
			timeout: Duration::from_secs(consts::DEFAULT_TIMEOUT_SECS),
			retries: consts::DEFAULT_RETRANSMIT_TRIES,
			ephemeral_port_range: consts::DEFAULT_EPHEMERAL_PORT_RANGE,
			max_transfers: consts::DEFAULT_MAX_TRANSFERS,
			log_sink: None,
		}
	}

	pub fn with_listening_port(mut self, port: u16) -> Self {
		self.listening_port = port;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_retries(mut self, retries: u8) -> Self {
		self.retries = retries;
		self
	}

	pub fn with_ephemeral_port_range(mut self, range: (u16, u16)) -> Self {
		self.ephemeral_port_range = range;
		self
	}

	pub fn with_max_transfers(mut self, max_transfers: usize) -> Self {
		self.max_transfers = max_transfers;
		self
	}

	pub fn with_log_sink(mut self, sink: LogSink) -> Self {
		self.log_sink = Some(sink);
		self
	}
}
