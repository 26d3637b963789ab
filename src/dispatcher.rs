//! Listener and dispatcher: binds the well-known port, decodes inbound
//! RRQ/WRQ packets, allocates an ephemeral socket per transfer, and spawns
//! its operation engine.

use std::collections::HashMap;
use std::net::SocketAddr;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::tftp::engine::{RrqEngine, WrqEngine};
use crate::tftp::logbuf::LogHandle;
use crate::tftp::options::AppliedOptions;
use crate::tftp::packet::Packet;
use crate::tftp::{consts, ErrorCode, RequestKind};

const HOUSEKEEPING_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
const LISTENER_RECV_BUF: usize = 512;
const EPHEMERAL_RANDOM_ATTEMPTS: u32 = 100;

struct OperationHandle {
	join: JoinHandle<()>,
	cancel: CancellationToken,
	log: LogHandle,
}

/// Owns the well-known-port socket and the set of in-flight transfers.
pub struct Dispatcher {
	config: ServerConfig,
	listen_socket: UdpSocket,
	operations: HashMap<u16, OperationHandle>,
}

impl Dispatcher {
	pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
		let addr = SocketAddr::new(config.host_address, config.listening_port);
		let listen_socket = UdpSocket::bind(addr).await?;
		info!("listening on {addr}");
		Ok(Self { config, listen_socket, operations: HashMap::new() })
	}

	/// The address actually bound, useful when `listening_port` was 0.
	pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
		self.listen_socket.local_addr()
	}

	pub async fn run(mut self, shutdown: CancellationToken) {
		let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
		housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut recv_buf = vec![0u8; LISTENER_RECV_BUF];

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => {
					warn!("dispatcher shutting down");
					break;
				}
				_ = housekeeping.tick() => {
					self.housekeep();
				}
				res = self.listen_socket.recv_from(&mut recv_buf) => {
					match res {
						Ok((n, from)) => self.handle_datagram(&recv_buf[..n], from).await,
						Err(e) => error!("listener recv error: {e}"),
					}
				}
			}
		}

		self.shutdown_all().await;
	}

	async fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr) {
		let packet = match Packet::decode(buf) {
			Ok(p) => p,
			Err(e) => {
				debug!("ignoring undecodable datagram from {from}: {e}");
				return;
			}
		};

		let (kind, req) = match packet {
			Packet::Rrq(req) => (RequestKind::Rrq, req),
			Packet::Wrq(req) => (RequestKind::Wrq, req),
			_ => {
				debug!("ignoring non-request opcode from {from} on the listening socket");
				return;
			}
		};

		if self.operations.len() >= self.config.max_transfers {
			warn!("rejecting {from}: {} transfers already in flight", self.operations.len());
			let pkt = Packet::Error {
				code: ErrorCode::NotDefined,
				message: "server has reached its concurrent transfer limit".to_string(),
			};
			let _ = self.listen_socket.send_to(&pkt.encode(), from).await;
			return;
		}

		let socket = match self.allocate_socket().await {
			Some(s) => s,
			None => {
				error!("failed to allocate an ephemeral port for {from}");
				return;
			}
		};
		let port = match socket.local_addr() {
			Ok(addr) => addr.port(),
			Err(e) => {
				error!("ephemeral socket has no local address: {e}");
				return;
			}
		};

		let cancel = CancellationToken::new();
		let log = LogHandle::new();
		let defaults = AppliedOptions { blksize: consts::DEFAULT_BLOCK_SIZE, timeout: self.config.timeout };
		let root = self.config.root.clone();
		let retries = self.config.retries;

		let join = match kind {
			RequestKind::Rrq => {
				let engine = RrqEngine::new(socket, from, root, retries, defaults, cancel.clone(), log.clone());
				tokio::spawn(async move { engine.run(req).await })
			}
			RequestKind::Wrq => {
				let engine = WrqEngine::new(socket, from, root, retries, defaults, cancel.clone(), log.clone());
				tokio::spawn(async move { engine.run(req).await })
			}
		};

		debug!("dispatched {kind:?} from {from} to local port {port}");
		self.operations.insert(port, OperationHandle { join, cancel, log });
	}

	/// Tries up to 100 random ports in the configured range before falling
	/// back to a sequential scan, matching the listener's own admission
	/// order: prefer unpredictable TIDs, never refuse a transfer just
	/// because the random draws collided.
	async fn allocate_socket(&self) -> Option<UdpSocket> {
		let (low, high) = self.config.ephemeral_port_range;
		let host = self.config.host_address;

		for _ in 0..EPHEMERAL_RANDOM_ATTEMPTS {
			let port = rand::thread_rng().gen_range(low..=high);
			if self.operations.contains_key(&port) {
				continue;
			}
			if let Ok(sock) = UdpSocket::bind(SocketAddr::new(host, port)).await {
				return Some(sock);
			}
		}

		for port in low..=high {
			if self.operations.contains_key(&port) {
				continue;
			}
			if let Ok(sock) = UdpSocket::bind(SocketAddr::new(host, port)).await {
				return Some(sock);
			}
		}

		None
	}

	/// Drains every live operation's log buffer and reaps finished tasks.
	fn housekeep(&mut self) {
		let mut finished = Vec::new();
		for (&port, op) in self.operations.iter() {
			for line in op.log.drain() {
				if let Some(sink) = &self.config.log_sink {
					sink(line.clone());
				}
				info!("{line}");
			}
			if op.join.is_finished() {
				finished.push(port);
			}
		}
		for port in finished {
			self.operations.remove(&port);
		}
	}

	async fn shutdown_all(mut self) {
		for (_, op) in self.operations.drain() {
			op.cancel.cancel();
			let _ = op.join.await;
		}
	}
}
