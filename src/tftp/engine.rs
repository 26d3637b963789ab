//! Per-transfer operation engines: the RRQ (read) and WRQ (write) state
//! machines that drive the ACK-clocked block pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::fs::{BlockSink, BlockSource, FileError, FsBlockSink, FsBlockSource};
use super::logbuf::LogHandle;
use super::options::{self, AppliedOptions};
use super::packet::{Packet, Request};
use super::{ErrorCode, Mode};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	#[error("mode '{0}' is not supported")]
	UnsupportedMode(String),
	#[error("file error: {0}")]
	File(#[from] FileError),
	#[error("option negotiation failed: {0}")]
	Option(#[from] options::OptionError),
	#[error("peer aborted the transfer with an ERROR packet")]
	PeerAborted,
	#[error("retry budget exhausted")]
	RetriesExhausted,
	#[error("unexpected packet or block number from peer")]
	ProtocolViolation,
	#[error("transfer was cancelled")]
	Cancelled,
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Everything a transfer's state machine needs to send and receive on its
/// own ephemeral socket. The socket stays unconnected: a connected socket
/// would let the kernel silently drop foreign-TID datagrams before the
/// engine ever saw them, which would make the TID-violation path untestable.
struct TransferContext {
	socket: UdpSocket,
	remote: SocketAddr,
	retries: u8,
	applied: AppliedOptions,
	cancel: CancellationToken,
	log: LogHandle,
}

impl TransferContext {
	async fn send(&self, pkt: &Packet) -> std::io::Result<()> {
		self.socket.send_to(&pkt.encode(), self.remote).await?;
		Ok(())
	}

	async fn send_error(&self, code: ErrorCode, message: impl Into<String>) {
		let message = message.into();
		let pkt = Packet::Error { code, message: message.clone() };
		let _ = self.socket.send_to(&pkt.encode(), self.remote).await;
		self.log.push(format!("sent ERROR {code}: {message}"));
	}
}

enum Recv {
	FromPeer(Packet),
	Timeout,
}

/// Waits for one datagram from `ctx.remote`. A datagram from any other
/// address gets `ERROR(UnknownTID)` and is otherwise ignored (P4); a
/// datagram from the remote TID that fails to decode is ignored too, per
/// spec: malformed packets arriving while the engine waits for ACK/DATA are
/// dropped rather than treated as a protocol violation.
async fn recv_from_peer(ctx: &TransferContext, buf_len: usize) -> Result<Recv, EngineError> {
	let mut buf = vec![0u8; buf_len];
	loop {
		tokio::select! {
			_ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
			res = tokio::time::timeout(ctx.applied.timeout, ctx.socket.recv_from(&mut buf)) => {
				match res {
					Err(_elapsed) => return Ok(Recv::Timeout),
					Ok(Err(e)) => return Err(EngineError::Io(e)),
					Ok(Ok((n, from))) => {
						if from != ctx.remote {
							let pkt = Packet::Error { code: ErrorCode::UnknownTid, message: "Invalid TID".to_string() };
							let _ = ctx.socket.send_to(&pkt.encode(), from).await;
							continue;
						}
						match Packet::decode(&buf[..n]) {
							Ok(pkt) => return Ok(Recv::FromPeer(pkt)),
							Err(_) => continue,
						}
					}
				}
			}
		}
	}
}

enum AckWait {
	Acked,
	RetriesExhausted,
}

/// Sends `pkt` and waits for `ACK(expected_block)`, retransmitting `pkt` on
/// every timeout. `send_error_on_exhaustion` distinguishes the OACK-ack wait
/// (spec: "no further wire error needed" once retries run out) from the
/// data pipeline's ACK wait (spec: send `ERROR(NotDefined)` once they do).
async fn wait_for_ack(
	ctx: &TransferContext,
	pkt: &Packet,
	expected_block: u16,
	send_error_on_exhaustion: bool,
) -> Result<AckWait, EngineError> {
	let mut attempts: u8 = 0;
	loop {
		ctx.send(pkt).await?;
		match recv_from_peer(ctx, 64).await? {
			Recv::FromPeer(Packet::Ack { block }) if block == expected_block => return Ok(AckWait::Acked),
			Recv::FromPeer(Packet::Error { message, .. }) => {
				ctx.log.push(format!("peer sent ERROR: {message}"));
				return Err(EngineError::PeerAborted);
			}
			Recv::FromPeer(_) => {
				ctx.send_error(ErrorCode::NotDefined, "unexpected packet or block number").await;
				return Err(EngineError::ProtocolViolation);
			}
			Recv::Timeout => {
				attempts += 1;
				if attempts > ctx.retries {
					if send_error_on_exhaustion {
						ctx.send_error(ErrorCode::NotDefined, "timed out waiting for ack").await;
					}
					return Ok(AckWait::RetriesExhausted);
				}
			}
		}
	}
}

fn file_error_to_code(kind: RequestSide, err: &FileError) -> ErrorCode {
	match (kind, err) {
		(_, FileError::NotFound) => ErrorCode::FileNotFound,
		(_, FileError::AccessViolation) => ErrorCode::AccessViolation,
		(RequestSide::Wrq, FileError::AlreadyExists) => ErrorCode::FileAlreadyExists,
		(RequestSide::Rrq, FileError::AlreadyExists) => ErrorCode::NotDefined,
		(RequestSide::Rrq, FileError::Other(_)) => ErrorCode::NotDefined,
		(RequestSide::Wrq, FileError::Other(_)) => ErrorCode::DiskFull,
	}
}

#[derive(Clone, Copy)]
enum RequestSide {
	Rrq,
	Wrq,
}

/// A server-to-client read transfer (RRQ).
pub struct RrqEngine {
	ctx: TransferContext,
	root: PathBuf,
}

impl RrqEngine {
	pub fn new(
		socket: UdpSocket,
		remote: SocketAddr,
		root: PathBuf,
		retries: u8,
		defaults: AppliedOptions,
		cancel: CancellationToken,
		log: LogHandle,
	) -> Self {
		Self { ctx: TransferContext { socket, remote, retries, applied: defaults, cancel, log }, root }
	}

	pub async fn run(mut self, req: Request) {
		let remote = self.ctx.remote;
		let log = self.ctx.log.clone();
		if let Err(e) = self.run_inner(&req).await {
			log.push(format!("RRQ from {remote} ({}) failed: {e}", req.filename));
		}
	}

	async fn run_inner(&mut self, req: &Request) -> Result<(), EngineError> {
		self.ctx.log.push(format!(
			"RRQ from {}, file '{}', options {:?}",
			self.ctx.remote, req.filename, req.options
		));

		// Phase A: mode gate.
		if Mode::parse(&req.mode) != Some(Mode::Octet) {
			self.ctx.send_error(ErrorCode::NotDefined, "Only octet mode supported").await;
			return Err(EngineError::UnsupportedMode(req.mode.clone()));
		}

		// Phase B: file gate.
		let mut source = match FsBlockSource::open(&self.root, &req.filename).await {
			Ok(src) => src,
			Err(e) => {
				let code = file_error_to_code(RequestSide::Rrq, &e);
				self.ctx.send_error(code, e.to_string()).await;
				return Err(e.into());
			}
		};

		// Phase C: option negotiation.
		let (oack, applied) = match options::negotiate_rrq(&req.options, self.ctx.applied, source.size()) {
			Ok(v) => v,
			Err(e) => {
				self.ctx.send_error(ErrorCode::OptionFailure, "failed to process RRQ options").await;
				return Err(e.into());
			}
		};
		self.ctx.applied = applied;

		if !oack.is_empty() {
			self.ctx.log.push(format!("negotiated options {oack:?}"));
			let oack_pkt = Packet::OAck { options: oack };
			if matches!(wait_for_ack(&self.ctx, &oack_pkt, 0, false).await?, AckWait::RetriesExhausted) {
				self.ctx.log.push("timed out waiting for ack of OACK".to_string());
				return Err(EngineError::RetriesExhausted);
			}
		}

		// Phase D: data pipeline.
		let mut block_num: u16 = 1;
		let mut blocks_sent: u32 = 0;
		loop {
			let chunk = source.read_block(self.ctx.applied.blksize as usize).await?;
			let is_short = chunk.len() < self.ctx.applied.blksize as usize;
			let data_pkt = Packet::Data { block: block_num, data: chunk };

			match wait_for_ack(&self.ctx, &data_pkt, block_num, true).await? {
				AckWait::Acked => blocks_sent += 1,
				AckWait::RetriesExhausted => return Err(EngineError::RetriesExhausted),
			}

			if is_short {
				break;
			}

			// 1-based wrap: 1, 2, ..., 65535, 1, 2, ... (spec §4.3 step 4).
			block_num = if block_num == 65535 { 1 } else { block_num + 1 };
		}

		self.ctx.log.push(format!("RRQ complete, {blocks_sent} blocks sent"));
		Ok(())
	}
}

enum DataWait {
	Data { block: u16, data: Vec<u8> },
	RetriesExhausted,
}

/// Waits for a DATA packet, retransmitting `last_ack` on every timeout.
async fn wait_for_data(ctx: &TransferContext, last_ack: &Packet) -> Result<DataWait, EngineError> {
	let mut attempts: u8 = 0;
	let buf_len = ctx.applied.blksize as usize + 64;
	loop {
		match recv_from_peer(ctx, buf_len).await? {
			Recv::FromPeer(Packet::Data { block, data }) => return Ok(DataWait::Data { block, data }),
			Recv::FromPeer(Packet::Error { message, .. }) => {
				ctx.log.push(format!("peer sent ERROR: {message}"));
				return Err(EngineError::PeerAborted);
			}
			Recv::FromPeer(_) => {
				ctx.send_error(ErrorCode::NotDefined, "unexpected opcode").await;
				return Err(EngineError::ProtocolViolation);
			}
			Recv::Timeout => {
				attempts += 1;
				if attempts >= ctx.retries {
					return Ok(DataWait::RetriesExhausted);
				}
				ctx.send(last_ack).await?;
			}
		}
	}
}

/// A client-to-server write transfer (WRQ).
pub struct WrqEngine {
	ctx: TransferContext,
	root: PathBuf,
}

impl WrqEngine {
	pub fn new(
		socket: UdpSocket,
		remote: SocketAddr,
		root: PathBuf,
		retries: u8,
		defaults: AppliedOptions,
		cancel: CancellationToken,
		log: LogHandle,
	) -> Self {
		Self { ctx: TransferContext { socket, remote, retries, applied: defaults, cancel, log }, root }
	}

	pub async fn run(mut self, req: Request) {
		let remote = self.ctx.remote;
		let log = self.ctx.log.clone();
		if let Err(e) = self.run_inner(&req).await {
			log.push(format!("WRQ from {remote} ({}) failed: {e}", req.filename));
		}
	}

	async fn run_inner(&mut self, req: &Request) -> Result<(), EngineError> {
		self.ctx.log.push(format!(
			"WRQ from {}, file '{}', options {:?}",
			self.ctx.remote, req.filename, req.options
		));

		// Phase A: mode gate.
		if Mode::parse(&req.mode) != Some(Mode::Octet) {
			self.ctx.send_error(ErrorCode::NotDefined, "Only octet mode supported").await;
			return Err(EngineError::UnsupportedMode(req.mode.clone()));
		}

		// Phase B: path/creation gate.
		let mut sink = match FsBlockSink::create(&self.root, &req.filename).await {
			Ok(sink) => sink,
			Err(e) => {
				let code = file_error_to_code(RequestSide::Wrq, &e);
				self.ctx.send_error(code, e.to_string()).await;
				return Err(e.into());
			}
		};

		// Phase C: option negotiation.
		let (oack, applied) = match options::negotiate_wrq(&req.options, self.ctx.applied) {
			Ok(v) => v,
			Err(e) => {
				self.ctx.send_error(ErrorCode::OptionFailure, "failed to process WRQ options").await;
				return Err(e.into());
			}
		};
		self.ctx.applied = applied;

		let mut last_ack = if oack.is_empty() {
			let ack = Packet::Ack { block: 0 };
			self.ctx.send(&ack).await?;
			ack
		} else {
			self.ctx.log.push(format!("negotiated options {oack:?}"));
			let oack_pkt = Packet::OAck { options: oack };
			self.ctx.send(&oack_pkt).await?;
			oack_pkt
		};

		// Phase D: data pipeline.
		let mut expected: u16 = 0;
		let mut blocks_received: u32 = 0;
		loop {
			let (block, data) = match wait_for_data(&self.ctx, &last_ack).await? {
				DataWait::Data { block, data } => (block, data),
				DataWait::RetriesExhausted => return Err(EngineError::RetriesExhausted),
			};

			let accepted = block == expected.wrapping_add(1) || (expected == 65535 && block == 1);
			if !accepted {
				self.ctx
					.send_error(ErrorCode::NotDefined, format!("incorrect block number {block}"))
					.await;
				return Err(EngineError::ProtocolViolation);
			}

			let is_final = data.len() < self.ctx.applied.blksize as usize;
			sink.write(&data).await?;
			expected = block;
			blocks_received += 1;

			let ack_pkt = Packet::Ack { block: expected };
			self.ctx.send(&ack_pkt).await?;
			last_ack = ack_pkt;

			if is_final {
				break;
			}
		}

		sink.close().await?;
		self.ctx.log.push(format!("WRQ complete, {blocks_received} blocks received"));
		Ok(())
	}
}
