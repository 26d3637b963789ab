//! Pure decode/encode functions for the six TFTP packet variants.
//!
//! No I/O happens here; everything operates on byte slices so the codec can
//! be exercised directly by unit tests without a socket.

use super::{consts, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
	#[error("buffer too short for a valid packet")]
	UnexpectedEof,
	#[error("malformed packet")]
	MalformedPacket,
	#[error("packet is missing its null terminator")]
	NotNullTerminated,
	#[error("invalid (non-UTF-8) characters in packet")]
	InvalidCharacters,
	#[error("unknown opcode")]
	InvalidOpcode,
}

/// An RRQ or WRQ payload: filename, mode, and any RFC 2347 options in the
/// order they appeared on the wire, with the client's original casing on
/// option names preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub filename: String,
	pub mode: String,
	pub options: Vec<(String, String)>,
}

/// An owned, decoded representation of any TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
	Rrq(Request),
	Wrq(Request),
	Data { block: u16, data: Vec<u8> },
	Ack { block: u16 },
	Error { code: ErrorCode, message: String },
	OAck { options: Vec<(String, String)> },
}

fn str_from_utf8(bytes: &[u8]) -> Result<&str, PacketError> {
	std::str::from_utf8(bytes).map_err(|_| PacketError::InvalidCharacters)
}

/// Splits `rest` on NUL bytes, requiring a trailing NUL, and drops the
/// trailing empty token that produces.
fn null_terminated_tokens(rest: &[u8]) -> Result<Vec<&[u8]>, PacketError> {
	if rest.last() != Some(&0) {
		return Err(PacketError::NotNullTerminated);
	}
	let mut tokens: Vec<&[u8]> = rest.split(|&b| b == 0).collect();
	// `rest` ends in a NUL, so split() always yields one trailing empty slice.
	tokens.pop();
	Ok(tokens)
}

fn decode_request(rest: &[u8]) -> Result<Request, PacketError> {
	let tokens = null_terminated_tokens(rest)?;
	if tokens.len() < 2 {
		return Err(PacketError::MalformedPacket);
	}
	if tokens[0].is_empty() || tokens[1].is_empty() {
		return Err(PacketError::MalformedPacket);
	}
	let filename = str_from_utf8(tokens[0])?.to_string();
	let mode = str_from_utf8(tokens[1])?.to_string();

	// Remaining tokens come in (name, value) pairs; an odd trailing token is
	// tolerated by dropping it (matches the original server's behavior).
	let mut options = Vec::new();
	let mut pairs = &tokens[2..];
	while pairs.len() >= 2 {
		let name = str_from_utf8(pairs[0])?.to_string();
		let value = str_from_utf8(pairs[1])?.to_string();
		options.push((name, value));
		pairs = &pairs[2..];
	}

	Ok(Request { filename, mode, options })
}

fn encode_request(opcode: u16, req: &Request) -> Vec<u8> {
	let mut buf = Vec::with_capacity(32 + req.filename.len() + req.mode.len());
	buf.extend_from_slice(&opcode.to_be_bytes());
	buf.extend_from_slice(req.filename.as_bytes());
	buf.push(0);
	buf.extend_from_slice(req.mode.as_bytes());
	buf.push(0);
	for (name, value) in &req.options {
		buf.extend_from_slice(name.as_bytes());
		buf.push(0);
		buf.extend_from_slice(value.as_bytes());
		buf.push(0);
	}
	buf
}

fn decode_oack_options(rest: &[u8]) -> Result<Vec<(String, String)>, PacketError> {
	let tokens = null_terminated_tokens(rest)?;
	if tokens.is_empty() || tokens.len() % 2 != 0 {
		return Err(PacketError::MalformedPacket);
	}
	let mut options = Vec::with_capacity(tokens.len() / 2);
	for pair in tokens.chunks_exact(2) {
		let name = str_from_utf8(pair[0])?.to_string();
		let value = str_from_utf8(pair[1])?.to_string();
		options.push((name, value));
	}
	Ok(options)
}

fn encode_oack(options: &[(String, String)]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(16 * options.len() + 2);
	buf.extend_from_slice(&consts::OPCODE_OACK.to_be_bytes());
	for (name, value) in options {
		buf.extend_from_slice(name.as_bytes());
		buf.push(0);
		buf.extend_from_slice(value.as_bytes());
		buf.push(0);
	}
	buf
}

impl Packet {
	pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
		if buf.len() < 2 {
			return Err(PacketError::UnexpectedEof);
		}
		let opcode = u16::from_be_bytes([buf[0], buf[1]]);
		let rest = &buf[2..];

		match opcode {
			consts::OPCODE_RRQ => Ok(Packet::Rrq(decode_request(rest)?)),
			consts::OPCODE_WRQ => Ok(Packet::Wrq(decode_request(rest)?)),
			consts::OPCODE_DATA => {
				if rest.len() < 2 {
					return Err(PacketError::UnexpectedEof);
				}
				let block = u16::from_be_bytes([rest[0], rest[1]]);
				Ok(Packet::Data { block, data: rest[2..].to_vec() })
			}
			consts::OPCODE_ACK => {
				if rest.len() < 2 {
					return Err(PacketError::UnexpectedEof);
				}
				let block = u16::from_be_bytes([rest[0], rest[1]]);
				Ok(Packet::Ack { block })
			}
			consts::OPCODE_ERROR => {
				if rest.len() < 2 {
					return Err(PacketError::UnexpectedEof);
				}
				let code = ErrorCode::from(u16::from_be_bytes([rest[0], rest[1]]));
				let msg_bytes = &rest[2..];
				let msg_end = msg_bytes.iter().position(|&b| b == 0).unwrap_or(msg_bytes.len());
				let message = str_from_utf8(&msg_bytes[..msg_end])?.to_string();
				Ok(Packet::Error { code, message })
			}
			consts::OPCODE_OACK => Ok(Packet::OAck { options: decode_oack_options(rest)? }),
			_ => Err(PacketError::InvalidOpcode),
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		match self {
			Packet::Rrq(req) => encode_request(consts::OPCODE_RRQ, req),
			Packet::Wrq(req) => encode_request(consts::OPCODE_WRQ, req),
			Packet::Data { block, data } => {
				let mut buf = Vec::with_capacity(4 + data.len());
				buf.extend_from_slice(&consts::OPCODE_DATA.to_be_bytes());
				buf.extend_from_slice(&block.to_be_bytes());
				buf.extend_from_slice(data);
				buf
			}
			Packet::Ack { block } => {
				let mut buf = Vec::with_capacity(4);
				buf.extend_from_slice(&consts::OPCODE_ACK.to_be_bytes());
				buf.extend_from_slice(&block.to_be_bytes());
				buf
			}
			Packet::Error { code, message } => {
				let mut buf = Vec::with_capacity(5 + message.len());
				buf.extend_from_slice(&consts::OPCODE_ERROR.to_be_bytes());
				buf.extend_from_slice(&(*code as u16).to_be_bytes());
				buf.extend_from_slice(message.as_bytes());
				buf.push(0);
				buf
			}
			Packet::OAck { options } => encode_oack(options),
		}
	}
}
