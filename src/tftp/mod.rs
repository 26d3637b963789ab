//! Wire protocol types and the per-transfer engine.

use std::fmt::Display;

pub mod consts {
	pub const TFTP_LISTEN_PORT: u16 = 69;
	pub const DEFAULT_BLOCK_SIZE: u16 = 512;
	pub const MIN_BLOCK_SIZE: u16 = 8;
	pub const MAX_BLOCK_SIZE: u16 = 65464;
	pub const DEFAULT_TIMEOUT_SECS: u64 = 6;
	pub const MIN_TIMEOUT_SECS: u8 = 1;
	pub const MAX_TIMEOUT_SECS: u8 = 255;
	pub const DEFAULT_RETRANSMIT_TRIES: u8 = 3;
	pub const DEFAULT_EPHEMERAL_PORT_RANGE: (u16, u16) = (2048, 65535);
	pub const DEFAULT_MAX_TRANSFERS: usize = 256;
	pub const BLOCKS_TO_CACHE: usize = 100;

	pub const OPT_BLOCKSIZE_IDENT: &str = "blksize";
	pub const OPT_TIMEOUT_IDENT: &str = "timeout";
	pub const OPT_TRANSFERSIZE_IDENT: &str = "tsize";

	pub const OPCODE_RRQ: u16 = 1;
	pub const OPCODE_WRQ: u16 = 2;
	pub const OPCODE_DATA: u16 = 3;
	pub const OPCODE_ACK: u16 = 4;
	pub const OPCODE_ERROR: u16 = 5;
	pub const OPCODE_OACK: u16 = 6;
}

pub mod packet;
pub mod options;
pub mod fs;
pub mod logbuf;
pub mod engine;

/// The two request opcodes a dispatcher may receive on the well-known port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
	Rrq,
	Wrq,
}

/// The TFTP error code enumeration (RFC 1350 §5, extended by RFC 2347 §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
	NotDefined = 0,
	FileNotFound = 1,
	AccessViolation = 2,
	DiskFull = 3,
	IllegalOperation = 4,
	UnknownTid = 5,
	FileAlreadyExists = 6,
	NoSuchUser = 7,
	OptionFailure = 8,
}

impl Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::NotDefined => "NotDefined",
			Self::FileNotFound => "FileNotFound",
			Self::AccessViolation => "AccessViolation",
			Self::DiskFull => "DiskFull",
			Self::IllegalOperation => "IllegalOperation",
			Self::UnknownTid => "UnknownTid",
			Self::FileAlreadyExists => "FileAlreadyExists",
			Self::NoSuchUser => "NoSuchUser",
			Self::OptionFailure => "OptionFailure",
		};
		write!(f, "{name} ({})", *self as u16)
	}
}

impl From<u16> for ErrorCode {
	/// Unknown codes fold to `NotDefined`; the server only needs to log and
	/// abort on a peer's ERROR packet, never to act on the specific code.
	fn from(value: u16) -> Self {
		match value {
			0 => Self::NotDefined,
			1 => Self::FileNotFound,
			2 => Self::AccessViolation,
			3 => Self::DiskFull,
			4 => Self::IllegalOperation,
			5 => Self::UnknownTid,
			6 => Self::FileAlreadyExists,
			7 => Self::NoSuchUser,
			8 => Self::OptionFailure,
			_ => Self::NotDefined,
		}
	}
}

/// Only `octet` is supported; `netascii` is recognized so it can be rejected
/// explicitly rather than falling through as an unknown mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Octet,
	NetAscii,
}

impl Mode {
	pub fn parse(input: &str) -> Option<Self> {
		match input.to_ascii_lowercase().as_str() {
			"octet" => Some(Self::Octet),
			"netascii" => Some(Self::NetAscii),
			_ => None,
		}
	}
}

impl Display for Mode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", match self {
			Self::Octet => "octet",
			Self::NetAscii => "netascii",
		})
	}
}
