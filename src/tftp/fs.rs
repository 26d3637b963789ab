//! Block source / sink abstraction over the filesystem.
//!
//! `BlockSource` and `BlockSink` are the narrow interfaces the operation
//! engine depends on; `FsBlockSource`/`FsBlockSink` are the one filesystem
//! backed implementation this crate ships, confined to a configured root
//! directory.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use super::consts;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
	#[error("file not found")]
	NotFound,
	#[error("file already exists")]
	AlreadyExists,
	#[error("access violation")]
	AccessViolation,
	#[error("storage error: {0}")]
	Other(String),
}

/// Yields fixed-size chunks of a file in order, for an RRQ transfer.
pub trait BlockSource: Send {
	/// Reads up to `max_bytes`. Returns an empty vec at end-of-stream.
	async fn read_block(&mut self, max_bytes: usize) -> io::Result<Vec<u8>>;
	fn size(&self) -> u64;
}

/// Accepts and commits chunks of a file, for a WRQ transfer.
pub trait BlockSink: Send {
	async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
	async fn close(self) -> io::Result<()>;
}

/// Rejects any filename containing a literal `..` (the weak guard the
/// original server used) and, in addition, confines the joined path to
/// never carry a `ParentDir` component once resolved against `root` — the
/// canonicalization hardening suggested but not required by the spec.
fn safe_join(root: &Path, filename: &str) -> Result<PathBuf, FileError> {
	if filename.contains("..") {
		return Err(FileError::AccessViolation);
	}
	let joined = root.join(filename);
	if joined.components().any(|c| matches!(c, Component::ParentDir)) {
		return Err(FileError::AccessViolation);
	}
	Ok(joined)
}

pub struct FsBlockSource {
	file: File,
	size: u64,
}

impl FsBlockSource {
	pub async fn open(root: &Path, filename: &str) -> Result<Self, FileError> {
		let path = safe_join(root, filename)?;
		let file = File::open(&path).await.map_err(|e| match e.kind() {
			io::ErrorKind::NotFound => FileError::NotFound,
			io::ErrorKind::PermissionDenied => FileError::AccessViolation,
			_ => FileError::Other(e.to_string()),
		})?;
		let metadata = file.metadata().await.map_err(|e| FileError::Other(e.to_string()))?;
		if metadata.is_dir() {
			return Err(FileError::NotFound);
		}
		Ok(Self { file, size: metadata.len() })
	}
}

impl BlockSource for FsBlockSource {
	async fn read_block(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
		let mut buf = vec![0u8; max_bytes];
		let mut total = 0;
		while total < max_bytes {
			let n = self.file.read(&mut buf[total..]).await?;
			if n == 0 {
				break;
			}
			total += n;
		}
		buf.truncate(total);
		Ok(buf)
	}

	fn size(&self) -> u64 {
		self.size
	}
}

pub struct FsBlockSink {
	writer: BufWriter<File>,
	blocks_since_flush: usize,
}

impl FsBlockSink {
	pub async fn create(root: &Path, filename: &str) -> Result<Self, FileError> {
		let path = safe_join(root, filename)?;

		// Checked up front because it must also catch an existing directory,
		// which `create_new` below wouldn't reliably reject the same way.
		if tokio::fs::metadata(&path).await.is_ok() {
			return Err(FileError::AlreadyExists);
		}

		let file = tokio::fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&path)
			.await
			.map_err(|e| match e.kind() {
				io::ErrorKind::AlreadyExists => FileError::AlreadyExists,
				io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => FileError::AccessViolation,
				_ => FileError::Other(e.to_string()),
			})?;

		Ok(Self { writer: BufWriter::new(file), blocks_since_flush: 0 })
	}
}

impl BlockSink for FsBlockSink {
	async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
		self.writer.write_all(chunk).await?;
		self.blocks_since_flush += 1;
		if self.blocks_since_flush >= consts::BLOCKS_TO_CACHE {
			self.writer.flush().await?;
			self.blocks_since_flush = 0;
		}
		Ok(())
	}

	async fn close(mut self) -> io::Result<()> {
		self.writer.flush().await?;
		Ok(())
	}
}
