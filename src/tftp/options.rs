//! RFC 2347/2348/2349 option negotiation.

use std::time::Duration;

use super::consts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
	#[error("invalid or out-of-range option value")]
	InvalidOption,
}

/// Options that actually take effect on the transfer context once negotiated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedOptions {
	pub blksize: u16,
	pub timeout: Duration,
}

impl Default for AppliedOptions {
	fn default() -> Self {
		Self {
			blksize: consts::DEFAULT_BLOCK_SIZE,
			timeout: Duration::from_secs(consts::DEFAULT_TIMEOUT_SECS),
		}
	}
}

enum TransferSizeMode {
	/// RRQ: the client sends `tsize=0` as a probe; reply with the real size.
	/// Any other requested value is silently dropped from the OACK.
	ReportFileSize(u64),
	/// WRQ: echo back whatever integer the client provided, renormalized.
	EchoClientValue,
}

/// Negotiates the options carried by an RRQ, given the size in bytes of the
/// file about to be served.
pub fn negotiate_rrq(
	raw: &[(String, String)],
	defaults: AppliedOptions,
	file_size: u64,
) -> Result<(Vec<(String, String)>, AppliedOptions), OptionError> {
	negotiate(raw, defaults, TransferSizeMode::ReportFileSize(file_size))
}

/// Negotiates the options carried by a WRQ; `tsize` is echoed back verbatim,
/// no filesystem free-space check is performed (per spec).
pub fn negotiate_wrq(
	raw: &[(String, String)],
	defaults: AppliedOptions,
) -> Result<(Vec<(String, String)>, AppliedOptions), OptionError> {
	negotiate(raw, defaults, TransferSizeMode::EchoClientValue)
}

fn negotiate(
	raw: &[(String, String)],
	defaults: AppliedOptions,
	tsize_mode: TransferSizeMode,
) -> Result<(Vec<(String, String)>, AppliedOptions), OptionError> {
	let mut applied = defaults;
	let mut oack = Vec::new();

	for (name, value) in raw {
		if name.eq_ignore_ascii_case(consts::OPT_BLOCKSIZE_IDENT) {
			let size: u16 = value.parse().map_err(|_| OptionError::InvalidOption)?;
			if !(consts::MIN_BLOCK_SIZE..=consts::MAX_BLOCK_SIZE).contains(&size) {
				return Err(OptionError::InvalidOption);
			}
			applied.blksize = size;
			oack.push((name.clone(), value.clone()));
		} else if name.eq_ignore_ascii_case(consts::OPT_TIMEOUT_IDENT) {
			let secs: i64 = value.parse().map_err(|_| OptionError::InvalidOption)?;
			if (consts::MIN_TIMEOUT_SECS as i64..=consts::MAX_TIMEOUT_SECS as i64).contains(&secs) {
				applied.timeout = Duration::from_secs(secs as u64);
				oack.push((name.clone(), value.clone()));
			}
			// Out-of-range timeouts are silently not acknowledged; this is
			// not a parse failure and must not abort negotiation.
		} else if name.eq_ignore_ascii_case(consts::OPT_TRANSFERSIZE_IDENT) {
			let requested: u64 = value.parse().map_err(|_| OptionError::InvalidOption)?;
			match tsize_mode {
				TransferSizeMode::ReportFileSize(size) if requested == 0 => {
					oack.push((name.clone(), size.to_string()));
				}
				TransferSizeMode::ReportFileSize(_) => {
					// Client sent a non-zero probe on an RRQ; nothing to report.
				}
				TransferSizeMode::EchoClientValue => {
					oack.push((name.clone(), requested.to_string()));
				}
			}
		}
		// Unrecognized options are silently omitted from the OACK.
	}

	Ok((oack, applied))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pair(name: &str, value: &str) -> (String, String) {
		(name.to_string(), value.to_string())
	}

	#[test]
	fn rrq_blksize_is_echoed_and_applied() {
		let (oack, applied) = negotiate_rrq(&[pair("blksize", "1024")], AppliedOptions::default(), 10).unwrap();
		assert_eq!(oack, vec![pair("blksize", "1024")]);
		assert_eq!(applied.blksize, 1024);
	}

	#[test]
	fn rrq_blksize_out_of_range_fails() {
		let err = negotiate_rrq(&[pair("blksize", "4")], AppliedOptions::default(), 10).unwrap_err();
		assert_eq!(err, OptionError::InvalidOption);
	}

	#[test]
	fn rrq_non_numeric_blksize_fails() {
		let err = negotiate_rrq(&[pair("blksize", "51o2o")], AppliedOptions::default(), 10).unwrap_err();
		assert_eq!(err, OptionError::InvalidOption);
	}

	#[test]
	fn rrq_tsize_zero_reports_actual_size() {
		let (oack, _) = negotiate_rrq(&[pair("tsize", "0")], AppliedOptions::default(), 1024).unwrap();
		assert_eq!(oack, vec![pair("tsize", "1024")]);
	}

	#[test]
	fn rrq_tsize_nonzero_is_dropped() {
		let (oack, _) = negotiate_rrq(&[pair("tsize", "77")], AppliedOptions::default(), 1024).unwrap();
		assert!(oack.is_empty());
	}

	#[test]
	fn wrq_tsize_is_echoed_back() {
		let (oack, _) = negotiate_wrq(&[pair("tsize", "2048")], AppliedOptions::default()).unwrap();
		assert_eq!(oack, vec![pair("tsize", "2048")]);
	}

	#[test]
	fn timeout_out_of_range_is_silently_dropped_not_an_error() {
		let (oack, applied) = negotiate_rrq(
			&[pair("timeout", "0")],
			AppliedOptions::default(),
			10,
		)
		.unwrap();
		assert!(oack.is_empty());
		assert_eq!(applied.timeout, AppliedOptions::default().timeout);
	}

	#[test]
	fn unrecognized_option_is_omitted() {
		let (oack, _) = negotiate_rrq(&[pair("windowsize", "4")], AppliedOptions::default(), 10).unwrap();
		assert!(oack.is_empty());
	}

	#[test]
	fn option_name_casing_is_preserved_on_echo() {
		let (oack, _) = negotiate_rrq(&[pair("BlkSize", "256")], AppliedOptions::default(), 10).unwrap();
		assert_eq!(oack, vec![pair("BlkSize", "256")]);
	}
}
