//! Error taxonomy shared by every layer of the driver stack.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SiError>;

/// Everything that can go wrong talking to a station.
///
/// None of these are retried internally except the 38400→4800 baud
/// fallback performed once by [`crate::session::Session::open`].
#[derive(Debug, thiserror::Error)]
pub enum SiError {
	/// No response byte arrived within the configured deadline.
	#[error("timeout waiting for response")]
	Timeout,

	/// The station replied with NAK (0x15).
	#[error("station rejected the command (NAK)")]
	InvalidCommand,

	/// The response was missing STX/ETX or had another structural defect.
	#[error("framing error: {0}")]
	FramingError(String),

	/// CRC of the response payload did not match the trailing CRC bytes.
	#[error("CRC check failed")]
	ChecksumError,

	/// A new request was issued while stale bytes were still buffered.
	#[error("input buffer not empty before sending command ({pending} bytes pending)")]
	BufferNotEmpty {
		/// Bytes observed waiting in the input buffer.
		pending: usize,
	},

	/// The requested operation is incompatible with the station's current mode/protocol.
	#[error("operation not supported in current mode: {0}")]
	WrongMode(String),

	/// An argument was out of the range the protocol allows.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// A card's leading byte did not identify a known card series.
	#[error("unknown card series")]
	UnknownCardSeries,

	/// A card number fell outside every documented family range.
	#[error("unknown card type for number {0}")]
	UnknownCardType(u32),

	/// No candidate serial port accepted the connect probe.
	#[error("no SI reader found: {0}")]
	NoReader(String),

	/// An unsolicited frame arrived that the caller did not expect.
	#[error("unexpected command byte 0x{0:02x} received")]
	UnexpectedCommand(u8),

	/// Underlying transport (serial port) error.
	#[error("serial I/O error: {0}")]
	Io(#[from] io::Error),
}
