//! STX-framed request/response envelope: assembly, parsing and the
//! unsolicited-frame recognition that replaces the original driver's
//! exception-based card-change signalling.

use log::{trace, warn};

use crate::crc;
use crate::error::{Result, SiError};
use crate::proto::{ACK, ETX, NAK, STX, WAKEUP};
use crate::transport::Transport;

/// A decoded response frame: command byte plus its data payload (the
/// station-code header has already been consumed to update the caller's
/// cached station code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
	pub cmd: u8,
	pub station: u16,
	pub data: Vec<u8>,
}

/// Encodes a request frame.
///
/// `skip_wakeup` mirrors the original's `skipwakeup` flag for callers that
/// just completed a turnaround and know the station is already awake.
pub fn encode_request(cmd: u8, params: &[u8], skip_wakeup: bool) -> Vec<u8> {
	let len = params.len() as u8;
	let mut payload = Vec::with_capacity(2 + params.len());
	payload.push(cmd);
	payload.push(len);
	payload.extend_from_slice(params);

	let [crc_hi, crc_lo] = crc::crc(&payload);

	let mut frame = Vec::with_capacity(payload.len() + 4);
	if !skip_wakeup {
		frame.push(WAKEUP);
	}
	frame.push(STX);
	frame.extend_from_slice(&payload);
	frame.push(crc_hi);
	frame.push(crc_lo);
	frame.push(ETX);
	frame
}

/// Reads and parses a single response frame from `transport`.
///
/// A leading [`WAKEUP`] byte is skipped. A [`NAK`] fails with
/// [`SiError::InvalidCommand`]. Anything else that isn't [`STX`] is a
/// framing error, and the input buffer is flushed before returning it.
pub fn read_response(transport: &mut dyn Transport, timeout_ms: u32) -> Result<Response> {
	let mut first = transport.read_exact(1, timeout_ms).map_err(|e| {
		trace!("read_response: no byte within deadline: {e}");
		e
	})?;
	if first[0] == WAKEUP {
		first = transport.read_exact(1, timeout_ms)?;
	}

	match first[0] {
		NAK => {
			warn!("station replied NAK");
			return Err(SiError::InvalidCommand);
		}
		STX => {}
		other => {
			warn!("expected STX, got 0x{other:02x}; flushing input");
			transport.flush_input()?;
			return Err(SiError::FramingError(format!(
				"expected STX, got 0x{other:02x}"
			)));
		}
	}

	let head = transport.read_exact(4, timeout_ms)?;
	let cmd = head[0];
	let len = head[1];
	let station = u16::from_be_bytes([head[2], head[3]]);

	if len < 2 {
		warn!("response length {len} too short for station header; flushing input");
		transport.flush_input()?;
		return Err(SiError::FramingError(format!(
			"response length {len} too short for station header"
		)));
	}
	let data_len = (len - 2) as usize;

	let data = transport.read_exact(data_len, timeout_ms)?;
	let tail = transport.read_exact(3, timeout_ms)?;
	let (crc_bytes, etx) = (&tail[0..2], tail[2]);

	if etx != ETX {
		warn!("expected ETX, got 0x{etx:02x}; flushing input");
		transport.flush_input()?;
		return Err(SiError::FramingError(format!(
			"expected ETX, got 0x{etx:02x}"
		)));
	}

	let mut payload = Vec::with_capacity(4 + data.len());
	payload.push(cmd);
	payload.push(len);
	payload.extend_from_slice(&head[2..4]);
	payload.extend_from_slice(&data);

	if !crc::verify(&payload, [crc_bytes[0], crc_bytes[1]]) {
		warn!("CRC mismatch on response cmd=0x{cmd:02x}");
		return Err(SiError::ChecksumError);
	}

	trace!("read_response: cmd=0x{cmd:02x} station=0x{station:04x} data={data:02x?}");
	Ok(Response { cmd, station, data })
}

/// Sends `cmd`/`params` and blocks for its response, failing the input-
/// buffer-not-empty check the original performs before every request.
pub fn transact(
	transport: &mut dyn Transport,
	cmd: u8,
	params: &[u8],
	skip_wakeup: bool,
	timeout_ms: u32,
) -> Result<Response> {
	let pending = transport.bytes_waiting()?;
	if pending > 0 {
		warn!("input buffer not empty before sending cmd=0x{cmd:02x} ({pending} bytes pending)");
		return Err(SiError::BufferNotEmpty { pending: pending as usize });
	}

	trace!("transact: cmd=0x{cmd:02x} params={params:02x?}");
	transport.write_all(&encode_request(cmd, params, skip_wakeup))?;
	read_response(transport, timeout_ms)
}

/// Sends a bare ACK byte, e.g. to acknowledge a successful card readout.
pub fn send_ack(transport: &mut dyn Transport) -> Result<()> {
	transport.write_all(&[ACK])
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::tests::LoopbackTransport;

	#[test]
	fn encode_request_includes_wakeup_by_default() {
		let frame = encode_request(0xF0, &[0x4D], false);
		assert_eq!(frame[0], WAKEUP);
		assert_eq!(frame[1], STX);
		assert_eq!(*frame.last().unwrap(), ETX);
	}

	#[test]
	fn encode_request_can_skip_wakeup() {
		let frame = encode_request(0xF0, &[0x4D], true);
		assert_eq!(frame[0], STX);
	}

	#[test]
	fn round_trip_through_encode_and_parse() {
		let request = encode_request(0xF0, &[0x4D], false);
		// Strip the wakeup byte and reuse the params/CRC to build a synthetic
		// response frame carrying the same command and a station header.
		let params = &request[2..request.len() - 3];
		let cmd = request[1];
		let len = (2 + params.len()) as u8;
		let mut payload = vec![cmd, len, 0x00, 0x2A];
		payload.extend_from_slice(params);
		let [crc_hi, crc_lo] = crc::crc(&payload);

		let mut wire = vec![STX];
		wire.extend_from_slice(&payload[..]);
		wire.push(crc_hi);
		wire.push(crc_lo);
		wire.push(ETX);

		let mut transport = LoopbackTransport::with_bytes(wire);
		let response = read_response(&mut transport, 1000).unwrap();
		assert_eq!(response.cmd, cmd);
		assert_eq!(response.station, 0x002A);
		assert_eq!(response.data, params);
	}

	#[test]
	fn nak_is_invalid_command() {
		let _ = env_logger::builder().is_test(true).try_init();
		let mut transport = LoopbackTransport::with_bytes(vec![NAK]);
		assert!(matches!(
			read_response(&mut transport, 1000),
			Err(SiError::InvalidCommand)
		));
	}

	#[test]
	fn bad_stx_is_framing_error() {
		let _ = env_logger::builder().is_test(true).try_init();
		let mut transport = LoopbackTransport::with_bytes(vec![0x99]);
		assert!(matches!(
			read_response(&mut transport, 1000),
			Err(SiError::FramingError(_))
		));
	}

	#[test]
	fn handshake_probe_round_trip() {
		// (S2) request FF 02 F0 01 4D <crc> 03 — wakeup-prefixed SET_MS Master
		let frame = encode_request(0xF0, &[0x4D], false);
		assert_eq!(frame[0], WAKEUP);
		assert_eq!(&frame[1..5], &[STX, 0xF0, 0x01, 0x4D]);
		assert_eq!(*frame.last().unwrap(), ETX);

		// Response 02 F0 03 00 2A 4D <crc> 03 -> (cmd=0xF0, station=0x002A, data=[0x4D])
		let payload = [0xF0u8, 0x03, 0x00, 0x2A, 0x4D];
		let [crc_hi, crc_lo] = crc::crc(&payload);
		let mut wire = vec![STX];
		wire.extend_from_slice(&payload);
		wire.push(crc_hi);
		wire.push(crc_lo);
		wire.push(ETX);

		let mut transport = LoopbackTransport::with_bytes(wire);
		let response = read_response(&mut transport, 1000).unwrap();
		assert_eq!(response.cmd, 0xF0);
		assert_eq!(response.station, 0x002A);
		assert_eq!(response.data, vec![0x4D]);
	}
}
