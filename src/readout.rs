//! Classic whole-card readout: tracks card insert/remove events reported
//! by the station and fetches the full card image once one is present.
//!
//! The original driver signals insert/remove as an exception raised out of
//! its generic command reader; here the state machine just consumes the
//! same frames directly and reports whether anything changed.

use time::OffsetDateTime;

use crate::cards::{self, CardFamily, CardRecord};
use crate::decode::{decode_card_number, u_be};
use crate::error::{Result, SiError};
use crate::frame::{self, Response};
use crate::model::{OperatingMode, ProtoConfig};
use crate::proto::{Cmd, P_SI6_CB};
use crate::transport::Transport;

/// Card currently sitting in the station, as last reported by [`Readout::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentCard {
	pub family: CardFamily,
	pub card_number: u32,
}

/// Card-insert/remove state machine for a station in readout mode.
#[derive(Debug, Default)]
pub struct Readout {
	current: Option<PresentCard>,
}

fn require_readout_mode(proto: ProtoConfig) -> Result<()> {
	if !proto.ext_proto {
		return Err(SiError::WrongMode(
			"readout requires the station in Extended Protocol mode".into(),
		));
	}
	if proto.mode != OperatingMode::Readout {
		return Err(SiError::WrongMode(
			"station must be in 'Read SI cards' operating mode".into(),
		));
	}
	Ok(())
}

impl Readout {
	pub fn new() -> Self {
		Self { current: None }
	}

	pub fn current(&self) -> Option<PresentCard> {
		self.current
	}

	/// Drains every frame already buffered, applying insert/remove events.
	/// Returns whether the presence state changed. Any frame that is
	/// neither a card event nor buffered input existing at all leaves the
	/// state untouched.
	pub fn poll(&mut self, transport: &mut dyn Transport, proto: ProtoConfig, timeout_ms: u32) -> Result<bool> {
		require_readout_mode(proto)?;

		if transport.bytes_waiting()? == 0 {
			return Ok(false);
		}

		let before = self.current;
		while transport.bytes_waiting()? > 0 {
			let resp = frame::read_response(transport, timeout_ms)?;
			self.apply_event(resp)?;
		}
		Ok(before != self.current)
	}

	fn apply_event(&mut self, resp: Response) -> Result<()> {
		if resp.cmd == u8::from(Cmd::SiRem) {
			self.current = None;
		} else if resp.cmd == u8::from(Cmd::Si5Det) {
			let card_number = decode_cardnr_field(&resp.data)?;
			self.current = Some(PresentCard { family: CardFamily::Si5, card_number });
		} else if resp.cmd == u8::from(Cmd::Si6Det) {
			let card_number = u_be(&resp.data) as u32;
			self.current = Some(PresentCard { family: CardFamily::Si6, card_number });
		} else if resp.cmd == u8::from(Cmd::Si9Det) {
			if resp.data.is_empty() {
				return Err(SiError::FramingError("SI9 detect frame carried no data".into()));
			}
			// the station sends a corrupt leading byte here; discard it.
			let card_number = u_be(&resp.data[1..]) as u32;
			let family = CardFamily::from_si9_range(card_number).ok_or(SiError::UnknownCardType(card_number))?;
			self.current = Some(PresentCard { family, card_number });
		}
		Ok(())
	}

	/// Fetches and decodes the currently-present card's full data. The
	/// card must already be known via a preceding [`Readout::poll`].
	pub fn read(&self, transport: &mut dyn Transport, proto: ProtoConfig, timeout_ms: u32, reftime: Option<OffsetDateTime>) -> Result<CardRecord> {
		require_readout_mode(proto)?;
		let present = self.current.ok_or_else(|| SiError::WrongMode("no card in the station".into()))?;

		let mut raw = Vec::new();
		match present.family {
			CardFamily::Si5 => {
				let resp = frame::transact(transport, Cmd::GetSi5.into(), &[], false, timeout_ms)?;
				raw.extend_from_slice(&resp.data);
			}
			CardFamily::Si6 => {
				let resp = frame::transact(transport, Cmd::GetSi6.into(), &[P_SI6_CB], false, timeout_ms)?;
				raw.extend_from_slice(&resp.data[1..]);
				for _ in 0..2 {
					let resp = frame::read_response(transport, timeout_ms)?;
					raw.extend_from_slice(&resp.data[1..]);
				}
			}
			CardFamily::Si8 | CardFamily::Si9 | CardFamily::PCard => {
				for block in 0..cards::block_count(present.family) {
					let resp = frame::transact(transport, Cmd::GetSi9.into(), &[block], false, timeout_ms)?;
					raw.extend_from_slice(&resp.data[1..]);
				}
			}
			CardFamily::Si10 => {
				// Reading SI10 cards block by block proved unreliable; read
				// with block number 8 (P_SI6_CB) like SI6, five reads total.
				let resp = frame::transact(transport, Cmd::GetSi9.into(), &[P_SI6_CB], false, timeout_ms)?;
				raw.extend_from_slice(&resp.data[1..]);
				for _ in 0..4 {
					let resp = frame::read_response(transport, timeout_ms)?;
					raw.extend_from_slice(&resp.data[1..]);
				}
			}
		}

		let reftime = reftime.unwrap_or_else(OffsetDateTime::now_utc);
		cards::decode_card_data(&raw, present.family, reftime)
	}

	/// Signals the station that the readout succeeded (it beeps/blinks).
	pub fn ack(&self, transport: &mut dyn Transport) -> Result<()> {
		frame::send_ack(transport)
	}
}

fn decode_cardnr_field(data: &[u8]) -> Result<u32> {
	if data.len() != 4 {
		return Err(SiError::FramingError(format!(
			"SI5 detect frame carried {} bytes, expected 4",
			data.len()
		)));
	}
	decode_card_number([data[0], data[1], data[2], data[3]])
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::tests::ScriptedTransport;

	fn readout_proto() -> ProtoConfig {
		ProtoConfig {
			ext_proto: true,
			auto_send: false,
			handshake: false,
			pw_access: false,
			punch_read: false,
			mode: OperatingMode::Readout,
		}
	}

	fn wire_response(cmd: u8, station: u16, data: &[u8]) -> Vec<u8> {
		let [st_hi, st_lo] = station.to_be_bytes();
		let mut payload = vec![cmd, (2 + data.len()) as u8, st_hi, st_lo];
		payload.extend_from_slice(data);
		let crc = crate::crc::crc(&payload);
		let mut wire = vec![0x02u8];
		wire.extend_from_slice(&payload);
		wire.extend_from_slice(&crc);
		wire.push(0x03);
		wire
	}

	#[test]
	fn rejects_poll_outside_readout_mode() {
		let mut transport = ScriptedTransport::new(vec![]);
		let mut proto = readout_proto();
		proto.mode = OperatingMode::Control;
		let mut readout = Readout::new();
		assert!(matches!(
			readout.poll(&mut transport, proto, 10),
			Err(SiError::WrongMode(_))
		));
	}

	#[test]
	fn si6_detect_then_remove_round_trips_presence() {
		let mut transport = ScriptedTransport::new(vec![]);
		let detect = wire_response(Cmd::Si6Det.into(), 0x002A, &[0x00, 0x20, 0x5B]);
		transport.push_unsolicited(&detect);
		let mut readout = Readout::new();
		let changed = readout.poll(&mut transport, readout_proto(), 10).unwrap();
		assert!(changed);
		assert_eq!(
			readout.current(),
			Some(PresentCard { family: CardFamily::Si6, card_number: 8283 })
		);

		let remove = wire_response(Cmd::SiRem.into(), 0x002A, &[]);
		transport.push_unsolicited(&remove);
		let changed = readout.poll(&mut transport, readout_proto(), 10).unwrap();
		assert!(changed);
		assert_eq!(readout.current(), None);
	}

	#[test]
	fn si9_detect_strips_leading_corrupt_byte_and_classifies_family() {
		let mut transport = ScriptedTransport::new(vec![]);
		// card number 7_500_000 = 0x007270E0, sent as corrupt_byte + 3 low bytes
		let detect = wire_response(Cmd::Si9Det.into(), 0x002A, &[0xAA, 0x72, 0x70, 0xE0]);
		transport.push_unsolicited(&detect);
		let mut readout = Readout::new();
		readout.poll(&mut transport, readout_proto(), 10).unwrap();
		assert_eq!(
			readout.current(),
			Some(PresentCard { family: CardFamily::Si10, card_number: 7_500_000 })
		);
	}

	#[test]
	fn reading_without_a_detected_card_is_wrong_mode() {
		let mut transport = ScriptedTransport::new(vec![]);
		let readout = Readout::new();
		assert!(matches!(
			readout.read(&mut transport, readout_proto(), 10, None),
			Err(SiError::WrongMode(_))
		));
	}
}
