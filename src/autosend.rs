//! Autosend punch poller: reads the unsolicited `C_TRANS_REC` frames a
//! station in autosend mode pushes as each card is read, recovering any
//! backup-memory records it skipped over (e.g. while we weren't listening).

use time::OffsetDateTime;

use crate::decode::{decode_card_number, decode_time, u_be};
use crate::error::{Result, SiError};
use crate::frame;
use crate::proto::{Cmd, BC_CN, BC_TIME, REC_LEN, T_CN, T_OFFSET, T_TIME};
use crate::transport::Transport;

/// One punch surfaced by the autosend stream, either live or recovered
/// from backup memory to fill a gap.
#[derive(Debug, Clone, Copy)]
pub struct AutosendPunch {
	pub card_number: u32,
	pub time: Option<OffsetDateTime>,
	pub recovered: bool,
}

/// Tracks the next expected backup-memory offset across calls to [`poll`],
/// so gaps between polls are recovered rather than silently skipped.
#[derive(Debug, Default)]
pub struct AutosendPoller {
	next_offset: Option<u32>,
}

impl AutosendPoller {
	pub fn new() -> Self {
		Self { next_offset: None }
	}

	/// Drains buffered `C_TRANS_REC` frames until `timeout_ms` elapses with
	/// nothing new arriving, returning every punch seen (gap-recovered
	/// records first, in backup-memory order, each live record last).
	pub fn poll(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<Vec<AutosendPunch>> {
		let mut punches = Vec::new();

		loop {
			let resp = match frame::read_response(transport, timeout_ms) {
				Ok(resp) => resp,
				Err(SiError::Timeout) => break,
				Err(e) => return Err(e),
			};

			if resp.cmd != u8::from(Cmd::TransRec) {
				return Err(SiError::UnexpectedCommand(resp.cmd));
			}
			if resp.data.len() < T_OFFSET + 3 {
				return Err(SiError::FramingError("TRANS_REC frame shorter than its offset field".into()));
			}

			let cur_offset = u_be(&resp.data[T_OFFSET..T_OFFSET + 3]) as u32;

			if let Some(mut next) = self.next_offset {
				while next < cur_offset {
					punches.push(self.read_gap_punch(transport, timeout_ms, next)?);
					next += u32::from(REC_LEN);
				}
			}
			self.next_offset = Some(cur_offset + u32::from(REC_LEN));

			let card_number =
				decode_card_number([resp.data[T_CN], resp.data[T_CN + 1], resp.data[T_CN + 2], resp.data[T_CN + 3]])?;
			let time = decode_time([resp.data[T_TIME], resp.data[T_TIME + 1]], None, OffsetDateTime::now_utc());
			punches.push(AutosendPunch { card_number, time, recovered: false });
		}

		Ok(punches)
	}

	/// Fetches the single backup-memory record at `offset` (a record the
	/// station's own autosend stream skipped past) and decodes it.
	fn read_gap_punch(&self, transport: &mut dyn Transport, timeout_ms: u32, offset: u32) -> Result<AutosendPunch> {
		let addr = offset.to_be_bytes();
		let params = [addr[1], addr[2], addr[3], REC_LEN];
		let resp = frame::transact(transport, Cmd::GetBackup.into(), &params, false, timeout_ms)?;
		if resp.data.len() < BC_TIME + 2 {
			return Err(SiError::FramingError("recovered backup record shorter than expected".into()));
		}

		let card_number = decode_card_number([0, resp.data[BC_CN], resp.data[BC_CN + 1], resp.data[BC_CN + 2]])?;
		let time = decode_time([resp.data[BC_TIME], resp.data[BC_TIME + 1]], None, OffsetDateTime::now_utc());
		Ok(AutosendPunch { card_number, time, recovered: true })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::tests::ScriptedTransport;

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

	fn trans_rec(offset: u32, card_number_low3: [u8; 3], time: [u8; 2]) -> Vec<u8> {
		let mut data = vec![0u8; T_OFFSET + 3];
		data[T_CN + 1..T_CN + 4].copy_from_slice(&card_number_low3);
		data[T_TIME] = time[0];
		data[T_TIME + 1] = time[1];
		let off_bytes = offset.to_be_bytes();
		data[T_OFFSET..T_OFFSET + 3].copy_from_slice(&off_bytes[1..]);
		wire_response(u8::from(Cmd::TransRec), 0x002A, &data)
	}

	#[test]
	fn first_poll_establishes_offset_without_recovery() {
		let frame = trans_rec(0x0100, [0x1C, 0x20, 0x00], [0xEE, 0xEE]);
		let mut transport = ScriptedTransport::new(vec![]);
		transport.push_unsolicited(&frame);
		let mut poller = AutosendPoller::new();
		let punches = poller.poll(&mut transport, 10).unwrap();
		assert_eq!(punches.len(), 1);
		assert!(!punches[0].recovered);
		assert_eq!(poller.next_offset, Some(0x0100 + u32::from(REC_LEN)));
	}

	#[test]
	fn gap_between_polls_is_recovered_before_the_live_record() {
		let mut transport = ScriptedTransport::new(vec![]);
		let first = trans_rec(0x0100, [0x00, 0x00, 0x01], [0xEE, 0xEE]);
		transport.push_unsolicited(&first);
		let mut poller = AutosendPoller::new();
		poller.poll(&mut transport, 10).unwrap();

		// Next live record jumps two records ahead; the skipped one (at
		// 0x0100 + REC_LEN) must be recovered via GET_BACKUP first.
		let gap_record = wire_response(
			Cmd::GetBackup.into(),
			0x002A,
			&[0, 0, 0, 0x00, 0x00, 0x02, 0, 0, 0xEE, 0xEE],
		);
		let second = trans_rec(0x0100 + 2 * u32::from(REC_LEN), [0x00, 0x00, 0x03], [0xEE, 0xEE]);

		let mut transport2 = ScriptedTransport::new(vec![gap_record]);
		transport2.push_unsolicited(&second);
		let punches = poller.poll(&mut transport2, 10).unwrap();

		assert_eq!(punches.len(), 2);
		assert!(punches[0].recovered);
		assert_eq!(punches[0].card_number, 2);
		assert!(!punches[1].recovered);
		assert_eq!(punches[1].card_number, 3);
	}

	#[test]
	fn unexpected_command_is_an_error() {
		let mut transport = ScriptedTransport::new(vec![]);
		let frame = wire_response(Cmd::Si5Det.into(), 0x002A, &[0x00, 0x00, 0x01]);
		transport.push_unsolicited(&frame);
		let mut poller = AutosendPoller::new();
		assert!(matches!(
			poller.poll(&mut transport, 10),
			Err(SiError::UnexpectedCommand(_))
		));
	}
}
