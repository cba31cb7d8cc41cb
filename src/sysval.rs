//! SYSVAL: the 128-byte system-configuration block, fetched by a single
//! request and interpreted by fixed offsets (`O_*` in the programmer's
//! manual). All offsets below are written as the manual gives them; a
//! leading filler byte the device always prepends is compensated for once,
//! inside [`SysVal::get`].

use time::{Date, Month};

use crate::error::{Result, SiError};
use crate::frame;
use crate::model::{Model, OperatingMode, ProtoConfig};
use crate::proto::Cmd;
use crate::transport::Transport;

const O_SERIAL_NO: u8 = 0x00;
const O_FIRMWARE: u8 = 0x05;
const O_BUILD_DATE: u8 = 0x08;
const O_MODEL_ID: u8 = 0x0B;
const O_MEM_SIZE: u8 = 0x0D;
const O_BAT_DATE: u8 = 0x15;
const O_BAT_CAP: u8 = 0x19;
const O_BACKUP_PTR_HI: u8 = 0x1C;
const O_BACKUP_PTR_LO: u8 = 0x21;
const O_SI6_CB: u8 = 0x33;
const O_USED_BAT_CAP: u8 = 0x35;
const O_MEM_OVERFLOW: u8 = 0x3D;
const O_BAT_VOLT: u8 = 0x50;
const O_PROGRAM: u8 = 0x70;
const O_MODE: u8 = 0x71;
const O_STATION_CODE: u8 = 0x72;
const O_FEEDBACK: u8 = 0x73;
const O_PROTO: u8 = 0x74;
const O_ACTIVE_TIME: u8 = 0x7E;

/// Whether the station is set up to read all 8 SI6 blocks (192 punches) or
/// only the compact 3-block layout — or some other byte value entirely,
/// which the device itself treats as "don't recognize, leave as is".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Si6PunchMode {
	Enabled,
	Disabled,
	Unrecognized(u8),
}

/// Competition vs. training program bit (`O_PROGRAM`, bit 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
	Competition,
	Training,
}

/// The cached 128-byte SYSVAL image plus typed accessors over it.
#[derive(Debug, Default)]
pub struct SysVal {
	image: Option<[u8; 128]>,
}

impl SysVal {
	pub fn new() -> Self {
		Self { image: None }
	}

	pub fn is_loaded(&self) -> bool {
		self.image.is_some()
	}

	/// The raw 128-byte image, for callers that want to serialize it
	/// themselves (e.g. as a CSV dump); that formatting stays outside
	/// this crate.
	pub fn image(&self) -> Option<&[u8; 128]> {
		self.image.as_ref()
	}

	/// Requests `GET_SYS_VAL 0x00 0x80` and stores the 128-byte reply.
	pub fn refresh(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<()> {
		let resp = frame::transact(transport, Cmd::GetSysVal.into(), &[0x00, 0x80], false, timeout_ms)?;
		if resp.data.len() < 128 {
			return Err(SiError::FramingError(format!(
				"SYSVAL reply carried {} bytes, expected 128",
				resp.data.len()
			)));
		}
		let mut image = [0u8; 128];
		image.copy_from_slice(&resp.data[..128]);
		self.image = Some(image);
		Ok(())
	}

	fn get(&mut self, transport: &mut dyn Transport, timeout_ms: u32, offset: u8, len: usize) -> Result<Vec<u8>> {
		if self.image.is_none() {
			self.refresh(transport, timeout_ms)?;
		}
		let image = self.image.as_ref().expect("just refreshed");
		// the device's offset table skips a leading filler byte
		let start = usize::from(offset) + 1;
		Ok(image[start..start + len].to_vec())
	}

	/// Issues `SET_SYS_VAL offset|bytes`, then refreshes the cached image.
	pub fn set(&mut self, transport: &mut dyn Transport, timeout_ms: u32, offset: u8, bytes: &[u8]) -> Result<()> {
		let mut params = Vec::with_capacity(1 + bytes.len());
		params.push(offset);
		params.extend_from_slice(bytes);
		frame::transact(transport, Cmd::SetSysVal.into(), &params, false, timeout_ms)?;
		self.refresh(transport, timeout_ms)
	}

	pub fn serial_no(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<u32> {
		let b = self.get(transport, timeout_ms, O_SERIAL_NO, 4)?;
		Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
	}

	pub fn firmware(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<String> {
		let b = self.get(transport, timeout_ms, O_FIRMWARE, 3)?;
		Ok(String::from_utf8_lossy(&b).into_owned())
	}

	pub fn build_date(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<Option<Date>> {
		let b = self.get(transport, timeout_ms, O_BUILD_DATE, 3)?;
		Ok(decode_yymmdd(b[0], b[1], b[2]))
	}

	pub fn model(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<Model> {
		let b = self.get(transport, timeout_ms, O_MODEL_ID, 2)?;
		Ok(Model(u16::from_be_bytes([b[0], b[1]])))
	}

	pub fn mem_size_kb(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<u8> {
		let b = self.get(transport, timeout_ms, O_MEM_SIZE, 1)?;
		Ok(b[0])
	}

	pub fn battery_date(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<Option<Date>> {
		let b = self.get(transport, timeout_ms, O_BAT_DATE, 3)?;
		Ok(decode_yymmdd(b[0], b[1], b[2]))
	}

	/// Battery capacity in mAh (raw unit is 16/225 mAh).
	pub fn battery_capacity_mah(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<f64> {
		let b = self.get(transport, timeout_ms, O_BAT_CAP, 2)?;
		let raw = u16::from_be_bytes([b[0], b[1]]);
		Ok(f64::from(raw) * 16.0 / 225.0)
	}

	/// Raw high/low backup pointer fields concatenated into one 4-byte
	/// big-endian offset, per `read_backup`'s `end_ptr` computation.
	pub fn backup_ptr(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<u32> {
		let hi = self.get(transport, timeout_ms, O_BACKUP_PTR_HI, 2)?;
		let lo = self.get(transport, timeout_ms, O_BACKUP_PTR_LO, 2)?;
		Ok(u32::from_be_bytes([hi[0], hi[1], lo[0], lo[1]]))
	}

	pub fn si6_192_punches(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<Si6PunchMode> {
		let b = self.get(transport, timeout_ms, O_SI6_CB, 1)?;
		Ok(match b[0] {
			0x00 | 0xC1 => Si6PunchMode::Disabled,
			0x08 | 0xFF => Si6PunchMode::Enabled,
			other => Si6PunchMode::Unrecognized(other),
		})
	}

	/// Used battery capacity as a fraction of full (raw unit ~= 2.778e-5).
	pub fn used_battery_fraction(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<f64> {
		let b = self.get(transport, timeout_ms, O_USED_BAT_CAP, 3)?;
		let raw = u32::from_be_bytes([0, b[0], b[1], b[2]]);
		Ok(f64::from(raw) * 2.778e-5)
	}

	pub fn mem_overflow(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<bool> {
		let b = self.get(transport, timeout_ms, O_MEM_OVERFLOW, 1)?;
		Ok(b[0] != 0)
	}

	/// Battery voltage in volts (raw unit = 5/65536 V).
	pub fn battery_volt(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<f64> {
		let b = self.get(transport, timeout_ms, O_BAT_VOLT, 2)?;
		let raw = u16::from_be_bytes([b[0], b[1]]);
		Ok(f64::from(raw) * 5.0 / 65536.0)
	}

	pub fn program(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<Program> {
		let b = self.get(transport, timeout_ms, O_PROGRAM, 1)?;
		Ok(if b[0] & 0x20 != 0 {
			Program::Training
		} else {
			Program::Competition
		})
	}

	pub fn mode(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<OperatingMode> {
		let b = self.get(transport, timeout_ms, O_MODE, 1)?;
		Ok(OperatingMode::from_byte(b[0]))
	}

	/// Station code, combining the low byte at `O_STATION_CODE` with the
	/// high 2 bits stashed in the feedback byte.
	pub fn station_code(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<u16> {
		let low = self.get(transport, timeout_ms, O_STATION_CODE, 1)?[0];
		let feedback = self.get(transport, timeout_ms, O_FEEDBACK, 1)?[0];
		Ok(crate::decode::decode_station_code(low, Some(feedback)))
	}

	pub fn feedback(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<(bool, bool)> {
		let b = self.get(transport, timeout_ms, O_FEEDBACK, 1)?[0];
		Ok((b & 0x01 != 0, b & 0x04 != 0))
	}

	pub fn protocol(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<ProtoConfig> {
		let proto_byte = self.get(transport, timeout_ms, O_PROTO, 1)?[0];
		let mode = self.mode(transport, timeout_ms)?;
		Ok(ProtoConfig::from_byte(proto_byte, mode))
	}

	pub fn active_time_min(&mut self, transport: &mut dyn Transport, timeout_ms: u32) -> Result<u16> {
		let b = self.get(transport, timeout_ms, O_ACTIVE_TIME, 2)?;
		Ok(u16::from_be_bytes([b[0], b[1]]))
	}

	pub fn set_mode(&mut self, transport: &mut dyn Transport, timeout_ms: u32, mode: OperatingMode) -> Result<()> {
		self.set(transport, timeout_ms, O_MODE, &[mode.to_byte()])
	}

	/// `code`'s low byte goes to `O_STATION_CODE`; the high byte preserves
	/// the unrelated feedback bits 0..5 and only writes bits 6..7 (per the
	/// `(code >> 2) | 0x3F` mask the device expects).
	pub fn set_station_code(&mut self, transport: &mut dyn Transport, timeout_ms: u32, code: u16) -> Result<()> {
		if code < 1 || code > 1023 {
			return Err(SiError::InvalidArgument(format!(
				"station code {code} out of range 1..=1023"
			)));
		}
		let low = (code & 0xFF) as u8;
		let high = ((code >> 2) | 0x3F) as u8;
		self.set(transport, timeout_ms, O_STATION_CODE, &[low, high])
	}

	pub fn set_feedback(&mut self, transport: &mut dyn Transport, timeout_ms: u32, optical: bool, audible: bool) -> Result<()> {
		let current = self.get(transport, timeout_ms, O_FEEDBACK, 1)?[0];
		let mut byte = current;
		if optical {
			byte |= 0x01;
		} else {
			byte &= !0x01;
		}
		if audible {
			byte |= 0x04;
		} else {
			byte &= !0x04;
		}
		self.set(transport, timeout_ms, O_FEEDBACK, &[byte])
	}

	pub fn set_active_time(&mut self, transport: &mut dyn Transport, timeout_ms: u32, minutes: u16) -> Result<()> {
		if minutes > 5759 {
			return Err(SiError::InvalidArgument(format!(
				"active time {minutes} exceeds the 5759 minute maximum"
			)));
		}
		self.set(transport, timeout_ms, O_ACTIVE_TIME, &minutes.to_be_bytes())
	}

	pub fn set_si6_192(&mut self, transport: &mut dyn Transport, timeout_ms: u32, enable: bool) -> Result<()> {
		self.set(transport, timeout_ms, O_SI6_CB, &[if enable { 0xFF } else { 0xC1 }])
	}

	pub fn set_protocol_byte(&mut self, transport: &mut dyn Transport, timeout_ms: u32, cfg: ProtoConfig) -> Result<()> {
		self.set(transport, timeout_ms, O_PROTO, &[cfg.to_byte()])
	}
}

fn decode_yymmdd(yy: u8, mm: u8, dd: u8) -> Option<Date> {
	let month = Month::try_from(mm).ok()?;
	Date::from_calendar_date(2000 + i32::from(yy), month, dd).ok()
}
