//! Station model and operating-mode lookup tables, plus the cached
//! per-session protocol configuration they feed into.

use bitflags::bitflags;

bitflags! {
	/// Raw `O_PROTO` bit layout.
	struct ProtoFlags: u8 {
		const EXT_PROTO = 0b0000_0001;
		const AUTO_SEND = 0b0000_0010;
		const HANDSHAKE = 0b0000_0100;
		const PW_ACCESS = 0b0001_0000;
		const PUNCH_READ = 0b1000_0000;
	}
}

/// Station hardware model, identified by the 2-byte model id in SYSVAL.
///
/// Unknown ids are not an error: stations this driver has never seen are
/// still usable, just reported with [`Model::name`] returning `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model(pub u16);

impl Model {
	/// Human-readable model name, mirroring the device's `MODEL2NAME` table.
	pub fn name(self) -> &'static str {
		match self.0 {
			0x6F21 => "SIMSRR1-AP",
			0x8003 => "BSF3",
			0x8004 => "BSF4",
			0x8084 => "BSM4-RS232",
			0x8086 => "BSM6-RS232/USB",
			0x8115 => "BSF5",
			0x8117 | 0x8197 => "BSF7",
			0x8118 | 0x8198 => "BSF8",
			0x8146 => "BSF6",
			0x8187 => "BS7-SI-Master",
			0x8188 => "BS8-SI-Master",
			0x9197 => "BSM7-RS232/USB",
			0x9198 => "BSM8-USB/SRR",
			0x9597 => "BS7-S",
			0x9D9A => "BS11-BL",
			0xB197 => "BS7-P",
			0xB198 => "BS8-P",
			0xB897 => "BS7-GSM",
			0xCD9B => "BS11-BS",
			_ => "unknown",
		}
	}
}

/// Station operating mode (`O_MODE` byte in SYSVAL).
///
/// Covers every mode value the device reports, not just the subset this
/// driver actively supports — observed-but-unsupported modes still decode
/// instead of failing, so callers can log or display them; only operations
/// that genuinely require a specific mode reject the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
	SiacSpecial,
	Control,
	Start,
	Finish,
	Readout,
	ClearOld,
	Clear,
	Check,
	Printout,
	StartTrig,
	FinishTrig,
	BcControl,
	BcStart,
	BcFinish,
	BcReadout,
	Unknown(u8),
}

impl OperatingMode {
	pub fn from_byte(byte: u8) -> Self {
		match byte {
			0x01 => Self::SiacSpecial,
			0x02 => Self::Control,
			0x03 => Self::Start,
			0x04 => Self::Finish,
			0x05 => Self::Readout,
			0x06 => Self::ClearOld,
			0x07 => Self::Clear,
			0x0A => Self::Check,
			0x0B => Self::Printout,
			0x0C => Self::StartTrig,
			0x0D => Self::FinishTrig,
			0x12 => Self::BcControl,
			0x13 => Self::BcStart,
			0x14 => Self::BcFinish,
			0x15 => Self::BcReadout,
			other => Self::Unknown(other),
		}
	}

	pub fn to_byte(self) -> u8 {
		match self {
			Self::SiacSpecial => 0x01,
			Self::Control => 0x02,
			Self::Start => 0x03,
			Self::Finish => 0x04,
			Self::Readout => 0x05,
			Self::ClearOld => 0x06,
			Self::Clear => 0x07,
			Self::Check => 0x0A,
			Self::Printout => 0x0B,
			Self::StartTrig => 0x0C,
			Self::FinishTrig => 0x0D,
			Self::BcControl => 0x12,
			Self::BcStart => 0x13,
			Self::BcFinish => 0x14,
			Self::BcReadout => 0x15,
			Self::Unknown(byte) => byte,
		}
	}

	/// Modes `set_operating_mode` accepts.
	pub fn is_settable(self) -> bool {
		matches!(
			self,
			Self::Control | Self::Start | Self::Finish | Self::Readout | Self::Clear | Self::Check
		)
	}

	/// Modes the backup reader accepts a station in.
	pub fn supports_backup_read(self) -> bool {
		matches!(
			self,
			Self::Control | Self::Start | Self::Finish | Self::ClearOld | Self::Clear | Self::Check
		)
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::SiacSpecial => "SIAC special",
			Self::Control => "Control",
			Self::Start => "Start",
			Self::Finish => "Finish",
			Self::Readout => "Readout",
			Self::ClearOld => "Clear old",
			Self::Clear => "Clear",
			Self::Check => "Check",
			Self::Printout => "Printout",
			Self::StartTrig => "Start trig",
			Self::FinishTrig => "Finish trig",
			Self::BcControl => "BC control",
			Self::BcStart => "BC start",
			Self::BcFinish => "BC finish",
			Self::BcReadout => "BC readout",
			Self::Unknown(_) => "unknown",
		}
	}
}

/// Protocol configuration bits cached on the session, mirrored from the
/// `O_PROTO` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoConfig {
	pub ext_proto: bool,
	pub auto_send: bool,
	pub handshake: bool,
	pub pw_access: bool,
	pub punch_read: bool,
	pub mode: OperatingMode,
}

impl ProtoConfig {
	pub fn from_byte(byte: u8, mode: OperatingMode) -> Self {
		let flags = ProtoFlags::from_bits_truncate(byte);
		Self {
			ext_proto: flags.contains(ProtoFlags::EXT_PROTO),
			auto_send: flags.contains(ProtoFlags::AUTO_SEND),
			handshake: flags.contains(ProtoFlags::HANDSHAKE),
			pw_access: flags.contains(ProtoFlags::PW_ACCESS),
			punch_read: flags.contains(ProtoFlags::PUNCH_READ),
			mode,
		}
	}

	pub fn to_byte(self) -> u8 {
		let mut flags = ProtoFlags::empty();
		flags.set(ProtoFlags::EXT_PROTO, self.ext_proto);
		flags.set(ProtoFlags::AUTO_SEND, self.auto_send);
		flags.set(ProtoFlags::HANDSHAKE, self.handshake);
		flags.set(ProtoFlags::PW_ACCESS, self.pw_access);
		flags.set(ProtoFlags::PUNCH_READ, self.punch_read);
		flags.bits()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn model_name_known_and_unknown() {
		assert_eq!(Model(0x8086).name(), "BSM6-RS232/USB");
		assert_eq!(Model(0x0000).name(), "unknown");
	}

	#[test]
	fn operating_mode_round_trips() {
		for byte in [0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x0A] {
			assert_eq!(OperatingMode::from_byte(byte).to_byte(), byte);
		}
	}

	#[test]
	fn only_readout_subset_is_settable() {
		assert!(OperatingMode::Readout.is_settable());
		assert!(!OperatingMode::Printout.is_settable());
		assert!(!OperatingMode::BcControl.is_settable());
	}

	#[test]
	fn proto_config_byte_round_trip() {
		let cfg = ProtoConfig::from_byte(0b1001_0111, OperatingMode::Control);
		assert!(cfg.ext_proto);
		assert!(cfg.auto_send);
		assert!(cfg.handshake);
		assert!(cfg.pw_access);
		assert!(cfg.punch_read);
		assert_eq!(cfg.to_byte(), 0b1001_0111);
	}
}
