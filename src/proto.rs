//! Wire-level constants: framing bytes, command opcodes and protocol
//! parameters. Values are taken verbatim from the SportIdent programmer's
//! manual (as transcribed by `python-sireader`'s `si_constants.py`).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Start of transmission.
pub const STX: u8 = 0x02;
/// End of transmission.
pub const ETX: u8 = 0x03;
/// Sent to a station with a card inserted: causes it to beep until the card is removed.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement — invalid command or parameter.
pub const NAK: u8 = 0x15;
/// Sent first to wake a station up before a command frame.
pub const WAKEUP: u8 = 0xFF;

/// `SET_MS` parameter selecting direct (master) mode.
pub const P_MS_DIRECT: u8 = 0x4D;
/// `SET_MS` parameter selecting remote (slave) mode.
pub const P_MS_INDIRECT: u8 = 0x53;
/// `GET_SI6`/`GET_SI9` block mask requesting all SI6 blocks (192-punch cards).
pub const P_SI6_CB: u8 = 0x08;

/// Extended-protocol command opcodes.
///
/// Legacy (basic protocol) opcodes are out of scope: the core only talks
/// the extended protocol to the directly-connected station (§4.F), though
/// a remote station behind it may still report data in legacy framing,
/// which [`crate::backup`] decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Cmd {
	GetBackup = 0x81,
	SetSysVal = 0x82,
	GetSysVal = 0x83,
	GetSi5 = 0xB1,
	TransRec = 0xD3,
	GetSi6 = 0xE1,
	Si5Det = 0xE5,
	Si6Det = 0xE6,
	SiRem = 0xE7,
	Si9Det = 0xE8,
	GetSi9 = 0xEF,
	SetMs = 0xF0,
	GetMs = 0xF1,
	EraseBackup = 0xF5,
	SetTime = 0xF6,
	GetTime = 0xF7,
	Off = 0xF8,
	Beep = 0xF9,
	SetBaud = 0xFE,
}

/// Offset of the backup read/unsolicited-punch record pointer field,
/// relative to the start of `C_TRANS_REC`'s data.
pub const T_OFFSET: usize = 8;
/// Offset of the card number field within `C_TRANS_REC`'s data.
pub const T_CN: usize = 0;
/// Offset of the punch time field within `C_TRANS_REC`'s data.
pub const T_TIME: usize = 5;
/// Record length fetched per recovered autosend punch / single backup punch.
pub const REC_LEN: u8 = 8;
/// Offset of the card number within a single recovered backup punch record.
pub const BC_CN: usize = 3;
/// Offset of the punch time within a single recovered backup punch record.
pub const BC_TIME: usize = 8;
