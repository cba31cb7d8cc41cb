//! Paginated reader for the station's circular backup-memory punch log,
//! in both extended and legacy record formats.

use time::{Date, Duration, Month, OffsetDateTime, Time};

use crate::decode::{decode_card_number, decode_micros, u_be};
use crate::error::{Result, SiError};
use crate::frame;
use crate::model::ProtoConfig;
use crate::proto::Cmd;
use crate::sysval::SysVal;
use crate::transport::Transport;

/// Each `GET_BACKUP` reply carries a 2-byte record-type header plus the
/// usual leading filler byte before the punch data starts.
const HEADER_SKIP: usize = 3;
const EXTENDED_RECORD_LEN: usize = 8;
const LEGACY_RECORD_LEN: usize = 6;

/// A problem the device itself flagged in a backup record, rather than a
/// decode failure on our end — these are reported, not discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupError {
	/// Device-reported `ErrX` code (X = low nibble).
	Unrecorded(u8),
	/// `month` was 0 or >12; corrected to the adjacent year, tagged.
	DateOverflow,
}

/// One decoded backup-memory record.
#[derive(Debug, Clone, Copy)]
pub struct BackupRecord {
	pub time: OffsetDateTime,
	pub card_number: u32,
	pub error: Option<BackupError>,
}

/// Reads the entire used backup memory of a station in one of the
/// supported modes, decoding every record.
pub fn read_backup(
	transport: &mut dyn Transport,
	sysval: &mut SysVal,
	proto: ProtoConfig,
	timeout_ms: u32,
) -> Result<Vec<BackupRecord>> {
	if !proto.mode.supports_backup_read() {
		return Err(SiError::WrongMode(format!(
			"mode {} cannot read backup memory",
			proto.mode.name()
		)));
	}

	sysval.refresh(transport, timeout_ms)?;
	let end_ptr = sysval.backup_ptr(transport, timeout_ms)?;

	let mut raw = Vec::new();
	let mut read_ptr: u32 = 0x100;
	while read_ptr < end_ptr {
		let remaining = end_ptr - read_ptr;
		let count = remaining.min(0x80) as u8;
		let addr = read_ptr.to_be_bytes();
		let params = [addr[1], addr[2], addr[3], count];

		let resp = frame::transact(transport, Cmd::GetBackup.into(), &params, false, timeout_ms)?;
		if resp.data.len() < HEADER_SKIP {
			return Err(SiError::FramingError("GET_BACKUP reply shorter than its header".into()));
		}
		raw.extend_from_slice(&resp.data[HEADER_SKIP..]);
		read_ptr += u32::from(count);
	}

	let step = if proto.ext_proto { EXTENDED_RECORD_LEN } else { LEGACY_RECORD_LEN };
	let now = OffsetDateTime::now_utc();

	raw.chunks_exact(step)
		.map(|chunk| {
			if proto.ext_proto {
				decode_extended_record(chunk)
			} else {
				decode_legacy_record(chunk, now)
			}
		})
		.collect()
}

fn decode_extended_record(r: &[u8]) -> Result<BackupRecord> {
	const CN: usize = 0;
	const YM: usize = 3;
	const MDAP: usize = 4;
	const SECS: usize = 5;
	const MS: usize = 7;

	let card_number = decode_card_number([0, r[CN], r[CN + 1], r[CN + 2]])?;

	let mut year = 2000 + i32::from(r[YM] >> 2);
	let mut month = (i32::from(r[YM] & 0x03) << 2) | i32::from(r[MDAP] >> 6);
	let day = (r[MDAP] & 0x3F) >> 1;
	let pm = r[MDAP] & 0x01 != 0;

	let mut error = None;
	let mut secs: i64 = 0;
	let mut micros: i64 = 0;
	if r[SECS] >= 0xF0 {
		error = Some(BackupError::Unrecorded(r[SECS] & 0x0F));
	} else {
		secs = u_be(&r[SECS..SECS + 2]) as i64;
		micros = i64::from(decode_micros(r[MS]));
	}

	if month == 0 {
		month = 12;
		year -= 1;
		error = Some(BackupError::DateOverflow);
	} else if month > 12 {
		month -= 12;
		year += 1;
		error = Some(BackupError::DateOverflow);
	}
	if pm {
		secs += 12 * 3600;
	}

	let date = Date::from_calendar_date(year, month_from_i32(month)?, day)
		.map_err(|e| SiError::FramingError(format!("invalid backup record date: {e}")))?;
	let time = date.midnight().assume_utc() + Duration::seconds(secs) + Duration::microseconds(micros);

	Ok(BackupRecord { time, card_number, error })
}

fn decode_legacy_record(r: &[u8], now: OffsetDateTime) -> Result<BackupRecord> {
	const CN: usize = 0;
	const SECS: usize = 2;
	const PTD: usize = 4;
	const CNS: usize = 5;

	let card_number = decode_card_number([0, r[CNS], r[CN], r[CN + 1]])?;

	// Per spec: same weekday formula as punch-time decoding, not the
	// original's shift-by-zero precedence slip.
	let weekday = ((i32::from((r[PTD] >> 1) & 0x07)) - 1).rem_euclid(7);
	let pm = r[PTD] & 0x01 != 0;

	let mut error = None;
	let mut secs: i64 = 0;
	if r[SECS] >= 0xF0 {
		error = Some(BackupError::Unrecorded(r[SECS] & 0x0F));
	} else {
		secs = u_be(&r[SECS..SECS + 2]) as i64;
	}
	if pm {
		secs += 12 * 3600;
	}

	let midnight_now = now.replace_time(Time::MIDNIGHT);
	let now_weekday = i64::from(now.weekday().number_days_from_monday());
	let secs_since_midnight = (now - midnight_now).whole_seconds();

	let day_offset = if i64::from(weekday) * 86_400 + secs < now_weekday * 86_400 + secs_since_midnight + 3600 {
		now_weekday - i64::from(weekday)
	} else {
		now_weekday - i64::from(weekday) + 7
	};

	let time = midnight_now + Duration::seconds(secs) - Duration::days(day_offset);

	Ok(BackupRecord { time, card_number, error })
}

fn month_from_i32(month: i32) -> Result<Month> {
	Month::try_from(month as u8).map_err(|_| SiError::FramingError(format!("invalid month {month} in backup record")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_extended_record() {
		// (S6) 00 01 00 2A 5C C3 1C 20 80
		let r = [0x01, 0x00, 0x2A, 0x5C, 0xC3, 0x1C, 0x20, 0x80];
		let rec = decode_extended_record(&r).unwrap();
		assert_eq!(rec.card_number, 0x01002A);
		assert_eq!(rec.error, None);
		assert_eq!(rec.time.year(), 2023);
		assert_eq!(u8::from(rec.time.month()), 3);
		assert_eq!(rec.time.day(), 1);
		assert_eq!(rec.time.hour(), 14);
		assert_eq!(rec.time.minute(), 0);
		assert_eq!(rec.time.second(), 0);
		assert_eq!(rec.time.microsecond(), 500_000);
	}

	#[test]
	fn extended_error_code_yields_midnight_or_noon() {
		let mut r = [0x01, 0x00, 0x2A, 0x5C, 0xC3, 0xF0, 0x03, 0x00];
		// high secs byte 0xF0 -> ErrX (X=0x3 low nibble of... wait low nibble of high byte)
		r[5] = 0xF3;
		let rec = decode_extended_record(&r).unwrap();
		assert_eq!(rec.error, Some(BackupError::Unrecorded(0x3)));
		// PM bit (MDAP bit0) is 1 here -> noon
		assert_eq!(rec.time.hour(), 12);
	}

	#[test]
	fn extended_month_zero_rolls_back_a_year() {
		// YM byte encodes month bits as 0 -> month computed as 0 before correction
		let r = [0x01, 0x00, 0x2A, 0x00 /* year=2000, month hi=0 */, 0x00, 0x1C, 0x20, 0x00];
		let rec = decode_extended_record(&r).unwrap();
		assert_eq!(rec.error, Some(BackupError::DateOverflow));
		assert_eq!(rec.time.year(), 1999);
		assert_eq!(u8::from(rec.time.month()), 12);
	}

	#[test]
	fn decodes_legacy_record_card_number() {
		let r = [0x20, 0x5B, 0x1C, 0x20, 0x02, 0x01];
		let now = OffsetDateTime::now_utc();
		let rec = decode_legacy_record(&r, now).unwrap();
		// CNS=1 (<2) -> low2 = 0x205B = 8283
		assert_eq!(rec.card_number, 8283);
		assert_eq!(rec.error, None);
	}

	#[test]
	fn legacy_record_time_is_most_recent_matching_weekday_in_the_past() {
		use time::macros::datetime;

		let _ = env_logger::builder().is_test(true).try_init();

		// ptd=0x02 -> weekday bits = 1 -> decoded weekday 0 (Monday), AM.
		// now is Tuesday 2024-05-14 10:00:00 -> the most recent Monday is
		// the day before, not seven-ish days in the future.
		let r = [0x20, 0x5B, 0x1C, 0x20, 0x02, 0x01];
		let now = datetime!(2024-05-14 10:00:00 UTC);
		let rec = decode_legacy_record(&r, now).unwrap();

		assert_eq!(rec.time, datetime!(2024-05-13 02:00:00 UTC));
		assert!(rec.time <= now);
		assert_eq!(rec.time.weekday().number_days_from_monday(), 0);
	}
}
