//! Value decoders: the small, pure byte-to-domain-value conversions that
//! every higher layer (SYSVAL, card readout, backup reader) builds on.

use time::{Duration, OffsetDateTime, Time};

use crate::error::{Result, SiError};

/// Big-endian unsigned integer over 1..8 bytes.
pub fn u_be(bytes: &[u8]) -> u64 {
	bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Decodes a 4-byte card number field (`00 | series | low_hi | low_lo`).
///
/// The leading byte must be zero — a nonzero leading byte means the data
/// isn't a card-number field at all (e.g. it slipped out of alignment).
pub fn decode_card_number(bytes: [u8; 4]) -> Result<u32> {
	if bytes[0] != 0 {
		return Err(SiError::UnknownCardSeries);
	}

	let series = bytes[1];
	let low3 = u_be(&bytes[1..4]) as u32;
	let low2 = u_be(&bytes[2..4]) as u32;

	let number = if low3 < 500_000 {
		if series < 2 {
			low2
		} else {
			u32::from(series) * 100_000 + low2
		}
	} else {
		low3
	};

	Ok(number)
}

/// Reconstructs a station code from its low byte and, when available, the
/// PTD byte carrying its high 2 bits in bits 6..7.
pub fn decode_station_code(low_byte: u8, ptd: Option<u8>) -> u16 {
	match ptd {
		Some(ptd) => (u16::from(ptd & 0xC0) << 2) | u16::from(low_byte),
		None => u16::from(low_byte),
	}
}

/// Reconstructs a punch/event timestamp from its raw 2-byte seconds-since-
/// half-day field, optional PTD byte, and a reference time used to resolve
/// which half-day/week the punch falls in.
///
/// Returns `None` for the `0xEEEE` "no time recorded" sentinel.
pub fn decode_time(raw: [u8; 2], ptd: Option<u8>, reftime: OffsetDateTime) -> Option<OffsetDateTime> {
	if raw == [0xEE, 0xEE] {
		return None;
	}

	let punchtime = Duration::seconds(u_be(&raw) as i64);
	let midnight_ref = reftime.replace_time(Time::MIDNIGHT);

	Some(match ptd {
		Some(ptd) => {
			let pm = ptd & 0x01 != 0;
			let half = if pm { Duration::hours(12) } else { Duration::ZERO };
			let weekday = ((i32::from((ptd >> 1) & 0x07)) - 1).rem_euclid(7);
			let ref_weekday = i32::from(reftime.weekday().number_days_from_monday());
			let back_days = (ref_weekday - weekday).rem_euclid(7);

			let mut midnight = midnight_ref - Duration::days(i64::from(back_days));
			let mut result = midnight + punchtime + half;
			if back_days == 0 && result > reftime {
				midnight -= Duration::days(7);
				result = midnight + punchtime + half;
			}
			result
		}
		None => {
			let ref_tod = reftime - midnight_ref;
			let noon = Duration::hours(12);
			if ref_tod < noon {
				if punchtime < ref_tod {
					midnight_ref + punchtime
				} else {
					midnight_ref - noon + punchtime
				}
			} else if punchtime < ref_tod - noon {
				midnight_ref + noon + punchtime
			} else {
				midnight_ref + punchtime
			}
		}
	})
}

/// Scales a raw millisecond sub-byte (0..255) to a microsecond offset.
pub fn decode_micros(ms: u8) -> u32 {
	((u32::from(ms) * 1_000_000) + 128) / 256
}
